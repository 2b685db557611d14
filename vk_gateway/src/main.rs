//! Wallet gateway composition root.
//!
//! Loads configuration, builds the configured PAM backend behind the
//! observability pipeline and keeps it alive until Ctrl+C.

mod config;
mod logging;
mod metrics;

use anyhow::{Context, Error};
use config::{CliOverrides, GatewayConfig};
use pico_args::Arguments;
use std::sync::Arc;
use tracing::{info, warn};
use valkyrie::{
    Lifecycle,
    pam::{self, HttpCall, PamCall, PamClient, PamRegistry, PipelinedPamClient},
    pipeline::{CallInfo, LoggingHandler, MetricsHandler, Pipeline, TracingHandler},
    plugin,
};

const HELP: &str = "\
Run the valkyrie wallet gateway

USAGE:
  vk_gateway [OPTIONS]

OPTIONS:
  --backend      KEY        PAM backend: generic or plugin     [default: env PAM_BACKEND or generic]
  --pam-url      URL        Base url of the PAM                [default: env PAM_URL]
  --plugin-path  PATH       Plugin executable                  [default: env PLUGIN_PATH]
  --metrics-bind IP:PORT    Prometheus exporter address        [default: env METRICS_BIND]

FLAGS:
  -h, --help                Print help information

ENVIRONMENT:
  PAM_BACKEND               Registry key of the PAM backend
  PAM_URL                   Base url of the PAM (required)
  PAM_API_KEY               API key for the PAM (required)
  PAM_CALL_TIMEOUT_MS       Bound on a single PAM call [default: 10000]
  PLUGIN_NAME               Name the plugin is logged under
  PLUGIN_PATH               Plugin executable, required by the plugin backend
  DW_URL, DW_DATABASE,
  DW_USER, DW_PASSWORD      Optional reporting database forwarded to plugins
  SHUTDOWN_TIMEOUT_SECS     Bound on graceful shutdown [default: 10]
  METRICS_BIND              Prometheus exporter address
  LOG_FORMAT                console or json [default: console]
  RUST_LOG                  Log filter [default: info]
";

/// A pipeline with the stock tracing, metrics and logging handlers.
fn observed<P: CallInfo>() -> Arc<Pipeline<P>> {
    let pipeline = Pipeline::new();
    pipeline.register(TracingHandler);
    pipeline.register(MetricsHandler);
    pipeline.register(LoggingHandler::default());
    Arc::new(pipeline)
}

#[tokio::main]
async fn main() -> Result<(), Error> {
    // Load .env file if it exists
    let _ = dotenvy::dotenv();

    let mut pargs = Arguments::from_env();

    // Help has a higher priority and should be handled separately.
    if pargs.contains(["-h", "--help"]) {
        print!("{HELP}");
        return Ok(());
    }

    let overrides = CliOverrides {
        backend: pargs.opt_value_from_str("--backend")?,
        pam_url: pargs.opt_value_from_str("--pam-url")?,
        plugin_path: pargs.opt_value_from_str("--plugin-path")?,
        metrics_bind: pargs.opt_value_from_str("--metrics-bind")?,
    };
    let unused = pargs.finish();

    let config = GatewayConfig::from_env(overrides)?;
    logging::init(config.log_format);
    if !unused.is_empty() {
        warn!(?unused, "ignoring unknown arguments");
    }
    info!(backend = %config.backend, pam_url = %config.pam_url, "starting valkyrie gateway");

    if let Some(addr) = config.metrics_bind {
        metrics::init_metrics(addr).context("failed to install Prometheus exporter")?;
        info!(%addr, "metrics exporter listening");
    }

    let lifecycle = Lifecycle::new();
    let registry = PamRegistry::new();
    pam::rest::register(&registry);
    plugin::register(&registry);

    let args = config.backend_args(lifecycle.clone(), observed::<HttpCall>());
    let backend = match registry.build(&config.backend, args).await {
        Ok(backend) => backend,
        Err(error) => {
            lifecycle.shutdown(config.shutdown_timeout).await;
            return Err(Error::new(error).context(format!("PAM backend '{}' is unusable", config.backend)));
        }
    };

    let client = PipelinedPamClient::new(backend, observed::<PamCall>());
    let settlement_type = client.settlement_type().to_string();
    metrics::backend_ready(client.name(), &settlement_type);
    info!(
        backend = client.name(),
        settlement_type = %settlement_type,
        "PAM backend ready. Press Ctrl+C to stop."
    );

    tokio::signal::ctrl_c()
        .await
        .context("failed to install Ctrl+C handler")?;

    info!("shutting down gateway");
    drop(client);
    if !lifecycle.shutdown(config.shutdown_timeout).await {
        warn!("some background tasks did not stop in time");
    }

    Ok(())
}
