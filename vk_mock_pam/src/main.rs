//! Mock PAM plugin executable.
//!
//! Must be started by a valkyrie host: it refuses to run without the magic
//! cookie in its environment.

use anyhow::{Error, anyhow};
use std::env;
use valkyrie::plugin::{PluginServer, init_plugin_logging};
use vk_mock_pam::{FAIL_INIT_ENV, HANDSHAKE_VERSION_ENV, MockPam};

#[tokio::main]
async fn main() -> Result<(), Error> {
    init_plugin_logging().map_err(|e| anyhow!(e))?;

    let fail_init = env::var(FAIL_INIT_ENV).is_ok_and(|v| !matches!(v.as_str(), "" | "0" | "false"));
    let mut server = PluginServer::new(MockPam::new().fail_init(fail_init));
    if let Ok(version) = env::var(HANDSHAKE_VERSION_ENV) {
        server = server.protocol_version(version.parse()?);
    }

    server.serve_stdio().await?;
    tracing::info!("mock PAM exiting");
    Ok(())
}
