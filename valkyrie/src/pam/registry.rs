//! Backend factory.
//!
//! Backends are registered under a string key at process start and built
//! by key from configuration. The registry is an ordinary value passed
//! around by reference, so tests can build their own.

use super::{client::PamClient, rest::HttpCall};
use crate::{
    error::BoxError, lifecycle::Lifecycle, pipeline::Pipeline, plugin::DataWarehouseConfig,
};
use futures_util::future::BoxFuture;
use std::{
    collections::HashMap,
    fmt,
    path::PathBuf,
    sync::{Arc, PoisonError, RwLock},
    time::Duration,
};
use thiserror::Error;

/// Default bound on a single backend call.
pub const DEFAULT_CALL_TIMEOUT: Duration = Duration::from_secs(10);

/// Everything a backend constructor may need.
#[derive(Clone)]
pub struct BackendArgs {
    pub pam_url: String,
    pub api_key: String,
    pub call_timeout: Duration,
    /// Executable to launch for out-of-process backends.
    pub plugin_path: Option<PathBuf>,
    pub plugin_name: String,
    pub warehouse: Option<DataWarehouseConfig>,
    /// Handlers wrapped around every outgoing HTTP exchange.
    pub http_pipeline: Arc<Pipeline<HttpCall>>,
    /// Owner of background tasks and child processes.
    pub lifecycle: Lifecycle,
}

impl BackendArgs {
    pub fn new(pam_url: impl Into<String>, api_key: impl Into<String>, lifecycle: Lifecycle) -> Self {
        Self {
            pam_url: pam_url.into(),
            api_key: api_key.into(),
            call_timeout: DEFAULT_CALL_TIMEOUT,
            plugin_path: None,
            plugin_name: String::new(),
            warehouse: None,
            http_pipeline: Arc::new(Pipeline::new()),
            lifecycle,
        }
    }
}

impl fmt::Debug for BackendArgs {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BackendArgs")
            .field("pam_url", &self.pam_url)
            .field("api_key", &"<redacted>")
            .field("call_timeout", &self.call_timeout)
            .field("plugin_path", &self.plugin_path)
            .field("plugin_name", &self.plugin_name)
            .field("warehouse", &self.warehouse)
            .field("http_handlers", &self.http_pipeline.len())
            .finish()
    }
}

/// Registry errors.
#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("no PAM backend registered under '{0}'")]
    NotFound(String),

    #[error("failed to build PAM backend '{key}': {source}")]
    Build {
        key: String,
        #[source]
        source: BoxError,
    },
}

/// Asynchronous backend constructor.
pub type Constructor = Arc<
    dyn Fn(BackendArgs) -> BoxFuture<'static, Result<Arc<dyn PamClient>, BoxError>> + Send + Sync,
>;

/// Maps backend keys to constructors.
#[derive(Default)]
pub struct PamRegistry {
    constructors: RwLock<HashMap<String, Constructor>>,
}

impl PamRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a constructor under `key`, replacing any previous one.
    pub fn register<F>(&self, key: impl Into<String>, constructor: F)
    where
        F: Fn(BackendArgs) -> BoxFuture<'static, Result<Arc<dyn PamClient>, BoxError>>
            + Send
            + Sync
            + 'static,
    {
        let key = key.into();
        let previous = self
            .constructors
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(key.clone(), Arc::new(constructor));
        if previous.is_some() {
            tracing::debug!(backend = %key, "replaced PAM backend registration");
        }
    }

    /// Build the backend registered under `key`.
    ///
    /// # Errors
    ///
    /// - [`RegistryError::NotFound`] when nothing is registered under `key`.
    /// - [`RegistryError::Build`] when the constructor fails.
    pub async fn build(&self, key: &str, args: BackendArgs) -> Result<Arc<dyn PamClient>, RegistryError> {
        let constructor = self
            .constructors
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(key)
            .cloned()
            .ok_or_else(|| RegistryError::NotFound(key.to_string()))?;

        let client = constructor(args).await.map_err(|source| RegistryError::Build {
            key: key.to_string(),
            source,
        })?;
        tracing::info!(backend = %key, name = client.name(), "PAM backend ready");
        Ok(client)
    }

    /// Registered keys, sorted.
    pub fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self
            .constructors
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect();
        keys.sort();
        keys
    }

    pub fn contains(&self, key: &str) -> bool {
        self.constructors
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(key)
    }
}
