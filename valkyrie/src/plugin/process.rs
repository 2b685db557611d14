//! Plugin process launch, handshake and supervision.

use super::{
    codec,
    errors::{HandshakeError, PluginError},
    protocol_version::{
        Handshake, MAGIC_COOKIE_KEY, MAGIC_COOKIE_VALUE, PLUGIN_NAME_ENV, PROTOCOL_VERSION,
        PROTOCOL_VERSION_ENV,
    },
};
use std::{fmt, path::Path, process::Stdio, time::Duration};
use tokio::{
    io::AsyncRead,
    process::{Child, ChildStderr, ChildStdin, ChildStdout, Command},
    sync::watch,
};
use tokio_util::sync::CancellationToken;

/// Lifecycle state of a plugin process.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum PluginState {
    #[default]
    NotStarted,
    /// Handshake completed, calls are accepted.
    Running,
    /// Owner cancelled, process is being killed.
    Terminating,
    Stopped,
}

impl PluginState {
    pub fn is_running(&self) -> bool {
        matches!(self, Self::Running)
    }
}

impl fmt::Display for PluginState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let repr = match self {
            Self::NotStarted => "not started",
            Self::Running => "running",
            Self::Terminating => "terminating",
            Self::Stopped => "stopped",
        };
        write!(f, "{repr}")
    }
}

/// A freshly spawned plugin with its pipes split off.
pub struct Spawned {
    pub child: Child,
    pub stdin: ChildStdin,
    pub stdout: ChildStdout,
    pub stderr: ChildStderr,
}

/// Start the plugin executable with piped stdio.
///
/// The child is killed if it is dropped before being handed to
/// [`supervise`].
pub fn spawn(name: &str, path: &Path, env: &[(String, String)]) -> Result<Spawned, PluginError> {
    let mut child = Command::new(path)
        .env(MAGIC_COOKIE_KEY, MAGIC_COOKIE_VALUE)
        .env(PROTOCOL_VERSION_ENV, PROTOCOL_VERSION.to_string())
        .env(PLUGIN_NAME_ENV, name)
        .envs(env.iter().map(|(key, value)| (key.as_str(), value.as_str())))
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .map_err(|source| PluginError::Launch {
            path: path.to_path_buf(),
            source,
        })?;

    let stdin = child.stdin.take().ok_or(PluginError::MissingPipe("stdin"))?;
    let stdout = child.stdout.take().ok_or(PluginError::MissingPipe("stdout"))?;
    let stderr = child.stderr.take().ok_or(PluginError::MissingPipe("stderr"))?;
    tracing::debug!(plugin = name, pid = child.id(), "plugin process spawned");

    Ok(Spawned {
        child,
        stdin,
        stdout,
        stderr,
    })
}

/// Wait for the plugin's handshake frame and verify it.
pub async fn handshake<R>(stdout: &mut R, timeout: Duration) -> Result<Handshake, HandshakeError>
where
    R: AsyncRead + Unpin,
{
    let frame = tokio::time::timeout(timeout, codec::try_read_frame::<Handshake, _>(stdout))
        .await
        .map_err(|_| HandshakeError::Timeout(timeout))??;
    let handshake = frame.ok_or(HandshakeError::Closed)?;
    handshake.verify()?;
    Ok(handshake)
}

/// Own the child until `owner` is cancelled or the child exits.
///
/// On cancellation the child is killed immediately; there is no grace
/// period. Either way the state ends as [`PluginState::Stopped`].
pub async fn supervise(
    name: String,
    mut child: Child,
    state: watch::Sender<PluginState>,
    owner: CancellationToken,
) {
    tokio::select! {
        _ = owner.cancelled() => {
            state.send_replace(PluginState::Terminating);
            if let Err(error) = child.start_kill() {
                tracing::warn!(plugin = %name, %error, "failed to kill plugin process");
            }
            match child.wait().await {
                Ok(status) => tracing::info!(plugin = %name, %status, "plugin process terminated"),
                Err(error) => tracing::warn!(plugin = %name, %error, "failed to reap plugin process"),
            }
        }
        status = child.wait() => {
            match status {
                Ok(status) => tracing::warn!(plugin = %name, %status, "plugin process exited on its own"),
                Err(error) => tracing::warn!(plugin = %name, %error, "lost track of plugin process"),
            }
        }
    }
    state.send_replace(PluginState::Stopped);
}
