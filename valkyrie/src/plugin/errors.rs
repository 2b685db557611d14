//! Plugin error types.

use crate::error::ValkyrieError;
use std::{io, path::PathBuf, time::Duration};
use thiserror::Error;

/// Errors that can occur while encoding or decoding plugin frames.
#[derive(Debug, Error)]
pub enum SerializationError {
    /// Failed to encode a frame body
    #[error("failed to encode frame: {0}")]
    Encode(#[from] bincode::error::EncodeError),

    /// Failed to decode a frame body
    #[error("failed to decode frame: {0}")]
    Decode(#[from] bincode::error::DecodeError),

    /// Frame size exceeded the maximum allowed
    #[error("frame size {actual} exceeds maximum {max}")]
    FrameTooLarge { actual: usize, max: usize },

    /// Bytes left over after the frame body
    #[error("invalid frame: {0}")]
    InvalidFormat(String),
}

/// Handshake failures, raised on the host side.
#[derive(Debug, Error)]
pub enum HandshakeError {
    #[error("plugin speaks protocol version {actual}, host expects {expected}")]
    VersionMismatch { expected: u32, actual: u32 },

    #[error("plugin presented an unknown magic cookie")]
    CookieMismatch,

    #[error("plugin did not complete the handshake within {0:?}")]
    Timeout(Duration),

    #[error("plugin closed stdout before completing the handshake")]
    Closed,

    #[error("failed to read handshake: {0}")]
    Io(#[from] io::Error),
}

/// Fatal plugin errors. Raised while a backend is being built, never per
/// request.
#[derive(Debug, Error)]
pub enum PluginError {
    #[error("no executable configured for plugin '{0}'")]
    MissingPath(String),

    #[error("failed to launch plugin {path:?}: {source}")]
    Launch {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("plugin {0} pipe is not available")]
    MissingPipe(&'static str),

    #[error("plugin handshake failed: {0}")]
    Handshake(#[from] HandshakeError),

    #[error("plugin rejected initialization: {0}")]
    Init(#[source] ValkyrieError),

    #[error("this executable is a valkyrie plugin and must be launched by the gateway")]
    NotLaunchedByHost,

    #[error("plugin i/o error: {0}")]
    Io(#[from] io::Error),
}
