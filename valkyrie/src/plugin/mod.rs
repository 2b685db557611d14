//! Out-of-process PAM backends.
//!
//! The host launches a plugin executable with piped stdio. The plugin
//! answers with a [`Handshake`] frame on stdout, after which the host sends
//! one [`RequestFrame`] at a time and reads the matching [`ResponseFrame`].
//! Frames are length-prefixed `bincode` (see [`codec`]). The plugin's stderr
//! is read as JSON log lines and re-emitted on the host (see
//! [`log_bridge`]).
//!
//! ```text
//! host                                 plugin
//!  |-- spawn (cookie, version env) ------>|
//!  |<------------------------- Handshake -|
//!  |-- Init -------------------------------->|
//!  |<---------------------------- Initialized -|
//!  |-- GetSettlementType / PAM calls ... ---->|
//! ```
//!
//! The host side is [`PluginPamClient`]; plugin executables are built on
//! [`PluginServer`] and [`PamPlugin`].

pub mod client;
pub mod codec;
pub mod errors;
pub mod log_bridge;
pub mod messages;
pub mod process;
pub mod protocol_version;
pub mod server;

pub use client::{PluginConfig, PluginPamClient, register};
pub use errors::{HandshakeError, PluginError, SerializationError};
pub use messages::{
    DataWarehouseConfig, PluginInitConfig, PluginReply, PluginRequest, RequestFrame, ResponseFrame,
    WireError,
};
pub use process::PluginState;
pub use protocol_version::{Handshake, PROTOCOL_VERSION};
pub use server::{PamPlugin, PluginServer, init_plugin_logging};
