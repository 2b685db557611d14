//! Plugin handshake constants.
//!
//! The magic cookie only tells a plugin executable that it was started by a
//! host and not by hand. It is not a security control.

use super::errors::HandshakeError;
use serde::{Deserialize, Serialize};

/// Version of the request/reply protocol spoken over the plugin pipes.
///
/// Bump whenever [`PluginRequest`](super::messages::PluginRequest) or
/// [`PluginReply`](super::messages::PluginReply) change shape.
pub const PROTOCOL_VERSION: u32 = 1;

/// Environment variable carrying the magic cookie.
pub const MAGIC_COOKIE_KEY: &str = "VALKYRIE_PLUGIN_MAGIC_COOKIE";

/// Expected value of [`MAGIC_COOKIE_KEY`].
pub const MAGIC_COOKIE_VALUE: &str = "4e5f0a7c9d21b3e86f1ac0d7b92e4a6153c8f0e1d2b7a964";

/// Environment variable carrying the host's protocol version.
pub const PROTOCOL_VERSION_ENV: &str = "VALKYRIE_PLUGIN_PROTOCOL_VERSION";

/// Environment variable carrying the name the host knows the plugin by.
pub const PLUGIN_NAME_ENV: &str = "VALKYRIE_PLUGIN_NAME";

/// First frame a plugin writes to stdout.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Handshake {
    pub protocol_version: u32,
    pub magic_cookie: String,
}

impl Handshake {
    /// The handshake this build of the crate expects.
    pub fn current() -> Self {
        Self::with_version(PROTOCOL_VERSION)
    }

    /// A handshake advertising `protocol_version`.
    pub fn with_version(protocol_version: u32) -> Self {
        Self {
            protocol_version,
            magic_cookie: MAGIC_COOKIE_VALUE.to_string(),
        }
    }

    /// Check the handshake against this build's expectations.
    ///
    /// The cookie is checked first: a wrong cookie means the other side is
    /// not a plugin at all, and its version is meaningless.
    pub fn verify(&self) -> Result<(), HandshakeError> {
        if self.magic_cookie != MAGIC_COOKIE_VALUE {
            return Err(HandshakeError::CookieMismatch);
        }
        if self.protocol_version != PROTOCOL_VERSION {
            return Err(HandshakeError::VersionMismatch {
                expected: PROTOCOL_VERSION,
                actual: self.protocol_version,
            });
        }
        Ok(())
    }
}

impl Default for Handshake {
    fn default() -> Self {
        Self::current()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bincode::config;
    use bincode::serde::{decode_from_slice, encode_to_vec};
    use serde::{Serialize, de::DeserializeOwned};

    fn serialize_value<T: Serialize>(value: &T) -> Vec<u8> {
        encode_to_vec(value, config::standard()).unwrap()
    }

    fn deserialize_value<T: DeserializeOwned>(bytes: &[u8]) -> T {
        decode_from_slice(bytes, config::standard()).unwrap().0
    }

    #[test]
    fn test_current_handshake_verifies() {
        assert!(Handshake::current().verify().is_ok());
        assert_eq!(Handshake::default(), Handshake::current());
    }

    #[test]
    fn test_version_mismatch() {
        let err = Handshake::with_version(PROTOCOL_VERSION + 1).verify().unwrap_err();
        assert!(matches!(
            err,
            HandshakeError::VersionMismatch { expected: PROTOCOL_VERSION, actual } if actual == PROTOCOL_VERSION + 1
        ));
    }

    #[test]
    fn test_cookie_mismatch_reported_before_version() {
        let handshake = Handshake {
            protocol_version: 99,
            magic_cookie: "nope".to_string(),
        };
        assert!(matches!(handshake.verify(), Err(HandshakeError::CookieMismatch)));
    }

    #[test]
    fn test_serialization() {
        let handshake = Handshake::current();
        let deserialized: Handshake = deserialize_value(&serialize_value(&handshake));
        assert_eq!(handshake, deserialized);
    }
}
