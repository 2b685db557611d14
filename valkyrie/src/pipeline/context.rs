//! Per-call execution context.

use std::collections::HashMap;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// Metadata key under which every context stores its request id.
pub const REQUEST_ID: &str = "request_id";

/// Cancellation and metadata travelling with a single call.
///
/// Contexts are cheap to clone; clones share the cancellation token but
/// own their metadata.
#[derive(Clone, Debug)]
pub struct CallContext {
    cancel: CancellationToken,
    metadata: HashMap<String, String>,
}

impl CallContext {
    /// Create a context with a fresh request id and its own token.
    pub fn new() -> Self {
        Self::with_cancellation(CancellationToken::new())
    }

    /// Create a context bound to an existing token, e.g. a child of the
    /// inbound request's token.
    pub fn with_cancellation(cancel: CancellationToken) -> Self {
        let mut metadata = HashMap::new();
        metadata.insert(REQUEST_ID.to_string(), Uuid::new_v4().to_string());
        Self { cancel, metadata }
    }

    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancel
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    pub fn request_id(&self) -> &str {
        self.metadata(REQUEST_ID).unwrap_or_default()
    }

    pub fn metadata(&self, key: &str) -> Option<&str> {
        self.metadata.get(key).map(String::as_str)
    }

    pub fn set_metadata(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.metadata.insert(key.into(), value.into());
    }

    /// Builder-style variant of [`CallContext::set_metadata`].
    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.set_metadata(key, value);
        self
    }
}

impl Default for CallContext {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_ids_are_unique() {
        let a = CallContext::new();
        let b = CallContext::new();
        assert!(!a.request_id().is_empty());
        assert_ne!(a.request_id(), b.request_id());
    }

    #[test]
    fn test_clones_share_cancellation() {
        let ctx = CallContext::new();
        let clone = ctx.clone().with_metadata("provider", "netent");
        ctx.cancellation().cancel();
        assert!(clone.is_cancelled());
        assert_eq!(clone.metadata("provider"), Some("netent"));
        assert_eq!(ctx.metadata("provider"), None);
    }
}
