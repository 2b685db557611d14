//! Player Account Management backends.
//!
//! - [`PamClient`]: the capability set every backend implements
//! - [`PamRegistry`]: builds a backend by key from [`BackendArgs`]
//! - [`PipelinedPamClient`]: runs every call of another client through a
//!   [`Pipeline`](crate::pipeline::Pipeline)
//! - [`RestPamClient`]: in-process backend speaking the generic PAM REST API
//!
//! The out-of-process backend lives in [`crate::plugin`].
//!
//! ## Example
//!
//! ```no_run
//! use valkyrie::lifecycle::Lifecycle;
//! use valkyrie::pam::{self, BackendArgs, PamRegistry, models::GetSessionRequest};
//! use valkyrie::pipeline::CallContext;
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let registry = PamRegistry::new();
//! pam::rest::register(&registry);
//!
//! let args = BackendArgs::new("https://pam.example.com", "secret", Lifecycle::new());
//! let client = registry.build("generic", args).await?;
//! let request = GetSessionRequest {
//!     provider: "netent".to_string(),
//!     token: "t1".to_string(),
//! };
//! let session = client.get_session(pam::ready(CallContext::new(), request)).await?;
//! println!("{} plays in {}", session.player_id, session.currency);
//! # Ok(())
//! # }
//! ```

pub mod client;
pub mod errors;
pub mod instrumented;
pub mod mapping;
pub mod models;
pub mod registry;
pub mod rest;

pub use client::{AmountMapper, MapResult, Mapper, PamClient, prevalidated, ready, rounded};
pub use errors::PamError;
pub use instrumented::{PamCall, PamOperation, PipelinedPamClient};
pub use registry::{BackendArgs, PamRegistry, RegistryError};
pub use rest::{HttpCall, RestPamClient};
