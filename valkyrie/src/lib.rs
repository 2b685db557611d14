//! # Valkyrie
//!
//! Core of a wallet-integration gateway sitting between game providers and
//! operator Player Account Management (PAM) systems.
//!
//! ## Core Modules
//!
//! - [`pam`]: the [`PamClient`](pam::PamClient) capability set, its registry
//!   and the in-process REST backend
//! - [`plugin`]: out-of-process PAM backends spoken to over stdio
//! - [`pipeline`]: ordered middleware around every outbound call
//! - [`amount`]: fixed-scale money amounts
//! - [`error`]: the domain error taxonomy
//! - [`lifecycle`]: shutdown signalling for background tasks
//!
//! ## Example
//!
//! ```
//! use valkyrie::{ErrorCode, amount::{Amount, round_amount}};
//!
//! let amount: Amount = "10.1234567".parse().unwrap();
//! let error = valkyrie::ValkyrieError::from(round_amount(amount).unwrap_err());
//! assert_eq!(error.code(), ErrorCode::PrecisionLoss);
//! ```

pub mod amount;
pub mod error;
pub mod lifecycle;
pub mod pam;
pub mod pipeline;
pub mod plugin;

pub use amount::Amount;
pub use error::{BoxError, ErrorCode, ValkyrieError};
pub use lifecycle::Lifecycle;
