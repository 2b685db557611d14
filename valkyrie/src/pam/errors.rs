//! Raw backend error type.

use super::{mapping::map_pam_error, models::Balance};
use crate::error::ValkyrieError;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Error body returned by a generic PAM, before normalization.
#[derive(Clone, Debug, Error, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
#[error("PAM error {code}: {message}")]
pub struct PamError {
    pub code: String,
    pub message: String,
    pub balance: Option<Balance>,
}

impl PamError {
    /// Normalize into the domain taxonomy.
    ///
    /// Unknown codes become `Undefined`; the original code stays visible in
    /// the message.
    pub fn to_valkyrie(&self, backend: &str) -> ValkyrieError {
        let code = map_pam_error(backend, &self.code);
        let message = if self.message.is_empty() {
            self.code.clone()
        } else {
            format!("{} ({})", self.message, self.code)
        };
        let error = ValkyrieError::new(code, message);
        match &self.balance {
            Some(balance) => error.with_balance(balance.clone()),
            None => error,
        }
    }
}
