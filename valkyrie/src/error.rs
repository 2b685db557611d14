//! Closed error taxonomy shared by every PAM backend.
//!
//! Backends report failures in their own vocabulary. Before an error reaches
//! a caller it is normalized into a [`ValkyrieError`] whose [`ErrorCode`] is
//! drawn from a fixed set, so provider adapters can branch on a stable code
//! without knowing which backend produced it.

use crate::{amount::AmountError, pam::models::Balance};
use serde::{Deserialize, Serialize};
use std::{error::Error as StdError, fmt};
use thiserror::Error;

/// Type-erased error used at seams where the concrete type is unknown
/// (pipeline handlers, transport failures, registry constructors).
pub type BoxError = Box<dyn StdError + Send + Sync + 'static>;

/// Closed set of domain error conditions.
///
/// Variants are only ever appended: the plugin wire format encodes them by
/// position.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorCode {
    #[default]
    Undefined,

    // General
    BadRequest,
    Unauthorized,
    Timeout,
    Cancelled,
    Internal,
    RateLimited,
    UnsupportedOperation,
    PluginUnavailable,

    // Amounts and currency
    InvalidAmount,
    PrecisionLoss,
    InvalidCurrency,
    CurrencyMismatch,

    // Session
    SessionNotFound,
    SessionExpired,
    SessionInvalid,
    InvalidToken,

    // Player
    PlayerNotFound,
    PlayerBlocked,
    PlayerLimitReached,
    PlayerSelfExcluded,
    BetNotAllowed,

    // Funds
    InsufficientFunds,
    InsufficientCash,
    InsufficientBonus,
    InsufficientPromo,

    // Transactions
    DuplicateTransaction,
    TransactionNotFound,
    TransactionRolledBack,
    TransactionAlreadySettled,
    TransactionMismatch,
    InvalidTransactionType,
    RollbackNotAllowed,

    // Games
    GameNotFound,
    GameDisabled,
    GameRoundNotFound,
    GameRoundClosed,

    // Provider and promotions
    ProviderNotFound,
    ProviderDisabled,
    JackpotError,
    BonusNotFound,
}

impl ErrorCode {
    /// Every code, in wire order.
    pub const ALL: [ErrorCode; 41] = [
        Self::Undefined,
        Self::BadRequest,
        Self::Unauthorized,
        Self::Timeout,
        Self::Cancelled,
        Self::Internal,
        Self::RateLimited,
        Self::UnsupportedOperation,
        Self::PluginUnavailable,
        Self::InvalidAmount,
        Self::PrecisionLoss,
        Self::InvalidCurrency,
        Self::CurrencyMismatch,
        Self::SessionNotFound,
        Self::SessionExpired,
        Self::SessionInvalid,
        Self::InvalidToken,
        Self::PlayerNotFound,
        Self::PlayerBlocked,
        Self::PlayerLimitReached,
        Self::PlayerSelfExcluded,
        Self::BetNotAllowed,
        Self::InsufficientFunds,
        Self::InsufficientCash,
        Self::InsufficientBonus,
        Self::InsufficientPromo,
        Self::DuplicateTransaction,
        Self::TransactionNotFound,
        Self::TransactionRolledBack,
        Self::TransactionAlreadySettled,
        Self::TransactionMismatch,
        Self::InvalidTransactionType,
        Self::RollbackNotAllowed,
        Self::GameNotFound,
        Self::GameDisabled,
        Self::GameRoundNotFound,
        Self::GameRoundClosed,
        Self::ProviderNotFound,
        Self::ProviderDisabled,
        Self::JackpotError,
        Self::BonusNotFound,
    ];

    /// Stable snake_case name, used in logs and metric labels.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Undefined => "undefined",
            Self::BadRequest => "bad_request",
            Self::Unauthorized => "unauthorized",
            Self::Timeout => "timeout",
            Self::Cancelled => "cancelled",
            Self::Internal => "internal",
            Self::RateLimited => "rate_limited",
            Self::UnsupportedOperation => "unsupported_operation",
            Self::PluginUnavailable => "plugin_unavailable",
            Self::InvalidAmount => "invalid_amount",
            Self::PrecisionLoss => "precision_loss",
            Self::InvalidCurrency => "invalid_currency",
            Self::CurrencyMismatch => "currency_mismatch",
            Self::SessionNotFound => "session_not_found",
            Self::SessionExpired => "session_expired",
            Self::SessionInvalid => "session_invalid",
            Self::InvalidToken => "invalid_token",
            Self::PlayerNotFound => "player_not_found",
            Self::PlayerBlocked => "player_blocked",
            Self::PlayerLimitReached => "player_limit_reached",
            Self::PlayerSelfExcluded => "player_self_excluded",
            Self::BetNotAllowed => "bet_not_allowed",
            Self::InsufficientFunds => "insufficient_funds",
            Self::InsufficientCash => "insufficient_cash",
            Self::InsufficientBonus => "insufficient_bonus",
            Self::InsufficientPromo => "insufficient_promo",
            Self::DuplicateTransaction => "duplicate_transaction",
            Self::TransactionNotFound => "transaction_not_found",
            Self::TransactionRolledBack => "transaction_rolled_back",
            Self::TransactionAlreadySettled => "transaction_already_settled",
            Self::TransactionMismatch => "transaction_mismatch",
            Self::InvalidTransactionType => "invalid_transaction_type",
            Self::RollbackNotAllowed => "rollback_not_allowed",
            Self::GameNotFound => "game_not_found",
            Self::GameDisabled => "game_disabled",
            Self::GameRoundNotFound => "game_round_not_found",
            Self::GameRoundClosed => "game_round_closed",
            Self::ProviderNotFound => "provider_not_found",
            Self::ProviderDisabled => "provider_disabled",
            Self::JackpotError => "jackpot_error",
            Self::BonusNotFound => "bonus_not_found",
        }
    }

    /// Whether the same request may succeed if sent again later.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Timeout | Self::RateLimited)
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Normalized PAM error.
///
/// The default value (undefined code, empty message, nothing attached) is the
/// "zero" error: proposing it to [`handle_error`] leaves the original error
/// untouched.
#[derive(Debug, Default, Error)]
#[error("{code}: {message}")]
pub struct ValkyrieError {
    code: ErrorCode,
    message: String,
    balance: Option<Balance>,
    #[source]
    source: Option<BoxError>,
}

impl ValkyrieError {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            balance: None,
            source: None,
        }
    }

    /// Attach the balance the PAM reported alongside the failure.
    pub fn with_balance(mut self, balance: Balance) -> Self {
        self.balance = Some(balance);
        self
    }

    /// Attach the underlying cause.
    pub fn with_source(mut self, source: impl Into<BoxError>) -> Self {
        self.source = Some(source.into());
        self
    }

    pub fn code(&self) -> ErrorCode {
        self.code
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn balance(&self) -> Option<&Balance> {
        self.balance.as_ref()
    }

    pub fn is_retryable(&self) -> bool {
        self.code.is_retryable()
    }

    /// Whether this is the zero value.
    pub fn is_zero(&self) -> bool {
        self.code == ErrorCode::Undefined
            && self.message.is_empty()
            && self.balance.is_none()
            && self.source.is_none()
    }
}

impl From<AmountError> for ValkyrieError {
    fn from(error: AmountError) -> Self {
        let code = match error {
            AmountError::PrecisionLoss { .. } => ErrorCode::PrecisionLoss,
            AmountError::Invalid(_) | AmountError::Overflow => ErrorCode::InvalidAmount,
        };
        ValkyrieError::new(code, error.to_string()).with_source(error)
    }
}

/// Find the first [`ValkyrieError`] on an error chain.
pub fn find_valkyrie<'a>(error: &'a (dyn StdError + 'static)) -> Option<&'a ValkyrieError> {
    let mut current = Some(error);
    while let Some(error) = current {
        if let Some(valkyrie) = error.downcast_ref::<ValkyrieError>() {
            return Some(valkyrie);
        }
        current = error.source();
    }
    None
}

/// Assign a domain error to an existing error.
///
/// - If `err` already is, or wraps, a [`ValkyrieError`] it is returned
///   unchanged; domain errors are never wrapped twice.
/// - Otherwise a non-zero `proposed` error is returned with `err` as its
///   source.
/// - A zero `proposed` error leaves `err` as it is.
pub fn handle_error(err: BoxError, proposed: ValkyrieError) -> BoxError {
    let chain: &(dyn StdError + 'static) = err.as_ref();
    if find_valkyrie(chain).is_some() || proposed.is_zero() {
        return err;
    }
    Box::new(proposed.with_source(err))
}

/// Normalize any error into a [`ValkyrieError`].
///
/// A boxed `ValkyrieError` is unboxed as is. A chain that wraps one keeps
/// its code, message and balance, with the full chain as source. Anything
/// else becomes [`ErrorCode::Undefined`].
pub fn into_valkyrie(err: BoxError) -> ValkyrieError {
    match err.downcast::<ValkyrieError>() {
        Ok(valkyrie) => *valkyrie,
        Err(err) => {
            let chain: &(dyn StdError + 'static) = err.as_ref();
            let normalized = match find_valkyrie(chain) {
                Some(inner) => {
                    let normalized = ValkyrieError::new(inner.code, inner.message.clone());
                    match inner.balance.clone() {
                        Some(balance) => normalized.with_balance(balance),
                        None => normalized,
                    }
                }
                None => ValkyrieError::new(ErrorCode::Undefined, err.to_string()),
            };
            normalized.with_source(err)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::{collections::HashSet, io};

    #[derive(Debug, Error)]
    #[error("transport wrapper")]
    struct Wrapper(#[source] ValkyrieError);

    fn io_error() -> BoxError {
        Box::new(io::Error::new(io::ErrorKind::ConnectionReset, "reset"))
    }

    #[test]
    fn test_all_codes_have_distinct_names() {
        let names: HashSet<_> = ErrorCode::ALL.iter().map(|c| c.as_str()).collect();
        assert_eq!(names.len(), ErrorCode::ALL.len());
    }

    #[test]
    fn test_retryable_codes() {
        assert!(ErrorCode::Timeout.is_retryable());
        assert!(ErrorCode::RateLimited.is_retryable());
        assert!(!ErrorCode::PluginUnavailable.is_retryable());
        assert!(!ErrorCode::InsufficientCash.is_retryable());
    }

    #[test]
    fn test_default_is_zero() {
        assert!(ValkyrieError::default().is_zero());
        assert!(!ValkyrieError::new(ErrorCode::Undefined, "x").is_zero());
        assert!(!ValkyrieError::new(ErrorCode::Timeout, "").is_zero());
    }

    #[test]
    fn test_display() {
        let err = ValkyrieError::new(ErrorCode::SessionExpired, "token t1 expired");
        assert_eq!(err.to_string(), "session_expired: token t1 expired");
    }

    #[test]
    fn test_handle_error_keeps_existing_valkyrie_error() {
        let err: BoxError = Box::new(ValkyrieError::new(ErrorCode::SessionNotFound, "gone"));
        let ptr = &*err as *const (dyn StdError + Send + Sync) as *const u8;
        let out = handle_error(err, ValkyrieError::new(ErrorCode::Timeout, "slow"));
        assert_eq!(&*out as *const (dyn StdError + Send + Sync) as *const u8, ptr);
        assert_eq!(into_valkyrie(out).code(), ErrorCode::SessionNotFound);
    }

    #[test]
    fn test_handle_error_keeps_wrapped_valkyrie_error() {
        let err: BoxError = Box::new(Wrapper(ValkyrieError::new(ErrorCode::InsufficientCash, "")));
        let out = handle_error(err, ValkyrieError::new(ErrorCode::Timeout, "slow"));
        assert_eq!(out.to_string(), "transport wrapper");
        assert_eq!(into_valkyrie(out).code(), ErrorCode::InsufficientCash);
    }

    #[test]
    fn test_handle_error_zero_proposal_passes_through() {
        let out = handle_error(io_error(), ValkyrieError::default());
        assert!(out.downcast_ref::<io::Error>().is_some());
    }

    #[test]
    fn test_handle_error_wraps_with_proposal() {
        let out = handle_error(io_error(), ValkyrieError::new(ErrorCode::Timeout, "slow"));
        let valkyrie = out.downcast_ref::<ValkyrieError>().unwrap();
        assert_eq!(valkyrie.code(), ErrorCode::Timeout);
        assert!(valkyrie.source().unwrap().downcast_ref::<io::Error>().is_some());
    }

    #[test]
    fn test_into_valkyrie_defaults_to_undefined() {
        let err = into_valkyrie(io_error());
        assert_eq!(err.code(), ErrorCode::Undefined);
        assert_eq!(err.message(), "reset");
    }

    #[test]
    fn test_into_valkyrie_keeps_balance_from_chain() {
        let inner = ValkyrieError::new(ErrorCode::InsufficientCash, "low").with_balance(Balance::default());
        let err = into_valkyrie(Box::new(Wrapper(inner)));
        assert_eq!(err.code(), ErrorCode::InsufficientCash);
        assert_eq!(err.balance(), Some(&Balance::default()));
    }

    #[test]
    fn test_amount_error_conversion() {
        let err: ValkyrieError = crate::amount::round_amount("0.0000001".parse().unwrap())
            .unwrap_err()
            .into();
        assert_eq!(err.code(), ErrorCode::PrecisionLoss);
    }
}
