//! Translation of backend-reported error codes into [`ErrorCode`]s.

use crate::error::ErrorCode;

/// Error codes of the generic PAM API and the domain codes they map to.
///
/// Each backend code maps to a distinct domain code.
pub const PAM_ERROR_CODES: &[(&str, ErrorCode)] = &[
    ("PAM_ERR_UNDEFINED", ErrorCode::Undefined),
    ("PAM_ERR_BAD_REQUEST", ErrorCode::BadRequest),
    ("PAM_ERR_API_TOKEN", ErrorCode::Unauthorized),
    ("PAM_ERR_TIMEOUT", ErrorCode::Timeout),
    ("PAM_ERR_RATE_LIMITED", ErrorCode::RateLimited),
    ("PAM_ERR_SESSION_NOT_FOUND", ErrorCode::SessionNotFound),
    ("PAM_ERR_SESSION_EXPIRED", ErrorCode::SessionExpired),
    ("PAM_ERR_SESSION_INVALID", ErrorCode::SessionInvalid),
    ("PAM_ERR_ACC_NOT_FOUND", ErrorCode::PlayerNotFound),
    ("PAM_ERR_ACC_BLOCKED", ErrorCode::PlayerBlocked),
    ("PAM_ERR_PLAYER_LIMIT", ErrorCode::PlayerLimitReached),
    ("PAM_ERR_SELF_EXCLUDED", ErrorCode::PlayerSelfExcluded),
    ("PAM_ERR_BET_NOT_ALLOWED", ErrorCode::BetNotAllowed),
    ("PAM_ERR_CASH_OVERDRAFT", ErrorCode::InsufficientCash),
    ("PAM_ERR_BONUS_OVERDRAFT", ErrorCode::InsufficientBonus),
    ("PAM_ERR_PROMO_OVERDRAFT", ErrorCode::InsufficientPromo),
    ("PAM_ERR_TRANS_CURRENCY", ErrorCode::CurrencyMismatch),
    ("PAM_ERR_TRANS_NOT_FOUND", ErrorCode::TransactionNotFound),
    ("PAM_ERR_TRANS_ALREADY_CANCELLED", ErrorCode::TransactionRolledBack),
    ("PAM_ERR_TRANS_ALREADY_SETTLED", ErrorCode::TransactionAlreadySettled),
    ("PAM_ERR_DUPLICATE_TRANS", ErrorCode::DuplicateTransaction),
    ("PAM_ERR_CANCEL_NOT_ALLOWED", ErrorCode::RollbackNotAllowed),
    ("PAM_ERR_ROUND_NOT_FOUND", ErrorCode::GameRoundNotFound),
    ("PAM_ERR_ROUND_CLOSED", ErrorCode::GameRoundClosed),
    ("PAM_ERR_GAME_NOT_FOUND", ErrorCode::GameNotFound),
    ("PAM_ERR_MISSING_PROVIDER", ErrorCode::ProviderNotFound),
];

/// Look a backend code up without side effects.
pub fn lookup(code: &str) -> Option<ErrorCode> {
    PAM_ERROR_CODES
        .iter()
        .find(|(known, _)| *known == code)
        .map(|(_, mapped)| *mapped)
}

/// Map a backend code, degrading unknown codes to [`ErrorCode::Undefined`].
///
/// Unknown codes are logged and counted so new backend error classes do not
/// go unnoticed.
pub fn map_pam_error(backend: &str, code: &str) -> ErrorCode {
    match lookup(code) {
        Some(mapped) => mapped,
        None => {
            tracing::warn!(backend = backend, pam_code = code, "unmapped PAM error code");
            metrics::counter!("valkyrie_unmapped_pam_errors_total",
                "backend" => backend.to_string()
            )
            .increment(1);
            ErrorCode::Undefined
        }
    }
}
