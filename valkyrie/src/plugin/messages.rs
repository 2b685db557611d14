//! Frames exchanged between the host and a plugin process.
//!
//! One request variant per PAM operation plus the control requests. Frames
//! are encoded with `bincode`, which is not self-describing, so these types
//! stick to plain structs, options and externally tagged enums.

use crate::{
    error::{ErrorCode, ValkyrieError},
    pam::models::{
        AddTransactionRequest, Balance, GameRound, GetBalanceRequest, GetGameRoundRequest,
        GetSessionRequest, GetTransactionsRequest, RefreshSessionRequest, Session, SettlementType,
        Transaction, TransactionResult,
    },
};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Connection parameters of an optional reporting database.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DataWarehouseConfig {
    pub url: String,
    pub database: String,
    pub user: String,
    pub password: String,
}

impl fmt::Debug for DataWarehouseConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DataWarehouseConfig")
            .field("url", &self.url)
            .field("database", &self.database)
            .field("user", &self.user)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// Payload of the `Init` request, forwarded to the plugin verbatim.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PluginInitConfig {
    pub pam_url: String,
    pub api_key: String,
    pub warehouse: Option<DataWarehouseConfig>,
}

impl fmt::Debug for PluginInitConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PluginInitConfig")
            .field("pam_url", &self.pam_url)
            .field("api_key", &"<redacted>")
            .field("warehouse", &self.warehouse)
            .finish()
    }
}

/// Host to plugin requests.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum PluginRequest {
    Init(PluginInitConfig),
    GetSession(GetSessionRequest),
    RefreshSession(RefreshSessionRequest),
    GetBalance(GetBalanceRequest),
    GetTransactions(GetTransactionsRequest),
    AddTransaction(AddTransactionRequest),
    GetGameRound(GetGameRoundRequest),
    GetSettlementType,
}

impl PluginRequest {
    /// Operation name for logs.
    pub fn operation(&self) -> &'static str {
        match self {
            Self::Init(_) => "init",
            Self::GetSession(_) => "get_session",
            Self::RefreshSession(_) => "refresh_session",
            Self::GetBalance(_) => "get_balance",
            Self::GetTransactions(_) => "get_transactions",
            Self::AddTransaction(_) => "add_transaction",
            Self::GetGameRound(_) => "get_game_round",
            Self::GetSettlementType => "get_settlement_type",
        }
    }
}

/// Plugin to host replies, one per successful request.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum PluginReply {
    Initialized,
    Session(Session),
    Balance(Balance),
    Transactions(Vec<Transaction>),
    TransactionResult(TransactionResult),
    GameRound(GameRound),
    SettlementType(SettlementType),
}

impl PluginReply {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Initialized => "initialized",
            Self::Session(_) => "session",
            Self::Balance(_) => "balance",
            Self::Transactions(_) => "transactions",
            Self::TransactionResult(_) => "transaction_result",
            Self::GameRound(_) => "game_round",
            Self::SettlementType(_) => "settlement_type",
        }
    }
}

/// A [`ValkyrieError`] as it crosses the process boundary. The source chain
/// stays behind.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WireError {
    pub code: ErrorCode,
    pub message: String,
    pub balance: Option<Balance>,
}

impl WireError {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            balance: None,
        }
    }
}

impl From<&ValkyrieError> for WireError {
    fn from(error: &ValkyrieError) -> Self {
        Self {
            code: error.code(),
            message: error.message().to_string(),
            balance: error.balance().cloned(),
        }
    }
}

impl From<WireError> for ValkyrieError {
    fn from(error: WireError) -> Self {
        let converted = ValkyrieError::new(error.code, error.message);
        match error.balance {
            Some(balance) => converted.with_balance(balance),
            None => converted,
        }
    }
}

/// A request tagged with the id its response must echo.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestFrame {
    pub id: u64,
    pub request: PluginRequest,
}

/// The response to the request with the same id. Exactly one of `reply`
/// and `error` is set.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResponseFrame {
    pub id: u64,
    pub reply: Option<PluginReply>,
    pub error: Option<WireError>,
}

impl ResponseFrame {
    pub fn success(id: u64, reply: PluginReply) -> Self {
        Self {
            id,
            reply: Some(reply),
            error: None,
        }
    }

    pub fn failure(id: u64, error: WireError) -> Self {
        Self {
            id,
            reply: None,
            error: Some(error),
        }
    }

    pub fn from_result(id: u64, result: Result<PluginReply, ValkyrieError>) -> Self {
        match result {
            Ok(reply) => Self::success(id, reply),
            Err(error) => Self::failure(id, WireError::from(&error)),
        }
    }

    /// Turn the frame back into a result. An error always wins over a
    /// reply; a frame with neither is malformed.
    pub fn into_result(self) -> Result<PluginReply, ValkyrieError> {
        match (self.reply, self.error) {
            (_, Some(error)) => Err(error.into()),
            (Some(reply), None) => Ok(reply),
            (None, None) => Err(ValkyrieError::new(
                ErrorCode::Internal,
                format!("plugin response {} carries neither a reply nor an error", self.id),
            )),
        }
    }
}
