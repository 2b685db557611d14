//! PAM data models.
//!
//! These types cross both the HTTP boundary (JSON) and the plugin boundary
//! (bincode), so they avoid serde attributes that need a self-describing
//! format.

use crate::amount::{Amount, AmountError, AmountRounder};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Player session as held by the PAM.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    pub player_id: String,
    pub currency: String,
    pub country: String,
    pub language: String,
    pub game_id: Option<String>,
    pub token: String,
    pub expires_at: Option<DateTime<Utc>>,
}

/// Player balance split by fund type.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Balance {
    pub cash: Amount,
    pub bonus: Amount,
    pub promo: Amount,
}

/// Transaction type
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TransactionType {
    Deposit,
    Withdraw,
    Cancel,
    PromoDeposit,
    PromoWithdraw,
    PromoCancel,
}

impl TransactionType {
    /// Whether the transaction takes money from the player.
    pub fn is_debit(&self) -> bool {
        matches!(self, Self::Withdraw | Self::PromoWithdraw)
    }
}

impl fmt::Display for TransactionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let repr = match self {
            Self::Deposit => "deposit",
            Self::Withdraw => "withdraw",
            Self::Cancel => "cancel",
            Self::PromoDeposit => "promo_deposit",
            Self::PromoWithdraw => "promo_withdraw",
            Self::PromoCancel => "promo_cancel",
        };
        write!(f, "{repr}")
    }
}

/// A wallet transaction as sent to the PAM.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Transaction {
    pub provider_transaction_id: String,
    pub player_id: String,
    pub currency: String,
    pub transaction_type: TransactionType,
    pub cash_amount: Amount,
    pub bonus_amount: Amount,
    pub promo_amount: Amount,
    pub jackpot_contribution: Option<Amount>,
    pub game_id: Option<String>,
    pub game_round_ref: Option<String>,
    pub provider_bet_ref: Option<String>,
    pub is_game_over: bool,
    pub transaction_datetime: DateTime<Utc>,
}

impl Transaction {
    /// Run every amount of the transaction through `rounder`.
    ///
    /// # Errors
    ///
    /// Fails on the first amount the rounder rejects; the transaction is
    /// left untouched in that case.
    pub fn round_amounts(&mut self, rounder: AmountRounder) -> Result<(), AmountError> {
        let cash = rounder(self.cash_amount)?;
        let bonus = rounder(self.bonus_amount)?;
        let promo = rounder(self.promo_amount)?;
        let jackpot = self.jackpot_contribution.map(rounder).transpose()?;
        self.cash_amount = cash;
        self.bonus_amount = bonus;
        self.promo_amount = promo;
        self.jackpot_contribution = jackpot;
        Ok(())
    }

    /// Sum of the cash, bonus and promo amounts.
    pub fn total(&self) -> Result<Amount, AmountError> {
        self.cash_amount
            .checked_add(self.bonus_amount)?
            .checked_add(self.promo_amount)
    }
}

/// Outcome of a successfully booked transaction.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransactionResult {
    pub transaction_id: String,
    pub balance: Balance,
}

/// A game round as known by the PAM.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GameRound {
    pub provider_game_id: String,
    pub provider_round_id: String,
    pub start_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
}

/// How the PAM expects wagers to be settled.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SettlementType {
    /// Every bet and win is booked as it happens.
    #[default]
    PerTransaction,
    /// Transactions are settled together when the round closes.
    PerRound,
}

impl fmt::Display for SettlementType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::PerTransaction => write!(f, "per_transaction"),
            Self::PerRound => write!(f, "per_round"),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GetSessionRequest {
    pub provider: String,
    pub token: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RefreshSessionRequest {
    pub provider: String,
    pub token: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GetBalanceRequest {
    pub provider: String,
    pub player_id: String,
    pub token: String,
    pub currency: String,
    pub game_id: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GetTransactionsRequest {
    pub provider: String,
    pub player_id: String,
    pub token: String,
    pub provider_transaction_id: Option<String>,
    pub provider_bet_ref: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AddTransactionRequest {
    pub provider: String,
    pub token: String,
    pub transaction: Transaction,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GetGameRoundRequest {
    pub provider: String,
    pub player_id: String,
    pub token: String,
    pub game_id: String,
    pub provider_round_id: String,
}
