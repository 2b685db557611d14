//! In-memory PAM served as a valkyrie plugin.
//!
//! Seeded with two demo players:
//!
//! | player | token | currency | cash | bonus |
//! |--------|-------|----------|------|-------|
//! | `p1`   | `t1`  | EUR      | 100  | 5     |
//! | `p2`   | `t2`  | SEK      | 0    | 0     |
//!
//! Withdrawals are checked against the balance, transaction ids are
//! deduplicated, and game rounds are derived from the transactions that
//! reference them. A cancel names the transaction it reverses through
//! `providerBetRef`.

use async_trait::async_trait;
use chrono::{Duration, Utc};
use std::{
    collections::HashMap,
    sync::{Mutex, MutexGuard, PoisonError},
};
use uuid::Uuid;
use valkyrie::{
    Amount, ErrorCode, ValkyrieError,
    pam::models::{
        AddTransactionRequest, Balance, GameRound, GetBalanceRequest, GetGameRoundRequest,
        GetSessionRequest, GetTransactionsRequest, RefreshSessionRequest, Session, SettlementType,
        Transaction, TransactionResult, TransactionType,
    },
    plugin::{PamPlugin, PluginInitConfig},
};

/// Advertise this protocol version instead of the real one.
pub const HANDSHAKE_VERSION_ENV: &str = "MOCK_PAM_HANDSHAKE_VERSION";

/// Reject `Init` when set to anything but `0` or `false`.
pub const FAIL_INIT_ENV: &str = "MOCK_PAM_FAIL_INIT";

const SESSION_TTL_MINUTES: i64 = 30;

#[derive(Clone, Debug)]
struct Player {
    id: String,
    currency: String,
    country: String,
    language: String,
    balance: Balance,
}

#[derive(Clone, Debug)]
struct Booked {
    transaction: Transaction,
    cancelled: bool,
}

#[derive(Debug, Default)]
struct State {
    initialized: bool,
    players: HashMap<String, Player>,
    /// Session token to player id.
    sessions: HashMap<String, String>,
    booked: Vec<Booked>,
    rounds: HashMap<(String, String), GameRound>,
}

impl State {
    fn seeded() -> Self {
        let mut state = Self::default();
        state.seed("p1", "t1", "EUR", "SE", "sv", 100, 5);
        state.seed("p2", "t2", "SEK", "SE", "sv", 0, 0);
        state
    }

    #[allow(clippy::too_many_arguments)]
    fn seed(&mut self, id: &str, token: &str, currency: &str, country: &str, language: &str, cash: i64, bonus: i64) {
        self.players.insert(
            id.to_string(),
            Player {
                id: id.to_string(),
                currency: currency.to_string(),
                country: country.to_string(),
                language: language.to_string(),
                balance: Balance {
                    cash: Amount::from(cash),
                    bonus: Amount::from(bonus),
                    promo: Amount::zero(),
                },
            },
        );
        self.sessions.insert(token.to_string(), id.to_string());
    }

    fn ensure_initialized(&self) -> Result<(), ValkyrieError> {
        if !self.initialized {
            return Err(ValkyrieError::new(ErrorCode::Internal, "mock PAM not initialized"));
        }
        Ok(())
    }

    fn session_player(&self, token: &str) -> Result<&Player, ValkyrieError> {
        self.ensure_initialized()?;
        let player_id = self
            .sessions
            .get(token)
            .ok_or_else(|| ValkyrieError::new(ErrorCode::SessionNotFound, format!("no session for token {token}")))?;
        self.players
            .get(player_id)
            .ok_or_else(|| ValkyrieError::new(ErrorCode::PlayerNotFound, player_id.clone()))
    }

    /// Resolve `token` and check it belongs to `player_id`.
    fn authorized_player(&self, token: &str, player_id: &str) -> Result<&Player, ValkyrieError> {
        let player = self.session_player(token)?;
        if player.id != player_id {
            return Err(ValkyrieError::new(
                ErrorCode::SessionInvalid,
                format!("token does not belong to player {player_id}"),
            ));
        }
        Ok(player)
    }
}

fn session_for(player: &Player, token: &str) -> Session {
    Session {
        player_id: player.id.clone(),
        currency: player.currency.clone(),
        country: player.country.clone(),
        language: player.language.clone(),
        game_id: None,
        token: token.to_string(),
        expires_at: Some(Utc::now() + Duration::minutes(SESSION_TTL_MINUTES)),
    }
}

fn currency_check(player: &Player, currency: &str) -> Result<(), ValkyrieError> {
    if player.currency != currency {
        return Err(ValkyrieError::new(
            ErrorCode::CurrencyMismatch,
            format!("player {} plays in {}, not {currency}", player.id, player.currency),
        ));
    }
    Ok(())
}

/// Take `amount` out of `available`, or fail with `code` and the balance.
fn debit(available: Amount, amount: Amount, code: ErrorCode, balance: &Balance) -> Result<Amount, ValkyrieError> {
    if amount > available {
        return Err(
            ValkyrieError::new(code, format!("requested {amount}, available {available}"))
                .with_balance(balance.clone()),
        );
    }
    Ok(available.checked_sub(amount)?)
}

/// Apply `transaction` to `balance` and return the new balance.
fn apply(balance: &Balance, transaction: &Transaction) -> Result<Balance, ValkyrieError> {
    let mut next = balance.clone();
    match transaction.transaction_type {
        TransactionType::Withdraw => {
            next.cash = debit(balance.cash, transaction.cash_amount, ErrorCode::InsufficientCash, balance)?;
            next.bonus = debit(balance.bonus, transaction.bonus_amount, ErrorCode::InsufficientBonus, balance)?;
        }
        TransactionType::PromoWithdraw => {
            next.promo = debit(balance.promo, transaction.promo_amount, ErrorCode::InsufficientPromo, balance)?;
        }
        TransactionType::Deposit => {
            next.cash = balance.cash.checked_add(transaction.cash_amount)?;
            next.bonus = balance.bonus.checked_add(transaction.bonus_amount)?;
        }
        TransactionType::PromoDeposit => {
            next.promo = balance.promo.checked_add(transaction.promo_amount)?;
        }
        TransactionType::Cancel | TransactionType::PromoCancel => {
            return Err(ValkyrieError::new(
                ErrorCode::InvalidTransactionType,
                "cancels are applied against the original transaction",
            ));
        }
    }
    Ok(next)
}

/// Balance after reversing `original`.
fn reverse(balance: &Balance, original: &Transaction) -> Result<Balance, ValkyrieError> {
    let mut next = balance.clone();
    match original.transaction_type {
        TransactionType::Withdraw => {
            next.cash = balance.cash.checked_add(original.cash_amount)?;
            next.bonus = balance.bonus.checked_add(original.bonus_amount)?;
        }
        TransactionType::PromoWithdraw => {
            next.promo = balance.promo.checked_add(original.promo_amount)?;
        }
        other => {
            return Err(ValkyrieError::new(
                ErrorCode::RollbackNotAllowed,
                format!("{other} transactions cannot be cancelled"),
            ));
        }
    }
    Ok(next)
}

/// The in-memory PAM.
#[derive(Debug)]
pub struct MockPam {
    state: Mutex<State>,
    fail_init: bool,
    settlement_type: SettlementType,
}

impl MockPam {
    /// A mock with the demo players seeded.
    pub fn new() -> Self {
        Self {
            state: Mutex::new(State::seeded()),
            fail_init: false,
            settlement_type: SettlementType::PerTransaction,
        }
    }

    /// Make `Init` fail with `Unauthorized`.
    pub fn fail_init(mut self, fail: bool) -> Self {
        self.fail_init = fail;
        self
    }

    pub fn with_settlement_type(mut self, settlement_type: SettlementType) -> Self {
        self.settlement_type = settlement_type;
        self
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn book(state: &mut State, request: AddTransactionRequest) -> Result<TransactionResult, ValkyrieError> {
        let transaction = request.transaction;
        let player = state
            .authorized_player(&request.token, &transaction.player_id)?
            .clone();
        currency_check(&player, &transaction.currency)?;

        if transaction.cash_amount.is_negative()
            || transaction.bonus_amount.is_negative()
            || transaction.promo_amount.is_negative()
        {
            return Err(ValkyrieError::new(ErrorCode::InvalidAmount, "amounts must not be negative"));
        }
        if state
            .booked
            .iter()
            .any(|b| b.transaction.provider_transaction_id == transaction.provider_transaction_id)
        {
            return Err(ValkyrieError::new(
                ErrorCode::DuplicateTransaction,
                format!("transaction {} already booked", transaction.provider_transaction_id),
            )
            .with_balance(player.balance.clone()));
        }

        let round_key = transaction
            .game_id
            .clone()
            .zip(transaction.game_round_ref.clone());
        if let Some(key) = &round_key {
            let closed = state.rounds.get(key).is_some_and(|round| round.end_time.is_some());
            if closed && transaction.transaction_type.is_debit() {
                return Err(ValkyrieError::new(
                    ErrorCode::GameRoundClosed,
                    format!("round {} is closed", key.1),
                ));
            }
        }

        let balance = match transaction.transaction_type {
            TransactionType::Cancel | TransactionType::PromoCancel => {
                let reference = transaction.provider_bet_ref.as_deref().ok_or_else(|| {
                    ValkyrieError::new(ErrorCode::BadRequest, "cancel without providerBetRef")
                })?;
                let original = state
                    .booked
                    .iter_mut()
                    .find(|b| {
                        b.transaction.provider_transaction_id == reference
                            && b.transaction.player_id == player.id
                    })
                    .ok_or_else(|| {
                        ValkyrieError::new(ErrorCode::TransactionNotFound, format!("no transaction {reference}"))
                    })?;
                if original.cancelled {
                    return Err(ValkyrieError::new(
                        ErrorCode::TransactionRolledBack,
                        format!("transaction {reference} already cancelled"),
                    ));
                }
                let balance = reverse(&player.balance, &original.transaction)?;
                original.cancelled = true;
                balance
            }
            _ => apply(&player.balance, &transaction)?,
        };

        if let Some((game_id, round_id)) = round_key {
            let round = state
                .rounds
                .entry((game_id.clone(), round_id.clone()))
                .or_insert_with(|| GameRound {
                    provider_game_id: game_id,
                    provider_round_id: round_id,
                    start_time: transaction.transaction_datetime,
                    end_time: None,
                });
            if transaction.is_game_over {
                round.end_time = Some(transaction.transaction_datetime);
            }
        }

        if let Some(stored) = state.players.get_mut(&player.id) {
            stored.balance = balance.clone();
        }
        let result = TransactionResult {
            transaction_id: Uuid::new_v4().to_string(),
            balance,
        };
        tracing::info!(
            player = %player.id,
            transaction = %transaction.provider_transaction_id,
            kind = %transaction.transaction_type,
            "transaction booked"
        );
        state.booked.push(Booked {
            transaction,
            cancelled: false,
        });
        Ok(result)
    }
}

impl Default for MockPam {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl PamPlugin for MockPam {
    async fn init(&self, config: PluginInitConfig) -> Result<(), ValkyrieError> {
        if self.fail_init {
            tracing::warn!("rejecting init as configured");
            return Err(ValkyrieError::new(ErrorCode::Unauthorized, "init rejected by mock PAM"));
        }
        if config.api_key.is_empty() {
            return Err(ValkyrieError::new(ErrorCode::Unauthorized, "api key is required"));
        }
        tracing::info!(
            pam_url = %config.pam_url,
            warehouse = config.warehouse.is_some(),
            "mock PAM initialized"
        );
        self.state().initialized = true;
        Ok(())
    }

    fn settlement_type(&self) -> SettlementType {
        self.settlement_type
    }

    async fn get_session(&self, request: GetSessionRequest) -> Result<Session, ValkyrieError> {
        let state = self.state();
        let player = state.session_player(&request.token)?;
        Ok(session_for(player, &request.token))
    }

    async fn refresh_session(&self, request: RefreshSessionRequest) -> Result<Session, ValkyrieError> {
        let mut state = self.state();
        let player = state.session_player(&request.token)?.clone();
        let token = Uuid::new_v4().to_string();
        state.sessions.remove(&request.token);
        state.sessions.insert(token.clone(), player.id.clone());
        Ok(session_for(&player, &token))
    }

    async fn get_balance(&self, request: GetBalanceRequest) -> Result<Balance, ValkyrieError> {
        let state = self.state();
        let player = state.authorized_player(&request.token, &request.player_id)?;
        currency_check(player, &request.currency)?;
        Ok(player.balance.clone())
    }

    async fn get_transactions(
        &self,
        request: GetTransactionsRequest,
    ) -> Result<Vec<Transaction>, ValkyrieError> {
        let state = self.state();
        state.authorized_player(&request.token, &request.player_id)?;
        Ok(state
            .booked
            .iter()
            .map(|b| &b.transaction)
            .filter(|t| t.player_id == request.player_id)
            .filter(|t| {
                request
                    .provider_transaction_id
                    .as_ref()
                    .is_none_or(|id| *id == t.provider_transaction_id)
            })
            .filter(|t| {
                request
                    .provider_bet_ref
                    .as_ref()
                    .is_none_or(|bet| Some(bet) == t.provider_bet_ref.as_ref())
            })
            .cloned()
            .collect())
    }

    async fn add_transaction(
        &self,
        request: AddTransactionRequest,
    ) -> Result<TransactionResult, ValkyrieError> {
        let mut state = self.state();
        state.ensure_initialized()?;
        Self::book(&mut state, request)
    }

    async fn get_game_round(&self, request: GetGameRoundRequest) -> Result<GameRound, ValkyrieError> {
        let state = self.state();
        state.authorized_player(&request.token, &request.player_id)?;
        state
            .rounds
            .get(&(request.game_id.clone(), request.provider_round_id.clone()))
            .cloned()
            .ok_or_else(|| {
                ValkyrieError::new(
                    ErrorCode::GameRoundNotFound,
                    format!("no round {} for game {}", request.provider_round_id, request.game_id),
                )
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn ready() -> MockPam {
        let pam = MockPam::new();
        pam.init(PluginInitConfig {
            pam_url: "mock://".to_string(),
            api_key: "key".to_string(),
            warehouse: None,
        })
        .await
        .unwrap();
        pam
    }

    fn transaction(id: &str, kind: TransactionType, cash: i64) -> AddTransactionRequest {
        AddTransactionRequest {
            provider: "netent".to_string(),
            token: "t1".to_string(),
            transaction: Transaction {
                provider_transaction_id: id.to_string(),
                player_id: "p1".to_string(),
                currency: "EUR".to_string(),
                transaction_type: kind,
                cash_amount: Amount::from(cash),
                bonus_amount: Amount::zero(),
                promo_amount: Amount::zero(),
                jackpot_contribution: None,
                game_id: Some("starburst".to_string()),
                game_round_ref: Some("r-1".to_string()),
                provider_bet_ref: None,
                is_game_over: false,
                transaction_datetime: Utc::now(),
            },
        }
    }

    fn balance_request() -> GetBalanceRequest {
        GetBalanceRequest {
            provider: "netent".to_string(),
            player_id: "p1".to_string(),
            token: "t1".to_string(),
            currency: "EUR".to_string(),
            game_id: None,
        }
    }

    #[tokio::test]
    async fn test_calls_before_init_fail() {
        let pam = MockPam::new();
        let error = pam.get_balance(balance_request()).await.unwrap_err();
        assert_eq!(error.code(), ErrorCode::Internal);
    }

    #[tokio::test]
    async fn test_fail_init_hook() {
        let pam = MockPam::new().fail_init(true);
        let config = PluginInitConfig {
            pam_url: "mock://".to_string(),
            api_key: "key".to_string(),
            warehouse: None,
        };
        assert_eq!(pam.init(config).await.unwrap_err().code(), ErrorCode::Unauthorized);
    }

    #[tokio::test]
    async fn test_withdraw_and_deposit_move_cash() {
        let pam = ready().await;
        let bet = pam.add_transaction(transaction("b1", TransactionType::Withdraw, 30)).await.unwrap();
        assert_eq!(bet.balance.cash, Amount::from(70));
        let win = pam.add_transaction(transaction("w1", TransactionType::Deposit, 50)).await.unwrap();
        assert_eq!(win.balance.cash, Amount::from(120));
        assert_eq!(pam.get_balance(balance_request()).await.unwrap().cash, Amount::from(120));
    }

    #[tokio::test]
    async fn test_insufficient_cash_reports_balance() {
        let pam = ready().await;
        let error = pam
            .add_transaction(transaction("b1", TransactionType::Withdraw, 500))
            .await
            .unwrap_err();
        assert_eq!(error.code(), ErrorCode::InsufficientCash);
        assert_eq!(error.balance().unwrap().cash, Amount::from(100));
    }

    #[tokio::test]
    async fn test_duplicate_transaction_is_rejected() {
        let pam = ready().await;
        pam.add_transaction(transaction("b1", TransactionType::Withdraw, 10)).await.unwrap();
        let error = pam
            .add_transaction(transaction("b1", TransactionType::Withdraw, 10))
            .await
            .unwrap_err();
        assert_eq!(error.code(), ErrorCode::DuplicateTransaction);
        assert_eq!(error.balance().unwrap().cash, Amount::from(90));
    }

    #[tokio::test]
    async fn test_cancel_refunds_once() {
        let pam = ready().await;
        pam.add_transaction(transaction("b1", TransactionType::Withdraw, 10)).await.unwrap();

        let mut cancel = transaction("c1", TransactionType::Cancel, 0);
        cancel.transaction.provider_bet_ref = Some("b1".to_string());
        let refunded = pam.add_transaction(cancel.clone()).await.unwrap();
        assert_eq!(refunded.balance.cash, Amount::from(100));

        cancel.transaction.provider_transaction_id = "c2".to_string();
        let error = pam.add_transaction(cancel).await.unwrap_err();
        assert_eq!(error.code(), ErrorCode::TransactionRolledBack);
    }

    #[tokio::test]
    async fn test_cancel_cannot_reach_another_players_bet() {
        let pam = ready().await;
        pam.add_transaction(transaction("b1", TransactionType::Withdraw, 10)).await.unwrap();

        let mut foreign = transaction("c1", TransactionType::Cancel, 0);
        foreign.token = "t2".to_string();
        foreign.transaction.player_id = "p2".to_string();
        foreign.transaction.currency = "SEK".to_string();
        foreign.transaction.provider_bet_ref = Some("b1".to_string());
        let error = pam.add_transaction(foreign).await.unwrap_err();
        assert_eq!(error.code(), ErrorCode::TransactionNotFound);
        assert_eq!(pam.get_balance(balance_request()).await.unwrap().cash, Amount::from(90));

        let mut own = transaction("c2", TransactionType::Cancel, 0);
        own.transaction.provider_bet_ref = Some("b1".to_string());
        let refunded = pam.add_transaction(own).await.unwrap();
        assert_eq!(refunded.balance.cash, Amount::from(100));
    }

    #[tokio::test]
    async fn test_rounds_follow_transactions() {
        let pam = ready().await;
        pam.add_transaction(transaction("b1", TransactionType::Withdraw, 10)).await.unwrap();
        let mut win = transaction("w1", TransactionType::Deposit, 20);
        win.transaction.is_game_over = true;
        pam.add_transaction(win).await.unwrap();

        let round = pam
            .get_game_round(GetGameRoundRequest {
                provider: "netent".to_string(),
                player_id: "p1".to_string(),
                token: "t1".to_string(),
                game_id: "starburst".to_string(),
                provider_round_id: "r-1".to_string(),
            })
            .await
            .unwrap();
        assert!(round.end_time.is_some());

        let error = pam
            .add_transaction(transaction("b2", TransactionType::Withdraw, 1))
            .await
            .unwrap_err();
        assert_eq!(error.code(), ErrorCode::GameRoundClosed);
    }

    #[tokio::test]
    async fn test_foreign_token_is_rejected() {
        let pam = ready().await;
        let mut request = balance_request();
        request.token = "t2".to_string();
        let error = pam.get_balance(request).await.unwrap_err();
        assert_eq!(error.code(), ErrorCode::SessionInvalid);
    }

    #[tokio::test]
    async fn test_refresh_rotates_token() {
        let pam = ready().await;
        let session = pam
            .refresh_session(RefreshSessionRequest {
                provider: "netent".to_string(),
                token: "t1".to_string(),
            })
            .await
            .unwrap();
        assert_ne!(session.token, "t1");
        let old = pam
            .get_session(GetSessionRequest {
                provider: "netent".to_string(),
                token: "t1".to_string(),
            })
            .await
            .unwrap_err();
        assert_eq!(old.code(), ErrorCode::SessionNotFound);
    }
}
