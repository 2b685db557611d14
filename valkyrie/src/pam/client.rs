//! The capability set every PAM backend implements.

use super::models::{
    AddTransactionRequest, Balance, GameRound, GetBalanceRequest, GetGameRoundRequest,
    GetSessionRequest, GetTransactionsRequest, RefreshSessionRequest, Session, SettlementType,
    Transaction, TransactionResult,
};
use crate::{
    amount::{AmountRounder, round_amount},
    error::ValkyrieError,
    pipeline::CallContext,
};
use async_trait::async_trait;

/// Output of a request mapper: the context to run the call with and the
/// request itself.
pub type MapResult<Req> = Result<(CallContext, Req), ValkyrieError>;

/// Deferred request construction.
///
/// Backends invoke the mapper before doing any I/O, so validation failures
/// surface the same way whichever backend is configured.
pub type Mapper<'a, Req> = Box<dyn FnOnce() -> MapResult<Req> + Send + 'a>;

/// Request mapper for operations that move money. It receives the
/// backend's rounder and must run every amount through it.
pub type AmountMapper<'a, Req> = Box<dyn FnOnce(AmountRounder) -> MapResult<Req> + Send + 'a>;

/// Player Account Management client.
///
/// Implementations must keep no per-request state in `self`: one instance
/// is shared by every concurrent call.
#[async_trait]
pub trait PamClient: Send + Sync {
    /// Name of the backend, used in logs and metric labels.
    fn name(&self) -> &str;

    /// Rounder handed to [`AmountMapper`]s.
    fn amount_rounder(&self) -> AmountRounder {
        round_amount
    }

    /// How the backend expects wagers to be settled.
    fn settlement_type(&self) -> SettlementType {
        SettlementType::PerTransaction
    }

    async fn get_session(&self, mapper: Mapper<'_, GetSessionRequest>) -> Result<Session, ValkyrieError>;

    async fn refresh_session(
        &self,
        mapper: Mapper<'_, RefreshSessionRequest>,
    ) -> Result<Session, ValkyrieError>;

    async fn get_balance(&self, mapper: Mapper<'_, GetBalanceRequest>) -> Result<Balance, ValkyrieError>;

    async fn get_transactions(
        &self,
        mapper: Mapper<'_, GetTransactionsRequest>,
    ) -> Result<Vec<Transaction>, ValkyrieError>;

    /// Book a transaction. On failure the error may carry the balance the
    /// PAM reported with it.
    async fn add_transaction(
        &self,
        mapper: AmountMapper<'_, AddTransactionRequest>,
    ) -> Result<TransactionResult, ValkyrieError>;

    async fn get_game_round(
        &self,
        mapper: Mapper<'_, GetGameRoundRequest>,
    ) -> Result<GameRound, ValkyrieError>;
}

/// Mapper for a request that is already built.
pub fn ready<'a, Req: Send + 'a>(ctx: CallContext, request: Req) -> Mapper<'a, Req> {
    Box::new(move || Ok((ctx, request)))
}

/// Mapper that rounds every amount of the transaction with the backend's
/// rounder, failing with a precision error before any I/O.
pub fn rounded<'a>(ctx: CallContext, mut request: AddTransactionRequest) -> AmountMapper<'a, AddTransactionRequest> {
    Box::new(move |rounder| {
        request.transaction.round_amounts(rounder)?;
        Ok((ctx, request))
    })
}

/// Mapper for a transaction whose amounts were already validated.
pub fn prevalidated<'a>(ctx: CallContext, request: AddTransactionRequest) -> AmountMapper<'a, AddTransactionRequest> {
    Box::new(move |_| Ok((ctx, request)))
}
