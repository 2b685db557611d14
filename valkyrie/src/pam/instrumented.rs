//! Pipeline wrapper for any [`PamClient`].

use super::{
    client::{AmountMapper, Mapper, PamClient, prevalidated, ready},
    models::{
        AddTransactionRequest, Balance, GameRound, GetBalanceRequest, GetGameRoundRequest,
        GetSessionRequest, GetTransactionsRequest, RefreshSessionRequest, Session, SettlementType,
        Transaction, TransactionResult,
    },
};
use crate::{
    amount::AmountRounder,
    error::{BoxError, ErrorCode, ValkyrieError, into_valkyrie},
    pipeline::{CallContext, CallInfo, Pipeline},
};
use async_trait::async_trait;
use std::{fmt, future::Future, sync::Arc};

/// PAM operation names.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum PamOperation {
    GetSession,
    RefreshSession,
    GetBalance,
    GetTransactions,
    AddTransaction,
    GetGameRound,
}

impl PamOperation {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::GetSession => "get_session",
            Self::RefreshSession => "refresh_session",
            Self::GetBalance => "get_balance",
            Self::GetTransactions => "get_transactions",
            Self::AddTransaction => "add_transaction",
            Self::GetGameRound => "get_game_round",
        }
    }
}

impl fmt::Display for PamOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Pipeline payload describing one PAM call.
#[derive(Clone, Debug)]
pub struct PamCall {
    pub backend: String,
    pub operation: PamOperation,
}

impl CallInfo for PamCall {
    fn kind(&self) -> &'static str {
        "pam"
    }

    fn operation(&self) -> &str {
        self.operation.as_str()
    }

    fn target(&self) -> &str {
        &self.backend
    }
}

/// Runs every operation of the wrapped client through a shared pipeline.
///
/// Requests are mapped before the pipeline starts, so mapping and precision
/// failures never reach the handlers. The backend is invoked from the
/// pipeline's finalizer.
pub struct PipelinedPamClient {
    inner: Arc<dyn PamClient>,
    pipeline: Arc<Pipeline<PamCall>>,
}

impl PipelinedPamClient {
    pub fn new(inner: Arc<dyn PamClient>, pipeline: Arc<Pipeline<PamCall>>) -> Self {
        Self { inner, pipeline }
    }

    pub fn pipeline(&self) -> &Arc<Pipeline<PamCall>> {
        &self.pipeline
    }

    async fn run<T, F, Fut>(&self, operation: PamOperation, ctx: CallContext, call: F) -> Result<T, ValkyrieError>
    where
        T: Send,
        F: FnOnce(CallContext) -> Fut + Send,
        Fut: Future<Output = Result<T, ValkyrieError>> + Send,
    {
        let payload = PamCall {
            backend: self.inner.name().to_string(),
            operation,
        };
        let mut slot = None;
        let out = &mut slot;
        let result = self
            .pipeline
            .execute(ctx, &payload, move |ctx| {
                Box::pin(async move {
                    match call(ctx).await {
                        Ok(value) => {
                            *out = Some(value);
                            Ok(())
                        }
                        Err(error) => Err(Box::new(error) as BoxError),
                    }
                })
            })
            .await;

        match (result, slot) {
            (Ok(()), Some(value)) => Ok(value),
            (Ok(()), None) => Err(ValkyrieError::new(
                ErrorCode::Internal,
                format!("pipeline completed {operation} without invoking the backend"),
            )),
            (Err(error), _) => Err(into_valkyrie(error)),
        }
    }
}

#[async_trait]
impl PamClient for PipelinedPamClient {
    fn name(&self) -> &str {
        self.inner.name()
    }

    fn amount_rounder(&self) -> AmountRounder {
        self.inner.amount_rounder()
    }

    fn settlement_type(&self) -> SettlementType {
        self.inner.settlement_type()
    }

    async fn get_session(&self, mapper: Mapper<'_, GetSessionRequest>) -> Result<Session, ValkyrieError> {
        let (ctx, request) = mapper()?;
        let inner = &self.inner;
        self.run(PamOperation::GetSession, ctx, move |ctx| async move {
            inner.get_session(ready(ctx, request)).await
        })
        .await
    }

    async fn refresh_session(
        &self,
        mapper: Mapper<'_, RefreshSessionRequest>,
    ) -> Result<Session, ValkyrieError> {
        let (ctx, request) = mapper()?;
        let inner = &self.inner;
        self.run(PamOperation::RefreshSession, ctx, move |ctx| async move {
            inner.refresh_session(ready(ctx, request)).await
        })
        .await
    }

    async fn get_balance(&self, mapper: Mapper<'_, GetBalanceRequest>) -> Result<Balance, ValkyrieError> {
        let (ctx, request) = mapper()?;
        let inner = &self.inner;
        self.run(PamOperation::GetBalance, ctx, move |ctx| async move {
            inner.get_balance(ready(ctx, request)).await
        })
        .await
    }

    async fn get_transactions(
        &self,
        mapper: Mapper<'_, GetTransactionsRequest>,
    ) -> Result<Vec<Transaction>, ValkyrieError> {
        let (ctx, request) = mapper()?;
        let inner = &self.inner;
        self.run(PamOperation::GetTransactions, ctx, move |ctx| async move {
            inner.get_transactions(ready(ctx, request)).await
        })
        .await
    }

    async fn add_transaction(
        &self,
        mapper: AmountMapper<'_, AddTransactionRequest>,
    ) -> Result<TransactionResult, ValkyrieError> {
        let (ctx, request) = mapper(self.inner.amount_rounder())?;
        let inner = &self.inner;
        self.run(PamOperation::AddTransaction, ctx, move |ctx| async move {
            inner.add_transaction(prevalidated(ctx, request)).await
        })
        .await
    }

    async fn get_game_round(
        &self,
        mapper: Mapper<'_, GetGameRoundRequest>,
    ) -> Result<GameRound, ValkyrieError> {
        let (ctx, request) = mapper()?;
        let inner = &self.inner;
        self.run(PamOperation::GetGameRound, ctx, move |ctx| async move {
            inner.get_game_round(ready(ctx, request)).await
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        amount::Amount,
        pam::{client::rounded, models::TransactionType},
        pipeline::{Handler, PipelineContext},
    };
    use chrono::Utc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct Fake {
        calls: AtomicUsize,
    }

    impl Fake {
        fn balance() -> Balance {
            Balance {
                cash: Amount::from(10),
                ..Balance::default()
            }
        }
    }

    #[async_trait]
    impl PamClient for Fake {
        fn name(&self) -> &str {
            "fake"
        }

        async fn get_session(&self, _: Mapper<'_, GetSessionRequest>) -> Result<Session, ValkyrieError> {
            Err(ValkyrieError::new(ErrorCode::UnsupportedOperation, "no sessions"))
        }

        async fn refresh_session(&self, _: Mapper<'_, RefreshSessionRequest>) -> Result<Session, ValkyrieError> {
            Err(ValkyrieError::new(ErrorCode::UnsupportedOperation, "no sessions"))
        }

        async fn get_balance(&self, mapper: Mapper<'_, GetBalanceRequest>) -> Result<Balance, ValkyrieError> {
            let (_, _) = mapper()?;
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(Self::balance())
        }

        async fn get_transactions(
            &self,
            _: Mapper<'_, GetTransactionsRequest>,
        ) -> Result<Vec<Transaction>, ValkyrieError> {
            Ok(Vec::new())
        }

        async fn add_transaction(
            &self,
            mapper: AmountMapper<'_, AddTransactionRequest>,
        ) -> Result<TransactionResult, ValkyrieError> {
            let (_, _) = mapper(self.amount_rounder())?;
            self.calls.fetch_add(1, Ordering::SeqCst);
            Err(ValkyrieError::new(ErrorCode::InsufficientCash, "low").with_balance(Self::balance()))
        }

        async fn get_game_round(&self, _: Mapper<'_, GetGameRoundRequest>) -> Result<GameRound, ValkyrieError> {
            Err(ValkyrieError::new(ErrorCode::GameRoundNotFound, "none"))
        }
    }

    struct Count(Arc<AtomicUsize>);

    #[async_trait]
    impl Handler<PamCall> for Count {
        async fn handle(&self, ctx: &mut PipelineContext<'_, PamCall>) -> Result<(), BoxError> {
            self.0.fetch_add(1, Ordering::SeqCst);
            ctx.next().await
        }
    }

    struct Swallow;

    #[async_trait]
    impl Handler<PamCall> for Swallow {
        async fn handle(&self, _: &mut PipelineContext<'_, PamCall>) -> Result<(), BoxError> {
            Ok(())
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

    fn add_request(cash: &str) -> AddTransactionRequest {
        AddTransactionRequest {
            provider: "netent".to_string(),
            token: "t1".to_string(),
            transaction: Transaction {
                provider_transaction_id: "tx-1".to_string(),
                player_id: "p1".to_string(),
                currency: "EUR".to_string(),
                transaction_type: TransactionType::Withdraw,
                cash_amount: cash.parse().unwrap(),
                bonus_amount: Amount::zero(),
                promo_amount: Amount::zero(),
                jackpot_contribution: None,
                game_id: None,
                game_round_ref: None,
                provider_bet_ref: None,
                is_game_over: false,
                transaction_datetime: Utc::now(),
            },
        }
    }

    fn wrapped(fake: Arc<Fake>) -> (PipelinedPamClient, Arc<AtomicUsize>) {
        let seen = Arc::new(AtomicUsize::new(0));
        let pipeline = Arc::new(Pipeline::new());
        pipeline.register(Count(seen.clone()));
        (PipelinedPamClient::new(fake, pipeline), seen)
    }

    #[tokio::test]
    async fn test_call_passes_through_pipeline() {
        let fake = Arc::new(Fake::default());
        let (client, seen) = wrapped(fake.clone());
        let balance = client
            .get_balance(ready(CallContext::new(), balance_request()))
            .await
            .unwrap();
        assert_eq!(balance, Fake::balance());
        assert_eq!(seen.load(Ordering::SeqCst), 1);
        assert_eq!(fake.calls.load(Ordering::SeqCst), 1);
        assert_eq!(client.name(), "fake");
    }

    #[tokio::test]
    async fn test_mapper_error_skips_pipeline() {
        let fake = Arc::new(Fake::default());
        let (client, seen) = wrapped(fake.clone());
        let err = client
            .get_balance(Box::new(|| Err(ValkyrieError::new(ErrorCode::BadRequest, "bad"))))
            .await
            .unwrap_err();
        assert_eq!(err.code(), ErrorCode::BadRequest);
        assert_eq!(seen.load(Ordering::SeqCst), 0);
        assert_eq!(fake.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_precision_error_skips_pipeline() {
        let fake = Arc::new(Fake::default());
        let (client, seen) = wrapped(fake.clone());
        let err = client
            .add_transaction(rounded(CallContext::new(), add_request("0.0000001")))
            .await
            .unwrap_err();
        assert_eq!(err.code(), ErrorCode::PrecisionLoss);
        assert_eq!(seen.load(Ordering::SeqCst), 0);
        assert_eq!(fake.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_backend_error_keeps_balance() {
        let fake = Arc::new(Fake::default());
        let (client, seen) = wrapped(fake.clone());
        let err = client
            .add_transaction(rounded(CallContext::new(), add_request("25")))
            .await
            .unwrap_err();
        assert_eq!(err.code(), ErrorCode::InsufficientCash);
        assert_eq!(err.balance(), Some(&Fake::balance()));
        assert_eq!(seen.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_short_circuit_is_internal_error() {
        let fake = Arc::new(Fake::default());
        let (client, _) = wrapped(fake.clone());
        client.pipeline().register(Swallow);
        let err = client
            .get_balance(ready(CallContext::new(), balance_request()))
            .await
            .unwrap_err();
        assert_eq!(err.code(), ErrorCode::Internal);
        assert_eq!(fake.calls.load(Ordering::SeqCst), 0);
    }
}
