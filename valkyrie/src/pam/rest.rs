//! In-process backend for PAMs exposing the generic REST wallet API.
//!
//! Every HTTP exchange runs through a [`Pipeline<HttpCall>`], so tracing and
//! metrics handlers see raw requests without this module knowing about them.

use super::{
    client::{AmountMapper, Mapper, PamClient},
    errors::PamError,
    models::{
        AddTransactionRequest, Balance, GameRound, GetBalanceRequest, GetGameRoundRequest,
        GetSessionRequest, GetTransactionsRequest, RefreshSessionRequest, Session, Transaction,
        TransactionResult,
    },
    registry::{BackendArgs, PamRegistry},
};
use crate::{
    error::{BoxError, ErrorCode, ValkyrieError, handle_error, into_valkyrie},
    pipeline::{CallContext, CallInfo, Pipeline},
};
use async_trait::async_trait;
use reqwest::{Method, StatusCode, Url};
use serde::{Serialize, de::DeserializeOwned};
use std::sync::Arc;
use thiserror::Error;

/// Registry key of the REST backend.
pub const BACKEND_KEY: &str = "generic";

/// Header carrying the player's session token.
pub const PLAYER_TOKEN_HEADER: &str = "X-Player-Token";

/// Pipeline payload describing one HTTP exchange.
#[derive(Clone, Debug)]
pub struct HttpCall {
    /// Method and route template, e.g. `GET /players/{playerId}/balance`.
    pub endpoint: String,
    pub host: String,
}

impl CallInfo for HttpCall {
    fn kind(&self) -> &'static str {
        "http"
    }

    fn operation(&self) -> &str {
        &self.endpoint
    }

    fn target(&self) -> &str {
        &self.host
    }
}

/// Errors raised while constructing a [`RestPamClient`].
#[derive(Debug, Error)]
pub enum RestSetupError {
    #[error("invalid PAM url '{url}': {reason}")]
    InvalidUrl { url: String, reason: String },

    #[error("failed to build HTTP client: {0}")]
    Client(#[from] reqwest::Error),
}

/// Generic REST PAM backend.
pub struct RestPamClient {
    base_url: Url,
    host: String,
    api_key: String,
    http: reqwest::Client,
    pipeline: Arc<Pipeline<HttpCall>>,
}

impl RestPamClient {
    /// Create a client for the PAM at `args.pam_url`.
    ///
    /// # Errors
    ///
    /// Fails if the url cannot serve as a base for the API paths or the HTTP
    /// client cannot be built.
    pub fn new(args: &BackendArgs) -> Result<Self, RestSetupError> {
        let invalid = |reason: String| RestSetupError::InvalidUrl {
            url: args.pam_url.clone(),
            reason,
        };
        let base_url = Url::parse(&args.pam_url).map_err(|e| invalid(e.to_string()))?;
        if base_url.cannot_be_a_base() {
            return Err(invalid("not a base url".to_string()));
        }
        let host = base_url.host_str().unwrap_or_default().to_string();
        let http = reqwest::Client::builder().timeout(args.call_timeout).build()?;

        Ok(Self {
            base_url,
            host,
            api_key: args.api_key.clone(),
            http,
            pipeline: args.http_pipeline.clone(),
        })
    }

    fn url(&self, segments: &[&str]) -> Url {
        let mut url = self.base_url.clone();
        if let Ok(mut path) = url.path_segments_mut() {
            path.pop_if_empty().extend(segments);
        }
        url
    }

    async fn exchange<T, B>(
        &self,
        ctx: CallContext,
        method: Method,
        route: &'static str,
        segments: &[&str],
        query: Vec<(&'static str, String)>,
        token: &str,
        body: Option<&B>,
    ) -> Result<T, ValkyrieError>
    where
        T: DeserializeOwned + Send,
        B: Serialize + Sync,
    {
        let url = self.url(segments);
        let call = HttpCall {
            endpoint: format!("{method} {route}"),
            host: self.host.clone(),
        };
        let mut slot = None;
        let out = &mut slot;
        let result = self
            .pipeline
            .execute(ctx, &call, move |ctx| {
                Box::pin(async move {
                    let cancel = ctx.cancellation().clone();
                    let response = tokio::select! {
                        biased;
                        _ = cancel.cancelled() => Err(cancelled()),
                        response = self.send::<T, B>(method, url, &query, token, body) => response,
                    };
                    match response {
                        Ok(value) => {
                            *out = Some(value);
                            Ok(())
                        }
                        Err(error) => Err(error),
                    }
                })
            })
            .await;

        match (result, slot) {
            (Ok(()), Some(value)) => Ok(value),
            (Ok(()), None) => Err(ValkyrieError::new(
                ErrorCode::Internal,
                format!("HTTP pipeline completed {} without sending the request", call.endpoint),
            )),
            (Err(error), _) => Err(into_valkyrie(error)),
        }
    }

    async fn send<T, B>(
        &self,
        method: Method,
        url: Url,
        query: &[(&'static str, String)],
        token: &str,
        body: Option<&B>,
    ) -> Result<T, BoxError>
    where
        T: DeserializeOwned,
        B: Serialize,
    {
        let mut request = self
            .http
            .request(method, url)
            .bearer_auth(&self.api_key)
            .header(PLAYER_TOKEN_HEADER, token)
            .query(query);
        if let Some(body) = body {
            request = request.json(body);
        }

        let response = request.send().await.map_err(transport_error)?;
        let status = response.status();
        if status.is_success() {
            return response.json::<T>().await.map_err(transport_error);
        }

        let bytes = response.bytes().await.map_err(transport_error)?;
        match serde_json::from_slice::<PamError>(&bytes) {
            Ok(pam_error) => {
                let proposed = pam_error.to_valkyrie(BACKEND_KEY);
                Err(handle_error(Box::new(pam_error), proposed))
            }
            Err(_) => Err(Box::new(ValkyrieError::new(
                status_code(status),
                format!("PAM responded with {status}"),
            ))),
        }
    }
}

fn cancelled() -> BoxError {
    Box::new(ValkyrieError::new(ErrorCode::Cancelled, "PAM call cancelled"))
}

fn transport_error(error: reqwest::Error) -> BoxError {
    let proposed = if error.is_timeout() {
        ValkyrieError::new(ErrorCode::Timeout, "PAM call timed out")
    } else if error.is_decode() {
        ValkyrieError::new(ErrorCode::Undefined, "PAM response could not be decoded")
    } else {
        ValkyrieError::new(ErrorCode::Undefined, "PAM transport failure")
    };
    handle_error(Box::new(error), proposed)
}

/// Code for error responses without a PAM error body.
fn status_code(status: StatusCode) -> ErrorCode {
    match status {
        StatusCode::BAD_REQUEST => ErrorCode::BadRequest,
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => ErrorCode::Unauthorized,
        StatusCode::REQUEST_TIMEOUT | StatusCode::GATEWAY_TIMEOUT => ErrorCode::Timeout,
        StatusCode::TOO_MANY_REQUESTS => ErrorCode::RateLimited,
        _ => ErrorCode::Undefined,
    }
}

/// Query pairs with absent values dropped.
fn params<const N: usize>(pairs: [(&'static str, Option<&str>); N]) -> Vec<(&'static str, String)> {
    pairs
        .into_iter()
        .filter_map(|(key, value)| value.map(|value| (key, value.to_string())))
        .collect()
}

#[async_trait]
impl PamClient for RestPamClient {
    fn name(&self) -> &str {
        BACKEND_KEY
    }

    async fn get_session(&self, mapper: Mapper<'_, GetSessionRequest>) -> Result<Session, ValkyrieError> {
        let (ctx, request) = mapper()?;
        self.exchange(
            ctx,
            Method::GET,
            "/players/session",
            &["players", "session"],
            params([("provider", Some(request.provider.as_str()))]),
            &request.token,
            None::<&()>,
        )
        .await
    }

    async fn refresh_session(
        &self,
        mapper: Mapper<'_, RefreshSessionRequest>,
    ) -> Result<Session, ValkyrieError> {
        let (ctx, request) = mapper()?;
        self.exchange(
            ctx,
            Method::PUT,
            "/players/session",
            &["players", "session"],
            params([("provider", Some(request.provider.as_str()))]),
            &request.token,
            None::<&()>,
        )
        .await
    }

    async fn get_balance(&self, mapper: Mapper<'_, GetBalanceRequest>) -> Result<Balance, ValkyrieError> {
        let (ctx, request) = mapper()?;
        self.exchange(
            ctx,
            Method::GET,
            "/players/{playerId}/balance",
            &["players", request.player_id.as_str(), "balance"],
            params([
                ("provider", Some(request.provider.as_str())),
                ("currency", Some(request.currency.as_str())),
                ("gameId", request.game_id.as_deref()),
            ]),
            &request.token,
            None::<&()>,
        )
        .await
    }

    async fn get_transactions(
        &self,
        mapper: Mapper<'_, GetTransactionsRequest>,
    ) -> Result<Vec<Transaction>, ValkyrieError> {
        let (ctx, request) = mapper()?;
        self.exchange(
            ctx,
            Method::GET,
            "/players/{playerId}/transactions",
            &["players", request.player_id.as_str(), "transactions"],
            params([
                ("provider", Some(request.provider.as_str())),
                ("providerTransactionId", request.provider_transaction_id.as_deref()),
                ("providerBetRef", request.provider_bet_ref.as_deref()),
            ]),
            &request.token,
            None::<&()>,
        )
        .await
    }

    async fn add_transaction(
        &self,
        mapper: AmountMapper<'_, AddTransactionRequest>,
    ) -> Result<TransactionResult, ValkyrieError> {
        let (ctx, request) = mapper(self.amount_rounder())?;
        self.exchange(
            ctx,
            Method::POST,
            "/players/{playerId}/transactions",
            &["players", request.transaction.player_id.as_str(), "transactions"],
            params([("provider", Some(request.provider.as_str()))]),
            &request.token,
            Some(&request.transaction),
        )
        .await
    }

    async fn get_game_round(
        &self,
        mapper: Mapper<'_, GetGameRoundRequest>,
    ) -> Result<GameRound, ValkyrieError> {
        let (ctx, request) = mapper()?;
        self.exchange(
            ctx,
            Method::GET,
            "/players/{playerId}/gamerounds/{providerRoundId}",
            &["players", request.player_id.as_str(), "gamerounds", request.provider_round_id.as_str()],
            params([
                ("provider", Some(request.provider.as_str())),
                ("gameId", Some(request.game_id.as_str())),
            ]),
            &request.token,
            None::<&()>,
        )
        .await
    }
}

/// Register the REST backend under [`BACKEND_KEY`].
pub fn register(registry: &PamRegistry) {
    registry.register(BACKEND_KEY, |args| {
        let built = RestPamClient::new(&args)
            .map(|client| Arc::new(client) as Arc<dyn PamClient>)
            .map_err(BoxError::from);
        Box::pin(async move { built })
    });
}
