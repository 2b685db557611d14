//! Plugin-side half of the protocol.
//!
//! A plugin executable implements [`PamPlugin`] and hands it to
//! [`PluginServer::serve_stdio`]. Logs must go to stderr: stdout carries
//! frames.

use super::{
    codec,
    errors::PluginError,
    messages::{PluginInitConfig, PluginReply, PluginRequest, RequestFrame, ResponseFrame, WireError},
    protocol_version::{Handshake, MAGIC_COOKIE_KEY, MAGIC_COOKIE_VALUE, PROTOCOL_VERSION},
};
use crate::{
    error::{BoxError, ErrorCode, ValkyrieError},
    pam::models::{
        AddTransactionRequest, Balance, GameRound, GetBalanceRequest, GetGameRoundRequest,
        GetSessionRequest, GetTransactionsRequest, RefreshSessionRequest, Session, SettlementType,
        Transaction, TransactionResult,
    },
};
use async_trait::async_trait;
use std::{env, io};
use tokio::io::{AsyncRead, AsyncWrite};
use tracing_subscriber::EnvFilter;

/// A PAM backend living in its own process.
///
/// Requests arrive fully built and already rounded by the host.
#[async_trait]
pub trait PamPlugin: Send + Sync {
    /// Called once, before any other request.
    async fn init(&self, config: PluginInitConfig) -> Result<(), ValkyrieError>;

    fn settlement_type(&self) -> SettlementType {
        SettlementType::PerTransaction
    }

    async fn get_session(&self, request: GetSessionRequest) -> Result<Session, ValkyrieError>;

    async fn refresh_session(&self, request: RefreshSessionRequest) -> Result<Session, ValkyrieError>;

    async fn get_balance(&self, request: GetBalanceRequest) -> Result<Balance, ValkyrieError>;

    async fn get_transactions(
        &self,
        request: GetTransactionsRequest,
    ) -> Result<Vec<Transaction>, ValkyrieError>;

    async fn add_transaction(
        &self,
        request: AddTransactionRequest,
    ) -> Result<TransactionResult, ValkyrieError>;

    async fn get_game_round(&self, request: GetGameRoundRequest) -> Result<GameRound, ValkyrieError>;
}

/// Route one request to the matching plugin method.
pub async fn dispatch<P>(plugin: &P, request: PluginRequest) -> Result<PluginReply, ValkyrieError>
where
    P: PamPlugin + ?Sized,
{
    match request {
        PluginRequest::Init(config) => plugin.init(config).await.map(|()| PluginReply::Initialized),
        PluginRequest::GetSession(request) => plugin.get_session(request).await.map(PluginReply::Session),
        PluginRequest::RefreshSession(request) => {
            plugin.refresh_session(request).await.map(PluginReply::Session)
        }
        PluginRequest::GetBalance(request) => plugin.get_balance(request).await.map(PluginReply::Balance),
        PluginRequest::GetTransactions(request) => plugin
            .get_transactions(request)
            .await
            .map(PluginReply::Transactions),
        PluginRequest::AddTransaction(request) => plugin
            .add_transaction(request)
            .await
            .map(PluginReply::TransactionResult),
        PluginRequest::GetGameRound(request) => {
            plugin.get_game_round(request).await.map(PluginReply::GameRound)
        }
        PluginRequest::GetSettlementType => Ok(PluginReply::SettlementType(plugin.settlement_type())),
    }
}

/// Answer requests until the host closes the request pipe.
///
/// Requests are handled one at a time, in order. A reply that cannot be
/// encoded (an amount with too many decimals, say) is answered with an
/// `Internal` error so the host is never left waiting.
pub async fn serve<P, R, W>(plugin: &P, mut reader: R, mut writer: W) -> io::Result<()>
where
    P: PamPlugin + ?Sized,
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    while let Some(RequestFrame { id, request }) = codec::try_read_frame(&mut reader).await? {
        let operation = request.operation();
        let result = dispatch(plugin, request).await;
        if let Err(error) = &result {
            tracing::debug!(id, operation, %error, "request failed");
        }

        let response = ResponseFrame::from_result(id, result);
        let body = match codec::encode(&response) {
            Ok(body) => body,
            Err(error) => {
                tracing::error!(id, operation, %error, "failed to encode reply");
                let fallback = ResponseFrame::failure(
                    id,
                    WireError::new(ErrorCode::Internal, format!("plugin reply could not be encoded: {error}")),
                );
                codec::encode(&fallback).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?
            }
        };
        codec::write_encoded(&mut writer, &body).await?;
    }
    tracing::debug!("host closed the request pipe");
    Ok(())
}

/// Entry point of a plugin executable.
pub struct PluginServer<P> {
    plugin: P,
    protocol_version: u32,
}

impl<P: PamPlugin> PluginServer<P> {
    pub fn new(plugin: P) -> Self {
        Self {
            plugin,
            protocol_version: PROTOCOL_VERSION,
        }
    }

    /// Advertise a different protocol version in the handshake. Only
    /// useful to exercise the host's version check.
    pub fn protocol_version(mut self, version: u32) -> Self {
        self.protocol_version = version;
        self
    }

    /// Fail unless the magic cookie set by the host is present.
    pub fn check_launched_by_host() -> Result<(), PluginError> {
        match env::var(MAGIC_COOKIE_KEY) {
            Ok(cookie) if cookie == MAGIC_COOKIE_VALUE => Ok(()),
            _ => Err(PluginError::NotLaunchedByHost),
        }
    }

    /// Write the handshake, then serve requests from `reader`.
    pub async fn serve_io<R, W>(self, reader: R, mut writer: W) -> Result<(), PluginError>
    where
        R: AsyncRead + Unpin,
        W: AsyncWrite + Unpin,
    {
        codec::write_frame(&mut writer, &Handshake::with_version(self.protocol_version)).await?;
        serve(&self.plugin, reader, writer).await?;
        Ok(())
    }

    /// Serve over the process's stdin and stdout.
    ///
    /// # Errors
    ///
    /// [`PluginError::NotLaunchedByHost`] when started by hand; I/O errors
    /// on the pipes otherwise.
    pub async fn serve_stdio(self) -> Result<(), PluginError> {
        Self::check_launched_by_host()?;
        tracing::info!(protocol_version = self.protocol_version, "plugin serving");
        self.serve_io(tokio::io::stdin(), tokio::io::stdout()).await
    }
}

/// JSON logs on stderr, the format the host's log bridge reads.
pub fn init_plugin_logging() -> Result<(), BoxError> {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .json()
        .with_env_filter(env_filter)
        .with_writer(io::stderr)
        .try_init()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::amount::Amount;
    use tokio::io::duplex;

    struct Echo;

    #[async_trait]
    impl PamPlugin for Echo {
        async fn init(&self, config: PluginInitConfig) -> Result<(), ValkyrieError> {
            if config.api_key.is_empty() {
                return Err(ValkyrieError::new(ErrorCode::Unauthorized, "missing api key"));
            }
            Ok(())
        }

        fn settlement_type(&self) -> SettlementType {
            SettlementType::PerRound
        }

        async fn get_session(&self, request: GetSessionRequest) -> Result<Session, ValkyrieError> {
            Err(ValkyrieError::new(ErrorCode::SessionNotFound, request.token))
        }

        async fn refresh_session(&self, request: RefreshSessionRequest) -> Result<Session, ValkyrieError> {
            Err(ValkyrieError::new(ErrorCode::SessionNotFound, request.token))
        }

        async fn get_balance(&self, _request: GetBalanceRequest) -> Result<Balance, ValkyrieError> {
            Ok(Balance {
                cash: Amount::from(10),
                ..Balance::default()
            })
        }

        async fn get_transactions(
            &self,
            _request: GetTransactionsRequest,
        ) -> Result<Vec<Transaction>, ValkyrieError> {
            Ok(Vec::new())
        }

        async fn add_transaction(
            &self,
            _request: AddTransactionRequest,
        ) -> Result<TransactionResult, ValkyrieError> {
            Err(ValkyrieError::new(ErrorCode::Internal, "read only"))
        }

        async fn get_game_round(&self, _request: GetGameRoundRequest) -> Result<GameRound, ValkyrieError> {
            Err(ValkyrieError::new(ErrorCode::GameRoundNotFound, "none"))
        }
    }

    fn init(api_key: &str) -> PluginRequest {
        PluginRequest::Init(PluginInitConfig {
            pam_url: "http://pam".to_string(),
            api_key: api_key.to_string(),
            warehouse: None,
        })
    }

    #[tokio::test]
    async fn test_dispatch_routes_requests() {
        assert_eq!(dispatch(&Echo, init("key")).await.unwrap(), PluginReply::Initialized);
        assert_eq!(
            dispatch(&Echo, init("")).await.unwrap_err().code(),
            ErrorCode::Unauthorized
        );
        assert_eq!(
            dispatch(&Echo, PluginRequest::GetSettlementType).await.unwrap(),
            PluginReply::SettlementType(SettlementType::PerRound)
        );
        let request = GetSessionRequest {
            provider: "netent".to_string(),
            token: "t9".to_string(),
        };
        let error = dispatch(&Echo, PluginRequest::GetSession(request)).await.unwrap_err();
        assert_eq!(error.code(), ErrorCode::SessionNotFound);
        assert_eq!(error.message(), "t9");
    }

    #[tokio::test]
    async fn test_serve_answers_in_order_and_stops_on_eof() {
        let (mut host, plugin) = duplex(64 * 1024);
        let (reader, writer) = tokio::io::split(plugin);
        let server = tokio::spawn(async move { serve(&Echo, reader, writer).await });

        for (id, request) in [(1, init("key")), (2, PluginRequest::GetSettlementType)] {
            codec::write_frame(&mut host, &RequestFrame { id, request }).await.unwrap();
        }
        let first: ResponseFrame = codec::read_frame(&mut host).await.unwrap();
        let second: ResponseFrame = codec::read_frame(&mut host).await.unwrap();
        assert_eq!(first, ResponseFrame::success(1, PluginReply::Initialized));
        assert_eq!(second.id, 2);

        drop(host);
        server.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_serve_io_writes_handshake_first() {
        let (mut host, plugin) = duplex(64 * 1024);
        let (reader, writer) = tokio::io::split(plugin);
        let server = tokio::spawn(PluginServer::new(Echo).protocol_version(9).serve_io(reader, writer));

        let handshake: Handshake = codec::read_frame(&mut host).await.unwrap();
        assert_eq!(handshake.protocol_version, 9);

        drop(host);
        server.await.unwrap().unwrap();
    }
}
