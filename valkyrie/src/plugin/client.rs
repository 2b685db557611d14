//! Host-side stub of an out-of-process PAM backend.
//!
//! Calls are serialized: one request is outstanding at a time, so callers
//! take turns behind a mutex. The pipes themselves are owned by a reader
//! and a writer task, so a caller that times out or is cancelled never
//! leaves half a frame behind; its late response is discarded by id.
//! Transport failures never escape as transport types; they come back as
//! `Timeout`, `Undefined` or `PluginUnavailable` domain errors.

use super::{
    codec,
    errors::PluginError,
    log_bridge,
    messages::{PluginInitConfig, PluginReply, PluginRequest, RequestFrame, ResponseFrame, WireError},
    process::{self, PluginState},
};
use crate::{
    error::{BoxError, ErrorCode, ValkyrieError},
    lifecycle::Lifecycle,
    pam::{
        AmountMapper, BackendArgs, Mapper, PamClient, PamRegistry,
        models::{
            AddTransactionRequest, Balance, GameRound, GetBalanceRequest, GetGameRoundRequest,
            GetSessionRequest, GetTransactionsRequest, RefreshSessionRequest, Session,
            SettlementType, Transaction, TransactionResult,
        },
    },
    pipeline::CallContext,
};
use async_trait::async_trait;
use std::{
    collections::HashMap,
    io,
    path::PathBuf,
    sync::{
        Arc, PoisonError,
        atomic::{AtomicU64, Ordering},
    },
    time::Duration,
};
use tokio::{
    io::{AsyncRead, AsyncWrite},
    sync::{Mutex, mpsc, oneshot, watch},
};
use tokio_util::sync::{CancellationToken, DropGuard};

/// Registry key of the plugin backend.
pub const BACKEND_KEY: &str = "plugin";

/// Default bound on the plugin handshake.
pub const DEFAULT_HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);

/// Encoded requests waiting for the writer task.
const OUTBOUND_QUEUE: usize = 16;

/// How to launch and initialize one plugin.
#[derive(Clone, Debug)]
pub struct PluginConfig {
    pub name: String,
    pub path: PathBuf,
    pub init: PluginInitConfig,
    pub call_timeout: Duration,
    pub handshake_timeout: Duration,
    /// Extra environment for the plugin process.
    pub env: Vec<(String, String)>,
}

impl PluginConfig {
    pub fn new(name: impl Into<String>, path: impl Into<PathBuf>, init: PluginInitConfig) -> Self {
        Self {
            name: name.into(),
            path: path.into(),
            init,
            call_timeout: crate::pam::registry::DEFAULT_CALL_TIMEOUT,
            handshake_timeout: DEFAULT_HANDSHAKE_TIMEOUT,
            env: Vec::new(),
        }
    }

    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    /// Derive a plugin configuration from registry arguments.
    pub fn from_args(args: &BackendArgs) -> Result<Self, PluginError> {
        let name = if args.plugin_name.is_empty() {
            BACKEND_KEY.to_string()
        } else {
            args.plugin_name.clone()
        };
        let path = args
            .plugin_path
            .clone()
            .ok_or_else(|| PluginError::MissingPath(name.clone()))?;
        let init = PluginInitConfig {
            pam_url: args.pam_url.clone(),
            api_key: args.api_key.clone(),
            warehouse: args.warehouse.clone(),
        };
        Ok(Self {
            call_timeout: args.call_timeout,
            ..Self::new(name, path, init)
        })
    }
}

/// Bookkeeping shared by callers and the pipe tasks.
struct Transport {
    waiters: std::sync::Mutex<HashMap<u64, oneshot::Sender<ResponseFrame>>>,
    next_id: AtomicU64,
    /// Cancelled once either pipe is unusable.
    closed: CancellationToken,
}

impl Transport {
    fn new(closed: CancellationToken) -> Self {
        Self {
            waiters: std::sync::Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(1),
            closed,
        }
    }

    /// Mark the transport dead and fail every waiting caller.
    fn close(&self) {
        self.closed.cancel();
        self.waiters.lock().unwrap_or_else(PoisonError::into_inner).clear();
    }

    /// Register interest in the response to `id`, or `None` once closed.
    fn wait_for(&self, id: u64) -> Option<Waiter<'_>> {
        let (tx, rx) = oneshot::channel();
        self.waiters
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(id, tx);
        let waiter = Waiter {
            transport: self,
            id,
            rx,
        };
        if self.closed.is_cancelled() {
            return None;
        }
        Some(waiter)
    }

    /// Hand a response to the caller waiting for it.
    ///
    /// Responses to requests whose caller already gave up are dropped; an
    /// id that was never issued means the stream is out of step.
    fn deliver(&self, response: ResponseFrame) -> io::Result<()> {
        let waiter = self
            .waiters
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&response.id);
        match waiter {
            Some(tx) => {
                let _ = tx.send(response);
            }
            None if response.id >= self.next_id.load(Ordering::SeqCst) => {
                return Err(io::Error::new(
                    io::ErrorKind::InvalidData,
                    format!("response id {} was never requested", response.id),
                ));
            }
            None => tracing::debug!(stale = response.id, "discarding stale plugin response"),
        }
        Ok(())
    }
}

/// A caller's slot for one response. Dropping it abandons the response.
struct Waiter<'a> {
    transport: &'a Transport,
    id: u64,
    rx: oneshot::Receiver<ResponseFrame>,
}

impl Drop for Waiter<'_> {
    fn drop(&mut self) {
        self.transport
            .waiters
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&self.id);
    }
}

async fn read_responses<R>(plugin: String, mut reader: R, transport: Arc<Transport>)
where
    R: AsyncRead + Send + Unpin,
{
    loop {
        let frame = tokio::select! {
            _ = transport.closed.cancelled() => break,
            frame = codec::try_read_frame::<ResponseFrame, _>(&mut reader) => frame,
        };
        let delivered = match frame {
            Ok(Some(response)) => transport.deliver(response),
            Ok(None) => {
                tracing::debug!(plugin = %plugin, "plugin closed its response pipe");
                break;
            }
            Err(error) => Err(error),
        };
        if let Err(error) = delivered {
            tracing::warn!(plugin = %plugin, %error, "plugin response stream is unusable");
            break;
        }
    }
    transport.close();
}

async fn write_requests<W>(
    plugin: String,
    mut writer: W,
    mut outbound: mpsc::Receiver<Vec<u8>>,
    transport: Arc<Transport>,
) where
    W: AsyncWrite + Send + Unpin,
{
    loop {
        let body = tokio::select! {
            _ = transport.closed.cancelled() => break,
            body = outbound.recv() => match body {
                Some(body) => body,
                None => break,
            },
        };
        let written = tokio::select! {
            _ = transport.closed.cancelled() => break,
            written = codec::write_encoded(&mut writer, &body) => written,
        };
        if let Err(error) = written {
            tracing::warn!(plugin = %plugin, %error, "failed to write plugin request");
            break;
        }
    }
    transport.close();
}

/// PAM backend served by a plugin process.
pub struct PluginPamClient {
    name: String,
    transport: Arc<Transport>,
    outbound: mpsc::Sender<Vec<u8>>,
    turn: Mutex<()>,
    state: watch::Receiver<PluginState>,
    call_timeout: Duration,
    settlement_type: SettlementType,
    _closed: DropGuard,
}

impl PluginPamClient {
    /// Wrap an already connected transport. No process is owned; `state`
    /// decides whether calls are attempted.
    ///
    /// Must be called within a tokio runtime: the pipe tasks are spawned
    /// onto it.
    pub fn from_transport<R, W>(
        name: impl Into<String>,
        reader: R,
        writer: W,
        state: watch::Receiver<PluginState>,
        call_timeout: Duration,
    ) -> Self
    where
        R: AsyncRead + Send + Unpin + 'static,
        W: AsyncWrite + Send + Unpin + 'static,
    {
        Self::connect(
            name.into(),
            reader,
            writer,
            state,
            call_timeout,
            CancellationToken::new(),
            None,
        )
    }

    fn connect<R, W>(
        name: String,
        reader: R,
        writer: W,
        state: watch::Receiver<PluginState>,
        call_timeout: Duration,
        closed: CancellationToken,
        lifecycle: Option<&Lifecycle>,
    ) -> Self
    where
        R: AsyncRead + Send + Unpin + 'static,
        W: AsyncWrite + Send + Unpin + 'static,
    {
        let transport = Arc::new(Transport::new(closed.clone()));
        let (outbound, requests) = mpsc::channel(OUTBOUND_QUEUE);
        let reading = read_responses(name.clone(), reader, transport.clone());
        let writing = write_requests(name.clone(), writer, requests, transport.clone());
        match lifecycle {
            Some(lifecycle) => {
                lifecycle.spawn(reading);
                lifecycle.spawn(writing);
            }
            None => {
                tokio::spawn(reading);
                tokio::spawn(writing);
            }
        }

        Self {
            name,
            transport,
            outbound,
            turn: Mutex::new(()),
            state,
            call_timeout,
            settlement_type: SettlementType::default(),
            _closed: closed.drop_guard(),
        }
    }

    /// Launch, handshake and initialize a plugin.
    ///
    /// The process lives until the lifecycle shuts down, the returned
    /// client is dropped or its pipes break, whichever comes first.
    ///
    /// # Errors
    ///
    /// Launch, handshake and `Init` failures are returned as
    /// [`PluginError`]; the process is killed in each case.
    pub async fn launch(config: PluginConfig, lifecycle: &Lifecycle) -> Result<Self, PluginError> {
        let process::Spawned {
            child,
            stdin,
            mut stdout,
            stderr,
        } = process::spawn(&config.name, &config.path, &config.env)?;

        lifecycle.spawn(log_bridge::forward(config.name.clone(), stderr));
        let handshake = process::handshake(&mut stdout, config.handshake_timeout).await?;

        let (state_tx, state_rx) = watch::channel(PluginState::NotStarted);
        let owner = lifecycle.child_token();
        lifecycle.spawn(process::supervise(
            config.name.clone(),
            child,
            state_tx.clone(),
            owner.clone(),
        ));
        state_tx.send_if_modified(|state| {
            if *state == PluginState::NotStarted {
                *state = PluginState::Running;
                return true;
            }
            false
        });
        tracing::info!(
            plugin = %config.name,
            protocol_version = handshake.protocol_version,
            "plugin handshake completed"
        );

        // A broken pipe cancels the owner, which kills the process.
        let mut client = Self::connect(
            config.name,
            stdout,
            stdin,
            state_rx,
            config.call_timeout,
            owner,
            Some(lifecycle),
        );

        client.initialize(config.init).await.map_err(PluginError::Init)?;
        client.settlement_type = client.query_settlement_type().await.map_err(PluginError::Init)?;
        tracing::info!(
            plugin = %client.name,
            settlement_type = %client.settlement_type,
            "plugin initialized"
        );
        Ok(client)
    }

    /// Current process state.
    pub fn state(&self) -> PluginState {
        *self.state.borrow()
    }

    fn is_available(&self) -> bool {
        self.state().is_running() && !self.transport.closed.is_cancelled()
    }

    /// Send `Init` with the given configuration.
    pub async fn initialize(&self, init: PluginInitConfig) -> Result<(), ValkyrieError> {
        match self.call(PluginRequest::Init(init)).await.into_result()? {
            PluginReply::Initialized => Ok(()),
            other => Err(unexpected("init", &other)),
        }
    }

    /// Ask the plugin how it settles wagers.
    pub async fn query_settlement_type(&self) -> Result<SettlementType, ValkyrieError> {
        match self.call(PluginRequest::GetSettlementType).await.into_result()? {
            PluginReply::SettlementType(settlement) => Ok(settlement),
            other => Err(unexpected("get_settlement_type", &other)),
        }
    }

    fn unavailable(&self, id: u64) -> ResponseFrame {
        let state = self.state();
        let status = if state.is_running() {
            "disconnected".to_string()
        } else {
            state.to_string()
        };
        ResponseFrame::failure(
            id,
            WireError::new(
                ErrorCode::PluginUnavailable,
                format!("plugin '{}' is {status}", self.name),
            ),
        )
    }

    /// Exchange one request. Always yields a frame: transport failures are
    /// folded into its error.
    async fn call(&self, request: PluginRequest) -> ResponseFrame {
        if !self.is_available() {
            return self.unavailable(0);
        }

        let operation = request.operation();
        let _turn = self.turn.lock().await;
        let id = self.transport.next_id.fetch_add(1, Ordering::SeqCst);
        let body = match codec::encode(&RequestFrame { id, request }) {
            Ok(body) => body,
            Err(error) => {
                tracing::warn!(plugin = %self.name, operation, %error, "failed to encode plugin request");
                return ResponseFrame::failure(
                    id,
                    WireError::new(ErrorCode::Undefined, format!("failed to encode plugin request: {error}")),
                );
            }
        };
        let Some(mut waiter) = self.transport.wait_for(id) else {
            return self.unavailable(id);
        };

        let exchange = async {
            if self.outbound.send(body).await.is_err() {
                return None;
            }
            (&mut waiter.rx).await.ok()
        };
        match tokio::time::timeout(self.call_timeout, exchange).await {
            Ok(Some(response)) => response,
            Ok(None) => {
                if !self.is_available() {
                    tracing::warn!(plugin = %self.name, operation, "plugin went away during call");
                    return self.unavailable(id);
                }
                ResponseFrame::failure(
                    id,
                    WireError::new(ErrorCode::Undefined, "plugin transport failure"),
                )
            }
            Err(_) => {
                tracing::warn!(
                    plugin = %self.name,
                    operation,
                    timeout_ms = self.call_timeout.as_millis() as u64,
                    "plugin call timed out"
                );
                ResponseFrame::failure(
                    id,
                    WireError::new(
                        ErrorCode::Timeout,
                        format!("plugin call {operation} timed out after {:?}", self.call_timeout),
                    ),
                )
            }
        }
    }

    /// Run a request on behalf of `ctx`, giving up if it is cancelled.
    async fn invoke(&self, ctx: &CallContext, request: PluginRequest) -> Result<PluginReply, ValkyrieError> {
        tokio::select! {
            biased;
            _ = ctx.cancellation().cancelled() => Err(ValkyrieError::new(
                ErrorCode::Cancelled,
                format!("call to plugin '{}' cancelled", self.name),
            )),
            response = self.call(request) => response.into_result(),
        }
    }
}

fn unexpected(operation: &str, reply: &PluginReply) -> ValkyrieError {
    ValkyrieError::new(
        ErrorCode::Internal,
        format!("plugin answered {operation} with a {} reply", reply.kind()),
    )
}

#[async_trait]
impl PamClient for PluginPamClient {
    fn name(&self) -> &str {
        &self.name
    }

    fn settlement_type(&self) -> SettlementType {
        self.settlement_type
    }

    async fn get_session(&self, mapper: Mapper<'_, GetSessionRequest>) -> Result<Session, ValkyrieError> {
        let (ctx, request) = mapper()?;
        match self.invoke(&ctx, PluginRequest::GetSession(request)).await? {
            PluginReply::Session(session) => Ok(session),
            other => Err(unexpected("get_session", &other)),
        }
    }

    async fn refresh_session(
        &self,
        mapper: Mapper<'_, RefreshSessionRequest>,
    ) -> Result<Session, ValkyrieError> {
        let (ctx, request) = mapper()?;
        match self.invoke(&ctx, PluginRequest::RefreshSession(request)).await? {
            PluginReply::Session(session) => Ok(session),
            other => Err(unexpected("refresh_session", &other)),
        }
    }

    async fn get_balance(&self, mapper: Mapper<'_, GetBalanceRequest>) -> Result<Balance, ValkyrieError> {
        let (ctx, request) = mapper()?;
        match self.invoke(&ctx, PluginRequest::GetBalance(request)).await? {
            PluginReply::Balance(balance) => Ok(balance),
            other => Err(unexpected("get_balance", &other)),
        }
    }

    async fn get_transactions(
        &self,
        mapper: Mapper<'_, GetTransactionsRequest>,
    ) -> Result<Vec<Transaction>, ValkyrieError> {
        let (ctx, request) = mapper()?;
        match self.invoke(&ctx, PluginRequest::GetTransactions(request)).await? {
            PluginReply::Transactions(transactions) => Ok(transactions),
            other => Err(unexpected("get_transactions", &other)),
        }
    }

    async fn add_transaction(
        &self,
        mapper: AmountMapper<'_, AddTransactionRequest>,
    ) -> Result<TransactionResult, ValkyrieError> {
        let (ctx, request) = mapper(self.amount_rounder())?;
        match self.invoke(&ctx, PluginRequest::AddTransaction(request)).await? {
            PluginReply::TransactionResult(result) => Ok(result),
            other => Err(unexpected("add_transaction", &other)),
        }
    }

    async fn get_game_round(
        &self,
        mapper: Mapper<'_, GetGameRoundRequest>,
    ) -> Result<GameRound, ValkyrieError> {
        let (ctx, request) = mapper()?;
        match self.invoke(&ctx, PluginRequest::GetGameRound(request)).await? {
            PluginReply::GameRound(round) => Ok(round),
            other => Err(unexpected("get_game_round", &other)),
        }
    }
}

async fn build(args: BackendArgs) -> Result<Arc<dyn PamClient>, BoxError> {
    let config = PluginConfig::from_args(&args)?;
    let client = PluginPamClient::launch(config, &args.lifecycle).await?;
    Ok(Arc::new(client))
}

/// Register the plugin backend under [`BACKEND_KEY`].
pub fn register(registry: &PamRegistry) {
    registry.register(BACKEND_KEY, |args| Box::pin(build(args)));
}
