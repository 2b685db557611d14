//! Ordered interceptor chain around a terminal operation.
//!
//! A [`Pipeline`] holds handlers that run in registration order before the
//! call-specific finalizer. Each handler decides whether the chain goes on
//! by calling [`PipelineContext::next`]; code after that call runs once the
//! rest of the chain has finished, so handlers nest like middleware:
//!
//! ```text
//! h1 before -> h2 before -> finalizer -> h2 after -> h1 after
//! ```
//!
//! ## Example
//!
//! ```
//! use async_trait::async_trait;
//! use valkyrie::pipeline::{CallContext, Handler, Pipeline, PipelineContext};
//! use valkyrie::BoxError;
//!
//! struct Tag;
//!
//! #[async_trait]
//! impl Handler<String> for Tag {
//!     async fn handle(&self, ctx: &mut PipelineContext<'_, String>) -> Result<(), BoxError> {
//!         let tag = ctx.payload().clone();
//!         ctx.context_mut().set_metadata("tag", tag);
//!         ctx.next().await
//!     }
//! }
//!
//! # tokio::runtime::Runtime::new().unwrap().block_on(async {
//! let pipeline = Pipeline::new();
//! pipeline.register(Tag);
//! let payload = "balance".to_string();
//! pipeline
//!     .execute(CallContext::new(), &payload, |ctx| {
//!         Box::pin(async move {
//!             assert_eq!(ctx.metadata("tag"), Some("balance"));
//!             Ok(())
//!         })
//!     })
//!     .await
//!     .unwrap();
//! # });
//! ```

pub mod context;
pub mod handlers;

pub use context::CallContext;
pub use handlers::{CallInfo, LoggingHandler, MetricsHandler, TracingHandler};

use crate::error::BoxError;
use async_trait::async_trait;
use futures_util::future::BoxFuture;
use std::sync::{Arc, PoisonError, RwLock};

/// A step in a [`Pipeline`].
#[async_trait]
pub trait Handler<P: Send + Sync + 'static>: Send + Sync {
    /// Run this step. Call `ctx.next().await` to continue the chain;
    /// returning without it skips every later handler and the finalizer.
    async fn handle(&self, ctx: &mut PipelineContext<'_, P>) -> Result<(), BoxError>;
}

/// Terminal step of one execution.
pub type Finalizer<'a> =
    Box<dyn FnOnce(CallContext) -> BoxFuture<'a, Result<(), BoxError>> + Send + 'a>;

/// State of one pipeline execution, handed to every handler.
pub struct PipelineContext<'a, P: Send + Sync + 'static> {
    call: CallContext,
    payload: &'a P,
    handlers: Vec<Arc<dyn Handler<P>>>,
    index: usize,
    finalizer: Option<Finalizer<'a>>,
}

impl<'a, P: Send + Sync + 'static> PipelineContext<'a, P> {
    pub fn context(&self) -> &CallContext {
        &self.call
    }

    pub fn context_mut(&mut self) -> &mut CallContext {
        &mut self.call
    }

    /// Replace the call context seen by later handlers and the finalizer.
    pub fn set_context(&mut self, call: CallContext) {
        self.call = call;
    }

    pub fn payload(&self) -> &'a P {
        self.payload
    }

    /// Run the next handler, or the finalizer once every handler has run.
    ///
    /// Calling `next` again after the finalizer has run is a no-op.
    pub async fn next(&mut self) -> Result<(), BoxError> {
        if let Some(handler) = self.handlers.get(self.index).cloned() {
            self.index += 1;
            return handler.handle(self).await;
        }
        match self.finalizer.take() {
            Some(finalizer) => finalizer(self.call.clone()).await,
            None => Ok(()),
        }
    }
}

/// A reusable, append-only chain of handlers for payloads of type `P`.
pub struct Pipeline<P: Send + Sync + 'static> {
    handlers: RwLock<Vec<Arc<dyn Handler<P>>>>,
}

impl<P: Send + Sync + 'static> Pipeline<P> {
    pub fn new() -> Self {
        Self {
            handlers: RwLock::new(Vec::new()),
        }
    }

    /// Append a handler. Executions already in flight are not affected.
    pub fn register(&self, handler: impl Handler<P> + 'static) {
        self.register_arc(Arc::new(handler));
    }

    /// Append a shared handler.
    pub fn register_arc(&self, handler: Arc<dyn Handler<P>>) {
        self.handlers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(handler);
    }

    /// Append several handlers, preserving their order.
    pub fn register_all(&self, handlers: impl IntoIterator<Item = Arc<dyn Handler<P>>>) {
        self.handlers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .extend(handlers);
    }

    pub fn len(&self) -> usize {
        self.handlers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Run the registered handlers followed by `finalizer`.
    ///
    /// The handler list is copied first, so concurrent registrations only
    /// apply to later executions. The first error returned by any step is
    /// returned unchanged.
    pub async fn execute<'a, F>(&self, call: CallContext, payload: &'a P, finalizer: F) -> Result<(), BoxError>
    where
        F: FnOnce(CallContext) -> BoxFuture<'a, Result<(), BoxError>> + Send + 'a,
    {
        let handlers = self
            .handlers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        let mut ctx = PipelineContext {
            call,
            payload,
            handlers,
            index: 0,
            finalizer: Some(Box::new(finalizer)),
        };
        ctx.next().await
    }
}

impl<P: Send + Sync + 'static> Default for Pipeline<P> {
    fn default() -> Self {
        Self::new()
    }
}
