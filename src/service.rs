//! Tower services and layers for tool and oracle calls.
//!
//! Tool invocations run through
//! `CancelLayer → RetryLayer → TimeoutLayer → InputSchemaLayer → ToolService`
//! and oracle calls through `CancelLayer → RetryLayer → TimeoutLayer →
//! OracleService`. Retry and timeout are present only when configured. Every
//! service in the stack uses [`AgentsError`] as its error type so failures
//! keep their classification all the way up to the runner.
//!
//! Streamed oracle calls carry a [`DeltaSink`]. The timeout does not count
//! time the sink spends waiting on a slow consumer, and a call whose text
//! already reached the consumer is not retried.

use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;

use serde_json::Value;
use tokio::time::{timeout_at, Instant};
use tokio_util::sync::CancellationToken;
use tower::{Layer, Service, ServiceExt};

use crate::config::RetryConfig;
use crate::error::AgentsError;
use crate::oracle::{DeltaSink, Oracle, OracleRequest, Proposal};
use crate::retry::{retry_async, RetryPolicy};
use crate::schema::Schema;
use crate::tool::{Tool, ToolScope};

type BoxFuture<T> = Pin<Box<dyn Future<Output = Result<T, AgentsError>> + Send>>;

/// Request passed into the tool service stack.
pub struct ToolRequest<C = ()> {
    pub tool_name: String,
    pub arguments: Value,
    pub scope: ToolScope<C>,
}

impl<C> Clone for ToolRequest<C> {
    fn clone(&self) -> Self {
        Self {
            tool_name: self.tool_name.clone(),
            arguments: self.arguments.clone(),
            scope: self.scope.clone(),
        }
    }
}

impl<C> fmt::Debug for ToolRequest<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ToolRequest")
            .field("tool_name", &self.tool_name)
            .field("arguments", &self.arguments)
            .field("scope", &self.scope)
            .finish()
    }
}

/// Requests that may be streaming output to a consumer while they run.
pub trait Streamed {
    fn delta_sink(&self) -> Option<&DeltaSink> {
        None
    }
}

impl<C> Streamed for ToolRequest<C> {}

/// Base tool executor adapting `dyn Tool` to a Tower Service.
pub struct ToolService<C = ()> {
    tool: Arc<dyn Tool<C>>,
}

impl<C> Clone for ToolService<C> {
    fn clone(&self) -> Self {
        Self {
            tool: Arc::clone(&self.tool),
        }
    }
}

impl<C: Send + 'static> ToolService<C> {
    pub fn new(tool: Arc<dyn Tool<C>>) -> Self {
        Self { tool }
    }
}

impl<C: Send + 'static> Service<ToolRequest<C>> for ToolService<C> {
    type Response = Value;
    type Error = AgentsError;
    type Future = BoxFuture<Value>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, req: ToolRequest<C>) -> Self::Future {
        let tool = self.tool.clone();
        Box::pin(async move { tool.invoke(req.arguments, &req.scope).await })
    }
}

/// Validates and coerces tool arguments before they reach the tool.
#[derive(Clone, Debug)]
pub struct InputSchemaLayer {
    schema: Schema,
}

impl InputSchemaLayer {
    pub fn new(schema: Schema) -> Self {
        Self { schema }
    }
}

#[derive(Clone, Debug)]
pub struct InputSchemaService<S> {
    inner: S,
    schema: Schema,
}

impl<S> Layer<S> for InputSchemaLayer {
    type Service = InputSchemaService<S>;
    fn layer(&self, inner: S) -> Self::Service {
        InputSchemaService {
            inner,
            schema: self.schema.clone(),
        }
    }
}

impl<S, C> Service<ToolRequest<C>> for InputSchemaService<S>
where
    S: Service<ToolRequest<C>, Response = Value, Error = AgentsError> + Clone + Send + 'static,
    S::Future: Send + 'static,
    C: Send + 'static,
{
    type Response = Value;
    type Error = AgentsError;
    type Future = BoxFuture<Value>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, mut req: ToolRequest<C>) -> Self::Future {
        let inner = self.inner.clone();
        let schema = self.schema.clone();
        Box::pin(async move {
            req.arguments =
                schema
                    .validate(&req.arguments)
                    .map_err(|source| AgentsError::InvalidToolArgs {
                        tool: req.tool_name.clone(),
                        source,
                    })?;
            inner.oneshot(req).await
        })
    }
}

/// Fails a call with [`AgentsError::Timeout`] when it works longer than the
/// configured duration. Time a streamed call spends blocked on its consumer
/// extends the deadline.
#[derive(Clone, Debug)]
pub struct TimeoutLayer {
    duration: Duration,
    operation: String,
}

impl TimeoutLayer {
    pub fn new(duration: Duration, operation: impl Into<String>) -> Self {
        Self {
            duration,
            operation: operation.into(),
        }
    }
}

#[derive(Clone, Debug)]
pub struct TimeoutService<S> {
    inner: S,
    duration: Duration,
    operation: String,
}

impl<S> Layer<S> for TimeoutLayer {
    type Service = TimeoutService<S>;
    fn layer(&self, inner: S) -> Self::Service {
        TimeoutService {
            inner,
            duration: self.duration,
            operation: self.operation.clone(),
        }
    }
}

impl<S, R> Service<R> for TimeoutService<S>
where
    S: Service<R, Error = AgentsError> + Clone + Send + 'static,
    S::Future: Send + 'static,
    S::Response: Send + 'static,
    R: Streamed + Send + 'static,
{
    type Response = S::Response;
    type Error = AgentsError;
    type Future = BoxFuture<S::Response>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, req: R) -> Self::Future {
        let inner = self.inner.clone();
        let d = self.duration;
        let operation = self.operation.clone();
        let sink = req.delta_sink().cloned();
        Box::pin(async move {
            let waited = || sink.as_ref().map_or(Duration::ZERO, DeltaSink::waited);
            let started = Instant::now();
            let call = inner.oneshot(req);
            tokio::pin!(call);
            loop {
                let paused = waited();
                match timeout_at(started + d + paused, &mut call).await {
                    Ok(res) => return res,
                    // Still blocked on the consumer, or was since the deadline was set.
                    Err(_elapsed) if waited() > paused => continue,
                    Err(_elapsed) => {
                        return Err(AgentsError::Timeout {
                            operation,
                            after: d,
                        })
                    }
                }
            }
        })
    }
}

/// Re-attempts retryable failures with exponential backoff.
#[derive(Clone, Debug)]
pub struct RetryLayer {
    config: RetryConfig,
    operation: String,
}

impl RetryLayer {
    pub fn new(config: RetryConfig, operation: impl Into<String>) -> Self {
        Self {
            config,
            operation: operation.into(),
        }
    }
}

#[derive(Clone, Debug)]
pub struct RetryService<S> {
    inner: S,
    config: RetryConfig,
    operation: String,
}

impl<S> Layer<S> for RetryLayer {
    type Service = RetryService<S>;
    fn layer(&self, inner: S) -> Self::Service {
        RetryService {
            inner,
            config: self.config.clone(),
            operation: self.operation.clone(),
        }
    }
}

impl<S, R> Service<R> for RetryService<S>
where
    S: Service<R, Error = AgentsError> + Clone + Send + 'static,
    S::Future: Send + 'static,
    S::Response: Send + 'static,
    R: Streamed + Clone + Send + 'static,
{
    type Response = S::Response;
    type Error = AgentsError;
    type Future = BoxFuture<S::Response>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, req: R) -> Self::Future {
        let inner = self.inner.clone();
        let config = self.config.clone();
        let operation = self.operation.clone();
        let sink = req.delta_sink().cloned();
        Box::pin(async move {
            let mut policy = RetryPolicy::new(config);
            retry_async(
                &operation,
                move || inner.clone().oneshot(req.clone()),
                &mut policy,
                || !sink.as_ref().is_some_and(DeltaSink::delivered),
            )
            .await
        })
    }
}

/// Races a call against a cancellation token.
#[derive(Clone, Debug)]
pub struct CancelLayer {
    token: CancellationToken,
}

impl CancelLayer {
    pub fn new(token: CancellationToken) -> Self {
        Self { token }
    }
}

#[derive(Clone, Debug)]
pub struct CancelService<S> {
    inner: S,
    token: CancellationToken,
}

impl<S> Layer<S> for CancelLayer {
    type Service = CancelService<S>;
    fn layer(&self, inner: S) -> Self::Service {
        CancelService {
            inner,
            token: self.token.clone(),
        }
    }
}

impl<S, R> Service<R> for CancelService<S>
where
    S: Service<R, Error = AgentsError> + Clone + Send + 'static,
    S::Future: Send + 'static,
    S::Response: Send + 'static,
    R: Send + 'static,
{
    type Response = S::Response;
    type Error = AgentsError;
    type Future = BoxFuture<S::Response>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        if self.token.is_cancelled() {
            return Poll::Ready(Err(AgentsError::Cancelled));
        }
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, req: R) -> Self::Future {
        let inner = self.inner.clone();
        let token = self.token.clone();
        Box::pin(async move {
            if token.is_cancelled() {
                return Err(AgentsError::Cancelled);
            }
            tokio::select! {
                biased;
                _ = token.cancelled() => Err(AgentsError::Cancelled),
                res = inner.oneshot(req) => res,
            }
        })
    }
}

/// One oracle call, optionally streaming text deltas.
#[derive(Clone, Debug)]
pub struct OracleCall {
    pub request: Arc<OracleRequest>,
    pub sink: Option<DeltaSink>,
}

impl Streamed for OracleCall {
    fn delta_sink(&self) -> Option<&DeltaSink> {
        self.sink.as_ref()
    }
}

/// Service adapting an [`Oracle`] to a Tower `Service<OracleCall>`.
#[derive(Clone)]
pub struct OracleService {
    oracle: Arc<dyn Oracle>,
}

impl OracleService {
    pub fn new(oracle: Arc<dyn Oracle>) -> Self {
        Self { oracle }
    }
}

impl Service<OracleCall> for OracleService {
    type Response = Proposal;
    type Error = AgentsError;
    type Future = BoxFuture<Proposal>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, call: OracleCall) -> Self::Future {
        let oracle = self.oracle.clone();
        Box::pin(async move {
            match &call.sink {
                Some(sink) => oracle.propose_streaming(&call.request, sink).await,
                None => oracle.propose(&call.request).await,
            }
        })
    }
}
