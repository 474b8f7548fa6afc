//! Tool system for agents
//!
//! Every capability an agent can invoke implements [`Tool`]. Three kinds ship
//! with the crate:
//!
//! - [`FunctionTool`]: a local closure, either raw (`Value` in, `Value` out)
//!   or typed through `serde` and `schemars`,
//! - [`HostedTool`]: a remote capability reached through a [`HostedService`]
//!   transport,
//! - [`crate::agent_tool::AgentTool`]: another agent run as an opaque tool.
//!
//! The runner never inspects which kind it is dispatching to.

use std::fmt;
use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use futures::future::BoxFuture;
use schemars::JsonSchema;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tower::BoxError;

use crate::context::RunContext;
use crate::error::{AgentsError, Result};
use crate::runner::Runner;
use crate::schema::{Schema, SchemaValidationError};

/// What kind of capability a tool is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolKind {
    Function,
    Hosted,
    Agent,
}

/// A tool as advertised to the oracle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolSpec {
    pub name: String,
    pub description: String,
    pub parameters: Schema,
    pub kind: ToolKind,
}

/// Everything a tool sees while it runs.
pub struct ToolScope<C = ()> {
    /// The run's shared context
    pub context: RunContext<C>,
    /// Handle for starting nested runs
    pub runner: Runner,
    /// Cancelled when the enclosing run is cancelled
    pub cancellation: CancellationToken,
    /// The agent that requested the call
    pub agent: String,
    pub call_id: String,
}

impl<C> Clone for ToolScope<C> {
    fn clone(&self) -> Self {
        Self {
            context: self.context.clone(),
            runner: self.runner.clone(),
            cancellation: self.cancellation.clone(),
            agent: self.agent.clone(),
            call_id: self.call_id.clone(),
        }
    }
}

impl<C> fmt::Debug for ToolScope<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ToolScope")
            .field("agent", &self.agent)
            .field("call_id", &self.call_id)
            .field("cancelled", &self.cancellation.is_cancelled())
            .finish()
    }
}

/// Trait for all tools that can be used by agents
///
/// `invoke` receives arguments already validated and coerced against
/// [`Tool::input_schema`].
#[async_trait]
pub trait Tool<C = ()>: Send + Sync {
    /// Get the name of the tool
    fn name(&self) -> &str;

    /// Get the description of the tool
    fn description(&self) -> &str;

    /// JSON schema of the tool's arguments
    fn input_schema(&self) -> &Schema;

    fn kind(&self) -> ToolKind {
        ToolKind::Function
    }

    /// Execute the tool with the given arguments
    async fn invoke(&self, args: Value, scope: &ToolScope<C>) -> Result<Value>;

    fn spec(&self) -> ToolSpec {
        ToolSpec {
            name: self.name().to_string(),
            description: self.description().to_string(),
            parameters: self.input_schema().clone(),
            kind: self.kind(),
        }
    }
}

type Handler<C> = dyn Fn(Value, RunContext<C>) -> BoxFuture<'static, Result<Value>> + Send + Sync;

/// A tool backed by a local function.
pub struct FunctionTool<C = ()> {
    name: String,
    description: String,
    schema: Schema,
    handler: Arc<Handler<C>>,
}

impl<C> Clone for FunctionTool<C> {
    fn clone(&self) -> Self {
        Self {
            name: self.name.clone(),
            description: self.description.clone(),
            schema: self.schema.clone(),
            handler: Arc::clone(&self.handler),
        }
    }
}

impl<C> fmt::Debug for FunctionTool<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FunctionTool")
            .field("name", &self.name)
            .field("description", &self.description)
            .field("schema", &self.schema)
            .finish()
    }
}

impl<C: Send + 'static> FunctionTool<C> {
    /// A tool over raw JSON values with a hand-written schema.
    ///
    /// Errors returned by `f` surface as [`AgentsError::ToolExecution`].
    pub fn new<F, Fut>(
        name: impl Into<String>,
        description: impl Into<String>,
        schema: Schema,
        f: F,
    ) -> Self
    where
        F: Fn(Value, RunContext<C>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = std::result::Result<Value, BoxError>> + Send + 'static,
    {
        let name = name.into();
        let tool_name = name.clone();
        let handler = move |args: Value, ctx: RunContext<C>| -> BoxFuture<'static, Result<Value>> {
            let fut = f(args, ctx);
            let tool_name = tool_name.clone();
            Box::pin(async move {
                fut.await
                    .map_err(|source| AgentsError::tool_execution(tool_name, source))
            })
        };
        Self {
            name,
            description: description.into(),
            schema,
            handler: Arc::new(handler),
        }
    }

    /// A tool whose arguments deserialize into `A` and whose output
    /// serializes from `O`. The input schema is derived from `A`.
    ///
    /// ```rust
    /// use agents_runtime::{FunctionTool, RunContext};
    /// use schemars::JsonSchema;
    /// use serde::Deserialize;
    /// use tower::BoxError;
    ///
    /// #[derive(Deserialize, JsonSchema)]
    /// struct Add {
    ///     a: i64,
    ///     b: i64,
    /// }
    ///
    /// let tool: FunctionTool = FunctionTool::typed(
    ///     "add",
    ///     "Add two integers",
    ///     |args: Add, _ctx: RunContext| async move { Ok::<_, BoxError>(args.a + args.b) },
    /// );
    /// ```
    pub fn typed<A, O, F, Fut>(
        name: impl Into<String>,
        description: impl Into<String>,
        f: F,
    ) -> Self
    where
        A: DeserializeOwned + JsonSchema + Send + 'static,
        O: Serialize + 'static,
        F: Fn(A, RunContext<C>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = std::result::Result<O, BoxError>> + Send + 'static,
    {
        let name = name.into();
        let tool_name = name.clone();
        let handler = move |args: Value, ctx: RunContext<C>| -> BoxFuture<'static, Result<Value>> {
            let tool_name = tool_name.clone();
            let parsed = match serde_json::from_value::<A>(args) {
                Ok(parsed) => parsed,
                Err(e) => {
                    return Box::pin(futures::future::ready(Err(AgentsError::InvalidToolArgs {
                        tool: tool_name,
                        source: SchemaValidationError::new("$", e.to_string()),
                    })))
                }
            };
            let fut = f(parsed, ctx);
            Box::pin(async move {
                let output = fut
                    .await
                    .map_err(|source| AgentsError::tool_execution(tool_name.clone(), source))?;
                serde_json::to_value(output)
                    .map_err(|source| AgentsError::tool_execution(tool_name, source))
            })
        };
        Self {
            name,
            description: description.into(),
            schema: Schema::of::<A>(),
            handler: Arc::new(handler),
        }
    }

    /// A typed tool over a synchronous function that ignores the context.
    pub fn from_fn<A, O, F>(name: impl Into<String>, description: impl Into<String>, f: F) -> Self
    where
        A: DeserializeOwned + JsonSchema + Send + 'static,
        O: Serialize + Send + 'static,
        F: Fn(A) -> std::result::Result<O, BoxError> + Send + Sync + 'static,
    {
        Self::typed(name, description, move |args: A, _ctx: RunContext<C>| {
            futures::future::ready(f(args))
        })
    }
}

#[async_trait]
impl<C: Send + 'static> Tool<C> for FunctionTool<C> {
    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> &str {
        &self.description
    }

    fn input_schema(&self) -> &Schema {
        &self.schema
    }

    async fn invoke(&self, args: Value, scope: &ToolScope<C>) -> Result<Value> {
        (self.handler)(args, scope.context.clone()).await
    }
}

/// Transport to a remote capability.
///
/// Failures are reported as [`AgentsError::ExternalService`] and may be
/// retried by the runner's retry policy.
#[async_trait]
pub trait HostedService: Send + Sync {
    /// Name of the remote service, used in error reports
    fn service_name(&self) -> &str;

    async fn call(&self, tool: &str, args: Value) -> std::result::Result<Value, BoxError>;
}

/// A tool executed by a remote service.
#[derive(Clone)]
pub struct HostedTool {
    name: String,
    description: String,
    schema: Schema,
    service: Arc<dyn HostedService>,
}

impl fmt::Debug for HostedTool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HostedTool")
            .field("name", &self.name)
            .field("service", &self.service.service_name())
            .finish()
    }
}

impl HostedTool {
    pub fn new(
        name: impl Into<String>,
        description: impl Into<String>,
        schema: Schema,
        service: Arc<dyn HostedService>,
    ) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            schema,
            service,
        }
    }

    /// Web search over `service`, taking a single `query` argument.
    pub fn web_search(service: Arc<dyn HostedService>) -> Self {
        Self::new(
            "web_search",
            "Search the web for up-to-date information.",
            Schema::single_string("query", "The search query"),
            service,
        )
    }
}

#[async_trait]
impl<C: Send + 'static> Tool<C> for HostedTool {
    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> &str {
        &self.description
    }

    fn input_schema(&self) -> &Schema {
        &self.schema
    }

    fn kind(&self) -> ToolKind {
        ToolKind::Hosted
    }

    async fn invoke(&self, args: Value, _scope: &ToolScope<C>) -> Result<Value> {
        self.service
            .call(&self.name, args)
            .await
            .map_err(|e| AgentsError::ExternalService {
                service: self.service.service_name().to_string(),
                message: e.to_string(),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::oracle::ScriptedOracle;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn scope() -> ToolScope<u32> {
        ToolScope {
            context: RunContext::new(0),
            runner: Runner::new(ScriptedOracle::new()),
            cancellation: CancellationToken::new(),
            agent: "Main".into(),
            call_id: "call_1".into(),
        }
    }

    #[derive(Deserialize, JsonSchema)]
    struct Divide {
        numerator: f64,
        denominator: f64,
    }

    fn divide() -> FunctionTool<u32> {
        FunctionTool::typed(
            "divide",
            "Divide two numbers",
            |args: Divide, ctx: RunContext<u32>| async move {
                ctx.update(|calls| *calls += 1);
                if args.denominator == 0.0 {
                    return Err::<f64, BoxError>("division by zero".into());
                }
                Ok(args.numerator / args.denominator)
            },
        )
    }

    #[tokio::test]
    async fn test_typed_tool_runs_and_updates_context() {
        let tool = divide();
        let scope = scope();
        let out = tool
            .invoke(json!({ "numerator": 9.0, "denominator": 3.0 }), &scope)
            .await
            .unwrap();
        assert_eq!(out, json!(3.0));
        assert_eq!(scope.context.snapshot(), 1);
    }

    #[tokio::test]
    async fn test_typed_tool_error_keeps_cause() {
        let err = divide()
            .invoke(json!({ "numerator": 1.0, "denominator": 0.0 }), &scope())
            .await
            .unwrap_err();
        match err {
            AgentsError::ToolExecution { tool, source } => {
                assert_eq!(tool, "divide");
                assert_eq!(source.to_string(), "division by zero");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_typed_tool_rejects_undecodable_args() {
        let err = divide()
            .invoke(json!({ "numerator": "nine" }), &scope())
            .await
            .unwrap_err();
        assert!(matches!(err, AgentsError::InvalidToolArgs { .. }));
    }

    #[test]
    fn test_spec_uses_derived_schema() {
        let spec = Tool::<u32>::spec(&divide());
        assert_eq!(spec.name, "divide");
        assert_eq!(spec.kind, ToolKind::Function);
        let required = spec.parameters.as_value()["required"].clone();
        assert_eq!(required, json!(["denominator", "numerator"]));
    }

    #[tokio::test]
    async fn test_raw_tool() {
        let tool: FunctionTool<u32> = FunctionTool::new(
            "echo",
            "Echo the input",
            Schema::any(),
            |args: Value, _ctx| async move { Ok::<_, BoxError>(args) },
        );
        let out = tool.invoke(json!({ "x": 1 }), &scope()).await.unwrap();
        assert_eq!(out, json!({ "x": 1 }));
    }

    struct DownService;

    #[async_trait]
    impl HostedService for DownService {
        fn service_name(&self) -> &str {
            "search-backend"
        }

        async fn call(&self, _tool: &str, _args: Value) -> std::result::Result<Value, BoxError> {
            Err("connection refused".into())
        }
    }

    #[tokio::test]
    async fn test_hosted_failure_is_external_service() {
        let tool = HostedTool::web_search(Arc::new(DownService));
        let err = Tool::<u32>::invoke(&tool, json!({ "query": "rust" }), &scope())
            .await
            .unwrap_err();
        assert!(err.is_retryable());
        match err {
            AgentsError::ExternalService { service, message } => {
                assert_eq!(service, "search-backend");
                assert_eq!(message, "connection refused");
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert_eq!(Tool::<u32>::kind(&tool), ToolKind::Hosted);
    }
}
