//! Per-agent tool registry and dispatch.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use serde_json::Value;
use tower::util::BoxCloneService;
use tower::{Layer, ServiceExt};
use tracing::debug;

use crate::error::{AgentsError, Result};
use crate::service::{
    CancelLayer, InputSchemaLayer, RetryLayer, TimeoutLayer, ToolRequest, ToolService,
};
use crate::tool::{Tool, ToolScope, ToolSpec};

type ToolStack<C> = BoxCloneService<ToolRequest<C>, Value, AgentsError>;

/// The tools of one agent, in registration order.
pub struct ToolRegistry<C = ()> {
    owner: String,
    tools: Vec<Arc<dyn Tool<C>>>,
    index: HashMap<String, usize>,
}

impl<C> Clone for ToolRegistry<C> {
    fn clone(&self) -> Self {
        Self {
            owner: self.owner.clone(),
            tools: self.tools.clone(),
            index: self.index.clone(),
        }
    }
}

impl<C> fmt::Debug for ToolRegistry<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ToolRegistry")
            .field("owner", &self.owner)
            .field("tools", &self.index.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl<C: Send + 'static> ToolRegistry<C> {
    /// An empty registry for the agent named `owner`.
    pub fn new(owner: impl Into<String>) -> Self {
        Self {
            owner: owner.into(),
            tools: Vec::new(),
            index: HashMap::new(),
        }
    }

    /// Adds a tool. Names are unique per agent.
    pub fn register(&mut self, tool: Arc<dyn Tool<C>>) -> Result<()> {
        let name = tool.name().to_string();
        if self.index.contains_key(&name) {
            return Err(AgentsError::DuplicateToolName {
                agent: self.owner.clone(),
                tool: name,
            });
        }
        self.index.insert(name, self.tools.len());
        self.tools.push(tool);
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<&Arc<dyn Tool<C>>> {
        self.index.get(name).map(|&i| &self.tools[i])
    }

    pub fn contains(&self, name: &str) -> bool {
        self.index.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.tools.iter().map(|t| t.name())
    }

    /// Tool specs in registration order, as advertised to the oracle.
    pub fn specs(&self) -> Vec<ToolSpec> {
        self.tools.iter().map(|t| t.spec()).collect()
    }

    /// Validates `raw_args` against the tool's schema and runs it.
    ///
    /// Timeouts and retries come from the run config of `scope.runner`; the
    /// call is abandoned with [`AgentsError::Cancelled`] when the run's token
    /// fires.
    pub async fn invoke(&self, name: &str, raw_args: Value, scope: &ToolScope<C>) -> Result<Value> {
        let tool = self
            .get(name)
            .ok_or_else(|| AgentsError::UnknownTool {
                agent: self.owner.clone(),
                tool: name.to_string(),
            })?
            .clone();

        debug!(agent = %self.owner, tool = %name, call_id = %scope.call_id, "Invoking tool");

        let stack = Self::stack(tool, scope);
        stack
            .oneshot(ToolRequest {
                tool_name: name.to_string(),
                arguments: raw_args,
                scope: scope.clone(),
            })
            .await
    }

    fn stack(tool: Arc<dyn Tool<C>>, scope: &ToolScope<C>) -> ToolStack<C> {
        let config = scope.runner.config();
        let label = format!("tool `{}`", tool.name());
        let schema = tool.input_schema().clone();

        let mut svc: ToolStack<C> =
            BoxCloneService::new(InputSchemaLayer::new(schema).layer(ToolService::new(tool)));
        if let Some(limit) = config.tool_timeout {
            svc = BoxCloneService::new(TimeoutLayer::new(limit, label.clone()).layer(svc));
        }
        if let Some(retry) = &config.retry {
            svc = BoxCloneService::new(RetryLayer::new(retry.clone(), label).layer(svc));
        }
        BoxCloneService::new(CancelLayer::new(scope.cancellation.clone()).layer(svc))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{RetryConfig, RunConfig};
    use crate::context::RunContext;
    use crate::oracle::ScriptedOracle;
    use crate::runner::Runner;
    use crate::schema::Schema;
    use crate::tool::FunctionTool;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;
    use tokio_util::sync::CancellationToken;
    use tower::BoxError;

    fn scope(config: RunConfig) -> ToolScope<()> {
        ToolScope {
            context: RunContext::new(()),
            runner: Runner::new(ScriptedOracle::new()).with_config(config),
            cancellation: CancellationToken::new(),
            agent: "Main".into(),
            call_id: "call_1".into(),
        }
    }

    fn echo(name: &str) -> Arc<dyn Tool<()>> {
        Arc::new(FunctionTool::new(
            name,
            "Echo",
            Schema::from_value(json!({
                "type": "object",
                "properties": { "n": { "type": "integer" } },
                "required": ["n"]
            })),
            |args: Value, _ctx: RunContext<()>| async move { Ok::<_, BoxError>(args["n"].clone()) },
        ))
    }

    #[test]
    fn test_duplicate_names_rejected() {
        let mut registry = ToolRegistry::new("Main");
        registry.register(echo("echo")).unwrap();
        let err = registry.register(echo("echo")).unwrap_err();
        assert!(matches!(
            err,
            AgentsError::DuplicateToolName { ref agent, ref tool } if agent == "Main" && tool == "echo"
        ));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_specs_keep_registration_order() {
        let mut registry = ToolRegistry::new("Main");
        registry.register(echo("zeta")).unwrap();
        registry.register(echo("alpha")).unwrap();
        let names: Vec<_> = registry.specs().into_iter().map(|s| s.name).collect();
        assert_eq!(names, vec!["zeta", "alpha"]);
    }

    #[tokio::test]
    async fn test_invoke_coerces_arguments() {
        let mut registry = ToolRegistry::new("Main");
        registry.register(echo("echo")).unwrap();
        let out = registry
            .invoke("echo", json!({ "n": "12" }), &scope(RunConfig::default()))
            .await
            .unwrap();
        assert_eq!(out, json!(12));
    }

    #[tokio::test]
    async fn test_invoke_unknown_and_invalid() {
        let mut registry = ToolRegistry::new("Main");
        registry.register(echo("echo")).unwrap();
        let s = scope(RunConfig::default());

        let err = registry.invoke("nope", json!({}), &s).await.unwrap_err();
        assert!(matches!(err, AgentsError::UnknownTool { .. }));

        let err = registry
            .invoke("echo", json!({ "n": "twelve" }), &s)
            .await
            .unwrap_err();
        match err {
            AgentsError::InvalidToolArgs { tool, source } => {
                assert_eq!(tool, "echo");
                assert_eq!(source.path, "$.n");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_tool_timeout_is_retried() {
        let attempts = Arc::new(AtomicUsize::new(0));
        let counter = attempts.clone();
        let flaky: Arc<dyn Tool<()>> = Arc::new(FunctionTool::new(
            "flaky",
            "Slow on the first call",
            Schema::any(),
            move |_args: Value, _ctx: RunContext<()>| {
                let counter = counter.clone();
                async move {
                    if counter.fetch_add(1, Ordering::SeqCst) == 0 {
                        tokio::time::sleep(Duration::from_secs(5)).await;
                    }
                    Ok::<_, BoxError>(json!("done"))
                }
            },
        ));
        let mut registry = ToolRegistry::new("Main");
        registry.register(flaky).unwrap();

        let config = RunConfig::default()
            .with_tool_timeout(Duration::from_millis(20))
            .with_retry(RetryConfig::immediate(1));
        let out = registry
            .invoke("flaky", json!({}), &scope(config))
            .await
            .unwrap();
        assert_eq!(out, json!("done"));
        assert_eq!(attempts.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_tool_errors_are_not_retried() {
        let attempts = Arc::new(AtomicUsize::new(0));
        let counter = attempts.clone();
        let failing: Arc<dyn Tool<()>> = Arc::new(FunctionTool::new(
            "failing",
            "Always fails",
            Schema::any(),
            move |_args: Value, _ctx: RunContext<()>| {
                let counter = counter.clone();
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Err::<Value, BoxError>("disk full".into())
                }
            },
        ));
        let mut registry = ToolRegistry::new("Main");
        registry.register(failing).unwrap();

        let config = RunConfig::default().with_retry(RetryConfig::immediate(3));
        let err = registry
            .invoke("failing", json!({}), &scope(config))
            .await
            .unwrap_err();
        assert!(matches!(err, AgentsError::ToolExecution { .. }));
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_cancelled_scope_short_circuits() {
        let mut registry = ToolRegistry::new("Main");
        registry.register(echo("echo")).unwrap();
        let s = scope(RunConfig::default());
        s.cancellation.cancel();
        let err = registry
            .invoke("echo", json!({ "n": 1 }), &s)
            .await
            .unwrap_err();
        assert!(matches!(err, AgentsError::Cancelled));
    }
}
