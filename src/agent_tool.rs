//! Agents used as tools.
//!
//! An [`AgentTool`] runs another agent (or a whole graph) as a nested run and
//! returns only its final output. The calling agent keeps control; none of the
//! nested turns appear in the caller's conversation. By default the nested run
//! shares the caller's [`RunContext`]; [`AgentTool::with_isolated_context`]
//! gives every call a fresh one instead.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tracing::debug;

use crate::agent::Agent;
use crate::context::RunContext;
use crate::conversation::value_text;
use crate::error::{AgentsError, Result};
use crate::graph::AgentGraph;
use crate::schema::Schema;
use crate::tool::{Tool, ToolKind, ToolScope};

type ContextFactory<C> = dyn Fn() -> C + Send + Sync;

/// A tool that delegates to a nested agent run.
pub struct AgentTool<C = ()> {
    name: String,
    description: String,
    graph: AgentGraph<C>,
    start: String,
    schema: Schema,
    isolation: Option<Arc<ContextFactory<C>>>,
}

impl<C> Clone for AgentTool<C> {
    fn clone(&self) -> Self {
        Self {
            name: self.name.clone(),
            description: self.description.clone(),
            graph: self.graph.clone(),
            start: self.start.clone(),
            schema: self.schema.clone(),
            isolation: self.isolation.clone(),
        }
    }
}

impl<C> fmt::Debug for AgentTool<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AgentTool")
            .field("name", &self.name)
            .field("start", &self.start)
            .field("isolated", &self.isolation.is_some())
            .finish()
    }
}

impl<C: Send + 'static> AgentTool<C> {
    /// Runs `graph` from agent `start` whenever the tool is called.
    pub fn new(
        graph: AgentGraph<C>,
        start: impl Into<String>,
        name: impl Into<String>,
        description: impl Into<String>,
    ) -> Result<Self> {
        let start = start.into();
        graph.get(&start)?;
        Ok(Self {
            name: name.into(),
            description: description.into(),
            graph,
            start,
            schema: Schema::single_string("input", "The input to send to the agent"),
            isolation: None,
        })
    }

    /// Wraps a single agent, which must not declare handoffs.
    pub fn from_agent(
        agent: impl Into<Arc<Agent<C>>>,
        name: impl Into<String>,
        description: impl Into<String>,
    ) -> Result<Self> {
        let agent = agent.into();
        let start = agent.name().to_string();
        Self::new(AgentGraph::single(agent)?, start, name, description)
    }

    /// Runs every call with a fresh context from `factory` instead of the
    /// caller's.
    pub fn with_isolated_context<F>(mut self, factory: F) -> Self
    where
        F: Fn() -> C + Send + Sync + 'static,
    {
        self.isolation = Some(Arc::new(factory));
        self
    }
}

impl<C: Send + 'static> Agent<C> {
    /// Exposes this agent to other agents as a tool.
    pub fn as_tool(
        self,
        name: impl Into<String>,
        description: impl Into<String>,
    ) -> Result<AgentTool<C>> {
        AgentTool::from_agent(self, name, description)
    }
}

#[async_trait]
impl<C: Send + 'static> Tool<C> for AgentTool<C> {
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
        ToolKind::Agent
    }

    async fn invoke(&self, args: Value, scope: &ToolScope<C>) -> Result<Value> {
        let input = args.get("input").map(value_text).unwrap_or_default();
        let context = match &self.isolation {
            Some(factory) => RunContext::new(factory()),
            None => scope.context.clone(),
        };
        debug!(tool = %self.name, agent = %self.start, caller = %scope.agent, "Starting nested run");

        let outcome = scope
            .runner
            .run_with_cancellation(
                &self.graph,
                &self.start,
                input,
                context,
                scope.cancellation.child_token(),
            )
            .await;
        match outcome {
            Ok(result) => Ok(result.final_output),
            Err(error) if error.is_cancelled() => Err(AgentsError::Cancelled),
            Err(error) => Err(AgentsError::tool_execution(self.name.clone(), error)),
        }
    }
}
