//! # Agent (orientation)
//!
//! An [`Agent`] is a configured participant in a run: an id, instructions, the
//! tools it may call, the agents it may hand off to, and optionally the shape
//! of its final answer. Agents are immutable once built and shared as
//! `Arc<Agent<C>>` between runs; `C` is the type of the run context their
//! tools and instruction policies see.
//!
//! Agents are built with [`AgentBuilder`]. Registration errors (for example
//! two tools with the same name) are reported by [`AgentBuilder::build`].
//!
//! ```rust
//! use agents_runtime::{Agent, FunctionTool, RunContext};
//! use schemars::JsonSchema;
//! use serde::Deserialize;
//!
//! #[derive(Deserialize, JsonSchema)]
//! struct Max {
//!     max: u32,
//! }
//!
//! let agent: Agent = Agent::builder("Random")
//!     .instructions("Pick a random number, then hand off.")
//!     .tool(FunctionTool::from_fn("random_number", "A number up to max", |args: Max| {
//!         Ok(args.max / 2)
//!     }))
//!     .build()
//!     .unwrap();
//!
//! assert_eq!(agent.instructions(&RunContext::empty()), "Pick a random number, then hand off.");
//! ```

use std::fmt;
use std::sync::Arc;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::context::RunContext;
use crate::error::{AgentsError, Result};
use crate::handoff::Handoff;
use crate::oracle::ModelSettings;
use crate::registry::ToolRegistry;
use crate::schema::Schema;
use crate::tool::Tool;

type InstructionFn<C> = dyn Fn(&RunContext<C>, &Agent<C>) -> String + Send + Sync;

/// How an agent's instructions are produced each turn.
pub enum InstructionPolicy<C = ()> {
    Static(String),
    /// Computed from the run context and the agent on every turn
    Derived(Arc<InstructionFn<C>>),
}

impl<C> Clone for InstructionPolicy<C> {
    fn clone(&self) -> Self {
        match self {
            InstructionPolicy::Static(text) => InstructionPolicy::Static(text.clone()),
            InstructionPolicy::Derived(f) => InstructionPolicy::Derived(Arc::clone(f)),
        }
    }
}

impl<C> fmt::Debug for InstructionPolicy<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InstructionPolicy::Static(text) => f.debug_tuple("Static").field(text).finish(),
            InstructionPolicy::Derived(_) => f.write_str("Derived(..)"),
        }
    }
}

impl<C> Default for InstructionPolicy<C> {
    fn default() -> Self {
        InstructionPolicy::Static(String::new())
    }
}

/// What the runner does when a tool call fails.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolErrorPolicy {
    /// Any tool failure ends the run
    #[default]
    Fail,
    /// Execution failures, timeouts and external-service errors are appended
    /// to the conversation as a failed tool result and the run continues.
    /// Validation errors and cancellation still end the run.
    ReportToOracle,
}

/// An agent definition.
pub struct Agent<C = ()> {
    name: String,
    instructions: InstructionPolicy<C>,
    handoff_description: Option<String>,
    tools: ToolRegistry<C>,
    handoffs: Vec<Handoff<C>>,
    output_schema: Option<Schema>,
    tool_error_policy: ToolErrorPolicy,
    settings: ModelSettings,
}

impl<C> Clone for Agent<C> {
    fn clone(&self) -> Self {
        Self {
            name: self.name.clone(),
            instructions: self.instructions.clone(),
            handoff_description: self.handoff_description.clone(),
            tools: self.tools.clone(),
            handoffs: self.handoffs.clone(),
            output_schema: self.output_schema.clone(),
            tool_error_policy: self.tool_error_policy,
            settings: self.settings.clone(),
        }
    }
}

impl<C> fmt::Debug for Agent<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Agent")
            .field("name", &self.name)
            .field("instructions", &self.instructions)
            .field("tools", &self.tools)
            .field("handoffs", &self.handoffs)
            .field("output_schema", &self.output_schema.is_some())
            .field("tool_error_policy", &self.tool_error_policy)
            .field("settings", &self.settings)
            .finish()
    }
}

impl<C: Send + 'static> Agent<C> {
    /// Starts building an agent; `name` is also its id within a graph.
    pub fn builder(name: impl Into<String>) -> AgentBuilder<C> {
        AgentBuilder::new(name)
    }
}

impl<C> Agent<C> {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Evaluates the instruction policy against `context`.
    pub fn instructions(&self, context: &RunContext<C>) -> String {
        match &self.instructions {
            InstructionPolicy::Static(text) => text.clone(),
            InstructionPolicy::Derived(f) => f(context, self),
        }
    }

    pub fn instruction_policy(&self) -> &InstructionPolicy<C> {
        &self.instructions
    }

    /// Shown to other agents when this agent is a handoff target.
    pub fn handoff_description(&self) -> Option<&str> {
        self.handoff_description.as_deref()
    }

    pub fn tools(&self) -> &ToolRegistry<C> {
        &self.tools
    }

    pub fn handoffs(&self) -> &[Handoff<C>] {
        &self.handoffs
    }

    pub fn output_schema(&self) -> Option<&Schema> {
        self.output_schema.as_ref()
    }

    pub fn tool_error_policy(&self) -> ToolErrorPolicy {
        self.tool_error_policy
    }

    pub fn settings(&self) -> &ModelSettings {
        &self.settings
    }

    /// The handoff named by `requested`, either its target id or its tool name.
    pub fn find_handoff(&self, requested: &str) -> Option<&Handoff<C>> {
        self.handoffs.iter().find(|h| h.matches(requested))
    }
}

/// Builder for [`Agent`].
pub struct AgentBuilder<C = ()> {
    name: String,
    instructions: InstructionPolicy<C>,
    handoff_description: Option<String>,
    tools: ToolRegistry<C>,
    handoffs: Vec<Handoff<C>>,
    output_schema: Option<Schema>,
    tool_error_policy: ToolErrorPolicy,
    settings: ModelSettings,
    error: Option<AgentsError>,
}

impl<C: Send + 'static> AgentBuilder<C> {
    fn new(name: impl Into<String>) -> Self {
        let name = name.into();
        Self {
            tools: ToolRegistry::new(name.clone()),
            name,
            instructions: InstructionPolicy::default(),
            handoff_description: None,
            handoffs: Vec::new(),
            output_schema: None,
            tool_error_policy: ToolErrorPolicy::default(),
            settings: ModelSettings::default(),
            error: None,
        }
    }

    pub fn instructions(mut self, instructions: impl Into<String>) -> Self {
        self.instructions = InstructionPolicy::Static(instructions.into());
        self
    }

    /// Instructions computed from the run context on every turn.
    pub fn instructions_fn<F>(mut self, f: F) -> Self
    where
        F: Fn(&RunContext<C>, &Agent<C>) -> String + Send + Sync + 'static,
    {
        self.instructions = InstructionPolicy::Derived(Arc::new(f));
        self
    }

    pub fn handoff_description(mut self, description: impl Into<String>) -> Self {
        self.handoff_description = Some(description.into());
        self
    }

    pub fn tool(self, tool: impl Tool<C> + 'static) -> Self {
        self.tool_arc(Arc::new(tool))
    }

    pub fn tool_arc(mut self, tool: Arc<dyn Tool<C>>) -> Self {
        if self.error.is_none() {
            if let Err(e) = self.tools.register(tool) {
                self.error = Some(e);
            }
        }
        self
    }

    pub fn handoff(mut self, handoff: Handoff<C>) -> Self {
        self.handoffs.push(handoff);
        self
    }

    /// Final answers must match the schema derived from `T`.
    pub fn output_type<T: JsonSchema>(self) -> Self {
        self.output_schema(Schema::of::<T>())
    }

    pub fn output_schema(mut self, schema: Schema) -> Self {
        self.output_schema = Some(schema);
        self
    }

    pub fn tool_error_policy(mut self, policy: ToolErrorPolicy) -> Self {
        self.tool_error_policy = policy;
        self
    }

    pub fn model(mut self, model: impl Into<String>) -> Self {
        self.settings.model = Some(model.into());
        self
    }

    pub fn temperature(mut self, temperature: f32) -> Self {
        self.settings.temperature = Some(temperature);
        self
    }

    pub fn max_tokens(mut self, max_tokens: u32) -> Self {
        self.settings.max_tokens = Some(max_tokens);
        self
    }

    /// Finishes the agent.
    ///
    /// Fails with [`AgentsError::DuplicateToolName`] when two tools, two
    /// handoffs, or a tool and a handoff share a name, and with
    /// [`AgentsError::InvalidConfiguration`] for an empty name.
    pub fn build(self) -> Result<Agent<C>> {
        if let Some(e) = self.error {
            return Err(e);
        }
        if self.name.trim().is_empty() {
            return Err(AgentsError::InvalidConfiguration {
                message: "agent name must not be empty".into(),
            });
        }

        let mut seen = std::collections::HashSet::new();
        for handoff in &self.handoffs {
            let tool_name = handoff.tool_name();
            if self.tools.contains(tool_name) || !seen.insert(tool_name) {
                return Err(AgentsError::DuplicateToolName {
                    agent: self.name.clone(),
                    tool: tool_name.to_string(),
                });
            }
        }

        Ok(Agent {
            name: self.name,
            instructions: self.instructions,
            handoff_description: self.handoff_description,
            tools: self.tools,
            handoffs: self.handoffs,
            output_schema: self.output_schema,
            tool_error_policy: self.tool_error_policy,
            settings: self.settings,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tool::FunctionTool;
    use pretty_assertions::assert_eq;
    use serde_json::json;
    use tower::BoxError;

    fn noop(name: &str) -> FunctionTool<u32> {
        FunctionTool::new(name, "Does nothing", Schema::any(), |_args, _ctx| async {
            Ok::<_, BoxError>(json!(null))
        })
    }

    #[test]
    fn test_builder_defaults() {
        let agent: Agent = Agent::builder("Assistant").build().unwrap();
        assert_eq!(agent.name(), "Assistant");
        assert_eq!(agent.instructions(&RunContext::empty()), "");
        assert!(agent.tools().is_empty());
        assert!(agent.output_schema().is_none());
        assert_eq!(agent.tool_error_policy(), ToolErrorPolicy::Fail);
    }

    #[test]
    fn test_duplicate_tool_reported_at_build() {
        let err = Agent::builder("Main")
            .tool(noop("lookup"))
            .tool(noop("lookup"))
            .build()
            .unwrap_err();
        assert!(matches!(err, AgentsError::DuplicateToolName { ref tool, .. } if tool == "lookup"));
    }

    #[test]
    fn test_tool_colliding_with_handoff_rejected() {
        let err = Agent::builder("Main")
            .tool(noop("transfer_to_billing"))
            .handoff(Handoff::to("Billing"))
            .build()
            .unwrap_err();
        assert!(matches!(err, AgentsError::DuplicateToolName { .. }));

        let err = Agent::<u32>::builder("Main")
            .handoff(Handoff::to("Billing"))
            .handoff(Handoff::to("Billing"))
            .build()
            .unwrap_err();
        assert!(matches!(err, AgentsError::DuplicateToolName { .. }));
    }

    #[test]
    fn test_empty_name_rejected() {
        let err = Agent::<()>::builder("  ").build().unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::Configuration);
    }

    #[test]
    fn test_derived_instructions_read_context() {
        let agent = Agent::builder("Poet")
            .instructions_fn(|ctx: &RunContext<String>, agent: &Agent<String>| {
                ctx.read(|style| format!("{} writes a {style}.", agent.name()))
            })
            .build()
            .unwrap();
        let ctx = RunContext::new("haiku".to_string());
        assert_eq!(agent.instructions(&ctx), "Poet writes a haiku.");
        ctx.replace("limerick".to_string());
        assert_eq!(agent.instructions(&ctx), "Poet writes a limerick.");
    }

    #[derive(JsonSchema)]
    #[allow(dead_code)]
    struct Answer {
        result: i64,
    }

    #[test]
    fn test_output_type_and_settings() {
        let agent: Agent = Agent::builder("Math")
            .output_type::<Answer>()
            .model("gpt-4o")
            .temperature(0.2)
            .max_tokens(256)
            .build()
            .unwrap();
        let schema = agent.output_schema().unwrap();
        assert!(schema.validate(&json!({ "result": 86 })).is_ok());
        assert!(schema.validate(&json!({ "value": 86 })).is_err());
        assert_eq!(agent.settings().model.as_deref(), Some("gpt-4o"));
        assert_eq!(agent.settings().max_tokens, Some(256));
    }

    #[test]
    fn test_find_handoff_by_target_or_tool_name() {
        let agent: Agent = Agent::builder("Triage")
            .handoff(Handoff::to("Technical Support"))
            .build()
            .unwrap();
        assert!(agent.find_handoff("Technical Support").is_some());
        assert!(agent.find_handoff("transfer_to_technical_support").is_some());
        assert!(agent.find_handoff("Billing").is_none());
    }
}
