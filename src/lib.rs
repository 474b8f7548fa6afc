//! # agents-runtime
//!
//! A Tower-based runtime for multi-agent workflows. Agents call tools, hand
//! control to each other, run other agents as tools and return validated
//! structured output, while a pluggable [`Oracle`] decides what happens next.
//!
//! ## Core Concepts
//!
//! - **Agent**: instructions, tools, handoffs and an optional output schema
//! - **AgentGraph**: the agents a run can reach, keyed by id
//! - **Tool**: a local function, a hosted capability or another agent
//! - **Oracle**: the reasoning component that proposes the next action
//! - **Runner**: drives a run to its final answer, blocking, async or streamed
//! - **RunContext**: caller-owned state shared by tools, instructions and
//!   handoff callbacks, never shown to the oracle
//!
//! ## Getting Started
//!
//! ```rust
//! use agents_runtime::{Action, Agent, AgentGraph, FunctionTool, Handoff, RunContext, Runner, ScriptedOracle};
//! use schemars::JsonSchema;
//! use serde::Deserialize;
//! use serde_json::json;
//!
//! #[derive(Deserialize, JsonSchema)]
//! struct Multiply {
//!     value: i64,
//! }
//!
//! let first: Agent = Agent::builder("First")
//!     .instructions("Pick a number, then hand off.")
//!     .handoff(Handoff::to("Doubler"))
//!     .build()
//!     .unwrap();
//! let doubler: Agent = Agent::builder("Doubler")
//!     .instructions("Double the number.")
//!     .tool(FunctionTool::from_fn("double", "Doubles a value", |args: Multiply| {
//!         Ok(args.value * 2)
//!     }))
//!     .build()
//!     .unwrap();
//! let graph = AgentGraph::builder().agent(first).agent(doubler).build().unwrap();
//!
//! let oracle = ScriptedOracle::new()
//!     .then(Action::handoff("Doubler"))
//!     .then(Action::tool_call("double", json!({ "value": 21 })))
//!     .then(Action::final_answer(json!(42)));
//!
//! let result = Runner::new(oracle)
//!     .run_blocking(&graph, "First", "Go", RunContext::empty())
//!     .unwrap();
//! assert_eq!(result.final_output, json!(42));
//! assert_eq!(result.last_agent, "Doubler");
//! ```
//!
//! Against a real model, use [`OpenAIOracle`] with an explicit
//! [`OracleConfig`] (for example [`OracleConfig::from_env`]).

pub mod agent;
pub mod agent_tool;
pub mod config;
pub mod context;
pub mod conversation;
pub mod error;
pub mod graph;
pub mod handoff;
pub mod openai;
pub mod oracle;
pub mod registry;
pub mod result;
pub mod retry;
pub mod runner;
pub mod schema;
pub mod service;
pub mod tool;
pub mod usage;

pub use agent::{Agent, AgentBuilder, InstructionPolicy, ToolErrorPolicy};
pub use agent_tool::AgentTool;
pub use config::{OracleConfig, RetryConfig, RunConfig};
pub use context::RunContext;
pub use conversation::{ConversationState, Turn};
pub use error::{AgentsError, ErrorKind, Result};
pub use graph::{AgentGraph, AgentGraphBuilder};
pub use handoff::{Handoff, HandoffCallback, HandoffEvent, HandoffResolver};
pub use openai::OpenAIOracle;
pub use oracle::{
    Action, DeltaSink, HandoffSpec, ModelSettings, Oracle, OracleRequest, Proposal,
    ScriptedOracle,
};
pub use registry::ToolRegistry;
pub use result::{RunError, RunResult, StreamEvent, StreamedRun};
pub use runner::{RunOutcome, Runner};
pub use schema::{Schema, SchemaValidationError};
pub use tool::{FunctionTool, HostedService, HostedTool, Tool, ToolKind, ToolScope, ToolSpec};
pub use usage::{Usage, UsageStats};

pub use agents_runtime_derive::{output_type, tool_args};

// Re-export Tower traits that users need
pub use tower::{BoxError, Layer, Service, ServiceExt};
