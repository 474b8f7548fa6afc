//! Error types for the orchestration runtime

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tower::BoxError;

use crate::schema::SchemaValidationError;

/// Result type alias for the runtime
pub type Result<T> = std::result::Result<T, AgentsError>;

/// Coarse classification of every [`AgentsError`].
///
/// The kind decides how the runner treats a failure: configuration errors
/// surface while building agents, external-service errors may be retried,
/// everything else terminates the run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Configuration,
    Validation,
    ExternalService,
    UnknownHandoffTarget,
    MaxTurnsExceeded,
    Cancelled,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ErrorKind::Configuration => "configuration",
            ErrorKind::Validation => "validation",
            ErrorKind::ExternalService => "external_service",
            ErrorKind::UnknownHandoffTarget => "unknown_handoff_target",
            ErrorKind::MaxTurnsExceeded => "max_turns_exceeded",
            ErrorKind::Cancelled => "cancelled",
        };
        f.write_str(s)
    }
}

/// Main error type for the runtime
#[derive(Debug, Error)]
pub enum AgentsError {
    /// Two tools (or a tool and a handoff) share a name within one agent
    #[error("Duplicate tool name `{tool}` in agent `{agent}`")]
    DuplicateToolName { agent: String, tool: String },

    /// Two agents share an id within one graph
    #[error("Duplicate agent id `{agent}`")]
    DuplicateAgent { agent: String },

    /// A handoff points at an agent that is not part of the graph
    #[error("Agent `{agent}` hands off to `{target}`, which is not in the graph")]
    UnwiredHandoffTarget { agent: String, target: String },

    /// The requested agent id does not exist in the graph
    #[error("Unknown agent `{agent}`")]
    UnknownAgent { agent: String },

    /// Any other construction-time problem
    #[error("Invalid configuration: {message}")]
    InvalidConfiguration { message: String },

    /// Tool arguments did not match the tool's input schema
    #[error("Invalid arguments for tool `{tool}`: {source}")]
    InvalidToolArgs {
        tool: String,
        #[source]
        source: SchemaValidationError,
    },

    /// The oracle asked for a tool the active agent does not have
    #[error("Agent `{agent}` has no tool named `{tool}`")]
    UnknownTool { agent: String, tool: String },

    /// A final answer did not match the active agent's output schema
    #[error("Final output of agent `{agent}` does not match its output schema: {source}")]
    OutputSchemaMismatch {
        agent: String,
        #[source]
        source: SchemaValidationError,
    },

    /// The tool itself failed
    #[error("Tool `{tool}` failed: {source}")]
    ToolExecution {
        tool: String,
        #[source]
        source: BoxError,
    },

    /// Transport failure of a remote collaborator (hosted tool, oracle backend)
    #[error("External service `{service}` failed: {message}")]
    ExternalService { service: String, message: String },

    /// An oracle call or tool invocation did not finish in time
    #[error("{operation} timed out after {after:?}")]
    Timeout { operation: String, after: Duration },

    /// Error from the OpenAI API
    #[error("OpenAI API error: {0}")]
    OpenAI(#[from] async_openai::error::OpenAIError),

    /// The oracle answered with something that is not an action
    #[error("Malformed oracle response: {message}")]
    MalformedOracleResponse { message: String },

    /// The oracle asked to hand off to an agent the active agent is not wired to
    #[error("Agent `{agent}` cannot hand off to `{target}`")]
    UnknownHandoffTarget { agent: String, target: String },

    /// Maximum turns exceeded
    #[error("Maximum turns exceeded: {max_turns}")]
    MaxTurnsExceeded { max_turns: usize },

    /// The run was cancelled from outside
    #[error("Run cancelled")]
    Cancelled,

    /// A streamed run ended without a terminal event
    #[error("Event stream ended before the run finished")]
    StreamInterrupted,

    /// Serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl AgentsError {
    /// Classifies this error into the runtime's taxonomy.
    pub fn kind(&self) -> ErrorKind {
        match self {
            AgentsError::DuplicateToolName { .. }
            | AgentsError::DuplicateAgent { .. }
            | AgentsError::UnwiredHandoffTarget { .. }
            | AgentsError::UnknownAgent { .. }
            | AgentsError::InvalidConfiguration { .. } => ErrorKind::Configuration,
            AgentsError::InvalidToolArgs { .. }
            | AgentsError::UnknownTool { .. }
            | AgentsError::OutputSchemaMismatch { .. }
            | AgentsError::Serialization(_) => ErrorKind::Validation,
            AgentsError::ToolExecution { .. }
            | AgentsError::ExternalService { .. }
            | AgentsError::Timeout { .. }
            | AgentsError::OpenAI(_)
            | AgentsError::MalformedOracleResponse { .. }
            | AgentsError::StreamInterrupted
            | AgentsError::Io(_) => ErrorKind::ExternalService,
            AgentsError::UnknownHandoffTarget { .. } => ErrorKind::UnknownHandoffTarget,
            AgentsError::MaxTurnsExceeded { .. } => ErrorKind::MaxTurnsExceeded,
            AgentsError::Cancelled => ErrorKind::Cancelled,
        }
    }

    /// Whether a retry policy may re-attempt the failed operation.
    ///
    /// Only transport-level failures qualify. A tool that raised an error is
    /// not retried: its failure is part of the action's content.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            AgentsError::ExternalService { .. }
                | AgentsError::Timeout { .. }
                | AgentsError::OpenAI(_)
                | AgentsError::MalformedOracleResponse { .. }
        )
    }

    /// Errors a tool-error-tolerant agent may report back to the oracle
    /// instead of terminating the run.
    pub fn is_recoverable_tool_error(&self) -> bool {
        matches!(
            self,
            AgentsError::ToolExecution { .. }
                | AgentsError::ExternalService { .. }
                | AgentsError::Timeout { .. }
        )
    }

    pub(crate) fn tool_execution(tool: impl Into<String>, source: impl Into<BoxError>) -> Self {
        AgentsError::ToolExecution {
            tool: tool.into(),
            source: source.into(),
        }
    }
}
