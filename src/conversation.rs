//! Conversation state: the ordered record of a run
//!
//! The runner owns one [`ConversationState`] per run and only ever appends
//! to it. Turns carry no timestamps, so two runs driven by the same actions
//! produce equal states.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// One entry of the conversation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Turn {
    /// Input submitted by the caller
    User { content: String },

    /// A final answer produced by an agent
    Assistant { agent: String, content: Value },

    /// A tool call requested by the oracle on behalf of an agent
    ToolCall {
        call_id: String,
        agent: String,
        tool: String,
        arguments: Value,
    },

    /// The outcome of a tool call
    ToolResult {
        call_id: String,
        tool: String,
        output: Value,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },

    /// Control moved from one agent to another
    Handoff {
        call_id: String,
        /// Name of the handoff tool advertised to the oracle
        tool: String,
        from: String,
        to: String,
    },
}

impl Turn {
    pub fn user(content: impl Into<String>) -> Self {
        Turn::User {
            content: content.into(),
        }
    }

    /// The agent that produced this turn, if any.
    pub fn agent(&self) -> Option<&str> {
        match self {
            Turn::Assistant { agent, .. } | Turn::ToolCall { agent, .. } => Some(agent),
            Turn::Handoff { from, .. } => Some(from),
            Turn::User { .. } | Turn::ToolResult { .. } => None,
        }
    }

    /// Text form of the turn's content, as sent to a chat model.
    pub fn content_text(&self) -> String {
        match self {
            Turn::User { content } => content.clone(),
            Turn::Assistant { content, .. } => value_text(content),
            Turn::ToolCall { arguments, .. } => arguments.to_string(),
            Turn::ToolResult { output, error, .. } => match error {
                Some(err) => format!("Error: {err}"),
                None => value_text(output),
            },
            Turn::Handoff { to, .. } => serde_json::json!({ "assistant": to }).to_string(),
        }
    }
}

/// Strings are rendered bare, everything else as compact JSON.
pub fn value_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Append-only conversation of one run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ConversationState {
    turns: Vec<Turn>,
}

impl ConversationState {
    pub fn new() -> Self {
        Self::default()
    }

    /// A state seeded with the caller's input.
    pub fn with_input(input: impl Into<String>) -> Self {
        Self {
            turns: vec![Turn::user(input)],
        }
    }

    pub(crate) fn push(&mut self, turn: Turn) {
        self.turns.push(turn);
    }

    pub fn turns(&self) -> &[Turn] {
        &self.turns
    }

    pub fn len(&self) -> usize {
        self.turns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Turn> {
        self.turns.iter()
    }

    pub fn last(&self) -> Option<&Turn> {
        self.turns.last()
    }

    /// Tool calls in order of appearance, as `(agent, tool)` pairs.
    pub fn tool_calls(&self) -> impl Iterator<Item = (&str, &str)> {
        self.turns.iter().filter_map(|t| match t {
            Turn::ToolCall { agent, tool, .. } => Some((agent.as_str(), tool.as_str())),
            _ => None,
        })
    }

    /// Handoffs in order of appearance, as `(from, to)` pairs.
    pub fn handoffs(&self) -> impl Iterator<Item = (&str, &str)> {
        self.turns.iter().filter_map(|t| match t {
            Turn::Handoff { from, to, .. } => Some((from.as_str(), to.as_str())),
            _ => None,
        })
    }

    pub fn into_turns(self) -> Vec<Turn> {
        self.turns
    }
}

impl<'a> IntoIterator for &'a ConversationState {
    type Item = &'a Turn;
    type IntoIter = std::slice::Iter<'a, Turn>;

    fn into_iter(self) -> Self::IntoIter {
        self.turns.iter()
    }
}
