//! Oracle abstraction: the reasoning component that picks the next action
//!
//! The runner asks an [`Oracle`] what to do next and receives one [`Action`]:
//! call a tool, hand off to another agent, or answer. The request only holds
//! what the active agent may see; the run context is never part of it.
//! Oracles do not validate anything; the runner checks every action.

use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::conversation::ConversationState;
use crate::error::{AgentsError, Result};
use crate::result::StreamEvent;
use crate::schema::Schema;
use crate::tool::ToolSpec;
use crate::usage::Usage;

/// Model parameters configured on an agent.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ModelSettings {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
}

/// A handoff as advertised to the oracle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HandoffSpec {
    pub target: String,
    pub tool_name: String,
    pub description: String,
}

/// Everything the oracle is told about the current turn.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OracleRequest {
    pub agent: String,
    pub instructions: String,
    pub conversation: ConversationState,
    pub tools: Vec<ToolSpec>,
    pub handoffs: Vec<HandoffSpec>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_schema: Option<Schema>,
    #[serde(default)]
    pub settings: ModelSettings,
}

/// The next step proposed by the oracle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum Action {
    ToolCall {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        call_id: Option<String>,
        name: String,
        arguments: Value,
    },
    Handoff {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        call_id: Option<String>,
        target: String,
    },
    FinalAnswer {
        content: Value,
    },
}

impl Action {
    pub fn tool_call(name: impl Into<String>, arguments: Value) -> Self {
        Action::ToolCall {
            call_id: None,
            name: name.into(),
            arguments,
        }
    }

    pub fn handoff(target: impl Into<String>) -> Self {
        Action::Handoff {
            call_id: None,
            target: target.into(),
        }
    }

    pub fn final_answer(content: Value) -> Self {
        Action::FinalAnswer { content }
    }

    /// A plain-text final answer.
    pub fn text(text: impl Into<String>) -> Self {
        Action::FinalAnswer {
            content: Value::String(text.into()),
        }
    }

    /// Sets the call id of a tool call or handoff.
    pub fn with_call_id(mut self, id: impl Into<String>) -> Self {
        match &mut self {
            Action::ToolCall { call_id, .. } | Action::Handoff { call_id, .. } => {
                *call_id = Some(id.into());
            }
            Action::FinalAnswer { .. } => {}
        }
        self
    }
}

/// An action plus the usage of the call that produced it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Proposal {
    pub action: Action,
    #[serde(default)]
    pub usage: Usage,
}

impl Proposal {
    pub fn new(action: Action) -> Self {
        Self {
            action,
            usage: Usage::request(),
        }
    }

    pub fn with_usage(mut self, usage: Usage) -> Self {
        self.usage = usage;
        self
    }
}

/// Forwards text deltas of a streamed oracle call to the run's event stream.
///
/// Clones share their bookkeeping: how long emitting has waited on a slow
/// consumer, and whether any delta was delivered.
#[derive(Clone)]
pub struct DeltaSink {
    tx: mpsc::Sender<StreamEvent>,
    agent: String,
    cancellation: CancellationToken,
    backlog: Arc<Mutex<Backlog>>,
}

#[derive(Debug, Default)]
struct Backlog {
    waited: Duration,
    blocked_since: Option<Instant>,
    delivered: bool,
}

impl fmt::Debug for DeltaSink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeltaSink")
            .field("agent", &self.agent)
            .finish()
    }
}

impl DeltaSink {
    pub(crate) fn new(
        tx: mpsc::Sender<StreamEvent>,
        agent: impl Into<String>,
        cancellation: CancellationToken,
    ) -> Self {
        Self {
            tx,
            agent: agent.into(),
            cancellation,
            backlog: Arc::default(),
        }
    }

    /// Emits one text delta, waiting while the consumer is behind.
    pub async fn emit(&self, delta: impl Into<String>) -> Result<()> {
        if self.cancellation.is_cancelled() {
            return Err(AgentsError::Cancelled);
        }
        let event = StreamEvent::TextDelta {
            agent: self.agent.clone(),
            delta: delta.into(),
        };
        let event = match self.tx.try_send(event) {
            Ok(()) => {
                self.backlog().delivered = true;
                return Ok(());
            }
            Err(TrySendError::Closed(_)) => return Err(AgentsError::Cancelled),
            Err(TrySendError::Full(event)) => event,
        };

        self.backlog().blocked_since = Some(Instant::now());
        let sent = tokio::select! {
            biased;
            _ = self.cancellation.cancelled() => Err(AgentsError::Cancelled),
            sent = self.tx.send(event) => sent.map_err(|_| AgentsError::Cancelled),
        };
        let mut backlog = self.backlog();
        if let Some(since) = backlog.blocked_since.take() {
            backlog.waited += since.elapsed();
        }
        backlog.delivered |= sent.is_ok();
        sent
    }

    /// Total time spent blocked on the consumer, including a wait in progress.
    pub fn waited(&self) -> Duration {
        let backlog = self.backlog();
        backlog.waited + backlog.blocked_since.map_or(Duration::ZERO, |since| since.elapsed())
    }

    /// Whether any delta has reached the consumer.
    pub fn delivered(&self) -> bool {
        self.backlog().delivered
    }

    fn backlog(&self) -> MutexGuard<'_, Backlog> {
        self.backlog
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// The reasoning component consulted once per turn.
#[async_trait]
pub trait Oracle: Send + Sync {
    /// Name used for usage accounting when the agent sets no model
    fn name(&self) -> &str {
        "oracle"
    }

    async fn propose(&self, request: &OracleRequest) -> Result<Proposal>;

    /// Like [`Oracle::propose`], forwarding text to `sink` as it is produced.
    ///
    /// The default emits a text final answer as a single delta.
    async fn propose_streaming(
        &self,
        request: &OracleRequest,
        sink: &DeltaSink,
    ) -> Result<Proposal> {
        let proposal = self.propose(request).await?;
        if let Action::FinalAnswer {
            content: Value::String(text),
        } = &proposal.action
        {
            sink.emit(text.clone()).await?;
        }
        Ok(proposal)
    }
}

#[derive(Default)]
struct Script {
    global: VecDeque<Action>,
    per_agent: HashMap<String, VecDeque<Action>>,
    repeat: Option<Action>,
    usage: Option<Usage>,
    requests: Vec<OracleRequest>,
}

/// An oracle that replays a fixed script of actions.
///
/// Actions queued for a specific agent take precedence over the global queue;
/// once both are empty the repeat action (if any) is returned forever. An
/// exhausted script fails with [`AgentsError::MalformedOracleResponse`].
///
/// ```rust
/// use agents_runtime::{Action, ScriptedOracle};
/// use serde_json::json;
///
/// let oracle = ScriptedOracle::new()
///     .then(Action::tool_call("random_number", json!({ "max": 100 })))
///     .then(Action::handoff("Multiply"))
///     .then_for("Multiply", Action::final_answer(json!({ "result": 86 })));
/// # let _ = oracle;
/// ```
#[derive(Default)]
pub struct ScriptedOracle {
    script: Mutex<Script>,
}

impl fmt::Debug for ScriptedOracle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScriptedOracle").finish()
    }
}

impl ScriptedOracle {
    pub fn new() -> Self {
        Self::default()
    }

    fn script_mut(&mut self) -> &mut Script {
        self.script
            .get_mut()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Queues an action for whichever agent asks next.
    pub fn then(mut self, action: Action) -> Self {
        self.script_mut().global.push_back(action);
        self
    }

    /// Queues an action for a specific agent.
    pub fn then_for(mut self, agent: impl Into<String>, action: Action) -> Self {
        self.script_mut()
            .per_agent
            .entry(agent.into())
            .or_default()
            .push_back(action);
        self
    }

    /// Action returned once the queues are exhausted.
    pub fn repeat(mut self, action: Action) -> Self {
        self.script_mut().repeat = Some(action);
        self
    }

    /// Usage reported with every proposal.
    pub fn with_usage(mut self, usage: Usage) -> Self {
        self.script_mut().usage = Some(usage);
        self
    }

    /// Every request received so far, in order.
    pub fn requests(&self) -> Vec<OracleRequest> {
        self.lock().requests.clone()
    }

    pub fn request_count(&self) -> usize {
        self.lock().requests.len()
    }

    fn lock(&self) -> MutexGuard<'_, Script> {
        self.script
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn next_action(&self, request: &OracleRequest) -> Result<Proposal> {
        let mut script = self.lock();
        script.requests.push(request.clone());
        let action = script
            .per_agent
            .get_mut(&request.agent)
            .and_then(VecDeque::pop_front)
            .or_else(|| script.global.pop_front())
            .or_else(|| script.repeat.clone())
            .ok_or_else(|| AgentsError::MalformedOracleResponse {
                message: format!("script exhausted for agent `{}`", request.agent),
            })?;
        let usage = script.usage.clone().unwrap_or_else(Usage::request);
        Ok(Proposal::new(action).with_usage(usage))
    }
}

#[async_trait]
impl Oracle for ScriptedOracle {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn propose(&self, request: &OracleRequest) -> Result<Proposal> {
        self.next_action(request)
    }

    async fn propose_streaming(
        &self,
        request: &OracleRequest,
        sink: &DeltaSink,
    ) -> Result<Proposal> {
        let proposal = self.next_action(request)?;
        if let Action::FinalAnswer {
            content: Value::String(text),
        } = &proposal.action
        {
            for word in text.split_inclusive(' ') {
                sink.emit(word).await?;
            }
        }
        Ok(proposal)
    }
}
