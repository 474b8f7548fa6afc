//! Result types for agent execution

use std::pin::Pin;
use std::task::{Context, Poll};

use chrono::{DateTime, Utc};
use futures::{Stream, StreamExt};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::sync::{CancellationToken, DropGuard};

use crate::conversation::{value_text, ConversationState};
use crate::error::{AgentsError, ErrorKind, Result};
use crate::handoff::HandoffEvent;
use crate::usage::UsageStats;

/// The outcome of a successful run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunResult {
    pub run_id: String,
    /// The validated final answer of the last agent
    pub final_output: Value,
    /// Id of the agent that produced the final answer
    pub last_agent: String,
    /// Every turn of the run, starting with the caller's input
    pub history: ConversationState,
    pub handoffs: Vec<HandoffEvent>,
    /// Number of oracle turns taken
    pub turns: usize,
    pub usage: UsageStats,
    pub started_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
}

impl RunResult {
    /// Deserializes the final output into `T`.
    pub fn final_output_as<T: DeserializeOwned>(&self) -> Result<T> {
        Ok(serde_json::from_value(self.final_output.clone())?)
    }

    /// The final output as text; strings are returned without quotes.
    pub fn final_output_text(&self) -> String {
        value_text(&self.final_output)
    }
}

/// A failed run.
///
/// `state` is the conversation as of the last completed step; a step that
/// failed halfway leaves no trace in it.
#[derive(Debug, thiserror::Error)]
#[error("run {run_id} failed in agent `{last_agent}` after {turns} turn(s): {error}")]
pub struct RunError {
    pub run_id: String,
    pub kind: ErrorKind,
    #[source]
    pub error: AgentsError,
    pub last_agent: String,
    pub state: ConversationState,
    pub turns: usize,
}

impl RunError {
    pub(crate) fn new(
        run_id: impl Into<String>,
        error: AgentsError,
        last_agent: impl Into<String>,
        state: ConversationState,
        turns: usize,
    ) -> Self {
        Self {
            run_id: run_id.into(),
            kind: error.kind(),
            error,
            last_agent: last_agent.into(),
            state,
            turns,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.kind == ErrorKind::Cancelled
    }

    pub fn into_error(self) -> AgentsError {
        self.error
    }
}

/// Progress reported by a streamed run, in step order.
#[derive(Debug)]
pub enum StreamEvent {
    /// A piece of final-answer text as the oracle produces it
    TextDelta { agent: String, delta: String },
    ToolCallStarted {
        call_id: String,
        agent: String,
        tool: String,
        arguments: Value,
    },
    ToolCallCompleted {
        call_id: String,
        agent: String,
        tool: String,
        output: Value,
        error: Option<String>,
    },
    HandoffOccurred(HandoffEvent),
    RunCompleted(RunResult),
    RunFailed(RunError),
}

impl StreamEvent {
    /// Whether this is the last event of a run.
    pub fn is_terminal(&self) -> bool {
        matches!(self, StreamEvent::RunCompleted(_) | StreamEvent::RunFailed(_))
    }
}

/// A run in progress, consumed as a [`Stream`] of [`StreamEvent`]s.
///
/// The stream ends with exactly one [`StreamEvent::RunCompleted`] or
/// [`StreamEvent::RunFailed`]. Dropping it cancels the run.
pub struct StreamedRun {
    run_id: String,
    last_agent: String,
    events: ReceiverStream<StreamEvent>,
    cancel: CancellationToken,
    _guard: DropGuard,
    finished: bool,
}

impl std::fmt::Debug for StreamedRun {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamedRun")
            .field("run_id", &self.run_id)
            .field("last_agent", &self.last_agent)
            .field("finished", &self.finished)
            .finish()
    }
}

impl StreamedRun {
    pub(crate) fn new(
        run_id: String,
        start_agent: String,
        events: ReceiverStream<StreamEvent>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            run_id,
            last_agent: start_agent,
            events,
            _guard: cancel.clone().drop_guard(),
            cancel,
            finished: false,
        }
    }

    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    /// Requests cancellation; the stream then ends with a cancelled
    /// [`StreamEvent::RunFailed`].
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Drains the remaining events and returns the outcome of the run.
    pub async fn into_result(mut self) -> std::result::Result<RunResult, RunError> {
        while let Some(event) = self.next().await {
            match event {
                StreamEvent::RunCompleted(result) => return Ok(result),
                StreamEvent::RunFailed(error) => return Err(error),
                _ => {}
            }
        }
        Err(self.interrupted())
    }

    fn interrupted(&self) -> RunError {
        RunError::new(
            self.run_id.clone(),
            AgentsError::StreamInterrupted,
            self.last_agent.clone(),
            ConversationState::new(),
            0,
        )
    }
}

impl Stream for StreamedRun {
    type Item = StreamEvent;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<StreamEvent>> {
        if self.finished {
            return Poll::Ready(None);
        }
        match Pin::new(&mut self.events).poll_next(cx) {
            Poll::Ready(Some(event)) => {
                if let StreamEvent::HandoffOccurred(handoff) = &event {
                    self.last_agent = handoff.to_agent.clone();
                }
                if event.is_terminal() {
                    self.finished = true;
                }
                Poll::Ready(Some(event))
            }
            // The producer went away without a terminal event.
            Poll::Ready(None) => {
                self.finished = true;
                Poll::Ready(Some(StreamEvent::RunFailed(self.interrupted())))
            }
            Poll::Pending => Poll::Pending,
        }
    }
}
