//! # Runner (orientation)
//!
//! The [`Runner`] drives a run: it asks the oracle for the next action on
//! behalf of the active agent, routes tool calls through the registry's tower
//! stack, resolves handoffs against the [`AgentGraph`], and validates the
//! final answer. All execution modes share one loop:
//!
//! - [`Runner::run`] and [`Runner::run_with_cancellation`] await the result,
//! - [`Runner::run_agent`] runs a single agent without a graph,
//! - [`Runner::run_blocking`] builds a Tokio runtime and blocks on `run`,
//! - [`Runner::run_streamed`] reports progress as a stream of events.
//!
//! A run moves through `AwaitingAction → ExecutingTool | TransitioningAgent →
//! AwaitingAction` until it terminates; transitions are logged at `debug`.
//!
//! ```rust
//! use agents_runtime::{Action, Agent, AgentGraph, RunContext, Runner, ScriptedOracle};
//!
//! let agent: Agent = Agent::builder("Echo")
//!     .instructions("Repeat the input.")
//!     .build()
//!     .unwrap();
//! let graph = AgentGraph::single(agent).unwrap();
//! let runner = Runner::new(ScriptedOracle::new().then(Action::text("hello")));
//!
//! let result = runner
//!     .run_blocking(&graph, "Echo", "hello", RunContext::empty())
//!     .unwrap();
//! assert_eq!(result.final_output_text(), "hello");
//! assert_eq!(result.last_agent, "Echo");
//! ```

use std::fmt;
use std::sync::Arc;

use chrono::Utc;
use serde_json::Value;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::sync::CancellationToken;
use tower::util::BoxCloneService;
use tower::{Layer, ServiceExt};
use tracing::{debug, info, info_span, warn, Instrument};
use uuid::Uuid;

use crate::agent::{Agent, ToolErrorPolicy};
use crate::config::RunConfig;
use crate::context::RunContext;
use crate::conversation::{ConversationState, Turn};
use crate::error::{AgentsError, ErrorKind, Result};
use crate::graph::AgentGraph;
use crate::handoff::{default_tool_name, HandoffEvent, HandoffResolver};
use crate::oracle::{Action, DeltaSink, Oracle, OracleRequest, Proposal};
use crate::result::{RunError, RunResult, StreamEvent, StreamedRun};
use crate::service::{CancelLayer, OracleCall, OracleService, RetryLayer, TimeoutLayer};
use crate::tool::ToolScope;
use crate::usage::UsageStats;

/// Outcome of a run.
pub type RunOutcome = std::result::Result<RunResult, RunError>;

type OracleStack = BoxCloneService<OracleCall, Proposal, AgentsError>;

/// Executes runs against an oracle. Cheap to clone and safe to share; holds no
/// per-run state.
#[derive(Clone)]
pub struct Runner {
    oracle: Arc<dyn Oracle>,
    config: Arc<RunConfig>,
}

impl fmt::Debug for Runner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Runner")
            .field("oracle", &self.oracle.name())
            .field("config", &self.config)
            .finish()
    }
}

impl Runner {
    pub fn new(oracle: impl Oracle + 'static) -> Self {
        Self::from_arc(Arc::new(oracle))
    }

    pub fn from_arc(oracle: Arc<dyn Oracle>) -> Self {
        Self {
            oracle,
            config: Arc::new(RunConfig::default()),
        }
    }

    pub fn with_config(mut self, config: RunConfig) -> Self {
        self.config = Arc::new(config);
        self
    }

    pub fn config(&self) -> &RunConfig {
        &self.config
    }

    pub fn oracle(&self) -> &Arc<dyn Oracle> {
        &self.oracle
    }

    /// Runs `graph` starting at agent `start` until a final answer.
    pub async fn run<C: Send + 'static>(
        &self,
        graph: &AgentGraph<C>,
        start: &str,
        input: impl Into<String>,
        context: RunContext<C>,
    ) -> RunOutcome {
        self.run_with_cancellation(graph, start, input, context, CancellationToken::new())
            .await
    }

    /// Like [`Runner::run`]; cancelling `cancellation` fails the run with
    /// [`AgentsError::Cancelled`] at its next suspension point.
    pub async fn run_with_cancellation<C: Send + 'static>(
        &self,
        graph: &AgentGraph<C>,
        start: &str,
        input: impl Into<String>,
        context: RunContext<C>,
        cancellation: CancellationToken,
    ) -> RunOutcome {
        let run_id = Uuid::new_v4().to_string();
        let span = info_span!("agent_run", run_id = %run_id, agent = %start);
        self.drive(
            run_id,
            graph,
            start,
            input.into(),
            context,
            cancellation,
            EventSink::disabled(),
        )
        .instrument(span)
        .await
    }

    /// Runs a single agent. The agent must not declare handoffs.
    pub async fn run_agent<C: Send + 'static>(
        &self,
        agent: impl Into<Arc<Agent<C>>>,
        input: impl Into<String>,
        context: RunContext<C>,
    ) -> RunOutcome {
        let agent = agent.into();
        let start = agent.name().to_string();
        let input = input.into();
        match AgentGraph::single(agent) {
            Ok(graph) => self.run(&graph, &start, input, context).await,
            Err(error) => Err(RunError::new(
                Uuid::new_v4().to_string(),
                error,
                start,
                ConversationState::with_input(input),
                0,
            )),
        }
    }

    /// Blocking form of [`Runner::run`] for callers without an async runtime.
    ///
    /// Must not be called from within a Tokio runtime.
    pub fn run_blocking<C: Send + 'static>(
        &self,
        graph: &AgentGraph<C>,
        start: &str,
        input: impl Into<String>,
        context: RunContext<C>,
    ) -> RunOutcome {
        let input = input.into();
        let runtime = match tokio::runtime::Runtime::new() {
            Ok(runtime) => runtime,
            Err(e) => {
                return Err(RunError::new(
                    Uuid::new_v4().to_string(),
                    AgentsError::Io(e),
                    start,
                    ConversationState::with_input(input),
                    0,
                ))
            }
        };
        runtime.block_on(self.run(graph, start, input, context))
    }

    /// Starts a run in the background and returns its event stream.
    ///
    /// Events pass through a channel of [`RunConfig::stream_buffer`] slots, so
    /// the run pauses while the consumer is behind. Dropping the returned
    /// [`StreamedRun`] cancels the run. Must be called within a Tokio runtime.
    pub fn run_streamed<C: Send + 'static>(
        &self,
        graph: &AgentGraph<C>,
        start: &str,
        input: impl Into<String>,
        context: RunContext<C>,
    ) -> StreamedRun {
        let run_id = Uuid::new_v4().to_string();
        let (tx, rx) = mpsc::channel(self.config.stream_buffer.max(1));
        let cancellation = CancellationToken::new();

        let runner = self.clone();
        let graph = graph.clone();
        let start_agent = start.to_string();
        let input = input.into();
        let sink = EventSink::new(tx.clone(), cancellation.clone());
        let token = cancellation.clone();
        let id = run_id.clone();
        let span = info_span!("agent_run", run_id = %run_id, agent = %start_agent);

        tokio::spawn(
            async move {
                let outcome = runner
                    .drive(id, &graph, &start_agent, input, context, token, sink)
                    .await;
                let terminal = match outcome {
                    Ok(result) => StreamEvent::RunCompleted(result),
                    Err(error) => StreamEvent::RunFailed(error),
                };
                // A dropped consumer has already cancelled the run.
                let _ = tx.send(terminal).await;
            }
            .instrument(span),
        );

        StreamedRun::new(
            run_id,
            start.to_string(),
            ReceiverStream::new(rx),
            cancellation,
        )
    }

    #[allow(clippy::too_many_arguments)]
    async fn drive<C: Send + 'static>(
        &self,
        run_id: String,
        graph: &AgentGraph<C>,
        start: &str,
        input: String,
        context: RunContext<C>,
        cancellation: CancellationToken,
        events: EventSink,
    ) -> RunOutcome {
        let started_at = Utc::now();
        let active = match graph.get(start) {
            Ok(agent) => agent,
            Err(error) => {
                warn!(error = %error, "Cannot start run");
                return Err(RunError::new(
                    run_id,
                    error,
                    start,
                    ConversationState::with_input(input),
                    0,
                ));
            }
        };

        info!(max_turns = self.config.max_turns, "Starting agent run");
        let mut progress = Progress::new(active, input);
        let resolver = HandoffResolver::new(graph, self.config.handoff_callback_timeout);

        loop {
            let step = self
                .step(&mut progress, &resolver, &context, &cancellation, &events)
                .await;
            match step {
                Ok(None) => progress.transition(RunState::AwaitingAction),
                Ok(Some(final_output)) => {
                    progress.transition(RunState::Terminated(Outcome::Success));
                    info!(
                        agent = %progress.active.name(),
                        turns = progress.turns,
                        handoffs = progress.handoffs.len(),
                        "Run completed"
                    );
                    return Ok(RunResult {
                        run_id,
                        final_output,
                        last_agent: progress.active.name().to_string(),
                        history: progress.state,
                        handoffs: progress.handoffs,
                        turns: progress.turns,
                        usage: progress.usage,
                        started_at,
                        completed_at: Utc::now(),
                    });
                }
                Err(error) => {
                    progress.transition(RunState::Terminated(Outcome::Failure(error.kind())));
                    info!(
                        agent = %progress.active.name(),
                        turns = progress.turns,
                        error = %error,
                        "Run failed"
                    );
                    return Err(RunError::new(
                        run_id,
                        error,
                        progress.active.name(),
                        progress.state,
                        progress.turns,
                    ));
                }
            }
        }
    }

    /// One oracle turn. Returns the validated final output once the run is done.
    async fn step<C: Send + 'static>(
        &self,
        progress: &mut Progress<C>,
        resolver: &HandoffResolver<'_, C>,
        context: &RunContext<C>,
        cancellation: &CancellationToken,
        events: &EventSink,
    ) -> Result<Option<Value>> {
        if cancellation.is_cancelled() {
            return Err(AgentsError::Cancelled);
        }
        if progress.turns >= self.config.max_turns {
            return Err(AgentsError::MaxTurnsExceeded {
                max_turns: self.config.max_turns,
            });
        }
        progress.turns += 1;

        let agent = Arc::clone(&progress.active);
        debug!(turn = progress.turns, agent = %agent.name(), "Starting turn");

        let request = OracleRequest {
            agent: agent.name().to_string(),
            instructions: agent.instructions(context),
            conversation: progress.state.clone(),
            tools: agent.tools().specs(),
            handoffs: resolver.specs(&agent),
            output_schema: agent.output_schema().cloned(),
            settings: agent.settings().clone(),
        };
        let proposal = self
            .oracle_stack(cancellation)
            .oneshot(OracleCall {
                request: Arc::new(request),
                sink: events.delta_sink(agent.name()),
            })
            .await?;

        let model = agent
            .settings()
            .model
            .clone()
            .unwrap_or_else(|| self.oracle.name().to_string());
        progress.usage.record(&model, agent.name(), proposal.usage);

        let default_call_id = format!("call_{}", progress.turns);
        match proposal.action {
            Action::ToolCall {
                call_id,
                name,
                arguments,
            } => {
                let call_id = call_id.unwrap_or(default_call_id);
                // Oracles that expose handoffs as tools may pick one here.
                if !agent.tools().contains(&name) && agent.find_handoff(&name).is_some() {
                    self.hand_off(progress, resolver, &agent, &name, call_id, context, cancellation, events)
                        .await?;
                } else {
                    self.call_tool(progress, &agent, name, arguments, call_id, context, cancellation, events)
                        .await?;
                }
                Ok(None)
            }
            Action::Handoff { call_id, target } => {
                let call_id = call_id.unwrap_or(default_call_id);
                self.hand_off(progress, resolver, &agent, &target, call_id, context, cancellation, events)
                    .await?;
                Ok(None)
            }
            Action::FinalAnswer { content } => {
                let content = match agent.output_schema() {
                    Some(schema) => schema.validate(&content).map_err(|source| {
                        AgentsError::OutputSchemaMismatch {
                            agent: agent.name().to_string(),
                            source,
                        }
                    })?,
                    None => content,
                };
                progress.state.push(Turn::Assistant {
                    agent: agent.name().to_string(),
                    content: content.clone(),
                });
                Ok(Some(content))
            }
        }
    }

    #[allow(clippy::too_many_arguments)]
    async fn call_tool<C: Send + 'static>(
        &self,
        progress: &mut Progress<C>,
        agent: &Agent<C>,
        name: String,
        arguments: Value,
        call_id: String,
        context: &RunContext<C>,
        cancellation: &CancellationToken,
        events: &EventSink,
    ) -> Result<()> {
        if !agent.tools().contains(&name) {
            return Err(AgentsError::UnknownTool {
                agent: agent.name().to_string(),
                tool: name,
            });
        }
        progress.transition(RunState::ExecutingTool);

        events
            .emit(StreamEvent::ToolCallStarted {
                call_id: call_id.clone(),
                agent: agent.name().to_string(),
                tool: name.clone(),
                arguments: arguments.clone(),
            })
            .await?;

        let scope = ToolScope {
            context: context.clone(),
            runner: self.clone(),
            cancellation: cancellation.clone(),
            agent: agent.name().to_string(),
            call_id: call_id.clone(),
        };
        let (output, error) = match agent.tools().invoke(&name, arguments.clone(), &scope).await {
            Ok(output) => (output, None),
            Err(e)
                if agent.tool_error_policy() == ToolErrorPolicy::ReportToOracle
                    && e.is_recoverable_tool_error() =>
            {
                warn!(tool = %name, call_id = %call_id, error = %e, "Tool failed; reporting to oracle");
                (Value::Null, Some(e.to_string()))
            }
            Err(e) => return Err(e),
        };

        progress.state.push(Turn::ToolCall {
            call_id: call_id.clone(),
            agent: agent.name().to_string(),
            tool: name.clone(),
            arguments,
        });
        progress.state.push(Turn::ToolResult {
            call_id: call_id.clone(),
            tool: name.clone(),
            output: output.clone(),
            error: error.clone(),
        });

        events
            .emit(StreamEvent::ToolCallCompleted {
                call_id,
                agent: agent.name().to_string(),
                tool: name,
                output,
                error,
            })
            .await
    }

    #[allow(clippy::too_many_arguments)]
    async fn hand_off<C: Send + 'static>(
        &self,
        progress: &mut Progress<C>,
        resolver: &HandoffResolver<'_, C>,
        agent: &Agent<C>,
        requested: &str,
        call_id: String,
        context: &RunContext<C>,
        cancellation: &CancellationToken,
        events: &EventSink,
    ) -> Result<()> {
        progress.transition(RunState::TransitioningAgent);
        let (next, event) = tokio::select! {
            biased;
            _ = cancellation.cancelled() => return Err(AgentsError::Cancelled),
            resolved = resolver.resolve(agent, requested, &call_id, context) => resolved?,
        };

        info!(from = %event.from_agent, to = %event.to_agent, "Handoff");
        let tool = agent
            .find_handoff(requested)
            .map_or_else(|| default_tool_name(&event.to_agent), |h| h.tool_name().to_string());
        progress.state.push(Turn::Handoff {
            call_id,
            tool,
            from: event.from_agent.clone(),
            to: event.to_agent.clone(),
        });
        progress.handoffs.push(event.clone());
        progress.active = next;

        events.emit(StreamEvent::HandoffOccurred(event)).await
    }

    fn oracle_stack(&self, cancellation: &CancellationToken) -> OracleStack {
        let mut svc: OracleStack = BoxCloneService::new(OracleService::new(self.oracle.clone()));
        if let Some(limit) = self.config.oracle_timeout {
            svc = BoxCloneService::new(TimeoutLayer::new(limit, "oracle call").layer(svc));
        }
        if let Some(retry) = &self.config.retry {
            svc = BoxCloneService::new(RetryLayer::new(retry.clone(), "oracle call").layer(svc));
        }
        BoxCloneService::new(CancelLayer::new(cancellation.clone()).layer(svc))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Outcome {
    Success,
    Failure(ErrorKind),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RunState {
    AwaitingAction,
    ExecutingTool,
    TransitioningAgent,
    Terminated(Outcome),
}

struct Progress<C> {
    active: Arc<Agent<C>>,
    state: ConversationState,
    usage: UsageStats,
    handoffs: Vec<HandoffEvent>,
    turns: usize,
    phase: RunState,
}

impl<C> Progress<C> {
    fn new(active: Arc<Agent<C>>, input: String) -> Self {
        Self {
            active,
            state: ConversationState::with_input(input),
            usage: UsageStats::new(),
            handoffs: Vec::new(),
            turns: 0,
            phase: RunState::AwaitingAction,
        }
    }

    fn transition(&mut self, next: RunState) {
        if self.phase != next {
            debug!(from = ?self.phase, to = ?next, agent = %self.active.name(), "Run state");
            self.phase = next;
        }
    }
}

/// Where a run reports its progress; disabled outside streaming.
struct EventSink {
    tx: Option<mpsc::Sender<StreamEvent>>,
    cancellation: CancellationToken,
}

impl EventSink {
    fn new(tx: mpsc::Sender<StreamEvent>, cancellation: CancellationToken) -> Self {
        Self {
            tx: Some(tx),
            cancellation,
        }
    }

    fn disabled() -> Self {
        Self {
            tx: None,
            cancellation: CancellationToken::new(),
        }
    }

    fn delta_sink(&self, agent: &str) -> Option<DeltaSink> {
        self.tx
            .as_ref()
            .map(|tx| DeltaSink::new(tx.clone(), agent, self.cancellation.clone()))
    }

    async fn emit(&self, event: StreamEvent) -> Result<()> {
        let Some(tx) = &self.tx else {
            return Ok(());
        };
        tokio::select! {
            biased;
            _ = self.cancellation.cancelled() => Err(AgentsError::Cancelled),
            sent = tx.send(event) => sent.map_err(|_| AgentsError::Cancelled),
        }
    }
}
