//! # Agent Handoff System
//!
//! A handoff lets one agent transfer control of the conversation to another,
//! more specialized agent. To the oracle a handoff looks like a tool named
//! `transfer_to_<agent>`; choosing it switches the active agent for the rest of
//! the run.
//!
//! Handoffs name their target by id. The [`HandoffResolver`] looks the id up
//! in the run's [`AgentGraph`] when the transition happens, which is what
//! lets agents hand control back and forth without owning each other.
//!
//! An optional callback runs on every transition with the run context. A
//! failing (or timed out) callback is logged and recorded on the
//! [`HandoffEvent`]; the transition still takes effect.
//!
//! ```rust
//! use agents_runtime::{Agent, Handoff};
//!
//! let triage: Agent = Agent::builder("Triage")
//!     .instructions("Route questions to the right specialist.")
//!     .handoff(Handoff::to("Technical Support").with_description("Product and setup issues"))
//!     .build()
//!     .unwrap();
//!
//! assert_eq!(triage.handoffs()[0].tool_name(), "transfer_to_technical_support");
//! ```

use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tower::BoxError;
use tracing::{debug, warn};

use crate::agent::Agent;
use crate::context::RunContext;
use crate::error::{AgentsError, Result};
use crate::graph::AgentGraph;
use crate::oracle::HandoffSpec;

/// Record of one transition between agents.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HandoffEvent {
    pub from_agent: String,
    pub to_agent: String,
    pub call_id: String,
    /// Set when the handoff callback failed or timed out
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub callback_error: Option<String>,
}

/// Runs when a handoff takes effect.
#[async_trait]
pub trait HandoffCallback<C>: Send + Sync {
    async fn on_handoff(
        &self,
        context: RunContext<C>,
        event: HandoffEvent,
    ) -> std::result::Result<(), BoxError>;
}

#[async_trait]
impl<C, F, Fut> HandoffCallback<C> for F
where
    C: Send + 'static,
    F: Fn(RunContext<C>, HandoffEvent) -> Fut + Send + Sync,
    Fut: Future<Output = std::result::Result<(), BoxError>> + Send + 'static,
{
    async fn on_handoff(
        &self,
        context: RunContext<C>,
        event: HandoffEvent,
    ) -> std::result::Result<(), BoxError> {
        (self)(context, event).await
    }
}

/// A possible transfer of control to another agent.
pub struct Handoff<C = ()> {
    target: String,
    tool_name: String,
    description: Option<String>,
    callback: Option<Arc<dyn HandoffCallback<C>>>,
}

impl<C> Clone for Handoff<C> {
    fn clone(&self) -> Self {
        Self {
            target: self.target.clone(),
            tool_name: self.tool_name.clone(),
            description: self.description.clone(),
            callback: self.callback.clone(),
        }
    }
}

impl<C> fmt::Debug for Handoff<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Handoff")
            .field("target", &self.target)
            .field("tool_name", &self.tool_name)
            .field("description", &self.description)
            .field("has_callback", &self.callback.is_some())
            .finish()
    }
}

/// `"Technical Support"` → `"transfer_to_technical_support"`
pub fn default_tool_name(target: &str) -> String {
    let normalized: String = target
        .trim()
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() {
                c.to_ascii_lowercase()
            } else {
                '_'
            }
        })
        .collect();
    format!("transfer_to_{normalized}")
}

impl<C: Send + 'static> Handoff<C> {
    pub fn to(target: impl Into<String>) -> Self {
        let target = target.into();
        Self {
            tool_name: default_tool_name(&target),
            target,
            description: None,
            callback: None,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn with_tool_name(mut self, tool_name: impl Into<String>) -> Self {
        self.tool_name = tool_name.into();
        self
    }

    /// Registers a callback run with the context when the handoff happens.
    pub fn on_handoff<F, Fut>(mut self, callback: F) -> Self
    where
        F: Fn(RunContext<C>, HandoffEvent) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = std::result::Result<(), BoxError>> + Send + 'static,
    {
        self.callback = Some(Arc::new(callback));
        self
    }

    pub fn with_callback(mut self, callback: Arc<dyn HandoffCallback<C>>) -> Self {
        self.callback = Some(callback);
        self
    }
}

impl<C> Handoff<C> {
    pub fn target(&self) -> &str {
        &self.target
    }

    pub fn tool_name(&self) -> &str {
        &self.tool_name
    }

    pub fn description(&self) -> Option<&str> {
        self.description.as_deref()
    }

    /// Whether `requested` names this handoff, by target id or tool name.
    pub fn matches(&self, requested: &str) -> bool {
        self.target == requested || self.tool_name == requested
    }
}

/// Resolves handoff requests against the agent graph of a run.
pub struct HandoffResolver<'g, C> {
    graph: &'g AgentGraph<C>,
    callback_timeout: Option<Duration>,
}

impl<'g, C: Send + 'static> HandoffResolver<'g, C> {
    pub fn new(graph: &'g AgentGraph<C>, callback_timeout: Option<Duration>) -> Self {
        Self {
            graph,
            callback_timeout,
        }
    }

    /// The handoffs of `agent` as advertised to the oracle.
    pub fn specs(&self, agent: &Agent<C>) -> Vec<HandoffSpec> {
        agent
            .handoffs()
            .iter()
            .map(|h| {
                let description = match h.description() {
                    Some(d) => d.to_string(),
                    None => {
                        let extra = self
                            .graph
                            .get(h.target())
                            .ok()
                            .and_then(|a| a.handoff_description().map(|d| format!(" {d}")))
                            .unwrap_or_default();
                        format!(
                            "Handoff to the {} agent to handle the request.{extra}",
                            h.target()
                        )
                    }
                };
                HandoffSpec {
                    target: h.target().to_string(),
                    tool_name: h.tool_name().to_string(),
                    description,
                }
            })
            .collect()
    }

    /// Resolves `requested` (a target id or handoff tool name) from `current`.
    ///
    /// Fails with [`AgentsError::UnknownHandoffTarget`] when `current` has no
    /// matching handoff; the caller keeps its active agent in that case.
    pub async fn resolve(
        &self,
        current: &Agent<C>,
        requested: &str,
        call_id: &str,
        context: &RunContext<C>,
    ) -> Result<(Arc<Agent<C>>, HandoffEvent)> {
        let handoff = current.find_handoff(requested).ok_or_else(|| {
            AgentsError::UnknownHandoffTarget {
                agent: current.name().to_string(),
                target: requested.to_string(),
            }
        })?;
        let next = self.graph.get(handoff.target())?;

        let mut event = HandoffEvent {
            from_agent: current.name().to_string(),
            to_agent: next.name().to_string(),
            call_id: call_id.to_string(),
            callback_error: None,
        };

        if let Some(callback) = &handoff.callback {
            debug!(from = %event.from_agent, to = %event.to_agent, "Running handoff callback");
            let fut = callback.on_handoff(context.clone(), event.clone());
            let outcome = match self.callback_timeout {
                Some(limit) => match tokio::time::timeout(limit, fut).await {
                    Ok(res) => res.map_err(|e| e.to_string()),
                    Err(_) => Err(format!("handoff callback timed out after {limit:?}")),
                },
                None => fut.await.map_err(|e| e.to_string()),
            };
            if let Err(message) = outcome {
                warn!(
                    from = %event.from_agent,
                    to = %event.to_agent,
                    error = %message,
                    "Handoff callback failed; continuing with the transition"
                );
                event.callback_error = Some(message);
            }
        }

        Ok((next, event))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn graph(handoff: Handoff<u32>) -> AgentGraph<u32> {
        let main = Agent::builder("Main")
            .instructions("route")
            .handoff(handoff)
            .build()
            .unwrap();
        let billing = Agent::builder("Billing")
            .instructions("bill")
            .handoff_description("Handles invoices")
            .build()
            .unwrap();
        AgentGraph::builder()
            .agent(main)
            .agent(billing)
            .build()
            .unwrap()
    }

    #[test]
    fn test_default_tool_name() {
        assert_eq!(default_tool_name("Billing"), "transfer_to_billing");
        assert_eq!(
            default_tool_name("Technical Support"),
            "transfer_to_technical_support"
        );
    }

    #[test]
    fn test_specs_fill_in_description() {
        let graph = graph(Handoff::to("Billing"));
        let resolver = HandoffResolver::new(&graph, None);
        let main = graph.get("Main").unwrap();
        let specs = resolver.specs(&main);
        assert_eq!(specs.len(), 1);
        assert_eq!(specs[0].tool_name, "transfer_to_billing");
        assert_eq!(
            specs[0].description,
            "Handoff to the Billing agent to handle the request. Handles invoices"
        );
    }

    #[tokio::test]
    async fn test_resolve_by_target_or_tool_name() {
        let graph = graph(Handoff::to("Billing"));
        let resolver = HandoffResolver::new(&graph, None);
        let main = graph.get("Main").unwrap();
        let ctx = RunContext::new(0);

        let (next, event) = resolver.resolve(&main, "Billing", "c1", &ctx).await.unwrap();
        assert_eq!(next.name(), "Billing");
        assert_eq!(event.from_agent, "Main");
        assert_eq!(event.to_agent, "Billing");

        let (next, _) = resolver
            .resolve(&main, "transfer_to_billing", "c2", &ctx)
            .await
            .unwrap();
        assert_eq!(next.name(), "Billing");
    }

    #[tokio::test]
    async fn test_unknown_target_fails() {
        let graph = graph(Handoff::to("Billing"));
        let resolver = HandoffResolver::new(&graph, None);
        let billing = graph.get("Billing").unwrap();
        let err = resolver
            .resolve(&billing, "Main", "c1", &RunContext::new(0))
            .await
            .unwrap_err();
        assert!(matches!(err, AgentsError::UnknownHandoffTarget { .. }));
    }

    #[tokio::test]
    async fn test_callback_updates_context_once() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let handoff = Handoff::to("Billing").on_handoff(move |ctx: RunContext<u32>, _event| {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                ctx.update(|n| *n += 10);
                Ok(())
            }
        });
        let graph = graph(handoff);
        let resolver = HandoffResolver::new(&graph, None);
        let ctx = RunContext::new(1);
        let main = graph.get("Main").unwrap();
        let (_, event) = resolver.resolve(&main, "Billing", "c1", &ctx).await.unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(ctx.snapshot(), 11);
        assert!(event.callback_error.is_none());
    }

    #[tokio::test]
    async fn test_failing_or_slow_callback_still_transitions() {
        let failing = Handoff::to("Billing").on_handoff(|_ctx: RunContext<u32>, _event| async {
            Err::<(), BoxError>("ledger offline".into())
        });
        let graph_a = graph(failing);
        let resolver = HandoffResolver::new(&graph_a, None);
        let main = graph_a.get("Main").unwrap();
        let (next, event) = resolver
            .resolve(&main, "Billing", "c1", &RunContext::new(0))
            .await
            .unwrap();
        assert_eq!(next.name(), "Billing");
        assert_eq!(event.callback_error.as_deref(), Some("ledger offline"));

        let slow = Handoff::to("Billing").on_handoff(|_ctx: RunContext<u32>, _event| async {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok::<(), BoxError>(())
        });
        let graph_b = graph(slow);
        let resolver = HandoffResolver::new(&graph_b, Some(Duration::from_millis(10)));
        let main = graph_b.get("Main").unwrap();
        let (next, event) = resolver
            .resolve(&main, "Billing", "c1", &RunContext::new(0))
            .await
            .unwrap();
        assert_eq!(next.name(), "Billing");
        assert!(event.callback_error.unwrap().contains("timed out"));
    }
}
