//! The set of agents a run can reach.
//!
//! Agents refer to handoff targets by id; an [`AgentGraph`] maps those ids to
//! definitions. Building the graph checks that every handoff target exists, so
//! a run never discovers a dangling reference halfway through. Cycles (a
//! specialist handing back to triage) need no special treatment.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use crate::agent::Agent;
use crate::error::{AgentsError, Result};

/// Agents keyed by id. Cheap to clone.
pub struct AgentGraph<C = ()> {
    agents: Arc<HashMap<String, Arc<Agent<C>>>>,
}

impl<C> Clone for AgentGraph<C> {
    fn clone(&self) -> Self {
        Self {
            agents: Arc::clone(&self.agents),
        }
    }
}

impl<C> fmt::Debug for AgentGraph<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut ids: Vec<_> = self.agents.keys().collect();
        ids.sort();
        f.debug_struct("AgentGraph").field("agents", &ids).finish()
    }
}

impl<C: Send + 'static> AgentGraph<C> {
    pub fn builder() -> AgentGraphBuilder<C> {
        AgentGraphBuilder { agents: Vec::new() }
    }

    /// A graph holding one agent. Fails if the agent declares handoffs.
    pub fn single(agent: impl Into<Arc<Agent<C>>>) -> Result<Self> {
        Self::builder().agent(agent).build()
    }

    /// Looks up an agent by id.
    pub fn get(&self, id: &str) -> Result<Arc<Agent<C>>> {
        self.agents
            .get(id)
            .cloned()
            .ok_or_else(|| AgentsError::UnknownAgent {
                agent: id.to_string(),
            })
    }

    pub fn contains(&self, id: &str) -> bool {
        self.agents.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.agents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.agents.is_empty()
    }

    /// Agent ids in sorted order.
    pub fn agent_ids(&self) -> Vec<&str> {
        let mut ids: Vec<&str> = self.agents.keys().map(String::as_str).collect();
        ids.sort_unstable();
        ids
    }
}

/// Builder for [`AgentGraph`].
pub struct AgentGraphBuilder<C = ()> {
    agents: Vec<Arc<Agent<C>>>,
}

impl<C: Send + 'static> AgentGraphBuilder<C> {
    pub fn agent(mut self, agent: impl Into<Arc<Agent<C>>>) -> Self {
        self.agents.push(agent.into());
        self
    }

    /// Fails with [`AgentsError::DuplicateAgent`] when two agents share an id
    /// and with [`AgentsError::UnwiredHandoffTarget`] when a handoff names an
    /// agent that is not part of the graph.
    pub fn build(self) -> Result<AgentGraph<C>> {
        let mut agents = HashMap::with_capacity(self.agents.len());
        for agent in self.agents {
            let id = agent.name().to_string();
            if agents.contains_key(&id) {
                return Err(AgentsError::DuplicateAgent { agent: id });
            }
            agents.insert(id, agent);
        }

        for agent in agents.values() {
            for handoff in agent.handoffs() {
                if !agents.contains_key(handoff.target()) {
                    return Err(AgentsError::UnwiredHandoffTarget {
                        agent: agent.name().to_string(),
                        target: handoff.target().to_string(),
                    });
                }
            }
        }

        Ok(AgentGraph {
            agents: Arc::new(agents),
        })
    }
}
