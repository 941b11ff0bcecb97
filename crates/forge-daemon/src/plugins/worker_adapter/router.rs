//! Message routing logic for worker adapter
//!
//! Routes inbox messages to configured worker agents with concurrency control.

use crate::plugin::PluginError;
use forge_core::schema::InboxMessage;
use std::collections::{HashMap, VecDeque};
use tracing::{debug, warn};

/// Concurrency policy for handling multiple messages to the same agent
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConcurrencyPolicy {
    /// Queue incoming messages (default) â€” only one message processed at a time
    #[default]
    Queue,
    /// Reject new messages if agent is busy
    Reject,
    /// Allow concurrent message processing
    Concurrent,
}

/// Message router with concurrency control
pub struct MessageRouter {
    /// Per-agent message queues
    queues: HashMap<String, VecDeque<InboxMessage>>,
    /// Per-agent busy status
    busy_agents: HashMap<String, bool>,
    /// Per-agent concurrency policy
    policies: HashMap<String, ConcurrencyPolicy>,
}

impl MessageRouter {
    /// Create a new message router
    pub fn new() -> Self {
        Self {
            queues: HashMap::new(),
            busy_agents: HashMap::new(),
            policies: HashMap::new(),
        }
    }

    /// Configure concurrency policy for an agent
    ///
    /// # Arguments
    ///
    /// * `agent_name` - Name of the agent
    /// * `policy` - Concurrency policy to apply
    pub fn set_policy(&mut self, agent_name: String, policy: ConcurrencyPolicy) {
        self.policies.insert(agent_name, policy);
    }

    /// Attempt to route a message to an agent
    ///
    /// Returns `Ok(Some(message))` if the message can be delivered now,
    /// `Ok(None)` if queued or rejected, `Err` if routing failed.
    ///
    /// # Arguments
    ///
    /// * `agent_name` - Target agent name
    /// * `message` - Inbox message to route
    ///
    /// # Errors
    ///
    /// Returns `PluginError` if the agent's policy is Reject and agent is busy
    pub fn route_message(
        &mut self,
        agent_name: &str,
        message: InboxMessage,
    ) -> Result<Option<InboxMessage>, PluginError> {
        let policy = self
            .policies
            .get(agent_name)
            .copied()
            .unwrap_or_default();

        let is_busy = self.busy_agents.get(agent_name).copied().unwrap_or(false);

        match policy {
            ConcurrencyPolicy::Concurrent => {
                // Always deliver immediately
                debug!("Routing message to {agent_name} (concurrent policy)");
                Ok(Some(message))
            }
            ConcurrencyPolicy::Queue => {
                if is_busy {
                    // Agent is busy, queue the message
                    debug!("Queueing message for {agent_name} (agent busy)");
                    self.queues
                        .entry(agent_name.to_string())
                        .or_default()
                        .push_back(message);
                    Ok(None)
                } else {
                    // Agent is idle, deliver immediately
                    debug!("Routing message to {agent_name} (queue policy, agent idle)");
                    self.busy_agents.insert(agent_name.to_string(), true);
                    Ok(Some(message))
                }
            }
            ConcurrencyPolicy::Reject => {
                if is_busy {
                    // Agent is busy, reject the message
                    warn!("Rejecting message for {agent_name} (agent busy, reject policy)");
                    Err(PluginError::Runtime {
                        message: format!("Agent {agent_name} is busy (reject policy)"),
                        source: None,
                    })
                } else {
                    // Agent is idle, deliver immediately
                    debug!("Routing message to {agent_name} (reject policy, agent idle)");
                    self.busy_agents.insert(agent_name.to_string(), true);
                    Ok(Some(message))
                }
            }
        }
    }

    /// Mark agent as no longer busy and dequeue next message if available
    ///
    /// Returns the next queued message for the agent, if any.
    ///
    /// # Arguments
    ///
    /// * `agent_name` - Name of the agent that finished processing
    pub fn agent_finished(&mut self, agent_name: &str) -> Option<InboxMessage> {
        self.busy_agents.insert(agent_name.to_string(), false);

        // Check if there are queued messages
        if let Some(queue) = self.queues.get_mut(agent_name)
            && let Some(next_message) = queue.pop_front()
        {
            debug!("Dequeuing next message for {agent_name}");
            self.busy_agents.insert(agent_name.to_string(), true);
            Some(next_message)
        } else {
            None
        }
    }

    /// Get the number of queued messages for an agent
    ///
    /// # Arguments
    ///
    /// * `agent_name` - Name of the agent
    pub fn queue_depth(&self, agent_name: &str) -> usize {
        self.queues
            .get(agent_name)
            .map(|q| q.len())
            .unwrap_or(0)
    }

    /// Check if an agent is currently busy
    ///
    /// # Arguments
    ///
    /// * `agent_name` - Name of the agent
    pub fn is_busy(&self, agent_name: &str) -> bool {
        self.busy_agents.get(agent_name).copied().unwrap_or(false)
    }
}

impl Default for MessageRouter {
    fn default() -> Self {
        Self::new()
    }
}
