//! Message types for the agent communication fabric.

use serde::{Deserialize, Serialize};

/// Message type classification.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum MessageType {
    /// Direct instruction expecting execution
    Command,
    /// Task handed off to another agent
    Delegate,
    /// Result or progress report
    Report,
    /// Question expecting a response
    Query,
    /// Response to a query/command/delegation
    Response,
    /// Fan-out to a channel or the whole swarm
    Broadcast,
    /// Proposal put before a council
    Proposal,
    /// Vote cast on a proposal
    Vote,
    /// Consensus outcome announcement
    Consensus,
    /// Liveness signal
    Heartbeat,
    /// Failure report
    Error,
    /// Status update
    Status,
}

impl MessageType {
    /// Whether a successful handler result should be echoed back to the
    /// sender as a response envelope.
    pub fn expects_response(self) -> bool {
        matches!(
            self,
            MessageType::Query | MessageType::Delegate | MessageType::Command | MessageType::Proposal
        )
    }
}

/// Message priority levels, 1 = critical .. 5 = background.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    Critical = 1,
    High = 2,
    Normal = 3,
    Low = 4,
    Background = 5,
}

impl Default for Priority {
    fn default() -> Self {
        Self::Normal
    }
}

/// Recipient specification for an envelope.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Recipient {
    /// A single agent by id
    Agent(String),
    /// An explicit list of agent ids
    Agents(Vec<String>),
    /// Every registered agent
    Broadcast,
}

impl Recipient {
    /// Check if this spec addresses a specific agent.
    pub fn includes(&self, agent_id: &str) -> bool {
        match self {
            Recipient::Agent(id) => id == agent_id,
            Recipient::Agents(ids) => ids.iter().any(|id| id == agent_id),
            Recipient::Broadcast => true,
        }
    }
}

impl From<&str> for Recipient {
    fn from(id: &str) -> Self {
        Recipient::Agent(id.to_string())
    }
}

impl From<String> for Recipient {
    fn from(id: String) -> Self {
        Recipient::Agent(id)
    }
}

/// A single vote choice in a council decision.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum VoteChoice {
    Approve,
    Reject,
    Abstain,
}

/// A recorded vote: who voted, what they chose, and why.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VoteRecord {
    pub agent_id: String,
    pub choice: VoteChoice,
    pub reasoning: String,
}
