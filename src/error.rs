//! Error types for swarmbus.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Signature verification failed for envelope {0}")]
    BadSignature(String),

    #[error("Agent not found: {0}")]
    AgentNotFound(String),

    #[error("Agent already registered: {0}")]
    AgentExists(String),

    #[error("Agent processing failed: {0}")]
    Processing(String),

    #[error("Timed out waiting for response from {0}")]
    ResponseTimeout(String),

    #[error("No eligible agents for task {0}")]
    NoEligibleAgents(String),

    #[error("Bus error: {0}")]
    Bus(String),

    #[error("{0}")]
    Other(String),
}
