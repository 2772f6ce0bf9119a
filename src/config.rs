//! Configuration for swarmbus.
//!
//! Built once at swarm-assembly time and handed into the Bus and
//! Orchestrator constructors; never mutated globally afterward.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;

use crate::error::{Error, Result};

/// Per-strategy timeout configuration, in seconds.
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct Timeouts {
    #[serde(default = "default_emergency_secs")]
    pub emergency_secs: u64,
    #[serde(default = "default_council_vote_secs")]
    pub council_vote_secs: u64,
    #[serde(default = "default_step_secs")]
    pub step_secs: u64,
    #[serde(default = "default_branch_secs")]
    pub branch_secs: u64,
}

fn default_emergency_secs() -> u64 {
    5
}

fn default_council_vote_secs() -> u64 {
    10
}

fn default_step_secs() -> u64 {
    30
}

fn default_branch_secs() -> u64 {
    60
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            emergency_secs: default_emergency_secs(),
            council_vote_secs: default_council_vote_secs(),
            step_secs: default_step_secs(),
            branch_secs: default_branch_secs(),
        }
    }
}

/// Swarm-wide configuration.
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct SwarmConfig {
    /// Process-wide secret for envelope signing.
    #[serde(default = "default_signing_secret")]
    pub signing_secret: String,

    /// Maximum retained envelopes before FIFO eviction.
    #[serde(default = "default_history_capacity")]
    pub history_capacity: usize,

    /// Default envelope ttl in seconds.
    #[serde(default = "default_ttl_secs")]
    pub default_ttl_secs: u64,

    /// Financial-approval amounts above this route to a council vote.
    #[serde(default = "default_approval_threshold")]
    pub approval_threshold: f64,

    /// Approval ratio required for council consensus.
    #[serde(default = "default_consensus_threshold")]
    pub consensus_threshold: f64,

    /// Minimum score for an agent to be eligible for selection.
    #[serde(default = "default_min_score")]
    pub min_score: f64,

    /// Role order used by the sequential pipeline.
    #[serde(default = "default_role_precedence")]
    pub role_precedence: Vec<String>,

    /// Channel name → member agent ids, applied at registration time.
    #[serde(default)]
    pub channel_membership: HashMap<String, Vec<String>>,

    /// Channel receiving emergency-action audit reports.
    #[serde(default = "default_audit_channel")]
    pub audit_channel: String,

    /// Maximum retained routing trace entries.
    #[serde(default = "default_trace_capacity")]
    pub trace_capacity: usize,

    #[serde(default)]
    pub timeouts: Timeouts,
}

fn default_signing_secret() -> String {
    // Fresh per process unless pinned by config; envelopes never cross
    // process boundaries without a shared secret anyway.
    ulid::Ulid::new().to_string()
}

fn default_history_capacity() -> usize {
    10_000
}

fn default_ttl_secs() -> u64 {
    300
}

fn default_approval_threshold() -> f64 {
    1000.0
}

fn default_consensus_threshold() -> f64 {
    2.0 / 3.0
}

fn default_min_score() -> f64 {
    0.3
}

fn default_role_precedence() -> Vec<String> {
    vec![
        "finance".to_string(),
        "engineering".to_string(),
        "operations".to_string(),
        "support".to_string(),
    ]
}

fn default_audit_channel() -> String {
    "audit".to_string()
}

fn default_trace_capacity() -> usize {
    500
}

impl Default for SwarmConfig {
    fn default() -> Self {
        Self {
            signing_secret: default_signing_secret(),
            history_capacity: default_history_capacity(),
            default_ttl_secs: default_ttl_secs(),
            approval_threshold: default_approval_threshold(),
            consensus_threshold: default_consensus_threshold(),
            min_score: default_min_score(),
            role_precedence: default_role_precedence(),
            channel_membership: HashMap::new(),
            audit_channel: default_audit_channel(),
            trace_capacity: default_trace_capacity(),
            timeouts: Timeouts::default(),
        }
    }
}

impl SwarmConfig {
    /// Load configuration from a JSON file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(Error::Config(format!(
                "Config file not found at {}",
                path.display()
            )));
        }

        let content = std::fs::read_to_string(path)?;
        let config: SwarmConfig = serde_json::from_str(&content)?;
        config.validate()?;

        tracing::debug!("Loaded swarm config from {}", path.display());
        Ok(config)
    }

    /// Validate invariants that serde defaults cannot express.
    pub fn validate(&self) -> Result<()> {
        if self.history_capacity == 0 {
            return Err(Error::Config("history_capacity must be > 0".to_string()));
        }
        if !(0.0..=1.0).contains(&self.consensus_threshold) {
            return Err(Error::Config(
                "consensus_threshold must be within [0, 1]".to_string(),
            ));
        }
        if !(0.0..=1.0).contains(&self.min_score) {
            return Err(Error::Config("min_score must be within [0, 1]".to_string()));
        }
        Ok(())
    }
}
