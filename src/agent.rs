//! Agent base: identity, skills, decision authority, state machine, and
//! cumulative processing metrics.
//!
//! Concrete agents plug in behind the [`Behavior`] trait; everything else
//! here is shared plumbing the bus and orchestrator rely on.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Instant;

use crate::error::{Error, Result};
use crate::protocol::{Envelope, EnvelopeBuilder, MessageType, Priority, Recipient, Signer};

/// Agent lifecycle states.
///
/// `Offline` is reachable only via explicit shutdown; the other three
/// cycle per handled envelope.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AgentState {
    Idle,
    Busy,
    Error,
    Offline,
}

/// One decision-authority entry.
///
/// Boolean entries always apply; numeric entries are a spending/action
/// ceiling compared against the requested amount.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum Authority {
    Allowed(bool),
    Ceiling(f64),
}

/// Static identity of an agent: who it is and what it may do.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentProfile {
    pub id: String,
    pub role: String,
    #[serde(default)]
    pub skills: Vec<String>,
    #[serde(default)]
    pub authority: HashMap<String, Authority>,
}

impl AgentProfile {
    /// Create a profile with an id and role.
    pub fn new(id: impl Into<String>, role: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            role: role.into(),
            skills: Vec::new(),
            authority: HashMap::new(),
        }
    }

    /// Set the skill list.
    pub fn with_skills(mut self, skills: Vec<String>) -> Self {
        self.skills = skills;
        self
    }

    /// Add an authority entry.
    pub fn with_authority(mut self, kind: impl Into<String>, authority: Authority) -> Self {
        self.authority.insert(kind.into(), authority);
        self
    }
}

/// Cumulative processing counters for one agent.
#[derive(Debug, Clone, Default, Serialize)]
pub struct AgentMetrics {
    pub completed: u64,
    pub failed: u64,
    pub avg_latency_ms: f64,
}

impl AgentMetrics {
    /// completed / (completed + failed), or None with no history.
    pub fn success_rate(&self) -> Option<f64> {
        let total = self.completed + self.failed;
        if total == 0 {
            None
        } else {
            Some(self.completed as f64 / total as f64)
        }
    }

    fn record_success(&mut self, latency_ms: f64) {
        self.completed += 1;
        let n = self.completed as f64;
        self.avg_latency_ms = (self.avg_latency_ms * (n - 1.0) + latency_ms) / n;
    }

    fn record_failure(&mut self) {
        self.failed += 1;
    }
}

/// Pluggable decision logic: what a concrete agent actually does with an
/// envelope. The result shape is strategy-dependent (a vote, an action
/// descriptor, a pipeline payload, ...).
#[async_trait]
pub trait Behavior: Send + Sync {
    async fn process_message(&self, envelope: &Envelope) -> Result<serde_json::Value>;
}

/// A registered participant: profile plus live state and metrics, wrapping
/// the pluggable [`Behavior`].
pub struct AgentHandle {
    profile: AgentProfile,
    behavior: Box<dyn Behavior>,
    state: Mutex<AgentState>,
    metrics: Mutex<AgentMetrics>,
}

impl std::fmt::Debug for AgentHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AgentHandle")
            .field("id", &self.profile.id)
            .field("role", &self.profile.role)
            .field("state", &self.state())
            .finish()
    }
}

impl AgentHandle {
    /// Wrap a behavior with its profile; agents start idle.
    pub fn new(profile: AgentProfile, behavior: impl Behavior + 'static) -> Self {
        Self {
            profile,
            behavior: Box::new(behavior),
            state: Mutex::new(AgentState::Idle),
            metrics: Mutex::new(AgentMetrics::default()),
        }
    }

    pub fn id(&self) -> &str {
        &self.profile.id
    }

    pub fn role(&self) -> &str {
        &self.profile.role
    }

    pub fn profile(&self) -> &AgentProfile {
        &self.profile
    }

    pub fn state(&self) -> AgentState {
        *self.state.lock().unwrap()
    }

    pub fn metrics(&self) -> AgentMetrics {
        self.metrics.lock().unwrap().clone()
    }

    /// Mark the agent offline; only shutdown reaches this state.
    pub fn shutdown(&self) {
        *self.state.lock().unwrap() = AgentState::Offline;
    }

    /// Check decision authority for an action kind and optional amount.
    ///
    /// No entry for the kind denies the decision outright.
    pub fn can_decide(&self, kind: &str, amount: Option<f64>) -> bool {
        match self.profile.authority.get(kind) {
            Some(Authority::Allowed(allowed)) => *allowed,
            Some(Authority::Ceiling(ceiling)) => amount.map(|a| a <= *ceiling).unwrap_or(true),
            None => false,
        }
    }

    /// Handle one delivered envelope.
    ///
    /// Transitions to busy, runs the behavior, updates metrics, and
    /// returns the processing result together with any envelopes the
    /// agent emits in response (an automatic response for message types
    /// that expect one, or a high-priority error report on failure).
    /// The final state reverts to idle unless the agent was already in
    /// error before this envelope; a processing failure leaves it in
    /// error.
    pub async fn receive_message(
        &self,
        envelope: &Envelope,
        signer: &Signer,
    ) -> (Result<serde_json::Value>, Vec<Envelope>) {
        let previous = {
            let mut state = self.state.lock().unwrap();
            let previous = *state;
            *state = AgentState::Busy;
            previous
        };
        let started = Instant::now();

        let mut outbound = Vec::new();
        match self.behavior.process_message(envelope).await {
            Ok(value) => {
                let latency_ms = started.elapsed().as_secs_f64() * 1000.0;
                self.metrics.lock().unwrap().record_success(latency_ms);

                if envelope.message_type.expects_response() {
                    match envelope.respond(self.id(), value.clone(), signer) {
                        Ok(response) => outbound.push(response),
                        Err(e) => {
                            tracing::warn!("Agent {} could not build response: {}", self.id(), e)
                        }
                    }
                }

                *self.state.lock().unwrap() = if previous == AgentState::Error {
                    AgentState::Error
                } else {
                    AgentState::Idle
                };
                (Ok(value), outbound)
            }
            Err(e) => {
                self.metrics.lock().unwrap().record_failure();
                tracing::warn!(
                    "Agent {} failed processing envelope {}: {}",
                    self.id(),
                    envelope.id,
                    e
                );

                let report = EnvelopeBuilder::from(self.id())
                    .to(Recipient::Agent(envelope.from_agent.clone()))
                    .message_type(MessageType::Error)
                    .priority(Priority::High)
                    .payload(serde_json::json!({
                        "failed_message_id": envelope.id,
                        "error": e.to_string(),
                    }))
                    .correlation_id(envelope.id.clone())
                    .build(signer);
                match report {
                    Ok(env) => outbound.push(env),
                    Err(build_err) => tracing::warn!(
                        "Agent {} could not build error report: {}",
                        self.id(),
                        build_err
                    ),
                }

                *self.state.lock().unwrap() = AgentState::Error;
                (Err(Error::Processing(e.to_string())), outbound)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    struct Echo;

    #[async_trait]
    impl Behavior for Echo {
        async fn process_message(&self, envelope: &Envelope) -> Result<serde_json::Value> {
            Ok(envelope.payload.clone())
        }
    }

    struct AlwaysFails;

    #[async_trait]
    impl Behavior for AlwaysFails {
        async fn process_message(&self, _envelope: &Envelope) -> Result<serde_json::Value> {
            Err(Error::Other("nope".to_string()))
        }
    }

    fn signer() -> Signer {
        Signer::new("test-secret")
    }

    fn query(payload: serde_json::Value) -> Envelope {
        EnvelopeBuilder::from("orchestrator")
            .to("worker")
            .message_type(MessageType::Query)
            .payload(payload)
            .build(&signer())
            .unwrap()
    }

    #[tokio::test]
    async fn test_success_emits_response_and_reverts_to_idle() {
        let agent = AgentHandle::new(AgentProfile::new("worker", "engineering"), Echo);
        let envelope = query(json!({"n": 7}));

        let (result, outbound) = agent.receive_message(&envelope, &signer()).await;

        assert_eq!(result.unwrap(), json!({"n": 7}));
        assert_eq!(outbound.len(), 1);
        assert_eq!(outbound[0].message_type, MessageType::Response);
        assert_eq!(outbound[0].correlation_id, Some(envelope.id.clone()));
        assert_eq!(agent.state(), AgentState::Idle);
        assert_eq!(agent.metrics().completed, 1);
    }

    #[tokio::test]
    async fn test_report_type_gets_no_auto_response() {
        let agent = AgentHandle::new(AgentProfile::new("worker", "engineering"), Echo);
        let envelope = EnvelopeBuilder::from("orchestrator")
            .to("worker")
            .message_type(MessageType::Report)
            .build(&signer())
            .unwrap();

        let (result, outbound) = agent.receive_message(&envelope, &signer()).await;
        assert!(result.is_ok());
        assert!(outbound.is_empty());
    }

    #[tokio::test]
    async fn test_failure_emits_error_envelope_and_latches_error_state() {
        let agent = AgentHandle::new(AgentProfile::new("worker", "engineering"), AlwaysFails);
        let envelope = query(json!({}));

        let (result, outbound) = agent.receive_message(&envelope, &signer()).await;

        assert!(result.is_err());
        assert_eq!(outbound.len(), 1);
        assert_eq!(outbound[0].message_type, MessageType::Error);
        assert_eq!(outbound[0].priority, Priority::High);
        assert_eq!(agent.state(), AgentState::Error);
        assert_eq!(agent.metrics().failed, 1);
    }

    #[tokio::test]
    async fn test_error_state_persists_after_later_success() {
        struct FailOnce {
            failed: std::sync::atomic::AtomicBool,
        }

        #[async_trait]
        impl Behavior for FailOnce {
            async fn process_message(&self, envelope: &Envelope) -> Result<serde_json::Value> {
                if !self.failed.swap(true, std::sync::atomic::Ordering::SeqCst) {
                    Err(Error::Other("first call fails".to_string()))
                } else {
                    Ok(envelope.payload.clone())
                }
            }
        }

        let agent = AgentHandle::new(
            AgentProfile::new("worker", "engineering"),
            FailOnce {
                failed: std::sync::atomic::AtomicBool::new(false),
            },
        );

        let (first, _) = agent.receive_message(&query(json!(1)), &signer()).await;
        assert!(first.is_err());
        assert_eq!(agent.state(), AgentState::Error);

        // A later success does not clear the latched error state.
        let (second, _) = agent.receive_message(&query(json!(2)), &signer()).await;
        assert!(second.is_ok());
        assert_eq!(agent.state(), AgentState::Error);
    }

    #[test]
    fn test_can_decide() {
        let agent = AgentHandle::new(
            AgentProfile::new("cfo", "finance")
                .with_authority("refund", Authority::Ceiling(500.0))
                .with_authority("announce", Authority::Allowed(true))
                .with_authority("shutdown", Authority::Allowed(false)),
            Echo,
        );

        assert!(agent.can_decide("refund", Some(499.0)));
        assert!(agent.can_decide("refund", Some(500.0)));
        assert!(!agent.can_decide("refund", Some(501.0)));
        assert!(agent.can_decide("refund", None));
        assert!(agent.can_decide("announce", None));
        assert!(!agent.can_decide("shutdown", None));
        // No entry denies the decision.
        assert!(!agent.can_decide("hire", Some(1.0)));
    }

    #[test]
    fn test_success_rate_default() {
        let metrics = AgentMetrics::default();
        assert!(metrics.success_rate().is_none());

        let metrics = AgentMetrics {
            completed: 3,
            failed: 1,
            avg_latency_ms: 10.0,
        };
        assert_eq!(metrics.success_rate(), Some(0.75));
    }
}
