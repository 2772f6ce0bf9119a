//! Swarm assembly: wires configuration, bus, and orchestrator together
//! and exposes the boundary surface external collaborators consume.

use std::sync::Arc;

use crate::agent::AgentHandle;
use crate::bus::{AgentStatus, BroadcastOutcome, BusMetrics, DeliveryReport, HistoryFilter, MessageBus};
use crate::config::SwarmConfig;
use crate::error::Result;
use crate::orchestrator::{Orchestrator, StrategyOutcome, TraceEntry};
use crate::protocol::{Envelope, EnvelopeBuilder, MessageType, Priority, Recipient, Signer};
use crate::task::Task;

/// Sender id used for envelopes the swarm itself emits.
const SWARM_ID: &str = "swarm";

/// The assembled fabric: one bus, one orchestrator, one configuration,
/// built once and never mutated globally afterward.
pub struct Swarm {
    config: Arc<SwarmConfig>,
    bus: Arc<MessageBus>,
    orchestrator: Orchestrator,
}

impl Swarm {
    /// Assemble a swarm from configuration.
    pub fn new(config: SwarmConfig) -> Result<Self> {
        config.validate()?;
        let config = Arc::new(config);
        let bus = Arc::new(MessageBus::new(
            Signer::new(&config.signing_secret),
            config.history_capacity,
            config.default_ttl_secs,
        ));
        let orchestrator = Orchestrator::new(Arc::clone(&bus), Arc::clone(&config));

        tracing::info!(
            "Swarm assembled (history capacity {}, audit channel {})",
            config.history_capacity,
            config.audit_channel
        );
        Ok(Self {
            config,
            bus,
            orchestrator,
        })
    }

    /// The underlying bus, for collaborators that talk to the fabric
    /// directly.
    pub fn bus(&self) -> &Arc<MessageBus> {
        &self.bus
    }

    /// The envelope signer; external senders need it to build envelopes
    /// the bus will accept.
    pub fn signer(&self) -> &Signer {
        self.bus.signer()
    }

    /// Register a participant and apply the configured channel
    /// membership for its id.
    pub fn register_agent(&self, handle: Arc<AgentHandle>) -> Result<()> {
        let agent_id = handle.id().to_string();
        self.bus.register_agent(handle)?;

        for (channel, members) in &self.config.channel_membership {
            if members.iter().any(|m| m == &agent_id) {
                self.bus.subscribe(&agent_id, channel)?;
            }
        }
        Ok(())
    }

    /// Remove a participant; its subscriptions go with it.
    pub fn unregister_agent(&self, agent_id: &str) -> Result<()> {
        self.bus.unregister_agent(agent_id)
    }

    /// Route one task through the orchestrator. The primary entry point.
    pub async fn submit_task(&self, task: &Task) -> Result<StrategyOutcome> {
        self.orchestrator.route_task(task).await
    }

    /// Inject a pre-built envelope into the fabric.
    pub async fn send(&self, envelope: Envelope) -> Result<DeliveryReport> {
        self.bus.send(envelope).await
    }

    /// Broadcast a payload to a channel's subscribers.
    pub async fn broadcast(
        &self,
        channel: &str,
        payload: serde_json::Value,
    ) -> Result<BroadcastOutcome> {
        self.bus.broadcast(SWARM_ID, channel, payload).await
    }

    /// Filtered view over the retained envelope history.
    pub fn query_history(&self, filter: &HistoryFilter) -> Vec<Envelope> {
        self.bus.query_history(filter)
    }

    /// Aggregate bus counters.
    pub fn metrics(&self) -> BusMetrics {
        self.bus.metrics()
    }

    /// Status snapshot of every registered agent.
    pub fn agent_statuses(&self) -> Vec<AgentStatus> {
        self.bus.agent_statuses()
    }

    /// The most recent routing trace entries.
    pub fn recent_traces(&self, limit: usize) -> Vec<TraceEntry> {
        self.orchestrator.recent_traces(limit)
    }

    /// One upkeep tick: emit a liveness envelope to every registered
    /// agent and sweep ttl-expired history. Callers own the scheduling
    /// loop. Returns the number of envelopes swept.
    pub async fn heartbeat(&self) -> Result<usize> {
        let envelope = EnvelopeBuilder::from(SWARM_ID)
            .to(Recipient::Broadcast)
            .message_type(MessageType::Heartbeat)
            .priority(Priority::Background)
            .payload(serde_json::json!({
                "at": chrono::Utc::now().to_rfc3339(),
            }))
            .ttl(self.config.default_ttl_secs)
            .build(self.bus.signer())?;
        let report = self.bus.send(envelope).await?;
        tracing::debug!("Heartbeat reached {} agents", report.delivered.len());

        Ok(self.bus.cleanup())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::{AgentProfile, Behavior};
    use async_trait::async_trait;
    use serde_json::json;

    struct Echo;

    #[async_trait]
    impl Behavior for Echo {
        async fn process_message(&self, envelope: &Envelope) -> Result<serde_json::Value> {
            Ok(envelope.payload.clone())
        }
    }

    fn agent(id: &str, role: &str) -> Arc<AgentHandle> {
        Arc::new(AgentHandle::new(AgentProfile::new(id, role), Echo))
    }

    #[tokio::test]
    async fn test_channel_membership_applied_at_registration() {
        let mut config = SwarmConfig::default();
        config
            .channel_membership
            .insert("audit".to_string(), vec!["ops1".to_string()]);
        let swarm = Swarm::new(config).unwrap();

        swarm.register_agent(agent("ops1", "operations")).unwrap();
        swarm.register_agent(agent("eng1", "engineering")).unwrap();

        let outcome = swarm.broadcast("audit", json!({"event": "boot"})).await.unwrap();
        match outcome {
            BroadcastOutcome::Delivered(report) => {
                assert_eq!(report.delivered, vec!["ops1".to_string()]);
            }
            BroadcastOutcome::NoSubscribers { .. } => panic!("expected delivery"),
        }
    }

    #[tokio::test]
    async fn test_heartbeat_reaches_all_and_sweeps() {
        let swarm = Swarm::new(SwarmConfig::default()).unwrap();
        swarm.register_agent(agent("a", "engineering")).unwrap();
        swarm.register_agent(agent("b", "support")).unwrap();

        let swept = swarm.heartbeat().await.unwrap();
        assert_eq!(swept, 0);

        let beats = swarm.query_history(&HistoryFilter {
            message_type: Some(MessageType::Heartbeat),
            ..HistoryFilter::default()
        });
        assert_eq!(beats.len(), 1);
    }

    #[tokio::test]
    async fn test_metrics_surface() {
        let swarm = Swarm::new(SwarmConfig::default()).unwrap();
        swarm.register_agent(agent("a", "engineering")).unwrap();

        let statuses = swarm.agent_statuses();
        assert_eq!(statuses.len(), 1);
        assert_eq!(statuses[0].id, "a");
        assert_eq!(swarm.metrics().agent_count, 1);
    }
}
