//! Emergency strategy: one actor executes immediately, no approval gate;
//! the action is reported to the audit channel afterward.

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;

use super::{exchange, OutcomeStatus, Strategy, StrategyContext, StrategyOutcome};
use crate::agent::AgentHandle;
use crate::error::{Error, Result};
use crate::protocol::{EnvelopeBuilder, MessageType, Priority};
use crate::task::Task;

pub struct EmergencyStrategy;

#[async_trait]
impl Strategy for EmergencyStrategy {
    async fn execute(
        &self,
        task: &Task,
        agents: &[Arc<AgentHandle>],
        ctx: &StrategyContext,
    ) -> Result<StrategyOutcome> {
        let agent = agents
            .first()
            .ok_or_else(|| Error::NoEligibleAgents(task.id.clone()))?;
        let timeout = Duration::from_secs(ctx.config.timeouts.emergency_secs);

        let command = EnvelopeBuilder::from(&ctx.orchestrator_id)
            .to(agent.id())
            .message_type(MessageType::Command)
            .priority(Priority::Critical)
            .payload(serde_json::json!({
                "task_id": task.id,
                "task_type": task.task_type,
                "severity": task.severity,
                "details": task.payload,
            }))
            .ttl(ctx.bus.default_ttl_secs())
            .build(ctx.bus.signer())?;

        match exchange(ctx, command, timeout).await {
            Ok(action) => {
                tracing::info!("Emergency action for task {} executed by {}", task.id, agent.id());

                // Fire-and-forget audit report; the outcome does not wait
                // on it.
                let bus = Arc::clone(&ctx.bus);
                let channel = ctx.config.audit_channel.clone();
                let report = serde_json::json!({
                    "task_id": task.id,
                    "agent_id": agent.id(),
                    "action": action,
                    "reported_at": chrono::Utc::now().to_rfc3339(),
                });
                let reporter = ctx.orchestrator_id.clone();
                tokio::spawn(async move {
                    if let Err(e) = bus.broadcast(&reporter, &channel, report).await {
                        tracing::warn!("Emergency audit broadcast failed: {}", e);
                    }
                });

                Ok(StrategyOutcome::Emergency {
                    status: OutcomeStatus::Executed,
                    agent_id: agent.id().to_string(),
                    action,
                })
            }
            Err(e) => {
                tracing::warn!("Emergency action for task {} failed: {}", task.id, e);
                Ok(StrategyOutcome::Emergency {
                    status: OutcomeStatus::Failed,
                    agent_id: agent.id().to_string(),
                    action: serde_json::json!({ "error": e.to_string() }),
                })
            }
        }
    }
}
