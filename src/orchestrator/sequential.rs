//! Sequential strategy: a pipeline where each agent's output becomes the
//! next agent's input; a step failure aborts the remainder.

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;

use super::{exchange, OutcomeStatus, PipelineStep, Strategy, StrategyContext, StrategyOutcome};
use crate::agent::AgentHandle;
use crate::error::Result;
use crate::protocol::{EnvelopeBuilder, MessageType};
use crate::task::Task;

pub struct SequentialStrategy;

#[async_trait]
impl Strategy for SequentialStrategy {
    async fn execute(
        &self,
        task: &Task,
        agents: &[Arc<AgentHandle>],
        ctx: &StrategyContext,
    ) -> Result<StrategyOutcome> {
        let timeout = Duration::from_secs(ctx.config.timeouts.step_secs);

        let mut steps: Vec<PipelineStep> = Vec::new();
        let mut input = task.payload.clone();
        let mut aborted = false;

        for agent in agents {
            let envelope = EnvelopeBuilder::from(&ctx.orchestrator_id)
                .to(agent.id())
                .message_type(MessageType::Delegate)
                .payload(serde_json::json!({
                    "task_id": task.id,
                    "task_type": task.task_type,
                    "input": input,
                }))
                .ttl(ctx.bus.default_ttl_secs())
                .build(ctx.bus.signer())?;

            match exchange(ctx, envelope, timeout).await {
                Ok(output) => {
                    steps.push(PipelineStep {
                        agent_id: agent.id().to_string(),
                        input: input.clone(),
                        output: Some(output.clone()),
                        error: None,
                    });
                    input = output;
                }
                Err(e) => {
                    tracing::warn!(
                        "Pipeline for task {} aborted at {}: {}",
                        task.id,
                        agent.id(),
                        e
                    );
                    steps.push(PipelineStep {
                        agent_id: agent.id().to_string(),
                        input: input.clone(),
                        output: None,
                        error: Some(e.to_string()),
                    });
                    aborted = true;
                    break;
                }
            }
        }

        let (status, output) = if aborted {
            (OutcomeStatus::Failed, None)
        } else {
            (OutcomeStatus::Completed, Some(input))
        };

        tracing::info!(
            "Pipeline for task {} ran {} of {} steps -> {}",
            task.id,
            steps.len(),
            agents.len(),
            status.as_str()
        );

        Ok(StrategyOutcome::Sequential {
            status,
            steps,
            output,
        })
    }
}
