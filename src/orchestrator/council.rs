//! Council strategy: put a proposal before every selected agent and
//! decide by consensus ratio.

use async_trait::async_trait;
use futures::future::join_all;
use std::sync::Arc;
use std::time::Duration;

use super::{exchange, OutcomeStatus, Strategy, StrategyContext, StrategyOutcome};
use crate::agent::AgentHandle;
use crate::error::Result;
use crate::protocol::{EnvelopeBuilder, MessageType, Priority, VoteChoice, VoteRecord};
use crate::task::Task;

pub struct CouncilStrategy;

#[async_trait]
impl Strategy for CouncilStrategy {
    async fn execute(
        &self,
        task: &Task,
        agents: &[Arc<AgentHandle>],
        ctx: &StrategyContext,
    ) -> Result<StrategyOutcome> {
        let timeout = Duration::from_secs(ctx.config.timeouts.council_vote_secs);

        let mut ballots = Vec::with_capacity(agents.len());
        for agent in agents {
            let proposal = EnvelopeBuilder::from(&ctx.orchestrator_id)
                .to(agent.id())
                .message_type(MessageType::Proposal)
                .priority(Priority::High)
                .payload(serde_json::json!({
                    "task_id": task.id,
                    "task_type": task.task_type,
                    "amount": task.amount,
                    "details": task.payload,
                }))
                .ttl(ctx.bus.default_ttl_secs())
                .build(ctx.bus.signer())?;
            ballots.push((agent.id().to_string(), proposal));
        }

        // All proposals go out before any vote is awaited; completion
        // order does not matter for the tally.
        let votes: Vec<VoteRecord> = join_all(ballots.into_iter().map(|(agent_id, proposal)| {
            async move {
                match exchange(ctx, proposal, timeout).await {
                    Ok(payload) => parse_vote(&agent_id, &payload),
                    Err(e) => {
                        tracing::debug!("Council vote from {} not counted: {}", agent_id, e);
                        VoteRecord {
                            agent_id,
                            choice: VoteChoice::Abstain,
                            reasoning: format!("no vote: {}", e),
                        }
                    }
                }
            }
        }))
        .await;

        let approvals = votes
            .iter()
            .filter(|v| v.choice == VoteChoice::Approve)
            .count();
        // Abstains count in the denominator.
        let consensus = if votes.is_empty() {
            0.0
        } else {
            approvals as f64 / votes.len() as f64
        };

        let status = if consensus >= ctx.config.consensus_threshold {
            OutcomeStatus::Approved
        } else {
            OutcomeStatus::Rejected
        };
        tracing::info!(
            "Council on task {}: {}/{} approvals (ratio {:.3}) -> {}",
            task.id,
            approvals,
            votes.len(),
            consensus,
            status.as_str()
        );

        Ok(StrategyOutcome::Council {
            status,
            consensus,
            votes,
        })
    }
}

fn parse_vote(agent_id: &str, payload: &serde_json::Value) -> VoteRecord {
    let choice = payload
        .get("vote")
        .and_then(|v| serde_json::from_value::<VoteChoice>(v.clone()).ok());
    let reasoning = payload
        .get("reasoning")
        .and_then(|v| v.as_str())
        .unwrap_or("")
        .to_string();

    match choice {
        Some(choice) => VoteRecord {
            agent_id: agent_id.to_string(),
            choice,
            reasoning,
        },
        None => VoteRecord {
            agent_id: agent_id.to_string(),
            choice: VoteChoice::Abstain,
            reasoning: "unparseable vote".to_string(),
        },
    }
}
