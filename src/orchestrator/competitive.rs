//! Competitive strategy: every selected agent attempts the identical
//! task in parallel; results are scored on quality, speed, and
//! confidence, and the best one wins.

use async_trait::async_trait;
use futures::future::join_all;
use std::sync::Arc;
use std::time::{Duration, Instant};

use super::{
    exchange, BranchFailure, OutcomeStatus, ScoredResult, Strategy, StrategyContext,
    StrategyOutcome,
};
use crate::agent::AgentHandle;
use crate::error::Result;
use crate::protocol::{EnvelopeBuilder, MessageType};
use crate::task::Task;

/// Execution-time normalization window: a branch that takes this long or
/// longer earns no speed credit.
const SPEED_WINDOW_MS: f64 = 30_000.0;

pub struct CompetitiveStrategy;

#[async_trait]
impl Strategy for CompetitiveStrategy {
    async fn execute(
        &self,
        task: &Task,
        agents: &[Arc<AgentHandle>],
        ctx: &StrategyContext,
    ) -> Result<StrategyOutcome> {
        let timeout = Duration::from_secs(ctx.config.timeouts.branch_secs);

        let mut requests = Vec::with_capacity(agents.len());
        for agent in agents {
            let envelope = EnvelopeBuilder::from(&ctx.orchestrator_id)
                .to(agent.id())
                .message_type(MessageType::Query)
                .payload(serde_json::json!({
                    "task_id": task.id,
                    "task_type": task.task_type,
                    "details": task.payload,
                }))
                .ttl(ctx.bus.default_ttl_secs())
                .build(ctx.bus.signer())?;
            requests.push((agent.id().to_string(), envelope));
        }

        let branches = join_all(requests.into_iter().map(|(agent_id, envelope)| async move {
            let started = Instant::now();
            let outcome = exchange(ctx, envelope, timeout).await;
            (agent_id, outcome, started.elapsed().as_millis() as u64)
        }))
        .await;

        let mut results: Vec<ScoredResult> = Vec::new();
        let mut failures = Vec::new();
        for (agent_id, outcome, execution_ms) in branches {
            match outcome {
                Ok(data) => results.push(score_result(agent_id, data, execution_ms)),
                Err(e) => failures.push(BranchFailure {
                    agent_id,
                    reason: e.to_string(),
                }),
            }
        }

        let winner = pick_winner(&results);

        let status = if winner.is_some() {
            OutcomeStatus::Completed
        } else {
            OutcomeStatus::Failed
        };

        tracing::info!(
            "Competition for task {}: {} entrants, {} failed, winner {:?}",
            task.id,
            results.len(),
            failures.len(),
            winner.as_ref().map(|w| w.agent_id.as_str())
        );

        Ok(StrategyOutcome::Competitive {
            status,
            winner,
            results,
            failures,
        })
    }
}

fn score_result(agent_id: String, data: serde_json::Value, execution_ms: u64) -> ScoredResult {
    let quality = data.get("quality").and_then(|v| v.as_f64()).unwrap_or(0.5);
    let confidence = data
        .get("confidence")
        .and_then(|v| v.as_f64())
        .unwrap_or(0.5);
    let speed = (1.0 - execution_ms as f64 / SPEED_WINDOW_MS).max(0.0);
    let score = 0.6 * quality + 0.3 * speed + 0.1 * confidence;

    ScoredResult {
        agent_id,
        score,
        quality,
        confidence,
        execution_ms,
        data,
    }
}

/// Strictly-greater comparison, so ties resolve to the first-encountered
/// maximum; results arrive in selection order because join_all preserves
/// input order.
fn pick_winner(results: &[ScoredResult]) -> Option<ScoredResult> {
    results
        .iter()
        .fold(None::<&ScoredResult>, |best, candidate| match best {
            Some(current) if candidate.score > current.score => Some(candidate),
            Some(current) => Some(current),
            None => Some(candidate),
        })
        .cloned()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_tie_resolves_to_first_entrant() {
        let a = score_result("a".to_string(), json!({"quality": 0.7, "confidence": 0.6}), 1_000);
        let b = score_result("b".to_string(), json!({"quality": 0.7, "confidence": 0.6}), 1_000);
        assert_eq!(a.score, b.score);

        let winner = pick_winner(&[a, b]).unwrap();
        assert_eq!(winner.agent_id, "a");
    }

    #[test]
    fn test_no_results_no_winner() {
        assert!(pick_winner(&[]).is_none());
    }

    #[test]
    fn test_score_weights() {
        let scored = score_result(
            "a".to_string(),
            json!({"quality": 1.0, "confidence": 1.0}),
            0,
        );
        assert!((scored.score - 1.0).abs() < 1e-9);

        let scored = score_result("a".to_string(), json!({}), 0);
        // Defaults: 0.6*0.5 + 0.3*1.0 + 0.1*0.5
        assert!((scored.score - 0.65).abs() < 1e-9);
    }

    #[test]
    fn test_slow_branch_gets_no_speed_credit() {
        let fast = score_result("a".to_string(), json!({"quality": 0.5}), 0);
        let slow = score_result("b".to_string(), json!({"quality": 0.5}), 45_000);
        assert!(fast.score > slow.score);
        assert!((slow.score - (0.6 * 0.5 + 0.1 * 0.5)).abs() < 1e-9);
    }
}
