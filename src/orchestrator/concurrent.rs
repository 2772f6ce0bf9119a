//! Concurrent strategy: fan the identical task out to every selected
//! agent, isolate branch faults, and synthesize the fulfilled results.

use async_trait::async_trait;
use futures::future::join_all;
use std::sync::Arc;
use std::time::Duration;

use super::{
    exchange, BranchFailure, BranchResult, OutcomeStatus, Strategy, StrategyContext,
    StrategyOutcome,
};
use crate::agent::AgentHandle;
use crate::error::Result;
use crate::protocol::{EnvelopeBuilder, MessageType};
use crate::task::{SynthesisMode, Task};

pub struct ConcurrentStrategy;

#[async_trait]
impl Strategy for ConcurrentStrategy {
    async fn execute(
        &self,
        task: &Task,
        agents: &[Arc<AgentHandle>],
        ctx: &StrategyContext,
    ) -> Result<StrategyOutcome> {
        let timeout = Duration::from_secs(ctx.config.timeouts.step_secs);

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

        // Branches launch in selection order; a fault in one never
        // cancels the others.
        let branches = join_all(requests.into_iter().map(|(agent_id, envelope)| async move {
            let outcome = exchange(ctx, envelope, timeout).await;
            (agent_id, outcome)
        }))
        .await;

        let mut results = Vec::new();
        let mut failures = Vec::new();
        for (agent_id, outcome) in branches {
            match outcome {
                Ok(data) => results.push(BranchResult { agent_id, data }),
                Err(e) => {
                    tracing::debug!("Concurrent branch {} failed: {}", agent_id, e);
                    failures.push(BranchFailure {
                        agent_id,
                        reason: e.to_string(),
                    });
                }
            }
        }

        let status = if failures.is_empty() {
            OutcomeStatus::Success
        } else {
            OutcomeStatus::Partial
        };
        let synthesis = synthesize(task.synthesis, &results);

        tracing::info!(
            "Concurrent task {}: {} fulfilled, {} failed -> {}",
            task.id,
            results.len(),
            failures.len(),
            status.as_str()
        );

        Ok(StrategyOutcome::Concurrent {
            status,
            results,
            failures,
            synthesis,
        })
    }
}

/// Combine fulfilled branch results per the task's synthesis mode;
/// absent or unrecognized modes fall back to the first fulfilled result.
fn synthesize(mode: Option<SynthesisMode>, results: &[BranchResult]) -> serde_json::Value {
    if results.is_empty() {
        return serde_json::Value::Null;
    }

    match mode {
        Some(SynthesisMode::Best) => results
            .iter()
            .max_by(|a, b| {
                confidence_of(&a.data)
                    .partial_cmp(&confidence_of(&b.data))
                    .unwrap_or(std::cmp::Ordering::Equal)
            })
            .map(|r| r.data.clone())
            .unwrap_or(serde_json::Value::Null),
        Some(SynthesisMode::Merge) => serde_json::Value::Array(
            results
                .iter()
                .map(|r| {
                    serde_json::json!({
                        "agent_id": r.agent_id,
                        "data": r.data,
                    })
                })
                .collect(),
        ),
        Some(SynthesisMode::First) | None => results[0].data.clone(),
    }
}

fn confidence_of(data: &serde_json::Value) -> f64 {
    data.get("confidence").and_then(|v| v.as_f64()).unwrap_or(0.5)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn branch(agent_id: &str, data: serde_json::Value) -> BranchResult {
        BranchResult {
            agent_id: agent_id.to_string(),
            data,
        }
    }

    #[test]
    fn test_synthesize_best_picks_highest_confidence() {
        let results = vec![
            branch("a", json!({"confidence": 0.4, "data": "low"})),
            branch("b", json!({"confidence": 0.9, "data": "high"})),
            branch("c", json!({"data": "none"})),
        ];
        let best = synthesize(Some(SynthesisMode::Best), &results);
        assert_eq!(best["data"], "high");
    }

    #[test]
    fn test_synthesize_merge_keeps_provenance() {
        let results = vec![
            branch("a", json!({"data": 1})),
            branch("b", json!({"data": 2})),
        ];
        let merged = synthesize(Some(SynthesisMode::Merge), &results);
        let arr = merged.as_array().unwrap();
        assert_eq!(arr.len(), 2);
        assert_eq!(arr[0]["agent_id"], "a");
        assert_eq!(arr[1]["data"]["data"], 2);
    }

    #[test]
    fn test_synthesize_default_takes_first() {
        let results = vec![
            branch("a", json!({"data": "first"})),
            branch("b", json!({"data": "second"})),
        ];
        assert_eq!(synthesize(None, &results)["data"], "first");
        assert_eq!(
            synthesize(Some(SynthesisMode::First), &results)["data"],
            "first"
        );
    }

    #[test]
    fn test_synthesize_empty_is_null() {
        assert_eq!(synthesize(Some(SynthesisMode::Best), &[]), serde_json::Value::Null);
    }
}
