//! Task orchestration: strategy selection, participant scoring, and
//! routing.
//!
//! Strategy dispatch is a closed tagged union ([`StrategyKind`]); each
//! kind maps to one stateless implementation of the shared [`Strategy`]
//! contract, so there is no invalid-strategy failure mode at runtime.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::agent::{AgentHandle, AgentState};
use crate::bus::MessageBus;
use crate::config::SwarmConfig;
use crate::error::{Error, Result};
use crate::protocol::{Envelope, MessageType, VoteRecord};
use crate::task::Task;

pub mod competitive;
pub mod concurrent;
pub mod council;
pub mod emergency;
pub mod sequential;

pub use competitive::CompetitiveStrategy;
pub use concurrent::ConcurrentStrategy;
pub use council::CouncilStrategy;
pub use emergency::EmergencyStrategy;
pub use sequential::SequentialStrategy;

/// The closed set of coordination strategies.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum StrategyKind {
    Council,
    Emergency,
    Concurrent,
    Sequential,
    Competitive,
}

impl StrategyKind {
    /// Deterministic rule table keyed on the task type, with secondary
    /// thresholds where relevant. Unmatched types default to sequential.
    pub fn for_task(task: &Task, config: &SwarmConfig) -> Self {
        match task.task_type.as_str() {
            "financial_approval" => {
                if task.amount.unwrap_or(0.0) > config.approval_threshold {
                    StrategyKind::Council
                } else {
                    StrategyKind::Sequential
                }
            }
            "system_alert" => {
                if task.is_critical() {
                    StrategyKind::Emergency
                } else {
                    StrategyKind::Concurrent
                }
            }
            "research" | "analysis" => StrategyKind::Concurrent,
            "optimization" => StrategyKind::Competitive,
            _ => StrategyKind::Sequential,
        }
    }

    fn strategy(self) -> &'static dyn Strategy {
        match self {
            StrategyKind::Council => &CouncilStrategy,
            StrategyKind::Emergency => &EmergencyStrategy,
            StrategyKind::Concurrent => &ConcurrentStrategy,
            StrategyKind::Sequential => &SequentialStrategy,
            StrategyKind::Competitive => &CompetitiveStrategy,
        }
    }
}

impl std::fmt::Display for StrategyKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            StrategyKind::Council => "council",
            StrategyKind::Emergency => "emergency",
            StrategyKind::Concurrent => "concurrent",
            StrategyKind::Sequential => "sequential",
            StrategyKind::Competitive => "competitive",
        };
        write!(f, "{}", name)
    }
}

/// Aggregate result status a strategy reports.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum OutcomeStatus {
    Approved,
    Rejected,
    Executed,
    Success,
    Partial,
    Completed,
    Failed,
}

impl OutcomeStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            OutcomeStatus::Approved => "approved",
            OutcomeStatus::Rejected => "rejected",
            OutcomeStatus::Executed => "executed",
            OutcomeStatus::Success => "success",
            OutcomeStatus::Partial => "partial",
            OutcomeStatus::Completed => "completed",
            OutcomeStatus::Failed => "failed",
        }
    }
}

/// One fulfilled fan-out branch.
#[derive(Debug, Clone, Serialize)]
pub struct BranchResult {
    pub agent_id: String,
    pub data: serde_json::Value,
}

/// One failed fan-out branch.
#[derive(Debug, Clone, Serialize)]
pub struct BranchFailure {
    pub agent_id: String,
    pub reason: String,
}

/// One executed pipeline step: what went in, what came out.
#[derive(Debug, Clone, Serialize)]
pub struct PipelineStep {
    pub agent_id: String,
    pub input: serde_json::Value,
    pub output: Option<serde_json::Value>,
    pub error: Option<String>,
}

/// One scored competitive branch.
#[derive(Debug, Clone, Serialize)]
pub struct ScoredResult {
    pub agent_id: String,
    pub score: f64,
    pub quality: f64,
    pub confidence: f64,
    pub execution_ms: u64,
    pub data: serde_json::Value,
}

/// The closed union of strategy results; `status` always communicates
/// the aggregate outcome.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "strategy", rename_all = "snake_case")]
pub enum StrategyOutcome {
    Council {
        status: OutcomeStatus,
        consensus: f64,
        votes: Vec<VoteRecord>,
    },
    Emergency {
        status: OutcomeStatus,
        agent_id: String,
        action: serde_json::Value,
    },
    Concurrent {
        status: OutcomeStatus,
        results: Vec<BranchResult>,
        failures: Vec<BranchFailure>,
        synthesis: serde_json::Value,
    },
    Sequential {
        status: OutcomeStatus,
        steps: Vec<PipelineStep>,
        output: Option<serde_json::Value>,
    },
    Competitive {
        status: OutcomeStatus,
        winner: Option<ScoredResult>,
        results: Vec<ScoredResult>,
        failures: Vec<BranchFailure>,
    },
}

impl StrategyOutcome {
    /// The aggregate status, regardless of variant.
    pub fn status(&self) -> OutcomeStatus {
        match self {
            StrategyOutcome::Council { status, .. }
            | StrategyOutcome::Emergency { status, .. }
            | StrategyOutcome::Concurrent { status, .. }
            | StrategyOutcome::Sequential { status, .. }
            | StrategyOutcome::Competitive { status, .. } => *status,
        }
    }
}

/// Everything a strategy needs besides the task and the participants.
pub struct StrategyContext {
    pub bus: Arc<MessageBus>,
    pub config: Arc<SwarmConfig>,
    pub orchestrator_id: String,
}

/// The shared coordination contract: route one task through a set of
/// participants and combine their answers.
#[async_trait]
pub trait Strategy: Send + Sync {
    async fn execute(
        &self,
        task: &Task,
        agents: &[Arc<AgentHandle>],
        ctx: &StrategyContext,
    ) -> Result<StrategyOutcome>;
}

/// Issue one request/response exchange and unwrap the reply payload.
///
/// An error report resolving the exchange counts as that participant's
/// failure, same as a timeout.
pub(crate) async fn exchange(
    ctx: &StrategyContext,
    envelope: Envelope,
    timeout: Duration,
) -> Result<serde_json::Value> {
    let reply = ctx.bus.request(envelope, timeout).await?;
    if reply.message_type == MessageType::Error {
        let reason = reply
            .payload
            .get("error")
            .and_then(|v| v.as_str())
            .unwrap_or("agent reported an error")
            .to_string();
        return Err(Error::Processing(reason));
    }
    Ok(reply.payload)
}

/// One recorded summary of a routed task.
#[derive(Debug, Clone, Serialize)]
pub struct TraceEntry {
    pub task_id: String,
    pub task_type: String,
    pub strategy: StrategyKind,
    pub participants: Vec<String>,
    pub status: OutcomeStatus,
    pub timestamp: String,
}

/// The privileged participant that picks a strategy per task, scores and
/// selects agents, and dispatches.
pub struct Orchestrator {
    ctx: StrategyContext,
    trace: Mutex<std::collections::VecDeque<TraceEntry>>,
}

impl Orchestrator {
    /// Default orchestrator id on the fabric.
    pub const ID: &'static str = "orchestrator";

    pub fn new(bus: Arc<MessageBus>, config: Arc<SwarmConfig>) -> Self {
        Self {
            ctx: StrategyContext {
                bus,
                config,
                orchestrator_id: Self::ID.to_string(),
            },
            trace: Mutex::new(std::collections::VecDeque::new()),
        }
    }

    /// Pick the strategy for a task via the rule table.
    pub fn select_strategy(&self, task: &Task) -> StrategyKind {
        StrategyKind::for_task(task, &self.ctx.config)
    }

    /// Weighted suitability score in [0, 1].
    ///
    /// Skill overlap (weight 0.4, flat 0.2 with no required skills),
    /// availability (0.3 idle, 0.1 otherwise), historical success rate
    /// (weight 0.2, defaulting to 0.8 with no history), and a 0.1 bonus
    /// when the task's preferred role matches.
    pub fn score_agent(agent: &AgentHandle, task: &Task) -> f64 {
        let skill_score = if task.required_skills.is_empty() {
            0.2
        } else {
            let matching = task
                .required_skills
                .iter()
                .filter(|s| agent.profile().skills.contains(s))
                .count();
            0.4 * matching as f64 / task.required_skills.len() as f64
        };

        let availability = if agent.state() == AgentState::Idle {
            0.3
        } else {
            0.1
        };

        let success = 0.2 * agent.metrics().success_rate().unwrap_or(0.8);

        let role_bonus = if task.preferred_role.as_deref() == Some(agent.role()) {
            0.1
        } else {
            0.0
        };

        skill_score + availability + success + role_bonus
    }

    /// Score, filter, and order participants for a strategy.
    pub fn select_agents(&self, task: &Task, kind: StrategyKind) -> Vec<Arc<AgentHandle>> {
        let mut scored: Vec<(f64, Arc<AgentHandle>)> = self
            .ctx
            .bus
            .agents()
            .into_iter()
            .map(|agent| (Self::score_agent(&agent, task), agent))
            .filter(|(score, _)| *score >= self.ctx.config.min_score)
            .collect();

        // Descending by score; bus iteration order (by id) breaks ties.
        scored.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap_or(std::cmp::Ordering::Equal));

        match kind {
            StrategyKind::Council | StrategyKind::Competitive => {
                Self::pick_role_diverse(scored, 3)
            }
            StrategyKind::Emergency => scored.into_iter().take(1).map(|(_, a)| a).collect(),
            StrategyKind::Concurrent => scored.into_iter().take(3).map(|(_, a)| a).collect(),
            StrategyKind::Sequential => self.order_by_role_precedence(scored),
        }
    }

    /// Up to `limit` agents, preferring one per distinct role first, then
    /// filling remaining slots with the next-highest scores.
    fn pick_role_diverse(
        scored: Vec<(f64, Arc<AgentHandle>)>,
        limit: usize,
    ) -> Vec<Arc<AgentHandle>> {
        let mut picked: Vec<Arc<AgentHandle>> = Vec::new();
        let mut seen_roles: HashSet<String> = HashSet::new();
        let mut leftovers: Vec<Arc<AgentHandle>> = Vec::new();

        for (_, agent) in scored {
            if picked.len() < limit && seen_roles.insert(agent.role().to_string()) {
                picked.push(agent);
            } else {
                leftovers.push(agent);
            }
        }
        for agent in leftovers {
            if picked.len() == limit {
                break;
            }
            picked.push(agent);
        }
        picked
    }

    /// Reorder eligible agents by the configured role precedence list;
    /// agents outside the list are appended in score order.
    fn order_by_role_precedence(
        &self,
        scored: Vec<(f64, Arc<AgentHandle>)>,
    ) -> Vec<Arc<AgentHandle>> {
        let precedence = &self.ctx.config.role_precedence;
        let mut ordered: Vec<Arc<AgentHandle>> = Vec::new();
        for role in precedence {
            for (_, agent) in scored.iter().filter(|(_, a)| a.role() == role) {
                ordered.push(Arc::clone(agent));
            }
        }
        for (_, agent) in &scored {
            if !precedence.iter().any(|r| r == agent.role()) {
                ordered.push(Arc::clone(agent));
            }
        }
        ordered
    }

    /// Route one task: pick a strategy and participants, execute, record
    /// a trace entry, and return the strategy's outcome verbatim.
    pub async fn route_task(&self, task: &Task) -> Result<StrategyOutcome> {
        let kind = self.select_strategy(task);
        let agents = self.select_agents(task, kind);

        if agents.is_empty() {
            tracing::warn!("No eligible agents for task {} ({})", task.id, task.task_type);
            return Err(Error::NoEligibleAgents(task.id.clone()));
        }

        let participants: Vec<String> = agents.iter().map(|a| a.id().to_string()).collect();
        tracing::info!(
            "Routing task {} ({}) via {} to [{}]",
            task.id,
            task.task_type,
            kind,
            participants.join(", ")
        );

        let outcome = kind.strategy().execute(task, &agents, &self.ctx).await?;

        self.record_trace(TraceEntry {
            task_id: task.id.clone(),
            task_type: task.task_type.clone(),
            strategy: kind,
            participants,
            status: outcome.status(),
            timestamp: chrono::Utc::now().to_rfc3339(),
        });

        Ok(outcome)
    }

    /// The most recent trace entries, newest last.
    pub fn recent_traces(&self, limit: usize) -> Vec<TraceEntry> {
        let trace = self.trace.lock().unwrap();
        trace
            .iter()
            .skip(trace.len().saturating_sub(limit))
            .cloned()
            .collect()
    }

    fn record_trace(&self, entry: TraceEntry) {
        let mut trace = self.trace.lock().unwrap();
        trace.push_back(entry);
        while trace.len() > self.ctx.config.trace_capacity {
            trace.pop_front();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::{AgentProfile, Behavior};
    use crate::protocol::{EnvelopeBuilder, Signer};
    use serde_json::json;

    struct Echo;

    #[async_trait]
    impl Behavior for Echo {
        async fn process_message(&self, envelope: &Envelope) -> Result<serde_json::Value> {
            Ok(envelope.payload.clone())
        }
    }

    struct Failing;

    #[async_trait]
    impl Behavior for Failing {
        async fn process_message(&self, _envelope: &Envelope) -> Result<serde_json::Value> {
            Err(Error::Other("broken".to_string()))
        }
    }

    fn handle(id: &str, role: &str, skills: &[&str]) -> Arc<AgentHandle> {
        Arc::new(AgentHandle::new(
            AgentProfile::new(id, role).with_skills(skills.iter().map(|s| s.to_string()).collect()),
            Echo,
        ))
    }

    fn orchestrator_with(agents: Vec<Arc<AgentHandle>>) -> Orchestrator {
        let config = Arc::new(SwarmConfig {
            signing_secret: "test-secret".to_string(),
            ..SwarmConfig::default()
        });
        let bus = Arc::new(MessageBus::new(
            Signer::new(&config.signing_secret),
            config.history_capacity,
            config.default_ttl_secs,
        ));
        for agent in agents {
            bus.register_agent(agent).unwrap();
        }
        Orchestrator::new(bus, config)
    }

    #[test]
    fn test_rule_table() {
        let config = SwarmConfig::default();

        let high = Task::new("financial_approval").with_amount(2500.0);
        assert_eq!(StrategyKind::for_task(&high, &config), StrategyKind::Council);

        let low = Task::new("financial_approval").with_amount(50.0);
        assert_eq!(StrategyKind::for_task(&low, &config), StrategyKind::Sequential);

        let critical = Task::new("system_alert").with_severity("critical");
        assert_eq!(StrategyKind::for_task(&critical, &config), StrategyKind::Emergency);

        let warning = Task::new("system_alert").with_severity("warning");
        assert_eq!(StrategyKind::for_task(&warning, &config), StrategyKind::Concurrent);

        assert_eq!(
            StrategyKind::for_task(&Task::new("research"), &config),
            StrategyKind::Concurrent
        );
        assert_eq!(
            StrategyKind::for_task(&Task::new("optimization"), &config),
            StrategyKind::Competitive
        );
        assert_eq!(
            StrategyKind::for_task(&Task::new("anything_else"), &config),
            StrategyKind::Sequential
        );
    }

    #[test]
    fn test_score_monotonic_in_skill_overlap() {
        let task = Task::new("job")
            .with_required_skills(vec!["rust".to_string(), "sql".to_string()]);

        let none = handle("a", "engineering", &[]);
        let one = handle("b", "engineering", &["rust"]);
        let both = handle("c", "engineering", &["rust", "sql"]);

        let s0 = Orchestrator::score_agent(&none, &task);
        let s1 = Orchestrator::score_agent(&one, &task);
        let s2 = Orchestrator::score_agent(&both, &task);
        assert!(s0 < s1 && s1 < s2);
    }

    #[test]
    fn test_score_flat_skill_component_without_requirements() {
        let task = Task::new("job");
        let agent = handle("a", "engineering", &["rust"]);
        // 0.2 flat skill + 0.3 idle + 0.2 * 0.8 default success rate
        let score = Orchestrator::score_agent(&agent, &task);
        assert!((score - 0.66).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_score_monotonic_in_availability() {
        let task = Task::new("job");
        let idle = handle("a", "engineering", &[]);
        let offline = handle("b", "engineering", &[]);
        offline.shutdown();

        // Same skills, no history on either; only availability differs.
        let gap = Orchestrator::score_agent(&idle, &task)
            - Orchestrator::score_agent(&offline, &task);
        assert!((gap - 0.2).abs() < 1e-9);

        // An error-latched agent also scores below an idle one.
        let errored = Arc::new(AgentHandle::new(
            AgentProfile::new("c", "engineering"),
            Failing,
        ));
        let signer = Signer::new("test-secret");
        let envelope = EnvelopeBuilder::from("orchestrator")
            .to("c")
            .message_type(MessageType::Query)
            .build(&signer)
            .unwrap();
        let (result, _) = errored.receive_message(&envelope, &signer).await;
        assert!(result.is_err());
        assert_eq!(errored.state(), AgentState::Error);

        assert!(
            Orchestrator::score_agent(&errored, &task) < Orchestrator::score_agent(&idle, &task)
        );
    }

    #[tokio::test]
    async fn test_score_monotonic_in_success_rate() {
        let task = Task::new("job");
        let fresh = handle("a", "engineering", &[]);
        let proven = handle("b", "engineering", &[]);

        // Four clean handles leave the agent idle with a perfect rate.
        let signer = Signer::new("test-secret");
        for _ in 0..4 {
            let envelope = EnvelopeBuilder::from("orchestrator")
                .to("b")
                .message_type(MessageType::Report)
                .build(&signer)
                .unwrap();
            let (result, _) = proven.receive_message(&envelope, &signer).await;
            assert!(result.is_ok());
        }
        assert_eq!(proven.state(), AgentState::Idle);
        assert_eq!(proven.metrics().success_rate(), Some(1.0));

        // No history scores with the 0.8 default; 1.0 beats it by exactly
        // the weighted difference.
        let gap = Orchestrator::score_agent(&proven, &task)
            - Orchestrator::score_agent(&fresh, &task);
        assert!((gap - 0.04).abs() < 1e-9);
    }

    #[test]
    fn test_score_role_bonus() {
        let task = Task::new("job").with_preferred_role("finance");
        let finance = handle("a", "finance", &[]);
        let other = handle("b", "engineering", &[]);
        let fs = Orchestrator::score_agent(&finance, &task);
        let os = Orchestrator::score_agent(&other, &task);
        assert!((fs - os - 0.1).abs() < 1e-9);
    }

    #[test]
    fn test_emergency_selects_single_top_scorer() {
        let task = Task::new("system_alert")
            .with_severity("critical")
            .with_required_skills(vec!["triage".to_string()]);
        let orch = orchestrator_with(vec![
            handle("alpha", "operations", &["triage"]),
            handle("beta", "operations", &[]),
            handle("gamma", "support", &[]),
        ]);

        let selected = orch.select_agents(&task, StrategyKind::Emergency);
        assert_eq!(selected.len(), 1);
        assert_eq!(selected[0].id(), "alpha");
    }

    #[test]
    fn test_council_prefers_distinct_roles() {
        let task = Task::new("financial_approval").with_amount(5000.0);
        let orch = orchestrator_with(vec![
            handle("fin1", "finance", &[]),
            handle("fin2", "finance", &[]),
            handle("eng1", "engineering", &[]),
            handle("ops1", "operations", &[]),
        ]);

        let selected = orch.select_agents(&task, StrategyKind::Council);
        assert_eq!(selected.len(), 3);
        let roles: HashSet<&str> = selected.iter().map(|a| a.role()).collect();
        assert_eq!(roles.len(), 3);
    }

    #[test]
    fn test_council_fills_slots_when_roles_repeat() {
        let task = Task::new("financial_approval").with_amount(5000.0);
        let orch = orchestrator_with(vec![
            handle("fin1", "finance", &[]),
            handle("fin2", "finance", &[]),
        ]);

        let selected = orch.select_agents(&task, StrategyKind::Council);
        // Only one distinct role available; remaining slot filled anyway.
        assert_eq!(selected.len(), 2);
    }

    #[test]
    fn test_sequential_orders_by_role_precedence() {
        let task = Task::new("workflow");
        let orch = orchestrator_with(vec![
            handle("support1", "support", &[]),
            handle("eng1", "engineering", &[]),
            handle("fin1", "finance", &[]),
            handle("extra", "marketing", &[]),
        ]);

        let selected = orch.select_agents(&task, StrategyKind::Sequential);
        let ids: Vec<&str> = selected.iter().map(|a| a.id()).collect();
        assert_eq!(ids, vec!["fin1", "eng1", "support1", "extra"]);
    }

    #[test]
    fn test_low_scorers_excluded() {
        let task = Task::new("job").with_required_skills(vec!["rust".to_string()]);
        let orch = orchestrator_with(vec![handle("novice", "engineering", &[])]);

        // 0.0 skill + 0.3 idle + 0.16 success = 0.46 >= 0.3, still in;
        // raise the bar via config to force exclusion.
        let selected = orch.select_agents(&task, StrategyKind::Concurrent);
        assert_eq!(selected.len(), 1);

        let config = Arc::new(SwarmConfig {
            signing_secret: "test-secret".to_string(),
            min_score: 0.5,
            ..SwarmConfig::default()
        });
        let bus = Arc::new(MessageBus::new(
            Signer::new(&config.signing_secret),
            config.history_capacity,
            config.default_ttl_secs,
        ));
        bus.register_agent(handle("novice", "engineering", &[])).unwrap();
        let strict = Orchestrator::new(bus, config);
        assert!(strict.select_agents(&task, StrategyKind::Concurrent).is_empty());
    }

    #[tokio::test]
    async fn test_route_task_without_agents_is_fatal() {
        let orch = orchestrator_with(vec![]);
        let err = orch.route_task(&Task::new("anything")).await.unwrap_err();
        assert!(matches!(err, Error::NoEligibleAgents(_)));
        assert!(orch.recent_traces(10).is_empty());
    }

    #[tokio::test]
    async fn test_route_task_records_trace() {
        let orch = orchestrator_with(vec![handle("eng1", "engineering", &[])]);
        let task = Task::new("workflow").with_payload(json!({"step": 0}));

        let outcome = orch.route_task(&task).await.unwrap();
        assert_eq!(outcome.status(), OutcomeStatus::Completed);

        let traces = orch.recent_traces(10);
        assert_eq!(traces.len(), 1);
        assert_eq!(traces[0].strategy, StrategyKind::Sequential);
        assert_eq!(traces[0].participants, vec!["eng1".to_string()]);
        assert_eq!(traces[0].status, OutcomeStatus::Completed);
    }
}
