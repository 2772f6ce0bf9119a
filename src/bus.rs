//! The message bus: participant registry, channels, bounded envelope
//! history, and request/response correlation.
//!
//! The bus exclusively owns the registration and subscription tables;
//! agents and strategies only send and query through it. Delivery is
//! best-effort fan-out with no retry: each resolved recipient is
//! attempted independently and per-recipient failures never abort
//! sibling deliveries.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde::Serialize;
use tokio::sync::oneshot;

use crate::agent::{AgentHandle, AgentMetrics, AgentState};
use crate::error::{Error, Result};
use crate::protocol::envelope::current_timestamp;
use crate::protocol::{Envelope, EnvelopeBuilder, MessageType, Recipient, Signer};

/// Default retained-envelope capacity.
pub const DEFAULT_HISTORY_CAPACITY: usize = 10_000;

/// Registry entry for one participant; owned exclusively by the bus.
struct AgentRecord {
    handle: Arc<AgentHandle>,
    subscriptions: HashSet<String>,
    last_seen: i64,
}

/// Per-recipient delivery failure.
#[derive(Debug, Clone, Serialize)]
pub struct DeliveryFailure {
    pub agent_id: String,
    pub reason: String,
}

/// Outcome of one `send`: which recipients took the envelope and which
/// did not.
#[derive(Debug, Clone, Serialize)]
pub struct DeliveryReport {
    pub message_id: String,
    pub delivered: Vec<String>,
    pub failures: Vec<DeliveryFailure>,
}

/// Outcome of a channel broadcast.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum BroadcastOutcome {
    NoSubscribers { channel: String },
    Delivered(DeliveryReport),
}

/// Predicate filter over the retained history.
#[derive(Debug, Clone, Default)]
pub struct HistoryFilter {
    pub sender: Option<String>,
    pub recipient: Option<String>,
    pub message_type: Option<MessageType>,
    pub since: Option<i64>,
    pub until: Option<i64>,
}

impl HistoryFilter {
    fn matches(&self, envelope: &Envelope) -> bool {
        if let Some(sender) = &self.sender {
            if &envelope.from_agent != sender {
                return false;
            }
        }
        if let Some(recipient) = &self.recipient {
            if !envelope.to.includes(recipient) {
                return false;
            }
        }
        if let Some(message_type) = self.message_type {
            if envelope.message_type != message_type {
                return false;
            }
        }
        if let Some(since) = self.since {
            if envelope.timestamp < since {
                return false;
            }
        }
        if let Some(until) = self.until {
            if envelope.timestamp > until {
                return false;
            }
        }
        true
    }
}

/// Aggregate bus counters for the observability surface.
#[derive(Debug, Clone, Default, Serialize)]
pub struct BusMetrics {
    pub sent: u64,
    pub delivered: u64,
    pub failed_deliveries: u64,
    pub rejected: u64,
    pub history_len: usize,
    pub agent_count: usize,
    pub channel_count: usize,
    pub pending_requests: usize,
}

/// Point-in-time status of one registered agent.
#[derive(Debug, Clone, Serialize)]
pub struct AgentStatus {
    pub id: String,
    pub role: String,
    pub state: AgentState,
    pub last_seen: i64,
    pub metrics: AgentMetrics,
}

#[derive(Default)]
struct Counters {
    sent: u64,
    delivered: u64,
    failed_deliveries: u64,
    rejected: u64,
}

/// The signed pub/sub fabric connecting all agents.
pub struct MessageBus {
    signer: Signer,
    history_capacity: usize,
    default_ttl_secs: u64,
    agents: Mutex<HashMap<String, AgentRecord>>,
    channels: Mutex<HashMap<String, HashSet<String>>>,
    history: Mutex<VecDeque<Envelope>>,
    pending: Mutex<HashMap<String, oneshot::Sender<Envelope>>>,
    counters: Mutex<Counters>,
}

impl MessageBus {
    /// Create a bus with the given signer and retention settings.
    pub fn new(signer: Signer, history_capacity: usize, default_ttl_secs: u64) -> Self {
        Self {
            signer,
            history_capacity,
            default_ttl_secs,
            agents: Mutex::new(HashMap::new()),
            channels: Mutex::new(HashMap::new()),
            history: Mutex::new(VecDeque::new()),
            pending: Mutex::new(HashMap::new()),
            counters: Mutex::new(Counters::default()),
        }
    }

    /// The envelope signer shared by every participant on this bus.
    pub fn signer(&self) -> &Signer {
        &self.signer
    }

    /// Default ttl for envelopes the bus builds itself.
    pub fn default_ttl_secs(&self) -> u64 {
        self.default_ttl_secs
    }

    /// Register a participant. Fails if the id is already taken.
    pub fn register_agent(&self, handle: Arc<AgentHandle>) -> Result<()> {
        let mut agents = self.agents.lock().unwrap();
        let id = handle.id().to_string();
        if agents.contains_key(&id) {
            return Err(Error::AgentExists(id));
        }
        tracing::info!("Registered agent {} ({})", id, handle.role());
        agents.insert(
            id,
            AgentRecord {
                handle,
                subscriptions: HashSet::new(),
                last_seen: current_timestamp(),
            },
        );
        Ok(())
    }

    /// Remove a participant: marks it offline and drops its registry
    /// entry and channel subscriptions.
    pub fn unregister_agent(&self, agent_id: &str) -> Result<()> {
        let record = self
            .agents
            .lock()
            .unwrap()
            .remove(agent_id)
            .ok_or_else(|| Error::AgentNotFound(agent_id.to_string()))?;
        record.handle.shutdown();

        let mut channels = self.channels.lock().unwrap();
        for channel in &record.subscriptions {
            if let Some(members) = channels.get_mut(channel) {
                members.remove(agent_id);
            }
        }
        tracing::info!("Unregistered agent {}", agent_id);
        Ok(())
    }

    /// Subscribe a registered agent to a channel.
    pub fn subscribe(&self, agent_id: &str, channel: &str) -> Result<()> {
        let mut agents = self.agents.lock().unwrap();
        let record = agents
            .get_mut(agent_id)
            .ok_or_else(|| Error::AgentNotFound(agent_id.to_string()))?;
        record.subscriptions.insert(channel.to_string());

        self.channels
            .lock()
            .unwrap()
            .entry(channel.to_string())
            .or_default()
            .insert(agent_id.to_string());
        Ok(())
    }

    /// Remove a channel subscription.
    pub fn unsubscribe(&self, agent_id: &str, channel: &str) -> Result<()> {
        let mut agents = self.agents.lock().unwrap();
        let record = agents
            .get_mut(agent_id)
            .ok_or_else(|| Error::AgentNotFound(agent_id.to_string()))?;
        record.subscriptions.remove(channel);

        if let Some(members) = self.channels.lock().unwrap().get_mut(channel) {
            members.remove(agent_id);
        }
        Ok(())
    }

    /// All registered agent handles, ordered by id for deterministic
    /// iteration.
    pub fn agents(&self) -> Vec<Arc<AgentHandle>> {
        let agents = self.agents.lock().unwrap();
        let mut ids: Vec<&String> = agents.keys().collect();
        ids.sort();
        ids.iter()
            .map(|id| Arc::clone(&agents[id.as_str()].handle))
            .collect()
    }

    /// Look up one agent handle.
    pub fn agent(&self, agent_id: &str) -> Option<Arc<AgentHandle>> {
        self.agents
            .lock()
            .unwrap()
            .get(agent_id)
            .map(|r| Arc::clone(&r.handle))
    }

    /// Verify, record, and deliver an envelope.
    ///
    /// A bad signature is fatal and rejects the send before any delivery
    /// attempt. Envelopes an agent emits while handling delivery (auto
    /// responses, error reports) ride an internal work queue, so
    /// per-recipient send order is preserved without recursion. The
    /// returned report covers the submitted envelope only.
    pub async fn send(&self, envelope: Envelope) -> Result<DeliveryReport> {
        if !envelope.verify(&self.signer) {
            self.counters.lock().unwrap().rejected += 1;
            tracing::error!("Rejected envelope {} with bad signature", envelope.id);
            return Err(Error::BadSignature(envelope.id));
        }

        let mut report = DeliveryReport {
            message_id: envelope.id.clone(),
            delivered: Vec::new(),
            failures: Vec::new(),
        };

        let mut queue: VecDeque<(Envelope, bool)> = VecDeque::new();
        queue.push_back((envelope, true));

        while let Some((env, is_primary)) = queue.pop_front() {
            if !is_primary && !env.verify(&self.signer) {
                tracing::warn!("Dropping follow-up envelope {} with bad signature", env.id);
                self.counters.lock().unwrap().rejected += 1;
                continue;
            }

            self.counters.lock().unwrap().sent += 1;
            self.record_history(env.clone());

            for target in self.resolve_recipients(&env.to) {
                // A response (or error report) carrying a correlation id
                // resolves the matching pending request instead of going
                // through normal delivery. A late reply finds no entry
                // and falls through; with the waiter gone it lands in
                // history only.
                if let Some(correlation_id) = &env.correlation_id {
                    let waiter = self.pending.lock().unwrap().remove(correlation_id);
                    if let Some(tx) = waiter {
                        let _ = tx.send(env.clone());
                        self.counters.lock().unwrap().delivered += 1;
                        if is_primary {
                            report.delivered.push(target);
                        }
                        continue;
                    }
                }

                let handle = {
                    let mut agents = self.agents.lock().unwrap();
                    match agents.get_mut(&target) {
                        Some(record) => {
                            record.last_seen = current_timestamp();
                            Some(Arc::clone(&record.handle))
                        }
                        None => None,
                    }
                };

                let Some(handle) = handle else {
                    tracing::debug!("Envelope {} addressed to unknown agent {}", env.id, target);
                    self.counters.lock().unwrap().failed_deliveries += 1;
                    if is_primary {
                        report.failures.push(DeliveryFailure {
                            agent_id: target,
                            reason: "recipient not found".to_string(),
                        });
                    }
                    continue;
                };

                let (result, outbound) = handle.receive_message(&env, &self.signer).await;
                match result {
                    Ok(_) => {
                        self.counters.lock().unwrap().delivered += 1;
                        if is_primary {
                            report.delivered.push(target);
                        }
                    }
                    Err(e) => {
                        // The agent already emitted its error report; the
                        // bus records the failure and carries on with the
                        // remaining recipients.
                        self.counters.lock().unwrap().failed_deliveries += 1;
                        tracing::warn!("Delivery of {} to {} failed: {}", env.id, target, e);
                        if is_primary {
                            report.failures.push(DeliveryFailure {
                                agent_id: target,
                                reason: e.to_string(),
                            });
                        }
                    }
                }

                for out in outbound {
                    queue.push_back((out, false));
                }
            }
        }

        Ok(report)
    }

    /// Broadcast a payload to a channel's current subscribers.
    ///
    /// A channel with no subscribers short-circuits without building an
    /// envelope.
    pub async fn broadcast(
        &self,
        from_agent: &str,
        channel: &str,
        payload: serde_json::Value,
    ) -> Result<BroadcastOutcome> {
        let subscribers: Vec<String> = {
            let channels = self.channels.lock().unwrap();
            let mut members: Vec<String> = channels
                .get(channel)
                .map(|m| m.iter().cloned().collect())
                .unwrap_or_default();
            members.sort();
            members
        };

        if subscribers.is_empty() {
            tracing::debug!("Broadcast to channel {} with no subscribers", channel);
            return Ok(BroadcastOutcome::NoSubscribers {
                channel: channel.to_string(),
            });
        }

        let envelope = EnvelopeBuilder::from(from_agent)
            .to(Recipient::Agents(subscribers))
            .message_type(MessageType::Broadcast)
            .payload(payload)
            .ttl(self.default_ttl_secs)
            .build(&self.signer)?;

        let report = self.send(envelope).await?;
        Ok(BroadcastOutcome::Delivered(report))
    }

    /// Send a request envelope and await the correlated response.
    ///
    /// A pending entry keyed by the envelope id is registered before the
    /// send; the matching response resolves it, and the timeout removes
    /// it and yields a local failure. The callee's in-flight work is not
    /// cancelled; a reply arriving after the timeout is accepted into
    /// history but resolves nothing.
    pub async fn request(
        self: &Arc<Self>,
        envelope: Envelope,
        timeout: Duration,
    ) -> Result<Envelope> {
        if !envelope.verify(&self.signer) {
            self.counters.lock().unwrap().rejected += 1;
            return Err(Error::BadSignature(envelope.id));
        }

        let query_id = envelope.id.clone();
        let target = match &envelope.to {
            Recipient::Agent(id) => id.clone(),
            Recipient::Agents(ids) => ids.join(","),
            Recipient::Broadcast => "broadcast".to_string(),
        };

        let (tx, rx) = oneshot::channel();
        self.pending.lock().unwrap().insert(query_id.clone(), tx);

        let bus = Arc::clone(self);
        tokio::spawn(async move {
            if let Err(e) = bus.send(envelope).await {
                tracing::warn!("Request send failed: {}", e);
            }
        });

        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(reply)) => Ok(reply),
            Ok(Err(_)) => {
                self.pending.lock().unwrap().remove(&query_id);
                Err(Error::Bus("reply channel dropped".to_string()))
            }
            Err(_) => {
                self.pending.lock().unwrap().remove(&query_id);
                tracing::debug!("Request {} to {} timed out", query_id, target);
                Err(Error::ResponseTimeout(target))
            }
        }
    }

    /// Pure predicate filter over the retained envelopes.
    pub fn query_history(&self, filter: &HistoryFilter) -> Vec<Envelope> {
        self.history
            .lock()
            .unwrap()
            .iter()
            .filter(|e| filter.matches(e))
            .cloned()
            .collect()
    }

    /// Remove exactly the ttl-expired envelopes from history; independent
    /// of capacity-based eviction. Returns the number removed.
    pub fn cleanup(&self) -> usize {
        let now = current_timestamp();
        let mut history = self.history.lock().unwrap();
        let before = history.len();
        history.retain(|e| !e.is_expired_at(now));
        let removed = before - history.len();
        if removed > 0 {
            tracing::debug!("Swept {} expired envelopes from history", removed);
        }
        removed
    }

    /// Aggregate counters for the observability surface.
    pub fn metrics(&self) -> BusMetrics {
        let counters = self.counters.lock().unwrap();
        BusMetrics {
            sent: counters.sent,
            delivered: counters.delivered,
            failed_deliveries: counters.failed_deliveries,
            rejected: counters.rejected,
            history_len: self.history.lock().unwrap().len(),
            agent_count: self.agents.lock().unwrap().len(),
            channel_count: self.channels.lock().unwrap().len(),
            pending_requests: self.pending.lock().unwrap().len(),
        }
    }

    /// Status snapshot of every registered agent, ordered by id.
    pub fn agent_statuses(&self) -> Vec<AgentStatus> {
        let agents = self.agents.lock().unwrap();
        let mut statuses: Vec<AgentStatus> = agents
            .values()
            .map(|record| AgentStatus {
                id: record.handle.id().to_string(),
                role: record.handle.role().to_string(),
                state: record.handle.state(),
                last_seen: record.last_seen,
                metrics: record.handle.metrics(),
            })
            .collect();
        statuses.sort_by(|a, b| a.id.cmp(&b.id));
        statuses
    }

    fn resolve_recipients(&self, recipient: &Recipient) -> Vec<String> {
        match recipient {
            Recipient::Agent(id) => vec![id.clone()],
            Recipient::Agents(ids) => ids.clone(),
            Recipient::Broadcast => {
                let agents = self.agents.lock().unwrap();
                let mut ids: Vec<String> = agents.keys().cloned().collect();
                ids.sort();
                ids
            }
        }
    }

    fn record_history(&self, envelope: Envelope) {
        let mut history = self.history.lock().unwrap();
        history.push_back(envelope);
        while history.len() > self.history_capacity {
            history.pop_front();
        }
    }
}
