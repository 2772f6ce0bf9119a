//! Signed message envelopes for inter-agent communication.
//!
//! An envelope is immutable after construction: the signature covers
//! id, timestamp, sender, type, and payload, and delivery is refused
//! when recomputing the keyed hash does not match.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt::Write as _;
use std::time::{SystemTime, UNIX_EPOCH};

use super::types::{MessageType, Priority, Recipient};
use crate::error::{Error, Result};

/// Default envelope time-to-live in seconds.
pub const DEFAULT_TTL_SECS: u64 = 300;

/// Keyed-hash signer for envelopes, holding the process-wide secret.
#[derive(Debug, Clone)]
pub struct Signer {
    secret: String,
}

impl Signer {
    /// Create a signer from a shared secret.
    pub fn new(secret: impl Into<String>) -> Self {
        Self {
            secret: secret.into(),
        }
    }

    /// Compute the signature over an envelope's immutable fields.
    pub fn sign(
        &self,
        id: &str,
        timestamp: i64,
        from_agent: &str,
        message_type: MessageType,
        payload: &serde_json::Value,
    ) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.secret.as_bytes());
        hasher.update(b"\n");
        hasher.update(id.as_bytes());
        hasher.update(b"\n");
        hasher.update(timestamp.to_string().as_bytes());
        hasher.update(b"\n");
        hasher.update(from_agent.as_bytes());
        hasher.update(b"\n");
        hasher.update(serde_json::to_string(&message_type).unwrap_or_default().as_bytes());
        hasher.update(b"\n");
        hasher.update(payload.to_string().as_bytes());

        let digest = hasher.finalize();
        digest.iter().fold(String::with_capacity(64), |mut out, b| {
            let _ = write!(out, "{:02x}", b);
            out
        })
    }

    /// Recompute an envelope's signature and compare against the stored one.
    pub fn verify(&self, envelope: &Envelope) -> bool {
        let expected = self.sign(
            &envelope.id,
            envelope.timestamp,
            &envelope.from_agent,
            envelope.message_type,
            &envelope.payload,
        );
        expected == envelope.signature
    }
}

/// A signed, timestamped, ttl-bounded unit of inter-agent communication.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Envelope {
    /// Unique message ID (ULID)
    pub id: String,
    /// Creation timestamp (unix ms)
    pub timestamp: i64,
    /// Sender agent ID
    pub from_agent: String,
    /// Recipient specification
    pub to: Recipient,
    /// Message type
    pub message_type: MessageType,
    /// Structured payload
    pub payload: serde_json::Value,
    /// Priority level
    pub priority: Priority,
    /// Time-to-live in seconds
    pub ttl_seconds: u64,
    /// Correlation ID linking a response back to its originating request
    pub correlation_id: Option<String>,
    /// Keyed hash over (id, timestamp, sender, type, payload)
    pub signature: String,
}

impl Envelope {
    /// Check whether this envelope's signature matches its contents.
    pub fn verify(&self, signer: &Signer) -> bool {
        signer.verify(self)
    }

    /// Check whether the envelope has outlived its ttl.
    pub fn is_expired(&self) -> bool {
        self.is_expired_at(current_timestamp())
    }

    /// Expiry check against an explicit clock, for deterministic sweeps.
    pub fn is_expired_at(&self, now_ms: i64) -> bool {
        self.timestamp + (self.ttl_seconds as i64) * 1000 < now_ms
    }

    /// Build a response envelope answering this one, carrying this
    /// envelope's id as the correlation id.
    pub fn respond(&self, from_agent: impl Into<String>, payload: serde_json::Value, signer: &Signer) -> Result<Envelope> {
        EnvelopeBuilder::from(from_agent)
            .to(Recipient::Agent(self.from_agent.clone()))
            .message_type(MessageType::Response)
            .payload(payload)
            .correlation_id(self.id.clone())
            .build(signer)
    }
}

/// Fluent builder for envelopes; signing happens at `build`.
pub struct EnvelopeBuilder {
    from_agent: String,
    to: Option<Recipient>,
    message_type: Option<MessageType>,
    payload: serde_json::Value,
    priority: Priority,
    ttl_seconds: u64,
    correlation_id: Option<String>,
}

impl EnvelopeBuilder {
    /// Start building an envelope from a sender.
    pub fn from(agent_id: impl Into<String>) -> Self {
        Self {
            from_agent: agent_id.into(),
            to: None,
            message_type: None,
            payload: serde_json::Value::Null,
            priority: Priority::Normal,
            ttl_seconds: DEFAULT_TTL_SECS,
            correlation_id: None,
        }
    }

    /// Set the recipient spec.
    pub fn to(mut self, recipient: impl Into<Recipient>) -> Self {
        self.to = Some(recipient.into());
        self
    }

    /// Set the message type.
    pub fn message_type(mut self, message_type: MessageType) -> Self {
        self.message_type = Some(message_type);
        self
    }

    /// Set the payload.
    pub fn payload(mut self, payload: serde_json::Value) -> Self {
        self.payload = payload;
        self
    }

    /// Set the priority.
    pub fn priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    /// Set the ttl in seconds.
    pub fn ttl(mut self, seconds: u64) -> Self {
        self.ttl_seconds = seconds;
        self
    }

    /// Set the correlation id.
    pub fn correlation_id(mut self, id: impl Into<String>) -> Self {
        self.correlation_id = Some(id.into());
        self
    }

    /// Sign and build the envelope.
    pub fn build(self, signer: &Signer) -> Result<Envelope> {
        let to = self
            .to
            .ok_or_else(|| Error::Other("Envelope recipient is required".to_string()))?;
        let message_type = self
            .message_type
            .ok_or_else(|| Error::Other("Envelope message type is required".to_string()))?;

        let id = ulid::Ulid::new().to_string();
        let timestamp = current_timestamp();
        let signature = signer.sign(&id, timestamp, &self.from_agent, message_type, &self.payload);

        Ok(Envelope {
            id,
            timestamp,
            from_agent: self.from_agent,
            to,
            message_type,
            payload: self.payload,
            priority: self.priority,
            ttl_seconds: self.ttl_seconds,
            correlation_id: self.correlation_id,
            signature,
        })
    }
}

pub(crate) fn current_timestamp() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}
