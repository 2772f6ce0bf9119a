//! Agent communication protocol for swarmbus.
//!
//! This module defines the structured protocol for inter-agent
//! communication:
//! - Signed message envelopes with correlation IDs
//! - Typed message types (command, delegate, query, proposal, vote, ...)
//! - Priority and recipient specifications

pub mod envelope;
pub mod types;

pub use envelope::{Envelope, EnvelopeBuilder, Signer, DEFAULT_TTL_SECS};
pub use types::{MessageType, Priority, Recipient, VoteChoice, VoteRecord};
