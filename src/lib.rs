//! swarmbus: a signed message bus for cooperating agents plus an
//! orchestrator that routes tasks through pluggable coordination
//! strategies (council voting, emergency execution, concurrent fan-out,
//! sequential pipelines, and competitive best-of-N).
//!
//! Everything runs on one cooperative async runtime thread; interior
//! mutability is confined to the bus and agent handles, so there are no
//! cross-thread data races to reason about.

pub mod agent;
pub mod bus;
pub mod config;
pub mod error;
pub mod logging;
pub mod orchestrator;
pub mod protocol;
pub mod swarm;
pub mod task;

pub use agent::{AgentHandle, AgentMetrics, AgentProfile, AgentState, Authority, Behavior};
pub use bus::{
    AgentStatus, BroadcastOutcome, BusMetrics, DeliveryFailure, DeliveryReport, HistoryFilter,
    MessageBus,
};
pub use config::SwarmConfig;
pub use error::{Error, Result};
pub use orchestrator::{
    Orchestrator, OutcomeStatus, StrategyKind, StrategyOutcome, TraceEntry,
};
pub use protocol::{
    Envelope, EnvelopeBuilder, MessageType, Priority, Recipient, Signer, VoteChoice, VoteRecord,
};
pub use swarm::Swarm;
pub use task::{SynthesisMode, Task};
