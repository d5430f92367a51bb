//! Grid evolution protocol
//!
//! Spreads an evolutionary run over a pool of workers. A client
//! (orchestrator) cuts its canonical population into fragments, workers
//! evolve each fragment locally and send back what they found, the client
//! merges and decides whether to go another round.
//!
//! # Architecture
//!
//! ```text
//!  ┌────────────┐  WorkRequest   ┌──────────────┐  WorkRequest   ┌────────┐
//!  │Orchestrator│───────────────►│ relay (LAN)  │───────────────►│Worker 1│
//!  │  (client)  │◄───────────────│ mailbox (WAN)│◄───────────────│Worker N│
//!  └────────────┘   WorkResult   └──────────────┘   WorkResult   └────────┘
//! ```
//!
//! ## Cycle
//! - Split: the canonical population becomes `fan_out` fragments
//!   (empty on the first cycle)
//! - Workers top each fragment up, evolve it and return the fittest
//!   candidate or a population
//! - The client merges results by request id, optionally evolves locally,
//!   and checks termination
//!
//! ## Transport
//! - LAN: persistent TCP connection to the relay, frames routed live
//! - WAN: store-and-forward mailboxes, polled with a timeout

pub mod config;
pub mod engine;
pub mod error;
pub mod feedback;
pub mod message;
pub mod orchestrator;
pub mod params;
pub mod registry;
pub mod shutdown;
pub mod strategy;
pub mod transport;
pub mod types;
pub mod worker;

pub use config::{GridConfig, NodeConfig};
pub use engine::{EvolutionEngine, SphereEngine};
pub use error::{ConfigError, OrchestratorError, StrategyError, TransportError};
pub use feedback::{Feedback, TracingFeedback};
pub use message::{Envelope, MessageContext, ResultPayload, WireMessage, WorkRequest, WorkResult};
pub use orchestrator::{Orchestrator, OrchestratorOptions, Phase, RunOutcome, RunReport};
pub use params::GridParams;
pub use registry::Registry;
pub use transport::{build_mediator, Mediator, NetworkMode, PeerRole, PollOptions, TransportSettings};
pub use types::{Candidate, Population};
pub use worker::{GridWorker, WorkerStats};
