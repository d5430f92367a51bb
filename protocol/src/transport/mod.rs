//! Message delivery between orchestrator and workers.
//!
//! ```text
//!  LAN:  client ──tcp──► relay ──tcp──► worker      (LanMediator)
//!  WAN:  client ──put──► mailbox ◄──poll── worker   (StoreMediator<S>)
//! ```
//!
//! Both modes implement [`Mediator`]. A poll that finds nothing returns
//! `Ok(None)`, which callers treat as "try again", never as a failure.

mod backup;
mod directory;
mod http;
mod lan;
mod retry;
mod store;

pub use backup::write_backup;
pub use directory::DirectoryStore;
pub use http::HttpStore;
pub use lan::{read_frame, write_frame, Frame, LanMediator, PeerRole};
pub use retry::RetryPolicy;
pub use store::{MemoryStore, MessageStore, StoreMediator};

use async_trait::async_trait;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use crate::error::TransportError;
use crate::message::{Envelope, MessageContext, WorkResult};

/// Synchronous same-network channel vs. asynchronous store-and-forward
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NetworkMode {
    Lan,
    Wan,
}

impl FromStr for NetworkMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "lan" => Ok(NetworkMode::Lan),
            "wan" => Ok(NetworkMode::Wan),
            other => Err(format!("unknown network mode `{other}` (expected LAN or WAN)")),
        }
    }
}

impl fmt::Display for NetworkMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NetworkMode::Lan => f.write_str("LAN"),
            NetworkMode::Wan => f.write_str("WAN"),
        }
    }
}

/// How long and how often `get_message` looks for a message
#[derive(Debug, Clone)]
pub struct PollOptions {
    /// `None` waits indefinitely
    pub max_wait: Option<Duration>,
    pub interval: Duration,
    pub remove_after_read: bool,
}

impl Default for PollOptions {
    fn default() -> Self {
        Self {
            max_wait: Some(Duration::from_secs(30)),
            interval: Duration::from_secs(1),
            remove_after_read: true,
        }
    }
}

impl PollOptions {
    pub fn wait(max_wait: Duration, interval: Duration) -> Self {
        Self { max_wait: Some(max_wait), interval, remove_after_read: true }
    }

    pub fn forever() -> Self {
        Self { max_wait: None, ..Default::default() }
    }
}

/// Sends and receives envelopes between orchestrator and workers.
///
/// Implementations use interior mutability so one instance can be shared as
/// `Arc<dyn Mediator>` between the loop that sends and the one that polls.
#[async_trait]
pub trait Mediator: Send + Sync {
    fn mode(&self) -> NetworkMode;

    async fn connect(&self) -> Result<(), TransportError>;

    async fn disconnect(&self) -> Result<(), TransportError>;

    /// Hand an envelope to the channel. Returns once the channel accepted it.
    async fn send(&self, envelope: Envelope) -> Result<(), TransportError>;

    /// Next envelope for `context`, or `Ok(None)` when nothing arrived
    /// within `poll.max_wait`.
    async fn get_message(
        &self,
        context: &MessageContext,
        poll: &PollOptions,
    ) -> Result<Option<Envelope>, TransportError>;

    /// Release every resource. Safe to call more than once.
    async fn stop(&self);

    /// Archive a result for audit or replay. Best-effort: callers log
    /// failures and carry on.
    async fn backup_result(
        &self,
        result: &WorkResult,
        sub_dir: &str,
        title: &str,
    ) -> Result<(), TransportError>;
}

/// Everything needed to build a mediator from command-line settings
#[derive(Debug, Clone)]
pub struct TransportSettings {
    pub mode: NetworkMode,
    /// Relay address (`host:port`) for LAN mode
    pub relay_addr: String,
    /// Mailbox server URL for WAN mode
    pub store_url: Option<String>,
    /// Shared mailbox directory for WAN mode; wins over `store_url`
    pub store_dir: Option<PathBuf>,
    pub token: String,
    pub role: PeerRole,
    pub session: String,
    pub name: String,
    pub backup_dir: Option<PathBuf>,
}

/// Build the mediator `settings` describe
pub fn build_mediator(settings: &TransportSettings) -> Result<Arc<dyn Mediator>, TransportError> {
    let mediator: Arc<dyn Mediator> = match settings.mode {
        NetworkMode::Lan => Arc::new(
            LanMediator::new(&settings.relay_addr, settings.role, &settings.session, &settings.name)
                .with_backup_dir(settings.backup_dir.clone()),
        ),
        NetworkMode::Wan => match (&settings.store_dir, &settings.store_url) {
            (Some(dir), _) => Arc::new(
                StoreMediator::new(DirectoryStore::new(dir))
                    .with_backup_dir(settings.backup_dir.clone()),
            ),
            (None, Some(url)) => Arc::new(
                StoreMediator::new(HttpStore::new(url, &settings.token))
                    .with_backup_dir(settings.backup_dir.clone()),
            ),
            (None, None) => {
                return Err(TransportError::InvalidAddress(
                    "WAN mode needs a store directory or a store URL".into(),
                ))
            }
        },
    };
    Ok(mediator)
}
