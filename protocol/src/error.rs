use thiserror::Error;

/// Startup and validation failures. Always fatal, always raised before any
/// network activity.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing required {0} strategy")]
    MissingStrategy(&'static str),

    #[error("no evolution engine configured")]
    MissingEngine,

    #[error("invalid parameter `{name}`: {reason}")]
    InvalidParam { name: &'static str, reason: &'static str },

    #[error("unknown {kind} `{name}` (known: {known})")]
    UnknownName { kind: &'static str, name: String, known: String },

    #[error("grid configuration `{0}` used before validate()")]
    NotValidated(String),
}

impl ConfigError {
    pub(crate) fn invalid(name: &'static str, reason: &'static str) -> Self {
        Self::InvalidParam { name, reason }
    }
}

/// Failures inside a single work unit. The worker turns these into empty
/// results instead of propagating them.
#[derive(Debug, Error)]
pub enum StrategyError {
    #[error("fragment is partially filled ({len} of {capacity} candidates)")]
    PartialFragment { len: usize, capacity: usize },

    #[error("no evolution engine available for this work unit")]
    MissingEngine,

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("{0}")]
    Failed(String),
}

/// Transport failures. "No message yet" is not one of them: polling returns
/// `Ok(None)` for that.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("mediator is not connected")]
    NotConnected,

    #[error("channel closed by peer")]
    Closed,

    #[error("peer rejected message: HTTP {0}")]
    Rejected(u16),

    #[error("invalid mailbox address: {0}")]
    InvalidAddress(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Codec(#[from] serde_json::Error),

    #[error(transparent)]
    Http(#[from] reqwest::Error),
}

#[derive(Debug, Error)]
pub enum OrchestratorError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error(transparent)]
    Strategy(#[from] StrategyError),
}
