use serde::{Deserialize, Serialize};

/// `?remove=` on mailbox reads; a read consumes by default
#[derive(Debug, Deserialize)]
pub struct TakeQuery {
    #[serde(default = "default_true")]
    pub remove: bool,
}

fn default_true() -> bool { true }

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PutResponse {
    pub mailbox: String,
    pub pending: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MailboxStatus {
    pub mailbox: String,
    pub pending: usize,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct RelayStatus {
    pub clients: usize,
    pub workers: usize,
    pub idle_workers: usize,
    pub queued_requests: usize,
    pub in_flight: usize,
    pub routed_results: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusResponse {
    pub uptime_secs: i64,
    pub mailboxes: Vec<MailboxStatus>,
    pub relay: RelayStatus,
}
