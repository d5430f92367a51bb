use chrono::{DateTime, Utc};
use grid_protocol::{Envelope, MessageContext};
use std::collections::{BTreeMap, VecDeque};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};

use crate::relay::Relay;

/// Mailboxes keyed by `module/kind/id`
pub type Mailboxes = BTreeMap<String, VecDeque<Envelope>>;

pub struct AppState {
    pub mailboxes: RwLock<Mailboxes>,
    /// Held for the whole snapshot + write + rename of one save
    pub persist_lock: Mutex<()>,
    pub relay: Arc<Relay>,
    pub auth_token: String,
    pub data_dir: String,
    pub start_time: DateTime<Utc>,
}

impl AppState {
    pub fn new(auth_token: String, data_dir: String, relay: Arc<Relay>) -> Arc<Self> {
        Arc::new(Self {
            mailboxes: RwLock::new(BTreeMap::new()),
            persist_lock: Mutex::new(()),
            relay,
            auth_token,
            data_dir,
            start_time: Utc::now(),
        })
    }

    pub fn mailbox_file(&self) -> PathBuf {
        PathBuf::from(&self.data_dir).join("mailbox.json")
    }

    /// Append to the mailbox `context` names; returns its new length
    pub async fn put(&self, context: &MessageContext, envelope: Envelope) -> usize {
        let mut mailboxes = self.mailboxes.write().await;
        let queue = mailboxes.entry(context.key()).or_default();
        queue.push_back(envelope);
        queue.len()
    }

    /// Oldest envelope of a mailbox, removed unless `remove` is false
    pub async fn take(&self, context: &MessageContext, remove: bool) -> Option<Envelope> {
        let key = context.key();
        if !remove {
            return self.mailboxes.read().await.get(&key).and_then(|q| q.front().cloned());
        }
        let mut mailboxes = self.mailboxes.write().await;
        let queue = mailboxes.get_mut(&key)?;
        let envelope = queue.pop_front();
        if queue.is_empty() {
            mailboxes.remove(&key);
        }
        envelope
    }
}
