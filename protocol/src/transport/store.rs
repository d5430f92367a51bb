use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tokio::time::Instant;

use super::{write_backup, Mediator, NetworkMode, PollOptions};
use crate::error::TransportError;
use crate::message::{Envelope, MessageContext, WorkResult};

/// An addressed store of FIFO mailboxes, one per [`MessageContext`].
#[async_trait]
pub trait MessageStore: Send + Sync {
    async fn put(&self, envelope: &Envelope) -> Result<(), TransportError>;

    /// Oldest envelope in the mailbox. With `remove` set, no other caller
    /// can receive the same envelope.
    async fn take(
        &self,
        context: &MessageContext,
        remove: bool,
    ) -> Result<Option<Envelope>, TransportError>;
}

/// Process-local store, for in-process grids and tests
#[derive(Clone, Default)]
pub struct MemoryStore {
    mailboxes: Arc<Mutex<HashMap<MessageContext, VecDeque<Envelope>>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Envelopes waiting in one mailbox
    pub fn pending(&self, context: &MessageContext) -> usize {
        self.mailboxes
            .lock()
            .map(|m| m.get(context).map_or(0, VecDeque::len))
            .unwrap_or(0)
    }
}

#[async_trait]
impl MessageStore for MemoryStore {
    async fn put(&self, envelope: &Envelope) -> Result<(), TransportError> {
        let mut mailboxes = self.mailboxes.lock().map_err(|_| poisoned())?;
        mailboxes.entry(envelope.context.clone()).or_default().push_back(envelope.clone());
        Ok(())
    }

    async fn take(
        &self,
        context: &MessageContext,
        remove: bool,
    ) -> Result<Option<Envelope>, TransportError> {
        let mut mailboxes = self.mailboxes.lock().map_err(|_| poisoned())?;
        let Some(queue) = mailboxes.get_mut(context) else {
            return Ok(None);
        };
        if remove {
            Ok(queue.pop_front())
        } else {
            Ok(queue.front().cloned())
        }
    }
}

fn poisoned() -> TransportError {
    TransportError::Io(std::io::Error::other("memory store lock poisoned"))
}

/// WAN-mode mediator: store-and-forward over any [`MessageStore`].
///
/// `send` drops the envelope into the mailbox named by its context;
/// `get_message` polls a mailbox until something shows up or the wait
/// budget runs out.
pub struct StoreMediator<S> {
    store: S,
    connected: AtomicBool,
    backup_dir: Option<PathBuf>,
}

impl<S: MessageStore> StoreMediator<S> {
    pub fn new(store: S) -> Self {
        Self { store, connected: AtomicBool::new(false), backup_dir: None }
    }

    pub fn with_backup_dir(mut self, dir: Option<PathBuf>) -> Self {
        self.backup_dir = dir;
        self
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    fn ensure_connected(&self) -> Result<(), TransportError> {
        if self.connected.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(TransportError::NotConnected)
        }
    }
}

#[async_trait]
impl<S: MessageStore> Mediator for StoreMediator<S> {
    fn mode(&self) -> NetworkMode {
        NetworkMode::Wan
    }

    async fn connect(&self) -> Result<(), TransportError> {
        self.connected.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn disconnect(&self) -> Result<(), TransportError> {
        self.connected.store(false, Ordering::SeqCst);
        Ok(())
    }

    async fn send(&self, envelope: Envelope) -> Result<(), TransportError> {
        self.ensure_connected()?;
        self.store.put(&envelope).await?;
        tracing::debug!(mailbox = %envelope.context, id = %envelope.message.id(), "Envelope stored");
        Ok(())
    }

    async fn get_message(
        &self,
        context: &MessageContext,
        poll: &PollOptions,
    ) -> Result<Option<Envelope>, TransportError> {
        self.ensure_connected()?;
        let deadline = poll.max_wait.map(|d| Instant::now() + d);
        loop {
            if let Some(envelope) = self.store.take(context, poll.remove_after_read).await? {
                return Ok(Some(envelope));
            }
            let pause = match deadline {
                Some(deadline) => {
                    let now = Instant::now();
                    if now >= deadline {
                        return Ok(None);
                    }
                    poll.interval.min(deadline - now)
                }
                None => poll.interval,
            };
            tokio::time::sleep(pause).await;
        }
    }

    async fn stop(&self) {
        if self.connected.swap(false, Ordering::SeqCst) {
            tracing::debug!("Store mediator stopped");
        }
    }

    async fn backup_result(
        &self,
        result: &WorkResult,
        sub_dir: &str,
        title: &str,
    ) -> Result<(), TransportError> {
        if let Some(dir) = &self.backup_dir {
            write_backup(dir, result, sub_dir, title).await?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::{WireMessage, WorkRequest};
    use crate::params::GridParams;
    use crate::types::Population;
    use std::time::Duration;

    fn request(session: &str, chunk: u32) -> WorkRequest {
        WorkRequest::template(session, "sphere", GridParams::default())
            .fragment(chunk, 0, Population::default())
    }

    #[tokio::test]
    async fn test_memory_store_is_fifo_per_mailbox() {
        let store = MemoryStore::new();
        store.put(&Envelope::request(request("a", 0))).await.unwrap();
        store.put(&Envelope::request(request("a", 1))).await.unwrap();
        store.put(&Envelope::request(request("b", 9))).await.unwrap();

        let ctx = MessageContext::requests("a");
        let peeked = store.take(&ctx, false).await.unwrap().unwrap();
        let first = store.take(&ctx, true).await.unwrap().unwrap();
        assert_eq!(peeked, first);
        let second = store.take(&ctx, true).await.unwrap().unwrap();
        match (first.message, second.message) {
            (WireMessage::WorkRequest(a), WireMessage::WorkRequest(b)) => {
                assert_eq!((a.chunk, b.chunk), (0, 1));
            }
            _ => panic!("expected requests"),
        }
        assert!(store.take(&ctx, true).await.unwrap().is_none());
        assert_eq!(store.pending(&MessageContext::requests("b")), 1);
    }

    #[tokio::test]
    async fn test_poll_miss_returns_none_within_wait() {
        let mediator = StoreMediator::new(MemoryStore::new());
        mediator.connect().await.unwrap();

        let started = std::time::Instant::now();
        let poll = PollOptions::wait(Duration::from_secs(1), Duration::from_millis(100));
        let got = mediator.get_message(&MessageContext::results("nobody"), &poll).await.unwrap();
        let elapsed = started.elapsed();

        assert!(got.is_none());
        assert!(elapsed >= Duration::from_millis(900), "returned too early: {elapsed:?}");
        assert!(elapsed < Duration::from_secs(2), "returned too late: {elapsed:?}");
    }

    #[tokio::test]
    async fn test_poll_picks_up_late_message() {
        let store = MemoryStore::new();
        let mediator = Arc::new(StoreMediator::new(store.clone()));
        mediator.connect().await.unwrap();

        let req = request("late", 0);
        let expected_id = req.id.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(150)).await;
            store.put(&Envelope::request(req)).await.unwrap();
        });

        let poll = PollOptions::wait(Duration::from_secs(5), Duration::from_millis(20));
        let got = mediator.get_message(&MessageContext::requests("late"), &poll).await.unwrap();
        assert_eq!(got.map(|e| e.message.id().to_string()), Some(expected_id));
    }

    #[tokio::test]
    async fn test_send_requires_connect() {
        let mediator = StoreMediator::new(MemoryStore::new());
        let err = mediator.send(Envelope::request(request("s", 0))).await.unwrap_err();
        assert!(matches!(err, TransportError::NotConnected));
    }
}
