use async_trait::async_trait;
use std::path::{Path, PathBuf};

use super::backup::sanitize;
use super::MessageStore;
use crate::error::TransportError;
use crate::message::{Envelope, MessageContext};

/// Mailboxes as directories on a shared filesystem.
///
/// Layout: `root/<module>/<kind>/<id>/<nanos>-<uuid>.json`. File names sort
/// in arrival order. A taker claims a message by renaming it first, so two
/// pollers never receive the same envelope.
#[derive(Debug, Clone)]
pub struct DirectoryStore {
    root: PathBuf,
}

impl DirectoryStore {
    pub fn new(root: impl AsRef<Path>) -> Self {
        Self { root: root.as_ref().to_path_buf() }
    }

    fn mailbox(&self, context: &MessageContext) -> PathBuf {
        self.root
            .join(sanitize(&context.module))
            .join(sanitize(&context.kind))
            .join(sanitize(&context.id))
    }

    /// Message files currently in a mailbox, oldest first
    async fn list(&self, dir: &Path) -> Result<Vec<PathBuf>, TransportError> {
        let mut entries = match tokio::fs::read_dir(dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };
        let mut files = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().is_some_and(|ext| ext == "json") {
                files.push(path);
            }
        }
        files.sort();
        Ok(files)
    }
}

#[async_trait]
impl MessageStore for DirectoryStore {
    async fn put(&self, envelope: &Envelope) -> Result<(), TransportError> {
        let dir = self.mailbox(&envelope.context);
        tokio::fs::create_dir_all(&dir).await?;

        let nanos = chrono::Utc::now().timestamp_nanos_opt().unwrap_or_default();
        let name = format!("{:020}-{}", nanos, uuid::Uuid::new_v4());
        let tmp = dir.join(format!("{name}.tmp"));
        let json = serde_json::to_vec(envelope)?;
        tokio::fs::write(&tmp, json).await?;
        // appear atomically under the .json name
        tokio::fs::rename(&tmp, dir.join(format!("{name}.json"))).await?;
        Ok(())
    }

    async fn take(
        &self,
        context: &MessageContext,
        remove: bool,
    ) -> Result<Option<Envelope>, TransportError> {
        let dir = self.mailbox(context);
        for path in self.list(&dir).await? {
            let readable = if remove {
                let claimed = path.with_extension(format!("claimed-{}", uuid::Uuid::new_v4()));
                match tokio::fs::rename(&path, &claimed).await {
                    Ok(()) => claimed,
                    // another poller got there first
                    Err(e) if e.kind() == std::io::ErrorKind::NotFound => continue,
                    Err(e) => return Err(e.into()),
                }
            } else {
                path
            };

            let bytes = match tokio::fs::read(&readable).await {
                Ok(bytes) => bytes,
                Err(e) if !remove && e.kind() == std::io::ErrorKind::NotFound => continue,
                Err(e) => return Err(e.into()),
            };
            if remove {
                if let Err(e) = tokio::fs::remove_file(&readable).await {
                    tracing::warn!(path = %readable.display(), error = %e, "Failed to delete claimed message");
                }
            }
            match serde_json::from_slice::<Envelope>(&bytes) {
                Ok(envelope) => return Ok(Some(envelope)),
                Err(e) => {
                    tracing::error!(path = %readable.display(), error = %e, "Discarding unreadable message");
                    continue;
                }
            }
        }
        Ok(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::WorkRequest;
    use crate::params::GridParams;
    use crate::types::Population;
    use std::collections::HashSet;
    use std::sync::Arc;

    fn envelope(chunk: u32) -> Envelope {
        Envelope::request(
            WorkRequest::template("dir", "sphere", GridParams::default())
                .fragment(chunk, 0, Population::default()),
        )
    }

    #[tokio::test]
    async fn test_put_take_in_order() {
        let dir = tempfile::tempdir().unwrap();
        let store = DirectoryStore::new(dir.path());
        for chunk in 0..3 {
            store.put(&envelope(chunk)).await.unwrap();
        }
        let ctx = MessageContext::requests("dir");

        let peeked = store.take(&ctx, false).await.unwrap().unwrap();
        let first = store.take(&ctx, true).await.unwrap().unwrap();
        assert_eq!(peeked, first);
        assert!(dir.path().join("grid/request/dir").is_dir());

        let mut rest = Vec::new();
        while let Some(e) = store.take(&ctx, true).await.unwrap() {
            rest.push(e);
        }
        assert_eq!(rest.len(), 2);
        assert!(store.take(&ctx, true).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_missing_mailbox_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store = DirectoryStore::new(dir.path());
        assert!(store.take(&MessageContext::results("none"), true).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_concurrent_takers_never_share_a_message() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(DirectoryStore::new(dir.path()));
        let mut ids = HashSet::new();
        for chunk in 0..20 {
            let e = envelope(chunk);
            ids.insert(e.message.id().to_string());
            store.put(&e).await.unwrap();
        }

        let mut handles = Vec::new();
        for _ in 0..4 {
            let store = store.clone();
            handles.push(tokio::spawn(async move {
                let ctx = MessageContext::requests("dir");
                let mut got = Vec::new();
                while let Some(e) = store.take(&ctx, true).await.unwrap() {
                    got.push(e.message.id().to_string());
                }
                got
            }));
        }

        let mut seen = Vec::new();
        for h in handles {
            seen.extend(h.await.unwrap());
        }
        assert_eq!(seen.len(), 20);
        assert_eq!(seen.into_iter().collect::<HashSet<_>>(), ids);
    }
}
