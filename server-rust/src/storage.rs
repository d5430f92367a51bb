use anyhow::{Context, Result};
use std::path::Path;

use crate::state::{AppState, Mailboxes};

/// Write every mailbox to `data_dir/mailbox.json`. Saves are serialized:
/// the snapshot is taken under the same lock as the write, so the last save
/// to finish always holds the newest mailboxes.
pub async fn save_state(state: &AppState) -> Result<()> {
    let _guard = state.persist_lock.lock().await;
    let dir = Path::new(&state.data_dir);
    tokio::fs::create_dir_all(dir).await?;

    let json = {
        let mailboxes = state.mailboxes.read().await;
        serde_json::to_string_pretty(&*mailboxes)?
    };
    let file = state.mailbox_file();
    let tmp = file.with_extension("json.tmp");
    tokio::fs::write(&tmp, json).await?;
    tokio::fs::rename(&tmp, &file)
        .await
        .with_context(|| format!("replacing {}", file.display()))?;
    Ok(())
}

/// Restore mailboxes saved by [`save_state`]. A missing file is an empty store.
pub async fn load_state(state: &AppState) -> Result<usize> {
    let file = state.mailbox_file();
    let data = match tokio::fs::read_to_string(&file).await {
        Ok(data) => data,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(0),
        Err(e) => return Err(e).with_context(|| format!("reading {}", file.display())),
    };
    let loaded: Mailboxes =
        serde_json::from_str(&data).with_context(|| format!("parsing {}", file.display()))?;
    let pending = loaded.values().map(|q| q.len()).sum();
    *state.mailboxes.write().await = loaded;
    Ok(pending)
}
