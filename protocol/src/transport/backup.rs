use std::path::{Path, PathBuf};

use crate::error::TransportError;
use crate::message::WorkResult;

/// Write `result` as pretty JSON to `root/sub_dir/<title>-<chunk>-<id>.json`
pub async fn write_backup(
    root: &Path,
    result: &WorkResult,
    sub_dir: &str,
    title: &str,
) -> Result<PathBuf, TransportError> {
    let dir = root.join(sanitize(sub_dir));
    tokio::fs::create_dir_all(&dir).await?;

    let file = dir.join(format!("{}-{:04}-{}.json", sanitize(title), result.chunk, sanitize(&result.id)));
    let json = serde_json::to_string_pretty(result)?;
    tokio::fs::write(&file, json).await?;

    tracing::debug!(path = %file.display(), "Result backed up");
    Ok(file)
}

/// Keep names to one safe path component
pub(crate) fn sanitize(name: &str) -> String {
    let cleaned: String = name
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' || c == '.' { c } else { '_' })
        .collect();
    match cleaned.trim_matches('.') {
        "" => "_".to_string(),
        s => s.to_string(),
    }
}
