// Shared on-disk entry directory: one JSON file per entry, atomic replace.
//
// Writers produce `<name>.json.tmp` and rename over `<name>.json`; readers
// only ever see a complete document. Unreadable files are surfaced to the
// caller as warnings, not hard failures, so one corrupt entry cannot wedge
// a recovery sweep.

use std::path::{Path, PathBuf};

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::RecoveryError;

/// Lifecycle of a durable entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntryStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

impl EntryStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, EntryStatus::Completed | EntryStatus::Failed)
    }
}

pub(crate) async fn ensure_dir(dir: &Path) -> Result<(), RecoveryError> {
    tokio::fs::create_dir_all(dir)
        .await
        .map_err(|e| RecoveryError::io(dir, e))
}

pub(crate) fn entry_path(dir: &Path, id: &str) -> PathBuf {
    dir.join(format!("{}.json", id))
}

/// Serialize and atomically replace one entry file.
pub(crate) async fn write_json_atomic<T: Serialize>(
    dir: &Path,
    id: &str,
    value: &T,
) -> Result<PathBuf, RecoveryError> {
    ensure_dir(dir).await?;
    let path = entry_path(dir, id);
    let tmp = dir.join(format!("{}.json.tmp", id));

    let body = serde_json::to_vec_pretty(value).map_err(|e| RecoveryError::Corrupt {
        path: path.clone(),
        source: e,
    })?;
    tokio::fs::write(&tmp, &body)
        .await
        .map_err(|e| RecoveryError::io(&tmp, e))?;
    tokio::fs::rename(&tmp, &path)
        .await
        .map_err(|e| RecoveryError::io(&path, e))?;
    Ok(path)
}

pub(crate) async fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T, RecoveryError> {
    let body = tokio::fs::read(path)
        .await
        .map_err(|e| RecoveryError::io(path, e))?;
    serde_json::from_slice(&body).map_err(|e| RecoveryError::Corrupt {
        path: path.to_path_buf(),
        source: e,
    })
}

pub(crate) async fn remove_entry(dir: &Path, id: &str) -> Result<(), RecoveryError> {
    let path = entry_path(dir, id);
    match tokio::fs::remove_file(&path).await {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(RecoveryError::io(&path, e)),
    }
}

/// Read every `.json` entry in the directory. Unparseable files are skipped
/// with a warning.
pub(crate) async fn list_entries<T: DeserializeOwned>(
    dir: &Path,
) -> Result<Vec<T>, RecoveryError> {
    if !dir.exists() {
        return Ok(Vec::new());
    }

    let mut reader = tokio::fs::read_dir(dir)
        .await
        .map_err(|e| RecoveryError::io(dir, e))?;

    let mut entries = Vec::new();
    while let Some(dirent) = reader
        .next_entry()
        .await
        .map_err(|e| RecoveryError::io(dir, e))?
    {
        let path = dirent.path();
        if path.extension().and_then(|e| e.to_str()) != Some("json") {
            continue;
        }
        match read_json::<T>(&path).await {
            Ok(entry) => entries.push(entry),
            Err(e) => warn!("skipping unreadable entry {}: {}", path.display(), e),
        }
    }
    Ok(entries)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::{Deserialize, Serialize};

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Sample {
        id: String,
        count: u32,
    }

    #[tokio::test]
    async fn write_read_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let sample = Sample {
            id: "a".to_string(),
            count: 3,
        };
        let path = write_json_atomic(dir.path(), "a", &sample).await.unwrap();
        let loaded: Sample = read_json(&path).await.unwrap();
        assert_eq!(loaded, sample);
    }

    #[tokio::test]
    async fn list_skips_tmp_and_corrupt_files() {
        let dir = tempfile::tempdir().unwrap();
        write_json_atomic(dir.path(), "good", &Sample { id: "g".into(), count: 1 })
            .await
            .unwrap();
        tokio::fs::write(dir.path().join("bad.json"), b"{oops")
            .await
            .unwrap();
        tokio::fs::write(dir.path().join("stale.json.tmp"), b"{}")
            .await
            .unwrap();

        let entries: Vec<Sample> = list_entries(dir.path()).await.unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].id, "g");
    }

    #[tokio::test]
    async fn remove_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        write_json_atomic(dir.path(), "a", &Sample { id: "a".into(), count: 0 })
            .await
            .unwrap();
        remove_entry(dir.path(), "a").await.unwrap();
        remove_entry(dir.path(), "a").await.unwrap();
    }

    #[tokio::test]
    async fn missing_dir_lists_empty() {
        let entries: Vec<Sample> = list_entries(Path::new("/nonexistent/geosink-test"))
            .await
            .unwrap();
        assert!(entries.is_empty());
    }
}
