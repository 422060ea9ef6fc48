// src/store/checkpoint.rs
// =============================================================================
// Durable, resumable crawl progress.
//
// The registry and the cursor are written together as one versioned JSON
// document:
//
//   { "version": 1,
//     "cursor":   { "value": 16777472, "mask": 24 },
//     "registry": { "172.217.5.0": [ { "client": "1.0.0.0", "scope": 24 } ] } }
//
// Writes go to a temp file in the same directory, are fsynced, then
// renamed over the old checkpoint. A crash or Ctrl+C at any point leaves
// either the previous checkpoint or the new one, never a mix, so the
// cursor can never point past observations that were not saved.
// =============================================================================

use super::PopRegistry;
use crate::net::AddressCursor;
use serde::{Deserialize, Serialize};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tokio::io::AsyncWriteExt;
use tracing::debug;

/// Schema version written into every checkpoint.
pub const CHECKPOINT_VERSION: u32 = 1;

#[derive(Debug, Error)]
pub enum CheckpointError {
    #[error("checkpoint I/O failed for {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to encode checkpoint: {0}")]
    Encode(#[source] serde_json::Error),

    #[error("checkpoint {} is not valid JSON: {source}", path.display())]
    Decode {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("checkpoint {} has unsupported version {found} (expected {})", path.display(), CHECKPOINT_VERSION)]
    UnsupportedVersion { path: PathBuf, found: u32 },

    #[error("checkpoint {} is corrupt: {reason}", path.display())]
    Corrupt { path: PathBuf, reason: String },
}

/// Everything needed to resume a crawl.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CrawlState {
    pub registry: PopRegistry,
    pub cursor: AddressCursor,
}

impl CrawlState {
    pub fn fresh(cursor: AddressCursor) -> Self {
        Self {
            registry: PopRegistry::new(),
            cursor,
        }
    }
}

// Borrowing view used for writing, so saving never clones the registry.
#[derive(Serialize)]
struct CheckpointRef<'a> {
    version: u32,
    cursor: &'a AddressCursor,
    registry: &'a PopRegistry,
}

// Read on its own first, so a file written by a newer schema is reported
// as an unsupported version even when the rest of its shape has changed.
#[derive(Deserialize)]
struct CheckpointHeader {
    version: u32,
}

#[derive(Deserialize)]
struct CheckpointFile {
    cursor: AddressCursor,
    registry: PopRegistry,
}

#[derive(Debug, Clone)]
pub struct CheckpointStore {
    path: PathBuf,
}

impl CheckpointStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    // Loads the last checkpoint.
    //
    // Returns: Ok(None) if no checkpoint exists yet, Ok(Some(state)) if one
    // was read and validated, Err if the file exists but cannot be trusted.
    pub async fn load(&self) -> Result<Option<CrawlState>, CheckpointError> {
        // A missing file just means this is the first run
        let bytes = match tokio::fs::read(&self.path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(source) => return Err(self.io_error(source)),
        };

        // Version first; unknown fields of the body are ignored here
        let header: CheckpointHeader = self.decode(&bytes)?;
        if header.version != CHECKPOINT_VERSION {
            return Err(CheckpointError::UnsupportedVersion {
                path: self.path.clone(),
                found: header.version,
            });
        }

        // Now the body, in the shape this version promises
        let file: CheckpointFile = self.decode(&bytes)?;
        // A cursor with an impossible mask would make every shift below
        // meaningless, so refuse it instead of clamping silently
        if !file.cursor.is_valid() {
            return Err(CheckpointError::Corrupt {
                path: self.path.clone(),
                reason: format!("cursor {:?} is out of range", file.cursor),
            });
        }

        Ok(Some(CrawlState {
            registry: file.registry,
            cursor: file.cursor,
        }))
    }

    /// Atomically replaces the checkpoint with `(registry, cursor)`.
    pub async fn save(
        &self,
        registry: &PopRegistry,
        cursor: &AddressCursor,
    ) -> Result<(), CheckpointError> {
        // Serialize everything up front; nothing touches the disk if this fails
        let bytes = serde_json::to_vec(&CheckpointRef {
            version: CHECKPOINT_VERSION,
            cursor,
            registry,
        })
        .map_err(CheckpointError::Encode)?;

        // Full copy on disk first, then swap it in with a single rename
        let tmp = self.temp_path();
        self.write_synced(&tmp, &bytes).await?;
        tokio::fs::rename(&tmp, &self.path)
            .await
            .map_err(|source| self.io_error(source))?;

        debug!(path = %self.path.display(), bytes = bytes.len(), "checkpoint written");
        Ok(())
    }

    async fn write_synced(&self, tmp: &Path, bytes: &[u8]) -> Result<(), CheckpointError> {
        let io_err = |source| CheckpointError::Io {
            path: tmp.to_path_buf(),
            source,
        };
        let mut file = tokio::fs::File::create(tmp).await.map_err(io_err)?;
        file.write_all(bytes).await.map_err(io_err)?;
        // Data must be on disk before the rename makes it the checkpoint
        file.sync_all().await.map_err(io_err)?;
        Ok(())
    }

    // Same directory as the target so the rename never crosses filesystems.
    fn temp_path(&self) -> PathBuf {
        let name = self
            .path
            .file_name()
            .and_then(|name| name.to_str())
            .unwrap_or("checkpoint");
        self.path.with_file_name(format!(".{name}.tmp"))
    }

    fn decode<'de, T: Deserialize<'de>>(&self, bytes: &'de [u8]) -> Result<T, CheckpointError> {
        serde_json::from_slice(bytes).map_err(|source| CheckpointError::Decode {
            path: self.path.clone(),
            source,
        })
    }

    fn io_error(&self, source: std::io::Error) -> CheckpointError {
        CheckpointError::Io {
            path: self.path.clone(),
            source,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{Observation, PopKey};
    use std::net::Ipv4Addr;

    fn sample_state() -> CrawlState {
        let mut registry = PopRegistry::new();
        let pop_a = PopKey::from_answer(Ipv4Addr::new(172, 217, 5, 4));
        let pop_b = PopKey::from_answer(Ipv4Addr::new(142, 250, 1, 9));
        for i in 0..1000u32 {
            let client = Ipv4Addr::from(0x0100_0000 + i * 256);
            let pop = if i % 3 == 0 { pop_b } else { pop_a };
            registry.record(pop, Observation { client, scope: (i % 33) as u8 });
        }
        let mut cursor = AddressCursor::new(Ipv4Addr::new(1, 3, 232, 0), 24);
        cursor.step_with(20);
        CrawlState { registry, cursor }
    }

    #[tokio::test]
    async fn test_missing_checkpoint_loads_as_none() {
        let dir = tempfile::tempdir().unwrap();
        let store = CheckpointStore::new(dir.path().join("mapping.json"));
        assert!(store.load().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let store = CheckpointStore::new(dir.path().join("mapping.json"));
        let state = sample_state();

        store.save(&state.registry, &state.cursor).await.unwrap();
        let loaded = store.load().await.unwrap().unwrap();

        assert_eq!(loaded, state);
    }

    #[tokio::test]
    async fn test_save_replaces_previous_and_leaves_no_temp() {
        let dir = tempfile::tempdir().unwrap();
        let store = CheckpointStore::new(dir.path().join("mapping.json"));
        let empty = CrawlState::fresh(AddressCursor::new(Ipv4Addr::new(1, 0, 0, 0), 24));
        store.save(&empty.registry, &empty.cursor).await.unwrap();

        let state = sample_state();
        store.save(&state.registry, &state.cursor).await.unwrap();

        assert_eq!(store.load().await.unwrap().unwrap(), state);
        let names: Vec<_> = std::fs::read_dir(dir.path())
            .unwrap()
            .map(|entry| entry.unwrap().file_name())
            .collect();
        assert_eq!(names, vec![std::ffi::OsString::from("mapping.json")]);
    }

    #[tokio::test]
    async fn test_rejects_unknown_version() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("mapping.json");
        std::fs::write(
            &path,
            r#"{"version":7,"cursor":{"value":0,"mask":24},"registry":{}}"#,
        )
        .unwrap();

        let err = CheckpointStore::new(&path).load().await.unwrap_err();
        assert!(matches!(err, CheckpointError::UnsupportedVersion { found: 7, .. }));
    }

    #[tokio::test]
    async fn test_future_version_with_new_shape_is_unsupported() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("mapping.json");
        std::fs::write(
            &path,
            r#"{"version":2,"position":{"addr":"1.0.0.0","prefix":24},"pops":[]}"#,
        )
        .unwrap();

        let err = CheckpointStore::new(&path).load().await.unwrap_err();
        assert!(matches!(err, CheckpointError::UnsupportedVersion { found: 2, .. }));
    }

    #[tokio::test]
    async fn test_missing_version_is_decode_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("mapping.json");
        std::fs::write(&path, r#"{"cursor":{"value":0,"mask":24},"registry":{}}"#).unwrap();

        let err = CheckpointStore::new(&path).load().await.unwrap_err();
        assert!(matches!(err, CheckpointError::Decode { .. }));
    }

    #[tokio::test]
    async fn test_rejects_truncated_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("mapping.json");
        std::fs::write(&path, r#"{"version":1,"cursor":{"value":0,"#).unwrap();

        let err = CheckpointStore::new(&path).load().await.unwrap_err();
        assert!(matches!(err, CheckpointError::Decode { .. }));
    }

    #[tokio::test]
    async fn test_rejects_bad_mask() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("mapping.json");
        std::fs::write(
            &path,
            r#"{"version":1,"cursor":{"value":0,"mask":40},"registry":{}}"#,
        )
        .unwrap();

        let err = CheckpointStore::new(&path).load().await.unwrap_err();
        assert!(matches!(err, CheckpointError::Corrupt { .. }));
    }
}
