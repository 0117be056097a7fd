//! History snapshot file.
//!
//! Snapshots are written to `<path>.tmp`, synced, then renamed over
//! `<path>`, so a reader never observes a half-written file. Writes are
//! serialized through an async mutex held for the whole sequence.

use std::path::{Path, PathBuf};

use thiserror::Error;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;

use crate::store::{HistorySnapshot, SNAPSHOT_VERSION};

#[derive(Debug, Error)]
pub enum PersistenceError {
    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Snapshot encoding error: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("Unsupported snapshot version {0}")]
    UnsupportedVersion(u32),
}

impl PersistenceError {
    fn io(path: &Path, source: std::io::Error) -> Self {
        Self::Io {
            path: path.to_path_buf(),
            source,
        }
    }
}

pub struct SnapshotWriter {
    path: PathBuf,
    lock: Mutex<()>,
}

impl SnapshotWriter {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn temp_path(&self) -> PathBuf {
        let mut name = self.path.as_os_str().to_owned();
        name.push(".tmp");
        PathBuf::from(name)
    }

    /// Atomically replace the snapshot file.
    pub async fn write(&self, snapshot: &HistorySnapshot) -> Result<(), PersistenceError> {
        let body = serde_json::to_vec_pretty(snapshot)?;
        let _guard = self.lock.lock().await;

        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)
                .await
                .map_err(|e| PersistenceError::io(parent, e))?;
        }

        let temp = self.temp_path();
        let mut file = fs::File::create(&temp)
            .await
            .map_err(|e| PersistenceError::io(&temp, e))?;
        file.write_all(&body)
            .await
            .map_err(|e| PersistenceError::io(&temp, e))?;
        file.sync_all()
            .await
            .map_err(|e| PersistenceError::io(&temp, e))?;
        drop(file);

        fs::rename(&temp, &self.path)
            .await
            .map_err(|e| PersistenceError::io(&self.path, e))?;

        let samples: usize = snapshot.networks.values().map(Vec::len).sum();
        tracing::debug!(path = %self.path.display(), samples, "History snapshot written");
        Ok(())
    }

    /// Read the snapshot file. A missing file is `Ok(None)`.
    pub async fn load(&self) -> Result<Option<HistorySnapshot>, PersistenceError> {
        let _guard = self.lock.lock().await;
        let body = match fs::read(&self.path).await {
            Ok(body) => body,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(err) => return Err(PersistenceError::io(&self.path, err)),
        };

        let snapshot: HistorySnapshot = serde_json::from_slice(&body)?;
        if snapshot.version != SNAPSHOT_VERSION {
            return Err(PersistenceError::UnsupportedVersion(snapshot.version));
        }
        Ok(Some(snapshot))
    }
}
