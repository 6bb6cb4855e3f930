//! Persistence bridge: whole-document read and versioned write of the task list.
//!
//! Every backend hands out an opaque version token on read and refuses a
//! write whose token no longer matches what is stored, so a concurrent
//! edit surfaces as [`WriteOutcome::Conflict`] instead of being overwritten.

use std::path::{Path, PathBuf};
use std::sync::Mutex;

use async_trait::async_trait;
use sha2::{Digest, Sha256};

use super::models::TaskData;
use crate::errors::PersistenceError;

/// A stored task list together with the version it was read at.
#[derive(Debug, Clone, PartialEq)]
pub struct Snapshot {
    pub data: TaskData,
    pub version: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WriteOutcome {
    Written { version: String },
    Conflict,
}

#[async_trait]
pub trait TaskRepository: Send + Sync {
    async fn read(&self) -> Result<Snapshot, PersistenceError>;

    async fn write(
        &self,
        data: &TaskData,
        previous_version: &str,
    ) -> Result<WriteOutcome, PersistenceError>;

    /// Short label for logs.
    fn describe(&self) -> String;
}

/// Serialize a task list the way it is stored: pretty JSON, two-space indent.
pub fn encode_task_data(data: &TaskData) -> Result<String, PersistenceError> {
    serde_json::to_string_pretty(data).map_err(|e| PersistenceError::Decode(e.to_string()))
}

pub fn decode_task_data(bytes: &[u8]) -> Result<TaskData, PersistenceError> {
    serde_json::from_slice(bytes).map_err(|e| PersistenceError::Decode(e.to_string()))
}

// ── Local JSON file ───────────────────────────────────────────────────

/// Task list in a JSON file on local disk. The version is the sha256 of the
/// file's bytes; a missing file reads as an empty board.
pub struct FileRepository {
    path: PathBuf,
    // Serialises read-compare-write so two writers cannot both pass the check.
    write_lock: tokio::sync::Mutex<()>,
}

pub const EMPTY_VERSION: &str = "empty";

fn content_version(bytes: &[u8]) -> String {
    format!("{:x}", Sha256::digest(bytes))
}

impl FileRepository {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: tokio::sync::Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn current_bytes(&self) -> Result<Option<Vec<u8>>, PersistenceError> {
        match tokio::fs::read(&self.path).await {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(source) => Err(PersistenceError::Io {
                path: self.path.clone(),
                source,
            }),
        }
    }

    fn io_err(&self, source: std::io::Error) -> PersistenceError {
        PersistenceError::Io {
            path: self.path.clone(),
            source,
        }
    }
}

#[async_trait]
impl TaskRepository for FileRepository {
    async fn read(&self) -> Result<Snapshot, PersistenceError> {
        match self.current_bytes().await? {
            Some(bytes) => Ok(Snapshot {
                data: decode_task_data(&bytes)?,
                version: content_version(&bytes),
            }),
            None => Ok(Snapshot {
                data: TaskData::default(),
                version: EMPTY_VERSION.to_string(),
            }),
        }
    }

    async fn write(
        &self,
        data: &TaskData,
        previous_version: &str,
    ) -> Result<WriteOutcome, PersistenceError> {
        let _guard = self.write_lock.lock().await;

        let current = match self.current_bytes().await? {
            Some(bytes) => content_version(&bytes),
            None => EMPTY_VERSION.to_string(),
        };
        if current != previous_version {
            return Ok(WriteOutcome::Conflict);
        }

        let content = encode_task_data(data)?;
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent)
                    .await
                    .map_err(|e| self.io_err(e))?;
            }
        }
        let tmp = self.path.with_extension("json.tmp");
        tokio::fs::write(&tmp, content.as_bytes())
            .await
            .map_err(|e| self.io_err(e))?;
        tokio::fs::rename(&tmp, &self.path)
            .await
            .map_err(|e| self.io_err(e))?;

        Ok(WriteOutcome::Written {
            version: content_version(content.as_bytes()),
        })
    }

    fn describe(&self) -> String {
        format!("file:{}", self.path.display())
    }
}

// ── In-memory ─────────────────────────────────────────────────────────

/// Process-local store with a counter version, for tests and throwaway boards.
pub struct MemoryRepository {
    inner: Mutex<(TaskData, u64)>,
}

impl MemoryRepository {
    pub fn new(data: TaskData) -> Self {
        Self {
            inner: Mutex::new((data, 1)),
        }
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, (TaskData, u64)>, PersistenceError> {
        self.inner
            .lock()
            .map_err(|e| PersistenceError::Other(anyhow::anyhow!("Store lock poisoned: {}", e)))
    }

    /// Simulate an edit made by someone else, bumping the version.
    pub fn replace_externally(&self, data: TaskData) -> Result<(), PersistenceError> {
        let mut guard = self.lock()?;
        guard.0 = data;
        guard.1 += 1;
        Ok(())
    }
}

#[async_trait]
impl TaskRepository for MemoryRepository {
    async fn read(&self) -> Result<Snapshot, PersistenceError> {
        let guard = self.lock()?;
        Ok(Snapshot {
            data: guard.0.clone(),
            version: guard.1.to_string(),
        })
    }

    async fn write(
        &self,
        data: &TaskData,
        previous_version: &str,
    ) -> Result<WriteOutcome, PersistenceError> {
        let mut guard = self.lock()?;
        if guard.1.to_string() != previous_version {
            return Ok(WriteOutcome::Conflict);
        }
        guard.0 = data.clone();
        guard.1 += 1;
        Ok(WriteOutcome::Written {
            version: guard.1.to_string(),
        })
    }

    fn describe(&self) -> String {
        "memory".to_string()
    }
}
