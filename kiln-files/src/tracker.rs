use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;
use tracing::{error, info};

use kiln_types::{FileOperation, OperationKind};

use crate::paths::{absolute_root, resolve_within};
use crate::storage::{LocalStorage, Storage};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Access denied: Path outside workspace")]
    AccessDenied { path: String, root: PathBuf },
    #[error("failed to create directory for {path}: {source}")]
    CreateDir { path: String, source: io::Error },
    #[error("failed to write {path}: {source}")]
    Write { path: String, source: io::Error },
    #[error("file was not created successfully: {path}")]
    Missing { path: String },
}

impl StoreError {
    pub fn is_access_denied(&self) -> bool {
        matches!(self, StoreError::AccessDenied { .. })
    }
}

/// A file the tracker wrote and verified.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StoredFile {
    pub path: String,
    pub timestamp: DateTime<Utc>,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ResultStatus {
    Success,
    Error,
}

/// Wire form of a single `store` outcome.
#[derive(Clone, Debug, Serialize)]
pub struct OperationResult {
    pub status: ResultStatus,
    pub message: String,
    pub path: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<DateTime<Utc>>,
}

impl OperationResult {
    pub fn from_store(path: &str, result: &Result<StoredFile, StoreError>) -> Self {
        match result {
            Ok(stored) => Self {
                status: ResultStatus::Success,
                message: format!("File created successfully: {}", stored.path),
                path: stored.path.clone(),
                timestamp: Some(stored.timestamp),
            },
            Err(e) => Self {
                status: ResultStatus::Error,
                message: format!("Failed to create file: {e}"),
                path: path.to_string(),
                timestamp: None,
            },
        }
    }
}

/// Writes files under a root directory and keeps an append-only log of every attempt.
///
/// One instance is shared by all requests; records are only ever appended and
/// then moved once to their terminal status, so their index is stable.
pub struct FileTracker {
    root: PathBuf,
    storage: Arc<dyn Storage>,
    operations: Mutex<Vec<FileOperation>>,
}

impl FileTracker {
    pub fn new(root: impl AsRef<Path>) -> Self {
        Self::with_storage(root, Arc::new(LocalStorage))
    }

    pub fn with_storage(root: impl AsRef<Path>, storage: Arc<dyn Storage>) -> Self {
        Self {
            root: absolute_root(root.as_ref()),
            storage,
            operations: Mutex::new(Vec::new()),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Write `content` to `relative_path` under the root, overwriting, and record the attempt.
    pub fn store(&self, relative_path: &str, content: &str) -> Result<StoredFile, StoreError> {
        let (index, timestamp) = self.begin(relative_path);
        let result = self.write_verified(relative_path, content);

        {
            let mut ops = self.lock_ops();
            if let Some(op) = ops.get_mut(index) {
                match &result {
                    Ok(()) => op.succeed(),
                    Err(e) => op.fail(e.to_string()),
                }
            }
        }

        match result {
            Ok(()) => {
                info!(path = relative_path, bytes = content.len(), "file created");
                Ok(StoredFile {
                    path: relative_path.to_string(),
                    timestamp,
                })
            }
            Err(e) => {
                error!(path = relative_path, root = %self.root.display(), error = %e, "file creation failed");
                Err(e)
            }
        }
    }

    /// Snapshot of the whole log in append order.
    pub fn list_operations(&self) -> Vec<FileOperation> {
        self.lock_ops().clone()
    }

    fn begin(&self, relative_path: &str) -> (usize, DateTime<Utc>) {
        let op = FileOperation::pending(OperationKind::Create, relative_path);
        let timestamp = op.timestamp;
        let mut ops = self.lock_ops();
        ops.push(op);
        (ops.len() - 1, timestamp)
    }

    fn write_verified(&self, relative_path: &str, content: &str) -> Result<(), StoreError> {
        let full_path =
            resolve_within(&self.root, relative_path).ok_or_else(|| StoreError::AccessDenied {
                path: relative_path.to_string(),
                root: self.root.clone(),
            })?;

        if let Some(parent) = full_path.parent() {
            self.storage
                .create_dir_all(parent)
                .map_err(|source| StoreError::CreateDir {
                    path: relative_path.to_string(),
                    source,
                })?;
        }

        self.storage
            .write(&full_path, content.as_bytes())
            .map_err(|source| StoreError::Write {
                path: relative_path.to_string(),
                source,
            })?;

        if !self.storage.exists(&full_path) {
            return Err(StoreError::Missing {
                path: relative_path.to_string(),
            });
        }
        Ok(())
    }

    fn lock_ops(&self) -> MutexGuard<'_, Vec<FileOperation>> {
        self.operations
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}
