//! Persistence backends for settings documents. The store treats each
//! document as an opaque value keyed by project id; how and where it is kept
//! is decided here.

use crate::types::{ProjectId, SettingsDocument};
use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;

const SETTINGS_FILENAME: &str = "settings.json";

#[derive(thiserror::Error, Debug)]
pub enum BackendError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("encode error: {0}")]
    Encode(#[source] serde_json::Error),

    #[error("decode error: {0}")]
    Decode(#[source] serde_json::Error),

    #[error("could not replace settings file: {0}")]
    Persist(#[from] tempfile::PersistError),

    #[error("blocking task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

#[async_trait]
pub trait SettingsBackend: Send + Sync {
    /// Returns `None` when nothing has been stored for the project yet.
    async fn load(&self, project_id: &ProjectId) -> Result<Option<SettingsDocument>, BackendError>;

    /// Must be atomic with respect to concurrent loads.
    async fn save(
        &self,
        project_id: &ProjectId,
        document: &SettingsDocument,
    ) -> Result<(), BackendError>;

    fn is_ready(&self) -> bool {
        true
    }
}

/// Stores each project as `{base_dir}/{project_id}/settings.json`.
pub struct FilesystemSettingsBackend {
    base_dir: PathBuf,
}

impl FilesystemSettingsBackend {
    pub fn new<P: Into<PathBuf>>(base_dir: P) -> Self {
        FilesystemSettingsBackend {
            base_dir: base_dir.into(),
        }
    }

    /// Creates `base_dir` if it does not exist yet, so the backend reports
    /// ready before the first project is written.
    pub fn open<P: Into<PathBuf>>(base_dir: P) -> Result<Self, BackendError> {
        let backend = Self::new(base_dir);
        std::fs::create_dir_all(&backend.base_dir)?;
        Ok(backend)
    }

    fn project_dir(&self, project_id: &ProjectId) -> PathBuf {
        self.base_dir.join(project_id.as_str())
    }
}

#[async_trait]
impl SettingsBackend for FilesystemSettingsBackend {
    async fn load(&self, project_id: &ProjectId) -> Result<Option<SettingsDocument>, BackendError> {
        let path = self.project_dir(project_id).join(SETTINGS_FILENAME);

        let bytes = match tokio::fs::read(&path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        serde_json::from_slice(&bytes)
            .map(Some)
            .map_err(BackendError::Decode)
    }

    async fn save(
        &self,
        project_id: &ProjectId,
        document: &SettingsDocument,
    ) -> Result<(), BackendError> {
        let project_dir = self.project_dir(project_id);
        let contents = serde_json::to_vec_pretty(document).map_err(BackendError::Encode)?;

        tokio::task::spawn_blocking(move || write_atomically(&project_dir, &contents)).await??;

        tracing::debug!(project_id = %project_id, "Stored settings document");
        Ok(())
    }

    fn is_ready(&self) -> bool {
        self.base_dir.is_dir()
    }
}

// Readers either see the previous file or the new one, never a partial write.
fn write_atomically(project_dir: &Path, contents: &[u8]) -> Result<(), BackendError> {
    std::fs::create_dir_all(project_dir)?;

    let mut tmp = NamedTempFile::new_in(project_dir)?;
    tmp.write_all(contents)?;
    tmp.as_file().sync_all()?;
    tmp.persist(project_dir.join(SETTINGS_FILENAME))?;

    Ok(())
}

/// Keeps documents in process memory. Contents are lost when the backend is
/// dropped.
#[derive(Default)]
pub struct MemorySettingsBackend {
    documents: RwLock<HashMap<ProjectId, SettingsDocument>>,
}

impl MemorySettingsBackend {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SettingsBackend for MemorySettingsBackend {
    async fn load(&self, project_id: &ProjectId) -> Result<Option<SettingsDocument>, BackendError> {
        Ok(self.documents.read().get(project_id).cloned())
    }

    async fn save(
        &self,
        project_id: &ProjectId,
        document: &SettingsDocument,
    ) -> Result<(), BackendError> {
        self.documents
            .write()
            .insert(project_id.clone(), document.clone());
        Ok(())
    }
}

// Accepts writes and forgets them. Every project reads as empty.
pub struct NoopSettingsBackend {}

#[async_trait]
impl SettingsBackend for NoopSettingsBackend {
    async fn load(&self, _project_id: &ProjectId) -> Result<Option<SettingsDocument>, BackendError> {
        Ok(None)
    }

    async fn save(
        &self,
        project_id: &ProjectId,
        _document: &SettingsDocument,
    ) -> Result<(), BackendError> {
        tracing::warn!(
            project_id = %project_id,
            "Discarding settings write on the no-op backend. This is unsafe for production use."
        );
        Ok(())
    }
}
