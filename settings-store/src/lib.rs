pub mod backends;
pub mod config;
pub mod metrics_defs;
pub mod patch;
pub mod store;
pub mod types;

use backends::{
    BackendError, FilesystemSettingsBackend, MemorySettingsBackend, NoopSettingsBackend,
    SettingsBackend,
};
use config::BackendType;
use std::sync::Arc;

pub use patch::{FieldUpdate, PayloadError, SettingsPatch};
pub use store::{Operation, SettingsStore, StoreError};
pub use types::{ImageSettings, InvalidProjectId, ProjectId, SettingsDocument};

/// Builds the backend selected by configuration. The filesystem backend's
/// base directory is created here.
pub fn get_backend(backend_type: &BackendType) -> Result<Arc<dyn SettingsBackend>, BackendError> {
    let backend: Arc<dyn SettingsBackend> = match backend_type {
        BackendType::Filesystem { base_dir } => {
            tracing::info!(base_dir = %base_dir.display(), "Using filesystem settings backend");
            Arc::new(FilesystemSettingsBackend::open(base_dir.clone())?)
        }
        BackendType::Memory => {
            tracing::info!("Using in-memory settings backend");
            Arc::new(MemorySettingsBackend::new())
        }
        BackendType::Noop => {
            tracing::warn!("Using no-op settings backend, settings will not be persisted");
            Arc::new(NoopSettingsBackend {})
        }
    };
    Ok(backend)
}
