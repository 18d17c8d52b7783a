use crate::backends::{BackendError, SettingsBackend};
use crate::metrics_defs::{
    SETTINGS_BACKEND_ERROR, SETTINGS_GET, SETTINGS_PATCH, SETTINGS_PATCH_DURATION,
};
use crate::patch::{PayloadError, SettingsPatch};
use crate::types::{InvalidProjectId, ProjectId, SettingsDocument};
use parking_lot::Mutex;
use serde_json::Value;
use shared::{counter, histogram};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::OwnedMutexGuard;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    Load,
    Save,
}

impl Operation {
    pub const fn as_str(&self) -> &'static str {
        match self {
            Operation::Load => "load",
            Operation::Save => "save",
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(thiserror::Error, Debug)]
pub enum StoreError {
    #[error("invalid payload: {0}")]
    InvalidPayload(#[from] PayloadError),

    #[error(transparent)]
    InvalidProjectId(#[from] InvalidProjectId),

    #[error("could not {operation} settings for project {project_id}: {source}")]
    Io {
        project_id: String,
        operation: Operation,
        #[source]
        source: BackendError,
    },

    #[error("settings update task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

struct StoreInner {
    backend: Arc<dyn SettingsBackend>,
    locks: KeyedLocks,
}

/// Reads and patches per-project settings documents.
///
/// Cheap to clone; clones share the backend and the per-project lock table.
/// Patches to the same project are serialized so that concurrent
/// read-modify-write cycles never lose an update. Patches to different
/// projects do not wait on each other.
#[derive(Clone)]
pub struct SettingsStore {
    inner: Arc<StoreInner>,
}

impl SettingsStore {
    pub fn new(backend: Arc<dyn SettingsBackend>) -> Self {
        SettingsStore {
            inner: Arc::new(StoreInner {
                backend,
                locks: KeyedLocks::default(),
            }),
        }
    }

    /// Returns the stored document, or the empty document if the project has
    /// never been written.
    pub async fn get(&self, project_id: &str) -> Result<SettingsDocument, StoreError> {
        let project_id = ProjectId::new(project_id)?;
        let document = self.load(&project_id).await?;

        counter!(SETTINGS_GET, "found" => if document.is_some() { "true" } else { "false" })
            .increment(1);

        Ok(document.unwrap_or_default())
    }

    /// Parses `payload`, applies it to the project's document and persists
    /// the result. Returns the full updated document.
    ///
    /// Nothing is loaded or written if the project id or payload is invalid.
    pub async fn patch(
        &self,
        project_id: &str,
        payload: Value,
    ) -> Result<SettingsDocument, StoreError> {
        let project_id = ProjectId::new(project_id)?;
        let patch = SettingsPatch::try_from(payload)?;
        self.apply_patch(&project_id, patch).await
    }

    /// Applies an already parsed patch.
    ///
    /// The locked load, apply and save cycle runs on its own task. Dropping
    /// the returned future does not interrupt it, so the project stays locked
    /// until the write has landed.
    pub async fn apply_patch(
        &self,
        project_id: &ProjectId,
        patch: SettingsPatch,
    ) -> Result<SettingsDocument, StoreError> {
        let store = self.clone();
        let project_id = project_id.clone();

        tokio::spawn(async move { store.locked_apply(&project_id, patch).await }).await?
    }

    async fn locked_apply(
        &self,
        project_id: &ProjectId,
        patch: SettingsPatch,
    ) -> Result<SettingsDocument, StoreError> {
        let start = Instant::now();
        let kind = match patch {
            SettingsPatch::Reorder { .. } => "reorder",
            SettingsPatch::Fields(_) => "fields",
        };

        let _guard = self.inner.locks.lock(project_id).await;

        let mut document = self.load(project_id).await?.unwrap_or_default();
        document.apply(patch);

        self.inner
            .backend
            .save(project_id, &document)
            .await
            .map_err(|source| self.backend_error(project_id, Operation::Save, source))?;

        counter!(SETTINGS_PATCH, "kind" => kind).increment(1);
        histogram!(SETTINGS_PATCH_DURATION).record(start.elapsed().as_secs_f64());
        tracing::debug!(project_id = %project_id, kind, "Patched settings");

        Ok(document)
    }

    pub fn is_ready(&self) -> bool {
        self.inner.backend.is_ready()
    }

    async fn load(&self, project_id: &ProjectId) -> Result<Option<SettingsDocument>, StoreError> {
        self.inner
            .backend
            .load(project_id)
            .await
            .map_err(|source| self.backend_error(project_id, Operation::Load, source))
    }

    fn backend_error(
        &self,
        project_id: &ProjectId,
        operation: Operation,
        source: BackendError,
    ) -> StoreError {
        tracing::error!(
            project_id = %project_id,
            operation = operation.as_str(),
            error = %source,
            "Settings backend operation failed"
        );
        counter!(SETTINGS_BACKEND_ERROR, "operation" => operation.as_str()).increment(1);

        StoreError::Io {
            project_id: project_id.to_string(),
            operation,
            source,
        }
    }
}

/// One async mutex per project id. Each entry counts its holder and
/// waiters and is removed when the count drops to zero, including when a
/// waiter is cancelled before it acquires the lock.
#[derive(Default)]
struct KeyedLocks {
    locks: Mutex<HashMap<ProjectId, LockEntry>>,
}

#[derive(Default)]
struct LockEntry {
    mutex: Arc<tokio::sync::Mutex<()>>,
    users: usize,
}

impl KeyedLocks {
    async fn lock(&self, key: &ProjectId) -> KeyedGuard<'_> {
        let mutex = {
            let mut locks = self.locks.lock();
            let entry = locks.entry(key.clone()).or_default();
            entry.users += 1;
            entry.mutex.clone()
        };

        // Registered before waiting so that dropping this future releases the slot
        let mut guard = KeyedGuard {
            locks: self,
            key: key.clone(),
            guard: None,
        };
        guard.guard = Some(mutex.lock_owned().await);
        guard
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.locks.lock().len()
    }
}

struct KeyedGuard<'a> {
    locks: &'a KeyedLocks,
    key: ProjectId,
    guard: Option<OwnedMutexGuard<()>>,
}

impl Drop for KeyedGuard<'_> {
    fn drop(&mut self) {
        // Release the project lock before inspecting the table
        self.guard.take();

        let mut locks = self.locks.locks.lock();
        if let Some(entry) = locks.get_mut(&self.key) {
            entry.users -= 1;
            if entry.users == 0 {
                locks.remove(&self.key);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::{FilesystemSettingsBackend, MemorySettingsBackend};
    use crate::types::ImageSettings;
    use async_trait::async_trait;
    use serde_json::json;
    use std::io;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::time::Duration;
    use tokio::sync::Notify;

    fn memory_store() -> SettingsStore {
        SettingsStore::new(Arc::new(MemorySettingsBackend::new()))
    }

    #[tokio::test]
    async fn test_unknown_project_is_empty() {
        let store = memory_store();
        let document = store.get("unknown-project").await.unwrap();
        assert_eq!(document, SettingsDocument::default());
        assert_eq!(
            serde_json::to_value(&document).unwrap(),
            json!({"settings": {}, "imageOrder": []})
        );
    }

    #[tokio::test]
    async fn test_patch_scenario() {
        let store = memory_store();
        assert!(store.get("unknown-project").await.unwrap().is_empty());

        let returned = store
            .patch(
                "unknown-project",
                json!({"imageId": "a", "units": 4, "isFill": true}),
            )
            .await
            .unwrap();

        assert_eq!(
            serde_json::to_value(&returned).unwrap(),
            json!({
                "settings": {"a": {"units": 4, "isFill": true, "caption": "a"}},
                "imageOrder": []
            })
        );
        assert_eq!(store.get("unknown-project").await.unwrap(), returned);

        // Other projects are untouched
        assert!(store.get("other-project").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_reorder_and_positional_insert() {
        let store = memory_store();
        store
            .patch("p", json!({"fullReorder": true, "newOrder": ["x", "y", "z"]}))
            .await
            .unwrap();

        let document = store
            .patch("p", json!({"imageId": "y", "order": 0}))
            .await
            .unwrap();
        assert_eq!(document.image_order, ["y", "x", "z"]);
        assert_eq!(document.image_settings["y"].caption.as_deref(), Some("y"));

        let document = store
            .patch("p", json!({"fullReorder": true, "newOrder": ["c"]}))
            .await
            .unwrap();
        assert_eq!(document.image_order, ["c"]);
        // Settings survive a reorder
        assert!(document.image_settings.contains_key("y"));
    }

    #[tokio::test]
    async fn test_rejects_invalid_input_without_writing() {
        let backend = Arc::new(CountingBackend::default());
        let store = SettingsStore::new(backend.clone());

        for project_id in ["", "..", "a/b"] {
            assert!(matches!(
                store.get(project_id).await,
                Err(StoreError::InvalidProjectId(_))
            ));
            assert!(matches!(
                store.patch(project_id, json!({"imageId": "a"})).await,
                Err(StoreError::InvalidProjectId(_))
            ));
        }

        for payload in [json!(null), json!([]), json!({"units": 3}), json!({"imageId": "a", "units": 0})] {
            assert!(matches!(
                store.patch("p", payload).await,
                Err(StoreError::InvalidPayload(_))
            ));
        }

        assert_eq!(backend.loads.load(Ordering::SeqCst), 0);
        assert_eq!(backend.saves.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_backend_errors_propagate() {
        let store = SettingsStore::new(Arc::new(FailingBackend));

        match store.get("p").await {
            Err(StoreError::Io {
                project_id,
                operation,
                ..
            }) => {
                assert_eq!(project_id, "p");
                assert_eq!(operation, Operation::Load);
            }
            other => panic!("unexpected result: {other:?}"),
        }

        let err = store.patch("p", json!({"imageId": "a"})).await.unwrap_err();
        assert_eq!(
            err.to_string(),
            "could not load settings for project p: I/O error: backend unavailable"
        );
    }

    #[tokio::test]
    async fn test_filesystem_store() {
        let dir = tempfile::tempdir().unwrap();
        let store = SettingsStore::new(Arc::new(FilesystemSettingsBackend::new(dir.path())));

        store
            .patch("sky-project", json!({"imageId": "16.png", "caption": "Sixteen", "order": 0}))
            .await
            .unwrap();

        // A fresh store over the same directory sees the persisted document
        let reopened = SettingsStore::new(Arc::new(FilesystemSettingsBackend::new(dir.path())));
        let document = reopened.get("sky-project").await.unwrap();
        assert_eq!(
            document.image_settings["16.png"],
            ImageSettings {
                units: None,
                is_fill: None,
                caption: Some("Sixteen".into()),
            }
        );
        assert_eq!(document.image_order, ["16.png"]);
        assert!(reopened.is_ready());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_patches_lose_no_update() {
        let store = memory_store();

        let tasks: Vec<_> = (0..32)
            .map(|i| {
                let store = store.clone();
                tokio::spawn(async move {
                    store
                        .patch("shared", json!({"imageId": format!("img{i}"), "units": i + 1, "order": 0}))
                        .await
                        .unwrap();
                })
            })
            .collect();
        for task in tasks {
            task.await.unwrap();
        }

        let document = store.get("shared").await.unwrap();
        assert_eq!(document.image_settings.len(), 32);
        assert_eq!(document.image_order.len(), 32);
        assert_eq!(store.inner.locks.len(), 0);
    }

    #[tokio::test]
    async fn test_lock_table_is_released() {
        let store = memory_store();
        {
            let _guard = store.inner.locks.lock(&ProjectId::new("a").unwrap()).await;
            assert_eq!(store.inner.locks.len(), 1);
        }
        assert_eq!(store.inner.locks.len(), 0);
    }

    #[tokio::test]
    async fn test_cancelled_waiter_releases_lock_entry() {
        let store = memory_store();
        let key = ProjectId::new("a").unwrap();

        // Waiter cancelled while the lock is still held
        let holder = store.inner.locks.lock(&key).await;
        let waiter = {
            let store = store.clone();
            let key = key.clone();
            tokio::spawn(async move {
                let _guard = store.inner.locks.lock(&key).await;
            })
        };
        tokio::task::yield_now().await;
        waiter.abort();
        assert!(waiter.await.unwrap_err().is_cancelled());
        drop(holder);
        assert_eq!(store.inner.locks.len(), 0);

        // Waiter woken by the release but cancelled before it polls again
        let holder = store.inner.locks.lock(&key).await;
        let waiter = {
            let store = store.clone();
            let key = key.clone();
            tokio::spawn(async move {
                let _guard = store.inner.locks.lock(&key).await;
            })
        };
        tokio::task::yield_now().await;
        drop(holder);
        assert_eq!(store.inner.locks.len(), 1);
        waiter.abort();
        assert!(waiter.await.unwrap_err().is_cancelled());
        assert_eq!(store.inner.locks.len(), 0);
    }

    #[tokio::test]
    async fn test_cancelled_patch_still_completes_before_next() {
        let backend = Arc::new(GatedBackend::default());
        backend.gate_next_save.store(true, Ordering::SeqCst);
        let store = SettingsStore::new(backend.clone());

        let first = {
            let store = store.clone();
            tokio::spawn(async move {
                store
                    .patch("p", json!({"fullReorder": true, "newOrder": ["x", "y"]}))
                    .await
            })
        };
        backend.save_started.notified().await;
        first.abort();
        let _ = first.await;

        let second = {
            let store = store.clone();
            tokio::spawn(async move { store.patch("p", json!({"imageId": "b", "units": 2})).await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        // The abandoned write still owns the project
        assert!(!second.is_finished());

        backend.release.notify_one();
        let returned = second.await.unwrap().unwrap();
        assert_eq!(returned.image_order, ["x", "y"]);

        let stored = store.get("p").await.unwrap();
        assert_eq!(stored, returned);
        assert_eq!(stored.image_settings["b"].units, Some(2));
        assert_eq!(store.inner.locks.len(), 0);
    }

    /// Writes through a detached task, like a blocking filesystem write that
    /// outlives the future awaiting it. The first save can be held back.
    #[derive(Default)]
    struct GatedBackend {
        inner: Arc<MemorySettingsBackend>,
        gate_next_save: AtomicBool,
        save_started: Notify,
        release: Arc<Notify>,
    }

    #[async_trait]
    impl SettingsBackend for GatedBackend {
        async fn load(&self, project_id: &ProjectId) -> Result<Option<SettingsDocument>, BackendError> {
            self.inner.load(project_id).await
        }

        async fn save(
            &self,
            project_id: &ProjectId,
            document: &SettingsDocument,
        ) -> Result<(), BackendError> {
            let gated = self.gate_next_save.swap(false, Ordering::SeqCst);
            let inner = self.inner.clone();
            let release = self.release.clone();
            let project_id = project_id.clone();
            let document = document.clone();

            self.save_started.notify_one();
            tokio::spawn(async move {
                if gated {
                    release.notified().await;
                }
                inner.save(&project_id, &document).await
            })
            .await?
        }
    }

    #[derive(Default)]
    struct CountingBackend {
        loads: AtomicUsize,
        saves: AtomicUsize,
    }

    #[async_trait]
    impl SettingsBackend for CountingBackend {
        async fn load(
            &self,
            _project_id: &ProjectId,
        ) -> Result<Option<SettingsDocument>, BackendError> {
            self.loads.fetch_add(1, Ordering::SeqCst);
            Ok(None)
        }

        async fn save(
            &self,
            _project_id: &ProjectId,
            _document: &SettingsDocument,
        ) -> Result<(), BackendError> {
            self.saves.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    struct FailingBackend;

    #[async_trait]
    impl SettingsBackend for FailingBackend {
        async fn load(
            &self,
            _project_id: &ProjectId,
        ) -> Result<Option<SettingsDocument>, BackendError> {
            Err(io::Error::other("backend unavailable").into())
        }

        async fn save(
            &self,
            _project_id: &ProjectId,
            _document: &SettingsDocument,
        ) -> Result<(), BackendError> {
            Err(io::Error::other("backend unavailable").into())
        }

        fn is_ready(&self) -> bool {
            false
        }
    }
}
