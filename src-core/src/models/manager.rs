use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use log::{debug, error, info, warn};
use parking_lot::Mutex;
use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;

use super::cache::{safetensors_complete, ModelCache};
use super::catalog::ModelDescriptor;
use super::download::DownloadCoordinator;
use super::events::{ProgressReporter, ProgressSink};
use super::source::ArtifactSource;
use super::state::{ModelEvent, ModelRecord};
use super::status::{ModelSnapshot, ModelStatus};
use super::ModelFamily;
use crate::error::CommandError;
use crate::worker::{ExitHook, WorkerCommand, WorkerError, WorkerHandle};
use local_translate_protocol::ops;

/// Everything a manager needs, injected by setup (or tests).
pub struct ManagerOptions {
    pub family: ModelFamily,
    /// Models of this family, in display order.
    pub catalog: Vec<ModelDescriptor>,
    pub cache: ModelCache,
    pub source: Arc<dyn ArtifactSource>,
    pub worker_command: WorkerCommand,
    pub request_timeout: Duration,
    pub load_timeout: Duration,
    pub shutdown_grace: Duration,
    /// Restart the worker with the same model after every request.
    pub recycle_after_request: bool,
}

/// The worker currently attached to the family.
#[derive(Debug, Clone)]
struct LiveWorker {
    generation: u64,
    model_id: String,
}

#[derive(Default)]
struct FamilyState {
    models: HashMap<String, ModelRecord>,
    current: Option<String>,
    live_worker: Option<LiveWorker>,
    downloads: HashMap<String, CancellationToken>,
}

impl FamilyState {
    fn record_mut(&mut self, id: &str) -> &mut ModelRecord {
        self.models.entry(id.to_string()).or_default()
    }

    fn snapshot(&self, id: &str) -> ModelSnapshot {
        self.models
            .get(id)
            .map(ModelRecord::snapshot)
            .unwrap_or(ModelSnapshot {
                status: ModelStatus::NotDownloaded,
                error: None,
            })
    }

    /// Forget the live worker if it is `generation`, failing its model.
    fn worker_lost(&mut self, generation: u64, message: &str) {
        if self.live_worker.as_ref().map(|w| w.generation) != Some(generation) {
            return;
        }
        let Some(live) = self.live_worker.take() else {
            return;
        };
        if self.current.as_deref() == Some(live.model_id.as_str()) {
            self.current = None;
        }
        self.record_mut(&live.model_id).fail(ModelEvent::Crashed, message);
    }
}

/// Marks an abandoned download as failed.
struct DownloadGuard<'a> {
    state: &'a Mutex<FamilyState>,
    id: &'a str,
    armed: bool,
}

impl Drop for DownloadGuard<'_> {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        warn!("Download of '{}' was abandoned", self.id);
        let mut st = self.state.lock();
        st.downloads.remove(self.id);
        st.record_mut(self.id)
            .fail(ModelEvent::DownloadFailed, "Download interrupted");
    }
}

/// Owns the models of one family and the (at most one) worker serving them.
///
/// Lock order is worker slot, then state. The state lock is only held for
/// short bookkeeping so status queries never wait on a worker call.
pub struct ModelManager {
    family: ModelFamily,
    catalog: Vec<ModelDescriptor>,
    coordinator: DownloadCoordinator,
    state: Arc<Mutex<FamilyState>>,
    worker: Mutex<Option<WorkerHandle>>,
    generation: AtomicU64,
    worker_command: WorkerCommand,
    request_timeout: Duration,
    load_timeout: Duration,
    shutdown_grace: Duration,
    recycle_after_request: bool,
}

impl ModelManager {
    /// Create a manager. Initial statuses come from the completion markers.
    pub fn new(options: ManagerOptions) -> Self {
        let mut state = FamilyState::default();
        for model in &options.catalog {
            let status = if options.cache.is_complete(&model.id) {
                ModelStatus::Downloaded
            } else {
                ModelStatus::NotDownloaded
            };
            debug!("Model '{}' starts as {}", model.id, status);
            state.models.insert(model.id.clone(), ModelRecord::new(status));
        }

        Self {
            family: options.family,
            catalog: options.catalog,
            coordinator: DownloadCoordinator::new(options.source, options.cache),
            state: Arc::new(Mutex::new(state)),
            worker: Mutex::new(None),
            generation: AtomicU64::new(0),
            worker_command: options.worker_command,
            request_timeout: options.request_timeout,
            load_timeout: options.load_timeout,
            shutdown_grace: options.shutdown_grace,
            recycle_after_request: options.recycle_after_request,
        }
    }

    pub fn family(&self) -> ModelFamily {
        self.family
    }

    pub fn catalog(&self) -> &[ModelDescriptor] {
        &self.catalog
    }

    pub fn cache(&self) -> &ModelCache {
        self.coordinator.cache()
    }

    pub fn descriptor(&self, id: &str) -> Result<&ModelDescriptor, CommandError> {
        self.catalog
            .iter()
            .find(|m| m.id == id)
            .ok_or_else(|| CommandError::UnknownModel(id.to_string()))
    }

    // ===== Status =====

    pub fn status(&self, id: &str) -> Result<ModelSnapshot, CommandError> {
        self.descriptor(id)?;
        self.reap_exited();
        Ok(self.state.lock().snapshot(id))
    }

    /// Every model of the family with its status, in catalog order.
    pub fn list(&self) -> Vec<(ModelDescriptor, ModelSnapshot)> {
        self.reap_exited();
        let st = self.state.lock();
        self.catalog
            .iter()
            .map(|m| (m.clone(), st.snapshot(&m.id)))
            .collect()
    }

    pub fn current_model_id(&self) -> Option<String> {
        self.reap_exited();
        self.state.lock().current.clone()
    }

    /// Pid of the attached worker, if any. Waits for in-flight worker calls.
    pub fn worker_pid(&self) -> Option<u32> {
        let mut slot = self.worker.lock();
        match slot.as_mut() {
            Some(handle) => handle.is_alive().then(|| handle.pid()),
            None => None,
        }
    }

    /// Notice a worker that died or broke the protocol while idle. Skipped if
    /// a worker call is in flight; that call will see the failure itself.
    fn reap_exited(&self) {
        if let Some(mut slot) = self.worker.try_lock() {
            self.reap_locked(&mut slot);
        }
    }

    fn reap_locked(&self, slot: &mut Option<WorkerHandle>) {
        let dead = match slot.as_mut() {
            Some(handle) => !handle.is_alive(),
            None => false,
        };
        if !dead {
            return;
        }
        if let Some(mut handle) = slot.take() {
            let message = format!("worker process exited unexpectedly{}", handle.stderr_excerpt());
            warn!("Reaped dead {} worker {}", self.family, handle.pid());
            self.state.lock().worker_lost(handle.generation(), &message);
            handle.kill();
        }
    }

    fn exit_hook(&self) -> ExitHook {
        let state = Arc::clone(&self.state);
        let family = self.family;
        Box::new(move |generation, cause| {
            let message = match cause {
                WorkerError::Protocol(m) => CommandError::ProtocolViolation(m).to_string(),
                other => other.to_string(),
            };
            let mut st = state.lock();
            if st.live_worker.as_ref().map(|w| w.generation) == Some(generation) {
                error!("{} worker (generation {}) died: {}", family, generation, message);
                st.worker_lost(generation, &message);
            }
        })
    }

    // ===== Downloads =====

    /// Download a model's artifacts, reporting progress to `sink`.
    ///
    /// Returns the resulting status. A model already on disk is left alone.
    pub async fn download(
        &self,
        id: &str,
        sink: Arc<dyn ProgressSink>,
    ) -> Result<ModelSnapshot, CommandError> {
        let model = self.descriptor(id)?.clone();

        let cancel = {
            let mut st = self.state.lock();
            let status = st.snapshot(id).status;
            match status {
                ModelStatus::Downloading => {
                    warn!("Model '{}' is already being downloaded", id);
                    return Err(CommandError::AlreadyInProgress(id.to_string()));
                }
                s if s.has_artifacts() => {
                    info!("Model '{}' already downloaded", id);
                    return Ok(st.snapshot(id));
                }
                _ => {}
            }
            st.record_mut(id)
                .transition(ModelEvent::DownloadStarted)
                .map_err(|e| CommandError::Internal(e.to_string()))?;
            let token = CancellationToken::new();
            st.downloads.insert(id.to_string(), token.clone());
            token
        };

        info!("Starting download of model '{}'", id);
        let mut guard = DownloadGuard {
            state: &self.state,
            id,
            armed: true,
        };

        let mut reporter = ProgressReporter::new(sink);
        let result = self.coordinator.run(&model, &mut reporter, &cancel).await;
        guard.armed = false;

        let mut st = self.state.lock();
        st.downloads.remove(id);
        match result {
            Ok(_) => {
                info!("Download complete: {}", id);
                st.record_mut(id)
                    .transition(ModelEvent::DownloadSucceeded)
                    .map_err(|e| CommandError::Internal(e.to_string()))?;
                Ok(st.snapshot(id))
            }
            Err(e) => {
                error!("Download of '{}' failed: {}", id, e);
                let message = e.to_string();
                st.record_mut(id).fail(ModelEvent::DownloadFailed, message.clone());
                Err(CommandError::DownloadFailed(message))
            }
        }
    }

    /// Cancel an ongoing download.
    pub fn cancel_download(&self, id: &str) -> Result<(), CommandError> {
        self.descriptor(id)?;
        let st = self.state.lock();
        match st.downloads.get(id) {
            Some(token) => {
                token.cancel();
                info!("Cancellation requested for model '{}'", id);
                Ok(())
            }
            None => Err(CommandError::NoActiveDownload(id.to_string())),
        }
    }

    /// Delete a downloaded model's directory.
    pub fn delete(&self, id: &str) -> Result<ModelSnapshot, CommandError> {
        self.descriptor(id)?;
        let _slot = self
            .worker
            .try_lock()
            .ok_or_else(|| CommandError::Busy(format!("{} worker is busy", self.family)))?;

        {
            let mut st = self.state.lock();
            let in_use = st.current.as_deref() == Some(id)
                || st.live_worker.as_ref().map(|w| w.model_id.as_str()) == Some(id);
            if in_use {
                return Err(CommandError::Busy(format!(
                    "Model '{}' is loaded; unload it first",
                    id
                )));
            }
            match st.snapshot(id).status {
                ModelStatus::Downloading => {
                    return Err(CommandError::Busy(format!(
                        "Model '{}' is being downloaded",
                        id
                    )))
                }
                ModelStatus::NotDownloaded => {
                    return Err(CommandError::NotDownloaded(id.to_string()))
                }
                _ => {}
            }
            st.record_mut(id)
                .transition(ModelEvent::Invalidated)
                .map_err(|e| CommandError::Internal(e.to_string()))?;
        }

        self.cache()
            .delete(id)
            .map_err(|e| CommandError::Internal(format!("Failed to delete model: {}", e)))?;
        info!("Deleted model '{}'", id);
        Ok(self.state.lock().snapshot(id))
    }

    // ===== Worker lifecycle =====

    /// Load `id` into this family's worker, replacing any other model.
    /// Concurrent loads queue on the worker slot.
    pub fn load(&self, id: &str) -> Result<ModelSnapshot, CommandError> {
        self.descriptor(id)?;
        let mut slot = self.worker.lock();
        self.load_locked(&mut slot, id)
    }

    /// Like [`load`](Self::load), but refuses models that were never downloaded.
    pub fn switch(&self, id: &str) -> Result<ModelSnapshot, CommandError> {
        if self.status(id)?.status == ModelStatus::NotDownloaded {
            return Err(CommandError::NotDownloaded(id.to_string()));
        }
        self.load(id)
    }

    /// Stop the worker. The model it served goes back to `downloaded`.
    pub fn unload(&self) -> Option<String> {
        let mut slot = self.worker.lock();
        let current = self.state.lock().current.clone();
        self.teardown(&mut slot);
        current
    }

    /// Stop the worker on application exit.
    pub fn shutdown(&self) {
        let mut slot = self.worker.lock();
        self.teardown(&mut slot);
    }

    fn load_locked(
        &self,
        slot: &mut Option<WorkerHandle>,
        id: &str,
    ) -> Result<ModelSnapshot, CommandError> {
        self.reap_locked(slot);
        let worker_alive = slot
            .as_mut()
            .map(|h| h.model_id() == id && h.is_alive())
            .unwrap_or(false);

        {
            let mut st = self.state.lock();
            let snapshot = st.snapshot(id);
            match snapshot.status {
                ModelStatus::Ready if worker_alive && st.current.as_deref() == Some(id) => {
                    info!("Model '{}' is already loaded", id);
                    return Ok(snapshot);
                }
                ModelStatus::NotDownloaded => {
                    return Err(CommandError::NotDownloaded(id.to_string()))
                }
                ModelStatus::Downloading => {
                    return Err(CommandError::Busy(format!(
                        "Model '{}' is still downloading",
                        id
                    )))
                }
                _ => {}
            }

            if !self.cache().is_complete(id) {
                warn!("Model '{}' has no completion marker", id);
                if let Err(e) = st.record_mut(id).transition(ModelEvent::Invalidated) {
                    warn!("Model '{}': {}", id, e);
                }
                return Err(CommandError::NotDownloaded(id.to_string()));
            }
        }

        let model_dir = self.cache().model_dir(id);
        if !safetensors_complete(&model_dir) {
            let message = format!("Model '{}' is missing weight files; download it again", id);
            warn!("{}", message);
            // The status must keep agreeing with the marker on disk.
            match self.cache().clear_marker(id) {
                Ok(()) => {
                    let mut st = self.state.lock();
                    if let Err(e) = st.record_mut(id).transition(ModelEvent::Invalidated) {
                        warn!("Model '{}': {}", id, e);
                    }
                }
                Err(e) => error!("Failed to clear completion marker of '{}': {}", id, e),
            }
            return Err(CommandError::LoadFailed(message));
        }

        // Unload current model first
        self.teardown(slot);

        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        {
            let mut st = self.state.lock();
            st.record_mut(id)
                .transition(ModelEvent::LoadStarted)
                .map_err(|e| CommandError::Internal(e.to_string()))?;
            st.live_worker = Some(LiveWorker {
                generation,
                model_id: id.to_string(),
            });
        }

        info!("Loading model '{}' (generation {})", id, generation);
        let mut handle =
            match WorkerHandle::spawn(&self.worker_command, id, generation, self.exit_hook()) {
                Ok(handle) => handle,
                Err(e) => return Err(self.load_failed(generation, id, e.to_string())),
            };

        let params = json!({ "modelPath": model_dir });
        if let Err(e) = handle.request(ops::LOAD, params, self.load_timeout) {
            handle.kill();
            return Err(self.load_failed(generation, id, e.to_string()));
        }

        let mut st = self.state.lock();
        let still_live = st.live_worker.as_ref().map(|w| w.generation) == Some(generation);
        if !still_live || !handle.is_alive() {
            drop(st);
            handle.kill();
            return Err(self.load_failed(
                generation,
                id,
                "worker process exited unexpectedly".to_string(),
            ));
        }

        st.record_mut(id)
            .transition(ModelEvent::LoadSucceeded)
            .map_err(|e| CommandError::Internal(e.to_string()))?;
        st.current = Some(id.to_string());
        info!("Model '{}' loaded successfully (pid {})", id, handle.pid());
        let snapshot = st.snapshot(id);
        drop(st);

        *slot = Some(handle);
        Ok(snapshot)
    }

    fn load_failed(&self, generation: u64, id: &str, message: String) -> CommandError {
        error!("Failed to load model '{}': {}", id, message);
        let mut st = self.state.lock();
        if st.live_worker.as_ref().map(|w| w.generation) == Some(generation) {
            st.live_worker = None;
        }
        st.record_mut(id).fail(ModelEvent::LoadFailed, message.clone());
        CommandError::LoadFailed(message)
    }

    /// Detach and stop the worker in `slot`. Its model returns to
    /// `downloaded` if it was serving.
    fn teardown(&self, slot: &mut Option<WorkerHandle>) {
        let Some(handle) = slot.take() else {
            return;
        };

        {
            let mut st = self.state.lock();
            if st.live_worker.as_ref().map(|w| w.generation) == Some(handle.generation()) {
                st.live_worker = None;
            }
            if let Some(current) = st.current.take() {
                if let Err(e) = st.record_mut(&current).transition(ModelEvent::Unloaded) {
                    debug!("Unload of '{}': {}", current, e);
                }
            }
        }

        handle.shutdown(self.shutdown_grace);
    }

    // ===== Requests =====

    /// Send one request to the ready worker.
    pub fn request(&self, op: &str, params: Value) -> Result<Value, CommandError> {
        let mut slot = self.worker.lock();

        let Some(model_id) = self.state.lock().current.clone() else {
            return Err(CommandError::NoModelLoaded);
        };
        let Some(handle) = slot.as_mut().filter(|h| h.model_id() == model_id) else {
            return Err(CommandError::NoModelLoaded);
        };

        match handle.request(op, params, self.request_timeout) {
            Ok(result) => {
                if self.recycle_after_request {
                    self.recycle(&mut slot, &model_id);
                }
                Ok(result)
            }
            Err(WorkerError::Application(message)) => Err(CommandError::RequestFailed(message)),
            Err(e) => {
                let err = match &e {
                    WorkerError::Protocol(m) => CommandError::ProtocolViolation(m.clone()),
                    other => CommandError::WorkerCrashed(other.to_string()),
                };
                self.invalidate_worker(&mut slot, &err.to_string());
                Err(err)
            }
        }
    }

    /// Kill the worker after a protocol-level failure and fail its model.
    fn invalidate_worker(&self, slot: &mut Option<WorkerHandle>, message: &str) {
        let Some(mut handle) = slot.take() else {
            return;
        };
        error!(
            "Tearing down {} worker {}: {}",
            self.family,
            handle.pid(),
            message
        );
        {
            let mut st = self.state.lock();
            let generation = handle.generation();
            if st.live_worker.as_ref().map(|w| w.generation) == Some(generation) {
                st.worker_lost(generation, message);
            } else {
                // The exit hook got here first; keep the more specific message.
                let id = handle.model_id().to_string();
                st.record_mut(&id).fail(ModelEvent::Crashed, message);
            }
        }
        handle.kill();
    }

    fn recycle(&self, slot: &mut Option<WorkerHandle>, model_id: &str) {
        debug!("Recycling {} worker for '{}'", self.family, model_id);
        self.teardown(slot);
        if let Err(e) = self.load_locked(slot, model_id) {
            warn!("Failed to restart {} worker: {}", self.family, e);
        }
    }
}

impl Drop for ModelManager {
    fn drop(&mut self) {
        let slot = self.worker.get_mut();
        if let Some(handle) = slot.take() {
            handle.shutdown(Duration::ZERO);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::cache::DownloadMarker;
    use crate::models::catalog::models_for_family;
    use crate::models::source::{RemoteBody, RemoteFile};
    use crate::models::download::DownloadError;
    use crate::models::events::DownloadProgress;
    use futures_util::future::BoxFuture;
    use futures_util::FutureExt;

    struct Offline;

    impl ArtifactSource for Offline {
        fn list_files<'a>(
            &'a self,
            _repo_id: &'a str,
        ) -> BoxFuture<'a, Result<Vec<RemoteFile>, DownloadError>> {
            async { Err(DownloadError::Source("offline".into())) }.boxed()
        }

        fn open<'a>(
            &'a self,
            _repo_id: &'a str,
            _file: &'a RemoteFile,
            _offset: u64,
        ) -> BoxFuture<'a, Result<RemoteBody, DownloadError>> {
            async { Err(DownloadError::Source("offline".into())) }.boxed()
        }
    }

    fn manager(root: &std::path::Path, program: &str) -> ModelManager {
        ModelManager::new(ManagerOptions {
            family: ModelFamily::Translation,
            catalog: models_for_family(ModelFamily::Translation),
            cache: ModelCache::new(root),
            source: Arc::new(Offline),
            worker_command: WorkerCommand {
                program: program.into(),
                args: Vec::new(),
                env: Vec::new(),
            },
            request_timeout: Duration::from_secs(5),
            load_timeout: Duration::from_secs(5),
            shutdown_grace: Duration::from_millis(100),
            recycle_after_request: false,
        })
    }

    fn install(cache: &ModelCache, id: &str) {
        let dir = cache.model_dir(id);
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join("config.json"), "{}").unwrap();
        std::fs::write(dir.join("model.safetensors"), b"weights").unwrap();
        cache
            .write_marker(id, &DownloadMarker::new("repo", vec!["model.safetensors".into()]))
            .unwrap();
    }

    #[test]
    fn initial_status_follows_markers() {
        let dir = tempfile::tempdir().unwrap();
        install(&ModelCache::new(dir.path()), "4b");

        let m = manager(dir.path(), "/nonexistent/worker");

        assert_eq!(m.status("4b").unwrap().status, ModelStatus::Downloaded);
        assert_eq!(m.status("27b").unwrap().status, ModelStatus::NotDownloaded);
        assert!(matches!(m.status("nope"), Err(CommandError::UnknownModel(_))));
        assert_eq!(m.list().len(), 3);
        assert_eq!(m.current_model_id(), None);
    }

    #[test]
    fn load_requires_download() {
        let dir = tempfile::tempdir().unwrap();
        let m = manager(dir.path(), "/nonexistent/worker");

        assert!(matches!(m.load("4b"), Err(CommandError::NotDownloaded(_))));
        assert!(matches!(m.switch("4b"), Err(CommandError::NotDownloaded(_))));
        assert_eq!(m.status("4b").unwrap().status, ModelStatus::NotDownloaded);
    }

    #[test]
    fn spawn_failure_is_a_load_error() {
        let dir = tempfile::tempdir().unwrap();
        install(&ModelCache::new(dir.path()), "4b");
        let m = manager(dir.path(), "/nonexistent/worker");

        let err = m.load("4b").unwrap_err();

        assert!(matches!(err, CommandError::LoadFailed(_)));
        let snapshot = m.status("4b").unwrap();
        assert_eq!(snapshot.status, ModelStatus::Error);
        assert!(snapshot.error.unwrap().contains("Failed to spawn worker"));
        assert_eq!(m.worker_pid(), None);
    }

    #[test]
    fn missing_weights_invalidate_the_model() {
        let dir = tempfile::tempdir().unwrap();
        let cache = ModelCache::new(dir.path());
        install(&cache, "4b");
        std::fs::remove_file(cache.model_dir("4b").join("model.safetensors")).unwrap();
        let m = manager(dir.path(), "/nonexistent/worker");

        assert!(matches!(m.load("4b"), Err(CommandError::LoadFailed(_))));
        assert!(!cache.is_complete("4b"));
        assert_eq!(m.status("4b").unwrap().status, ModelStatus::NotDownloaded);
    }

    #[test]
    fn requests_need_a_loaded_model() {
        let dir = tempfile::tempdir().unwrap();
        let m = manager(dir.path(), "/nonexistent/worker");

        let err = m.request(ops::TRANSLATE, json!({})).unwrap_err();
        assert!(matches!(err, CommandError::NoModelLoaded));
        assert_eq!(m.unload(), None);
    }

    #[test]
    fn cancel_without_download() {
        let dir = tempfile::tempdir().unwrap();
        let m = manager(dir.path(), "/nonexistent/worker");

        assert!(matches!(
            m.cancel_download("4b"),
            Err(CommandError::NoActiveDownload(_))
        ));
    }

    #[test]
    fn delete_lifecycle() {
        let dir = tempfile::tempdir().unwrap();
        let cache = ModelCache::new(dir.path());
        install(&cache, "4b");
        let m = manager(dir.path(), "/nonexistent/worker");

        let snapshot = m.delete("4b").unwrap();

        assert_eq!(snapshot.status, ModelStatus::NotDownloaded);
        assert!(!cache.model_dir("4b").exists());
        assert!(matches!(m.delete("4b"), Err(CommandError::NotDownloaded(_))));
    }

    #[tokio::test]
    async fn failed_download_records_error() {
        let dir = tempfile::tempdir().unwrap();
        let m = manager(dir.path(), "/nonexistent/worker");
        let (tx, _rx) = tokio::sync::mpsc::unbounded_channel::<DownloadProgress>();

        let err = m.download("4b", Arc::new(tx)).await.unwrap_err();

        assert!(matches!(err, CommandError::DownloadFailed(ref msg) if msg == "offline"));
        let snapshot = m.status("4b").unwrap();
        assert_eq!(snapshot.status, ModelStatus::Error);
        assert_eq!(snapshot.error.as_deref(), Some("offline"));
    }

    #[tokio::test]
    async fn download_of_installed_model_is_a_no_op() {
        let dir = tempfile::tempdir().unwrap();
        install(&ModelCache::new(dir.path()), "4b");
        let m = manager(dir.path(), "/nonexistent/worker");
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel::<DownloadProgress>();

        let snapshot = m.download("4b", Arc::new(tx)).await.unwrap();

        assert_eq!(snapshot.status, ModelStatus::Downloaded);
        assert!(rx.try_recv().is_err());
    }
}
