//! Fixed-size worker pool: dispatches one pipeline per thread, tracks each
//! active worker's stage in a shared map, and invokes a completion callback
//! when a worker finishes.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use crate::worker::types::{Stage, WorkerResult};

/// Thread-safe map from issue id to its worker's current stage.
#[derive(Clone, Default)]
pub struct StageMap {
    inner: Arc<Mutex<HashMap<String, Stage>>>,
}

impl StageMap {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, issue_id: &str, stage: Stage) {
        self.inner
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .insert(issue_id.to_owned(), stage);
    }

    /// Remove an issue from tracking. Called on terminal transition.
    pub fn remove(&self, issue_id: &str) {
        self.inner.lock().unwrap_or_else(std::sync::PoisonError::into_inner).remove(issue_id);
    }

    /// A point-in-time snapshot of every tracked worker's stage.
    #[must_use]
    pub fn snapshot(&self) -> HashMap<String, Stage> {
        self.inner.lock().unwrap_or_else(std::sync::PoisonError::into_inner).clone()
    }
}

/// A fixed-capacity pool dispatching pipelines onto OS threads.
///
/// Grounded on the teacher's synchronous, thread-based execution model
/// (no async runtime anywhere in the teacher's dependency stack): each
/// dispatch is a plain `std::thread::spawn`, and capacity is tracked with
/// an atomic counter the orchestrator consults before dispatching another.
pub struct WorkerPool {
    capacity: usize,
    active: Arc<AtomicUsize>,
    stages: StageMap,
    cancel: Arc<AtomicBool>,
    handles: Mutex<Vec<std::thread::JoinHandle<()>>>,
}

impl WorkerPool {
    #[must_use]
    pub fn new(capacity: usize, cancel: Arc<AtomicBool>) -> Self {
        Self {
            capacity,
            active: Arc::new(AtomicUsize::new(0)),
            stages: StageMap::new(),
            cancel,
            handles: Mutex::new(Vec::new()),
        }
    }

    #[must_use]
    pub fn has_capacity(&self) -> bool {
        self.active.load(Ordering::SeqCst) < self.capacity
    }

    #[must_use]
    pub fn active_count(&self) -> usize {
        self.active.load(Ordering::SeqCst)
    }

    #[must_use]
    pub fn stages(&self) -> StageMap {
        self.stages.clone()
    }

    /// Dispatch a pipeline run onto a new thread. `run_pipeline` must be a
    /// self-contained thunk (typically constructing a [`super::pipeline::Pipeline`]
    /// owning cloned/`Arc`-wrapped inputs) that returns its result; `on_complete`
    /// runs on the worker thread once the pipeline finishes.
    pub fn dispatch<F, C>(&self, issue_id: String, run_pipeline: F, on_complete: C)
    where
        F: FnOnce(&AtomicBool, &StageMap) -> WorkerResult + Send + 'static,
        C: FnOnce(WorkerResult) + Send + 'static,
    {
        self.active.fetch_add(1, Ordering::SeqCst);
        self.stages.set(&issue_id, Stage::Setup);

        let active = Arc::clone(&self.active);
        let stages = self.stages.clone();
        let cancel = Arc::clone(&self.cancel);
        let issue_id_for_cleanup = issue_id.clone();

        let handle = std::thread::spawn(move || {
            let result = run_pipeline(&cancel, &stages);
            on_complete(result);
            stages.remove(&issue_id_for_cleanup);
            active.fetch_sub(1, Ordering::SeqCst);
        });

        self.handles.lock().unwrap_or_else(std::sync::PoisonError::into_inner).push(handle);
    }

    /// Join any threads that have already finished, pruning the handle
    /// list. Called periodically by the orchestrator tick so finished
    /// threads don't accumulate as zombie `JoinHandle`s.
    pub fn reap_finished(&self) {
        let mut handles = self.handles.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        handles.retain_mut(|h| !h.is_finished());
    }
}
