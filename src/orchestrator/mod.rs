//! The Orchestrator: single-threaded main loop tying together the priority
//! queue, dependency graph, overlap detector, worker pool, and merge
//! coordinator.
//!
//! Grounded on the teacher's `workspace::sync`/session-loop shape (poll,
//! act, report) reduced to a single cooperative tick rather than a
//! multi-session scheduler.

pub mod sprint;

pub use sprint::{run_sprint, SprintResult};

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use tracing::info;

use llp_git::GitLock;

use crate::config::{OverlapConfig, WorkersConfig};
use crate::graph::DependencyGraph;
use crate::merge::MergeCoordinator;
use crate::overlap::OverlapDetector;
use crate::queue::PriorityQueue;
use crate::state::OrchestratorState;
use crate::worker::{AgentInvoker, Pipeline, Stage, WorkerPool, WorkerResult};

const TICK_INTERVAL: Duration = Duration::from_millis(100);
const STATUS_INTERVAL: Duration = Duration::from_secs(5);
const OVERLAP_DEMOTE: u8 = 1;

/// A point-in-time summary emitted every [`STATUS_INTERVAL`], per spec
/// §4.11 step 5.
#[derive(Clone, Debug, Default)]
pub struct StatusLine {
    pub active_count: usize,
    pub stages: std::collections::HashMap<String, Stage>,
    pub completed_count: usize,
    pub failed_count: usize,
    pub pending_merge_count: u64,
    pub wave_label: Option<String>,
}

/// Runs one category (or one sprint wave) of issues to completion.
pub struct Orchestrator {
    queue: PriorityQueue,
    graph: DependencyGraph,
    overlap: Option<OverlapDetector>,
    overlap_config: OverlapConfig,
    pool: WorkerPool,
    lock: Arc<GitLock>,
    mainline_branch: String,
    invoker: Arc<dyn AgentInvoker>,
    workers_config: WorkersConfig,
    merge_tx: mpsc::Sender<WorkerResult>,
    merge_coordinator: MergeCoordinator<'static>,
    stage_log: Arc<Mutex<Vec<(String, Stage)>>>,
    cancel: Arc<AtomicBool>,
    state: OrchestratorState,
    state_path: PathBuf,
    state_dirty: bool,
    wave_label: Option<String>,
}

impl Orchestrator {
    /// Build an orchestrator over `queue`/`graph`, sharing `lock` with the
    /// eventual merge coordinator and worker pool threads.
    ///
    /// Leaks the `Arc<GitLock>` into a `'static` borrow for the merge
    /// coordinator: the orchestrator, and therefore its merge coordinator,
    /// never outlives the process, so this trades a formal lifetime for a
    /// coordinator that isn't generic over one.
    #[must_use]
    pub fn new(
        queue: PriorityQueue,
        graph: DependencyGraph,
        lock: Arc<GitLock>,
        mainline_branch: String,
        invoker: Arc<dyn AgentInvoker>,
        workers_config: WorkersConfig,
        overlap_config: OverlapConfig,
        state_path: PathBuf,
        cancel: Arc<AtomicBool>,
    ) -> Self {
        let state = OrchestratorState::load(&state_path).unwrap_or_default();
        let (merge_tx, merge_rx) = mpsc::channel();
        // Leaked once per orchestrator instance (process-lifetime object) so the
        // merge coordinator can hold a plain `&GitLock` instead of being generic
        // over an `Arc`; the orchestrator never outlives the process.
        let leaked_lock: &'static Arc<GitLock> = Box::leak(Box::new(Arc::clone(&lock)));
        let lock_static: &'static GitLock = leaked_lock;
        let mut merge_coordinator = MergeCoordinator::new(lock_static, mainline_branch.clone(), merge_rx);

        let stage_log: Arc<Mutex<Vec<(String, Stage)>>> = Arc::new(Mutex::new(Vec::new()));
        let stage_log_for_callback = Arc::clone(&stage_log);
        merge_coordinator.on_stage(move |issue_id, stage| {
            stage_log_for_callback
                .lock()
                .unwrap_or_else(std::sync::PoisonError::into_inner)
                .push((issue_id.to_owned(), stage));
        });

        Self {
            queue,
            graph,
            overlap: overlap_config.enabled.then(OverlapDetector::new),
            overlap_config,
            pool: WorkerPool::new(workers_config.max_workers, Arc::clone(&cancel)),
            lock,
            mainline_branch,
            invoker,
            workers_config,
            merge_tx,
            merge_coordinator,
            stage_log,
            cancel,
            state,
            state_path,
            state_dirty: false,
            wave_label: None,
        }
    }

    /// Label subsequent status lines with a sprint wave name.
    pub fn set_wave_label(&mut self, label: impl Into<String>) {
        self.wave_label = Some(label.into());
    }

    /// Run the tick loop to completion: queue drained, all workers finished,
    /// merge queue drained, or cancellation observed.
    pub fn run(&mut self) {
        let mut last_status = Instant::now();

        loop {
            if self.cancel.load(Ordering::SeqCst) {
                info!("cancellation observed, draining in-flight workers");
                self.drain_and_stop();
                break;
            }

            self.dispatch_ready();

            self.merge_coordinator.drain(self.merges_per_tick());
            self.pool.reap_finished();
            self.sync_merge_counters();

            if last_status.elapsed() >= STATUS_INTERVAL {
                self.emit_status();
                last_status = Instant::now();
            }

            if self.state_dirty {
                self.persist_state();
            }

            if self.queue.is_empty() && self.pool.active_count() == 0 && self.merge_coordinator.counters().pending_count == 0 {
                break;
            }

            std::thread::sleep(TICK_INTERVAL);
        }

        self.emit_status();
        self.persist_state();
    }

    fn merges_per_tick(&self) -> usize {
        4
    }

    /// Try to dispatch as many ready issues as there's capacity for. Blocked
    /// or overlapping issues are set aside and requeued at the end, so one
    /// blocked issue at the front of the priority order never stalls ready
    /// work behind it within the same tick.
    fn dispatch_ready(&mut self) {
        let mut undispatched = Vec::new();
        let candidates = self.queue.len();

        for _ in 0..candidates {
            if !self.pool.has_capacity() {
                break;
            }
            let Some(issue) = self.queue.pop() else { break };

            let blockers = self.graph.blocking_issues(&issue.id, &self.completed_set());
            if !blockers.is_empty() {
                undispatched.push((issue, 0));
                continue;
            }

            if let Some(detector) = &self.overlap {
                let overlapping = detector.check_overlap(&issue);
                if !overlapping.is_empty() {
                    if self.overlap_config.warn_only {
                        tracing::warn!(issue_id = %issue.id, overlaps = ?overlapping, "dispatching despite file-scope overlap (warn-only)");
                    } else {
                        tracing::info!(issue_id = %issue.id, overlaps = ?overlapping, "deferring issue due to file-scope overlap");
                        undispatched.push((issue, OVERLAP_DEMOTE));
                        continue;
                    }
                }
            }

            if let Some(detector) = &mut self.overlap {
                detector.register(&issue);
            }

            self.state.mark_attempted(&issue.id);
            self.state_dirty = true;
            self.dispatch(issue);
        }

        for (issue, demote) in undispatched {
            self.queue.requeue(issue, demote);
        }
    }

    fn completed_set(&self) -> std::collections::HashSet<String> {
        self.state.completed_issue_ids.iter().cloned().collect()
    }

    fn dispatch(&self, issue: crate::issue::Issue) {
        let lock = Arc::clone(&self.lock);
        let mainline_branch = self.mainline_branch.clone();
        let invoker = Arc::clone(&self.invoker);
        let action_timeout = self.workers_config.action_timeout();
        let max_continuations = self.workers_config.max_continuations;
        let issue_id = issue.id.clone();
        let merge_tx = self.merge_tx.clone();

        self.pool.dispatch(
            issue_id,
            move |cancel: &AtomicBool, stages: &crate::worker::StageMap| {
                let on_stage = |stage: Stage| stages.set(&issue.id, stage);
                let pipeline = Pipeline {
                    lock: &lock,
                    mainline_branch: &mainline_branch,
                    issue: &issue,
                    invoker: invoker.as_ref(),
                    action_timeout,
                    max_continuations,
                    cancel,
                    on_stage: &on_stage,
                };
                pipeline.run()
            },
            move |result| {
                let _ = merge_tx.send(result);
            },
        );
    }

    fn sync_merge_counters(&mut self) {
        let transitions: Vec<(String, Stage)> = std::mem::take(
            &mut *self.stage_log.lock().unwrap_or_else(std::sync::PoisonError::into_inner),
        );

        for (issue_id, stage) in transitions {
            match stage {
                Stage::Completed => {
                    self.state.mark_completed(&issue_id);
                    self.state_dirty = true;
                }
                Stage::Failed => {
                    self.state.mark_failed(&issue_id);
                    self.state_dirty = true;
                }
                _ => {}
            }
            if let Some(detector) = &mut self.overlap {
                detector.unregister(&issue_id);
            }
        }

        for failed in self.merge_coordinator.failed_merges() {
            let note = format!("merge failed: {}", failed.detail);
            let already_recorded = self.state.corrections.get(&failed.issue_id).is_some_and(|notes| notes.contains(&note));
            if !already_recorded {
                self.state.add_correction(&failed.issue_id, note);
                self.state_dirty = true;
            }
        }

        self.state.pending_merge_count = self.merge_coordinator.counters().pending_count;
    }

    fn drain_and_stop(&mut self) {
        while self.pool.active_count() > 0 {
            self.pool.reap_finished();
            self.merge_coordinator.drain(self.merges_per_tick());
            std::thread::sleep(TICK_INTERVAL);
        }
        self.merge_coordinator.drain(usize::MAX);
        self.sync_merge_counters();
    }

    fn emit_status(&self) {
        let counters = self.merge_coordinator.counters();
        let status = StatusLine {
            active_count: self.pool.active_count(),
            stages: self.pool.stages().snapshot(),
            completed_count: self.state.completed_issue_ids.len(),
            failed_count: self.state.failed_issue_ids.len(),
            pending_merge_count: counters.pending_count,
            wave_label: self.wave_label.clone(),
        };
        info!(
            active = status.active_count,
            completed = status.completed_count,
            failed = status.failed_count,
            pending_merge = status.pending_merge_count,
            wave = ?status.wave_label,
            "orchestrator status"
        );
    }

    fn persist_state(&mut self) {
        match std::mem::take(&mut self.state).save_merged(&self.state_path) {
            Ok(merged) => self.state = merged,
            Err(e) => tracing::warn!(error = %e, "failed to persist orchestrator state"),
        }
        self.state_dirty = false;
    }

    /// Final state snapshot, e.g. for sprint mode to check a wave's
    /// completed set before starting the next.
    #[must_use]
    pub fn state(&self) -> &OrchestratorState {
        &self.state
    }
}
