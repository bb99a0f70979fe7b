//! Job dispatch: the seam between the trigger adapter and whatever runs
//! merge jobs.
//!
//! `LocalDispatcher` runs each job on its own thread against a shared store.
//! Runs for the same bucket are serialised by [`DatasetLocks`]; run state is
//! kept in a [`JobRunTracker`] so callers can block on completion.

use cdcflow_protocol::{JobArguments, JobConfig, JobRunId};
use cdcflow_store::ObjectStore;
use cdcflow_worker::{MergeJob, MergeReport};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::{Arc, Condvar, Mutex, PoisonError};
use std::thread;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, error, info};

#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("unknown job '{0}'")]
    UnknownJob(String),

    #[error("job service unavailable: {0}")]
    Unavailable(String),

    #[error("failed to start job run: {0}")]
    Spawn(#[source] std::io::Error),
}

/// Starts merge job runs. Returns as soon as the run is accepted.
pub trait JobDispatcher: Send + Sync {
    fn start_job_run(&self, job_name: &str, args: &JobArguments) -> Result<JobRunId, DispatchError>;
}

impl<D: JobDispatcher + ?Sized> JobDispatcher for Arc<D> {
    fn start_job_run(&self, job_name: &str, args: &JobArguments) -> Result<JobRunId, DispatchError> {
        (**self).start_job_run(job_name, args)
    }
}

/// Lifecycle of one job run.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum RunState {
    Running { bucket: String, file_name: String },
    Succeeded { report: Box<MergeReport> },
    Failed { message: String, retryable: bool },
}

impl RunState {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, RunState::Running { .. })
    }
}

#[derive(Debug, Default)]
struct TrackerInner {
    runs: Mutex<HashMap<JobRunId, RunState>>,
    changed: Condvar,
}

/// Shared record of run states.
#[derive(Debug, Clone, Default)]
pub struct JobRunTracker {
    inner: Arc<TrackerInner>,
}

impl JobRunTracker {
    pub fn new() -> Self {
        Self::default()
    }

    fn set(&self, run_id: &JobRunId, state: RunState) {
        let mut runs = self.inner.runs.lock().unwrap_or_else(PoisonError::into_inner);
        runs.insert(run_id.clone(), state);
        self.inner.changed.notify_all();
    }

    pub fn status(&self, run_id: &JobRunId) -> Option<RunState> {
        let runs = self.inner.runs.lock().unwrap_or_else(PoisonError::into_inner);
        runs.get(run_id).cloned()
    }

    /// Block until the run is terminal or `timeout` elapses, then return its
    /// current state. `None` if the run is unknown.
    pub fn wait(&self, run_id: &JobRunId, timeout: Option<Duration>) -> Option<RunState> {
        let runs = self.inner.runs.lock().unwrap_or_else(PoisonError::into_inner);
        if !runs.contains_key(run_id) {
            return None;
        }
        let running = |runs: &mut HashMap<JobRunId, RunState>| {
            matches!(runs.get(run_id), Some(RunState::Running { .. }))
        };
        let runs = match timeout {
            None => self
                .inner
                .changed
                .wait_while(runs, running)
                .unwrap_or_else(PoisonError::into_inner),
            Some(timeout) => {
                self.inner
                    .changed
                    .wait_timeout_while(runs, timeout, running)
                    .unwrap_or_else(PoisonError::into_inner)
                    .0
            }
        };
        runs.get(run_id).cloned()
    }

    pub fn runs(&self) -> Vec<(JobRunId, RunState)> {
        let runs = self.inner.runs.lock().unwrap_or_else(PoisonError::into_inner);
        runs.iter().map(|(id, state)| (id.clone(), state.clone())).collect()
    }

    /// Remove a finished run and return its final state. Running runs stay.
    pub fn forget(&self, run_id: &JobRunId) -> Option<RunState> {
        let mut runs = self.inner.runs.lock().unwrap_or_else(PoisonError::into_inner);
        match runs.get(run_id) {
            Some(state) if state.is_terminal() => runs.remove(run_id),
            _ => None,
        }
    }

    /// Remove and return every finished run.
    pub fn drain_finished(&self) -> Vec<(JobRunId, RunState)> {
        let mut runs = self.inner.runs.lock().unwrap_or_else(PoisonError::into_inner);
        let finished: Vec<JobRunId> = runs
            .iter()
            .filter(|(_, state)| state.is_terminal())
            .map(|(id, _)| id.clone())
            .collect();
        finished
            .into_iter()
            .filter_map(|id| runs.remove(&id).map(|state| (id, state)))
            .collect()
    }
}

/// One in-process mutex per dataset (bucket).
#[derive(Debug, Clone, Default)]
pub struct DatasetLocks {
    locks: Arc<Mutex<HashMap<String, Arc<Mutex<()>>>>>,
}

impl DatasetLocks {
    pub fn lock_for(&self, dataset: &str) -> Arc<Mutex<()>> {
        let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
        locks.entry(dataset.to_string()).or_default().clone()
    }

    /// Drop the dataset's entry if no caller still holds its lock handle.
    pub fn release(&self, dataset: &str) {
        let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
        if locks
            .get(dataset)
            .is_some_and(|lock| Arc::strong_count(lock) == 1)
        {
            locks.remove(dataset);
        }
    }

    pub fn len(&self) -> usize {
        self.locks.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Runs merge jobs on background threads in this process.
pub struct LocalDispatcher {
    store: Arc<dyn ObjectStore>,
    config: Arc<JobConfig>,
    tracker: JobRunTracker,
    locks: DatasetLocks,
}

impl LocalDispatcher {
    pub fn new(store: Arc<dyn ObjectStore>, config: JobConfig) -> Self {
        Self {
            store,
            config: Arc::new(config),
            tracker: JobRunTracker::new(),
            locks: DatasetLocks::default(),
        }
    }

    pub fn config(&self) -> &JobConfig {
        &self.config
    }

    pub fn tracker(&self) -> &JobRunTracker {
        &self.tracker
    }

    pub fn wait(&self, run_id: &JobRunId, timeout: Option<Duration>) -> Option<RunState> {
        self.tracker.wait(run_id, timeout)
    }

    pub fn locks(&self) -> &DatasetLocks {
        &self.locks
    }
}

impl JobDispatcher for LocalDispatcher {
    fn start_job_run(&self, job_name: &str, args: &JobArguments) -> Result<JobRunId, DispatchError> {
        if job_name != self.config.job_name {
            return Err(DispatchError::UnknownJob(job_name.to_string()));
        }

        let run_id = JobRunId::new();
        self.tracker.set(
            &run_id,
            RunState::Running {
                bucket: args.dst_bucket_name.clone(),
                file_name: args.file_name.clone(),
            },
        );

        let store = Arc::clone(&self.store);
        let config = Arc::clone(&self.config);
        let tracker = self.tracker.clone();
        let locks = self.locks.clone();
        let args = args.clone();
        let id = run_id.clone();
        let spawned = thread::Builder::new()
            .name(format!("merge-{}", run_id.short()))
            .spawn(move || {
                let lock = locks.lock_for(&args.dst_bucket_name);
                let guard = lock.lock().unwrap_or_else(PoisonError::into_inner);
                debug!(run_id = %id, bucket = %args.dst_bucket_name, "acquired dataset lock");

                let state = match MergeJob::new(store.as_ref(), &config).run_as(&args, id.clone()) {
                    Ok(report) => {
                        info!(run_id = %id, rows = report.counts.output_rows, "job run succeeded");
                        RunState::Succeeded {
                            report: Box::new(report),
                        }
                    }
                    Err(err) => {
                        error!(run_id = %id, error = %err, "job run failed");
                        RunState::Failed {
                            message: err.to_string(),
                            retryable: err.is_retryable(),
                        }
                    }
                };
                drop(guard);
                drop(lock);
                locks.release(&args.dst_bucket_name);
                tracker.set(&id, state);
            });

        if let Err(err) = spawned {
            self.tracker.set(
                &run_id,
                RunState::Failed {
                    message: err.to_string(),
                    retryable: true,
                },
            );
            return Err(DispatchError::Spawn(err));
        }
        Ok(run_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wait_unknown_run() {
        let tracker = JobRunTracker::new();
        assert!(tracker.wait(&JobRunId::new(), None).is_none());
    }

    #[test]
    fn test_wait_times_out_while_running() {
        let tracker = JobRunTracker::new();
        let id = JobRunId::new();
        tracker.set(
            &id,
            RunState::Running {
                bucket: "b".to_string(),
                file_name: "f.csv".to_string(),
            },
        );
        let state = tracker.wait(&id, Some(Duration::from_millis(20))).unwrap();
        assert!(!state.is_terminal());
    }

    #[test]
    fn test_wait_wakes_on_finish() {
        let tracker = JobRunTracker::new();
        let id = JobRunId::new();
        tracker.set(
            &id,
            RunState::Running {
                bucket: "b".to_string(),
                file_name: "f.csv".to_string(),
            },
        );

        let finisher = {
            let tracker = tracker.clone();
            let id = id.clone();
            thread::spawn(move || {
                thread::sleep(Duration::from_millis(10));
                tracker.set(
                    &id,
                    RunState::Failed {
                        message: "boom".to_string(),
                        retryable: false,
                    },
                );
            })
        };
        let state = tracker.wait(&id, None).unwrap();
        assert!(matches!(state, RunState::Failed { .. }));
        finisher.join().unwrap();
    }

    #[test]
    fn test_finished_runs_can_be_dropped() {
        let tracker = JobRunTracker::new();
        let running = JobRunId::new();
        let done = JobRunId::new();
        tracker.set(
            &running,
            RunState::Running {
                bucket: "b".to_string(),
                file_name: "f.csv".to_string(),
            },
        );
        tracker.set(
            &done,
            RunState::Failed {
                message: "boom".to_string(),
                retryable: false,
            },
        );

        assert!(tracker.forget(&running).is_none());
        let drained = tracker.drain_finished();
        assert_eq!(drained.len(), 1);
        assert_eq!(drained[0].0, done);
        assert!(tracker.forget(&done).is_none());
        assert_eq!(tracker.runs().len(), 1);
        assert!(tracker.status(&running).is_some());
    }

    #[test]
    fn test_released_lock_entry_is_removed_when_unused() {
        let locks = DatasetLocks::default();
        let held = locks.lock_for("a");
        locks.release("a");
        assert_eq!(locks.len(), 1);

        drop(held);
        locks.release("a");
        assert!(locks.is_empty());
        locks.release("never-seen");
    }

    #[test]
    fn test_dataset_locks_are_shared_per_bucket() {
        let locks = DatasetLocks::default();
        assert!(Arc::ptr_eq(&locks.lock_for("a"), &locks.lock_for("a")));
        assert!(!Arc::ptr_eq(&locks.lock_for("a"), &locks.lock_for("b")));
    }
}
