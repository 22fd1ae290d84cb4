use std::collections::HashMap;
use std::process::Child;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::status;

/// A background child the interpreter did not wait for.
pub struct Job {
    pub id: usize,
    pub pid: u32,
    pub command: String,
    child: Child,
}

/// A job that has exited and been reaped.
#[derive(Debug)]
pub struct FinishedJob {
    pub id: usize,
    pub pid: u32,
    pub command: String,
    pub code: i32,
}

struct Jobs {
    running: HashMap<usize, Job>,
    next_id: usize,
}

/// Every background child, keyed by job number.
///
/// This is the only place background children are waited on, and it only
/// ever waits on the pids it holds. Foreground children are waited by their
/// own pid in the executor, so neither path can consume the other's exit
/// status. Clones share one table, so the reaper thread and the interpreter
/// see the same jobs.
#[derive(Clone)]
pub struct JobTable {
    inner: Arc<Mutex<Jobs>>,
}

impl Default for JobTable {
    fn default() -> Self {
        Self::new()
    }
}

impl JobTable {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(Jobs {
                running: HashMap::new(),
                next_id: 1,
            })),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Jobs> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Track a running background child. Returns `(job_id, pid)`.
    ///
    /// The table is polled once more before returning: a child that exited
    /// before it was inserted raised its SIGCHLD too early to be seen by the
    /// reaper.
    pub fn add(&self, child: Child, command: String) -> (usize, u32) {
        let mut jobs = self.lock();
        let id = jobs.next_id;
        let pid = child.id();
        jobs.running.insert(
            id,
            Job {
                id,
                pid,
                command,
                child,
            },
        );
        jobs.next_id += 1;

        for job in reap_locked(&mut jobs) {
            log_finished(&job);
        }
        (id, pid)
    }

    /// Non-blocking poll of every tracked child. Finished jobs are removed
    /// and returned in job-number order.
    pub fn reap(&self) -> Vec<FinishedJob> {
        reap_locked(&mut self.lock())
    }

    /// Reap and log whatever has finished.
    pub fn collect(&self) {
        for job in self.reap() {
            log_finished(&job);
        }
    }

    pub fn len(&self) -> usize {
        self.lock().running.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().running.is_empty()
    }
}

fn reap_locked(jobs: &mut Jobs) -> Vec<FinishedJob> {
    let mut done = Vec::new();

    for (id, job) in jobs.running.iter_mut() {
        match job.child.try_wait() {
            Ok(Some(exit)) => done.push((*id, status::exit_code(exit))),
            Ok(None) => {} // still running
            Err(e) => {
                tracing::warn!("error checking job {id}: {e}");
            }
        }
    }

    done.sort_unstable();
    done.into_iter()
        .filter_map(|(id, code)| jobs.running.remove(&id).map(|job| (job, code)))
        .map(|(job, code)| FinishedJob {
            id: job.id,
            pid: job.pid,
            command: job.command,
            code,
        })
        .collect()
}

fn log_finished(job: &FinishedJob) {
    tracing::debug!(pid = job.pid, code = job.code, "[{}]  Done  {}", job.id, job.command);
}
