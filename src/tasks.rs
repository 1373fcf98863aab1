//! Bounded fan-out: submit a group of tasks, wait with a wall-clock timeout,
//! and revoke whatever has not started when time runs out.
//!
//! Revocation never aborts a running task. Queued tasks are dropped by closing
//! the semaphore they wait on; running tasks are detached and their results
//! discarded.

use crate::error::{PanelistError, Result};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio::time::Instant;
use tracing::{error, warn};

/// A group of tasks sharing a concurrency ceiling.
pub struct TaskGroup<T> {
    name: String,
    permits: Arc<Semaphore>,
    set: JoinSet<(usize, Result<T>)>,
    submitted: usize,
}

impl<T: Send + 'static> TaskGroup<T> {
    pub fn new(name: impl Into<String>, workers: usize) -> Self {
        Self {
            name: name.into(),
            permits: Arc::new(Semaphore::new(workers.max(1))),
            set: JoinSet::new(),
            submitted: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.submitted
    }

    pub fn is_empty(&self) -> bool {
        self.submitted == 0
    }

    /// Queue a task. Returns its position, which indexes the results.
    pub fn spawn<F>(&mut self, task: F) -> usize
    where
        F: Future<Output = Result<T>> + Send + 'static,
    {
        let index = self.submitted;
        self.submitted += 1;
        let permits = self.permits.clone();
        self.set.spawn(async move {
            let Ok(_permit) = permits.acquire_owned().await else {
                return (index, Err(PanelistError::Timeout("revoked before start".to_string())));
            };
            (index, task.await)
        });
        index
    }

    fn revoke(&mut self) {
        self.permits.close();
        self.set.detach_all();
    }

    /// Wait for every task or the timeout. Slot `i` holds the outcome of the
    /// `i`-th submitted task, or `None` if it never finished.
    pub async fn join_all(mut self, timeout: Duration) -> Vec<Option<Result<T>>> {
        let mut results: Vec<Option<Result<T>>> = (0..self.submitted).map(|_| None).collect();
        let deadline = Instant::now() + timeout;
        let mut pending = self.submitted;

        while pending > 0 {
            match tokio::time::timeout_at(deadline, self.set.join_next()).await {
                Ok(Some(Ok((index, result)))) => {
                    results[index] = Some(result);
                    pending -= 1;
                }
                Ok(Some(Err(e))) => {
                    error!("{}: task panicked: {}", self.name, e);
                    pending -= 1;
                }
                Ok(None) => break,
                Err(_) => {
                    warn!(
                        "{}: timed out after {:?} with {} of {} tasks unfinished, revoking",
                        self.name, timeout, pending, self.submitted
                    );
                    self.revoke();
                    break;
                }
            }
        }
        results
    }

    /// Collect successes until `wanted` are in, every task is done, or the
    /// timeout hits. Remaining tasks are revoked. Failures are logged and
    /// skipped. Results come back in submission order.
    pub async fn join_successes(mut self, wanted: usize, timeout: Duration) -> Vec<(usize, T)> {
        let mut successes: Vec<(usize, T)> = Vec::new();
        let deadline = Instant::now() + timeout;

        while successes.len() < wanted {
            match tokio::time::timeout_at(deadline, self.set.join_next()).await {
                Ok(Some(Ok((index, Ok(value))))) => successes.push((index, value)),
                Ok(Some(Ok((index, Err(e))))) => warn!("{}: task {} failed: {}", self.name, index, e),
                Ok(Some(Err(e))) => error!("{}: task panicked: {}", self.name, e),
                Ok(None) => break,
                Err(_) => {
                    warn!("{}: timed out after {:?}, revoking pending tasks", self.name, timeout);
                    break;
                }
            }
        }
        if !self.set.is_empty() {
            self.revoke();
        }
        successes.sort_by_key(|(index, _)| *index);
        successes
    }
}
