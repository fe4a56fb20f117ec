//! Task-granular scheduler.
//!
//! Tasks with no parents start as soon as a graph is submitted. When a task
//! completes, its follower is notified; the notification that brings the
//! follower's readiness counter to zero schedules it. Each task runs on tokio's
//! blocking pool, bounded by a semaphore of `max_concurrent_tasks` slots.

use std::collections::HashSet;
use std::sync::Arc;

use pfq_common::{MetricsRegistry, PfqError, Result, TaskId};
use tokio::runtime::Handle;
use tokio::sync::Semaphore;
use tracing::{debug, info, warn};

use crate::stream::SendableBatchStream;
use crate::task::{Task, TaskResult, explain_tasks};

pub struct Scheduler {
    runtime: Handle,
    slots: Arc<Semaphore>,
    metrics: MetricsRegistry,
}

impl std::fmt::Debug for Scheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Scheduler")
            .field("available_slots", &self.slots.available_permits())
            .finish_non_exhaustive()
    }
}

impl Scheduler {
    pub fn new(runtime: Handle, max_concurrent_tasks: usize, metrics: MetricsRegistry) -> Arc<Self> {
        Arc::new(Self {
            runtime,
            slots: Arc::new(Semaphore::new(max_concurrent_tasks.max(1))),
            metrics,
        })
    }

    /// Start every source task reachable from `root` and return a handle on
    /// `root`'s result.
    pub fn submit(self: &Arc<Self>, root: &Arc<Task>) -> ResultHandle {
        let query_id = root.context().query_id.to_string();
        let mut seen = HashSet::<TaskId>::new();
        let mut stack = vec![Arc::clone(root)];
        let mut sources = Vec::new();
        while let Some(task) = stack.pop() {
            if !seen.insert(task.id()) {
                continue;
            }
            self.metrics.inc_tasks_submitted(&query_id);
            let parents = task.parents();
            if parents.is_empty() {
                sources.push(Arc::clone(&task));
            }
            stack.extend(parents.into_iter().cloned());
        }
        info!(
            query_id = %query_id,
            root = %root.id(),
            tasks = seen.len(),
            sources = sources.len(),
            "task graph submitted"
        );
        debug!(query_id = %query_id, plan = %explain_tasks(root), "submitted tasks");
        for task in sources {
            self.spawn(task);
        }
        ResultHandle {
            root: Arc::clone(root),
        }
    }

    fn spawn(self: &Arc<Self>, task: Arc<Task>) {
        let scheduler = Arc::clone(self);
        let query_id = task.context().query_id.to_string();
        self.metrics.add_scheduler_queued_tasks(&query_id, 1.0);
        self.runtime.spawn(async move {
            let permit = scheduler.slots.clone().acquire_owned().await;
            scheduler
                .metrics
                .add_scheduler_queued_tasks(&query_id, -1.0);
            let permit = match permit {
                Ok(permit) => permit,
                Err(e) => {
                    task.complete(TaskResult::failure(PfqError::Execution(format!(
                        "failed to acquire task slot: {e}"
                    ))));
                    scheduler.release_follower(&task);
                    return;
                }
            };
            scheduler
                .metrics
                .add_scheduler_running_tasks(&query_id, 1.0);
            let runner = Arc::clone(&task);
            let joined = tokio::task::spawn_blocking(move || {
                let result = runner.execute();
                runner.complete(result);
            })
            .await;
            drop(permit);
            scheduler
                .metrics
                .add_scheduler_running_tasks(&query_id, -1.0);
            if let Err(e) = joined {
                warn!(task_id = %task.id(), error = %e, "task runner aborted");
                task.complete(TaskResult::failure(PfqError::Execution(format!(
                    "task {} runner aborted: {e}",
                    task.id()
                ))));
            }
            scheduler.release_follower(&task);
        });
    }

    fn release_follower(self: &Arc<Self>, task: &Task) {
        let Some(follower) = task.take_follower_link().and_then(|link| link.upgrade()) else {
            return;
        };
        if follower.notify_parent_ready() {
            self.spawn(follower);
        }
    }
}

/// Handle on a submitted graph's root result.
#[derive(Debug)]
pub struct ResultHandle {
    root: Arc<Task>,
}

impl ResultHandle {
    pub fn task(&self) -> &Arc<Task> {
        &self.root
    }

    pub fn explain(&self) -> String {
        explain_tasks(&self.root)
    }

    /// Wait for the root's stream without blocking the async runtime.
    pub async fn wait(self) -> Result<SendableBatchStream> {
        let root = self.root;
        tokio::task::spawn_blocking(move || root.wait_result().into_result())
            .await
            .map_err(|e| PfqError::Execution(format!("result waiter failed: {e}")))?
    }

    /// Wait on the calling thread. Must not be called from an async context.
    pub fn wait_blocking(self) -> Result<SendableBatchStream> {
        self.root.wait_result().into_result()
    }
}
