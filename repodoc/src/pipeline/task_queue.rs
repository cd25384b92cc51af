//! Durable task queue.
//!
//! Messages are `TaskMessage`s naming a task and its positional arguments.
//! Delivery is at-least-once: a claimed message stays in the queue until it
//! is acked, and claims held by a worker that died are handed out again by
//! [`TaskQueue::recover`].

use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tracing::{debug, info, warn};

use crate::Result;
use crate::database::models::{TaskDbModel, TaskMessage, TaskState};
use crate::database::repositories::TaskRepository;
use crate::database::time::now_ms;

/// A message held by one worker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClaimedTask {
    pub id: String,
    pub message: TaskMessage,
    /// Delivery count including this one.
    pub attempts: i64,
}

#[derive(Debug, Default)]
struct MemoryQueue {
    pending: VecDeque<TaskDbModel>,
    claimed: HashMap<String, TaskDbModel>,
}

/// Task queue with an optional database backend.
pub struct TaskQueue {
    repository: Option<Arc<dyn TaskRepository>>,
    memory: Mutex<MemoryQueue>,
    notify: Notify,
}

impl TaskQueue {
    /// Queue persisted in the `task_queue` table.
    pub fn new(repository: Arc<dyn TaskRepository>) -> Self {
        Self {
            repository: Some(repository),
            memory: Mutex::new(MemoryQueue::default()),
            notify: Notify::new(),
        }
    }

    /// Queue living in process memory only.
    pub fn in_memory() -> Self {
        Self {
            repository: None,
            memory: Mutex::new(MemoryQueue::default()),
            notify: Notify::new(),
        }
    }

    /// Add a message and wake one idle worker. Returns the task id.
    pub async fn enqueue(&self, message: TaskMessage) -> Result<String> {
        let task = TaskDbModel::new(&message)?;
        let id = task.id.clone();

        match &self.repository {
            Some(repo) => repo.enqueue(&task).await?,
            None => {
                self.memory.lock().pending.push_back(task);
            }
        }

        debug!(task_id = %id, task = %message.name, "Enqueued task");
        self.notify.notify_one();
        Ok(id)
    }

    /// Claim the oldest pending message for `worker_id`.
    ///
    /// Rows whose arguments cannot be decoded are acked and skipped.
    pub async fn claim(&self, worker_id: &str) -> Result<Option<ClaimedTask>> {
        loop {
            let row = match &self.repository {
                Some(repo) => repo.claim_next(worker_id).await?,
                None => self.claim_in_memory(worker_id),
            };
            let Some(row) = row else {
                return Ok(None);
            };

            match row.message() {
                Ok(message) => {
                    return Ok(Some(ClaimedTask {
                        id: row.id,
                        message,
                        attempts: row.attempts,
                    }));
                }
                Err(e) => {
                    warn!(task_id = %row.id, error = %e, "Dropping undecodable task");
                    self.ack(&row.id).await?;
                }
            }
        }
    }

    fn claim_in_memory(&self, worker_id: &str) -> Option<TaskDbModel> {
        let mut memory = self.memory.lock();
        let mut task = memory.pending.pop_front()?;
        task.status = TaskState::Claimed.as_str().to_string();
        task.attempts += 1;
        task.worker_id = Some(worker_id.to_string());
        task.claimed_at = Some(now_ms());
        memory.claimed.insert(task.id.clone(), task.clone());
        Some(task)
    }

    /// Remove a delivered message for good.
    pub async fn ack(&self, task_id: &str) -> Result<()> {
        match &self.repository {
            Some(repo) => repo.ack(task_id).await?,
            None => {
                self.memory.lock().claimed.remove(task_id);
            }
        }
        debug!(task_id = %task_id, "Acked task");
        Ok(())
    }

    /// Hand a claimed message back for redelivery.
    pub async fn release(&self, task_id: &str) -> Result<()> {
        match &self.repository {
            Some(repo) => repo.release(task_id).await?,
            None => {
                let mut memory = self.memory.lock();
                if let Some(mut task) = memory.claimed.remove(task_id) {
                    task.status = TaskState::Pending.as_str().to_string();
                    task.worker_id = None;
                    task.claimed_at = None;
                    memory.pending.push_front(task);
                }
            }
        }
        self.notify.notify_one();
        Ok(())
    }

    /// Refresh the claim time of a task that is still being worked on.
    pub async fn touch(&self, task_id: &str) -> Result<()> {
        match &self.repository {
            Some(repo) => repo.touch(task_id).await?,
            None => {
                if let Some(task) = self.memory.lock().claimed.get_mut(task_id) {
                    task.claimed_at = Some(now_ms());
                }
            }
        }
        Ok(())
    }

    /// Requeue messages claimed longer than `lease` ago.
    pub async fn recover(&self, lease: Duration) -> Result<u64> {
        let lease_ms = i64::try_from(lease.as_millis()).unwrap_or(i64::MAX);
        let released = match &self.repository {
            Some(repo) => repo.release_stale(lease_ms).await?,
            None => {
                let cutoff = now_ms().saturating_sub(lease_ms);
                let mut memory = self.memory.lock();
                let stale: Vec<String> = memory
                    .claimed
                    .values()
                    .filter(|t| t.claimed_at.is_some_and(|at| at <= cutoff))
                    .map(|t| t.id.clone())
                    .collect();
                for id in &stale {
                    if let Some(mut task) = memory.claimed.remove(id) {
                        task.status = TaskState::Pending.as_str().to_string();
                        task.worker_id = None;
                        task.claimed_at = None;
                        memory.pending.push_back(task);
                    }
                }
                stale.len() as u64
            }
        };

        if released > 0 {
            info!("Requeued {} stale task(s)", released);
            self.notify.notify_waiters();
        }
        Ok(released)
    }

    /// Number of messages waiting to be claimed.
    pub async fn pending_count(&self) -> Result<i64> {
        match &self.repository {
            Some(repo) => repo.count_by_state(TaskState::Pending).await,
            None => {
                let pending = self.memory.lock().pending.len();
                Ok(pending as i64)
            }
        }
    }

    /// Resolves when a message is enqueued in this process.
    pub async fn notified(&self) {
        self.notify.notified().await
    }
}
