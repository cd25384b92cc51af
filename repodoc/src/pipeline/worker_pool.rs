//! Worker pool pulling tasks off the queue and running the orchestrator.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::orchestrator::{JobOrchestrator, JobOutcome};
use super::task_queue::{ClaimedTask, TaskQueue};
use crate::config::WorkerConfig;

/// What happened to a claimed task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    /// Removed from the queue.
    Acked,
    /// Put back for another attempt.
    Released,
}

/// A pool of queue consumers.
pub struct WorkerPool {
    config: WorkerConfig,
    /// Prefix of worker ids, unique per process.
    name: String,
    semaphore: Arc<Semaphore>,
    active_jobs: Arc<AtomicUsize>,
    cancellation_token: CancellationToken,
    tasks: parking_lot::Mutex<Option<JoinSet<()>>>,
}

impl WorkerPool {
    pub fn new(config: WorkerConfig) -> Self {
        let name = format!("worker-{}", &uuid::Uuid::new_v4().simple().to_string()[..8]);
        Self {
            semaphore: Arc::new(Semaphore::new(config.concurrency)),
            config,
            name,
            active_jobs: Arc::new(AtomicUsize::new(0)),
            cancellation_token: CancellationToken::new(),
            tasks: parking_lot::Mutex::new(Some(JoinSet::new())),
        }
    }

    /// Spawn the workers and the stale-claim reaper.
    pub fn start(&self, queue: Arc<TaskQueue>, orchestrator: Arc<JobOrchestrator>) {
        info!(
            "Starting worker pool {} with {} workers",
            self.name, self.config.concurrency
        );

        let mut tasks = self.tasks.lock();
        let Some(join_set) = tasks.as_mut() else {
            warn!("Worker pool {} already stopped", self.name);
            return;
        };

        for i in 0..self.config.concurrency {
            let worker_id = format!("{}-{}", self.name, i);
            let semaphore = self.semaphore.clone();
            let cancellation_token = self.cancellation_token.clone();
            let queue = queue.clone();
            let orchestrator = orchestrator.clone();
            let active_jobs = self.active_jobs.clone();
            let poll_interval = self.config.poll_interval;
            let lease = self.config.task_lease;

            join_set.spawn(async move {
                debug!("{} started", worker_id);
                let mut drained = true;

                loop {
                    if cancellation_token.is_cancelled() {
                        break;
                    }

                    // Keep claiming while work is available; otherwise wait.
                    if drained {
                        tokio::select! {
                            _ = cancellation_token.cancelled() => break,
                            _ = queue.notified() => {}
                            _ = tokio::time::sleep(poll_interval) => {}
                        }
                    }

                    let Ok(permit) = semaphore.clone().try_acquire_owned() else {
                        drained = true;
                        continue;
                    };

                    let task = match queue.claim(&worker_id).await {
                        Ok(Some(task)) => task,
                        Ok(None) => {
                            drained = true;
                            continue;
                        }
                        Err(e) => {
                            error!("{} failed to claim a task: {}", worker_id, e);
                            drained = true;
                            continue;
                        }
                    };

                    active_jobs.fetch_add(1, Ordering::SeqCst);
                    process_task(&queue, &orchestrator, task, lease).await;
                    active_jobs.fetch_sub(1, Ordering::SeqCst);
                    drop(permit);
                    drained = false;
                }

                debug!("{} shutting down", worker_id);
            });
        }

        // Hand out claims left behind by workers that died.
        let lease = self.config.task_lease;
        let cancellation_token = self.cancellation_token.clone();
        join_set.spawn(async move {
            let mut interval = tokio::time::interval((lease / 2).max(Duration::from_secs(1)));
            interval.tick().await;
            loop {
                tokio::select! {
                    _ = cancellation_token.cancelled() => break,
                    _ = interval.tick() => {
                        if let Err(e) = queue.recover(lease).await {
                            warn!("Failed to recover stale tasks: {}", e);
                        }
                    }
                }
            }
        });
    }

    /// Stop claiming new tasks and wait for in-flight jobs to finish.
    pub async fn stop(&self) {
        info!("Stopping worker pool {}", self.name);
        self.cancellation_token.cancel();

        let join_set = {
            let mut tasks = self.tasks.lock();
            tasks.take()
        };

        if let Some(mut join_set) = join_set {
            while join_set.join_next().await.is_some() {}
        }

        info!("Worker pool {} stopped", self.name);
    }

    /// Number of jobs currently running.
    pub fn active_count(&self) -> usize {
        self.active_jobs.load(Ordering::SeqCst)
    }

    pub fn is_running(&self) -> bool {
        !self.cancellation_token.is_cancelled()
    }
}

/// How often a running task's claim is refreshed, relative to its lease.
fn heartbeat_period(lease: Duration) -> Duration {
    (lease / 3).max(Duration::from_millis(50))
}

/// Run one claimed task and settle its delivery.
///
/// The claim is refreshed while the job runs, so the reaper only hands out
/// tasks whose worker stopped heartbeating for a whole `lease`.
pub async fn process_task(
    queue: &TaskQueue,
    orchestrator: &Arc<JobOrchestrator>,
    task: ClaimedTask,
    lease: Duration,
) -> Delivery {
    let Some((job_id, repo_url)) = task.message.as_document_repo() else {
        warn!(
            task_id = %task.id,
            task = %task.message.name,
            "Dropping task this worker does not understand"
        );
        return settle(queue, &task.id, Delivery::Acked).await;
    };
    let (job_id, repo_url) = (job_id.to_string(), repo_url.to_string());

    if task.attempts > 1 {
        info!(job_id = %job_id, attempt = task.attempts, "Redelivered task");
    }

    // Own task so a panicking stage cannot take the worker down with it.
    let mut run = {
        let orchestrator = orchestrator.clone();
        let job_id = job_id.clone();
        tokio::spawn(async move { orchestrator.run(&job_id, &repo_url).await })
    };

    let mut heartbeat = tokio::time::interval(heartbeat_period(lease));
    heartbeat.tick().await;
    let joined = loop {
        tokio::select! {
            joined = &mut run => break joined,
            _ = heartbeat.tick() => {
                if let Err(e) = queue.touch(&task.id).await {
                    warn!(task_id = %task.id, error = %e, "Failed to refresh task claim");
                }
            }
        }
    };

    let delivery = match joined {
        Ok(Ok(outcome)) => {
            match &outcome {
                JobOutcome::Completed { .. } | JobOutcome::AlreadyFinished(_) => {}
                JobOutcome::Failed { stage, message } => {
                    debug!(job_id = %job_id, stage = %stage, "Recorded failure: {}", message);
                }
            }
            Delivery::Acked
        }
        Ok(Err(e)) => {
            warn!(job_id = %job_id, error = %e, "Could not record job state, releasing task");
            Delivery::Released
        }
        Err(join_error) => {
            error!(job_id = %job_id, error = %join_error, "Job run aborted");
            orchestrator.cleanup_job(&job_id).await;
            let message = format!("Internal error: {}", join_error);
            match orchestrator.record_failure(&job_id, &message).await {
                Ok(()) => Delivery::Acked,
                Err(e) => {
                    warn!(job_id = %job_id, error = %e, "Could not record failure");
                    Delivery::Released
                }
            }
        }
    };

    settle(queue, &task.id, delivery).await
}

async fn settle(queue: &TaskQueue, task_id: &str, delivery: Delivery) -> Delivery {
    let result = match delivery {
        Delivery::Acked => queue.ack(task_id).await,
        Delivery::Released => queue.release(task_id).await,
    };
    if let Err(e) = result {
        // The claim stays put and is recovered once its lease expires.
        error!(task_id = %task_id, error = %e, "Failed to settle task");
    }
    delivery
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Result;
    use crate::analysis::{AnalysisClient, DocumentBundle};
    use crate::database::models::{JobStatus, TaskMessage};
    use crate::pipeline::orchestrator::OrchestratorDeps;
    use crate::pipeline::stages::RepositoryCloner;
    use crate::pipeline::status::StatusStore;
    use crate::storage::StorageBackend;
    use async_trait::async_trait;
    use std::path::Path;
    use tempfile::TempDir;

    struct OkCloner;

    #[async_trait]
    impl RepositoryCloner for OkCloner {
        async fn clone_repo(&self, _url: &str, dest: &Path) -> Result<()> {
            tokio::fs::create_dir_all(dest).await?;
            Ok(())
        }
    }

    /// Takes longer than a task lease and counts how often it runs.
    #[derive(Default)]
    struct SlowCloner {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl RepositoryCloner for SlowCloner {
        async fn clone_repo(&self, _url: &str, dest: &Path) -> Result<()> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(2500)).await;
            tokio::fs::create_dir_all(dest).await?;
            Ok(())
        }
    }

    struct PanickingCloner;

    #[async_trait]
    impl RepositoryCloner for PanickingCloner {
        async fn clone_repo(&self, _url: &str, _dest: &Path) -> Result<()> {
            panic!("cloner exploded");
        }
    }

    struct OneDoc;

    #[async_trait]
    impl AnalysisClient for OneDoc {
        async fn analyze(&self, _repo_path: &Path) -> Result<DocumentBundle> {
            Ok([("README.md", "# x")].into_iter().collect())
        }
    }

    struct UrlStorage;

    #[async_trait]
    impl StorageBackend for UrlStorage {
        async fn store(&self, _artifact: &Path, job_id: &str) -> Result<String> {
            Ok(format!("http://files/{job_id}.zip"))
        }

        fn name(&self) -> &'static str {
            "url"
        }
    }

    fn orchestrator(
        work: &TempDir,
        status: Arc<StatusStore>,
        cloner: Arc<dyn RepositoryCloner>,
    ) -> Arc<JobOrchestrator> {
        Arc::new(JobOrchestrator::new(
            OrchestratorDeps {
                status,
                cloner,
                analysis: Arc::new(OneDoc),
                storage: Arc::new(UrlStorage),
            },
            work.path(),
            Duration::from_secs(5),
        ))
    }

    #[tokio::test]
    async fn unknown_tasks_are_acked() {
        let work = TempDir::new().unwrap();
        let queue = TaskQueue::in_memory();
        queue
            .enqueue(TaskMessage {
                name: "tasks.unknown".into(),
                args: vec![],
            })
            .await
            .unwrap();
        let task = queue.claim("w").await.unwrap().unwrap();

        let orch = orchestrator(&work, Arc::new(StatusStore::in_memory()), Arc::new(OkCloner));
        let delivery = process_task(&queue, &orch, task, Duration::from_secs(60)).await;
        assert_eq!(delivery, Delivery::Acked);
        assert_eq!(queue.pending_count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn panicking_run_is_recorded_as_failed() {
        let work = TempDir::new().unwrap();
        let status = Arc::new(StatusStore::in_memory());
        status.create("j1", "https://h/r.git").await.unwrap();
        let queue = TaskQueue::in_memory();
        queue
            .enqueue(TaskMessage::document_repo("j1", "https://h/r.git"))
            .await
            .unwrap();
        let task = queue.claim("w").await.unwrap().unwrap();

        let orch = orchestrator(&work, status.clone(), Arc::new(PanickingCloner));
        let delivery = process_task(&queue, &orch, task, Duration::from_secs(60)).await;
        assert_eq!(delivery, Delivery::Acked);

        let record = status.get("j1").await.unwrap();
        assert_eq!(record.status, JobStatus::Failed);
        assert!(record.message.starts_with("Internal error"));
    }

    #[tokio::test]
    async fn pool_runs_queued_jobs_and_stops() {
        let work = TempDir::new().unwrap();
        let status = Arc::new(StatusStore::in_memory());
        let queue = Arc::new(TaskQueue::in_memory());
        let pool = WorkerPool::new(WorkerConfig {
            concurrency: 2,
            poll_interval: Duration::from_millis(10),
            task_lease: Duration::from_secs(60),
        });
        pool.start(queue.clone(), orchestrator(&work, status.clone(), Arc::new(OkCloner)));

        for id in ["j1", "j2", "j3"] {
            status.create(id, "https://h/r.git").await.unwrap();
            queue
                .enqueue(TaskMessage::document_repo(id, "https://h/r.git"))
                .await
                .unwrap();
        }

        tokio::time::timeout(Duration::from_secs(10), async {
            loop {
                let mut done = 0;
                for id in ["j1", "j2", "j3"] {
                    if status.get(id).await.unwrap().status == JobStatus::Completed {
                        done += 1;
                    }
                }
                if done == 3 {
                    break;
                }
                tokio::time::sleep(Duration::from_millis(20)).await;
            }
        })
        .await
        .unwrap();

        pool.stop().await;
        assert!(!pool.is_running());
        assert_eq!(pool.active_count(), 0);
    }

    #[tokio::test]
    async fn long_job_keeps_its_claim_past_the_lease() {
        let work = TempDir::new().unwrap();
        let status = Arc::new(StatusStore::in_memory());
        let queue = Arc::new(TaskQueue::in_memory());
        let cloner = Arc::new(SlowCloner::default());
        let pool = WorkerPool::new(WorkerConfig {
            concurrency: 2,
            poll_interval: Duration::from_millis(10),
            task_lease: Duration::from_millis(600),
        });
        pool.start(queue.clone(), orchestrator(&work, status.clone(), cloner.clone()));

        status.create("slow", "https://h/r.git").await.unwrap();
        queue
            .enqueue(TaskMessage::document_repo("slow", "https://h/r.git"))
            .await
            .unwrap();

        tokio::time::timeout(Duration::from_secs(15), async {
            while !status.get("slow").await.unwrap().status.is_terminal() {
                tokio::time::sleep(Duration::from_millis(20)).await;
            }
        })
        .await
        .unwrap();

        assert_eq!(status.get("slow").await.unwrap().status, JobStatus::Completed);
        assert_eq!(cloner.calls.load(Ordering::SeqCst), 1);
        assert_eq!(queue.pending_count().await.unwrap(), 0);
        pool.stop().await;
    }

    #[test]
    fn heartbeat_is_well_inside_the_lease() {
        assert_eq!(heartbeat_period(Duration::from_secs(3600)), Duration::from_secs(1200));
        assert_eq!(heartbeat_period(Duration::from_millis(30)), Duration::from_millis(50));
    }
}
