//! Service container for dependency injection.
//!
//! The ServiceContainer builds every collaborator from an [`AppConfig`] once
//! at startup and hands shared references to the API and the worker pool.

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::Result;
use crate::analysis::{AnalysisClient, HttpAnalysisClient};
use crate::api::{ApiServer, ApiServerConfig, AppState};
use crate::config::AppConfig;
use crate::database::repositories::{SqlxJobRepository, SqlxTaskRepository};
use crate::database::{self, DbPool};
use crate::pipeline::stages::{GitCloner, RepositoryCloner};
use crate::pipeline::{
    JobOrchestrator, OrchestratorDeps, StatusStore, SubmissionGateway, TaskQueue, WorkerPool,
};
use crate::storage::{self, StorageBackend};
use crate::utils::fs;

/// Default shutdown timeout.
const DEFAULT_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(30);

/// Service container holding all application services.
pub struct ServiceContainer {
    pub config: AppConfig,
    /// Status store database.
    pub pool: DbPool,
    /// Task queue database; the same pool when both URLs match.
    pub queue_pool: DbPool,
    pub status: Arc<StatusStore>,
    pub queue: Arc<TaskQueue>,
    pub storage: Arc<dyn StorageBackend>,
    pub orchestrator: Arc<JobOrchestrator>,
    pub gateway: Arc<SubmissionGateway>,
    pub worker_pool: Arc<WorkerPool>,
    /// Cancellation token for graceful shutdown.
    cancellation_token: CancellationToken,
}

impl ServiceContainer {
    /// Connect to the databases and build every service from `config`.
    pub async fn new(config: AppConfig) -> Result<Self> {
        info!("Initializing service container");

        let pool = database::init_pool(&config.database_url).await?;
        database::run_migrations(&pool).await?;

        let queue_pool = if config.queue_url == config.database_url {
            pool.clone()
        } else {
            let queue_pool = database::init_pool(&config.queue_url).await?;
            database::run_migrations(&queue_pool).await?;
            queue_pool
        };

        let cloner = Arc::new(GitCloner::new(Some(config.clone_timeout)));
        let analysis = Arc::new(HttpAnalysisClient::new(
            &config.agent_url,
            config.agent_timeout,
        )?);

        Self::with_collaborators(config, pool, queue_pool, cloner, analysis).await
    }

    /// Build the container around already-open pools and the given external
    /// collaborators.
    pub async fn with_collaborators(
        config: AppConfig,
        pool: DbPool,
        queue_pool: DbPool,
        cloner: Arc<dyn RepositoryCloner>,
        analysis: Arc<dyn AnalysisClient>,
    ) -> Result<Self> {
        fs::ensure_dir_all_with_op("creating work directory", &config.work_dir).await?;
        fs::ensure_dir_all_with_op("creating storage directory", &config.storage_dir).await?;

        let status = Arc::new(StatusStore::new(Arc::new(SqlxJobRepository::new(
            pool.clone(),
        ))));
        let queue = Arc::new(TaskQueue::new(Arc::new(SqlxTaskRepository::new(
            queue_pool.clone(),
        ))));

        let storage = storage::from_mode(&config.storage);
        info!("Using {} storage backend", storage.name());

        let orchestrator = Arc::new(JobOrchestrator::new(
            OrchestratorDeps {
                status: status.clone(),
                cloner,
                analysis,
                storage: storage.clone(),
            },
            config.work_dir.clone(),
            config.agent_timeout,
        ));
        let gateway = Arc::new(SubmissionGateway::new(status.clone(), queue.clone()));
        let worker_pool = Arc::new(WorkerPool::new(config.worker.clone()));

        Ok(Self {
            config,
            pool,
            queue_pool,
            status,
            queue,
            storage,
            orchestrator,
            gateway,
            worker_pool,
            cancellation_token: CancellationToken::new(),
        })
    }

    /// Re-queue claims abandoned by a previous process, then start the workers.
    pub async fn start_workers(&self) -> Result<()> {
        let recovered = self.queue.recover(self.config.worker.task_lease).await?;
        if recovered > 0 {
            info!("Re-queued {} abandoned tasks", recovered);
        }
        self.worker_pool
            .start(self.queue.clone(), self.orchestrator.clone());
        Ok(())
    }

    /// State shared by the API handlers.
    pub fn app_state(&self) -> AppState {
        AppState::new(
            self.status.clone(),
            self.gateway.clone(),
            self.config.storage_dir.clone(),
            self.config.storage.name(),
        )
        .with_pool(self.pool.clone())
    }

    /// API server that stops when the container shuts down.
    pub fn api_server(&self) -> ApiServer {
        ApiServer::new(ApiServerConfig::from(&self.config), self.app_state())
            .with_cancel_token(self.cancellation_token.child_token())
    }

    /// Shutdown all services gracefully.
    pub async fn shutdown(&self) -> Result<()> {
        self.shutdown_with_timeout(DEFAULT_SHUTDOWN_TIMEOUT).await
    }

    /// Shutdown all services gracefully with a custom timeout.
    ///
    /// Jobs still running when the timeout expires keep their claim and are
    /// re-queued by the next process once the lease runs out.
    pub async fn shutdown_with_timeout(&self, timeout: Duration) -> Result<()> {
        info!("Shutting down services (timeout: {:?})", timeout);

        // Stops the API and any other child of the token.
        self.cancellation_token.cancel();

        info!("Stopping worker pool...");
        if tokio::time::timeout(timeout, self.worker_pool.stop())
            .await
            .is_err()
        {
            warn!("Shutdown timeout reached, abandoning in-flight jobs");
        }

        info!("Closing database pool...");
        self.pool.close().await;
        self.queue_pool.close().await;

        info!("Services shut down");
        Ok(())
    }

    /// Get the cancellation token for external use.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancellation_token.clone()
    }

    /// Check if shutdown has been requested.
    pub fn is_shutting_down(&self) -> bool {
        self.cancellation_token.is_cancelled()
    }
}
