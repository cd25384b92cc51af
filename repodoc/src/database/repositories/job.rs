//! Job repository.

use async_trait::async_trait;
use sqlx::SqlitePool;

use crate::database::models::{JobDbModel, JobExecutionLogDbModel};
use crate::database::retry::retry_on_sqlite_busy;
use crate::{Error, Result};

/// Job repository trait.
#[async_trait]
pub trait JobRepository: Send + Sync {
    async fn get_job(&self, id: &str) -> Result<JobDbModel>;
    async fn find_job(&self, id: &str) -> Result<Option<JobDbModel>>;
    async fn list_recent_jobs(&self, limit: i32) -> Result<Vec<JobDbModel>>;
    /// Insert the record, or replace every mutable column if it already exists.
    async fn upsert_job(&self, job: &JobDbModel) -> Result<()>;
    async fn delete_job(&self, id: &str) -> Result<()>;

    // Execution logs
    async fn add_execution_log(&self, log: &JobExecutionLogDbModel) -> Result<()>;
    async fn get_execution_logs(&self, job_id: &str) -> Result<Vec<JobExecutionLogDbModel>>;
}

/// SQLx implementation of JobRepository.
pub struct SqlxJobRepository {
    pool: SqlitePool,
}

impl SqlxJobRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl JobRepository for SqlxJobRepository {
    async fn get_job(&self, id: &str) -> Result<JobDbModel> {
        self.find_job(id)
            .await?
            .ok_or_else(|| Error::not_found("Job", id))
    }

    async fn find_job(&self, id: &str) -> Result<Option<JobDbModel>> {
        let job = sqlx::query_as::<_, JobDbModel>("SELECT * FROM job WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(job)
    }

    async fn list_recent_jobs(&self, limit: i32) -> Result<Vec<JobDbModel>> {
        let jobs =
            sqlx::query_as::<_, JobDbModel>("SELECT * FROM job ORDER BY created_at DESC LIMIT ?")
                .bind(limit)
                .fetch_all(&self.pool)
                .await?;
        Ok(jobs)
    }

    async fn upsert_job(&self, job: &JobDbModel) -> Result<()> {
        retry_on_sqlite_busy("upsert_job", || async {
            sqlx::query(
                r#"
                INSERT INTO job (id, repo_url, status, message, download_url, created_at, updated_at)
                VALUES (?, ?, ?, ?, ?, ?, ?)
                ON CONFLICT(id) DO UPDATE SET
                    repo_url = excluded.repo_url,
                    status = excluded.status,
                    message = excluded.message,
                    download_url = excluded.download_url,
                    updated_at = excluded.updated_at
                "#,
            )
            .bind(&job.id)
            .bind(&job.repo_url)
            .bind(&job.status)
            .bind(&job.message)
            .bind(&job.download_url)
            .bind(&job.created_at)
            .bind(&job.updated_at)
            .execute(&self.pool)
            .await?;
            Ok(())
        })
        .await
    }

    async fn delete_job(&self, id: &str) -> Result<()> {
        // Execution logs are deleted via CASCADE
        sqlx::query("DELETE FROM job WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn add_execution_log(&self, log: &JobExecutionLogDbModel) -> Result<()> {
        retry_on_sqlite_busy("add_execution_log", || async {
            sqlx::query(
                r#"
                INSERT INTO job_execution_logs (id, job_id, entry, created_at)
                VALUES (?, ?, ?, ?)
                "#,
            )
            .bind(&log.id)
            .bind(&log.job_id)
            .bind(&log.entry)
            .bind(&log.created_at)
            .execute(&self.pool)
            .await?;
            Ok(())
        })
        .await
    }

    async fn get_execution_logs(&self, job_id: &str) -> Result<Vec<JobExecutionLogDbModel>> {
        let logs = sqlx::query_as::<_, JobExecutionLogDbModel>(
            "SELECT * FROM job_execution_logs WHERE job_id = ? ORDER BY created_at, rowid",
        )
        .bind(job_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(logs)
    }
}
