//! Task queue repository.

use async_trait::async_trait;
use sqlx::SqlitePool;

use crate::Result;
use crate::database::models::{TaskDbModel, TaskState};
use crate::database::retry::retry_on_sqlite_busy;
use crate::database::time::now_ms;

/// Task queue repository trait.
#[async_trait]
pub trait TaskRepository: Send + Sync {
    async fn enqueue(&self, task: &TaskDbModel) -> Result<()>;
    /// Atomically move the oldest pending task to claimed by `worker_id`.
    async fn claim_next(&self, worker_id: &str) -> Result<Option<TaskDbModel>>;
    /// Remove a task for good.
    async fn ack(&self, id: &str) -> Result<()>;
    /// Put a claimed task back up for delivery.
    async fn release(&self, id: &str) -> Result<()>;
    /// Bump `claimed_at` of a task that is still claimed.
    async fn touch(&self, id: &str) -> Result<()>;
    /// Release tasks claimed longer than `lease_ms` ago. Returns how many.
    async fn release_stale(&self, lease_ms: i64) -> Result<u64>;
    async fn count_by_state(&self, state: TaskState) -> Result<i64>;
}

/// SQLx implementation of TaskRepository.
pub struct SqlxTaskRepository {
    pool: SqlitePool,
}

impl SqlxTaskRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl TaskRepository for SqlxTaskRepository {
    async fn enqueue(&self, task: &TaskDbModel) -> Result<()> {
        retry_on_sqlite_busy("enqueue_task", || async {
            sqlx::query(
                r#"
                INSERT INTO task_queue (id, name, args, status, attempts, worker_id, enqueued_at, claimed_at)
                VALUES (?, ?, ?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(&task.id)
            .bind(&task.name)
            .bind(&task.args)
            .bind(&task.status)
            .bind(task.attempts)
            .bind(&task.worker_id)
            .bind(task.enqueued_at)
            .bind(task.claimed_at)
            .execute(&self.pool)
            .await?;
            Ok(())
        })
        .await
    }

    async fn claim_next(&self, worker_id: &str) -> Result<Option<TaskDbModel>> {
        retry_on_sqlite_busy("claim_task", || async {
            // Single statement: SQLite serializes writers, so two workers can
            // never both flip the same row.
            let task = sqlx::query_as::<_, TaskDbModel>(
                r#"
                UPDATE task_queue SET
                    status = 'CLAIMED',
                    attempts = attempts + 1,
                    worker_id = ?,
                    claimed_at = ?
                WHERE id = (
                    SELECT id FROM task_queue
                    WHERE status = 'PENDING'
                    ORDER BY enqueued_at, rowid
                    LIMIT 1
                )
                AND status = 'PENDING'
                RETURNING *
                "#,
            )
            .bind(worker_id)
            .bind(now_ms())
            .fetch_optional(&self.pool)
            .await?;
            Ok(task)
        })
        .await
    }

    async fn ack(&self, id: &str) -> Result<()> {
        retry_on_sqlite_busy("ack_task", || async {
            sqlx::query("DELETE FROM task_queue WHERE id = ?")
                .bind(id)
                .execute(&self.pool)
                .await?;
            Ok(())
        })
        .await
    }

    async fn release(&self, id: &str) -> Result<()> {
        retry_on_sqlite_busy("release_task", || async {
            sqlx::query(
                "UPDATE task_queue SET status = 'PENDING', worker_id = NULL, claimed_at = NULL WHERE id = ?",
            )
            .bind(id)
            .execute(&self.pool)
            .await?;
            Ok(())
        })
        .await
    }

    async fn touch(&self, id: &str) -> Result<()> {
        retry_on_sqlite_busy("touch_task", || async {
            sqlx::query(
                "UPDATE task_queue SET claimed_at = ? WHERE id = ? AND status = 'CLAIMED'",
            )
            .bind(now_ms())
            .bind(id)
            .execute(&self.pool)
            .await?;
            Ok(())
        })
        .await
    }

    async fn release_stale(&self, lease_ms: i64) -> Result<u64> {
        let cutoff = now_ms().saturating_sub(lease_ms);
        retry_on_sqlite_busy("release_stale_tasks", || async {
            let result = sqlx::query(
                r#"
                UPDATE task_queue SET status = 'PENDING', worker_id = NULL, claimed_at = NULL
                WHERE status = 'CLAIMED' AND claimed_at <= ?
                "#,
            )
            .bind(cutoff)
            .execute(&self.pool)
            .await?;
            Ok(result.rows_affected())
        })
        .await
    }

    async fn count_by_state(&self, state: TaskState) -> Result<i64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM task_queue WHERE status = ?")
            .bind(state.as_str())
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::models::TaskMessage;
    use crate::database::{init_pool, run_migrations};

    async fn setup() -> SqlxTaskRepository {
        let pool = init_pool("sqlite::memory:").await.unwrap();
        run_migrations(&pool).await.unwrap();
        SqlxTaskRepository::new(pool)
    }

    fn task(job_id: &str) -> TaskDbModel {
        TaskDbModel::new(&TaskMessage::document_repo(job_id, "https://example.com/r.git")).unwrap()
    }

    #[tokio::test]
    async fn claim_is_fifo_and_exclusive() {
        let repo = setup().await;
        let first = task("j1");
        let mut second = task("j2");
        second.enqueued_at = first.enqueued_at + 1;
        repo.enqueue(&first).await.unwrap();
        repo.enqueue(&second).await.unwrap();

        let a = repo.claim_next("w1").await.unwrap().unwrap();
        assert_eq!(a.id, first.id);
        assert_eq!(a.status, "CLAIMED");
        assert_eq!(a.attempts, 1);
        assert_eq!(a.worker_id.as_deref(), Some("w1"));

        let b = repo.claim_next("w2").await.unwrap().unwrap();
        assert_eq!(b.id, second.id);
        assert!(repo.claim_next("w3").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn release_makes_task_claimable_again() {
        let repo = setup().await;
        let t = task("j1");
        repo.enqueue(&t).await.unwrap();

        let claimed = repo.claim_next("w1").await.unwrap().unwrap();
        repo.release(&claimed.id).await.unwrap();
        assert_eq!(repo.count_by_state(TaskState::Pending).await.unwrap(), 1);

        let again = repo.claim_next("w2").await.unwrap().unwrap();
        assert_eq!(again.attempts, 2);
    }

    #[tokio::test]
    async fn ack_removes_task() {
        let repo = setup().await;
        let t = task("j1");
        repo.enqueue(&t).await.unwrap();
        let claimed = repo.claim_next("w1").await.unwrap().unwrap();
        repo.ack(&claimed.id).await.unwrap();
        assert_eq!(repo.count_by_state(TaskState::Pending).await.unwrap(), 0);
        assert_eq!(repo.count_by_state(TaskState::Claimed).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn stale_claims_are_released() {
        let repo = setup().await;
        repo.enqueue(&task("j1")).await.unwrap();
        repo.claim_next("w1").await.unwrap().unwrap();

        // Lease far in the future: nothing is stale yet.
        assert_eq!(repo.release_stale(60_000).await.unwrap(), 0);
        // Zero lease: every claim is stale.
        assert_eq!(repo.release_stale(0).await.unwrap(), 1);
        assert_eq!(repo.count_by_state(TaskState::Pending).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn touch_keeps_a_running_claim_fresh() {
        let repo = setup().await;
        repo.enqueue(&task("j1")).await.unwrap();
        let claimed = repo.claim_next("w1").await.unwrap().unwrap();

        // Pretend the claim was taken an hour ago.
        sqlx::query("UPDATE task_queue SET claimed_at = claimed_at - 3600000 WHERE id = ?")
            .bind(&claimed.id)
            .execute(&repo.pool)
            .await
            .unwrap();
        repo.touch(&claimed.id).await.unwrap();

        assert_eq!(repo.release_stale(60_000).await.unwrap(), 0);
        assert_eq!(repo.count_by_state(TaskState::Claimed).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn touch_ignores_pending_tasks() {
        let repo = setup().await;
        let t = task("j1");
        repo.enqueue(&t).await.unwrap();
        repo.touch(&t.id).await.unwrap();

        let claimed_at: Option<i64> =
            sqlx::query_scalar("SELECT claimed_at FROM task_queue WHERE id = ?")
                .bind(&t.id)
                .fetch_one(&repo.pool)
                .await
                .unwrap();
        assert!(claimed_at.is_none());
    }
}
