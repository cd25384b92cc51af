//! Task queue database models.

use serde::{Deserialize, Serialize};
use sqlx::FromRow;

use crate::database::time::now_ms;

/// Name of the one task this service knows how to run.
pub const DOCUMENT_REPO_TASK: &str = "tasks.document_repo";

/// A named task with positional string arguments.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskMessage {
    pub name: String,
    pub args: Vec<String>,
}

impl TaskMessage {
    /// Message asking a worker to document `repo_url` under `job_id`.
    pub fn document_repo(job_id: impl Into<String>, repo_url: impl Into<String>) -> Self {
        Self {
            name: DOCUMENT_REPO_TASK.to_string(),
            args: vec![job_id.into(), repo_url.into()],
        }
    }

    /// `(job_id, repo_url)` if this is a well-formed document task.
    pub fn as_document_repo(&self) -> Option<(&str, &str)> {
        match (self.name.as_str(), self.args.as_slice()) {
            (DOCUMENT_REPO_TASK, [job_id, repo_url]) => Some((job_id.as_str(), repo_url.as_str())),
            _ => None,
        }
    }
}

/// Delivery state of a queued task.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, strum::Display, strum::EnumString,
)]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskState {
    /// Waiting to be claimed.
    Pending,
    /// Held by exactly one worker.
    Claimed,
}

impl TaskState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "PENDING",
            Self::Claimed => "CLAIMED",
        }
    }
}

/// Task queue row.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct TaskDbModel {
    pub id: String,
    pub name: String,
    /// JSON array of positional arguments
    pub args: String,
    pub status: String,
    pub attempts: i64,
    pub worker_id: Option<String>,
    /// Unix epoch milliseconds
    pub enqueued_at: i64,
    /// Unix epoch milliseconds
    pub claimed_at: Option<i64>,
}

impl TaskDbModel {
    pub fn new(message: &TaskMessage) -> crate::Result<Self> {
        Ok(Self {
            id: uuid::Uuid::new_v4().to_string(),
            name: message.name.clone(),
            args: serde_json::to_string(&message.args)?,
            status: TaskState::Pending.as_str().to_string(),
            attempts: 0,
            worker_id: None,
            enqueued_at: now_ms(),
            claimed_at: None,
        })
    }

    /// Decode the stored message.
    pub fn message(&self) -> crate::Result<TaskMessage> {
        Ok(TaskMessage {
            name: self.name.clone(),
            args: serde_json::from_str(&self.args)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn document_repo_message_shape() {
        let msg = TaskMessage::document_repo("j1", "https://example.com/r.git");
        assert_eq!(msg.name, "tasks.document_repo");
        assert_eq!(
            msg.as_document_repo(),
            Some(("j1", "https://example.com/r.git"))
        );
    }

    #[test]
    fn malformed_messages_are_not_document_tasks() {
        let wrong_name = TaskMessage {
            name: "tasks.other".into(),
            args: vec!["a".into(), "b".into()],
        };
        assert!(wrong_name.as_document_repo().is_none());

        let wrong_arity = TaskMessage {
            name: DOCUMENT_REPO_TASK.into(),
            args: vec!["a".into()],
        };
        assert!(wrong_arity.as_document_repo().is_none());
    }

    #[test]
    fn db_model_keeps_args() {
        let msg = TaskMessage::document_repo("j1", "https://x/y");
        let row = TaskDbModel::new(&msg).unwrap();
        assert_eq!(row.status, "PENDING");
        assert_eq!(row.message().unwrap(), msg);
    }
}
