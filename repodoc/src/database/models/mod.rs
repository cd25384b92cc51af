//! Database models.

pub mod job;
pub mod task;

pub use job::{JobDbModel, JobExecutionLogDbModel, JobStatus, LogEntry};
pub use task::{DOCUMENT_REPO_TASK, TaskDbModel, TaskMessage, TaskState};
