//! The documentation pipeline.
//!
//! Submissions go through the [`SubmissionGateway`], which records a
//! `queued` job in the [`StatusStore`] and puts a message on the
//! [`TaskQueue`]. A [`WorkerPool`] claims messages and hands them to the
//! [`JobOrchestrator`], which runs the stages in order and records every
//! transition.

pub mod gateway;
pub mod orchestrator;
pub mod stages;
pub mod status;
pub mod task_queue;
pub mod worker_pool;

pub use gateway::{SubmissionGateway, validate_repo_url};
pub use orchestrator::{JobOrchestrator, JobOutcome, OrchestratorDeps};
pub use stages::PipelineStage;
pub use status::{JobRecord, JobUpdate, StatusStore};
pub use task_queue::{ClaimedTask, TaskQueue};
pub use worker_pool::WorkerPool;
