//! DB-backed job scheduling: typed job records, idempotent enqueue,
//! FIFO claim and the worker loop.

pub mod handlers;
pub mod job;
pub mod queue;
pub mod worker;

pub use handlers::{JobHandler, PipelineHandler};
pub use job::{Job, JobKind, JobStatus, MAX_ERROR_LEN};
pub use queue::JobQueue;
pub use worker::{JobWorker, JobWorkerConfig};
