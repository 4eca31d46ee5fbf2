//! Job worker: the single long-running loop per worker process.
//!
//! ```text
//! JobWorker
//!     │
//!     ├─► claim()  (FIFO, FOR UPDATE SKIP LOCKED)
//!     ├─► JobHandler::handle (dispatch by kind)
//!     └─► finish_ok / finish_fail (bounded diagnostic)
//! ```
//!
//! Safety under multiple workers relies solely on the atomic claim. There
//! is no worker-level retry: transient-dependency retries live in the
//! wrapper, scheduled re-runs live in the incident engine. On shutdown
//! the current job is finished and committed before the loop exits.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use futures::FutureExt;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::handlers::JobHandler;
use super::queue::JobQueue;

/// Configuration for the job worker.
#[derive(Debug, Clone)]
pub struct JobWorkerConfig {
    /// How long to sleep when the queue is empty.
    pub poll_interval: Duration,
    /// Worker ID for this instance.
    pub worker_id: String,
}

impl Default for JobWorkerConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(5),
            worker_id: format!("worker-{}", Uuid::new_v4()),
        }
    }
}

impl JobWorkerConfig {
    pub fn with_worker_id(worker_id: impl Into<String>) -> Self {
        Self {
            worker_id: worker_id.into(),
            ..Default::default()
        }
    }
}

pub struct JobWorker {
    queue: Arc<JobQueue>,
    handler: Arc<dyn JobHandler>,
    config: JobWorkerConfig,
    shutdown: Arc<AtomicBool>,
}

impl JobWorker {
    pub fn new(queue: Arc<JobQueue>, handler: Arc<dyn JobHandler>) -> Self {
        Self {
            queue,
            handler,
            config: JobWorkerConfig::default(),
            shutdown: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn with_config(
        queue: Arc<JobQueue>,
        handler: Arc<dyn JobHandler>,
        config: JobWorkerConfig,
    ) -> Self {
        Self {
            queue,
            handler,
            config,
            shutdown: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Handle for graceful shutdown from another task.
    pub fn shutdown_handle(&self) -> Arc<AtomicBool> {
        self.shutdown.clone()
    }

    pub fn request_shutdown(&self) {
        self.shutdown.store(true, Ordering::SeqCst);
    }

    fn is_shutdown_requested(&self) -> bool {
        self.shutdown.load(Ordering::SeqCst)
    }

    /// Run until shutdown is requested. The loop never dies to a handler
    /// failure: every outcome, including a panic, lands on the job row.
    pub async fn run(self) -> Result<()> {
        info!(
            worker_id = %self.config.worker_id,
            poll_interval_ms = self.config.poll_interval.as_millis() as u64,
            "job worker starting"
        );

        loop {
            if self.is_shutdown_requested() {
                break;
            }

            let job = match self.queue.claim().await {
                Ok(job) => job,
                Err(e) => {
                    error!(error = %e, "failed to claim job");
                    tokio::time::sleep(Duration::from_secs(1)).await;
                    continue;
                }
            };

            let job = match job {
                Some(job) => job,
                None => {
                    tokio::time::sleep(self.config.poll_interval).await;
                    continue;
                }
            };

            let job_id = job.id;
            let kind = job.kind;
            debug!(job_id = %job_id, kind = kind.as_str(), "executing job");

            let outcome = std::panic::AssertUnwindSafe(self.handler.handle(&job))
                .catch_unwind()
                .await;

            match outcome {
                Ok(Ok(result)) => {
                    info!(job_id = %job_id, kind = kind.as_str(), "job succeeded");
                    if let Err(e) = self.queue.finish_ok(job_id, Some(result)).await {
                        error!(job_id = %job_id, error = %e, "failed to mark job as succeeded");
                    }
                }
                Ok(Err(e)) => {
                    warn!(job_id = %job_id, kind = kind.as_str(), error = %e, "job failed");
                    if let Err(mark_err) = self.queue.finish_fail(job_id, &format!("{e:#}")).await {
                        error!(job_id = %job_id, error = %mark_err, "failed to mark job as failed");
                    }
                }
                Err(panic) => {
                    let detail = panic
                        .downcast_ref::<&str>()
                        .map(|s| s.to_string())
                        .or_else(|| panic.downcast_ref::<String>().cloned())
                        .unwrap_or_else(|| "handler panicked".to_string());
                    error!(job_id = %job_id, kind = kind.as_str(), detail = %detail, "job handler panicked");
                    if let Err(mark_err) = self
                        .queue
                        .finish_fail(job_id, &format!("panic: {detail}"))
                        .await
                    {
                        error!(job_id = %job_id, error = %mark_err, "failed to mark job as failed");
                    }
                }
            }
        }

        info!(worker_id = %self.config.worker_id, "job worker stopped");
        Ok(())
    }

    /// Convenience wrapper that stops on Ctrl+C.
    pub async fn run_until_shutdown(self) -> Result<()> {
        let shutdown = self.shutdown_handle();
        tokio::spawn(async move {
            let _ = tokio::signal::ctrl_c().await;
            info!("received shutdown signal");
            shutdown.store(true, Ordering::SeqCst);
        });
        self.run().await
    }
}
