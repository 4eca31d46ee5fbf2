//! Invoice pipeline core: DB-backed job scheduling, operational guards,
//! incident tracking, validation enforcement and a deterministic
//! load-characterization harness.
//!
//! External collaborators (vision extractor, object storage, tariff
//! tables, issue trackers) sit behind the ports in `kernel::traits`; the
//! core never talks to them directly.

pub mod common;
pub mod guard;
pub mod incident;
pub mod invoice;
pub mod kernel;
pub mod testing;

pub use kernel::{PipelineKernel, PipelineService, SubmitOutcome};
