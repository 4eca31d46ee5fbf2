// Kernel - core infrastructure with dependency injection.
//
// The PipelineKernel holds all runtime dependencies (database, ports,
// metrics, guard state) and provides access via traits for testability.
//
// IMPORTANT: Kernel is for INFRASTRUCTURE only, not business logic.
// Validation rules and incident policy live in their own modules.

pub mod jobs;
pub mod kernel;
pub mod test_dependencies;
pub mod traits;

pub use kernel::{PipelineKernel, PipelineService, SubmitOutcome};
pub use test_dependencies::{
    MockExtractor, MockIssueSink, MockStorage, MockTariffLookup, TestDependencies,
};
pub use traits::*;
