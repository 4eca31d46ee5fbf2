// Common - cross-cutting building blocks shared by every layer.
//
// Time, randomness, fingerprints and metrics are all ports or pure
// functions here; nothing in common/ touches the database.

pub mod clock;
pub mod hash;
pub mod metrics;
pub mod rng;

pub use clock::{Clock, FakeClock, SharedClock, SystemClock};
pub use metrics::{BaseMetricsSink, InMemoryMetrics, MetricsSnapshot, NoopMetrics, SharedMetrics};
pub use rng::SeededRng;
