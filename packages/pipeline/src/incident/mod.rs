//! Incident engine: deterministic routing, stable-fingerprint dedup and
//! a monotonic status machine.

pub mod issue_payload;
pub mod keys;
pub mod model;
pub mod repository;
pub mod router;

pub use issue_payload::{IssuePayload, IssuePayloadBuilder};
pub use model::{Incident, IncidentActionType, IncidentSeverity, IncidentStatus};
pub use repository::{IncidentRepository, UpsertIncident};
pub use router::{ActionRouter, ActionSpec, IncidentSpec, RouteContext, RoutedAction};
