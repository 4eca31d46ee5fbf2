// Trait definitions for dependency injection
//
// These are INFRASTRUCTURE traits only - no business logic.
// The extractor, tariff table and storage backends are external
// collaborators; the core only ever sees these ports.
//
// Naming convention: Base* for trait names (e.g., BaseStorage, BaseExtractor)

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

// =============================================================================
// Storage Trait (Infrastructure - invoice bytes at rest)
// =============================================================================

#[async_trait]
pub trait BaseStorage: Send + Sync {
    /// Fetch the raw bytes behind a storage reference.
    async fn get_bytes(&self, reference: &str) -> Result<Vec<u8>>;

    /// Store bytes under a reference, overwriting any previous content.
    async fn put_bytes(&self, reference: &str, bytes: &[u8]) -> Result<()>;
}

// =============================================================================
// Extractor Trait (Infrastructure - vision/parser backends)
// =============================================================================

/// Structured output of an extraction backend.
///
/// The core treats this as opaque-but-shaped data; whether it came from a
/// vision model or a local parser is the adapter's business.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractedInvoice {
    pub vendor: Option<String>,
    /// Invoice period, YYYY-MM.
    pub period: Option<String>,
    pub consumption_kwh: Option<f64>,
    pub line_items: Vec<serde_json::Value>,
    pub totals: Option<serde_json::Value>,
    /// Extractor confidence in [0,1], when the backend reports one.
    pub confidence: Option<f64>,
    /// Everything else the backend produced, verbatim.
    pub extra: serde_json::Value,
}

#[async_trait]
pub trait BaseExtractor: Send + Sync {
    /// Extract structured invoice data from a document image.
    ///
    /// `hints` carries adapter-specific knobs (supplier guess, page range);
    /// the core passes them through untouched.
    async fn extract(
        &self,
        image_bytes: &[u8],
        mime: &str,
        hints: &serde_json::Value,
    ) -> Result<ExtractedInvoice>;
}

// =============================================================================
// Tariff Lookup Trait (Infrastructure - pure read)
// =============================================================================

#[async_trait]
pub trait BaseTariffLookup: Send + Sync {
    /// Unit price for a tariff code in a YYYY-MM period, if known.
    async fn unit_price(&self, tariff_code: &str, period: &str) -> Result<Option<f64>>;
}

// =============================================================================
// Issue Sink Trait (Infrastructure - external issue tracker)
// =============================================================================

#[async_trait]
pub trait BaseIssueSink: Send + Sync {
    /// Deliver an issue payload verbatim to the external tracker.
    async fn submit(&self, payload: &serde_json::Value) -> Result<()>;
}
