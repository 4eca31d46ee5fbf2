// Mock implementations of the infrastructure ports.
//
// Injected into PipelineKernel in tests and in the fault-injection
// scenarios; every mock records its calls and can be scripted to fail.

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use parking_lot::Mutex;

use super::traits::{BaseExtractor, BaseIssueSink, BaseStorage, BaseTariffLookup, ExtractedInvoice};

// =============================================================================
// Mock Storage
// =============================================================================

/// In-memory storage backend. `fail_reads` makes every `get_bytes` error,
/// which is how scenarios simulate a storage outage.
pub struct MockStorage {
    objects: Mutex<HashMap<String, Vec<u8>>>,
    fail_reads: Mutex<bool>,
    reads: Mutex<Vec<String>>,
}

impl MockStorage {
    pub fn new() -> Self {
        Self {
            objects: Mutex::new(HashMap::new()),
            fail_reads: Mutex::new(false),
            reads: Mutex::new(Vec::new()),
        }
    }

    pub fn with_object(self, reference: &str, bytes: &[u8]) -> Self {
        self.objects.lock().insert(reference.to_string(), bytes.to_vec());
        self
    }

    pub fn set_fail_reads(&self, fail: bool) {
        *self.fail_reads.lock() = fail;
    }

    pub fn reads(&self) -> Vec<String> {
        self.reads.lock().clone()
    }
}

impl Default for MockStorage {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl BaseStorage for MockStorage {
    async fn get_bytes(&self, reference: &str) -> Result<Vec<u8>> {
        self.reads.lock().push(reference.to_string());
        if *self.fail_reads.lock() {
            return Err(anyhow!("storage read failed for {reference}"));
        }
        self.objects
            .lock()
            .get(reference)
            .cloned()
            .ok_or_else(|| anyhow!("no object at {reference}"))
    }

    async fn put_bytes(&self, reference: &str, bytes: &[u8]) -> Result<()> {
        self.objects.lock().insert(reference.to_string(), bytes.to_vec());
        Ok(())
    }
}

// =============================================================================
// Mock Extractor
// =============================================================================

/// Scripted extractor. Responses are consumed in FIFO order; when the
/// queue is empty a minimal well-formed invoice comes back.
pub struct MockExtractor {
    responses: Mutex<Vec<Result<ExtractedInvoice>>>,
    calls: Mutex<usize>,
}

impl MockExtractor {
    pub fn new() -> Self {
        Self {
            responses: Mutex::new(Vec::new()),
            calls: Mutex::new(0),
        }
    }

    pub fn with_response(self, invoice: ExtractedInvoice) -> Self {
        self.responses.lock().push(Ok(invoice));
        self
    }

    pub fn with_error(self, message: &str) -> Self {
        self.responses.lock().push(Err(anyhow!(message.to_string())));
        self
    }

    pub fn call_count(&self) -> usize {
        *self.calls.lock()
    }

    pub fn sample_invoice() -> ExtractedInvoice {
        ExtractedInvoice {
            vendor: Some("ck".to_string()),
            period: Some("2025-01".to_string()),
            consumption_kwh: Some(1250.0),
            line_items: vec![],
            totals: None,
            confidence: Some(0.97),
            extra: serde_json::Value::Null,
        }
    }
}

impl Default for MockExtractor {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl BaseExtractor for MockExtractor {
    async fn extract(
        &self,
        _image_bytes: &[u8],
        _mime: &str,
        _hints: &serde_json::Value,
    ) -> Result<ExtractedInvoice> {
        *self.calls.lock() += 1;
        let mut responses = self.responses.lock();
        if responses.is_empty() {
            return Ok(Self::sample_invoice());
        }
        responses.remove(0)
    }
}

// =============================================================================
// Mock Tariff Lookup
// =============================================================================

pub struct MockTariffLookup {
    prices: Mutex<HashMap<(String, String), f64>>,
}

impl MockTariffLookup {
    pub fn new() -> Self {
        Self {
            prices: Mutex::new(HashMap::new()),
        }
    }

    pub fn with_price(self, tariff_code: &str, period: &str, unit_price: f64) -> Self {
        self.prices
            .lock()
            .insert((tariff_code.to_string(), period.to_string()), unit_price);
        self
    }
}

impl Default for MockTariffLookup {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl BaseTariffLookup for MockTariffLookup {
    async fn unit_price(&self, tariff_code: &str, period: &str) -> Result<Option<f64>> {
        Ok(self
            .prices
            .lock()
            .get(&(tariff_code.to_string(), period.to_string()))
            .copied())
    }
}

// =============================================================================
// Mock Issue Sink
// =============================================================================

/// Records every payload submitted so tests can assert on the exact JSON
/// that would reach the tracker.
pub struct MockIssueSink {
    submitted: Mutex<Vec<serde_json::Value>>,
}

impl MockIssueSink {
    pub fn new() -> Self {
        Self {
            submitted: Mutex::new(Vec::new()),
        }
    }

    pub fn submitted(&self) -> Vec<serde_json::Value> {
        self.submitted.lock().clone()
    }
}

impl Default for MockIssueSink {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl BaseIssueSink for MockIssueSink {
    async fn submit(&self, payload: &serde_json::Value) -> Result<()> {
        self.submitted.lock().push(payload.clone());
        Ok(())
    }
}

/// Bundle of all mock ports wired together, ready for kernel construction.
pub struct TestDependencies {
    pub storage: Arc<MockStorage>,
    pub extractor: Arc<MockExtractor>,
    pub tariff_lookup: Arc<MockTariffLookup>,
    pub issue_sink: Arc<MockIssueSink>,
}

impl TestDependencies {
    pub fn new() -> Self {
        Self {
            storage: Arc::new(MockStorage::new()),
            extractor: Arc::new(MockExtractor::new()),
            tariff_lookup: Arc::new(MockTariffLookup::new()),
            issue_sink: Arc::new(MockIssueSink::new()),
        }
    }
}

impl Default for TestDependencies {
    fn default() -> Self {
        Self::new()
    }
}
