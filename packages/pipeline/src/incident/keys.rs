//! Incident identity helpers.
//!
//! The dedupe key is built from identity fields only; lookup timestamps
//! and market-price dates never participate, so repeated occurrences of
//! the same defect collapse onto one key within a bucket.

pub use crate::common::hash::{dedupe_key, epoch_day, invoice_ref_hash};

/// Derive a YYYY-MM period from whatever dates are available.
/// Priority: period_start, then period_end, then invoice_date.
pub fn extract_period_from_dates(
    period_start: Option<&str>,
    period_end: Option<&str>,
    invoice_date: Option<&str>,
) -> String {
    for candidate in [period_start, period_end, invoice_date].into_iter().flatten() {
        if candidate.len() >= 7 {
            return candidate[..7].to_string();
        }
    }
    String::new()
}
