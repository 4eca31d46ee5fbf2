//! Invoice validation rules.
//!
//! The rule set walks a canonical-invoice JSON map. Optional sections
//! (reactive, totals, lines) are skipped when absent; rules are
//! order-independent and never short-circuit each other.

use chrono::NaiveDate;
use lazy_static::lazy_static;
use regex::Regex;
use serde_json::Value;

use super::error_codes::ValidationErrorCode;
use super::types::{ValidationError, ValidationResult};

lazy_static! {
    static ref ETTN_RE: Regex =
        Regex::new(r"^[0-9a-f]{8}-[0-9a-f]{4}-[0-9a-f]{4}-[0-9a-f]{4}-[0-9a-f]{12}$")
            .expect("ettn regex");
}

const REQUIRED_PERIOD_CODES: [&str; 3] = ["T1", "T2", "T3"];
const PAYABLE_TOLERANCE: f64 = 5.0;
const LINE_CROSSCHECK_TOLERANCE: f64 = 0.02;

fn err(code: ValidationErrorCode, field: &str, message: impl Into<String>) -> ValidationError {
    ValidationError::new(code, field, message)
}

/// Numbers only; JSON booleans are not numbers.
fn as_number(value: Option<&Value>) -> Option<f64> {
    value.and_then(Value::as_f64)
}

// ---------------------------------------------------------------------------
// Rule: ETTN
// ---------------------------------------------------------------------------

fn validate_ettn(invoice: &Value) -> Vec<ValidationError> {
    let ettn = invoice.get("ettn");

    let raw = match ettn {
        None | Some(Value::Null) => {
            return vec![err(
                ValidationErrorCode::MissingField,
                "ettn",
                "ettn is missing or empty",
            )]
        }
        Some(Value::String(s)) if s.is_empty() => {
            return vec![err(
                ValidationErrorCode::MissingField,
                "ettn",
                "ettn is missing or empty",
            )]
        }
        Some(Value::String(s)) => s,
        Some(_) => {
            return vec![err(
                ValidationErrorCode::InvalidFormat,
                "ettn",
                "ettn must be a string",
            )]
        }
    };

    if !ETTN_RE.is_match(raw.trim()) {
        return vec![err(
            ValidationErrorCode::InvalidEttn,
            "ettn",
            "ettn does not match UUID format",
        )];
    }

    vec![]
}

// ---------------------------------------------------------------------------
// Rule: Periods (T1/T2/T3)
// ---------------------------------------------------------------------------

fn validate_periods(invoice: &Value) -> Vec<ValidationError> {
    let mut errors = Vec::new();

    let periods = match invoice.get("periods").and_then(Value::as_array) {
        Some(list) if !list.is_empty() => list,
        _ => {
            return vec![err(
                ValidationErrorCode::MissingField,
                "periods",
                "periods is missing or empty",
            )]
        }
    };

    let by_code = |code: &str| {
        periods
            .iter()
            .filter_map(Value::as_object)
            .find(|p| p.get("code").and_then(Value::as_str) == Some(code))
    };

    let missing: Vec<&str> = REQUIRED_PERIOD_CODES
        .iter()
        .copied()
        .filter(|code| by_code(code).is_none())
        .collect();
    if !missing.is_empty() {
        errors.push(err(
            ValidationErrorCode::MissingField,
            "periods.codes",
            format!("Missing required period codes: {missing:?}"),
        ));
        // Date and value checks need all required codes present.
        return errors;
    }

    let mut starts = Vec::new();
    let mut ends = Vec::new();
    let mut dates_ok = true;

    for code in REQUIRED_PERIOD_CODES {
        let period = match by_code(code) {
            Some(period) => period,
            None => continue,
        };
        for (date_key, collector) in [("start", &mut starts), ("end", &mut ends)] {
            let field = format!("periods.{code}.{date_key}");
            match period.get(date_key).and_then(Value::as_str) {
                None => {
                    errors.push(err(
                        ValidationErrorCode::InvalidDatetime,
                        &field,
                        format!("{code}.{date_key} is not a valid date string"),
                    ));
                    dates_ok = false;
                }
                Some(raw) => match NaiveDate::parse_from_str(raw, "%Y-%m-%d") {
                    Ok(date) => collector.push(date),
                    Err(_) => {
                        errors.push(err(
                            ValidationErrorCode::InvalidDatetime,
                            &field,
                            format!("{code}.{date_key} cannot be parsed as YYYY-MM-DD"),
                        ));
                        dates_ok = false;
                    }
                },
            }
        }
    }

    if dates_ok && !starts.is_empty() && !ends.is_empty() {
        let distinct = |dates: &[NaiveDate]| {
            let mut sorted = dates.to_vec();
            sorted.sort();
            sorted.dedup();
            sorted.len()
        };
        if distinct(&starts) > 1 || distinct(&ends) > 1 {
            errors.push(err(
                ValidationErrorCode::InconsistentPeriods,
                "periods",
                "T1/T2/T3 start or end dates are not consistent",
            ));
        }
    }

    for code in REQUIRED_PERIOD_CODES {
        let period = match by_code(code) {
            Some(period) => period,
            None => continue,
        };
        for value_key in ["kwh", "amount"] {
            let field = format!("periods.{code}.{value_key}");
            match as_number(period.get(value_key)) {
                None => errors.push(err(
                    ValidationErrorCode::InvalidFormat,
                    &field,
                    format!("{code}.{value_key} must be a number"),
                )),
                Some(v) if v < 0.0 => errors.push(err(
                    ValidationErrorCode::NegativeValue,
                    &field,
                    format!("{code}.{value_key} is negative"),
                )),
                Some(_) => {}
            }
        }
    }

    errors
}

// ---------------------------------------------------------------------------
// Rule: Reactive penalty (bidirectional)
// ---------------------------------------------------------------------------

fn validate_reactive(invoice: &Value) -> Vec<ValidationError> {
    let reactive = match invoice.get("reactive").and_then(Value::as_object) {
        Some(r) => r,
        None => return vec![], // optional section, skip
    };

    let has_amount = reactive.contains_key("penalty_amount");
    let has_kvarh = reactive.contains_key("penalty_kvarh");

    if has_amount && !has_kvarh {
        return vec![err(
            ValidationErrorCode::MissingField,
            "reactive.penalty_kvarh",
            "penalty_kvarh is missing",
        )];
    }
    if has_kvarh && !has_amount {
        return vec![err(
            ValidationErrorCode::MissingField,
            "reactive.penalty_amount",
            "penalty_amount is missing",
        )];
    }
    if !has_amount && !has_kvarh {
        return vec![];
    }

    let mut errors = Vec::new();
    for key in ["penalty_amount", "penalty_kvarh"] {
        if as_number(reactive.get(key)).is_none() {
            errors.push(err(
                ValidationErrorCode::InvalidFormat,
                &format!("reactive.{key}"),
                format!("{key} must be a number"),
            ));
        }
    }
    if !errors.is_empty() {
        return errors;
    }

    let (amount, kvarh) = match (
        as_number(reactive.get("penalty_amount")),
        as_number(reactive.get("penalty_kvarh")),
    ) {
        (Some(amount), Some(kvarh)) => (amount, kvarh),
        _ => return errors,
    };

    for (key, value) in [("penalty_amount", amount), ("penalty_kvarh", kvarh)] {
        if value < 0.0 {
            errors.push(err(
                ValidationErrorCode::NegativeValue,
                &format!("reactive.{key}"),
                format!("{key} is negative"),
            ));
        }
    }
    if !errors.is_empty() {
        return errors;
    }

    if amount > 0.0 && kvarh <= 0.0 {
        errors.push(err(
            ValidationErrorCode::ReactivePenaltyMismatch,
            "reactive",
            "penalty_amount > 0 but penalty_kvarh <= 0",
        ));
    } else if kvarh > 0.0 && amount <= 0.0 {
        errors.push(err(
            ValidationErrorCode::ReactivePenaltyMismatch,
            "reactive",
            "penalty_kvarh > 0 but penalty_amount <= 0",
        ));
    }

    errors
}

// ---------------------------------------------------------------------------
// Rule: Totals (payable vs total, lines+taxes+vat vs total)
// ---------------------------------------------------------------------------

fn validate_totals(invoice: &Value) -> Vec<ValidationError> {
    let totals = match invoice.get("totals").and_then(Value::as_object) {
        Some(t) => t,
        None => return vec![], // optional section, skip
    };

    let mut errors = Vec::new();
    let total = as_number(totals.get("total"));
    let payable = as_number(totals.get("payable"));

    if let (Some(total), Some(payable)) = (total, payable) {
        let diff = (payable - total).abs();
        if diff > PAYABLE_TOLERANCE {
            errors.push(err(
                ValidationErrorCode::PayableTotalMismatch,
                "totals",
                format!("payable={payable}, total={total}, diff={diff:.2}"),
            ));
        }
    }

    if let Some(total) = total {
        if let Some(lines) = invoice.get("lines").and_then(Value::as_array) {
            if !lines.is_empty() {
                let lines_sum: f64 = lines
                    .iter()
                    .filter_map(|line| as_number(line.get("amount")))
                    .sum();
                let taxes_total = as_number(invoice.get("taxes_total")).unwrap_or(0.0);
                let vat_amount = as_number(invoice.get("vat_amount")).unwrap_or(0.0);

                let calculated = lines_sum + taxes_total + vat_amount;
                let tolerance = PAYABLE_TOLERANCE.max(total * 0.01);
                let diff = (calculated - total).abs();
                if diff > tolerance {
                    errors.push(err(
                        ValidationErrorCode::TotalMismatch,
                        "totals.total",
                        format!(
                            "calculated={calculated:.2}, extracted={total:.2}, diff={diff:.2}"
                        ),
                    ));
                }
            }
        }
    }

    errors
}

// ---------------------------------------------------------------------------
// Rule: Lines (zero consumption, per-line crosscheck)
// ---------------------------------------------------------------------------

fn validate_lines(invoice: &Value) -> Vec<ValidationError> {
    let lines = match invoice.get("lines").and_then(Value::as_array) {
        Some(list) if !list.is_empty() => list,
        _ => return vec![], // optional section, skip
    };

    let mut errors = Vec::new();

    let qty_values: Vec<f64> = lines
        .iter()
        .filter_map(|line| as_number(line.get("qty_kwh")))
        .collect();
    if !qty_values.is_empty() {
        let consumption_kwh: f64 = qty_values.iter().sum();
        if consumption_kwh <= 0.0 {
            errors.push(err(
                ValidationErrorCode::ZeroConsumption,
                "lines",
                format!("total consumption_kwh={consumption_kwh}"),
            ));
        }
    }

    for (i, line) in lines.iter().enumerate() {
        let (qty, price, amount) = match (
            as_number(line.get("qty_kwh")),
            as_number(line.get("unit_price")),
            as_number(line.get("amount")),
        ) {
            (Some(q), Some(p), Some(a)) => (q, p, a),
            _ => continue, // can't check
        };
        if amount == 0.0 {
            continue;
        }

        let calculated = qty * price;
        let delta = ((calculated - amount) / amount).abs();
        if delta > LINE_CROSSCHECK_TOLERANCE {
            let label = line
                .get("label")
                .and_then(Value::as_str)
                .map(str::to_string)
                .unwrap_or_else(|| format!("line[{i}]"));
            errors.push(err(
                ValidationErrorCode::LineCrosscheckFail,
                &format!("lines[{i}]"),
                format!(
                    "{label}: qty={qty}, price={price}, amount={amount}, calculated={calculated:.2}"
                ),
            ));
        }
    }

    errors
}

// ---------------------------------------------------------------------------
// Public API
// ---------------------------------------------------------------------------

/// Validate a canonical invoice map.
///
/// Invariant: `result.valid == result.errors.is_empty()`.
pub fn validate(invoice: &Value) -> ValidationResult {
    let mut errors = Vec::new();
    errors.extend(validate_ettn(invoice));
    errors.extend(validate_periods(invoice));
    errors.extend(validate_reactive(invoice));
    errors.extend(validate_totals(invoice));
    errors.extend(validate_lines(invoice));
    ValidationResult::from_errors(errors)
}
