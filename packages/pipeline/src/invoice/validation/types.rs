//! Data contracts for invoice validation.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::error_codes::ValidationErrorCode;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ValidationSeverity {
    Error,
    Warn,
}

/// Single validation error, immutable and JSON-safe.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationError {
    pub code: ValidationErrorCode,
    pub field: String,
    pub message: String,
    pub severity: ValidationSeverity,
}

impl ValidationError {
    pub fn new(code: ValidationErrorCode, field: &str, message: impl Into<String>) -> Self {
        Self {
            code,
            field: field.to_string(),
            message: message.into(),
            severity: ValidationSeverity::Error,
        }
    }
}

/// Aggregate validation outcome. Invariant: `valid == errors.is_empty()`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidationResult {
    pub valid: bool,
    pub errors: Vec<ValidationError>,
    pub normalized: Option<Value>,
}

impl ValidationResult {
    pub fn from_errors(errors: Vec<ValidationError>) -> Self {
        Self {
            valid: errors.is_empty(),
            errors,
            normalized: None,
        }
    }

    pub fn codes(&self) -> Vec<ValidationErrorCode> {
        self.errors.iter().map(|e| e.code).collect()
    }

    pub fn has_code(&self, code: ValidationErrorCode) -> bool {
        self.errors.iter().any(|e| e.code == code)
    }
}
