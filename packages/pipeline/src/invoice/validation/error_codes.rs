//! Closed-set validation error codes. Free-form strings are not accepted
//! anywhere; enforcement and shadow compare both match on this enum.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ValidationErrorCode {
    MissingField,
    InvalidFormat,
    InvalidEttn,
    InvalidDatetime,
    InconsistentPeriods,
    NegativeValue,
    ReactivePenaltyMismatch,
    /// Defined for supplier-profile gating; not emitted by the base rules.
    UnsupportedSupplier,
    PayableTotalMismatch,
    TotalMismatch,
    ZeroConsumption,
    LineCrosscheckFail,
}

impl ValidationErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ValidationErrorCode::MissingField => "MISSING_FIELD",
            ValidationErrorCode::InvalidFormat => "INVALID_FORMAT",
            ValidationErrorCode::InvalidEttn => "INVALID_ETTN",
            ValidationErrorCode::InvalidDatetime => "INVALID_DATETIME",
            ValidationErrorCode::InconsistentPeriods => "INCONSISTENT_PERIODS",
            ValidationErrorCode::NegativeValue => "NEGATIVE_VALUE",
            ValidationErrorCode::ReactivePenaltyMismatch => "REACTIVE_PENALTY_MISMATCH",
            ValidationErrorCode::UnsupportedSupplier => "UNSUPPORTED_SUPPLIER",
            ValidationErrorCode::PayableTotalMismatch => "PAYABLE_TOTAL_MISMATCH",
            ValidationErrorCode::TotalMismatch => "TOTAL_MISMATCH",
            ValidationErrorCode::ZeroConsumption => "ZERO_CONSUMPTION",
            ValidationErrorCode::LineCrosscheckFail => "LINE_CROSSCHECK_FAIL",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "MISSING_FIELD" => Some(ValidationErrorCode::MissingField),
            "INVALID_FORMAT" => Some(ValidationErrorCode::InvalidFormat),
            "INVALID_ETTN" => Some(ValidationErrorCode::InvalidEttn),
            "INVALID_DATETIME" => Some(ValidationErrorCode::InvalidDatetime),
            "INCONSISTENT_PERIODS" => Some(ValidationErrorCode::InconsistentPeriods),
            "NEGATIVE_VALUE" => Some(ValidationErrorCode::NegativeValue),
            "REACTIVE_PENALTY_MISMATCH" => Some(ValidationErrorCode::ReactivePenaltyMismatch),
            "UNSUPPORTED_SUPPLIER" => Some(ValidationErrorCode::UnsupportedSupplier),
            "PAYABLE_TOTAL_MISMATCH" => Some(ValidationErrorCode::PayableTotalMismatch),
            "TOTAL_MISMATCH" => Some(ValidationErrorCode::TotalMismatch),
            "ZERO_CONSUMPTION" => Some(ValidationErrorCode::ZeroConsumption),
            "LINE_CROSSCHECK_FAIL" => Some(ValidationErrorCode::LineCrosscheckFail),
        _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ALL: &[ValidationErrorCode] = &[
        ValidationErrorCode::MissingField,
        ValidationErrorCode::InvalidFormat,
        ValidationErrorCode::InvalidEttn,
        ValidationErrorCode::InvalidDatetime,
        ValidationErrorCode::InconsistentPeriods,
        ValidationErrorCode::NegativeValue,
        ValidationErrorCode::ReactivePenaltyMismatch,
        ValidationErrorCode::UnsupportedSupplier,
        ValidationErrorCode::PayableTotalMismatch,
        ValidationErrorCode::TotalMismatch,
        ValidationErrorCode::ZeroConsumption,
        ValidationErrorCode::LineCrosscheckFail,
    ];

    #[test]
    fn parse_roundtrip() {
        for code in ALL {
            assert_eq!(ValidationErrorCode::parse(code.as_str()), Some(*code));
        }
        assert_eq!(ValidationErrorCode::parse("NOT_A_CODE"), None);
    }

    #[test]
    fn serde_uses_wire_names() {
        let json = serde_json::to_string(&ValidationErrorCode::PayableTotalMismatch).unwrap();
        assert_eq!(json, "\"PAYABLE_TOTAL_MISMATCH\"");
    }
}
