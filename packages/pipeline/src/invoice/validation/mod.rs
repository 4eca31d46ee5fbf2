//! Invoice validation: closed-set rules, shadow compare, mode-dispatched
//! enforcement.

pub mod enforcement;
pub mod enforcement_config;
pub mod error_codes;
pub mod shadow;
pub mod shadow_config;
pub mod types;
pub mod validator;

pub use enforcement::{enforce_validation, EnforcementAction, EnforcementDecision};
pub use enforcement_config::{EnforcementConfig, ValidationMode};
pub use error_codes::ValidationErrorCode;
pub use shadow::{compare_validators, shadow_validate_hook, ShadowCompareResult};
pub use shadow_config::ShadowConfig;
pub use types::{ValidationError, ValidationResult, ValidationSeverity};
pub use validator::validate;
