//! Invoice domain: validation rules and enforcement policy.

pub mod validation;
