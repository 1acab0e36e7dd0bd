#![forbid(unsafe_code)]

use std::fmt;

use serde::{Deserialize, Serialize};

#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct MonotonicTimeNs(pub u64);

impl MonotonicTimeNs {
    pub fn saturating_add_ms(self, ms: u64) -> Self {
        Self(self.0.saturating_add(ms.saturating_mul(1_000_000)))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ReasonCodeId(pub u32);

#[derive(Debug, Clone, PartialEq)]
pub enum ContractViolation {
    InvalidValue {
        field: &'static str,
        reason: &'static str,
    },
    UnknownVariant {
        field: &'static str,
        got: String,
    },
}

impl fmt::Display for ContractViolation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ContractViolation::InvalidValue { field, reason } => write!(f, "{field}: {reason}"),
            ContractViolation::UnknownVariant { field, got } => {
                write!(f, "{field}: unknown value {got:?}")
            }
        }
    }
}

impl std::error::Error for ContractViolation {}

pub trait Validate {
    fn validate(&self) -> Result<(), ContractViolation>;
}

/// Shared rule for the short printable identifiers used across the roster
/// (tags, person ids, vehicle codes, status keys).
pub(crate) fn validate_label_token(
    field: &'static str,
    value: &str,
    max_len: usize,
) -> Result<(), ContractViolation> {
    if value.trim().is_empty() {
        return Err(ContractViolation::InvalidValue {
            field,
            reason: "must not be empty",
        });
    }
    if value.len() > max_len {
        return Err(ContractViolation::InvalidValue {
            field,
            reason: "too long",
        });
    }
    if value.trim() != value {
        return Err(ContractViolation::InvalidValue {
            field,
            reason: "must not have leading or trailing whitespace",
        });
    }
    if value.chars().any(|c| c.is_control()) {
        return Err(ContractViolation::InvalidValue {
            field,
            reason: "must not contain control characters",
        });
    }
    Ok(())
}

pub(crate) fn validate_free_text(
    field: &'static str,
    value: &str,
    max_chars: usize,
) -> Result<(), ContractViolation> {
    if value.chars().count() > max_chars {
        return Err(ContractViolation::InvalidValue {
            field,
            reason: "too long",
        });
    }
    if value
        .chars()
        .any(|c| c.is_control() && c != '\n' && c != '\r' && c != '\t')
    {
        return Err(ContractViolation::InvalidValue {
            field,
            reason: "must not contain control characters",
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn at_common_01_label_tokens_reject_blank_padded_and_control() {
        assert!(validate_label_token("t", "ADAM 01", 32).is_ok());
        assert!(validate_label_token("t", "   ", 32).is_err());
        assert!(validate_label_token("t", " LEAD", 32).is_err());
        assert!(validate_label_token("t", "LE\u{7}AD", 32).is_err());
        assert!(validate_label_token("t", &"X".repeat(33), 32).is_err());
    }

    #[test]
    fn at_common_02_free_text_allows_newlines_but_bounds_length() {
        assert!(validate_free_text("notes", "line one\nline two", 2000).is_ok());
        assert!(validate_free_text("notes", "", 2000).is_ok());
        assert!(validate_free_text("notes", &"é".repeat(2001), 2000).is_err());
    }

    #[test]
    fn at_common_03_time_adds_milliseconds_without_overflow() {
        assert_eq!(
            MonotonicTimeNs(5).saturating_add_ms(1),
            MonotonicTimeNs(1_000_005)
        );
        assert_eq!(
            MonotonicTimeNs(u64::MAX).saturating_add_ms(1),
            MonotonicTimeNs(u64::MAX)
        );
    }
}
