#![forbid(unsafe_code)]

use serde::{Deserialize, Serialize};

use crate::common::validate_label_token;
use crate::roster::{StatusKey, REFERENCE_ID_MAX_LEN};
use crate::{ContractViolation, Validate};

pub const REFERENCE_LABEL_MAX_LEN: usize = 128;
pub const BLANK_OPTION_LABEL: &str = "—";

/// Read-only `{id, label}` entry owned by the reference-data catalogs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReferenceOption {
    pub id: String,
    pub label: String,
}

impl ReferenceOption {
    pub fn v1(id: impl Into<String>, label: impl Into<String>) -> Result<Self, ContractViolation> {
        let option = Self {
            id: id.into(),
            label: label.into(),
        };
        option.validate()?;
        Ok(option)
    }
}

impl Validate for ReferenceOption {
    fn validate(&self) -> Result<(), ContractViolation> {
        validate_label_token("reference_option.id", &self.id, REFERENCE_ID_MAX_LEN)?;
        validate_label_token(
            "reference_option.label",
            &self.label,
            REFERENCE_LABEL_MAX_LEN,
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReferenceKind {
    Person,
    Vehicle,
    Status,
}

/// One entry of a rendered select list; `value` is `None` for the blank entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SelectOption {
    pub value: Option<String>,
    pub label: String,
}

/// Builds a select list for `kind`: the blank entry first, then the catalog
/// entries in catalog order. Vehicles render as `CODE — MODEL`.
pub fn select_options(kind: ReferenceKind, catalog: &[ReferenceOption]) -> Vec<SelectOption> {
    let mut out = Vec::with_capacity(catalog.len() + 1);
    out.push(SelectOption {
        value: None,
        label: BLANK_OPTION_LABEL.to_string(),
    });
    out.extend(catalog.iter().map(|entry| SelectOption {
        value: Some(entry.id.clone()),
        label: match kind {
            ReferenceKind::Vehicle => format!("{} — {}", entry.id, entry.label),
            ReferenceKind::Person | ReferenceKind::Status => entry.label.clone(),
        },
    }));
    out
}

pub fn label_for<'a>(catalog: &'a [ReferenceOption], id: &str) -> Option<&'a str> {
    catalog
        .iter()
        .find(|entry| entry.id == id)
        .map(|entry| entry.label.as_str())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StatusClass {
    None,
    Available,
    Patrol,
    Unavailable,
}

impl StatusClass {
    pub fn as_str(self) -> &'static str {
        match self {
            StatusClass::None => "",
            StatusClass::Available => "status-dispo",
            StatusClass::Patrol => "status-patrol",
            StatusClass::Unavailable => "status-indispo",
        }
    }
}

/// Display class of a status key, matched case-insensitively.
pub fn status_class(status: Option<&StatusKey>) -> StatusClass {
    let Some(status) = status else {
        return StatusClass::None;
    };
    match status.as_str().to_uppercase().as_str() {
        "DISPONIBLE" | "DISPO" | "AVAILABLE" => StatusClass::Available,
        "EN PATROUILLE" | "PATROL" => StatusClass::Patrol,
        _ => StatusClass::Unavailable,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn opt(id: &str, label: &str) -> ReferenceOption {
        ReferenceOption::v1(id, label).unwrap()
    }

    #[test]
    fn at_reference_01_select_options_start_with_blank_entry() {
        let persons = vec![opt("M-1", "Doe"), opt("M-2", "Roe")];
        let out = select_options(ReferenceKind::Person, &persons);
        assert_eq!(out.len(), 3);
        assert_eq!(out[0].value, None);
        assert_eq!(out[0].label, BLANK_OPTION_LABEL);
        assert_eq!(out[2].value.as_deref(), Some("M-2"));
        assert_eq!(out[2].label, "Roe");
    }

    #[test]
    fn at_reference_02_vehicle_labels_join_code_and_model() {
        let out = select_options(ReferenceKind::Vehicle, &[opt("V-12", "Interceptor")]);
        assert_eq!(out[1].label, "V-12 — Interceptor");
    }

    #[test]
    fn at_reference_03_status_class_is_case_insensitive() {
        let key = |v: &str| StatusKey::new(v).unwrap();
        assert_eq!(status_class(None), StatusClass::None);
        assert_eq!(status_class(Some(&key("dispo"))), StatusClass::Available);
        assert_eq!(
            status_class(Some(&key("En Patrouille"))),
            StatusClass::Patrol
        );
        assert_eq!(status_class(Some(&key("OFF_DUTY"))), StatusClass::Unavailable);
    }

    #[test]
    fn at_reference_04_option_rejects_blank_label() {
        assert!(ReferenceOption::v1("M-1", " ").is_err());
        assert_eq!(label_for(&[opt("M-1", "Doe")], "M-1"), Some("Doe"));
        assert_eq!(label_for(&[opt("M-1", "Doe")], "M-9"), None);
    }
}
