#![forbid(unsafe_code)]

use std::cmp::Ordering;
use std::fmt;

use serde::{Deserialize, Deserializer, Serialize};

use crate::common::{validate_free_text, validate_label_token};
use crate::role_uniqueness::check_role_uniqueness;
use crate::{ContractViolation, MonotonicTimeNs, Validate};

pub const LEAD_TAG: &str = "LEAD";
pub const DEFAULT_TEAM_TAGS: [&str; 7] = [
    LEAD_TAG, "ADAM 01", "ADAM 02", "ADAM 03", "ADAM 04", "ADAM 05", "ATR 17",
];
pub const TEAM_TAG_MAX_LEN: usize = 32;
pub const REFERENCE_ID_MAX_LEN: usize = 64;
pub const NOTES_MAX_CHARS: usize = 2000;

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct TeamTag(String);

impl TeamTag {
    pub fn new(tag: impl Into<String>) -> Result<Self, ContractViolation> {
        let v = Self(tag.into());
        v.validate()?;
        Ok(v)
    }

    pub fn lead() -> Self {
        Self(LEAD_TAG.to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_lead(&self) -> bool {
        self.0 == LEAD_TAG
    }
}

impl Validate for TeamTag {
    fn validate(&self) -> Result<(), ContractViolation> {
        validate_label_token("team_tag", &self.0, TEAM_TAG_MAX_LEN)
    }
}

impl TryFrom<String> for TeamTag {
    type Error = ContractViolation;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<TeamTag> for String {
    fn from(value: TeamTag) -> Self {
        value.0
    }
}

impl fmt::Display for TeamTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

pub fn default_team_tags() -> Vec<TeamTag> {
    DEFAULT_TEAM_TAGS
        .iter()
        .map(|tag| TeamTag(tag.to_string()))
        .collect()
}

/// Lead tag first, remaining tags lexicographically.
pub fn roster_order(a: &TeamTag, b: &TeamTag) -> Ordering {
    match (a.is_lead(), b.is_lead()) {
        (true, true) => Ordering::Equal,
        (true, false) => Ordering::Less,
        (false, true) => Ordering::Greater,
        (false, false) => a.as_str().cmp(b.as_str()),
    }
}

/// Personnel registration number.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct PersonId(String);

impl PersonId {
    pub fn new(id: impl Into<String>) -> Result<Self, ContractViolation> {
        let v = Self(id.into());
        v.validate()?;
        Ok(v)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Validate for PersonId {
    fn validate(&self) -> Result<(), ContractViolation> {
        validate_label_token("person_id", &self.0, REFERENCE_ID_MAX_LEN)
    }
}

impl TryFrom<String> for PersonId {
    type Error = ContractViolation;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<PersonId> for String {
    fn from(value: PersonId) -> Self {
        value.0
    }
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct VehicleCode(String);

impl VehicleCode {
    pub fn new(code: impl Into<String>) -> Result<Self, ContractViolation> {
        let v = Self(code.into());
        v.validate()?;
        Ok(v)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Validate for VehicleCode {
    fn validate(&self) -> Result<(), ContractViolation> {
        validate_label_token("vehicle_code", &self.0, REFERENCE_ID_MAX_LEN)
    }
}

impl TryFrom<String> for VehicleCode {
    type Error = ContractViolation;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<VehicleCode> for String {
    fn from(value: VehicleCode) -> Self {
        value.0
    }
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct StatusKey(String);

impl StatusKey {
    pub fn new(key: impl Into<String>) -> Result<Self, ContractViolation> {
        let v = Self(key.into());
        v.validate()?;
        Ok(v)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Validate for StatusKey {
    fn validate(&self) -> Result<(), ContractViolation> {
        validate_label_token("status_key", &self.0, REFERENCE_ID_MAX_LEN)
    }
}

impl TryFrom<String> for StatusKey {
    type Error = ContractViolation;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<StatusKey> for String {
    fn from(value: StatusKey) -> Self {
        value.0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SlotField {
    Conducteur,
    Radio,
    Coequipier1,
    Coequipier2,
    Vehicule,
    Status,
    Notes,
}

impl SlotField {
    pub const ALL: [SlotField; 7] = [
        SlotField::Conducteur,
        SlotField::Radio,
        SlotField::Coequipier1,
        SlotField::Coequipier2,
        SlotField::Vehicule,
        SlotField::Status,
        SlotField::Notes,
    ];

    /// Person-role fields in uniqueness evaluation order.
    pub const PERSON_ROLES: [SlotField; 4] = [
        SlotField::Conducteur,
        SlotField::Radio,
        SlotField::Coequipier1,
        SlotField::Coequipier2,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            SlotField::Conducteur => "conducteur",
            SlotField::Radio => "radio",
            SlotField::Coequipier1 => "coequipier1",
            SlotField::Coequipier2 => "coequipier2",
            SlotField::Vehicule => "vehicule",
            SlotField::Status => "status",
            SlotField::Notes => "notes",
        }
    }

    pub fn parse(value: &str) -> Result<Self, ContractViolation> {
        SlotField::ALL
            .into_iter()
            .find(|f| f.as_str() == value)
            .ok_or_else(|| ContractViolation::UnknownVariant {
                field: "slot_field",
                got: value.to_string(),
            })
    }

    pub fn is_person_role(self) -> bool {
        SlotField::PERSON_ROLES.contains(&self)
    }
}

impl fmt::Display for SlotField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One field's value, typed by the kind of reference it holds.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FieldValue {
    Person(Option<PersonId>),
    Vehicle(Option<VehicleCode>),
    Status(Option<StatusKey>),
    Notes(Option<String>),
}

impl FieldValue {
    /// Builds the value for `field` from a raw select/textarea value. An empty
    /// string means "nothing selected".
    pub fn from_raw(field: SlotField, raw: Option<&str>) -> Result<Self, ContractViolation> {
        let raw = raw.filter(|v| !v.is_empty());
        let value = match field {
            SlotField::Conducteur
            | SlotField::Radio
            | SlotField::Coequipier1
            | SlotField::Coequipier2 => FieldValue::Person(raw.map(PersonId::new).transpose()?),
            SlotField::Vehicule => FieldValue::Vehicle(raw.map(VehicleCode::new).transpose()?),
            SlotField::Status => FieldValue::Status(raw.map(StatusKey::new).transpose()?),
            SlotField::Notes => {
                if let Some(notes) = raw {
                    validate_free_text("notes", notes, NOTES_MAX_CHARS)?;
                }
                FieldValue::Notes(raw.map(ToString::to_string))
            }
        };
        Ok(value)
    }

    pub fn empty_for(field: SlotField) -> Self {
        match field {
            SlotField::Conducteur
            | SlotField::Radio
            | SlotField::Coequipier1
            | SlotField::Coequipier2 => FieldValue::Person(None),
            SlotField::Vehicule => FieldValue::Vehicle(None),
            SlotField::Status => FieldValue::Status(None),
            SlotField::Notes => FieldValue::Notes(None),
        }
    }

    pub fn as_raw(&self) -> Option<&str> {
        match self {
            FieldValue::Person(v) => v.as_ref().map(PersonId::as_str),
            FieldValue::Vehicle(v) => v.as_ref().map(VehicleCode::as_str),
            FieldValue::Status(v) => v.as_ref().map(StatusKey::as_str),
            FieldValue::Notes(v) => v.as_deref(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.as_raw().is_none()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SlotAssignment {
    pub conducteur: Option<PersonId>,
    pub radio: Option<PersonId>,
    pub coequipier1: Option<PersonId>,
    pub coequipier2: Option<PersonId>,
    pub vehicule: Option<VehicleCode>,
    pub status: Option<StatusKey>,
    pub notes: Option<String>,
}

impl SlotAssignment {
    /// Person held by a role field; `None` for non-role fields.
    pub fn person(&self, field: SlotField) -> Option<&PersonId> {
        match field {
            SlotField::Conducteur => self.conducteur.as_ref(),
            SlotField::Radio => self.radio.as_ref(),
            SlotField::Coequipier1 => self.coequipier1.as_ref(),
            SlotField::Coequipier2 => self.coequipier2.as_ref(),
            SlotField::Vehicule | SlotField::Status | SlotField::Notes => None,
        }
    }

    pub fn get(&self, field: SlotField) -> FieldValue {
        match field {
            SlotField::Conducteur
            | SlotField::Radio
            | SlotField::Coequipier1
            | SlotField::Coequipier2 => FieldValue::Person(self.person(field).cloned()),
            SlotField::Vehicule => FieldValue::Vehicle(self.vehicule.clone()),
            SlotField::Status => FieldValue::Status(self.status.clone()),
            SlotField::Notes => FieldValue::Notes(self.notes.clone()),
        }
    }

    pub fn set(&mut self, field: SlotField, value: FieldValue) -> Result<(), ContractViolation> {
        match (field, value) {
            (SlotField::Conducteur, FieldValue::Person(v)) => self.conducteur = v,
            (SlotField::Radio, FieldValue::Person(v)) => self.radio = v,
            (SlotField::Coequipier1, FieldValue::Person(v)) => self.coequipier1 = v,
            (SlotField::Coequipier2, FieldValue::Person(v)) => self.coequipier2 = v,
            (SlotField::Vehicule, FieldValue::Vehicle(v)) => self.vehicule = v,
            (SlotField::Status, FieldValue::Status(v)) => self.status = v,
            (SlotField::Notes, FieldValue::Notes(v)) => {
                self.notes = v.filter(|n| !n.is_empty());
            }
            _ => {
                return Err(ContractViolation::InvalidValue {
                    field: "slot_assignment.value",
                    reason: "value kind does not match the slot field",
                });
            }
        }
        Ok(())
    }

    /// Copies one field from `source`.
    pub fn copy_field(&mut self, field: SlotField, source: &SlotAssignment) {
        match field {
            SlotField::Conducteur => self.conducteur = source.conducteur.clone(),
            SlotField::Radio => self.radio = source.radio.clone(),
            SlotField::Coequipier1 => self.coequipier1 = source.coequipier1.clone(),
            SlotField::Coequipier2 => self.coequipier2 = source.coequipier2.clone(),
            SlotField::Vehicule => self.vehicule = source.vehicule.clone(),
            SlotField::Status => self.status = source.status.clone(),
            SlotField::Notes => self.notes = source.notes.clone(),
        }
    }

    pub fn clear_field(&mut self, field: SlotField) {
        let empty = SlotAssignment::default();
        self.copy_field(field, &empty);
    }

    pub fn is_empty(&self) -> bool {
        self == &SlotAssignment::default()
    }
}

impl Validate for SlotAssignment {
    fn validate(&self) -> Result<(), ContractViolation> {
        for field in SlotField::PERSON_ROLES {
            if let Some(person) = self.person(field) {
                person.validate()?;
            }
        }
        if let Some(vehicule) = &self.vehicule {
            vehicule.validate()?;
        }
        if let Some(status) = &self.status {
            status.validate()?;
        }
        if let Some(notes) = &self.notes {
            validate_free_text("slot_assignment.notes", notes, NOTES_MAX_CHARS)?;
        }
        Ok(())
    }
}

/// One persisted roster row, keyed uniquely by `tag`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RosterRow {
    pub tag: TeamTag,
    #[serde(flatten)]
    pub assignment: SlotAssignment,
    #[serde(rename = "updatedAt")]
    pub updated_at: MonotonicTimeNs,
}

impl RosterRow {
    pub fn v1(
        tag: TeamTag,
        assignment: SlotAssignment,
        updated_at: MonotonicTimeNs,
    ) -> Result<Self, ContractViolation> {
        let row = Self {
            tag,
            assignment,
            updated_at,
        };
        row.validate()?;
        Ok(row)
    }

    pub fn empty(tag: TeamTag, updated_at: MonotonicTimeNs) -> Self {
        Self {
            tag,
            assignment: SlotAssignment::default(),
            updated_at,
        }
    }
}

impl Validate for RosterRow {
    fn validate(&self) -> Result<(), ContractViolation> {
        self.tag.validate()?;
        self.assignment.validate()?;
        if check_role_uniqueness(&self.assignment).is_err() {
            return Err(ContractViolation::InvalidValue {
                field: "roster_row.assignment",
                reason: "a person may hold only one role per team",
            });
        }
        Ok(())
    }
}

fn deserialize_provided<'de, D, T>(deserializer: D) -> Result<Option<Option<T>>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    Option::<T>::deserialize(deserializer).map(Some)
}

/// Payload of the `save_equipe` write procedure.
///
/// Each field is `None` when not provided (the stored value is kept) and
/// `Some(None)` when it must be cleared.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SaveSlotRequest {
    #[serde(rename = "p_tag")]
    pub tag: TeamTag,
    #[serde(
        rename = "p_conducteur",
        default,
        skip_serializing_if = "Option::is_none",
        deserialize_with = "deserialize_provided"
    )]
    pub conducteur: Option<Option<PersonId>>,
    #[serde(
        rename = "p_radio",
        default,
        skip_serializing_if = "Option::is_none",
        deserialize_with = "deserialize_provided"
    )]
    pub radio: Option<Option<PersonId>>,
    #[serde(
        rename = "p_coequipier1",
        default,
        skip_serializing_if = "Option::is_none",
        deserialize_with = "deserialize_provided"
    )]
    pub coequipier1: Option<Option<PersonId>>,
    #[serde(
        rename = "p_coequipier2",
        default,
        skip_serializing_if = "Option::is_none",
        deserialize_with = "deserialize_provided"
    )]
    pub coequipier2: Option<Option<PersonId>>,
    #[serde(
        rename = "p_vehicule",
        default,
        skip_serializing_if = "Option::is_none",
        deserialize_with = "deserialize_provided"
    )]
    pub vehicule: Option<Option<VehicleCode>>,
    #[serde(
        rename = "p_status",
        default,
        skip_serializing_if = "Option::is_none",
        deserialize_with = "deserialize_provided"
    )]
    pub status: Option<Option<StatusKey>>,
    #[serde(
        rename = "p_notes",
        default,
        skip_serializing_if = "Option::is_none",
        deserialize_with = "deserialize_provided"
    )]
    pub notes: Option<Option<String>>,
}

impl SaveSlotRequest {
    /// Request that writes every field of the slot.
    pub fn full(tag: TeamTag, assignment: &SlotAssignment) -> Result<Self, ContractViolation> {
        Self::for_fields(tag, assignment, &SlotField::ALL)
    }

    /// Request that writes only `fields`, taking their values from `assignment`.
    pub fn for_fields(
        tag: TeamTag,
        assignment: &SlotAssignment,
        fields: &[SlotField],
    ) -> Result<Self, ContractViolation> {
        let mut req = Self {
            tag,
            conducteur: None,
            radio: None,
            coequipier1: None,
            coequipier2: None,
            vehicule: None,
            status: None,
            notes: None,
        };
        for field in fields {
            match field {
                SlotField::Conducteur => req.conducteur = Some(assignment.conducteur.clone()),
                SlotField::Radio => req.radio = Some(assignment.radio.clone()),
                SlotField::Coequipier1 => req.coequipier1 = Some(assignment.coequipier1.clone()),
                SlotField::Coequipier2 => req.coequipier2 = Some(assignment.coequipier2.clone()),
                SlotField::Vehicule => req.vehicule = Some(assignment.vehicule.clone()),
                SlotField::Status => req.status = Some(assignment.status.clone()),
                SlotField::Notes => {
                    req.notes = Some(assignment.notes.clone().filter(|n| !n.is_empty()));
                }
            }
        }
        req.validate()?;
        Ok(req)
    }

    pub fn provided_fields(&self) -> Vec<SlotField> {
        SlotField::ALL
            .into_iter()
            .filter(|field| match field {
                SlotField::Conducteur => self.conducteur.is_some(),
                SlotField::Radio => self.radio.is_some(),
                SlotField::Coequipier1 => self.coequipier1.is_some(),
                SlotField::Coequipier2 => self.coequipier2.is_some(),
                SlotField::Vehicule => self.vehicule.is_some(),
                SlotField::Status => self.status.is_some(),
                SlotField::Notes => self.notes.is_some(),
            })
            .collect()
    }

    /// Writes the provided fields into `target`, leaving the others untouched.
    pub fn apply_to(&self, target: &mut SlotAssignment) {
        if let Some(v) = &self.conducteur {
            target.conducteur = v.clone();
        }
        if let Some(v) = &self.radio {
            target.radio = v.clone();
        }
        if let Some(v) = &self.coequipier1 {
            target.coequipier1 = v.clone();
        }
        if let Some(v) = &self.coequipier2 {
            target.coequipier2 = v.clone();
        }
        if let Some(v) = &self.vehicule {
            target.vehicule = v.clone();
        }
        if let Some(v) = &self.status {
            target.status = v.clone();
        }
        if let Some(v) = &self.notes {
            target.notes = v.clone().filter(|n| !n.is_empty());
        }
    }
}

impl Validate for SaveSlotRequest {
    fn validate(&self) -> Result<(), ContractViolation> {
        self.tag.validate()?;
        for person in [
            &self.conducteur,
            &self.radio,
            &self.coequipier1,
            &self.coequipier2,
        ]
        .into_iter()
        .flatten()
        .flatten()
        {
            person.validate()?;
        }
        if let Some(Some(vehicule)) = &self.vehicule {
            vehicule.validate()?;
        }
        if let Some(Some(status)) = &self.status {
            status.validate()?;
        }
        if let Some(Some(notes)) = &self.notes {
            validate_free_text("save_slot_request.notes", notes, NOTES_MAX_CHARS)?;
        }
        Ok(())
    }
}
