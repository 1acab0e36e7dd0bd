#![forbid(unsafe_code)]

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::roster::{PersonId, SlotAssignment, SlotField};

pub const ROLE_CONFLICT_MESSAGE: &str = "The same person cannot hold two roles in the same team.";

/// A person seen in two role fields of one slot. `offending` is the later
/// field in evaluation order and is the one that gets cleared.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoleConflict {
    pub kept: SlotField,
    pub offending: SlotField,
    pub person_id: PersonId,
}

impl fmt::Display for RoleConflict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} already holds {}; {} rejected",
            self.person_id.as_str(),
            self.kept,
            self.offending
        )
    }
}

/// Returns the first duplicate person among the role fields, evaluated in
/// `SlotField::PERSON_ROLES` order.
pub fn check_role_uniqueness(assignment: &SlotAssignment) -> Result<(), RoleConflict> {
    let mut seen: BTreeMap<&PersonId, SlotField> = BTreeMap::new();
    for field in SlotField::PERSON_ROLES {
        let Some(person_id) = assignment.person(field) else {
            continue;
        };
        if let Some(kept) = seen.get(person_id) {
            return Err(RoleConflict {
                kept: *kept,
                offending: field,
                person_id: person_id.clone(),
            });
        }
        seen.insert(person_id, field);
    }
    Ok(())
}

/// Clears every role field that repeats a person already seen earlier in
/// evaluation order. Returns the conflicts that were resolved, in order.
pub fn enforce_role_uniqueness(assignment: &mut SlotAssignment) -> Vec<RoleConflict> {
    let mut conflicts = Vec::new();
    while let Err(conflict) = check_role_uniqueness(assignment) {
        assignment.clear_field(conflict.offending);
        conflicts.push(conflict);
    }
    conflicts
}
