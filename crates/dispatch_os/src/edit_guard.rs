#![forbid(unsafe_code)]

use std::collections::BTreeSet;

use dispatch_kernel_contracts::roster::{SlotField, TeamTag};

/// Which input fields of the open view currently hold user focus.
///
/// Owned by the view's board; cleared when the view is torn down so no field
/// outlives its element.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EditGuard {
    focused: BTreeSet<(TeamTag, SlotField)>,
}

impl EditGuard {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn mark_focused(&mut self, tag: &TeamTag, field: SlotField) {
        self.focused.insert((tag.clone(), field));
    }

    pub fn mark_blurred(&mut self, tag: &TeamTag, field: SlotField) {
        self.focused.remove(&(tag.clone(), field));
    }

    pub fn is_focused(&self, tag: &TeamTag, field: SlotField) -> bool {
        self.focused.contains(&(tag.clone(), field))
    }

    pub fn focused_in(&self, tag: &TeamTag) -> Vec<SlotField> {
        self.focused
            .iter()
            .filter(|(t, _)| t == tag)
            .map(|(_, field)| *field)
            .collect()
    }

    pub fn focused_fields(&self) -> impl Iterator<Item = (&TeamTag, SlotField)> {
        self.focused.iter().map(|(tag, field)| (tag, *field))
    }

    pub fn is_empty(&self) -> bool {
        self.focused.is_empty()
    }

    pub fn clear(&mut self) {
        self.focused.clear();
    }
}
