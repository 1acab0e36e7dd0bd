#![forbid(unsafe_code)]

use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, Mutex, MutexGuard};

use dispatch_kernel_contracts::reference::{
    label_for, select_options, status_class, ReferenceKind, ReferenceOption, SelectOption,
    StatusClass,
};
use dispatch_kernel_contracts::role_uniqueness::{
    enforce_role_uniqueness, RoleConflict, ROLE_CONFLICT_MESSAGE,
};
use dispatch_kernel_contracts::roster::{
    roster_order, FieldValue, PersonId, RosterRow, SlotAssignment, SlotField, StatusKey, TeamTag,
};
use dispatch_kernel_contracts::{MonotonicTimeNs, ReasonCodeId};
use serde::Serialize;

use crate::edit_guard::EditGuard;
use crate::error::DispatchError;

pub mod reason_codes {
    use dispatch_kernel_contracts::ReasonCodeId;

    pub const DISPATCH_ROLE_CONFLICT: ReasonCodeId = ReasonCodeId(0x4450_0001);
    pub const DISPATCH_SAVE_FAILED: ReasonCodeId = ReasonCodeId(0x4450_0002);
    pub const DISPATCH_SAVE_UNAUTHORIZED: ReasonCodeId = ReasonCodeId(0x4450_0003);
}

/// Board state shared between user handlers, the reconciler and the feed
/// listener. Never held across an `.await`.
pub type SharedBoard = Arc<Mutex<DispatchBoard>>;

/// A panic inside a board mutation leaves whole-field values behind, so the
/// state stays usable.
pub fn lock_board(board: &SharedBoard) -> MutexGuard<'_, DispatchBoard> {
    board
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SlotPhase {
    Idle,
    Reconciling,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SaveButtonLabel {
    Ready,
    Saved,
}

impl SaveButtonLabel {
    pub fn as_str(self) -> &'static str {
        match self {
            SaveButtonLabel::Ready => "OK",
            SaveButtonLabel::Saved => "Saved ✓",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum NoticeKind {
    /// Shown next to the slot, non-blocking.
    Inline,
    /// Blocking alert.
    Alert,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Notice {
    pub kind: NoticeKind,
    pub tag: TeamTag,
    pub field: Option<SlotField>,
    pub reason_code: ReasonCodeId,
    pub message: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CloseReason {
    Unmounted,
    Unauthorized,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case", tag = "state", content = "reason")]
pub enum ViewStatus {
    Open,
    Closed(CloseReason),
}

/// Reference catalogs as loaded when the view opened.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReferenceSnapshot {
    pub persons: Vec<ReferenceOption>,
    pub vehicles: Vec<ReferenceOption>,
    pub statuses: Vec<ReferenceOption>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BoardOptions {
    pub persons: Vec<SelectOption>,
    pub vehicles: Vec<SelectOption>,
    pub statuses: Vec<SelectOption>,
}

impl BoardOptions {
    fn from_references(refs: &ReferenceSnapshot) -> Self {
        Self {
            persons: select_options(ReferenceKind::Person, &refs.persons),
            vehicles: select_options(ReferenceKind::Vehicle, &refs.vehicles),
            statuses: select_options(ReferenceKind::Status, &refs.statuses),
        }
    }
}

/// Read-only card of one fetched row with resolved labels.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OrgCard {
    pub tag: TeamTag,
    pub status: Option<StatusKey>,
    pub status_label: Option<String>,
    pub status_class: StatusClass,
    pub conducteur: Option<String>,
    pub radio: Option<String>,
    pub coequipier1: Option<String>,
    pub coequipier2: Option<String>,
    pub vehicule: Option<String>,
    pub notes: Option<String>,
    pub updated_at: MonotonicTimeNs,
}

impl OrgCard {
    fn from_row(row: &RosterRow, refs: &ReferenceSnapshot) -> Self {
        let person = |p: &Option<PersonId>| {
            p.as_ref().map(|id| {
                label_for(&refs.persons, id.as_str())
                    .unwrap_or(id.as_str())
                    .to_string()
            })
        };
        let a = &row.assignment;
        Self {
            tag: row.tag.clone(),
            status: a.status.clone(),
            status_label: a.status.as_ref().map(|key| {
                label_for(&refs.statuses, key.as_str())
                    .unwrap_or(key.as_str())
                    .to_string()
            }),
            status_class: status_class(a.status.as_ref()),
            conducteur: person(&a.conducteur),
            radio: person(&a.radio),
            coequipier1: person(&a.coequipier1),
            coequipier2: person(&a.coequipier2),
            vehicule: a
                .vehicule
                .as_ref()
                .map(|code| match label_for(&refs.vehicles, code.as_str()) {
                    Some(model) => format!("{} {}", code.as_str(), model),
                    None => code.as_str().to_string(),
                }),
            notes: a.notes.clone(),
            updated_at: row.updated_at,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SlotViewState {
    pub tag: TeamTag,
    pub values: SlotAssignment,
    pub phase: SlotPhase,
    dirty: BTreeSet<SlotField>,
    saved_until: Option<MonotonicTimeNs>,
}

impl SlotViewState {
    fn new(tag: TeamTag) -> Self {
        Self {
            tag,
            values: SlotAssignment::default(),
            phase: SlotPhase::Idle,
            dirty: BTreeSet::new(),
            saved_until: None,
        }
    }

    pub fn dirty_fields(&self) -> Vec<SlotField> {
        self.dirty.iter().copied().collect()
    }

    pub fn is_dirty(&self, field: SlotField) -> bool {
        self.dirty.contains(&field)
    }

    pub fn save_label(&self, now: MonotonicTimeNs) -> SaveButtonLabel {
        match self.saved_until {
            Some(until) if now < until => SaveButtonLabel::Saved,
            _ => SaveButtonLabel::Ready,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldChange {
    /// The requested value is what the slot now holds.
    pub accepted: bool,
    pub conflicts: Vec<RoleConflict>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconcileReport {
    pub fetch_token: u64,
    pub applied_tags: Vec<TeamTag>,
    pub preserved_fields: Vec<(TeamTag, SlotField)>,
    pub ignored_tags: Vec<TeamTag>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SnapshotApply {
    Applied(ReconcileReport),
    Stale { fetch_token: u64, applied_token: u64 },
    ViewClosed,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SlotSnapshot {
    pub tag: TeamTag,
    pub values: SlotAssignment,
    pub focused: Vec<SlotField>,
    pub dirty: Vec<SlotField>,
    pub phase: SlotPhase,
    pub save_label: SaveButtonLabel,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BoardSnapshot {
    pub status: ViewStatus,
    pub slots: Vec<SlotSnapshot>,
    pub org_cards: Vec<OrgCard>,
    pub options: BoardOptions,
}

/// In-memory state of one open dispatch view: an editable slot per configured
/// tag, the edit guard, the org-card projection and pending notices.
#[derive(Debug)]
pub struct DispatchBoard {
    tags: Vec<TeamTag>,
    slots: BTreeMap<TeamTag, SlotViewState>,
    guard: EditGuard,
    references: ReferenceSnapshot,
    options: BoardOptions,
    org_cards: Vec<OrgCard>,
    notices: Vec<Notice>,
    status: ViewStatus,
    next_fetch_token: u64,
    applied_fetch_token: u64,
    fetches_in_flight: usize,
}

impl DispatchBoard {
    pub fn new(tags: Vec<TeamTag>, references: ReferenceSnapshot) -> Result<Self, DispatchError> {
        let mut slots = BTreeMap::new();
        for tag in &tags {
            if slots
                .insert(tag.clone(), SlotViewState::new(tag.clone()))
                .is_some()
            {
                return Err(DispatchError::DuplicateTag(tag.clone()));
            }
        }
        let options = BoardOptions::from_references(&references);
        Ok(Self {
            tags,
            slots,
            guard: EditGuard::new(),
            references,
            options,
            org_cards: Vec::new(),
            notices: Vec::new(),
            status: ViewStatus::Open,
            next_fetch_token: 0,
            applied_fetch_token: 0,
            fetches_in_flight: 0,
        })
    }

    pub fn into_shared(self) -> SharedBoard {
        Arc::new(Mutex::new(self))
    }

    pub fn status(&self) -> ViewStatus {
        self.status
    }

    pub fn is_open(&self) -> bool {
        self.status == ViewStatus::Open
    }

    pub fn ensure_open(&self) -> Result<(), DispatchError> {
        match self.status {
            ViewStatus::Open => Ok(()),
            ViewStatus::Closed(CloseReason::Unauthorized) => Err(DispatchError::Unauthorized),
            ViewStatus::Closed(CloseReason::Unmounted) => Err(DispatchError::ViewClosed),
        }
    }

    pub fn tags(&self) -> &[TeamTag] {
        &self.tags
    }

    pub fn slot(&self, tag: &TeamTag) -> Result<&SlotViewState, DispatchError> {
        self.slots
            .get(tag)
            .ok_or_else(|| DispatchError::UnknownTag(tag.clone()))
    }

    fn slot_mut(&mut self, tag: &TeamTag) -> Result<&mut SlotViewState, DispatchError> {
        self.slots
            .get_mut(tag)
            .ok_or_else(|| DispatchError::UnknownTag(tag.clone()))
    }

    pub fn values(&self, tag: &TeamTag) -> Result<&SlotAssignment, DispatchError> {
        Ok(&self.slot(tag)?.values)
    }

    pub fn edit_guard(&self) -> &EditGuard {
        &self.guard
    }

    pub fn focus(&mut self, tag: &TeamTag, field: SlotField) -> Result<(), DispatchError> {
        self.ensure_open()?;
        self.slot(tag)?;
        self.guard.mark_focused(tag, field);
        Ok(())
    }

    pub fn blur(&mut self, tag: &TeamTag, field: SlotField) {
        self.guard.mark_blurred(tag, field);
    }

    pub fn is_focused(&self, tag: &TeamTag, field: SlotField) -> bool {
        self.guard.is_focused(tag, field)
    }

    /// Local edit of one field. Role uniqueness is enforced on a candidate
    /// before anything is stored, so a duplicate never becomes visible.
    pub fn set_field(
        &mut self,
        tag: &TeamTag,
        field: SlotField,
        value: FieldValue,
    ) -> Result<FieldChange, DispatchError> {
        self.ensure_open()?;
        let slot = self.slot_mut(tag)?;
        let mut candidate = slot.values.clone();
        candidate.set(field, value.clone())?;
        let conflicts = enforce_role_uniqueness(&mut candidate);

        for f in SlotField::ALL {
            if candidate.get(f) != slot.values.get(f) {
                slot.dirty.insert(f);
            }
        }
        slot.values = candidate;
        let accepted = slot.values.get(field) == normalized(field, value);

        for conflict in &conflicts {
            self.notices.push(Notice {
                kind: NoticeKind::Inline,
                tag: tag.clone(),
                field: Some(conflict.offending),
                reason_code: reason_codes::DISPATCH_ROLE_CONFLICT,
                message: ROLE_CONFLICT_MESSAGE.to_string(),
            });
        }
        Ok(FieldChange {
            accepted,
            conflicts,
        })
    }

    /// Empties every field of the slot locally; nothing is written until the
    /// slot is saved.
    pub fn clear_slot(&mut self, tag: &TeamTag) -> Result<(), DispatchError> {
        self.ensure_open()?;
        let slot = self.slot_mut(tag)?;
        slot.values = SlotAssignment::default();
        slot.dirty.extend(SlotField::ALL);
        Ok(())
    }

    /// Clears the offending field of a conflict found at commit time and
    /// raises the inline notice.
    pub fn reject_conflict(
        &mut self,
        tag: &TeamTag,
        conflict: &RoleConflict,
    ) -> Result<(), DispatchError> {
        let slot = self.slot_mut(tag)?;
        slot.values.clear_field(conflict.offending);
        slot.dirty.insert(conflict.offending);
        self.notices.push(Notice {
            kind: NoticeKind::Inline,
            tag: tag.clone(),
            field: Some(conflict.offending),
            reason_code: reason_codes::DISPATCH_ROLE_CONFLICT,
            message: ROLE_CONFLICT_MESSAGE.to_string(),
        });
        Ok(())
    }

    /// Records a committed write: sent fields still holding the sent value
    /// are clean again, and the saved label shows until `saved_until`.
    pub fn mark_saved(
        &mut self,
        tag: &TeamTag,
        sent_fields: &[SlotField],
        sent_values: &SlotAssignment,
        saved_until: MonotonicTimeNs,
    ) -> Result<(), DispatchError> {
        let slot = self.slot_mut(tag)?;
        for field in sent_fields {
            if slot.values.get(*field) == sent_values.get(*field) {
                slot.dirty.remove(field);
            }
        }
        slot.saved_until = Some(saved_until);
        Ok(())
    }

    pub fn push_alert(&mut self, tag: &TeamTag, reason_code: ReasonCodeId, message: String) {
        self.notices.push(Notice {
            kind: NoticeKind::Alert,
            tag: tag.clone(),
            field: None,
            reason_code,
            message,
        });
    }

    pub fn take_notices(&mut self) -> Vec<Notice> {
        std::mem::take(&mut self.notices)
    }

    /// Starts a reconcile cycle and returns its fetch token.
    pub fn begin_reconcile(&mut self) -> u64 {
        self.next_fetch_token += 1;
        self.fetches_in_flight += 1;
        for slot in self.slots.values_mut() {
            slot.phase = SlotPhase::Reconciling;
        }
        self.next_fetch_token
    }

    /// Ends a reconcile cycle without touching any value.
    pub fn abort_reconcile(&mut self, _fetch_token: u64) {
        self.finish_fetch();
    }

    /// Merges a fetched snapshot. Focus is read here, at apply time: focused
    /// fields keep the user's input, every other field takes the fetched
    /// value. A snapshot older than one already applied is discarded.
    pub fn apply_snapshot(&mut self, fetch_token: u64, rows: &[RosterRow]) -> SnapshotApply {
        self.finish_fetch();
        if !self.is_open() {
            return SnapshotApply::ViewClosed;
        }
        if fetch_token <= self.applied_fetch_token {
            return SnapshotApply::Stale {
                fetch_token,
                applied_token: self.applied_fetch_token,
            };
        }

        let mut report = ReconcileReport {
            fetch_token,
            ..ReconcileReport::default()
        };
        for row in rows {
            let Some(slot) = self.slots.get_mut(&row.tag) else {
                report.ignored_tags.push(row.tag.clone());
                continue;
            };
            for field in SlotField::ALL {
                if self.guard.is_focused(&row.tag, field) {
                    report.preserved_fields.push((row.tag.clone(), field));
                    continue;
                }
                slot.values.copy_field(field, &row.assignment);
                slot.dirty.remove(&field);
            }
            report.applied_tags.push(row.tag.clone());
        }

        let mut cards: Vec<OrgCard> = rows
            .iter()
            .map(|row| OrgCard::from_row(row, &self.references))
            .collect();
        cards.sort_by(|a, b| roster_order(&a.tag, &b.tag));
        self.org_cards = cards;
        self.applied_fetch_token = fetch_token;
        SnapshotApply::Applied(report)
    }

    fn finish_fetch(&mut self) {
        self.fetches_in_flight = self.fetches_in_flight.saturating_sub(1);
        if self.fetches_in_flight == 0 {
            for slot in self.slots.values_mut() {
                slot.phase = SlotPhase::Idle;
            }
        }
    }

    pub fn org_cards(&self) -> &[OrgCard] {
        &self.org_cards
    }

    pub fn options(&self) -> &BoardOptions {
        &self.options
    }

    /// View teardown: drops the slot mirror and every focus flag.
    pub fn close(&mut self, reason: CloseReason) {
        if let ViewStatus::Closed(_) = self.status {
            return;
        }
        self.status = ViewStatus::Closed(reason);
        self.guard.clear();
        self.slots.clear();
        self.org_cards.clear();
    }

    pub fn snapshot(&self, now: MonotonicTimeNs) -> BoardSnapshot {
        let slots = self
            .tags
            .iter()
            .filter_map(|tag| self.slots.get(tag))
            .map(|slot| SlotSnapshot {
                tag: slot.tag.clone(),
                values: slot.values.clone(),
                focused: self.guard.focused_in(&slot.tag),
                dirty: slot.dirty_fields(),
                phase: slot.phase,
                save_label: slot.save_label(now),
            })
            .collect();
        BoardSnapshot {
            status: self.status,
            slots,
            org_cards: self.org_cards.clone(),
            options: self.options.clone(),
        }
    }
}

fn normalized(field: SlotField, value: FieldValue) -> FieldValue {
    let mut scratch = SlotAssignment::default();
    match scratch.set(field, value) {
        Ok(()) => scratch.get(field),
        Err(_) => FieldValue::empty_for(field),
    }
}
