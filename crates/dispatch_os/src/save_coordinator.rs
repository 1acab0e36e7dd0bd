#![forbid(unsafe_code)]

use std::sync::Arc;

use dispatch_kernel_contracts::role_uniqueness::{enforce_role_uniqueness, RoleConflict};
use dispatch_kernel_contracts::roster::{RosterRow, SaveSlotRequest, SlotField, TeamTag};
use dispatch_kernel_contracts::MonotonicTimeNs;
use dispatch_storage::repo::RosterStore;
use dispatch_storage::roster::StorageError;
use tracing::{info, warn};

use crate::board::{lock_board, reason_codes, CloseReason, SharedBoard};
use crate::error::DispatchError;
use crate::slot_reconciler::{ReconcileOutcome, SlotReconciler};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SaveCoordinatorConfig {
    pub saved_affordance_ms: u64,
}

impl SaveCoordinatorConfig {
    pub fn mvp_v1() -> Self {
        Self {
            saved_affordance_ms: 1_000,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum SaveOutcome {
    Saved {
        row: RosterRow,
        reconcile: ReconcileOutcome,
    },
    /// Duplicate person found before the write; the store was not called.
    RejectedLocally(Vec<RoleConflict>),
    /// The store refused or could not be reached; local edits are kept.
    Failed(StorageError),
}

pub struct SaveCoordinator<S> {
    store: Arc<S>,
    board: SharedBoard,
    reconciler: SlotReconciler<S>,
    config: SaveCoordinatorConfig,
}

impl<S: RosterStore> SaveCoordinator<S> {
    pub fn new(reconciler: SlotReconciler<S>, store: Arc<S>, config: SaveCoordinatorConfig) -> Self {
        Self {
            board: Arc::clone(reconciler.board()),
            store,
            reconciler,
            config,
        }
    }

    pub async fn commit(
        &self,
        tag: &TeamTag,
        now: MonotonicTimeNs,
    ) -> Result<SaveOutcome, DispatchError> {
        let (request, sent_values, sent_fields) = {
            let mut board = lock_board(&self.board);
            board.ensure_open()?;
            let slot = board.slot(tag)?;
            let values = slot.values.clone();
            let dirty = slot.dirty_fields();

            let conflicts = enforce_role_uniqueness(&mut values.clone());
            if !conflicts.is_empty() {
                for conflict in &conflicts {
                    board.reject_conflict(tag, conflict)?;
                }
                info!(tag = %tag, conflicts = conflicts.len(), "save rejected locally");
                return Ok(SaveOutcome::RejectedLocally(conflicts));
            }

            let fields: Vec<SlotField> = if dirty.is_empty() {
                SlotField::ALL.to_vec()
            } else {
                dirty
            };
            let request = SaveSlotRequest::for_fields(tag.clone(), &values, &fields)?;
            (request, values, fields)
        };

        match self.store.save(&request).await {
            Ok(row) => {
                {
                    let mut board = lock_board(&self.board);
                    if board.is_open() {
                        board.mark_saved(
                            tag,
                            &sent_fields,
                            &sent_values,
                            now.saturating_add_ms(self.config.saved_affordance_ms),
                        )?;
                    }
                }
                info!(tag = %tag, fields = sent_fields.len(), "slot saved");
                let reconcile = self.reconciler.refresh_all().await;
                Ok(SaveOutcome::Saved { row, reconcile })
            }
            Err(err) => {
                let mut board = lock_board(&self.board);
                let code = if err == StorageError::Unauthorized {
                    reason_codes::DISPATCH_SAVE_UNAUTHORIZED
                } else {
                    reason_codes::DISPATCH_SAVE_FAILED
                };
                board.push_alert(tag, code, format!("Error: {err}"));
                if err == StorageError::Unauthorized {
                    board.close(CloseReason::Unauthorized);
                }
                warn!(tag = %tag, error = %err, "slot save failed");
                Ok(SaveOutcome::Failed(err))
            }
        }
    }

    /// Empties the slot locally. The store is written on the next commit.
    pub fn clear(&self, tag: &TeamTag) -> Result<(), DispatchError> {
        lock_board(&self.board).clear_slot(tag)
    }
}
