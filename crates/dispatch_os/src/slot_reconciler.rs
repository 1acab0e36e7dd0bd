#![forbid(unsafe_code)]

use std::sync::Arc;

use dispatch_storage::repo::RosterStore;
use dispatch_storage::roster::StorageError;
use tracing::{debug, warn};

use crate::board::{lock_board, CloseReason, ReconcileReport, SharedBoard, SnapshotApply};

#[derive(Debug, Clone, PartialEq)]
pub enum ReconcileOutcome {
    Applied(ReconcileReport),
    /// A newer fetch was applied first; this result was dropped.
    Stale { fetch_token: u64 },
    /// Fetch failed; rendered values were left as they were.
    Failed(StorageError),
    ViewClosed,
}

impl ReconcileOutcome {
    pub fn is_applied(&self) -> bool {
        matches!(self, ReconcileOutcome::Applied(_))
    }
}

/// Merges the store's current roster into the board under the edit-guard
/// rule.
pub struct SlotReconciler<S> {
    store: Arc<S>,
    board: SharedBoard,
}

impl<S> Clone for SlotReconciler<S> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
            board: Arc::clone(&self.board),
        }
    }
}

impl<S: RosterStore> SlotReconciler<S> {
    pub fn new(store: Arc<S>, board: SharedBoard) -> Self {
        Self { store, board }
    }

    pub fn board(&self) -> &SharedBoard {
        &self.board
    }

    pub async fn refresh_all(&self) -> ReconcileOutcome {
        let fetch_token = {
            let mut board = lock_board(&self.board);
            if !board.is_open() {
                return ReconcileOutcome::ViewClosed;
            }
            board.begin_reconcile()
        };

        let fetched = self.store.fetch_all().await;

        let mut board = lock_board(&self.board);
        match fetched {
            Ok(rows) => match board.apply_snapshot(fetch_token, &rows) {
                SnapshotApply::Applied(report) => {
                    debug!(
                        fetch_token,
                        rows = rows.len(),
                        preserved = report.preserved_fields.len(),
                        "roster reconciled"
                    );
                    for tag in &report.ignored_tags {
                        debug!(tag = %tag, "fetched row has no local slot");
                    }
                    ReconcileOutcome::Applied(report)
                }
                SnapshotApply::Stale {
                    fetch_token,
                    applied_token,
                } => {
                    debug!(fetch_token, applied_token, "stale roster fetch discarded");
                    ReconcileOutcome::Stale { fetch_token }
                }
                SnapshotApply::ViewClosed => ReconcileOutcome::ViewClosed,
            },
            Err(StorageError::Unauthorized) => {
                board.abort_reconcile(fetch_token);
                board.close(CloseReason::Unauthorized);
                warn!(fetch_token, "roster fetch unauthorized; closing view");
                ReconcileOutcome::Failed(StorageError::Unauthorized)
            }
            Err(err) => {
                board.abort_reconcile(fetch_token);
                warn!(fetch_token, error = %err, "roster fetch failed; keeping current view");
                ReconcileOutcome::Failed(err)
            }
        }
    }
}
