#![forbid(unsafe_code)]

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use dispatch_storage::feed::{ChangeFeedSubscription, FeedClosed};
use dispatch_storage::repo::RosterStore;
use dispatch_storage::roster::StorageError;
use serde::Serialize;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::board::{lock_board, CloseReason};
use crate::slot_reconciler::{ReconcileOutcome, SlotReconciler};

pub const DEBOUNCE_MS_MAX: u64 = 5_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChangeFeedConfig {
    /// Quiet window after a signal before the refresh runs; 0 refreshes at once.
    pub debounce_ms: u64,
    pub reconnect_initial_ms: u64,
    pub reconnect_max_ms: u64,
}

impl ChangeFeedConfig {
    pub fn mvp_v1() -> Self {
        Self {
            debounce_ms: 0,
            reconnect_initial_ms: 250,
            reconnect_max_ms: 10_000,
        }
    }

    /// Never zero, so a closed feed cannot spin on `subscribe`.
    fn initial_backoff_ms(&self) -> u64 {
        self.reconnect_initial_ms.clamp(1, self.reconnect_max_ms.max(1))
    }

    fn next_backoff_ms(&self, current_ms: u64) -> u64 {
        current_ms
            .max(1)
            .saturating_mul(2)
            .min(self.reconnect_max_ms.max(1))
    }
}

#[derive(Debug, Default)]
struct ListenerCounters {
    signals: AtomicU64,
    coalesced: AtomicU64,
    refreshes: AtomicU64,
    reconnects: AtomicU64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ListenerStats {
    pub signals: u64,
    /// Signals folded into an earlier refresh.
    pub coalesced: u64,
    pub refreshes: u64,
    pub reconnects: u64,
}

/// Owns the spawned listener task. Dropping the handle stops the listener.
#[derive(Debug)]
pub struct ChangeFeedHandle {
    task: JoinHandle<()>,
    counters: Arc<ListenerCounters>,
}

impl ChangeFeedHandle {
    pub fn stats(&self) -> ListenerStats {
        ListenerStats {
            signals: self.counters.signals.load(Ordering::SeqCst),
            coalesced: self.counters.coalesced.load(Ordering::SeqCst),
            refreshes: self.counters.refreshes.load(Ordering::SeqCst),
            reconnects: self.counters.reconnects.load(Ordering::SeqCst),
        }
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    pub fn stop(&self) {
        self.task.abort();
    }
}

impl Drop for ChangeFeedHandle {
    fn drop(&mut self) {
        self.task.abort();
    }
}

/// Turns change-feed signals into reconcile cycles for one view.
pub struct ChangeFeedListener<S> {
    store: Arc<S>,
    reconciler: SlotReconciler<S>,
    config: ChangeFeedConfig,
    counters: Arc<ListenerCounters>,
}

impl<S: RosterStore + 'static> ChangeFeedListener<S> {
    /// Spawns the listener. Without a subscription it starts in the
    /// reconnect loop.
    pub fn spawn(
        store: Arc<S>,
        subscription: Option<ChangeFeedSubscription>,
        reconciler: SlotReconciler<S>,
        config: ChangeFeedConfig,
    ) -> ChangeFeedHandle {
        let counters = Arc::new(ListenerCounters::default());
        let listener = Self {
            store,
            reconciler,
            config,
            counters: Arc::clone(&counters),
        };
        let task = tokio::spawn(listener.run(subscription));
        ChangeFeedHandle { task, counters }
    }

    async fn run(self, mut subscription: Option<ChangeFeedSubscription>) {
        loop {
            let mut active = match subscription.take() {
                Some(active) => active,
                None => match self.resubscribe().await {
                    Some(fresh) => {
                        if !self.refresh().await {
                            return;
                        }
                        fresh
                    }
                    None => return,
                },
            };

            match active.changed().await {
                Ok(()) => {
                    self.counters.signals.fetch_add(1, Ordering::SeqCst);
                    if self.config.debounce_ms > 0 {
                        tokio::time::sleep(Duration::from_millis(self.config.debounce_ms)).await;
                    }
                    let folded = active.drain_pending() as u64;
                    if folded > 0 {
                        self.counters.signals.fetch_add(folded, Ordering::SeqCst);
                        self.counters.coalesced.fetch_add(folded, Ordering::SeqCst);
                        debug!(folded, "change signals coalesced");
                    }
                    subscription = Some(active);
                    if !self.refresh().await {
                        return;
                    }
                }
                Err(FeedClosed) => {
                    warn!("roster change feed closed; resubscribing");
                }
            }
        }
    }

    /// Returns false once the view can no longer be refreshed.
    async fn refresh(&self) -> bool {
        self.counters.refreshes.fetch_add(1, Ordering::SeqCst);
        match self.reconciler.refresh_all().await {
            ReconcileOutcome::ViewClosed | ReconcileOutcome::Failed(StorageError::Unauthorized) => {
                info!("dispatch view closed; change feed listener stopping");
                false
            }
            _ => true,
        }
    }

    async fn resubscribe(&self) -> Option<ChangeFeedSubscription> {
        let mut backoff_ms = self.config.initial_backoff_ms();
        loop {
            let open = lock_board(self.reconciler.board()).is_open();
            if !open {
                return None;
            }
            tokio::time::sleep(Duration::from_millis(backoff_ms)).await;
            match self.store.subscribe() {
                Ok(fresh) => {
                    self.counters.reconnects.fetch_add(1, Ordering::SeqCst);
                    info!(backoff_ms, "roster change feed resubscribed");
                    return Some(fresh);
                }
                Err(StorageError::Unauthorized) => {
                    lock_board(self.reconciler.board()).close(CloseReason::Unauthorized);
                    warn!("change feed subscribe unauthorized; closing view");
                    return None;
                }
                Err(err) => {
                    warn!(backoff_ms, error = %err, "change feed subscribe failed");
                    backoff_ms = self.config.next_backoff_ms(backoff_ms);
                }
            }
        }
    }
}
