#![forbid(unsafe_code)]

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard};
use std::time::{SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use dispatch_kernel_contracts::role_uniqueness::check_role_uniqueness;
use dispatch_kernel_contracts::roster::{
    default_team_tags, roster_order, RosterRow, SaveSlotRequest, TeamTag,
};
use dispatch_kernel_contracts::{ContractViolation, MonotonicTimeNs, Validate};
use tokio::sync::broadcast;
use tracing::debug;

use crate::feed::{ChangeFeedSubscription, RosterChanged};
use crate::repo::RosterStore;

pub const CHANGE_FEED_CAPACITY: usize = 64;

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum StorageError {
    #[error("store unavailable: {0}")]
    StoreUnavailable(String),
    #[error("write rejected: {0}")]
    ValidationRejected(String),
    #[error("not authorized")]
    Unauthorized,
    #[error("contract violation: {0}")]
    ContractViolation(ContractViolation),
}

impl From<ContractViolation> for StorageError {
    fn from(v: ContractViolation) -> Self {
        StorageError::ContractViolation(v)
    }
}

#[derive(Debug)]
struct RosterTable {
    rows: BTreeMap<TeamTag, RosterRow>,
    last_write_at: MonotonicTimeNs,
    write_count: u64,
}

/// In-process roster table with per-slot atomic writes and a broadcast
/// change feed.
#[derive(Debug)]
pub struct InMemoryRosterStore {
    table: Mutex<RosterTable>,
    feed: Mutex<broadcast::Sender<RosterChanged>>,
    unavailable: AtomicBool,
    unauthorized: AtomicBool,
}

impl InMemoryRosterStore {
    /// One empty row per configured tag. Rows are never added or removed
    /// afterwards.
    pub fn new_in_memory(tags: &[TeamTag]) -> Self {
        let rows = tags
            .iter()
            .map(|tag| {
                (
                    tag.clone(),
                    RosterRow::empty(tag.clone(), MonotonicTimeNs(0)),
                )
            })
            .collect();
        let (tx, _) = broadcast::channel(CHANGE_FEED_CAPACITY);
        Self {
            table: Mutex::new(RosterTable {
                rows,
                last_write_at: MonotonicTimeNs(0),
                write_count: 0,
            }),
            feed: Mutex::new(tx),
            unavailable: AtomicBool::new(false),
            unauthorized: AtomicBool::new(false),
        }
    }

    pub fn with_default_tags() -> Self {
        Self::new_in_memory(&default_team_tags())
    }

    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    pub fn set_unauthorized(&self, unauthorized: bool) {
        self.unauthorized.store(unauthorized, Ordering::SeqCst);
    }

    /// Drops the feed channel: live subscriptions observe closure, later
    /// subscriptions attach to a fresh channel.
    pub fn close_feed(&self) {
        let (tx, _) = broadcast::channel(CHANGE_FEED_CAPACITY);
        *lock(&self.feed) = tx;
    }

    pub fn write_count(&self) -> u64 {
        lock(&self.table).write_count
    }

    pub fn subscriber_count(&self) -> usize {
        lock(&self.feed).receiver_count()
    }

    pub fn row(&self, tag: &TeamTag) -> Option<RosterRow> {
        lock(&self.table).rows.get(tag).cloned()
    }

    fn check_access(&self) -> Result<(), StorageError> {
        if self.unauthorized.load(Ordering::SeqCst) {
            return Err(StorageError::Unauthorized);
        }
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(StorageError::StoreUnavailable(
                "roster table unreachable".to_string(),
            ));
        }
        Ok(())
    }

    fn commit_slot(&self, request: &SaveSlotRequest) -> Result<RosterRow, StorageError> {
        request
            .validate()
            .map_err(|v| StorageError::ValidationRejected(v.to_string()))?;

        let mut table = lock(&self.table);
        let Some(current) = table.rows.get(&request.tag) else {
            return Err(StorageError::ValidationRejected(format!(
                "unknown team tag {}",
                request.tag
            )));
        };

        // A rejected write leaves the stored row untouched.
        let mut assignment = current.assignment.clone();
        request.apply_to(&mut assignment);
        if let Err(conflict) = check_role_uniqueness(&assignment) {
            return Err(StorageError::ValidationRejected(conflict.to_string()));
        }

        let updated_at = next_write_stamp(table.last_write_at, wall_clock_ns());
        let row = RosterRow::v1(request.tag.clone(), assignment, updated_at)?;
        table.rows.insert(row.tag.clone(), row.clone());
        table.last_write_at = updated_at;
        table.write_count += 1;
        Ok(row)
    }

    fn notify(&self) {
        // No live subscriber is not an error for the writer.
        let _ = lock(&self.feed).send(RosterChanged);
    }
}

#[async_trait]
impl RosterStore for InMemoryRosterStore {
    async fn fetch_all(&self) -> Result<Vec<RosterRow>, StorageError> {
        self.check_access()?;
        let mut rows: Vec<RosterRow> = lock(&self.table).rows.values().cloned().collect();
        rows.sort_by(|a, b| roster_order(&a.tag, &b.tag));
        Ok(rows)
    }

    async fn save(&self, request: &SaveSlotRequest) -> Result<RosterRow, StorageError> {
        self.check_access()?;
        let row = self.commit_slot(request)?;
        debug!(
            tag = %row.tag,
            fields = request.provided_fields().len(),
            updated_at = row.updated_at.0,
            "roster slot committed"
        );
        self.notify();
        Ok(row)
    }

    fn subscribe(&self) -> Result<ChangeFeedSubscription, StorageError> {
        self.check_access()?;
        Ok(ChangeFeedSubscription::from_receiver(
            lock(&self.feed).subscribe(),
        ))
    }
}

/// Rows are replaced whole, so a poisoned table is still consistent.
fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Strictly after the previous write unless the previous stamp is already
/// `u64::MAX`.
fn next_write_stamp(last: MonotonicTimeNs, now_ns: u64) -> MonotonicTimeNs {
    MonotonicTimeNs(now_ns.max(last.0.saturating_add(1)))
}

fn wall_clock_ns() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| u64::try_from(d.as_nanos()).unwrap_or(u64::MAX))
        .unwrap_or(0)
}
