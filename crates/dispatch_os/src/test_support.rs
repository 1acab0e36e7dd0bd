use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use dispatch_kernel_contracts::reference::ReferenceOption;
use dispatch_kernel_contracts::roster::{
    PersonId, RosterRow, SaveSlotRequest, SlotAssignment, StatusKey, TeamTag, VehicleCode,
};
use dispatch_kernel_contracts::MonotonicTimeNs;
use dispatch_storage::collaborators::{InMemoryReferenceCatalog, PersonEntry};
use dispatch_storage::feed::ChangeFeedSubscription;
use dispatch_storage::repo::RosterStore;
use dispatch_storage::roster::{InMemoryRosterStore, StorageError};

use crate::board::ReferenceSnapshot;

pub fn tag(v: &str) -> TeamTag {
    TeamTag::new(v).unwrap()
}

pub fn person(v: &str) -> PersonId {
    PersonId::new(v).unwrap()
}

pub fn vehicle(v: &str) -> VehicleCode {
    VehicleCode::new(v).unwrap()
}

pub fn status(v: &str) -> StatusKey {
    StatusKey::new(v).unwrap()
}

pub fn row(t: &str, fill: impl FnOnce(&mut SlotAssignment)) -> RosterRow {
    let mut r = RosterRow::empty(tag(t), MonotonicTimeNs(1));
    fill(&mut r.assignment);
    r
}

pub fn references() -> ReferenceSnapshot {
    ReferenceSnapshot {
        persons: vec![
            ReferenceOption::v1("P1", "Alpha").unwrap(),
            ReferenceOption::v1("P2", "Bravo").unwrap(),
            ReferenceOption::v1("P3", "Charlie").unwrap(),
        ],
        vehicles: vec![ReferenceOption::v1("V-1", "Sedan").unwrap()],
        statuses: vec![
            ReferenceOption::v1("DISPO", "Available").unwrap(),
            ReferenceOption::v1("PATROL", "On patrol").unwrap(),
        ],
    }
}

pub fn catalog() -> InMemoryReferenceCatalog {
    let refs = references();
    InMemoryReferenceCatalog::new(
        refs.persons
            .into_iter()
            .map(|option| PersonEntry {
                option,
                active: true,
            })
            .collect(),
        refs.vehicles,
        refs.statuses,
    )
}

pub async fn save_full<S: RosterStore>(store: &S, t: &str, assignment: SlotAssignment) -> RosterRow {
    store
        .save(&SaveSlotRequest::full(tag(t), &assignment).unwrap())
        .await
        .unwrap()
}

/// In-memory store with call counters, scripted fetch latency and scripted
/// subscribe failures.
#[derive(Debug)]
pub struct ScriptedStore {
    inner: InMemoryRosterStore,
    fetches: AtomicUsize,
    saves: AtomicUsize,
    subscribes: AtomicUsize,
    fetch_delays: Mutex<VecDeque<Duration>>,
    subscribe_failures: AtomicUsize,
}

impl ScriptedStore {
    pub fn with_tags(tags: &[&str]) -> Self {
        let tags: Vec<TeamTag> = tags.iter().map(|t| tag(t)).collect();
        Self {
            inner: InMemoryRosterStore::new_in_memory(&tags),
            fetches: AtomicUsize::new(0),
            saves: AtomicUsize::new(0),
            subscribes: AtomicUsize::new(0),
            fetch_delays: Mutex::new(VecDeque::new()),
            subscribe_failures: AtomicUsize::new(0),
        }
    }

    pub fn inner(&self) -> &InMemoryRosterStore {
        &self.inner
    }

    pub fn fetch_count(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }

    pub fn save_count(&self) -> usize {
        self.saves.load(Ordering::SeqCst)
    }

    pub fn subscribe_count(&self) -> usize {
        self.subscribes.load(Ordering::SeqCst)
    }

    /// The next fetch reads the table immediately but returns only after
    /// `delay`.
    pub fn push_fetch_delay(&self, delay: Duration) {
        self.fetch_delays.lock().unwrap().push_back(delay);
    }

    pub fn fail_next_subscribes(&self, n: usize) {
        self.subscribe_failures.store(n, Ordering::SeqCst);
    }
}

#[async_trait]
impl RosterStore for ScriptedStore {
    async fn fetch_all(&self) -> Result<Vec<RosterRow>, StorageError> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        let delay = self.fetch_delays.lock().unwrap().pop_front();
        let rows = self.inner.fetch_all().await;
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        rows
    }

    async fn save(&self, request: &SaveSlotRequest) -> Result<RosterRow, StorageError> {
        self.saves.fetch_add(1, Ordering::SeqCst);
        self.inner.save(request).await
    }

    fn subscribe(&self) -> Result<ChangeFeedSubscription, StorageError> {
        self.subscribes.fetch_add(1, Ordering::SeqCst);
        let failing = self
            .subscribe_failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            return Err(StorageError::StoreUnavailable(
                "change feed unreachable".to_string(),
            ));
        }
        self.inner.subscribe()
    }
}

/// Polls `cond` until it holds, yielding to spawned tasks in between.
pub async fn eventually(mut cond: impl FnMut() -> bool) {
    for _ in 0..500 {
        if cond() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("condition not reached");
}
