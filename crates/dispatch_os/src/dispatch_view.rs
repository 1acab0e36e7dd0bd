#![forbid(unsafe_code)]

use std::sync::Arc;

use dispatch_kernel_contracts::reference::ReferenceOption;
use dispatch_kernel_contracts::roster::{default_team_tags, FieldValue, SlotField, TeamTag};
use dispatch_kernel_contracts::session::DispatcherUser;
use dispatch_kernel_contracts::MonotonicTimeNs;
use dispatch_storage::repo::{ReferenceCatalog, RosterStore, SessionGate};
use dispatch_storage::roster::StorageError;
use tracing::{info, warn};

use crate::board::{
    lock_board, BoardSnapshot, CloseReason, DispatchBoard, FieldChange, Notice, ReferenceSnapshot,
    SharedBoard, ViewStatus,
};
use crate::change_feed::{ChangeFeedConfig, ChangeFeedHandle, ChangeFeedListener, ListenerStats};
use crate::error::DispatchError;
use crate::save_coordinator::{SaveCoordinator, SaveCoordinatorConfig, SaveOutcome};
use crate::slot_reconciler::{ReconcileOutcome, SlotReconciler};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DispatchViewConfig {
    pub tags: Vec<TeamTag>,
    pub saved_affordance_ms: u64,
    pub feed: ChangeFeedConfig,
}

impl DispatchViewConfig {
    pub fn mvp_v1() -> Self {
        Self {
            tags: default_team_tags(),
            saved_affordance_ms: SaveCoordinatorConfig::mvp_v1().saved_affordance_ms,
            feed: ChangeFeedConfig::mvp_v1(),
        }
    }
}

/// One dispatcher station's live board: local slot state kept in step with
/// the store through the change feed, with focused inputs left alone.
pub struct DispatchView<S: RosterStore + 'static> {
    user: DispatcherUser,
    board: SharedBoard,
    reconciler: SlotReconciler<S>,
    saver: SaveCoordinator<S>,
    listener: ChangeFeedHandle,
}

impl<S: RosterStore + 'static> DispatchView<S> {
    pub async fn open<C, G>(
        store: Arc<S>,
        catalog: &C,
        session: &G,
        config: DispatchViewConfig,
    ) -> Result<Self, DispatchError>
    where
        C: ReferenceCatalog + ?Sized,
        G: SessionGate + ?Sized,
    {
        let user = session.current_user().ok_or(DispatchError::Unauthorized)?;

        let (persons, vehicles, statuses) = tokio::join!(
            catalog.list_active_persons(),
            catalog.list_vehicles(),
            catalog.list_status_codes(),
        );
        let references = ReferenceSnapshot {
            persons: reference_list("persons", persons),
            vehicles: reference_list("vehicles", vehicles),
            statuses: reference_list("statuses", statuses),
        };

        let board = DispatchBoard::new(config.tags.clone(), references)?.into_shared();
        let reconciler = SlotReconciler::new(Arc::clone(&store), Arc::clone(&board));

        // Subscribe before the first fetch so no commit falls between them.
        let subscription = match store.subscribe() {
            Ok(subscription) => Some(subscription),
            Err(StorageError::Unauthorized) => return Err(DispatchError::Unauthorized),
            Err(err) => {
                warn!(error = %err, "change feed unavailable at open; will retry");
                None
            }
        };

        match reconciler.refresh_all().await {
            ReconcileOutcome::Failed(StorageError::Unauthorized) | ReconcileOutcome::ViewClosed => {
                return Err(DispatchError::Unauthorized)
            }
            _ => {}
        }

        let saver = SaveCoordinator::new(
            reconciler.clone(),
            Arc::clone(&store),
            SaveCoordinatorConfig {
                saved_affordance_ms: config.saved_affordance_ms,
            },
        );
        let listener =
            ChangeFeedListener::spawn(store, subscription, reconciler.clone(), config.feed);

        info!(user = user.display_name(), tags = config.tags.len(), "dispatch view opened");
        Ok(Self {
            user,
            board,
            reconciler,
            saver,
            listener,
        })
    }

    pub fn user(&self) -> &DispatcherUser {
        &self.user
    }

    pub fn status(&self) -> ViewStatus {
        lock_board(&self.board).status()
    }

    pub fn focus(&self, tag: &TeamTag, field: SlotField) -> Result<(), DispatchError> {
        lock_board(&self.board).focus(tag, field)
    }

    pub fn blur(&self, tag: &TeamTag, field: SlotField) {
        lock_board(&self.board).blur(tag, field);
    }

    pub fn set_field(
        &self,
        tag: &TeamTag,
        field: SlotField,
        value: FieldValue,
    ) -> Result<FieldChange, DispatchError> {
        lock_board(&self.board).set_field(tag, field, value)
    }

    /// Same as `set_field` for a raw select/textarea value; empty means unset.
    pub fn set_field_raw(
        &self,
        tag: &TeamTag,
        field: SlotField,
        raw: Option<&str>,
    ) -> Result<FieldChange, DispatchError> {
        self.set_field(tag, field, FieldValue::from_raw(field, raw)?)
    }

    pub fn clear(&self, tag: &TeamTag) -> Result<(), DispatchError> {
        self.saver.clear(tag)
    }

    pub async fn commit(
        &self,
        tag: &TeamTag,
        now: MonotonicTimeNs,
    ) -> Result<SaveOutcome, DispatchError> {
        self.saver.commit(tag, now).await
    }

    pub async fn refresh(&self) -> ReconcileOutcome {
        self.reconciler.refresh_all().await
    }

    pub fn snapshot(&self, now: MonotonicTimeNs) -> BoardSnapshot {
        lock_board(&self.board).snapshot(now)
    }

    pub fn take_notices(&self) -> Vec<Notice> {
        lock_board(&self.board).take_notices()
    }

    pub fn listener_stats(&self) -> ListenerStats {
        self.listener.stats()
    }

    pub fn close(&self) {
        lock_board(&self.board).close(CloseReason::Unmounted);
        self.listener.stop();
        info!(user = self.user.display_name(), "dispatch view closed");
    }
}

impl<S: RosterStore + 'static> Drop for DispatchView<S> {
    fn drop(&mut self) {
        lock_board(&self.board).close(CloseReason::Unmounted);
    }
}

fn reference_list(
    kind: &'static str,
    loaded: Result<Vec<ReferenceOption>, StorageError>,
) -> Vec<ReferenceOption> {
    loaded.unwrap_or_else(|err| {
        warn!(kind, error = %err, "reference list failed to load");
        Vec::new()
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::board::{NoticeKind, SaveButtonLabel};
    use crate::test_support::{catalog, eventually, person, save_full, tag, ScriptedStore};
    use dispatch_kernel_contracts::roster::SlotAssignment;
    use dispatch_storage::collaborators::StaticSessionGate;

    fn dispatcher() -> StaticSessionGate {
        StaticSessionGate::signed_in(
            DispatcherUser::v1("u-1", Some("desk1@dispatch.test".to_string())).unwrap(),
        )
    }

    async fn open(store: &Arc<ScriptedStore>) -> DispatchView<ScriptedStore> {
        DispatchView::open(
            Arc::clone(store),
            &catalog(),
            &dispatcher(),
            DispatchViewConfig::mvp_v1(),
        )
        .await
        .unwrap()
    }

    fn default_store() -> Arc<ScriptedStore> {
        Arc::new(ScriptedStore::with_tags(&[
            "LEAD", "ADAM 01", "ADAM 02", "ADAM 03", "ADAM 04", "ADAM 05", "ATR 17",
        ]))
    }

    fn conducteur(view: &DispatchView<ScriptedStore>, t: &str) -> Option<String> {
        let snap = view.snapshot(MonotonicTimeNs(0));
        snap.slots
            .iter()
            .find(|s| s.tag.as_str() == t)
            .and_then(|s| s.values.conducteur.as_ref().map(|p| p.as_str().to_string()))
    }

    #[tokio::test]
    async fn at_view_01_open_requires_signed_in_user() {
        let store = default_store();
        let out = DispatchView::open(
            Arc::clone(&store),
            &catalog(),
            &StaticSessionGate::signed_out(),
            DispatchViewConfig::mvp_v1(),
        )
        .await;
        assert!(matches!(out, Err(DispatchError::Unauthorized)));
        assert_eq!(store.fetch_count(), 0);
    }

    #[tokio::test]
    async fn at_view_02_open_loads_rows_and_tolerates_missing_references() {
        let store = default_store();
        save_full(
            &store,
            "ATR 17",
            SlotAssignment {
                conducteur: Some(person("P1")),
                ..SlotAssignment::default()
            },
        )
        .await;
        let refs = catalog();
        refs.set_unavailable(true);

        let view = DispatchView::open(
            Arc::clone(&store),
            &refs,
            &dispatcher(),
            DispatchViewConfig::mvp_v1(),
        )
        .await
        .unwrap();

        let snap = view.snapshot(MonotonicTimeNs(0));
        assert_eq!(snap.status, ViewStatus::Open);
        assert_eq!(snap.slots.len(), 7);
        assert_eq!(snap.slots[0].tag.as_str(), "LEAD");
        assert_eq!(snap.options.persons.len(), 1);
        assert_eq!(snap.org_cards.len(), 7);
        assert_eq!(snap.org_cards[6].conducteur.as_deref(), Some("P1"));
        assert_eq!(conducteur(&view, "ATR 17").as_deref(), Some("P1"));
    }

    #[tokio::test]
    async fn at_view_03_focused_field_survives_remote_commit() {
        let store = default_store();
        let view = open(&store).await;
        view.focus(&tag("LEAD"), SlotField::Radio).unwrap();
        view.set_field_raw(&tag("LEAD"), SlotField::Radio, Some("P2"))
            .unwrap();

        save_full(
            &store,
            "LEAD",
            SlotAssignment {
                conducteur: Some(person("P3")),
                radio: Some(person("P9")),
                ..SlotAssignment::default()
            },
        )
        .await;

        eventually(|| conducteur(&view, "LEAD").as_deref() == Some("P3")).await;
        let snap = view.snapshot(MonotonicTimeNs(0));
        assert_eq!(snap.slots[0].values.radio, Some(person("P2")));
        assert_eq!(snap.slots[0].focused, vec![SlotField::Radio]);
    }

    #[tokio::test]
    async fn at_view_04_duplicate_person_in_slot_is_cleared_with_notice() {
        let store = default_store();
        let view = open(&store).await;
        view.set_field_raw(&tag("ADAM 02"), SlotField::Conducteur, Some("P1"))
            .unwrap();
        let change = view
            .set_field_raw(&tag("ADAM 02"), SlotField::Coequipier1, Some("P1"))
            .unwrap();

        assert!(!change.accepted);
        let snap = view.snapshot(MonotonicTimeNs(0));
        let slot = snap.slots.iter().find(|s| s.tag.as_str() == "ADAM 02").unwrap();
        assert_eq!(slot.values.conducteur, Some(person("P1")));
        assert_eq!(slot.values.coequipier1, None);
        let notices = view.take_notices();
        assert_eq!(notices.len(), 1);
        assert_eq!(notices[0].field, Some(SlotField::Coequipier1));
        assert_eq!(store.save_count(), 0);
    }

    #[tokio::test]
    async fn at_view_05_failed_save_keeps_typed_values() {
        let store = default_store();
        let view = open(&store).await;
        let fetches_before = store.fetch_count();
        view.set_field_raw(&tag("ADAM 04"), SlotField::Notes, Some("pickup at gate 3"))
            .unwrap();
        store.inner().set_unavailable(true);

        let out = view.commit(&tag("ADAM 04"), MonotonicTimeNs(0)).await.unwrap();

        assert!(matches!(out, SaveOutcome::Failed(_)));
        assert_eq!(store.fetch_count(), fetches_before);
        let snap = view.snapshot(MonotonicTimeNs(0));
        let slot = snap.slots.iter().find(|s| s.tag.as_str() == "ADAM 04").unwrap();
        assert_eq!(slot.values.notes.as_deref(), Some("pickup at gate 3"));
        assert_eq!(slot.save_label, SaveButtonLabel::Ready);
        assert_eq!(view.take_notices()[0].kind, NoticeKind::Alert);
    }

    #[tokio::test]
    async fn at_view_06_two_stations_saving_different_fields_converge() {
        let store = default_store();
        let a = open(&store).await;
        let b = open(&store).await;
        let lead = tag("LEAD");

        a.set_field_raw(&lead, SlotField::Conducteur, Some("P1"))
            .unwrap();
        b.focus(&lead, SlotField::Radio).unwrap();
        b.set_field_raw(&lead, SlotField::Radio, Some("P2")).unwrap();

        assert!(matches!(
            a.commit(&lead, MonotonicTimeNs(0)).await.unwrap(),
            SaveOutcome::Saved { .. }
        ));
        assert!(matches!(
            b.commit(&lead, MonotonicTimeNs(0)).await.unwrap(),
            SaveOutcome::Saved { .. }
        ));
        b.blur(&lead, SlotField::Radio);

        let stored = store.inner().row(&lead).unwrap().assignment;
        assert_eq!(stored.conducteur, Some(person("P1")));
        assert_eq!(stored.radio, Some(person("P2")));

        for view in [&a, &b] {
            eventually(|| {
                let snap = view.snapshot(MonotonicTimeNs(0));
                snap.slots[0].values == stored && snap.org_cards[0].radio.as_deref() == Some("Bravo")
            })
            .await;
        }
    }

    #[tokio::test]
    async fn at_view_07_saved_label_shows_for_affordance_window() {
        let store = default_store();
        let view = open(&store).await;
        view.set_field_raw(&tag("ADAM 05"), SlotField::Status, Some("DISPO"))
            .unwrap();

        let now = MonotonicTimeNs(5_000);
        view.commit(&tag("ADAM 05"), now).await.unwrap();

        let label = |t: MonotonicTimeNs| {
            view.snapshot(t)
                .slots
                .iter()
                .find(|s| s.tag.as_str() == "ADAM 05")
                .map(|s| s.save_label)
        };
        assert_eq!(label(now), Some(SaveButtonLabel::Saved));
        assert_eq!(label(now.saturating_add_ms(999)), Some(SaveButtonLabel::Saved));
        assert_eq!(label(now.saturating_add_ms(1_000)), Some(SaveButtonLabel::Ready));
    }

    #[tokio::test]
    async fn at_view_08_close_stops_listener_and_rejects_edits() {
        let store = default_store();
        let view = open(&store).await;
        view.focus(&tag("LEAD"), SlotField::Notes).unwrap();
        view.close();

        assert_eq!(view.status(), ViewStatus::Closed(CloseReason::Unmounted));
        assert!(view.snapshot(MonotonicTimeNs(0)).slots.is_empty());
        assert!(matches!(
            view.set_field_raw(&tag("LEAD"), SlotField::Notes, Some("x")),
            Err(DispatchError::ViewClosed)
        ));
        assert_eq!(view.refresh().await, ReconcileOutcome::ViewClosed);
        eventually(|| store.inner().subscriber_count() == 0).await;
    }

    #[tokio::test]
    async fn at_view_09_unauthorized_store_fails_open() {
        let store = default_store();
        store.inner().set_unauthorized(true);
        let out = DispatchView::open(
            Arc::clone(&store),
            &catalog(),
            &dispatcher(),
            DispatchViewConfig::mvp_v1(),
        )
        .await;
        assert!(matches!(out, Err(DispatchError::Unauthorized)));
    }
}
