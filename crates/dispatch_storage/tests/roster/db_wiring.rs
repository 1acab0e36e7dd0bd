#![forbid(unsafe_code)]

use std::time::Duration;

use dispatch_kernel_contracts::reference::ReferenceOption;
use dispatch_kernel_contracts::roster::{
    PersonId, SaveSlotRequest, SlotAssignment, SlotField, StatusKey, TeamTag, VehicleCode,
};
use dispatch_storage::collaborators::{InMemoryReferenceCatalog, PersonEntry};
use dispatch_storage::feed::FeedClosed;
use dispatch_storage::repo::{ReferenceCatalog, RosterStore};
use dispatch_storage::roster::{InMemoryRosterStore, StorageError};

fn tag(v: &str) -> TeamTag {
    TeamTag::new(v).unwrap()
}

fn person(v: &str) -> PersonId {
    PersonId::new(v).unwrap()
}

fn full_save(t: &str, assignment: SlotAssignment) -> SaveSlotRequest {
    SaveSlotRequest::full(tag(t), &assignment).unwrap()
}

#[tokio::test]
async fn at_roster_db_01_fetch_all_orders_lead_first() {
    let s = InMemoryRosterStore::new_in_memory(&[tag("ATR 17"), tag("ADAM 02"), tag("LEAD")]);
    let rows = s.fetch_all().await.unwrap();
    let tags: Vec<&str> = rows.iter().map(|r| r.tag.as_str()).collect();
    assert_eq!(tags, vec!["LEAD", "ADAM 02", "ATR 17"]);
    assert!(rows.iter().all(|r| r.assignment.is_empty()));
}

#[tokio::test]
async fn at_roster_db_02_partial_save_keeps_other_fields() {
    let s = InMemoryRosterStore::with_default_tags();
    s.save(&full_save(
        "LEAD",
        SlotAssignment {
            conducteur: Some(person("P1")),
            notes: Some("briefing 08:00".to_string()),
            ..SlotAssignment::default()
        },
    ))
    .await
    .unwrap();

    let radio_only = SaveSlotRequest::for_fields(
        tag("LEAD"),
        &SlotAssignment {
            radio: Some(person("P2")),
            ..SlotAssignment::default()
        },
        &[SlotField::Radio],
    )
    .unwrap();
    let row = s.save(&radio_only).await.unwrap();

    assert_eq!(row.assignment.conducteur, Some(person("P1")));
    assert_eq!(row.assignment.radio, Some(person("P2")));
    assert_eq!(row.assignment.notes.as_deref(), Some("briefing 08:00"));
}

#[tokio::test]
async fn at_roster_db_03_duplicate_role_rejected_atomically() {
    let s = InMemoryRosterStore::with_default_tags();
    s.save(&full_save(
        "ADAM 01",
        SlotAssignment {
            conducteur: Some(person("P1")),
            ..SlotAssignment::default()
        },
    ))
    .await
    .unwrap();
    let before = s.row(&tag("ADAM 01")).unwrap();

    let bad = SaveSlotRequest::for_fields(
        tag("ADAM 01"),
        &SlotAssignment {
            coequipier1: Some(person("P1")),
            vehicule: Some(VehicleCode::new("V-9").unwrap()),
            ..SlotAssignment::default()
        },
        &[SlotField::Coequipier1, SlotField::Vehicule],
    )
    .unwrap();
    assert!(matches!(
        s.save(&bad).await,
        Err(StorageError::ValidationRejected(_))
    ));

    assert_eq!(s.row(&tag("ADAM 01")).unwrap(), before);
    assert_eq!(s.write_count(), 1);
}

#[tokio::test]
async fn at_roster_db_04_unknown_tag_is_rejected() {
    let s = InMemoryRosterStore::new_in_memory(&[tag("LEAD")]);
    let out = s
        .save(&full_save("ADAM 09", SlotAssignment::default()))
        .await;
    assert!(matches!(out, Err(StorageError::ValidationRejected(_))));
    assert_eq!(s.fetch_all().await.unwrap().len(), 1);
}

#[tokio::test]
async fn at_roster_db_05_identical_saves_are_idempotent() {
    let s = InMemoryRosterStore::with_default_tags();
    let req = full_save(
        "ADAM 03",
        SlotAssignment {
            conducteur: Some(person("P4")),
            status: Some(StatusKey::new("DISPO").unwrap()),
            ..SlotAssignment::default()
        },
    );
    let first = s.save(&req).await.unwrap();
    let second = s.save(&req).await.unwrap();
    assert_eq!(first.assignment, second.assignment);
    assert!(second.updated_at > first.updated_at);
}

#[tokio::test]
async fn at_roster_db_06_faults_map_to_error_taxonomy() {
    let s = InMemoryRosterStore::with_default_tags();
    s.set_unavailable(true);
    assert!(matches!(
        s.fetch_all().await,
        Err(StorageError::StoreUnavailable(_))
    ));
    assert!(s.subscribe().is_err());

    s.set_unavailable(false);
    s.set_unauthorized(true);
    assert_eq!(
        s.save(&full_save("LEAD", SlotAssignment::default())).await,
        Err(StorageError::Unauthorized)
    );
    assert_eq!(s.write_count(), 0);
}

#[tokio::test]
async fn at_roster_db_07_each_commit_signals_subscribers() {
    let s = InMemoryRosterStore::with_default_tags();
    let mut sub = s.subscribe().unwrap();
    assert_eq!(s.subscriber_count(), 1);

    s.save(&full_save("LEAD", SlotAssignment::default()))
        .await
        .unwrap();
    s.save(&full_save("ATR 17", SlotAssignment::default()))
        .await
        .unwrap();

    tokio::time::timeout(Duration::from_secs(1), sub.changed())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(sub.drain_pending(), 1);

    drop(sub);
    assert_eq!(s.subscriber_count(), 0);
}

#[tokio::test]
async fn at_roster_db_08_closed_feed_is_reported_and_resubscribe_works() {
    let s = InMemoryRosterStore::with_default_tags();
    let mut old = s.subscribe().unwrap();
    s.close_feed();
    assert_eq!(old.changed().await, Err(FeedClosed));

    let mut fresh = s.subscribe().unwrap();
    s.save(&full_save("LEAD", SlotAssignment::default()))
        .await
        .unwrap();
    assert_eq!(fresh.changed().await, Ok(()));
}

#[tokio::test]
async fn at_roster_db_09_reference_catalog_lists_active_persons_by_name() {
    let catalog = InMemoryReferenceCatalog::new(
        vec![
            PersonEntry {
                option: ReferenceOption::v1("M-2", "Zed").unwrap(),
                active: true,
            },
            PersonEntry {
                option: ReferenceOption::v1("M-1", "Abe").unwrap(),
                active: true,
            },
            PersonEntry {
                option: ReferenceOption::v1("M-3", "Retired").unwrap(),
                active: false,
            },
        ],
        vec![
            ReferenceOption::v1("V-2", "Van").unwrap(),
            ReferenceOption::v1("V-1", "Sedan").unwrap(),
        ],
        vec![ReferenceOption::v1("DISPO", "Available").unwrap()],
    );

    let persons = catalog.list_active_persons().await.unwrap();
    let ids: Vec<&str> = persons.iter().map(|p| p.id.as_str()).collect();
    assert_eq!(ids, vec!["M-1", "M-2"]);

    let vehicles = catalog.list_vehicles().await.unwrap();
    assert_eq!(vehicles[0].id, "V-1");

    catalog.set_unavailable(true);
    assert!(catalog.list_status_codes().await.is_err());
}
