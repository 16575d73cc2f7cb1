use std::sync::Arc;

use chrono::{DateTime, Duration, TimeZone, Utc};
use tempfile::TempDir;

use fahrtenbuch::auth::{Credential, Identity};
use fahrtenbuch::error::AppError;
use fahrtenbuch::models::trip::{
    Location, NewTrip, Trip, TripCategory, TripStatus, TripUpdate,
};
use fahrtenbuch::models::user::Role;
use fahrtenbuch::services::storage::{StorageService, TripStore};
use fahrtenbuch::services::trips::TripService;
use fahrtenbuch::services::visibility::{TripFilter, VisibilityPolicy};
use fahrtenbuch::ws::hub::SyncHub;

struct TestApp {
    service: TripService,
    store: Arc<StorageService>,
    _root: TempDir,
}

async fn test_app() -> TestApp {
    let root = TempDir::new().expect("temp dir");
    let storage = StorageService::new(root.path().to_path_buf());
    storage.ensure_structure().await.expect("data root");
    let store = Arc::new(storage);
    let policy = VisibilityPolicy;
    let hub = Arc::new(SyncHub::new(store.clone(), policy));
    let service = TripService::new(
        store.clone(),
        store.clone(),
        policy,
        hub,
        Duration::days(30),
        Duration::days(30),
    );
    TestApp {
        service,
        store,
        _root: root,
    }
}

fn admin() -> Identity {
    Identity {
        role: Some(Role::Admin),
        vehicle_id: None,
        credential: Credential::Session,
        username: "admin".into(),
    }
}

/// Yesterday at the given hour; keeps every fixture inside the edit window
/// no matter when the tests run.
fn day1(hour: u32) -> DateTime<Utc> {
    let yesterday = (Utc::now() - Duration::days(1)).date_naive();
    let naive = yesterday.and_hms_opt(hour, 0, 0).expect("valid hour");
    Utc.from_utc_datetime(&naive)
}

fn draft(
    start: DateTime<Utc>,
    end: DateTime<Utc>,
    start_mileage: i64,
    end_mileage: i64,
    category: TripCategory,
) -> NewTrip {
    NewTrip {
        recorded: true,
        start_location: Some(Location {
            street: Some("Startstraße".into()),
            city: Some("Berlin".into()),
            postal_code: Some("10115".into()),
        }),
        end_location: Some(Location {
            street: Some("Zielstraße".into()),
            city: Some("Hamburg".into()),
            postal_code: Some("20095".into()),
        }),
        start_timestamp: Some(start),
        end_timestamp: Some(end),
        start_mileage: Some(start_mileage),
        end_mileage: Some(end_mileage),
        trip_category: category,
        trip_purpose: None,
        trip_notes: Vec::new(),
        detour_note: String::new(),
        trip_status: TripStatus::Completed,
    }
}

async fn insert(app: &TestApp, draft: NewTrip) -> Trip {
    insert_for(app, draft, "VIN1").await
}

async fn insert_for(app: &TestApp, draft: NewTrip, vin: &str) -> Trip {
    app.store
        .insert(draft, vin.to_string())
        .await
        .expect("insert")
}

#[tokio::test]
async fn merge_selects_earliest_start_and_latest_end() {
    let app = test_app().await;
    let a = insert(
        &app,
        draft(day1(9), day1(10), 100, 150, TripCategory::Business),
    )
    .await;
    let b = insert(
        &app,
        draft(day1(14), day1(15), 150, 200, TripCategory::Business),
    )
    .await;

    let merged = app
        .service
        .merge_trips(&admin(), &[b.id, a.id])
        .await
        .expect("merge");

    assert_eq!(merged.start_timestamp, Some(day1(9)));
    assert_eq!(merged.end_timestamp, Some(day1(15)));
    assert_eq!(merged.start_mileage, Some(100));
    assert_eq!(merged.end_mileage, Some(200));
    assert_eq!(merged.trip_category, TripCategory::Business);
    assert_eq!(merged.start_location, a.start_location);
    assert_eq!(merged.end_location, b.end_location);

    // Exactly one synthetic note naming both sources.
    assert_eq!(merged.trip_notes.len(), 1);
    assert!(merged.trip_notes[0].contains(&a.id.to_string()));
    assert!(merged.trip_notes[0].contains(&b.id.to_string()));

    for source_id in [a.id, b.id] {
        let source = app
            .store
            .find_by_id(source_id)
            .await
            .expect("lookup")
            .expect("source still stored");
        assert!(source.mark_as_deleted);
        assert_eq!(source.replaced_by_trip_id, Some(merged.id));
        assert_eq!(source.trip_notes.len(), 1, "one supersession audit line");
    }
}

#[tokio::test]
async fn merge_is_deterministic_under_input_reordering() {
    let app_a = test_app().await;
    let app_b = test_app().await;
    for app in [&app_a, &app_b] {
        insert_for(
            app,
            draft(day1(9), day1(10), 100, 150, TripCategory::Business),
            "VIN1",
        )
        .await;
        insert_for(
            app,
            draft(day1(14), day1(15), 150, 200, TripCategory::Business),
            "VIN2",
        )
        .await;
        insert_for(
            app,
            draft(day1(11), day1(12), 120, 140, TripCategory::Business),
            "VIN3",
        )
        .await;
    }

    let first = app_a
        .service
        .merge_trips(&admin(), &[1, 2, 3])
        .await
        .expect("merge");
    let second = app_b
        .service
        .merge_trips(&admin(), &[3, 1, 2])
        .await
        .expect("merge");

    assert_eq!(first.start_timestamp, second.start_timestamp);
    assert_eq!(first.end_timestamp, second.end_timestamp);
    assert_eq!(first.start_mileage, second.start_mileage);
    assert_eq!(first.end_mileage, second.end_mileage);
    assert_eq!(first.start_location, second.start_location);
    assert_eq!(first.end_location, second.end_location);
    // Attribution follows the earliest-start source, not submission order.
    assert_eq!(first.vehicle_id, "VIN1");
    assert_eq!(first.vehicle_id, second.vehicle_id);
}

#[tokio::test]
async fn mixed_categories_merge_to_business() {
    let app = test_app().await;
    let a = insert(
        &app,
        draft(day1(9), day1(10), 100, 150, TripCategory::Private),
    )
    .await;
    let b = insert(
        &app,
        draft(day1(14), day1(15), 150, 200, TripCategory::Business),
    )
    .await;

    let merged = app
        .service
        .merge_trips(&admin(), &[a.id, b.id])
        .await
        .expect("merge");
    assert_eq!(merged.trip_category, TripCategory::Business);
}

#[tokio::test]
async fn unanimous_category_is_kept() {
    let app = test_app().await;
    let a = insert(
        &app,
        draft(day1(9), day1(10), 100, 150, TripCategory::Commute),
    )
    .await;
    let b = insert(
        &app,
        draft(day1(14), day1(15), 150, 200, TripCategory::Commute),
    )
    .await;

    let merged = app
        .service
        .merge_trips(&admin(), &[a.id, b.id])
        .await
        .expect("merge");
    assert_eq!(merged.trip_category, TripCategory::Commute);
}

#[tokio::test]
async fn merge_requires_at_least_two_trips() {
    let app = test_app().await;
    let a = insert(
        &app,
        draft(day1(9), day1(10), 100, 150, TripCategory::Business),
    )
    .await;

    let err = app.service.merge_trips(&admin(), &[a.id]).await.unwrap_err();
    assert!(matches!(err, AppError::Validation(_)));
}

#[tokio::test]
async fn merge_rejects_incorrect_trips() {
    let app = test_app().await;
    let mut bad = draft(day1(9), day1(10), 100, 150, TripCategory::Business);
    bad.trip_status = TripStatus::Incorrect;
    let a = insert(&app, bad).await;
    let b = insert(
        &app,
        draft(day1(14), day1(15), 150, 200, TripCategory::Business),
    )
    .await;

    let err = app
        .service
        .merge_trips(&admin(), &[a.id, b.id])
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::Validation(_)));
}

#[tokio::test]
async fn merge_aborts_without_mutation_when_a_member_is_outside_the_window() {
    let app = test_app().await;
    let recent = insert(
        &app,
        draft(day1(9), day1(10), 100, 150, TripCategory::Business),
    )
    .await;
    let old_start = Utc::now() - Duration::days(31);
    let stale = insert(
        &app,
        draft(
            old_start,
            old_start + Duration::hours(1),
            50,
            90,
            TripCategory::Business,
        ),
    )
    .await;

    let err = app
        .service
        .merge_trips(&admin(), &[recent.id, stale.id])
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::Forbidden(_)));

    // No trip in the set was touched and no merged trip was created.
    let all = app
        .store
        .find_many(&TripFilter {
            include_deleted: true,
            ..TripFilter::default()
        })
        .await
        .expect("list");
    assert_eq!(all.len(), 2);
    for t in all {
        assert!(!t.mark_as_deleted);
        assert!(t.replaced_by_trip_id.is_none());
        assert!(t.trip_notes.is_empty());
    }
}

#[tokio::test]
async fn superseded_trips_cannot_be_merged_again() {
    let app = test_app().await;
    let a = insert(
        &app,
        draft(day1(9), day1(10), 100, 150, TripCategory::Business),
    )
    .await;
    let b = insert(
        &app,
        draft(day1(14), day1(15), 150, 200, TripCategory::Business),
    )
    .await;
    let c = insert(
        &app,
        draft(day1(16), day1(17), 200, 230, TripCategory::Business),
    )
    .await;

    let merged = app
        .service
        .merge_trips(&admin(), &[a.id, b.id])
        .await
        .expect("first merge");

    let err = app
        .service
        .merge_trips(&admin(), &[a.id, c.id])
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::Conflict(_)));

    // The back reference from the first merge is untouched.
    let a_after = app
        .store
        .find_by_id(a.id)
        .await
        .expect("lookup")
        .expect("present");
    assert_eq!(a_after.replaced_by_trip_id, Some(merged.id));
}

#[tokio::test]
async fn soft_deleted_trip_rejects_further_mutation() {
    let app = test_app().await;
    let a = insert(
        &app,
        draft(day1(9), day1(10), 100, 150, TripCategory::Business),
    )
    .await;
    app.service
        .delete_trip(&admin(), a.id)
        .await
        .expect("soft delete");

    let update = TripUpdate {
        trip_purpose: Some("Kundentermin".into()),
        ..TripUpdate::default()
    };
    let err = app
        .service
        .update_trip(&admin(), a.id, update)
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::Conflict(_)));

    let err = app.service.delete_trip(&admin(), a.id).await.unwrap_err();
    assert!(matches!(err, AppError::Conflict(_)));
}

#[tokio::test]
async fn patch_outside_edit_window_is_rejected_without_audit_note() {
    let app = test_app().await;
    let old_start = Utc::now() - Duration::days(31);
    let stale = insert(
        &app,
        draft(
            old_start,
            old_start + Duration::hours(1),
            100,
            150,
            TripCategory::Business,
        ),
    )
    .await;

    let update = TripUpdate {
        trip_category: Some(TripCategory::Private),
        ..TripUpdate::default()
    };
    let err = app
        .service
        .update_trip(&admin(), stale.id, update)
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::Forbidden(_)));

    let after = app
        .store
        .find_by_id(stale.id)
        .await
        .expect("lookup")
        .expect("present");
    assert!(after.trip_notes.is_empty());
    assert_eq!(after.trip_category, TripCategory::Business);
}

#[tokio::test]
async fn category_patch_appends_audit_note_and_sets_checked() {
    let app = test_app().await;
    let start = Utc::now() - Duration::hours(3);
    let a = insert(
        &app,
        draft(
            start,
            start + Duration::hours(1),
            100,
            150,
            TripCategory::Business,
        ),
    )
    .await;

    let update = TripUpdate {
        trip_category: Some(TripCategory::Private),
        ..TripUpdate::default()
    };
    let updated = app
        .service
        .update_trip(&admin(), a.id, update)
        .await
        .expect("update");

    assert!(updated.checked);
    assert_eq!(updated.trip_category, TripCategory::Private);
    assert_eq!(updated.trip_notes.len(), 1);
    assert!(updated.trip_notes[0].contains("*business*"));
    assert!(updated.trip_notes[0].contains("*private*"));
}
