#![allow(dead_code)]

use std::{fmt, fs::File, net::SocketAddr};

use anyhow::Context;
use chrono::{Duration, Utc};
use cucumber::{given, then, when, World as _};
use fahrtenbuch::{
    auth::{Credential, Identity},
    config::AppConfig,
    db::init_pool,
    error::AppError,
    models::trip::{NewTrip, Trip, TripCategory, TripStatus, TripUpdate},
    models::user::Role,
    services::storage::StorageService,
    services::trips::{CreateTripRequest, VehicleRef},
    state::AppState,
};
use tempfile::TempDir;

#[derive(Debug, cucumber::World, Default)]
struct AppWorld {
    state: Option<TestState>,
    trips: Vec<Trip>,
    snapshot: Vec<Trip>,
    merged: Option<Trip>,
    last_error: Option<AppError>,
}

impl AppWorld {
    fn app_state(&self) -> &AppState {
        self.state
            .as_ref()
            .expect("state must be initialised first")
            .app()
    }
}

struct TestState {
    app: AppState,
    _root: TempDir,
}

impl fmt::Debug for TestState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TestState").finish()
    }
}

impl TestState {
    async fn new() -> anyhow::Result<Self> {
        let root = TempDir::new().context("create temp dir for bdd world")?;
        let data_root = root.path().join("data");
        std::fs::create_dir_all(&data_root)?;

        let db_path = root.path().join("bdd.sqlite");
        File::create(&db_path)?;
        let database_url = format!("sqlite://{}", db_path.to_string_lossy());

        let config = AppConfig {
            database_url: database_url.clone(),
            listen_addr: SocketAddr::from(([127, 0, 0, 1], 0)),
            data_root: data_root.clone(),
            cookie_secret: "bdd-cookie-secret".into(),
            admin_api_key: Some("bdd-admin-key".into()),
            driver_api_key: None,
            edit_window_days: 30,
            listing_floor_days: 30,
        };

        let db = init_pool(&config.database_url).await?;
        sqlx::migrate!("./migrations").run(&db).await?;

        let storage = StorageService::new(config.data_root.clone());
        storage.ensure_structure().await?;

        let app = AppState::new(config, db, storage);
        Ok(Self { app, _root: root })
    }

    fn app(&self) -> &AppState {
        &self.app
    }
}

fn admin() -> Identity {
    Identity {
        role: Some(Role::Admin),
        vehicle_id: None,
        credential: Credential::Session,
        username: "bdd-admin".into(),
    }
}

fn dispatcher() -> Identity {
    Identity {
        role: Some(Role::Dispatcher),
        vehicle_id: None,
        credential: Credential::Session,
        username: "bdd-dispatcher".into(),
    }
}

fn trip_request(category: TripCategory, vin: &str, start_days_ago: i64) -> CreateTripRequest {
    let start = Utc::now() - Duration::days(start_days_ago) - Duration::hours(2);
    CreateTripRequest {
        trip: NewTrip {
            recorded: true,
            start_location: None,
            end_location: None,
            start_timestamp: Some(start),
            end_timestamp: Some(start + Duration::hours(1)),
            start_mileage: Some(100),
            end_mileage: Some(150),
            trip_category: category,
            trip_purpose: None,
            trip_notes: Vec::new(),
            detour_note: String::new(),
            trip_status: TripStatus::Completed,
        },
        vehicle: VehicleRef {
            vin: vin.into(),
            custom_name: None,
            manufacturer: None,
            model: None,
            year: None,
            license_plate: None,
        },
    }
}

fn parse_category(raw: &str) -> TripCategory {
    match raw {
        "business" => TripCategory::Business,
        "private" => TripCategory::Private,
        "commute" => TripCategory::Commute,
        other => panic!("unknown category in feature file: {other}"),
    }
}

#[given("a fresh application state")]
async fn given_fresh_state(world: &mut AppWorld) {
    world.state = Some(TestState::new().await.expect("state"));
    world.trips.clear();
    world.snapshot.clear();
    world.merged = None;
    world.last_error = None;
}

#[given(regex = r#"^a recorded (business|private|commute) trip for vehicle \"([^\"]+)\"$"#)]
async fn given_recorded_trip(world: &mut AppWorld, category: String, vin: String) {
    let trip = world
        .app_state()
        .trips
        .create_trip(&admin(), trip_request(parse_category(&category), &vin, 0))
        .await
        .expect("create trip");
    world.trips.push(trip);
}

#[given(regex = r#"^a deleted (business|private|commute) trip for vehicle \"([^\"]+)\"$"#)]
async fn given_deleted_trip(world: &mut AppWorld, category: String, vin: String) {
    let trip = world
        .app_state()
        .trips
        .create_trip(&admin(), trip_request(parse_category(&category), &vin, 0))
        .await
        .expect("create trip");
    world
        .app_state()
        .trips
        .delete_trip(&admin(), trip.id)
        .await
        .expect("soft delete trip");
    world.trips.push(trip);
}

#[given(regex = r#"^a business trip from (\d+) days ago for vehicle \"([^\"]+)\"$"#)]
async fn given_stale_trip(world: &mut AppWorld, days: i64, vin: String) {
    let trip = world
        .app_state()
        .trips
        .create_trip(&admin(), trip_request(TripCategory::Business, &vin, days))
        .await
        .expect("create trip");
    world.trips.push(trip);
}

#[when("a dispatcher requests a snapshot")]
async fn when_dispatcher_snapshot(world: &mut AppWorld) {
    let state = world.app_state().clone();
    let _rx = state.hub.connect("bdd-dispatcher".into(), dispatcher()).await;
    world.snapshot = state
        .hub
        .snapshot("bdd-dispatcher", Duration::days(30))
        .await
        .expect("snapshot");
    state.hub.disconnect("bdd-dispatcher").await;
}

#[when("an admin merges all trips")]
async fn when_admin_merges(world: &mut AppWorld) {
    let ids: Vec<i64> = world.trips.iter().map(|t| t.id).collect();
    match world.app_state().trips.merge_trips(&admin(), &ids).await {
        Ok(merged) => world.merged = Some(merged),
        Err(err) => world.last_error = Some(err),
    }
}

#[when("an admin recategorizes the trip as private")]
async fn when_admin_recategorizes(world: &mut AppWorld) {
    let id = world.trips.last().expect("a trip must exist").id;
    let update = TripUpdate {
        trip_category: Some(TripCategory::Private),
        ..TripUpdate::default()
    };
    match world.app_state().trips.update_trip(&admin(), id, update).await {
        Ok(updated) => {
            world.trips.pop();
            world.trips.push(updated);
        }
        Err(err) => world.last_error = Some(err),
    }
}

#[then(regex = r"^the snapshot contains exactly (\d+) trips?$")]
async fn then_snapshot_size(world: &mut AppWorld, expected: usize) {
    assert_eq!(world.snapshot.len(), expected);
}

#[then("the snapshot contains only business trips that are not deleted")]
async fn then_snapshot_only_live_business(world: &mut AppWorld) {
    for trip in &world.snapshot {
        assert_eq!(trip.trip_category, TripCategory::Business);
        assert!(!trip.mark_as_deleted);
    }
}

#[then("the merged trip spans both source trips")]
async fn then_merged_spans(world: &mut AppWorld) {
    let merged = world.merged.as_ref().expect("merge must have succeeded");
    let earliest = world
        .trips
        .iter()
        .filter_map(|t| t.start_timestamp)
        .min()
        .expect("source start");
    let latest = world
        .trips
        .iter()
        .filter_map(|t| t.end_timestamp)
        .max()
        .expect("source end");
    assert_eq!(merged.start_timestamp, Some(earliest));
    assert_eq!(merged.end_timestamp, Some(latest));
    assert_eq!(merged.trip_notes.len(), 1);
}

#[then("both source trips are marked as superseded")]
async fn then_sources_superseded(world: &mut AppWorld) {
    use fahrtenbuch::services::storage::TripStore;

    let merged_id = world.merged.as_ref().expect("merged trip").id;
    for source in &world.trips {
        let stored = world
            .app_state()
            .storage
            .find_by_id(source.id)
            .await
            .expect("lookup")
            .expect("source still stored");
        assert!(stored.mark_as_deleted);
        assert_eq!(stored.replaced_by_trip_id, Some(merged_id));
    }
}

#[then("the request is rejected as forbidden")]
async fn then_rejected_forbidden(world: &mut AppWorld) {
    match &world.last_error {
        Some(AppError::Forbidden(_)) => {}
        other => panic!("expected Forbidden, got {other:?}"),
    }
}

#[then("the trip has no audit notes")]
async fn then_no_audit_notes(world: &mut AppWorld) {
    use fahrtenbuch::services::storage::TripStore;

    let id = world.trips.last().expect("a trip must exist").id;
    let stored = world
        .app_state()
        .storage
        .find_by_id(id)
        .await
        .expect("lookup")
        .expect("trip still stored");
    assert!(stored.trip_notes.is_empty());
}

#[tokio::main]
async fn main() {
    AppWorld::cucumber()
        .fail_on_skipped()
        .with_default_cli()
        .run("tests/features")
        .await;
}
