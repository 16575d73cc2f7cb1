use std::{
    collections::BTreeMap,
    path::{Path, PathBuf},
    sync::Arc,
};

use async_trait::async_trait;
use tokio::{fs, sync::RwLock};

use crate::{
    error::AppError,
    models::trip::{NewTrip, Trip, TripId},
    models::vehicle::Vehicle,
    services::visibility::TripFilter,
};

const TRIPS_FILE: &str = "trips.json";
const VEHICLES_FILE: &str = "vehicles.json";

/// The trip document store as the core consumes it. Assumed eventually
/// consistent with no cross-document transactions; multi-document operations
/// (merge) live in the façade and must tolerate interleaved writers.
#[async_trait]
pub trait TripStore: Send + Sync {
    async fn find_by_id(&self, id: TripId) -> Result<Option<Trip>, AppError>;
    async fn find_many(&self, filter: &TripFilter) -> Result<Vec<Trip>, AppError>;
    /// Assigns the next monotonic id and persists the document.
    async fn insert(&self, draft: NewTrip, vehicle_id: String) -> Result<Trip, AppError>;
    /// Full-document replace by id. `NotFound` if the id is unknown.
    async fn update_by_id(&self, trip: Trip) -> Result<Trip, AppError>;
    async fn delete_by_id(&self, id: TripId) -> Result<(), AppError>;
    async fn delete_all(&self) -> Result<u64, AppError>;
}

#[async_trait]
pub trait VehicleStore: Send + Sync {
    async fn exists(&self, vin: &str) -> Result<bool, AppError>;
    async fn insert(&self, vehicle: Vehicle) -> Result<(), AppError>;
    async fn list(&self) -> Result<Vec<Vehicle>, AppError>;
}

#[derive(Default)]
struct StoreInner {
    next_trip_id: TripId,
    trips: BTreeMap<TripId, Trip>,
    vehicles: BTreeMap<String, Vehicle>,
}

/// JSON-file document store. Documents are held in memory behind one RwLock
/// and flushed to pretty-printed JSON after every mutation, one file per
/// collection under the data root.
#[derive(Clone)]
pub struct StorageService {
    root: Arc<PathBuf>,
    inner: Arc<RwLock<StoreInner>>,
}

impl StorageService {
    pub fn new(root: PathBuf) -> Self {
        Self {
            root: Arc::new(root),
            inner: Arc::new(RwLock::new(StoreInner::default())),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Create the data directory and load existing collections.
    pub async fn ensure_structure(&self) -> Result<(), AppError> {
        fs::create_dir_all(self.root()).await?;

        let trips: Vec<Trip> = self.read_collection(TRIPS_FILE).await?;
        let vehicles: Vec<Vehicle> = self.read_collection(VEHICLES_FILE).await?;

        let mut inner = self.inner.write().await;
        inner.next_trip_id = trips.iter().map(|t| t.id).max().unwrap_or(0) + 1;
        inner.trips = trips.into_iter().map(|t| (t.id, t)).collect();
        inner.vehicles = vehicles.into_iter().map(|v| (v.vin.clone(), v)).collect();
        Ok(())
    }

    async fn read_collection<T: serde::de::DeserializeOwned>(
        &self,
        filename: &str,
    ) -> Result<Vec<T>, AppError> {
        let path = self.root().join(filename);
        if !fs::try_exists(&path).await? {
            return Ok(Vec::new());
        }
        let raw = fs::read(&path).await?;
        if raw.is_empty() {
            return Ok(Vec::new());
        }
        let items = serde_json::from_slice(&raw).map_err(|err| AppError::Other(err.into()))?;
        Ok(items)
    }

    async fn write_collection<T: serde::Serialize>(
        &self,
        filename: &str,
        items: &[T],
    ) -> Result<(), AppError> {
        let path = self.root().join(filename);
        let data = serde_json::to_vec_pretty(items).map_err(|err| AppError::Other(err.into()))?;
        fs::write(path, data).await?;
        Ok(())
    }

    async fn flush_trips(&self, inner: &StoreInner) -> Result<(), AppError> {
        let trips: Vec<&Trip> = inner.trips.values().collect();
        self.write_collection(TRIPS_FILE, &trips).await
    }

    async fn flush_vehicles(&self, inner: &StoreInner) -> Result<(), AppError> {
        let vehicles: Vec<&Vehicle> = inner.vehicles.values().collect();
        self.write_collection(VEHICLES_FILE, &vehicles).await
    }
}

#[async_trait]
impl TripStore for StorageService {
    async fn find_by_id(&self, id: TripId) -> Result<Option<Trip>, AppError> {
        Ok(self.inner.read().await.trips.get(&id).cloned())
    }

    async fn find_many(&self, filter: &TripFilter) -> Result<Vec<Trip>, AppError> {
        let inner = self.inner.read().await;
        Ok(inner
            .trips
            .values()
            .filter(|trip| filter.matches(trip))
            .cloned()
            .collect())
    }

    async fn insert(&self, draft: NewTrip, vehicle_id: String) -> Result<Trip, AppError> {
        let mut inner = self.inner.write().await;
        let id = inner.next_trip_id;
        inner.next_trip_id += 1;
        let trip = Trip {
            id,
            recorded: draft.recorded,
            checked: false,
            start_location: draft.start_location,
            end_location: draft.end_location,
            start_timestamp: draft.start_timestamp,
            end_timestamp: draft.end_timestamp,
            start_mileage: draft.start_mileage,
            end_mileage: draft.end_mileage,
            trip_category: draft.trip_category,
            trip_purpose: draft.trip_purpose,
            trip_notes: draft.trip_notes,
            detour_note: draft.detour_note,
            client: None,
            client_company: None,
            trip_status: draft.trip_status,
            vehicle_id,
            replaced_by_trip_id: None,
            mark_as_deleted: false,
            received_date: Some(chrono::Utc::now()),
        };
        inner.trips.insert(id, trip.clone());
        self.flush_trips(&inner).await?;
        Ok(trip)
    }

    async fn update_by_id(&self, trip: Trip) -> Result<Trip, AppError> {
        let mut inner = self.inner.write().await;
        if !inner.trips.contains_key(&trip.id) {
            return Err(AppError::NotFound);
        }
        inner.trips.insert(trip.id, trip.clone());
        self.flush_trips(&inner).await?;
        Ok(trip)
    }

    async fn delete_by_id(&self, id: TripId) -> Result<(), AppError> {
        let mut inner = self.inner.write().await;
        if inner.trips.remove(&id).is_none() {
            return Err(AppError::NotFound);
        }
        self.flush_trips(&inner).await?;
        Ok(())
    }

    async fn delete_all(&self) -> Result<u64, AppError> {
        let mut inner = self.inner.write().await;
        let count = inner.trips.len() as u64;
        inner.trips.clear();
        self.flush_trips(&inner).await?;
        Ok(count)
    }
}

#[async_trait]
impl VehicleStore for StorageService {
    async fn exists(&self, vin: &str) -> Result<bool, AppError> {
        Ok(self.inner.read().await.vehicles.contains_key(vin))
    }

    async fn insert(&self, vehicle: Vehicle) -> Result<(), AppError> {
        let mut inner = self.inner.write().await;
        inner.vehicles.insert(vehicle.vin.clone(), vehicle);
        self.flush_vehicles(&inner).await?;
        Ok(())
    }

    async fn list(&self) -> Result<Vec<Vehicle>, AppError> {
        Ok(self.inner.read().await.vehicles.values().cloned().collect())
    }
}
