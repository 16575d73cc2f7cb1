use std::sync::Arc;

use chrono::{DateTime, Local, Utc};
use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};

use crate::auth::Identity;
use crate::error::AppError;
use crate::models::trip::{NewTrip, Trip, TripCategory, TripId, TripStatus, TripUpdate};
use crate::models::vehicle::Vehicle;
use crate::services::edit_window::is_editable;
use crate::services::merge::{plan_merge, supersession_note};
use crate::services::storage::{TripStore, VehicleStore};
use crate::services::visibility::VisibilityPolicy;
use crate::ws::hub::{Mutation, SyncHub};

/// Trip creation payload: the trip itself plus the vehicle block the
/// recording unit sends along. An unknown VIN creates the vehicle on the fly.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateTripRequest {
    #[serde(flatten)]
    pub trip: NewTrip,
    pub vehicle: VehicleRef,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VehicleRef {
    pub vin: String,
    #[serde(default)]
    pub custom_name: Option<String>,
    #[serde(default)]
    pub manufacturer: Option<String>,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub year: Option<i32>,
    #[serde(default)]
    pub license_plate: Option<String>,
}

/// Export row for the reporting range query. Locations are blanked for
/// private and commute trips before anything leaves the service.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TripExportRow {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub start_location: Option<crate::models::trip::Location>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub end_location: Option<crate::models::trip::Location>,
    pub start_timestamp: Option<DateTime<Utc>>,
    pub end_timestamp: Option<DateTime<Utc>>,
    pub start_mileage: Option<i64>,
    pub end_mileage: Option<i64>,
    pub kilometers: Option<i64>,
    pub trip_category: TripCategory,
    pub trip_purpose: Option<String>,
    pub trip_notes: Vec<String>,
    pub detour_note: String,
    pub license_plate: Option<String>,
}

/// The mutation façade: the single component that authorizes, guards,
/// persists and relays trip mutations. The hub never sees a mutation that
/// failed validation or persistence.
pub struct TripService {
    trips: Arc<dyn TripStore>,
    vehicles: Arc<dyn VehicleStore>,
    policy: VisibilityPolicy,
    hub: Arc<SyncHub>,
    edit_window: chrono::Duration,
    listing_floor: chrono::Duration,
}

impl TripService {
    pub fn new(
        trips: Arc<dyn TripStore>,
        vehicles: Arc<dyn VehicleStore>,
        policy: VisibilityPolicy,
        hub: Arc<SyncHub>,
        edit_window: chrono::Duration,
        listing_floor: chrono::Duration,
    ) -> Self {
        Self {
            trips,
            vehicles,
            policy,
            hub,
            edit_window,
            listing_floor,
        }
    }

    pub async fn list_trips(
        &self,
        identity: &Identity,
        vehicle_id: Option<String>,
    ) -> Result<Vec<Trip>, AppError> {
        let mut filter = self.policy.build_filter(identity).with_vehicle(vehicle_id);
        // The privileged key is the export path and gets full history; every
        // interactive listing is floored.
        if !identity.is_admin_key() {
            filter = filter.with_floor(Utc::now() - self.listing_floor);
        }
        self.trips.find_many(&filter).await
    }

    /// By-id fetch: role filter only, no temporal floor. An id the caller
    /// knows is fetchable regardless of age.
    pub async fn get_trip(&self, identity: &Identity, id: TripId) -> Result<Trip, AppError> {
        let trip = self.trips.find_by_id(id).await?.ok_or(AppError::NotFound)?;
        if !self.policy.is_visible_to(&trip, identity) {
            // Hidden and missing are indistinguishable to the caller.
            return Err(AppError::NotFound);
        }
        Ok(trip)
    }

    pub async fn create_trip(
        &self,
        identity: &Identity,
        request: CreateTripRequest,
    ) -> Result<Trip, AppError> {
        if request.vehicle.vin.trim().is_empty() {
            return Err(AppError::Validation("vehicle vin is required".into()));
        }
        self.ensure_vehicle(&request.vehicle).await?;

        let mut draft = request.trip;
        if !draft.recorded {
            draft.trip_notes.push(format!(
                "Die Fahrt wurde aufgrund eines technischen Ausfalls nicht aufgezeichnet und am {} nachgetragen.",
                format_timestamp(Utc::now())
            ));
        }

        let trip = self.trips.insert(draft, request.vehicle.vin).await?;
        info!(trip_id = trip.id, user = %identity.username, "trip created");
        self.hub.notify(&Mutation::Created(trip.clone())).await;
        Ok(trip)
    }

    pub async fn update_trip(
        &self,
        identity: &Identity,
        id: TripId,
        update: TripUpdate,
    ) -> Result<Trip, AppError> {
        let before = self.get_trip(identity, id).await?;
        self.ensure_mutable(&before)?;

        if update.is_empty() {
            return Err(AppError::Validation("no editable fields in request".into()));
        }

        let mut trip = before.clone();
        let timestamp = format_timestamp(Utc::now());

        // Recorded data (timestamps, mileage, locations) is immutable; a bad
        // recording is replaced via merge. Every change below leaves an audit
        // line before the document is written back.
        if let Some(category) = update.trip_category {
            if category != trip.trip_category {
                trip.trip_notes.push(format!(
                    "Die Kategorie wurde am {} von *{}* auf *{}* korrigiert.",
                    timestamp, trip.trip_category, category
                ));
                trip.trip_category = category;
            }
        }
        if let Some(purpose) = update.trip_purpose {
            trip.trip_notes.push(format!(
                "Der Fahrtzweck wurde am {} auf \"{}\" geändert.",
                timestamp, purpose
            ));
            trip.trip_purpose = Some(purpose);
        }
        if let Some(detour) = update.detour_note {
            trip.trip_notes
                .push(format!("Die Umwegnotiz wurde am {} angepasst.", timestamp));
            trip.detour_note = detour;
        }
        if let Some(client) = update.client {
            trip.trip_notes
                .push(format!("Der Kunde wurde am {} angepasst.", timestamp));
            trip.client = Some(client);
        }
        if let Some(company) = update.client_company {
            trip.trip_notes
                .push(format!("Die Kundenfirma wurde am {} angepasst.", timestamp));
            trip.client_company = Some(company);
        }
        if let Some(note) = update.trip_notes {
            trip.trip_notes.push(format!("{note} | ({timestamp})"));
        }
        trip.checked = true;

        let updated = self.trips.update_by_id(trip).await?;
        self.hub
            .notify(&Mutation::Updated {
                before,
                after: updated.clone(),
            })
            .await;
        Ok(updated)
    }

    /// Soft delete for everyone; the privileged admin key removes the
    /// document entirely.
    pub async fn delete_trip(&self, identity: &Identity, id: TripId) -> Result<(), AppError> {
        let before = self.get_trip(identity, id).await?;

        if identity.is_admin_key() {
            self.trips.delete_by_id(id).await?;
            info!(trip_id = id, "trip hard-deleted");
            self.hub.notify(&Mutation::Removed(before)).await;
            return Ok(());
        }

        self.ensure_mutable(&before)?;

        let mut trip = before.clone();
        trip.mark_as_deleted = true;
        trip.trip_notes.push(format!(
            "Die Fahrt wurde am {} als gelöscht markiert.",
            format_timestamp(Utc::now())
        ));
        self.trips.update_by_id(trip).await?;
        info!(trip_id = id, user = %identity.username, "trip marked as deleted");
        self.hub.notify(&Mutation::Removed(before)).await;
        Ok(())
    }

    pub async fn delete_all_trips(&self, identity: &Identity) -> Result<u64, AppError> {
        identity.require_admin()?;
        let count = self.trips.delete_all().await?;
        warn!(count, user = %identity.username, "all trips deleted");
        self.hub.notify(&Mutation::Cleared).await;
        Ok(count)
    }

    /// Consolidate two or more trips into one. All guards run before any
    /// write; the merged trip is inserted first and the sources are marked
    /// afterwards, so a partial failure can never lose the consolidated
    /// record.
    pub async fn merge_trips(
        &self,
        identity: &Identity,
        trip_ids: &[TripId],
    ) -> Result<Trip, AppError> {
        if trip_ids.len() < 2 {
            return Err(AppError::Validation(
                "Please provide at least two trip IDs to merge.".into(),
            ));
        }

        let mut sources = Vec::with_capacity(trip_ids.len());
        for &id in trip_ids {
            let trip = self.trips.find_by_id(id).await?.ok_or(AppError::NotFound)?;
            if !self.policy.is_visible_to(&trip, identity) {
                return Err(AppError::NotFound);
            }
            sources.push(trip);
        }

        let now = Utc::now();
        for trip in &sources {
            if trip.trip_status == TripStatus::Incorrect {
                return Err(AppError::Validation(
                    "You are not allowed to merge invalid trips!".into(),
                ));
            }
            if trip.mark_as_deleted || trip.replaced_by_trip_id.is_some() {
                return Err(AppError::Conflict(format!(
                    "trip {} has already been superseded",
                    trip.id
                )));
            }
            if !is_editable(trip, now, self.edit_window) {
                return Err(AppError::Forbidden(
                    "You are not allowed to merge trips outside the edit window!".into(),
                ));
            }
        }

        let plan = plan_merge(&sources, now)?;
        let merged = self.trips.insert(plan.trip, plan.vehicle_id).await?;

        // The sources are marked one by one; the store gives us no
        // cross-document transaction. A failed mark is retried once and then
        // logged: "merged trip exists, one source not yet marked" is the
        // recoverable state, losing the merged trip is not.
        let note = supersession_note(merged.id, now);
        for source in &sources {
            let mut marked = source.clone();
            marked.mark_as_deleted = true;
            marked.replaced_by_trip_id = Some(merged.id);
            marked.trip_notes.push(note.clone());
            if let Err(err) = self.trips.update_by_id(marked.clone()).await {
                warn!(trip_id = source.id, %err, "marking merged source failed, retrying");
                if let Err(err) = self.trips.update_by_id(marked).await {
                    error!(trip_id = source.id, %err, "source not marked as superseded");
                }
            }
        }

        info!(
            merged_id = merged.id,
            sources = ?trip_ids,
            user = %identity.username,
            "trips merged"
        );
        self.hub
            .notify(&Mutation::Merged {
                sources,
                merged: merged.clone(),
            })
            .await;
        Ok(merged)
    }

    /// Reporting export: trips whose start timestamp falls into the given
    /// range, joined with the vehicle's license plate. Locations of private
    /// and commute trips are withheld.
    pub async fn trips_within_period(
        &self,
        identity: &Identity,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<TripExportRow>, AppError> {
        identity.require_admin()?;
        let filter = self.policy.build_filter(identity);
        let trips = self.trips.find_many(&filter).await?;
        let vehicles = self.vehicles.list().await?;

        let rows = trips
            .into_iter()
            .filter(|trip| {
                trip.start_timestamp
                    .map(|ts| ts >= from && ts <= to)
                    .unwrap_or(false)
            })
            .map(|trip| {
                let license_plate = vehicles
                    .iter()
                    .find(|v| v.vin == trip.vehicle_id)
                    .and_then(|v| v.license_plate.clone());
                let private_leg = matches!(
                    trip.trip_category,
                    TripCategory::Private | TripCategory::Commute
                );
                let kilometers = trip.kilometers();
                TripExportRow {
                    start_location: (!private_leg).then_some(trip.start_location).flatten(),
                    end_location: (!private_leg).then_some(trip.end_location).flatten(),
                    start_timestamp: trip.start_timestamp,
                    end_timestamp: trip.end_timestamp,
                    start_mileage: trip.start_mileage,
                    end_mileage: trip.end_mileage,
                    kilometers,
                    trip_category: trip.trip_category,
                    trip_purpose: trip.trip_purpose,
                    trip_notes: trip.trip_notes,
                    detour_note: trip.detour_note,
                    license_plate,
                }
            })
            .collect();
        Ok(rows)
    }

    pub async fn list_vehicles(&self, _identity: &Identity) -> Result<Vec<Vehicle>, AppError> {
        self.vehicles.list().await
    }

    async fn ensure_vehicle(&self, vehicle: &VehicleRef) -> Result<(), AppError> {
        if self.vehicles.exists(&vehicle.vin).await? {
            return Ok(());
        }
        let created = Vehicle {
            vin: vehicle.vin.clone(),
            custom_name: vehicle.custom_name.clone(),
            manufacturer: vehicle.manufacturer.clone(),
            model: vehicle.model.clone(),
            year: vehicle.year,
            license_plate: vehicle.license_plate.clone(),
        };
        self.vehicles.insert(created).await?;
        info!(vin = %vehicle.vin, "vehicle created on demand");
        Ok(())
    }

    /// Shared mutation gate: supersession state first, then the edit window.
    fn ensure_mutable(&self, trip: &Trip) -> Result<(), AppError> {
        if trip.mark_as_deleted || trip.replaced_by_trip_id.is_some() {
            return Err(AppError::Conflict(format!(
                "trip {} has already been deleted or superseded",
                trip.id
            )));
        }
        if !is_editable(trip, Utc::now(), self.edit_window) {
            return Err(AppError::Forbidden(
                "You are not allowed to edit trips outside the edit window!".into(),
            ));
        }
        Ok(())
    }
}

fn format_timestamp(ts: DateTime<Utc>) -> String {
    ts.with_timezone(&Local).format("%d.%m.%Y %H:%M").to_string()
}
