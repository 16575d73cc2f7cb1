use chrono::{DateTime, Utc};

use crate::auth::Identity;
use crate::models::trip::{Trip, TripCategory};
use crate::models::user::Role;

/// Filter expression the document store understands. Built once per query by
/// the [`VisibilityPolicy`]; `matches` is the single source of truth for both
/// batch filtering and per-event visibility checks, so the two cannot drift.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TripFilter {
    pub category: Option<TripCategory>,
    pub vehicle_id: Option<String>,
    pub include_deleted: bool,
    /// Temporal floor by start timestamp (received date as fallback).
    /// Applied to listings only, never to by-id fetches.
    pub since: Option<DateTime<Utc>>,
    /// Fail-closed marker for unrecognized roles.
    pub match_nothing: bool,
}

impl TripFilter {
    pub fn matches(&self, trip: &Trip) -> bool {
        if self.match_nothing {
            return false;
        }
        if !self.include_deleted && trip.mark_as_deleted {
            return false;
        }
        if let Some(category) = self.category {
            if trip.trip_category != category {
                return false;
            }
        }
        if let Some(vehicle_id) = &self.vehicle_id {
            if &trip.vehicle_id != vehicle_id {
                return false;
            }
        }
        if let Some(since) = self.since {
            match trip.reference_timestamp() {
                Some(ts) if ts >= since => {}
                _ => return false,
            }
        }
        true
    }

    /// Narrow to a single vehicle (admin/dispatcher query parameter). A
    /// manager's filter is already vehicle-bound and stays untouched.
    pub fn with_vehicle(mut self, vehicle_id: Option<String>) -> Self {
        if self.vehicle_id.is_none() {
            self.vehicle_id = vehicle_id;
        }
        self
    }

    pub fn with_floor(mut self, since: DateTime<Utc>) -> Self {
        self.since = Some(since);
        self
    }
}

/// One policy object shared by listing, by-id fetch and the sync hub. The
/// role switch lives here and nowhere else.
#[derive(Debug, Clone, Copy, Default)]
pub struct VisibilityPolicy;

impl VisibilityPolicy {
    /// Role filter without the temporal floor. Listing callers add the floor
    /// via [`TripFilter::with_floor`].
    pub fn build_filter(&self, identity: &Identity) -> TripFilter {
        match identity.role {
            Some(Role::Admin) => TripFilter {
                include_deleted: true,
                ..TripFilter::default()
            },
            Some(Role::Dispatcher) => TripFilter {
                category: Some(TripCategory::Business),
                ..TripFilter::default()
            },
            Some(Role::Manager) => match &identity.vehicle_id {
                Some(vin) => TripFilter {
                    vehicle_id: Some(vin.clone()),
                    ..TripFilter::default()
                },
                // A manager without a vehicle association sees nothing.
                None => TripFilter {
                    match_nothing: true,
                    ..TripFilter::default()
                },
            },
            None => TripFilter {
                match_nothing: true,
                ..TripFilter::default()
            },
        }
    }

    pub fn is_visible_to(&self, trip: &Trip, identity: &Identity) -> bool {
        self.build_filter(identity).matches(trip)
    }
}
