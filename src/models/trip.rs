use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

pub type TripId = i64;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum TripCategory {
    Business,
    Private,
    Commute,
}

impl TripCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            TripCategory::Business => "business",
            TripCategory::Private => "private",
            TripCategory::Commute => "commute",
        }
    }
}

impl fmt::Display for TripCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum TripStatus {
    #[default]
    Completed,
    Incorrect,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Location {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub street: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub city: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub postal_code: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Trip {
    pub id: TripId,
    #[serde(default = "default_true")]
    pub recorded: bool,
    #[serde(default)]
    pub checked: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_location: Option<Location>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_location: Option<Location>,
    pub start_timestamp: Option<DateTime<Utc>>,
    pub end_timestamp: Option<DateTime<Utc>>,
    pub start_mileage: Option<i64>,
    pub end_mileage: Option<i64>,
    pub trip_category: TripCategory,
    #[serde(default)]
    pub trip_purpose: Option<String>,
    #[serde(default)]
    pub trip_notes: Vec<String>,
    #[serde(default)]
    pub detour_note: String,
    #[serde(default)]
    pub client: Option<String>,
    #[serde(default)]
    pub client_company: Option<String>,
    #[serde(default)]
    pub trip_status: TripStatus,
    pub vehicle_id: String,
    #[serde(default)]
    pub replaced_by_trip_id: Option<TripId>,
    #[serde(default)]
    pub mark_as_deleted: bool,
    /// Ingest time; edit-window fallback for trips without a start timestamp.
    /// Absent on documents imported from before the field existed.
    #[serde(default)]
    pub received_date: Option<DateTime<Utc>>,
}

impl Trip {
    /// Timestamp the edit window and the temporal floor are measured against.
    pub fn reference_timestamp(&self) -> Option<DateTime<Utc>> {
        self.start_timestamp.or(self.received_date)
    }

    pub fn kilometers(&self) -> Option<i64> {
        match (self.start_mileage, self.end_mileage) {
            (Some(start), Some(end)) => Some(end - start),
            _ => None,
        }
    }
}

fn default_true() -> bool {
    true
}

/// A trip as submitted by a vehicle or back-filled by hand; the store assigns
/// the id on insert.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewTrip {
    #[serde(default = "default_true")]
    pub recorded: bool,
    #[serde(default)]
    pub start_location: Option<Location>,
    #[serde(default)]
    pub end_location: Option<Location>,
    #[serde(default)]
    pub start_timestamp: Option<DateTime<Utc>>,
    #[serde(default)]
    pub end_timestamp: Option<DateTime<Utc>>,
    #[serde(default)]
    pub start_mileage: Option<i64>,
    #[serde(default)]
    pub end_mileage: Option<i64>,
    pub trip_category: TripCategory,
    #[serde(default)]
    pub trip_purpose: Option<String>,
    #[serde(default)]
    pub trip_notes: Vec<String>,
    #[serde(default)]
    pub detour_note: String,
    #[serde(default)]
    pub trip_status: TripStatus,
}

/// Field changes accepted by the patch endpoint. Recorded data (timestamps,
/// mileage, locations) cannot be changed after the fact; a wrong recording is
/// replaced via merge instead.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TripUpdate {
    #[serde(default)]
    pub trip_category: Option<TripCategory>,
    #[serde(default)]
    pub trip_purpose: Option<String>,
    #[serde(default)]
    pub detour_note: Option<String>,
    #[serde(default)]
    pub client: Option<String>,
    #[serde(default)]
    pub client_company: Option<String>,
    /// Free-text remark; appended to the audit trail, never replacing it.
    #[serde(default)]
    pub trip_notes: Option<String>,
}

impl TripUpdate {
    pub fn is_empty(&self) -> bool {
        self.trip_category.is_none()
            && self.trip_purpose.is_none()
            && self.detour_note.is_none()
            && self.client.is_none()
            && self.client_company.is_none()
            && self.trip_notes.is_none()
    }
}
