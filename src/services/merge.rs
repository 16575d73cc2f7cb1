use chrono::{DateTime, Local, Utc};

use crate::error::AppError;
use crate::models::trip::{NewTrip, Trip, TripCategory, TripStatus};

/// The consolidated trip plus its vehicle attribution, ready for insertion.
#[derive(Debug, Clone)]
pub struct MergePlan {
    pub trip: NewTrip,
    /// Vehicle of the earliest-start source, so attribution does not depend
    /// on the order the ids were submitted in.
    pub vehicle_id: String,
}

/// Plans the consolidation of two or more trips into one synthetic trip.
/// Pure field selection; loading, guarding and persisting stay in the
/// façade.
///
/// Start fields come from the trip with the earliest start timestamp, end
/// fields from the trip with the latest end timestamp. Ties fall back to the
/// lower trip id (store insertion order), so the result does not depend on
/// the order the ids were submitted in.
pub fn plan_merge(trips: &[Trip], now: DateTime<Utc>) -> Result<MergePlan, AppError> {
    if trips.len() < 2 {
        return Err(AppError::Validation(
            "Please provide at least two trips to merge.".into(),
        ));
    }

    let first = trips
        .iter()
        .min_by_key(|t| (t.start_timestamp, t.id))
        .expect("at least two trips");
    let last = trips
        .iter()
        .max_by_key(|t| (t.end_timestamp, std::cmp::Reverse(t.id)))
        .expect("at least two trips");

    let category = unanimous_category(trips).unwrap_or(TripCategory::Business);

    // Exactly one synthetic audit line; source notes are not carried over so
    // repeated merges cannot snowball the trail.
    let notes = vec![merge_note(trips, now)];

    Ok(MergePlan {
        trip: NewTrip {
            recorded: true,
            start_location: first.start_location.clone(),
            end_location: last.end_location.clone(),
            start_timestamp: first.start_timestamp,
            end_timestamp: last.end_timestamp,
            start_mileage: first.start_mileage,
            end_mileage: last.end_mileage,
            trip_category: category,
            trip_purpose: first.trip_purpose.clone(),
            trip_notes: notes,
            detour_note: String::new(),
            trip_status: TripStatus::Completed,
        },
        vehicle_id: first.vehicle_id.clone(),
    })
}

/// The audit line appended to each superseded source trip.
pub fn supersession_note(new_id: i64, now: DateTime<Utc>) -> String {
    format!(
        "Die Fahrt wurde am {} durch die Fahrt mit der ID {} ersetzt.",
        format_timestamp(now),
        new_id
    )
}

fn unanimous_category(trips: &[Trip]) -> Option<TripCategory> {
    let first = trips.first()?.trip_category;
    trips
        .iter()
        .all(|t| t.trip_category == first)
        .then_some(first)
}

fn merge_note(trips: &[Trip], now: DateTime<Utc>) -> String {
    let mut ids: Vec<i64> = trips.iter().map(|t| t.id).collect();
    ids.sort_unstable();
    let joined = ids
        .iter()
        .map(|id| id.to_string())
        .collect::<Vec<_>>()
        .join(" & ");
    format!(
        "Die Fahrten mit den IDs {} wurden am {} zusammengeführt.",
        joined,
        format_timestamp(now)
    )
}

fn format_timestamp(ts: DateTime<Utc>) -> String {
    ts.with_timezone(&Local).format("%d.%m.%Y %H:%M").to_string()
}
