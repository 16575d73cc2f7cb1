use chrono::{DateTime, Duration, Utc};

use crate::models::trip::Trip;

/// Whether a trip may still be mutated. Measured from the start timestamp,
/// falling back to the received date for trips that never got one; a trip
/// with neither is not editable at all.
///
/// The same predicate gates single-trip patches, soft deletes and every
/// member of a merge request.
pub fn is_editable(trip: &Trip, now: DateTime<Utc>, window: Duration) -> bool {
    match trip.reference_timestamp() {
        Some(ts) => now.signed_duration_since(ts) <= window,
        None => false,
    }
}
