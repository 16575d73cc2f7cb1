use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::json;

use crate::{
    auth::CurrentIdentity,
    error::AppError,
    models::trip::{TripId, TripUpdate},
    services::trips::CreateTripRequest,
    state::AppState,
};

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/trips", get(list_trips).delete(delete_all_trips))
        .route("/trips/merge", post(merge_trips))
        .route("/trips/range", get(trips_range))
        .route("/trip", post(create_trip))
        .route(
            "/trip/:id",
            get(get_trip).patch(update_trip).delete(delete_trip),
        )
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ListQuery {
    vehicle_id: Option<String>,
}

async fn list_trips(
    State(state): State<AppState>,
    CurrentIdentity(identity): CurrentIdentity,
    Query(query): Query<ListQuery>,
) -> Result<impl IntoResponse, AppError> {
    let trips = state.trips.list_trips(&identity, query.vehicle_id).await?;
    Ok(Json(trips))
}

async fn get_trip(
    State(state): State<AppState>,
    CurrentIdentity(identity): CurrentIdentity,
    Path(id): Path<TripId>,
) -> Result<impl IntoResponse, AppError> {
    let trip = state.trips.get_trip(&identity, id).await?;
    Ok(Json(trip))
}

async fn create_trip(
    State(state): State<AppState>,
    CurrentIdentity(identity): CurrentIdentity,
    Json(request): Json<CreateTripRequest>,
) -> Result<impl IntoResponse, AppError> {
    let trip = state.trips.create_trip(&identity, request).await?;
    Ok((StatusCode::CREATED, Json(trip)))
}

async fn update_trip(
    State(state): State<AppState>,
    CurrentIdentity(identity): CurrentIdentity,
    Path(id): Path<TripId>,
    Json(update): Json<TripUpdate>,
) -> Result<impl IntoResponse, AppError> {
    let trip = state.trips.update_trip(&identity, id, update).await?;
    Ok(Json(trip))
}

async fn delete_trip(
    State(state): State<AppState>,
    CurrentIdentity(identity): CurrentIdentity,
    Path(id): Path<TripId>,
) -> Result<impl IntoResponse, AppError> {
    state.trips.delete_trip(&identity, id).await?;
    let message = if identity.is_admin_key() {
        "Trip deleted from database"
    } else {
        "Trip marked as deleted"
    };
    Ok(Json(json!({ "message": message })))
}

async fn delete_all_trips(
    State(state): State<AppState>,
    CurrentIdentity(identity): CurrentIdentity,
) -> Result<impl IntoResponse, AppError> {
    state.trips.delete_all_trips(&identity).await?;
    Ok(Json(json!({ "message": "All trips deleted" })))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct MergeRequest {
    trip_ids: Vec<TripId>,
}

async fn merge_trips(
    State(state): State<AppState>,
    CurrentIdentity(identity): CurrentIdentity,
    Json(request): Json<MergeRequest>,
) -> Result<impl IntoResponse, AppError> {
    let merged = state.trips.merge_trips(&identity, &request.trip_ids).await?;
    Ok((StatusCode::CREATED, Json(merged)))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RangeQuery {
    from_date: DateTime<Utc>,
    to_date: DateTime<Utc>,
}

async fn trips_range(
    State(state): State<AppState>,
    CurrentIdentity(identity): CurrentIdentity,
    Query(query): Query<RangeQuery>,
) -> Result<impl IntoResponse, AppError> {
    let rows = state
        .trips
        .trips_within_period(&identity, query.from_date, query.to_date)
        .await?;
    Ok(Json(rows))
}
