use axum::{extract::State, response::IntoResponse, routing::get, Json, Router};

use crate::{auth::CurrentIdentity, error::AppError, state::AppState};

pub fn router() -> Router<AppState> {
    Router::new().route("/vehicles", get(list_vehicles))
}

async fn list_vehicles(
    State(state): State<AppState>,
    CurrentIdentity(identity): CurrentIdentity,
) -> Result<impl IntoResponse, AppError> {
    let vehicles = state.trips.list_vehicles(&identity).await?;
    Ok(Json(vehicles))
}
