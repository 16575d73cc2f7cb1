use axum::{
    extract::State,
    http::StatusCode,
    response::IntoResponse,
    routing::post,
    Json, Router,
};
use serde::Deserialize;
use serde_json::json;

use crate::{
    auth::{self, CurrentIdentity},
    error::AppError,
    models::user::Role,
    state::AppState,
};

pub fn router() -> Router<AppState> {
    Router::new().route("/users", post(create_user))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct CreateUserForm {
    username: String,
    email: String,
    password: String,
    role: String,
    #[serde(default)]
    vehicle_id: Option<String>,
}

/// Web users are created by admins only; there is no self-registration.
async fn create_user(
    State(state): State<AppState>,
    CurrentIdentity(identity): CurrentIdentity,
    Json(form): Json<CreateUserForm>,
) -> Result<impl IntoResponse, AppError> {
    identity.require_admin()?;
    let role = Role::parse(&form.role)
        .ok_or_else(|| AppError::Validation(format!("unknown role: {}", form.role)))?;
    let user = auth::create_web_user(
        &state,
        &form.username,
        &form.email,
        &form.password,
        role,
        form.vehicle_id,
    )
    .await?;
    Ok((
        StatusCode::CREATED,
        Json(json!({
            "id": user.id,
            "uuid": user.uuid,
            "username": user.username,
            "role": user.role,
            "vehicleId": user.vehicle_id,
        })),
    ))
}
