use axum::{
    extract::State,
    response::IntoResponse,
    routing::post,
    Json, Router,
};
use axum_extra::extract::cookie::PrivateCookieJar;
use serde::Deserialize;
use serde_json::json;

use crate::{
    auth::{self, SESSION_COOKIE},
    error::AppError,
    state::AppState,
};

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/login", post(login_submit))
        .route("/logout", post(logout))
}

#[derive(Deserialize)]
struct LoginForm {
    identifier: String,
    password: String,
}

async fn login_submit(
    State(state): State<AppState>,
    jar: PrivateCookieJar,
    Json(form): Json<LoginForm>,
) -> Result<impl IntoResponse, AppError> {
    let user = auth::authenticate_user(&state, &form.identifier, &form.password).await?;
    let session_id = auth::create_session(&state, user.id).await?;
    let jar = auth::apply_session_cookie(jar, &session_id);
    Ok((
        jar,
        Json(json!({
            "username": user.username,
            "role": user.role,
        })),
    ))
}

async fn logout(
    State(state): State<AppState>,
    jar: PrivateCookieJar,
) -> Result<impl IntoResponse, AppError> {
    if let Some(cookie) = jar.get(SESSION_COOKIE) {
        auth::destroy_session(&state, cookie.value()).await?;
    }
    let jar = auth::clear_session_cookie(jar);
    Ok((jar, Json(json!({ "message": "Logged out" }))))
}
