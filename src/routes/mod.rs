pub mod admin;
pub mod public;
pub mod trips;
pub mod vehicles;

use axum::{routing::get, Router};
use tower_http::services::ServeDir;

use crate::{state::AppState, ws::handler::ws_handler};

pub fn create_router(state: AppState) -> Router {
    let api = trips::router()
        .merge(vehicles::router())
        .merge(admin::router());

    Router::new()
        .merge(public::router())
        .nest("/api", api)
        .route("/ws", get(ws_handler))
        .nest_service("/static", ServeDir::new("static"))
        .with_state(state)
}
