mod health;
mod ws;

use crate::server::SharedState;
use axum::{routing::get, Router};

pub use health::LIVENESS_MESSAGE;

pub fn api_routes() -> Router<SharedState> {
    Router::new()
        .route("/", get(health::healthcheck))
        .route("/ws", get(ws::ws_handler))
}
