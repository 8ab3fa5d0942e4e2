use axum::{response::IntoResponse, response::Json};
use serde::{Deserialize, Serialize};

pub const LIVENESS_MESSAGE: &str = "YOLOv8 Object Detection API is running";

#[derive(Serialize, Deserialize)]
pub struct Status {
    message: String,
}

pub async fn healthcheck() -> impl IntoResponse {
    Json(Status {
        message: LIVENESS_MESSAGE.into(),
    })
}
