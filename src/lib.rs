mod app;
mod routes;

pub mod config;
pub mod detection;
pub mod frame;
pub mod labels;
pub mod model_service;
pub mod ort_service;
pub mod server;
pub mod telemetry;

pub use app::start_app;
pub use routes::LIVENESS_MESSAGE;
