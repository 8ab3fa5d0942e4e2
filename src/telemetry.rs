use crate::config::LogLevel;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Filter used when `RUST_LOG` is unset. ONNX Runtime is chatty at info.
pub fn default_directives(log_level: LogLevel) -> String {
    let level = log_level.as_str();
    format!("{level},ort=warn,tower_http={level}")
}

pub fn init_subscriber(log_level: LogLevel) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directives(log_level)));

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().json().with_level(true).with_target(true))
        .init();
}
