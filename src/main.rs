use yolo_relay::{config::get_configuration, start_app, telemetry};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config = get_configuration()?;
    telemetry::init_subscriber(config.log_level);

    start_app(config).await
}
