//! Orderline API Server Entry Point
//!
//! Initializes tracing, loads configuration and runs the service.

use orderline_api::telemetry::{init_tracing, TelemetryConfig};
use orderline_api::{ApiResult, App, AppConfig};

#[tokio::main]
async fn main() -> ApiResult<()> {
    let telemetry_config = TelemetryConfig::default();
    init_tracing(&telemetry_config)?;

    let config = AppConfig::load()?;
    App::new(config).run().await
}
