use crate::config::GatewayConfig;
use common::TelemetryGuard;

pub fn setup_logging(config: &GatewayConfig, telemetry: Option<&TelemetryGuard>) {
    common::setup_logging(config.environment, telemetry);
}
