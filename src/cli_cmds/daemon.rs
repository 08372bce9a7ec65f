use anyhow::Result;
use std::sync::Arc;
use tracing::info;

use super::devices::connect_configured;
use crate::config::Config;
use crate::control::{self, ControlLoop};
use crate::orchestrator::{LaunchOrchestrator, LaunchSession};
use crate::status::DeviceIdentity;

pub async fn cmd_run(config: &Config) -> Result<()> {
    let Some((device, target)) = connect_configured(config).await? else {
        return Ok(());
    };

    let identity = DeviceIdentity::new(
        device.name().to_string(),
        target.model.clone(),
        &config.recapture_policy(),
    );
    if identity.model_class.is_recapture_capable() {
        info!(
            device = %identity.name,
            timeout_secs = config.timing.recapture_timeout_secs,
            "device falls back to its ambient screen, dashboard will be relaunched periodically"
        );
    }

    let session = LaunchSession::shared(config.dashboard.app_name.clone());
    let orchestrator = LaunchOrchestrator::new(
        Arc::clone(&device),
        session,
        config.dashboard.url.clone(),
        config.launch_timings(),
    );
    info!(url = %orchestrator.dashboard_url(), "dashboard configured");

    let control = ControlLoop::new(device, orchestrator, identity, config.poll_interval());
    control.run_until(control::shutdown_signal()).await;

    Ok(())
}
