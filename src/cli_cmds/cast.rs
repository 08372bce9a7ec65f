use anyhow::{Context, Result};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::time::Instant;
use tracing::{debug, info};

use super::devices::connect_configured;
use crate::classify::{classify, Activity};
use crate::config::Config;
use crate::device::{self, CommandError, DeviceControl, LoadOptions};
use crate::status::BACKDROP_APP_NAME;

const APP_EXIT_WAIT: Duration = Duration::from_secs(5);
const APP_EXIT_POLL: Duration = Duration::from_millis(100);
const SWITCH_SETTLE: Duration = Duration::from_secs(1);
const LOAD_WAIT: Duration = Duration::from_secs(20);

/// A manual cast replaces any page and keeps it fresh.
const MANUAL_LOAD: LoadOptions = LoadOptions {
    force: true,
    reload_seconds: 5,
};

/// Replace whatever the device shows with the dashboard, once.
pub async fn cmd_cast(config: &Config) -> Result<()> {
    let Some((device, target)) = connect_configured(config).await? else {
        return Ok(());
    };

    cast_once(&device, &config.dashboard.url, &config.dashboard.app_name)
        .await
        .with_context(|| format!("Casting to '{}' failed", target.name))?;
    println!("{}: {}", target.name, config.dashboard.url);

    Ok(())
}

async fn cast_once<D: DeviceControl>(
    device: &Arc<D>,
    url: &str,
    dashboard_app_name: &str,
) -> Result<()> {
    let status = device.current_status();
    let activity = classify(status.as_ref(), dashboard_app_name);
    if activity != Activity::Idle {
        let running = status.map(|s| s.displayed_app_name).unwrap_or_default();
        info!(activity = activity.label(), app = %running, "quitting running app");
        device::call(device, |d| d.quit_current_app())
            .await
            .context("Failed to quit the running app")?;
        if !wait_for_app_exit(device.as_ref(), &running, APP_EXIT_WAIT).await {
            debug!(app = %running, "app still reported after quit, loading anyway");
        }
    }
    tokio::time::sleep(SWITCH_SETTLE).await;

    let (done_tx, done_rx) = oneshot::channel::<Result<(), CommandError>>();
    let url = url.to_string();
    device::call(device, move |d| {
        d.load_dashboard(
            &url,
            MANUAL_LOAD,
            Box::new(move |result| {
                let _ = done_tx.send(result);
            }),
        )
    })
    .await
    .context("Failed to start the dashboard")?;

    match tokio::time::timeout(LOAD_WAIT, done_rx).await {
        Ok(Ok(result)) => result.context("Dashboard did not load"),
        Ok(Err(_)) | Err(_) => anyhow::bail!("No confirmation that the dashboard loaded"),
    }
}

/// Poll until the device stops reporting `app`. Returns false if it is still
/// reported after `timeout`.
async fn wait_for_app_exit<D: DeviceControl>(device: &D, app: &str, timeout: Duration) -> bool {
    let deadline = Instant::now() + timeout;
    loop {
        let gone = device.current_status().map_or(true, |status| {
            let name = status.displayed_app_name;
            name.is_empty() || name == BACKDROP_APP_NAME || name != app
        });
        if gone {
            return true;
        }
        if Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(APP_EXIT_POLL).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::fake::{Completion, FakeDevice, Sent};
    use crate::status::{StatusSnapshot, DEFAULT_DASHBOARD_APP_NAME};

    const URL: &str = "http://hass.local:8123/lovelace/hallway";

    fn netflix() -> StatusSnapshot {
        StatusSnapshot {
            displayed_app_name: "Netflix".to_string(),
            status_text: "Playing".to_string(),
            is_stand_by: false,
            is_active_input: true,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn idle_device_is_loaded_with_force_and_reload() {
        let device = Arc::new(FakeDevice::new());
        device.push_status(StatusSnapshot::backdrop());

        cast_once(&device, URL, DEFAULT_DASHBOARD_APP_NAME)
            .await
            .unwrap();

        assert_eq!(device.actions(), vec![Sent::Load(URL.to_string())]);
        assert_eq!(
            device.load_options(),
            vec![LoadOptions {
                force: true,
                reload_seconds: 5
            }]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn running_app_is_quit_and_awaited_before_loading() {
        let device = Arc::new(FakeDevice::new());
        device.push_status(netflix());

        let pusher = Arc::clone(&device);
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(2)).await;
            pusher.push_status(StatusSnapshot::backdrop());
        });

        let started = Instant::now();
        cast_once(&device, URL, DEFAULT_DASHBOARD_APP_NAME)
            .await
            .unwrap();
        let elapsed = started.elapsed();

        assert_eq!(
            device.actions(),
            vec![Sent::Quit, Sent::Load(URL.to_string())]
        );
        assert!(elapsed >= Duration::from_secs(3), "elapsed {elapsed:?}");
        assert!(elapsed < Duration::from_secs(4), "elapsed {elapsed:?}");
    }

    #[tokio::test(start_paused = true)]
    async fn app_exit_wait_is_bounded() {
        let device = FakeDevice::new();
        device.push_status(netflix());

        let started = Instant::now();
        assert!(!wait_for_app_exit(&device, "Netflix", APP_EXIT_WAIT).await);
        assert!(started.elapsed() >= APP_EXIT_WAIT);
        assert!(started.elapsed() < APP_EXIT_WAIT + Duration::from_secs(1));
    }

    #[tokio::test(start_paused = true)]
    async fn app_exit_wait_returns_once_backdrop_shows() {
        let device = FakeDevice::new();
        device.push_status(StatusSnapshot::backdrop());
        assert!(wait_for_app_exit(&device, "Netflix", APP_EXIT_WAIT).await);
    }

    #[tokio::test(start_paused = true)]
    async fn failed_completion_is_reported() {
        let device = Arc::new(FakeDevice::new().with_completion(Completion::Fail));
        device.push_status(StatusSnapshot::backdrop());

        let err = cast_once(&device, URL, DEFAULT_DASHBOARD_APP_NAME)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("Dashboard did not load"));
    }
}
