use anyhow::{Context, Result};
use std::sync::Arc;
use tracing::{error, info};

use crate::config::Config;
use crate::device::chromecast::{ChromecastDevice, SessionOptions};
use crate::device::discovery::{self, DiscoveredDevice, DiscoveryError};

pub async fn cmd_list() -> Result<()> {
    let devices = tokio::task::spawn_blocking(discovery::discover_devices).await??;

    if devices.is_empty() {
        println!("No cast devices found.");
        return Ok(());
    }

    for device in &devices {
        println!("{}", discovery::describe(device));
    }

    Ok(())
}

/// Discover the configured device and open a session to it.
///
/// `Ok(None)` means no matching device is on the network; that is logged and
/// treated as a normal exit.
pub(crate) async fn connect_configured(
    config: &Config,
) -> Result<Option<(Arc<ChromecastDevice>, DiscoveredDevice)>> {
    let query = config.device.display_name.clone();
    let selected = tokio::task::spawn_blocking(move || {
        let devices = discovery::discover_devices()?;
        discovery::select_device(&devices, query.as_deref())
    })
    .await?;

    let target = match selected {
        Ok(target) => target,
        Err(
            err @ (DiscoveryError::NoDevices
            | DiscoveryError::NotFound { .. }
            | DiscoveryError::Ambiguous { .. }),
        ) => {
            error!(error = %err, "no device found");
            return Ok(None);
        }
        Err(err) => return Err(err.into()),
    };
    info!(device = %discovery::describe(&target), "using cast device");

    let options = SessionOptions {
        connect_timeout: config.connect_timeout(),
        ignore_cec: config.device.ignore_cec,
    };
    if options.ignore_cec {
        info!(device = %target.name, "ignoring CEC state for this device");
    }

    let connect_target = target.clone();
    let device = tokio::task::spawn_blocking(move || {
        ChromecastDevice::connect_and_wait(&connect_target, options)
    })
    .await?
    .with_context(|| format!("Failed to connect to '{}'", target.name))?;

    Ok(Some((Arc::new(device), target)))
}
