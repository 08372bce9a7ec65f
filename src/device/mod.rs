//! Device-control seam.
//!
//! The launch core only talks to a [`DeviceControl`]. The production
//! implementation is [`chromecast::ChromecastDevice`], which speaks CASTv2 over
//! TLS; tests use the fake in [`fake`].

pub mod castv2;
pub mod chromecast;
pub mod discovery;
#[cfg(test)]
pub mod fake;
pub mod receiver;

use crate::status::StatusSnapshot;
use std::sync::Arc;
use thiserror::Error;

/// Called with every receiver status the device reports.
pub type StatusListener = Box<dyn Fn(StatusSnapshot) + Send + Sync>;

/// Called once the dashboard load command has been delivered (or has failed).
/// May never be called if the command is dropped.
pub type LaunchCallback = Box<dyn FnOnce(Result<(), CommandError>) + Send>;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CommandError {
    #[error("device is not connected")]
    NotConnected,

    #[error("device rejected {command}: {reason}")]
    Rejected {
        command: &'static str,
        reason: String,
    },

    #[error("timed out waiting for {0} acknowledgement")]
    Timeout(&'static str),

    #[error("cast transport error: {0}")]
    Transport(String),

    #[error("device worker unavailable: {0}")]
    Worker(String),
}

/// How the dashboard page is loaded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct LoadOptions {
    /// Replace the page even if the dashboard app already shows one.
    pub force: bool,
    /// Reload the page every this many seconds; 0 disables reloading.
    pub reload_seconds: u32,
}

/// Blocking remote control of a single cast device.
///
/// Every call returns within a bounded command timeout.
pub trait DeviceControl: Send + Sync + 'static {
    /// Most recent status, if the device has reported one.
    fn current_status(&self) -> Option<StatusSnapshot>;

    /// Ask the device to publish a fresh status. The answer arrives through
    /// the status listeners.
    fn request_status(&self) -> Result<(), CommandError>;

    fn subscribe_status(&self, listener: StatusListener);

    fn set_muted(&self, muted: bool) -> Result<(), CommandError>;

    fn quit_current_app(&self) -> Result<(), CommandError>;

    /// Start loading `url` in the dashboard app. `Ok` means the command was
    /// accepted; `on_complete` reports when it actually landed.
    fn load_dashboard(
        &self,
        url: &str,
        options: LoadOptions,
        on_complete: LaunchCallback,
    ) -> Result<(), CommandError>;
}

/// Run a blocking device call on the blocking pool.
pub async fn call<D, T, F>(device: &Arc<D>, f: F) -> Result<T, CommandError>
where
    D: DeviceControl,
    T: Send + 'static,
    F: FnOnce(&D) -> Result<T, CommandError> + Send + 'static,
{
    let device = Arc::clone(device);
    tokio::task::spawn_blocking(move || f(&device))
        .await
        .map_err(|err| CommandError::Worker(err.to_string()))?
}
