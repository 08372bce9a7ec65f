//! The control loop: status notifications in, periodic launch decisions out.
//!
//! Status updates from the device arrive on its own threads and are queued
//! onto a channel, so every mutation of the launch session happens on this
//! one task. A fixed-period tick refreshes the device status and hands the
//! current verdict to the orchestrator.

use crate::device::{self, DeviceControl};
use crate::orchestrator::{LaunchOrchestrator, LaunchOutcome};
use crate::status::{DeviceIdentity, StatusSnapshot};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

pub struct ControlLoop<D: DeviceControl> {
    device: Arc<D>,
    orchestrator: LaunchOrchestrator<D>,
    identity: DeviceIdentity,
    poll_interval: Duration,
}

impl<D: DeviceControl> ControlLoop<D> {
    pub fn new(
        device: Arc<D>,
        orchestrator: LaunchOrchestrator<D>,
        identity: DeviceIdentity,
        poll_interval: Duration,
    ) -> Self {
        Self {
            device,
            orchestrator,
            identity,
            poll_interval,
        }
    }

    /// Run until `shutdown` resolves. Per-cycle failures are logged and the
    /// loop carries on.
    pub async fn run_until<F>(&self, shutdown: F)
    where
        F: Future<Output = ()>,
    {
        let (tx, mut updates) = mpsc::unbounded_channel::<StatusSnapshot>();
        self.device.subscribe_status(Box::new(move |status| {
            // The receiver only goes away once the loop has stopped.
            let _ = tx.send(status);
        }));

        if let Some(status) = self.device.current_status() {
            self.observe(&status);
        }

        let mut ticker = tokio::time::interval(self.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        tokio::pin!(shutdown);

        info!(
            device = %self.identity.name,
            model = self.identity.model_name.as_deref().unwrap_or("unknown"),
            interval_secs = self.poll_interval.as_secs(),
            "control loop started"
        );

        loop {
            tokio::select! {
                () = &mut shutdown => break,
                Some(status) = updates.recv() => self.observe(&status),
                _ = ticker.tick() => self.tick().await,
            }
        }

        info!("control loop stopped");
    }

    fn observe(&self, status: &StatusSnapshot) {
        self.orchestrator
            .session()
            .lock()
            .expect("launch session lock poisoned")
            .on_status_update(status);
    }

    async fn tick(&self) {
        if let Err(err) = device::call(&self.device, |d| d.request_status()).await {
            warn!(error = %err, "status refresh failed");
        }

        let verdict = self
            .orchestrator
            .session()
            .lock()
            .expect("launch session lock poisoned")
            .current_verdict();

        match self
            .orchestrator
            .evaluate(Instant::now(), verdict, &self.identity)
            .await
        {
            LaunchOutcome::NoAction => {}
            LaunchOutcome::Launched => debug!("launch sequence sent"),
            LaunchOutcome::Recaptured => debug!("recapture sequence sent"),
            LaunchOutcome::Aborted(err) => {
                warn!(error = %err, "launch cycle aborted, retrying next tick")
            }
        }
    }
}

/// Resolves on Ctrl+C, or SIGTERM on unix.
pub async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();

    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = ctrl_c => info!("received ctrl-c, shutting down"),
                    _ = sigterm.recv() => info!("received SIGTERM, shutting down"),
                }
            }
            Err(err) => {
                warn!(error = %err, "failed to register SIGTERM handler");
                ctrl_c.await.ok();
                info!("received ctrl-c, shutting down");
            }
        }
    }

    #[cfg(not(unix))]
    {
        ctrl_c.await.ok();
        info!("received ctrl-c, shutting down");
    }
}
