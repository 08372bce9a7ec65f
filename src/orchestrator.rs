//! Mute, launch, unmute.
//!
//! The orchestrator owns the launch half of the [`LaunchSession`]: when the
//! decision engine says the device is idle it switches the device to the
//! dashboard, and on recapture-capable models it periodically forces a
//! relaunch because those devices fall back to their ambient screen while
//! still reporting the dashboard as running.
//!
//! The unmute at the end of a launch depends on the device delivering the
//! completion callback. If it never arrives the device stays muted until the
//! next launch cycle.

use crate::classify::Activity;
use crate::decision::{DecisionEngine, Verdict};
use crate::device::{self, CommandError, DeviceControl, LaunchCallback, LoadOptions};
use crate::status::{DeviceIdentity, StatusSnapshot};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::time::Instant;
use tracing::{debug, info, warn};

pub const MUTE_SETTLE_DELAY: Duration = Duration::from_secs(1);
pub const UNMUTE_DELAY: Duration = Duration::from_secs(5);
pub const RECAPTURE_TIMEOUT: Duration = Duration::from_secs(600);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LaunchTimings {
    /// Pause between muting and switching apps.
    pub mute_settle: Duration,
    /// Pause between launch completion and unmuting.
    pub unmute_delay: Duration,
    /// How long the dashboard may stay up before a forced relaunch.
    pub recapture_timeout: Duration,
}

impl Default for LaunchTimings {
    fn default() -> Self {
        Self {
            mute_settle: MUTE_SETTLE_DELAY,
            unmute_delay: UNMUTE_DELAY,
            recapture_timeout: RECAPTURE_TIMEOUT,
        }
    }
}

/// Everything the status notifications and the periodic tick share.
#[derive(Debug)]
pub struct LaunchSession {
    engine: DecisionEngine,
    last_launched_at: Option<Instant>,
    last_recapture_at: Option<Instant>,
    generation: u64,
}

pub type SharedSession = Arc<Mutex<LaunchSession>>;

impl LaunchSession {
    pub fn new(dashboard_app_name: impl Into<String>) -> Self {
        Self {
            engine: DecisionEngine::new(dashboard_app_name),
            last_launched_at: None,
            last_recapture_at: None,
            generation: 0,
        }
    }

    pub fn shared(dashboard_app_name: impl Into<String>) -> SharedSession {
        Arc::new(Mutex::new(Self::new(dashboard_app_name)))
    }

    pub fn on_status_update(&mut self, snapshot: &StatusSnapshot) -> Verdict {
        self.engine.on_status_update(snapshot)
    }

    pub fn current_verdict(&self) -> Verdict {
        self.engine.current_verdict()
    }

    #[cfg(test)]
    pub fn last_launched_at(&self) -> Option<Instant> {
        self.last_launched_at
    }

    pub fn record_launch(&mut self, at: Instant) {
        self.last_launched_at = Some(at);
    }

    fn begin_launch(&mut self) -> u64 {
        self.generation = self.generation.wrapping_add(1);
        self.generation
    }

    fn recapture_due(&self, now: Instant, timeout: Duration) -> bool {
        let Some(launched) = self.last_launched_at else {
            return false;
        };
        if now.saturating_duration_since(launched) <= timeout {
            return false;
        }
        self.last_recapture_at
            .map_or(true, |at| now.saturating_duration_since(at) > timeout)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LaunchOutcome {
    NoAction,
    Launched,
    Recaptured,
    Aborted(CommandError),
}

pub struct LaunchOrchestrator<D: DeviceControl> {
    device: Arc<D>,
    session: SharedSession,
    dashboard_url: String,
    timings: LaunchTimings,
}

impl<D: DeviceControl> LaunchOrchestrator<D> {
    pub fn new(
        device: Arc<D>,
        session: SharedSession,
        dashboard_url: impl Into<String>,
        timings: LaunchTimings,
    ) -> Self {
        Self {
            device,
            session,
            dashboard_url: dashboard_url.into(),
            timings,
        }
    }

    pub fn session(&self) -> &SharedSession {
        &self.session
    }

    pub fn dashboard_url(&self) -> &str {
        &self.dashboard_url
    }

    /// Act on a verdict. Command failures abort this cycle only.
    pub async fn evaluate(
        &self,
        now: Instant,
        verdict: Verdict,
        identity: &DeviceIdentity,
    ) -> LaunchOutcome {
        if verdict.should_launch {
            return match self.launch(now).await {
                Ok(()) => LaunchOutcome::Launched,
                Err(err) => LaunchOutcome::Aborted(err),
            };
        }

        if !identity.model_class.is_recapture_capable()
            || verdict.classification != Activity::DashboardActive
        {
            return LaunchOutcome::NoAction;
        }

        let timeout = self.timings.recapture_timeout;
        let due = self
            .session
            .lock()
            .expect("launch session lock poisoned")
            .recapture_due(now, timeout);
        if !due {
            return LaunchOutcome::NoAction;
        }

        info!(
            device = %identity.name,
            timeout_secs = timeout.as_secs(),
            "dashboard timeout reached, relaunching"
        );
        if let Err(err) = device::call(&self.device, |d| d.quit_current_app()).await {
            warn!(error = %err, "failed to quit current app");
            return LaunchOutcome::Aborted(err);
        }

        match self.launch(now).await {
            Ok(()) => {
                self.session
                    .lock()
                    .expect("launch session lock poisoned")
                    .last_recapture_at = Some(now);
                LaunchOutcome::Recaptured
            }
            Err(err) => LaunchOutcome::Aborted(err),
        }
    }

    async fn launch(&self, now: Instant) -> Result<(), CommandError> {
        info!(url = %self.dashboard_url, "launching dashboard");
        let generation = self
            .session
            .lock()
            .expect("launch session lock poisoned")
            .begin_launch();

        // Mute first so the device doesn't chime when the app switches.
        if let Err(err) = device::call(&self.device, |d| d.set_muted(true)).await {
            warn!(error = %err, "failed to mute before launch");
            return Err(err);
        }
        tokio::time::sleep(self.timings.mute_settle).await;

        let url = self.dashboard_url.clone();
        let on_complete = self.completion_handler(now, generation);
        let loaded = device::call(&self.device, move |d| {
            d.load_dashboard(&url, LoadOptions::default(), on_complete)
        })
        .await;
        if let Err(err) = loaded {
            warn!(error = %err, "failed to load dashboard");
            if let Err(unmute_err) = device::call(&self.device, |d| d.set_muted(false)).await {
                debug!(error = %unmute_err, "unmute after failed launch also failed");
            }
            return Err(err);
        }

        Ok(())
    }

    fn completion_handler(&self, launched_at: Instant, generation: u64) -> LaunchCallback {
        let session = Arc::clone(&self.session);
        let device = Arc::clone(&self.device);
        let delay = self.timings.unmute_delay;
        let runtime = Handle::current();

        Box::new(move |result| {
            match &result {
                Ok(()) => {
                    debug!("dashboard launch acknowledged");
                    session
                        .lock()
                        .expect("launch session lock poisoned")
                        .record_launch(launched_at);
                }
                Err(err) => warn!(error = %err, "dashboard launch did not complete"),
            }

            runtime.spawn(async move {
                // Give the new app time to mount its audio before unmuting.
                tokio::time::sleep(delay).await;
                let current = session
                    .lock()
                    .expect("launch session lock poisoned")
                    .generation
                    == generation;
                if !current {
                    debug!(generation, "skipping unmute for superseded launch");
                    return;
                }
                if let Err(err) = device::call(&device, |d| d.set_muted(false)).await {
                    warn!(error = %err, "failed to unmute after launch");
                }
            });
        })
    }
}
