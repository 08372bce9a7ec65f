use crate::classify::{classify, Activity};
use crate::status::StatusSnapshot;
use tracing::{debug, info};

/// The engine's current classification and the launch recommendation derived
/// from it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Verdict {
    pub should_launch: bool,
    pub classification: Activity,
}

/// Memoized launch decision, recomputed on every status notification.
#[derive(Debug)]
pub struct DecisionEngine {
    dashboard_app_name: String,
    classification: Activity,
    should_launch: bool,
}

impl DecisionEngine {
    pub fn new(dashboard_app_name: impl Into<String>) -> Self {
        Self {
            dashboard_app_name: dashboard_app_name.into(),
            classification: Activity::Unknown,
            should_launch: false,
        }
    }

    pub fn on_status_update(&mut self, snapshot: &StatusSnapshot) -> Verdict {
        let classification = classify(Some(snapshot), &self.dashboard_app_name);
        debug!(app = %snapshot.displayed_app_name, "receiver status");

        if classification != self.classification {
            info!(
                idle = classification == Activity::Idle,
                dashboard_active = classification == Activity::DashboardActive,
                other_active = classification == Activity::OtherAppActive,
                "device is now {}",
                classification.label()
            );
        }

        self.classification = classification;
        self.should_launch = classification == Activity::Idle;
        self.current_verdict()
    }

    pub fn current_verdict(&self) -> Verdict {
        Verdict {
            should_launch: self.should_launch,
            classification: self.classification,
        }
    }
}
