use crate::status::{StatusSnapshot, BACKDROP_APP_NAME};

/// What the device is (probably) doing right now.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Activity {
    Idle,
    DashboardActive,
    OtherAppActive,
    Unknown,
}

impl Activity {
    pub fn label(self) -> &'static str {
        match self {
            Activity::Idle => "idle",
            Activity::DashboardActive => "dashboard",
            Activity::OtherAppActive => "other-app",
            Activity::Unknown => "unknown",
        }
    }
}

/// Classify a receiver status.
///
/// Idle detection is strict: the backdrop must be showing with no
/// status text, the device must report stand-by and must not be the active
/// input. Anything less is treated as not idle.
pub fn classify(snapshot: Option<&StatusSnapshot>, dashboard_app_name: &str) -> Activity {
    let Some(status) = snapshot else {
        return Activity::Unknown;
    };

    if status.displayed_app_name == dashboard_app_name {
        return Activity::DashboardActive;
    }

    if status.displayed_app_name == BACKDROP_APP_NAME {
        if status.status_text.is_empty() && status.is_stand_by && !status.is_active_input {
            return Activity::Idle;
        }
        // Backdrop with activity on it is neither idle nor another app.
        return Activity::Unknown;
    }

    Activity::OtherAppActive
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::status::DEFAULT_DASHBOARD_APP_NAME;

    fn classify_default(status: &StatusSnapshot) -> Activity {
        classify(Some(status), DEFAULT_DASHBOARD_APP_NAME)
    }

    #[test]
    fn no_status_is_unknown() {
        assert_eq!(classify(None, DEFAULT_DASHBOARD_APP_NAME), Activity::Unknown);
    }

    #[test]
    fn quiet_backdrop_is_idle() {
        assert_eq!(classify_default(&StatusSnapshot::backdrop()), Activity::Idle);
    }

    #[test]
    fn any_single_field_change_leaves_idle() {
        let mut app = StatusSnapshot::backdrop();
        app.displayed_app_name = "YouTube".to_string();
        assert_ne!(classify_default(&app), Activity::Idle);

        let mut text = StatusSnapshot::backdrop();
        text.status_text = "Ready to cast".to_string();
        assert_ne!(classify_default(&text), Activity::Idle);

        let mut awake = StatusSnapshot::backdrop();
        awake.is_stand_by = false;
        assert_ne!(classify_default(&awake), Activity::Idle);

        let mut input = StatusSnapshot::backdrop();
        input.is_active_input = true;
        assert_ne!(classify_default(&input), Activity::Idle);
    }

    #[test]
    fn dashboard_name_wins() {
        let status = StatusSnapshot {
            displayed_app_name: "DashCast".to_string(),
            status_text: "Now casting".to_string(),
            is_stand_by: false,
            is_active_input: true,
        };
        assert_eq!(classify_default(&status), Activity::DashboardActive);
    }

    #[test]
    fn custom_dashboard_name_is_respected() {
        let status = StatusSnapshot {
            displayed_app_name: "Home Panel".to_string(),
            ..StatusSnapshot::default()
        };
        assert_eq!(classify(Some(&status), "Home Panel"), Activity::DashboardActive);
        assert_eq!(classify_default(&status), Activity::OtherAppActive);
    }

    #[test]
    fn playing_media_is_other_app() {
        let status = StatusSnapshot {
            displayed_app_name: "Netflix".to_string(),
            status_text: "Playing".to_string(),
            is_stand_by: false,
            is_active_input: true,
        };
        assert_eq!(classify_default(&status), Activity::OtherAppActive);
    }

    #[test]
    fn empty_app_name_counts_as_other_app() {
        let status = StatusSnapshot::default();
        assert_eq!(classify_default(&status), Activity::OtherAppActive);
    }

    #[test]
    fn classification_is_repeatable() {
        let status = StatusSnapshot::backdrop();
        let first = classify_default(&status);
        for _ in 0..10 {
            assert_eq!(classify_default(&status), first);
        }
    }
}
