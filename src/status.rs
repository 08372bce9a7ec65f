/// Display name the cast receiver reports while showing its ambient screen.
pub const BACKDROP_APP_NAME: &str = "Backdrop";

/// Display name of the DashCast receiver app.
pub const DEFAULT_DASHBOARD_APP_NAME: &str = "DashCast";

/// Latest receiver status as reported by the device.
///
/// Each notification replaces the previous snapshot wholesale.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct StatusSnapshot {
    pub displayed_app_name: String,
    pub status_text: String,
    pub is_stand_by: bool,
    pub is_active_input: bool,
}

impl StatusSnapshot {
    /// The receiver's ambient screen with nothing else going on.
    pub fn backdrop() -> Self {
        Self {
            displayed_app_name: BACKDROP_APP_NAME.to_string(),
            status_text: String::new(),
            is_stand_by: true,
            is_active_input: false,
        }
    }
}

/// Whether a device is known to drop back to its ambient screen while still
/// reporting the dashboard as the running app.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModelClass {
    RecaptureCapable,
    Standard,
}

impl ModelClass {
    pub fn is_recapture_capable(self) -> bool {
        matches!(self, ModelClass::RecaptureCapable)
    }
}

/// Model names that need a timed relaunch of the dashboard.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecapturePolicy {
    models: Vec<String>,
}

impl RecapturePolicy {
    pub fn new(models: Vec<String>) -> Self {
        let models = models
            .into_iter()
            .map(|m| m.trim().to_string())
            .filter(|m| !m.is_empty())
            .collect();
        Self { models }
    }

    pub fn classify_model(&self, model_name: Option<&str>) -> ModelClass {
        let Some(model) = model_name.map(str::trim) else {
            return ModelClass::Standard;
        };
        if self.models.iter().any(|m| m.eq_ignore_ascii_case(model)) {
            ModelClass::RecaptureCapable
        } else {
            ModelClass::Standard
        }
    }
}

impl Default for RecapturePolicy {
    fn default() -> Self {
        Self::new(vec!["Google Nest Hub".to_string()])
    }
}

/// Identity of the controlled device, fixed at startup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceIdentity {
    pub name: String,
    pub model_name: Option<String>,
    pub model_class: ModelClass,
}

impl DeviceIdentity {
    pub fn new(name: String, model_name: Option<String>, policy: &RecapturePolicy) -> Self {
        let model_class = policy.classify_model(model_name.as_deref());
        Self {
            name,
            model_name,
            model_class,
        }
    }
}
