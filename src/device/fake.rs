use super::{CommandError, DeviceControl, LaunchCallback, LoadOptions, StatusListener};
use crate::status::StatusSnapshot;
use std::sync::Mutex;

/// Command observed by [`FakeDevice`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Sent {
    RequestStatus,
    Mute,
    Unmute,
    Quit,
    Load(String),
}

/// How the fake answers a load command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Completion {
    /// Invoke the callback with success before returning.
    Immediate,
    /// Invoke the callback with an error before returning.
    Fail,
    /// Keep the callback; tests may fire it with `complete_pending`.
    Never,
}

pub struct FakeDevice {
    sent: Mutex<Vec<Sent>>,
    status: Mutex<Option<StatusSnapshot>>,
    listeners: Mutex<Vec<StatusListener>>,
    completion: Mutex<Completion>,
    failing_loads: Mutex<usize>,
    failing_mutes: Mutex<usize>,
    pending: Mutex<Vec<LaunchCallback>>,
    load_options: Mutex<Vec<LoadOptions>>,
}

impl FakeDevice {
    pub fn new() -> Self {
        Self {
            sent: Mutex::new(Vec::new()),
            status: Mutex::new(None),
            listeners: Mutex::new(Vec::new()),
            completion: Mutex::new(Completion::Immediate),
            failing_loads: Mutex::new(0),
            failing_mutes: Mutex::new(0),
            pending: Mutex::new(Vec::new()),
            load_options: Mutex::new(Vec::new()),
        }
    }

    pub fn with_completion(self, completion: Completion) -> Self {
        *self.completion.lock().unwrap() = completion;
        self
    }

    pub fn fail_next_loads(&self, count: usize) {
        *self.failing_loads.lock().unwrap() = count;
    }

    pub fn fail_next_mutes(&self, count: usize) {
        *self.failing_mutes.lock().unwrap() = count;
    }

    /// Publish a status to every subscriber, like the device would.
    pub fn push_status(&self, status: StatusSnapshot) {
        *self.status.lock().unwrap() = Some(status.clone());
        for listener in self.listeners.lock().unwrap().iter() {
            listener(status.clone());
        }
    }

    pub fn sent(&self) -> Vec<Sent> {
        self.sent.lock().unwrap().clone()
    }

    /// Commands other than status refreshes.
    pub fn actions(&self) -> Vec<Sent> {
        self.sent()
            .into_iter()
            .filter(|s| *s != Sent::RequestStatus)
            .collect()
    }

    /// Options of every accepted load, in order.
    pub fn load_options(&self) -> Vec<LoadOptions> {
        self.load_options.lock().unwrap().clone()
    }

    pub fn clear(&self) {
        self.sent.lock().unwrap().clear();
    }

    pub fn complete_pending(&self, result: Result<(), CommandError>) {
        let callbacks: Vec<LaunchCallback> = self.pending.lock().unwrap().drain(..).collect();
        for callback in callbacks {
            callback(result.clone());
        }
    }

    fn record(&self, sent: Sent) {
        self.sent.lock().unwrap().push(sent);
    }

    fn take_failure(counter: &Mutex<usize>) -> bool {
        let mut remaining = counter.lock().unwrap();
        if *remaining > 0 {
            *remaining -= 1;
            true
        } else {
            false
        }
    }
}

impl DeviceControl for FakeDevice {
    fn current_status(&self) -> Option<StatusSnapshot> {
        self.status.lock().unwrap().clone()
    }

    fn request_status(&self) -> Result<(), CommandError> {
        self.record(Sent::RequestStatus);
        Ok(())
    }

    fn subscribe_status(&self, listener: StatusListener) {
        self.listeners.lock().unwrap().push(listener);
    }

    fn set_muted(&self, muted: bool) -> Result<(), CommandError> {
        if muted && Self::take_failure(&self.failing_mutes) {
            return Err(CommandError::Timeout("SET_VOLUME"));
        }
        self.record(if muted { Sent::Mute } else { Sent::Unmute });
        Ok(())
    }

    fn quit_current_app(&self) -> Result<(), CommandError> {
        self.record(Sent::Quit);
        Ok(())
    }

    fn load_dashboard(
        &self,
        url: &str,
        options: LoadOptions,
        on_complete: LaunchCallback,
    ) -> Result<(), CommandError> {
        if Self::take_failure(&self.failing_loads) {
            return Err(CommandError::Rejected {
                command: "LAUNCH",
                reason: "simulated failure".to_string(),
            });
        }
        self.record(Sent::Load(url.to_string()));
        self.load_options.lock().unwrap().push(options);

        let completion = *self.completion.lock().unwrap();
        match completion {
            Completion::Immediate => on_complete(Ok(())),
            Completion::Fail => on_complete(Err(CommandError::Timeout("LAUNCH"))),
            Completion::Never => self.pending.lock().unwrap().push(on_complete),
        }
        Ok(())
    }
}
