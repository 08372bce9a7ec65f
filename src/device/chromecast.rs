//! CASTv2 implementation of [`DeviceControl`].
//!
//! One worker thread owns the TLS connection. Callers hand it commands over a
//! channel and block on a reply; the worker interleaves those with reading
//! inbound frames, answering heartbeats, and publishing receiver statuses.

use super::castv2::{CastConnection, Inbound, CAST_PORT};
use super::discovery::DiscoveredDevice;
use super::receiver::{
    self, AppSession, DASHCAST_APP_ID, NS_CONNECTION, NS_DASHCAST, NS_HEARTBEAT, NS_RECEIVER,
    RECEIVER_ID,
};
use super::{CommandError, DeviceControl, LaunchCallback, LoadOptions, StatusListener};
use crate::status::StatusSnapshot;
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use std::sync::mpsc::{self, RecvTimeoutError, TryRecvError};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, info, trace, warn};

const COMMAND_TIMEOUT: Duration = Duration::from_secs(5);
const LAUNCH_TIMEOUT: Duration = Duration::from_secs(15);
const REPLY_GRACE: Duration = Duration::from_secs(2);
const KEEPALIVE_INTERVAL: Duration = Duration::from_secs(5);
const HEARTBEAT_TIMEOUT: Duration = Duration::from_secs(30);
const RECONNECT_DELAY: Duration = Duration::from_secs(5);
const DISCONNECTED_POLL: Duration = Duration::from_millis(200);

#[derive(Debug, Clone)]
pub struct SessionOptions {
    pub connect_timeout: Duration,
    pub ignore_cec: bool,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(10),
            ignore_cec: false,
        }
    }
}

type Reply = mpsc::Sender<Result<(), CommandError>>;

enum SessionCommand {
    RequestStatus,
    SetMuted {
        muted: bool,
        reply: Reply,
    },
    Quit {
        reply: Reply,
    },
    LoadDashboard {
        url: String,
        options: LoadOptions,
        on_complete: LaunchCallback,
        reply: Reply,
    },
}

enum Pending {
    Ack {
        command: &'static str,
        reply: Reply,
        deadline: Instant,
    },
    Launch {
        url: String,
        options: LoadOptions,
        on_complete: LaunchCallback,
        deadline: Instant,
    },
}

impl Pending {
    fn command(&self) -> &'static str {
        match self {
            Pending::Ack { command, .. } => command,
            Pending::Launch { .. } => "LAUNCH",
        }
    }

    fn deadline(&self) -> Instant {
        match self {
            Pending::Ack { deadline, .. } | Pending::Launch { deadline, .. } => *deadline,
        }
    }

    fn fail(self, err: CommandError) {
        match self {
            Pending::Ack { reply, .. } => {
                let _ = reply.send(Err(err));
            }
            Pending::Launch { on_complete, .. } => on_complete(Err(err)),
        }
    }
}

#[derive(Default)]
struct Published {
    latest: Mutex<Option<StatusSnapshot>>,
    listeners: Mutex<Vec<StatusListener>>,
}

impl Published {
    fn publish(&self, snapshot: StatusSnapshot) {
        *self.latest.lock().expect("status lock poisoned") = Some(snapshot.clone());
        for listener in self.listeners.lock().expect("listener lock poisoned").iter() {
            listener(snapshot.clone());
        }
    }
}

pub struct ChromecastDevice {
    name: String,
    commands: mpsc::Sender<SessionCommand>,
    published: Arc<Published>,
}

impl ChromecastDevice {
    /// Connect to a discovered device and wait for its first receiver status.
    pub fn connect_and_wait(
        device: &DiscoveredDevice,
        options: SessionOptions,
    ) -> Result<Self, CommandError> {
        let host = device.ip.clone().ok_or_else(|| CommandError::Rejected {
            command: "CONNECT",
            reason: format!("'{}' did not expose an address in discovery", device.name),
        })?;
        let port = device.port.unwrap_or(CAST_PORT);
        let connect_timeout = options.connect_timeout;

        let conn = open_session(&host, port, connect_timeout)
            .map_err(|err| CommandError::Transport(format!("{err:#}")))?;
        info!(device = %device.name, %host, port, "connected to cast device");

        let (tx, rx) = mpsc::channel();
        let (ready_tx, ready_rx) = mpsc::channel();
        let published = Arc::new(Published::default());

        let mut worker = SessionWorker::new(host, port, options, rx, Arc::clone(&published));
        worker.conn = Some(conn);
        worker.ready = Some(ready_tx);
        thread::Builder::new()
            .name("cast-session".to_string())
            .spawn(move || worker.run())
            .map_err(|err| CommandError::Worker(err.to_string()))?;

        match ready_rx.recv_timeout(connect_timeout) {
            Ok(()) => Ok(Self {
                name: device.name.clone(),
                commands: tx,
                published,
            }),
            Err(_) => Err(CommandError::Timeout("RECEIVER_STATUS")),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    fn request(
        &self,
        command: &'static str,
        timeout: Duration,
        build: impl FnOnce(Reply) -> SessionCommand,
    ) -> Result<(), CommandError> {
        let (reply_tx, reply_rx) = mpsc::channel();
        self.commands
            .send(build(reply_tx))
            .map_err(|_| CommandError::Worker("cast session stopped".to_string()))?;
        match reply_rx.recv_timeout(timeout + REPLY_GRACE) {
            Ok(result) => result,
            Err(RecvTimeoutError::Timeout) => Err(CommandError::Timeout(command)),
            Err(RecvTimeoutError::Disconnected) => {
                Err(CommandError::Worker("cast session stopped".to_string()))
            }
        }
    }
}

impl DeviceControl for ChromecastDevice {
    fn current_status(&self) -> Option<StatusSnapshot> {
        self.published
            .latest
            .lock()
            .expect("status lock poisoned")
            .clone()
    }

    fn request_status(&self) -> Result<(), CommandError> {
        self.commands
            .send(SessionCommand::RequestStatus)
            .map_err(|_| CommandError::Worker("cast session stopped".to_string()))
    }

    fn subscribe_status(&self, listener: StatusListener) {
        self.published
            .listeners
            .lock()
            .expect("listener lock poisoned")
            .push(listener);
    }

    fn set_muted(&self, muted: bool) -> Result<(), CommandError> {
        self.request("SET_VOLUME", COMMAND_TIMEOUT, |reply| {
            SessionCommand::SetMuted { muted, reply }
        })
    }

    fn quit_current_app(&self) -> Result<(), CommandError> {
        self.request("STOP", COMMAND_TIMEOUT, |reply| SessionCommand::Quit {
            reply,
        })
    }

    fn load_dashboard(
        &self,
        url: &str,
        options: LoadOptions,
        on_complete: LaunchCallback,
    ) -> Result<(), CommandError> {
        let url = url.to_string();
        self.request("LAUNCH", COMMAND_TIMEOUT, |reply| {
            SessionCommand::LoadDashboard {
                url,
                options,
                on_complete,
                reply,
            }
        })
    }
}

fn open_session(host: &str, port: u16, timeout: Duration) -> anyhow::Result<CastConnection> {
    let mut conn = CastConnection::connect(host, port, timeout)?;
    conn.send_json(RECEIVER_ID, NS_CONNECTION, &receiver::connect_payload())?;
    let request_id = conn.next_request_id();
    conn.send_json(
        RECEIVER_ID,
        NS_RECEIVER,
        &receiver::get_status_payload(request_id),
    )?;
    Ok(conn)
}

struct SessionWorker {
    host: String,
    port: u16,
    options: SessionOptions,
    conn: Option<CastConnection>,
    commands: mpsc::Receiver<SessionCommand>,
    published: Arc<Published>,
    ready: Option<mpsc::Sender<()>>,
    pending: HashMap<u32, Pending>,
    app: Option<AppSession>,
    connected_transports: HashSet<String>,
    last_ping: Instant,
    last_inbound: Instant,
    next_reconnect: Instant,
}

impl SessionWorker {
    fn new(
        host: String,
        port: u16,
        options: SessionOptions,
        commands: mpsc::Receiver<SessionCommand>,
        published: Arc<Published>,
    ) -> Self {
        let now = Instant::now();
        Self {
            host,
            port,
            options,
            conn: None,
            commands,
            published,
            ready: None,
            pending: HashMap::new(),
            app: None,
            connected_transports: HashSet::new(),
            last_ping: now,
            last_inbound: now,
            next_reconnect: now,
        }
    }

    fn run(mut self) {
        loop {
            if !self.drain_commands() {
                debug!("device handle dropped, closing cast session");
                return;
            }
            self.expire_pending(Instant::now());

            if self.conn.is_none() {
                self.try_reconnect();
                thread::sleep(DISCONNECTED_POLL);
                continue;
            }

            self.keepalive();
            let Some(conn) = self.conn.as_mut() else {
                continue;
            };
            match conn.read_message() {
                Ok(Some(message)) => {
                    self.last_inbound = Instant::now();
                    self.dispatch(message);
                }
                Ok(None) => {}
                Err(err) => self.disconnect(&format!("{err:#}")),
            }
        }
    }

    /// Returns false once every device handle is gone.
    fn drain_commands(&mut self) -> bool {
        loop {
            match self.commands.try_recv() {
                Ok(command) => self.handle(command),
                Err(TryRecvError::Empty) => return true,
                Err(TryRecvError::Disconnected) => return false,
            }
        }
    }

    fn handle(&mut self, command: SessionCommand) {
        match command {
            SessionCommand::RequestStatus => {
                if self.conn.is_some() {
                    let _ = self.send_request(receiver::get_status_payload);
                }
            }
            SessionCommand::SetMuted { muted, reply } => {
                match self.send_request(|id| receiver::set_muted_payload(id, muted)) {
                    Ok(id) => self.track_ack(id, "SET_VOLUME", reply),
                    Err(err) => {
                        let _ = reply.send(Err(err));
                    }
                }
            }
            SessionCommand::Quit { reply } => {
                let Some(session_id) = self.app.as_ref().map(|app| app.session_id.clone()) else {
                    let _ = reply.send(Ok(()));
                    return;
                };
                match self.send_request(|id| receiver::stop_payload(id, &session_id)) {
                    Ok(id) => self.track_ack(id, "STOP", reply),
                    Err(err) => {
                        let _ = reply.send(Err(err));
                    }
                }
            }
            SessionCommand::LoadDashboard {
                url,
                options,
                on_complete,
                reply,
            } => self.load_dashboard(url, options, on_complete, reply),
        }
    }

    fn load_dashboard(
        &mut self,
        url: String,
        options: LoadOptions,
        on_complete: LaunchCallback,
        reply: Reply,
    ) {
        if let Some(app) = self.running_dashcast() {
            match self.send_dashcast(&app, &url, options) {
                Ok(()) => {
                    let _ = reply.send(Ok(()));
                    on_complete(Ok(()));
                }
                Err(err) => {
                    let _ = reply.send(Err(err));
                }
            }
            return;
        }

        match self.send_request(|id| receiver::launch_payload(id, DASHCAST_APP_ID)) {
            Ok(id) => {
                self.pending.insert(
                    id,
                    Pending::Launch {
                        url,
                        options,
                        on_complete,
                        deadline: Instant::now() + LAUNCH_TIMEOUT,
                    },
                );
                let _ = reply.send(Ok(()));
            }
            Err(err) => {
                let _ = reply.send(Err(err));
            }
        }
    }

    fn running_dashcast(&self) -> Option<AppSession> {
        self.app
            .as_ref()
            .filter(|app| app.app_id == DASHCAST_APP_ID)
            .cloned()
    }

    fn track_ack(&mut self, id: u32, command: &'static str, reply: Reply) {
        self.pending.insert(
            id,
            Pending::Ack {
                command,
                reply,
                deadline: Instant::now() + COMMAND_TIMEOUT,
            },
        );
    }

    fn send(&mut self, destination: &str, namespace: &str, payload: &Value) -> Result<(), CommandError> {
        let Some(conn) = self.conn.as_mut() else {
            return Err(CommandError::NotConnected);
        };
        if let Err(err) = conn.send_json(destination, namespace, payload) {
            let message = format!("{err:#}");
            self.disconnect(&message);
            return Err(CommandError::Transport(message));
        }
        Ok(())
    }

    fn send_request(&mut self, build: impl FnOnce(u32) -> Value) -> Result<u32, CommandError> {
        let Some(conn) = self.conn.as_mut() else {
            return Err(CommandError::NotConnected);
        };
        let id = conn.next_request_id();
        self.send(RECEIVER_ID, NS_RECEIVER, &build(id))?;
        Ok(id)
    }

    fn send_dashcast(
        &mut self,
        app: &AppSession,
        url: &str,
        options: LoadOptions,
    ) -> Result<(), CommandError> {
        if !self.connected_transports.contains(&app.transport_id) {
            self.send(&app.transport_id, NS_CONNECTION, &receiver::connect_payload())?;
            self.connected_transports.insert(app.transport_id.clone());
        }
        self.send(
            &app.transport_id,
            NS_DASHCAST,
            &receiver::dashcast_load_payload(url, options.force, options.reload_seconds),
        )
    }

    fn dispatch(&mut self, message: Inbound) {
        let kind = receiver::message_type(&message.payload).map(str::to_string);
        match message.namespace.as_str() {
            NS_HEARTBEAT => {
                if kind.as_deref() == Some("PING") {
                    let _ = self.send(&message.source_id, NS_HEARTBEAT, &receiver::pong_payload());
                }
            }
            NS_CONNECTION => {
                if kind.as_deref() == Some("CLOSE") {
                    if message.source_id == RECEIVER_ID {
                        self.disconnect("receiver closed the connection");
                    } else {
                        self.connected_transports.remove(&message.source_id);
                    }
                }
            }
            NS_RECEIVER => self.on_receiver_message(&message.payload),
            other => trace!(namespace = other, "ignoring cast message"),
        }
    }

    fn on_receiver_message(&mut self, payload: &Value) {
        let request_id = receiver::request_id(payload);

        if let Some(reason) = receiver::failure_reason(payload) {
            match request_id.and_then(|id| self.pending.remove(&id)) {
                Some(pending) => {
                    let command = pending.command();
                    pending.fail(CommandError::Rejected { command, reason });
                }
                None => warn!(%reason, "receiver reported an error"),
            }
            return;
        }

        let Some(status) = receiver::parse_receiver_status(payload, self.options.ignore_cec) else {
            return;
        };

        trace!(
            app = %status.snapshot.displayed_app_name,
            muted = status.muted,
            "receiver status"
        );
        if self.app.as_ref().map(|a| &a.session_id) != status.app.as_ref().map(|a| &a.session_id)
        {
            self.connected_transports.clear();
        }
        self.app = status.app;
        self.published.publish(status.snapshot);
        if let Some(ready) = self.ready.take() {
            let _ = ready.send(());
        }

        if let Some(pending) = request_id.and_then(|id| self.pending.remove(&id)) {
            self.resolve(pending);
        }
    }

    fn resolve(&mut self, pending: Pending) {
        match pending {
            Pending::Ack { reply, .. } => {
                let _ = reply.send(Ok(()));
            }
            Pending::Launch {
                url,
                options,
                on_complete,
                ..
            } => {
                let Some(app) = self.running_dashcast() else {
                    on_complete(Err(CommandError::Rejected {
                        command: "LAUNCH",
                        reason: "dashboard app is not running after launch".to_string(),
                    }));
                    return;
                };
                let result = self.send_dashcast(&app, &url, options);
                on_complete(result);
            }
        }
    }

    fn expire_pending(&mut self, now: Instant) {
        let expired: Vec<u32> = self
            .pending
            .iter()
            .filter(|(_, pending)| pending.deadline() <= now)
            .map(|(id, _)| *id)
            .collect();
        for id in expired {
            if let Some(pending) = self.pending.remove(&id) {
                let command = pending.command();
                debug!(request_id = id, command, "cast request timed out");
                pending.fail(CommandError::Timeout(command));
            }
        }
    }

    fn keepalive(&mut self) {
        let now = Instant::now();
        if now.duration_since(self.last_inbound) > HEARTBEAT_TIMEOUT {
            self.disconnect("no traffic from receiver");
            return;
        }
        if now.duration_since(self.last_ping) >= KEEPALIVE_INTERVAL {
            self.last_ping = now;
            let _ = self.send(RECEIVER_ID, NS_HEARTBEAT, &receiver::ping_payload());
        }
    }

    fn disconnect(&mut self, reason: &str) {
        if self.conn.take().is_some() {
            warn!(host = %self.host, %reason, "cast connection lost");
        }
        self.app = None;
        self.connected_transports.clear();
        for (_, pending) in self.pending.drain() {
            pending.fail(CommandError::NotConnected);
        }
        self.next_reconnect = Instant::now() + RECONNECT_DELAY;
    }

    fn try_reconnect(&mut self) {
        let now = Instant::now();
        if now < self.next_reconnect {
            return;
        }
        match open_session(&self.host, self.port, self.options.connect_timeout) {
            Ok(conn) => {
                info!(host = %self.host, "reconnected to cast device");
                self.conn = Some(conn);
                self.last_inbound = Instant::now();
                self.last_ping = Instant::now();
            }
            Err(err) => {
                debug!(host = %self.host, error = %format!("{err:#}"), "reconnect failed");
                self.next_reconnect = Instant::now() + RECONNECT_DELAY;
            }
        }
    }
}
