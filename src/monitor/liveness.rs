//! Liveness monitor - owns the single broker connection, classifies incoming
//! status payloads and raises alerts for stations that report `offline`.
//!
//! The monitor is driven by one event loop ([`LivenessMonitor::run`]) that
//! consumes user [`Command`]s and transport [`Envelope`]s one at a time, so
//! none of its state needs locking.

use std::collections::HashSet;

use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, info, warn};

use super::log::{EntryKind, LogEntry, LogSink};
use super::status::StatusEvent;
use super::AlertPolicy;
use crate::mqtt::{
    ConfigError, ConnectionConfig, Connector, Envelope, SubscriptionError, TransportError,
    TransportEvent, TransportHandle,
};
use crate::notify::{Alert, AlertSink};

#[derive(Clone, Copy, Default, Debug, PartialEq, Eq)]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connecting,
    Connected,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum MonitorError {
    #[error("Already connected, disconnect first")]
    AlreadyConnected,

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Transport(#[from] TransportError),
}

/// Snapshot handed to the front end on request.
#[derive(Debug, Clone)]
pub struct MonitorStatus {
    pub state: ConnectionState,
    pub config: Option<ConnectionConfig>,
    pub log: Vec<LogEntry>,
}

/// User actions forwarded by the front end.
#[derive(Debug)]
pub enum Command {
    Connect { host: String, topic: String },
    Disconnect,
    Status { reply: oneshot::Sender<MonitorStatus> },
    Shutdown,
}

pub struct LivenessMonitor<C, L, A> {
    connector: C,
    log: L,
    alerts: A,
    policy: AlertPolicy,
    events: mpsc::Sender<Envelope>,
    state: ConnectionState,
    config: Option<ConnectionConfig>,
    handle: Option<TransportHandle>,
    generation: u64,
    /// Stations currently known to be offline, used by `OncePerOutage`
    offline: HashSet<String>,
}

impl<C, L, A> LivenessMonitor<C, L, A>
where
    C: Connector,
    L: LogSink,
    A: AlertSink,
{
    /// `events` is handed to every connection the monitor opens; its
    /// receiving end must be passed to [`LivenessMonitor::run`].
    pub fn new(
        connector: C,
        log: L,
        alerts: A,
        policy: AlertPolicy,
        events: mpsc::Sender<Envelope>,
    ) -> Self {
        Self {
            connector,
            log,
            alerts,
            policy,
            events,
            state: ConnectionState::Disconnected,
            config: None,
            handle: None,
            generation: 0,
            offline: HashSet::new(),
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn config(&self) -> Option<&ConnectionConfig> {
        self.config.as_ref()
    }

    pub fn log(&self) -> &L {
        &self.log
    }

    pub fn alerts(&self) -> &A {
        &self.alerts
    }

    pub fn status(&self) -> MonitorStatus {
        MonitorStatus {
            state: self.state,
            config: self.config.clone(),
            log: self.log.entries().to_vec(),
        }
    }

    fn append(&mut self, kind: EntryKind, text: impl Into<String>) {
        self.log.append(LogEntry::new(kind, text));
    }

    /// Starts a connection attempt. Progress is reported through transport
    /// events; this call never waits on the network.
    pub fn connect(&mut self, config: ConnectionConfig) -> Result<(), MonitorError> {
        if self.state != ConnectionState::Disconnected {
            warn!("Connect requested while {:?}", self.state);
            return Err(MonitorError::AlreadyConnected);
        }

        self.generation += 1;
        let url = self.connector.broker_url(&config);
        info!("Connecting to {} (session {})", url, self.generation);

        self.state = ConnectionState::Connecting;
        self.append(EntryKind::Lifecycle, format!("Connecting to {}", url));

        let result = self
            .connector
            .connect(self.generation, &config, self.events.clone());
        self.config = Some(config);

        match result {
            Ok(handle) => {
                self.handle = Some(handle);
                Ok(())
            }
            Err(cause) => {
                error!("Failed to start connection: {}", cause);
                self.append(EntryKind::Error, format!("Error: {}", cause));
                self.state = ConnectionState::Disconnected;
                Err(cause.into())
            }
        }
    }

    /// Tears down the connection and forgets the session. Calling it while
    /// already disconnected changes nothing.
    pub fn disconnect(&mut self) {
        if let Some(mut handle) = self.handle.take() {
            info!("Disconnecting session {}", self.generation);
            handle.end();
        }
        self.state = ConnectionState::Disconnected;
        self.config = None;
        self.offline.clear();
        self.log.clear();
    }

    pub fn handle_event(&mut self, envelope: Envelope) {
        if envelope.session != self.generation || self.handle.is_none() {
            debug!(
                "Dropping stale event from session {} (current {})",
                envelope.session, self.generation
            );
            return;
        }

        match envelope.event {
            TransportEvent::Connected => {
                self.state = ConnectionState::Connected;
                let url = match &self.config {
                    Some(config) => self.connector.broker_url(config),
                    None => String::from("broker"),
                };
                self.append(EntryKind::Lifecycle, format!("Connected to {}", url));
            }
            TransportEvent::Subscribed { topic } => {
                self.append(EntryKind::Lifecycle, format!("Subscribed to {}", topic));
            }
            TransportEvent::SubscribeFailed { topic } => {
                let err = SubscriptionError { topic };
                warn!("{}", err);
                self.append(EntryKind::Error, err.to_string());
            }
            TransportEvent::Message { topic, payload } => self.on_message(&topic, &payload),
            TransportEvent::Error { cause } => {
                error!("Transport error: {}", cause);
                self.append(EntryKind::Error, format!("Error: {}", cause));
            }
            TransportEvent::Closed => {
                info!("Connection closed (session {})", self.generation);
                self.handle = None;
                self.state = ConnectionState::Disconnected;
                self.append(EntryKind::Lifecycle, "Connection closed");
            }
        }
    }

    /// Logs one message and alerts if it reports an offline station.
    pub fn on_message(&mut self, topic: &str, payload: &[u8]) {
        let text = String::from_utf8_lossy(payload);
        let line = format!("{}: {}", topic, text);

        let event = match StatusEvent::parse(&text) {
            Ok(event) => {
                debug!("{} -> {:?}", topic, event);
                self.append(EntryKind::Message, line);
                event
            }
            Err(err) => {
                warn!("{} on {}", err, topic);
                self.append(EntryKind::MalformedPayload, line);
                return;
            }
        };

        if let Some(alert) = self.evaluate(event) {
            info!("{}", alert);
            self.alerts.notify(&alert);
            self.append(EntryKind::Alert, alert.to_string());
        }
    }

    fn evaluate(&mut self, event: StatusEvent) -> Option<Alert> {
        if !event.is_offline() {
            if self.policy == AlertPolicy::OncePerOutage && self.offline.remove(&event.station_id)
            {
                debug!("{} is back, re-arming alert", event.station_id);
            }
            return None;
        }

        if self.policy == AlertPolicy::OncePerOutage
            && !self.offline.insert(event.station_id.clone())
        {
            debug!("Suppressing repeated offline alert for {}", event.station_id);
            return None;
        }

        Some(Alert::device_offline(&event.station_id))
    }

    fn handle_command(&mut self, command: Command) {
        match command {
            Command::Connect { host, topic } => {
                let result = ConnectionConfig::configure(&host, &topic)
                    .map_err(MonitorError::from)
                    .and_then(|config| self.connect(config));

                match result {
                    Ok(()) => {}
                    Err(MonitorError::Config(err)) => {
                        warn!("Rejected connect: {}", err);
                        self.alerts.notify(&Alert::new("Missing Input", err.to_string()));
                    }
                    Err(MonitorError::AlreadyConnected) => {
                        self.append(EntryKind::Error, MonitorError::AlreadyConnected.to_string());
                    }
                    // Already logged by connect
                    Err(MonitorError::Transport(_)) => {}
                }
            }
            Command::Disconnect => self.disconnect(),
            Command::Status { reply } => {
                if reply.send(self.status()).is_err() {
                    debug!("Status requester went away");
                }
            }
            Command::Shutdown => {}
        }
    }

    /// Processes commands and transport events until a `Shutdown` command
    /// arrives or the command channel closes. Returns the monitor after a
    /// final disconnect.
    pub async fn run(
        mut self,
        mut commands: mpsc::Receiver<Command>,
        mut events: mpsc::Receiver<Envelope>,
    ) -> Self {
        info!("Liveness monitor running with {:?} alert policy", self.policy);

        loop {
            tokio::select! {
                command = commands.recv() => match command {
                    Some(Command::Shutdown) | None => break,
                    Some(command) => self.handle_command(command),
                },
                Some(envelope) = events.recv() => self.handle_event(envelope),
            }
        }

        info!("Liveness monitor stopping");
        self.disconnect();
        self
    }
}
