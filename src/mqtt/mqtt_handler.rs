//! rumqttc-backed transport.
//!
//! Each connection attempt runs as its own tokio task that walks through two
//! states:
//!
//! ```text
//! Connecting ──ConnAck──► Streaming ──error / broker disconnect──► (task ends)
//!     │                       │
//!     └─timeout / error───────┴──► Error + Closed events
//! ```
//!
//! There is no reconnect: any failure is reported once and the task stops.

use std::time::Duration;

use rumqttc::{
    AsyncClient, ConnectReturnCode, ConnectionError, Event, EventLoop, MqttOptions, NetworkOptions,
    Outgoing, Packet, QoS, SubscribeReasonCode, Transport,
};
use statum::{machine, state};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::config::{ConnectionConfig, DEFAULT_PATH, DEFAULT_PORT};
use super::events::{Envelope, TransportError, TransportEvent};
use crate::config::BrokerSettings;

/// Opens broker connections on behalf of the monitor.
///
/// Implementations report progress exclusively through `events`, tagging
/// every event with `session`. Returning `Err` means no task was started and
/// no events will follow.
pub trait Connector {
    fn connect(
        &self,
        session: u64,
        config: &ConnectionConfig,
        events: mpsc::Sender<Envelope>,
    ) -> Result<TransportHandle, TransportError>;

    /// URL shown to the user for `config`.
    fn broker_url(&self, config: &ConnectionConfig) -> String {
        config.broker_url(DEFAULT_PORT, DEFAULT_PATH)
    }
}

/// Owner of a live connection. Ending or dropping it tears the connection
/// down.
#[derive(Debug)]
pub struct TransportHandle {
    cancel: CancellationToken,
    task: Option<JoinHandle<()>>,
}

impl TransportHandle {
    pub fn new(cancel: CancellationToken, task: JoinHandle<()>) -> Self {
        Self {
            cancel,
            task: Some(task),
        }
    }

    /// Handle for transports that do not run a task of their own.
    pub fn detached(cancel: CancellationToken) -> Self {
        Self { cancel, task: None }
    }

    pub fn end(&mut self) {
        if !self.cancel.is_cancelled() {
            debug!("Ending transport connection");
            self.cancel.cancel();
        }
        // The task observes the token and exits on its own
        self.task.take();
    }

    pub fn is_ended(&self) -> bool {
        self.cancel.is_cancelled()
    }
}

impl Drop for TransportHandle {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

/// Connector speaking MQTT 3.1.1 over WebSocket.
#[derive(Debug, Clone, Default)]
pub struct MqttConnector {
    settings: BrokerSettings,
}

impl MqttConnector {
    pub fn new(settings: BrokerSettings) -> Self {
        Self { settings }
    }

    fn options(&self, session: u64, config: &ConnectionConfig) -> MqttOptions {
        let client_id = format!("stationwatch-{}-{}", std::process::id(), session);
        // With the websocket transport rumqttc takes the full URL as host
        let mut options = MqttOptions::new(client_id, self.broker_url(config), self.settings.port);
        options
            .set_transport(Transport::Ws)
            .set_keep_alive(self.settings.keep_alive())
            .set_clean_session(true);
        options
    }

    /// rumqttc bounds socket setup and the wait for ConnAck with its own
    /// timer, 5s unless told otherwise. It has to match ours.
    fn network_options(&self) -> NetworkOptions {
        let mut network = NetworkOptions::new();
        network.set_connection_timeout(self.settings.connect_timeout_secs);
        network
    }
}

impl Connector for MqttConnector {
    fn connect(
        &self,
        session: u64,
        config: &ConnectionConfig,
        events: mpsc::Sender<Envelope>,
    ) -> Result<TransportHandle, TransportError> {
        info!(
            "Opening MQTT connection #{} to {}",
            session,
            self.broker_url(config)
        );

        let (client, mut eventloop) =
            AsyncClient::new(self.options(session, config), self.settings.channel_capacity);
        eventloop.set_network_options(self.network_options());
        let cancel = CancellationToken::new();

        let pump = MqttPump::<Connecting>::create(
            session,
            config.topic().to_string(),
            client,
            eventloop,
            events,
            cancel.clone(),
            self.settings.connect_timeout(),
        );

        let task = tokio::spawn(async move {
            if let Some(mut streaming) = pump.establish().await {
                streaming.run().await;
            }
            debug!("MQTT connection #{} task finished", session);
        });

        Ok(TransportHandle::new(cancel, task))
    }

    fn broker_url(&self, config: &ConnectionConfig) -> String {
        config.broker_url(self.settings.port, &self.settings.path)
    }
}

/// How long a cancelled connection may take to put DISCONNECT on the wire.
const DISCONNECT_GRACE: Duration = Duration::from_secs(2);

#[state]
#[derive(Debug, Clone)]
pub enum PumpState {
    Connecting,
    Streaming,
}

#[machine]
pub struct MqttPump<S: PumpState> {
    session: u64,
    topic: String,
    client: AsyncClient,
    eventloop: EventLoop,
    events: mpsc::Sender<Envelope>,
    cancel: CancellationToken,
    connect_timeout: Duration,
}

enum Step {
    Cancelled,
    TimedOut,
    Polled(Result<Event, ConnectionError>),
}

/// What the streaming loop does with one event from the broker.
#[derive(Debug, PartialEq, Eq)]
enum Forward {
    Events(Vec<TransportEvent>),
    Close,
    Nothing,
}

/// Maps rumqttc traffic on a subscription to `topic` onto transport events.
fn translate(topic: &str, event: Event) -> Forward {
    match event {
        Event::Incoming(Packet::SubAck(ack)) => Forward::Events(
            ack.return_codes
                .into_iter()
                .map(|code| match code {
                    SubscribeReasonCode::Success(qos) => {
                        info!("Subscribed to {} with {:?}", topic, qos);
                        TransportEvent::Subscribed {
                            topic: topic.to_string(),
                        }
                    }
                    SubscribeReasonCode::Failure => {
                        warn!("Broker rejected subscription to {}", topic);
                        TransportEvent::SubscribeFailed {
                            topic: topic.to_string(),
                        }
                    }
                })
                .collect(),
        ),
        Event::Incoming(Packet::Publish(publish)) => {
            debug!(
                "Received {} bytes on {}",
                publish.payload.len(),
                publish.topic
            );
            Forward::Events(vec![TransportEvent::Message {
                topic: publish.topic,
                payload: publish.payload.to_vec(),
            }])
        }
        Event::Incoming(Packet::Disconnect) => Forward::Close,
        _ => Forward::Nothing,
    }
}

/// Errors while the connection is being set up. rumqttc's own connect
/// timer surfaces as a network timeout and is reported like ours.
fn setup_error(e: ConnectionError, connect_timeout: Duration) -> TransportError {
    match e {
        ConnectionError::NetworkTimeout => TransportError::Timeout(connect_timeout),
        e => TransportError::Connection(e.to_string()),
    }
}

impl<S: PumpState> MqttPump<S> {
    /// Returns false once the monitor has gone away.
    async fn emit(&self, event: TransportEvent) -> bool {
        self.events
            .send(Envelope::new(self.session, event))
            .await
            .is_ok()
    }

    async fn fail(&self, cause: TransportError) {
        error!("MQTT connection #{} failed: {}", self.session, cause);
        if self.emit(TransportEvent::Error { cause }).await {
            self.emit(TransportEvent::Closed).await;
        }
    }
}

impl MqttPump<Connecting> {
    fn create(
        session: u64,
        topic: String,
        client: AsyncClient,
        eventloop: EventLoop,
        events: mpsc::Sender<Envelope>,
        cancel: CancellationToken,
        connect_timeout: Duration,
    ) -> Self {
        Self::new(
            session,
            topic,
            client,
            eventloop,
            events,
            cancel,
            connect_timeout,
        )
    }

    /// Waits for the broker's ConnAck and requests the subscription.
    /// Returns `None` if the connection failed or was cancelled.
    async fn establish(mut self) -> Option<MqttPump<Streaming>> {
        let cancel = self.cancel.clone();
        let deadline = tokio::time::sleep(self.connect_timeout);
        tokio::pin!(deadline);

        loop {
            let step = tokio::select! {
                _ = cancel.cancelled() => Step::Cancelled,
                _ = &mut deadline => Step::TimedOut,
                polled = self.eventloop.poll() => Step::Polled(polled),
            };

            match step {
                Step::Cancelled => {
                    debug!("MQTT connection #{} cancelled while connecting", self.session);
                    return None;
                }
                Step::TimedOut => {
                    self.fail(TransportError::Timeout(self.connect_timeout))
                        .await;
                    return None;
                }
                Step::Polled(Ok(Event::Incoming(Packet::ConnAck(ack)))) => {
                    if ack.code != ConnectReturnCode::Success {
                        self.fail(TransportError::Connection(format!(
                            "broker refused connection: {:?}",
                            ack.code
                        )))
                        .await;
                        return None;
                    }
                    break;
                }
                Step::Polled(Ok(event)) => debug!("Ignoring pre-ConnAck event: {:?}", event),
                Step::Polled(Err(e)) => {
                    self.fail(setup_error(e, self.connect_timeout)).await;
                    return None;
                }
            }
        }

        info!("MQTT connection #{} established", self.session);
        if !self.emit(TransportEvent::Connected).await {
            return None;
        }

        if let Err(e) = self.client.subscribe(self.topic.as_str(), QoS::AtMostOnce).await {
            self.fail(TransportError::Client(e.to_string())).await;
            return None;
        }
        debug!("Subscribe request for {} queued", self.topic);

        Some(self.transition())
    }
}

impl MqttPump<Streaming> {
    /// Forwards broker traffic until the connection fails, the broker
    /// disconnects, the handle is ended or the monitor is gone.
    async fn run(&mut self) {
        let cancel = self.cancel.clone();

        loop {
            let step = tokio::select! {
                _ = cancel.cancelled() => Step::Cancelled,
                polled = self.eventloop.poll() => Step::Polled(polled),
            };

            let event = match step {
                Step::Cancelled | Step::TimedOut => {
                    debug!("MQTT connection #{} cancelled", self.session);
                    self.disconnect().await;
                    return;
                }
                Step::Polled(Ok(event)) => event,
                Step::Polled(Err(e)) => {
                    self.fail(TransportError::Connection(e.to_string())).await;
                    return;
                }
            };

            let delivered = match translate(&self.topic, event) {
                Forward::Events(events) => {
                    let mut delivered = true;
                    for event in events {
                        delivered &= self.emit(event).await;
                    }
                    delivered
                }
                Forward::Close => {
                    info!("Broker closed MQTT connection #{}", self.session);
                    self.emit(TransportEvent::Closed).await;
                    return;
                }
                Forward::Nothing => true,
            };

            if !delivered {
                warn!(
                    "Monitor dropped event channel, stopping MQTT connection #{}",
                    self.session
                );
                return;
            }
        }
    }

    /// Queues DISCONNECT and keeps polling until rumqttc has written it.
    /// The event loop only touches the socket while polled.
    async fn disconnect(&mut self) {
        if let Err(e) = self.client.try_disconnect() {
            debug!("Disconnect request not queued: {}", e);
            return;
        }

        let flushed = tokio::time::timeout(DISCONNECT_GRACE, async {
            loop {
                match self.eventloop.poll().await {
                    Ok(Event::Outgoing(Outgoing::Disconnect)) => return true,
                    Ok(_) => continue,
                    Err(e) => {
                        debug!("Connection ended before DISCONNECT was sent: {}", e);
                        return false;
                    }
                }
            }
        })
        .await;

        match flushed {
            Ok(true) => debug!("MQTT connection #{} sent DISCONNECT", self.session),
            Ok(false) => {}
            Err(_) => warn!(
                "MQTT connection #{} did not send DISCONNECT within {:?}",
                self.session, DISCONNECT_GRACE
            ),
        }
    }
}
