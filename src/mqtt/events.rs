use std::time::Duration;

/// Errors raised by the broker connection. Carried inside
/// [`TransportEvent::Error`], so every variant is plain data.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    #[error("Client request failed: {0}")]
    Client(String),

    #[error("Connection failed: {0}")]
    Connection(String),

    #[error("Broker did not acknowledge the connection within {0:?}")]
    Timeout(Duration),
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Subscription to {topic} failed")]
pub struct SubscriptionError {
    pub topic: String,
}

/// Everything a transport reports back to the monitor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    Connected,
    Subscribed { topic: String },
    SubscribeFailed { topic: String },
    Message { topic: String, payload: Vec<u8> },
    Error { cause: TransportError },
    Closed,
}

/// A transport event tagged with the connection generation that produced it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Envelope {
    pub session: u64,
    pub event: TransportEvent,
}

impl Envelope {
    pub fn new(session: u64, event: TransportEvent) -> Self {
        Self { session, event }
    }
}
