//! # MQTT Transport
//!
//! Connects to a broker over WebSocket and turns the rumqttc event loop into
//! a channel of tagged [`TransportEvent`]s.
//!
//! ```text
//! mqtt/
//! ├── config.rs        - validated host/topic input and broker URL
//! ├── events.rs        - transport events, envelopes and error types
//! └── mqtt_handler.rs  - connector trait, handles and the rumqttc task
//! ```
//!
//! The monitor never talks to rumqttc directly. It asks a [`Connector`] for a
//! connection and only ever sees [`Envelope`]s, which keeps the rumqttc task
//! swappable for an in-memory transport in tests.

pub mod config;
pub mod events;
pub mod mqtt_handler;

pub use config::{ConfigError, ConnectionConfig, Field};
pub use events::{Envelope, SubscriptionError, TransportError, TransportEvent};
pub use mqtt_handler::{Connector, MqttConnector, TransportHandle};
