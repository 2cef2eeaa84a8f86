//! # Liveness Monitoring
//!
//! Turns the stream of status payloads on one topic into a message log and
//! device-offline alerts.
//!
//! ```text
//! Transport ──Envelope──► LivenessMonitor ──► StatusEvent::parse ──► AlertSink
//!                               │
//!                               └──────────────► LogSink
//! ```
//!
//! Payload classification is a plain string comparison on the `status`
//! field. Whether repeated offline reports re-alert is decided by
//! [`AlertPolicy`].

pub mod liveness;
pub mod log;
pub mod status;

use serde::{Deserialize, Serialize};

pub use liveness::{Command, ConnectionState, LivenessMonitor, MonitorError, MonitorStatus};
pub use log::{EntryKind, LogEntry, LogSink, MessageLog};
pub use status::{ParseError, StatusEvent};

/// How repeated offline reports for the same station are handled.
#[derive(Deserialize, Serialize, Clone, Copy, Debug, Default, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum AlertPolicy {
    /// Every offline report raises an alert.
    #[default]
    EveryMessage,
    /// Only the first offline report of a station alerts; the station is
    /// re-armed once it reports any other status or the monitor disconnects.
    OncePerOutage,
}
