//! Alert delivery.
//!
//! Alerts go to the notification channel when the user granted
//! notifications at startup. Without permission, or once the notification
//! consumer is gone, they are written synchronously to a fallback writer.

use std::fmt;
use std::io::Write;

use tokio::sync::mpsc;
use tracing::{debug, error, info};

pub const DEVICE_OFFLINE_TITLE: &str = "Device Offline";

/// Receiver of user-facing alerts.
pub trait AlertSink {
    fn notify(&mut self, alert: &Alert);
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Alert {
    pub title: String,
    pub body: String,
}

impl Alert {
    pub fn new(title: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            body: body.into(),
        }
    }

    pub fn device_offline(station_id: &str) -> Self {
        Self::new(
            DEVICE_OFFLINE_TITLE,
            format!("Device \"{}\" is offline", station_id),
        )
    }

    pub fn permission_denied() -> Self {
        Self::new(
            "Notifications Disabled",
            "Offline alerts will be shown inline instead of as notifications",
        )
    }
}

impl fmt::Display for Alert {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}: {}", self.title, self.body)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotificationPermission {
    Granted,
    Denied,
}

pub struct Notifier {
    permission: NotificationPermission,
    channel: Option<mpsc::UnboundedSender<Alert>>,
    fallback: Box<dyn Write + Send>,
}

impl Notifier {
    /// Creates a notifier together with the receiving end of the
    /// notification channel.
    pub fn new(
        permission: NotificationPermission,
        fallback: Box<dyn Write + Send>,
    ) -> (Self, mpsc::UnboundedReceiver<Alert>) {
        let (tx, rx) = mpsc::unbounded_channel();
        info!("Notification permission: {:?}", permission);
        (
            Self {
                permission,
                channel: Some(tx),
                fallback,
            },
            rx,
        )
    }

    pub fn permission(&self) -> NotificationPermission {
        self.permission
    }

    /// Tells the user once, at startup, that alerts will not arrive as
    /// notifications. Returns whether anything was written.
    pub fn announce_permission(&mut self) -> bool {
        if self.permission() == NotificationPermission::Granted {
            return false;
        }
        self.notify(&Alert::permission_denied());
        true
    }

    fn alert_inline(&mut self, alert: &Alert) {
        if let Err(e) = writeln!(self.fallback, "[ALERT] {}", alert) {
            error!("Failed to write fallback alert: {}", e);
        }
        if let Err(e) = self.fallback.flush() {
            error!("Failed to flush fallback alert: {}", e);
        }
    }
}

impl AlertSink for Notifier {
    fn notify(&mut self, alert: &Alert) {
        if self.permission == NotificationPermission::Granted {
            if let Some(channel) = &self.channel {
                if channel.send(alert.clone()).is_ok() {
                    debug!("Alert queued as notification: {}", alert.title);
                    return;
                }
                debug!("Notification receiver gone, switching to inline alerts");
                self.channel = None;
            }
        }
        self.alert_inline(alert);
    }
}
