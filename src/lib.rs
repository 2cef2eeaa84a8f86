//! Device-liveness monitor for MQTT status topics.
//!
//! Connects to a broker over WebSocket, logs every message on one topic and
//! raises an alert whenever a payload reports `"status": "offline"`.

pub mod commands;
pub mod config;
pub mod monitor;
pub mod mqtt;
pub mod notify;
