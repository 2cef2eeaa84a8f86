use serde_json::Value;

pub const OFFLINE: &str = "offline";
pub const UNKNOWN_STATION: &str = "Unknown Station";

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ParseError {
    #[error("Malformed payload: {0}")]
    MalformedPayload(String),
}

/// Liveness report decoded from one payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusEvent {
    pub status: Option<String>,
    pub station_id: String,
}

impl StatusEvent {
    /// Parses a JSON payload. Any valid JSON is accepted; fields that are
    /// missing or not strings are treated as absent.
    pub fn parse(text: &str) -> Result<Self, ParseError> {
        let value: Value =
            serde_json::from_str(text).map_err(|e| ParseError::MalformedPayload(e.to_string()))?;

        let status = value
            .get("status")
            .and_then(Value::as_str)
            .map(str::to_string);
        let station_id = value
            .get("stationId")
            .and_then(Value::as_str)
            .unwrap_or(UNKNOWN_STATION)
            .to_string();

        Ok(Self { status, station_id })
    }

    /// Exact, case-sensitive match on `"offline"`.
    pub fn is_offline(&self) -> bool {
        self.status.as_deref() == Some(OFFLINE)
    }
}
