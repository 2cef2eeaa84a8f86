use std::fmt;

pub const DEFAULT_PORT: u16 = 9001;
pub const DEFAULT_PATH: &str = "/mqtt";

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing {0}")]
    Missing(Field),
}

/// User supplied input field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Field {
    Host,
    Topic,
}

impl fmt::Display for Field {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Field::Host => write!(f, "broker host"),
            Field::Topic => write!(f, "topic"),
        }
    }
}

/// Broker host and topic of one connection attempt.
///
/// Only constructible through [`ConnectionConfig::configure`], so a value
/// always carries a non-empty host and topic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionConfig {
    host: String,
    topic: String,
}

impl ConnectionConfig {
    /// Validates user input. Surrounding whitespace is ignored.
    pub fn configure(host: &str, topic: &str) -> Result<Self, ConfigError> {
        let host = host.trim();
        let topic = topic.trim();

        if host.is_empty() {
            return Err(ConfigError::Missing(Field::Host));
        }
        if topic.is_empty() {
            return Err(ConfigError::Missing(Field::Topic));
        }

        Ok(Self {
            host: host.to_string(),
            topic: topic.to_string(),
        })
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// WebSocket URL of the broker, e.g. `ws://10.0.0.5:9001/mqtt`.
    pub fn broker_url(&self, port: u16, path: &str) -> String {
        let path = path.trim_start_matches('/');
        format!("ws://{}:{}/{}", self.host, port, path)
    }
}

impl fmt::Display for ConnectionConfig {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{} @ {}", self.topic, self.host)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_configure_rejects_empty_fields() {
        assert_eq!(
            ConnectionConfig::configure("", "status"),
            Err(ConfigError::Missing(Field::Host))
        );
        assert_eq!(
            ConnectionConfig::configure("10.0.0.5", "   "),
            Err(ConfigError::Missing(Field::Topic))
        );
    }

    #[test]
    fn test_configure_trims_input() {
        let config = ConnectionConfig::configure(" 10.0.0.5 ", "status\n").unwrap();
        assert_eq!(config.host(), "10.0.0.5");
        assert_eq!(config.topic(), "status");
    }

    #[test]
    fn test_broker_url() {
        let config = ConnectionConfig::configure("10.0.0.5", "status").unwrap();
        assert_eq!(
            config.broker_url(DEFAULT_PORT, DEFAULT_PATH),
            "ws://10.0.0.5:9001/mqtt"
        );
        assert_eq!(config.broker_url(8080, "ws"), "ws://10.0.0.5:8080/ws");
    }

    #[test]
    fn test_missing_message() {
        let err = ConnectionConfig::configure("", "").unwrap_err();
        assert_eq!(err.to_string(), "Missing broker host");
    }
}
