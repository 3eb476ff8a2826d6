use crate::error::Result;
use serde::{Deserialize, Serialize};
use std::time::Duration;

pub const DEFAULT_MAX_MESSAGE_SIZE: usize = 65536;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Client name, used for `/queue/<name>` and `/subscription/<name>/...`.
    pub name: String,
    pub host: String,
    pub port: u16,
    /// Upper bound for connecting and for a single request/response round trip.
    #[serde(rename = "timeout_ms", with = "duration_ms")]
    pub timeout: Duration,
    /// Extra connection attempts `start` makes after the first one fails.
    /// Reconnects during a round trip always make a single attempt.
    pub max_retries: u32,
    #[serde(rename = "retry_delay_ms", with = "duration_ms")]
    pub retry_delay: Duration,
    pub max_message_size: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            name: "client".to_string(),
            host: "localhost".to_string(),
            port: 1337,
            timeout: Duration::from_secs(30),
            max_retries: 0,
            retry_delay: Duration::from_millis(100),
            max_message_size: DEFAULT_MAX_MESSAGE_SIZE,
        }
    }
}

impl Config {
    /// Loads a configuration from a JSON document. Missing fields keep their defaults.
    ///
    /// ```
    /// use mq_client::Config;
    ///
    /// let config = Config::from_json(r#"{"name": "worker-1", "port": 9000}"#).unwrap();
    /// assert_eq!(config.name, "worker-1");
    /// assert_eq!(config.port, 9000);
    /// assert_eq!(config.host, "localhost");
    /// ```
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    pub(crate) fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

pub struct ConfigBuilder {
    config: Config,
}

impl ConfigBuilder {
    pub fn new() -> Self {
        Self {
            config: Config::default(),
        }
    }

    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.config.name = name.into();
        self
    }

    pub fn host(mut self, host: impl Into<String>) -> Self {
        self.config.host = host.into();
        self
    }

    pub fn port(mut self, port: u16) -> Self {
        self.config.port = port;
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.config.timeout = timeout;
        self
    }

    pub fn timeout_ms(mut self, ms: u64) -> Self {
        self.config.timeout = Duration::from_millis(ms);
        self
    }

    pub fn max_retries(mut self, retries: u32) -> Self {
        self.config.max_retries = retries;
        self
    }

    pub fn retry_delay(mut self, delay: Duration) -> Self {
        self.config.retry_delay = delay;
        self
    }

    pub fn retry_delay_ms(mut self, ms: u64) -> Self {
        self.config.retry_delay = Duration::from_millis(ms);
        self
    }

    pub fn max_message_size(mut self, size: usize) -> Self {
        self.config.max_message_size = size;
        self
    }

    pub fn build(self) -> Config {
        self.config
    }
}

impl Default for ConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

mod duration_ms {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(duration.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::MqError;

    #[test]
    fn test_config_default() {
        let config = Config::default();

        assert_eq!(config.host, "localhost");
        assert_eq!(config.port, 1337);
        assert_eq!(config.timeout, Duration::from_secs(30));
        assert_eq!(config.max_retries, 0);
        assert_eq!(config.retry_delay, Duration::from_millis(100));
        assert_eq!(config.max_message_size, DEFAULT_MAX_MESSAGE_SIZE);
        assert_eq!(config.address(), "localhost:1337");
    }

    #[test]
    fn test_config_builder() {
        let config = ConfigBuilder::new()
            .name("alice")
            .host("broker.example.com")
            .port(9000)
            .timeout_ms(2500)
            .max_retries(0)
            .retry_delay_ms(10)
            .max_message_size(1024)
            .build();

        assert_eq!(config.name, "alice");
        assert_eq!(config.address(), "broker.example.com:9000");
        assert_eq!(config.timeout, Duration::from_millis(2500));
        assert_eq!(config.max_retries, 0);
        assert_eq!(config.retry_delay, Duration::from_millis(10));
        assert_eq!(config.max_message_size, 1024);
    }

    #[test]
    fn test_config_from_json_partial() {
        let config = Config::from_json(r#"{"host": "10.0.0.5", "timeout_ms": 750}"#).unwrap();

        assert_eq!(config.host, "10.0.0.5");
        assert_eq!(config.timeout, Duration::from_millis(750));
        assert_eq!(config.port, 1337);
        assert_eq!(config.retry_delay, Duration::from_millis(100));
    }

    #[test]
    fn test_config_json_uses_milliseconds() {
        let config = ConfigBuilder::new().timeout_ms(1500).build();
        let json = serde_json::to_string(&config).unwrap();

        assert!(json.contains("\"timeout_ms\":1500"));
        assert!(json.contains("\"retry_delay_ms\":100"));
        assert_eq!(Config::from_json(&json).unwrap(), config);
    }

    #[test]
    fn test_config_from_invalid_json() {
        let result = Config::from_json(r#"{"port": "not a number"}"#);
        assert!(matches!(result, Err(MqError::Serialization(_))));
    }
}
