use hostname::get as get_hostname;
use std::env;
use std::str::FromStr;

/// Retained availability state kept by the broker for this client: `online`
/// is published on every connect, `offline` is registered as the last will.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Availability {
    pub topic: String,
    pub online: String,
    pub offline: String,
}

#[derive(Debug, Clone)]
pub struct MqttConfig {
    pub host: String,
    pub port: u16,
    pub client_id: String,
    pub username: Option<String>,
    pub password: Option<String>,
    pub keep_alive_secs: u16,
    pub clean_session: bool,
    /// Messages held while disconnected before the oldest is dropped.
    pub queue_capacity: usize,
    pub availability: Option<Availability>,
}

impl Default for MqttConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 1883,
            client_id: default_client_id(),
            username: None,
            password: None,
            keep_alive_secs: 30,
            clean_session: true,
            queue_capacity: 1000,
            availability: None,
        }
    }
}

impl MqttConfig {
    pub fn from_env() -> Self {
        let defaults = MqttConfig::default();
        Self {
            host: env_string("MQTT_BROKER_HOST").unwrap_or(defaults.host),
            port: env_parsed("MQTT_BROKER_PORT").unwrap_or(defaults.port),
            client_id: env_string("MQTT_CLIENT_ID").unwrap_or(defaults.client_id),
            username: env_string("MQTT_USERNAME"),
            password: env_string("MQTT_PASSWORD"),
            keep_alive_secs: env_parsed("MQTT_KEEP_ALIVE_SECS").unwrap_or(defaults.keep_alive_secs),
            clean_session: defaults.clean_session,
            queue_capacity: env_parsed("MQTT_QUEUE_CAPACITY").unwrap_or(defaults.queue_capacity),
            availability: None,
        }
    }

    pub fn with_availability(mut self, topic: impl Into<String>, online: &str, offline: &str) -> Self {
        self.availability = Some(Availability {
            topic: topic.into(),
            online: online.to_string(),
            offline: offline.to_string(),
        });
        self
    }
}

fn env_string(key: &str) -> Option<String> {
    env::var(key).ok().filter(|v| !v.is_empty())
}

// Unparseable values fall back to the default.
fn env_parsed<T: FromStr>(key: &str) -> Option<T> {
    env::var(key).ok().and_then(|v| v.trim().parse().ok())
}

fn default_client_id() -> String {
    let host = get_hostname()
        .ok()
        .and_then(|h| h.into_string().ok())
        .unwrap_or_else(|| "unknown-host".to_string());
    let pid = std::process::id();
    format!("hassprint-{}-{}", host, pid)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_client_id_is_prefixed() {
        let cfg = MqttConfig::default();
        assert!(cfg.client_id.starts_with("hassprint-"));
        assert!(cfg.availability.is_none());
        assert_eq!(cfg.port, 1883);
    }

    #[test]
    fn availability_builder() {
        let cfg = MqttConfig::default().with_availability("octoPrint/mqtt", "connected", "disconnected");
        let a = cfg.availability.unwrap();
        assert_eq!(a.topic, "octoPrint/mqtt");
        assert_eq!(a.offline, "disconnected");
    }
}
