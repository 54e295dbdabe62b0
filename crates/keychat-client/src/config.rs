//! Client configuration loaded from environment variables.
//!
//! Every setting has a default so a client can start against a local broker
//! with zero configuration.

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use keychat_net::ChannelConfig;
use keychat_shared::constants::{
    DEFAULT_CHAT_PREFIX, DEFAULT_CONNECT_TIMEOUT_SECS, DEFAULT_DIRECTORY_PORT,
    DEFAULT_KEEP_ALIVE_SECS, DEFAULT_MQTT_PORT, DEFAULT_PAIRING_PREFIX, DEFAULT_QUEUE_CAPACITY,
    DEFAULT_REFRESH_INTERVAL_SECS,
};
use keychat_shared::TopicPrefixes;

#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Env: `KEYCHAT_MQTT_HOST`. Default: `localhost`
    pub mqtt_host: String,

    /// Env: `KEYCHAT_MQTT_PORT`. Default: `1883`
    pub mqtt_port: u16,

    /// MQTT client id, generated once per process.
    pub client_id: String,

    /// Env: `KEYCHAT_CONNECT_TIMEOUT` (seconds). Default: `10`
    pub connect_timeout: Duration,

    /// Env: `KEYCHAT_KEEP_ALIVE` (seconds). Default: `60`
    pub keep_alive: Duration,

    /// Env: `KEYCHAT_PAIRING_PREFIX` / `KEYCHAT_CHAT_PREFIX`
    pub topics: TopicPrefixes,

    /// Env: `KEYCHAT_REFRESH_INTERVAL` (seconds). Default: `5`
    pub refresh_interval: Duration,

    /// Env: `KEYCHAT_QUEUE_CAPACITY`. Default: `1024`
    pub queue_capacity: usize,

    /// Trusted directory. Env: `KEYCHAT_DIRECTORY_HOST`; unset disables
    /// directory pairing.
    pub directory_host: Option<String>,

    /// Env: `KEYCHAT_DIRECTORY_PORT`. Default: `8080`
    pub directory_port: u16,

    /// Env: `KEYCHAT_DIRECTORY_DOMAIN`. Default: `keychat`
    pub directory_domain: String,

    /// Env: `KEYCHAT_DB_PATH`. Default: platform data directory.
    pub db_path: Option<PathBuf>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            mqtt_host: "localhost".to_string(),
            mqtt_port: DEFAULT_MQTT_PORT,
            client_id: format!("keychat-{}", uuid::Uuid::new_v4()),
            connect_timeout: Duration::from_secs(DEFAULT_CONNECT_TIMEOUT_SECS),
            keep_alive: Duration::from_secs(DEFAULT_KEEP_ALIVE_SECS),
            topics: TopicPrefixes {
                pairing: DEFAULT_PAIRING_PREFIX.to_string(),
                chat: DEFAULT_CHAT_PREFIX.to_string(),
            },
            refresh_interval: Duration::from_secs(DEFAULT_REFRESH_INTERVAL_SECS),
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            directory_host: None,
            directory_port: DEFAULT_DIRECTORY_PORT,
            directory_domain: "keychat".to_string(),
            db_path: None,
        }
    }
}

impl ClientConfig {
    /// Load configuration from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from an arbitrary key lookup, so parsing can be tested without
    /// touching the process environment.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();

        if let Some(host) = lookup("KEYCHAT_MQTT_HOST") {
            config.mqtt_host = host;
        }
        parse_into(&lookup, "KEYCHAT_MQTT_PORT", &mut config.mqtt_port);
        parse_secs_into(&lookup, "KEYCHAT_CONNECT_TIMEOUT", &mut config.connect_timeout);
        parse_secs_into(&lookup, "KEYCHAT_KEEP_ALIVE", &mut config.keep_alive);
        parse_secs_into(&lookup, "KEYCHAT_REFRESH_INTERVAL", &mut config.refresh_interval);
        parse_into(&lookup, "KEYCHAT_QUEUE_CAPACITY", &mut config.queue_capacity);

        if let Some(prefix) = lookup("KEYCHAT_PAIRING_PREFIX") {
            config.topics.pairing = prefix;
        }
        if let Some(prefix) = lookup("KEYCHAT_CHAT_PREFIX") {
            config.topics.chat = prefix;
        }

        if let Some(host) = lookup("KEYCHAT_DIRECTORY_HOST") {
            if !host.is_empty() {
                config.directory_host = Some(host);
            }
        }
        parse_into(&lookup, "KEYCHAT_DIRECTORY_PORT", &mut config.directory_port);
        if let Some(domain) = lookup("KEYCHAT_DIRECTORY_DOMAIN") {
            config.directory_domain = domain;
        }

        if let Some(path) = lookup("KEYCHAT_DB_PATH") {
            config.db_path = Some(PathBuf::from(path));
        }

        // RUST_LOG is handled directly by tracing-subscriber's EnvFilter.

        config
    }

    pub fn channel_config(&self) -> ChannelConfig {
        ChannelConfig {
            host: self.mqtt_host.clone(),
            port: self.mqtt_port,
            client_id: self.client_id.clone(),
            connect_timeout: self.connect_timeout,
            keep_alive: self.keep_alive,
            queue_capacity: self.queue_capacity,
        }
    }
}

fn parse_into<T: FromStr>(lookup: &impl Fn(&str) -> Option<String>, key: &str, slot: &mut T) {
    if let Some(value) = lookup(key) {
        match value.trim().parse::<T>() {
            Ok(parsed) => *slot = parsed,
            Err(_) => tracing::warn!(key, value = %value, "Invalid setting, using default"),
        }
    }
}

fn parse_secs_into(lookup: &impl Fn(&str) -> Option<String>, key: &str, slot: &mut Duration) {
    let mut secs = slot.as_secs();
    parse_into(lookup, key, &mut secs);
    if secs == 0 {
        tracing::warn!(key, "Zero interval, using default");
        return;
    }
    *slot = Duration::from_secs(secs);
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key: &str| map.get(key).cloned()
    }

    #[test]
    fn test_default_config() {
        let config = ClientConfig::from_lookup(lookup(&[]));
        assert_eq!(config.mqtt_port, 1883);
        assert_eq!(config.connect_timeout, Duration::from_secs(10));
        assert_eq!(config.refresh_interval, Duration::from_secs(5));
        assert_eq!(config.topics.pairing, "keychat/pairing/");
        assert!(config.client_id.starts_with("keychat-"));
        assert!(config.directory_host.is_none());
    }

    #[test]
    fn test_overrides_and_invalid_values() {
        let config = ClientConfig::from_lookup(lookup(&[
            ("KEYCHAT_MQTT_HOST", "broker.local"),
            ("KEYCHAT_MQTT_PORT", "not-a-port"),
            ("KEYCHAT_KEEP_ALIVE", "30"),
            ("KEYCHAT_REFRESH_INTERVAL", "0"),
            ("KEYCHAT_CHAT_PREFIX", "c/"),
            ("KEYCHAT_DIRECTORY_HOST", "dir.local"),
        ]));

        assert_eq!(config.mqtt_host, "broker.local");
        assert_eq!(config.mqtt_port, 1883);
        assert_eq!(config.keep_alive, Duration::from_secs(30));
        assert_eq!(config.refresh_interval, Duration::from_secs(5));
        assert_eq!(config.topics.chat, "c/");
        assert_eq!(config.directory_host.as_deref(), Some("dir.local"));

        let channel = config.channel_config();
        assert_eq!(channel.host, "broker.local");
        assert_eq!(channel.client_id, config.client_id);
    }
}
