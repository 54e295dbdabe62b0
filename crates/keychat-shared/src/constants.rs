/// Sentinel participant id of the broadcast conversation.
pub const BROADCAST_ID: &str = "ALL";

/// Default MQTT broker port
pub const DEFAULT_MQTT_PORT: u16 = 1883;

/// Default broker connect timeout in seconds
pub const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 10;

/// Default MQTT keep-alive interval in seconds
pub const DEFAULT_KEEP_ALIVE_SECS: u64 = 60;

/// rumqttc rejects keep-alive intervals shorter than this
pub const MIN_KEEP_ALIVE_SECS: u64 = 5;

/// Default topic prefixes. The full topic is `<prefix><identity-uri>`.
pub const DEFAULT_PAIRING_PREFIX: &str = "keychat/pairing/";
pub const DEFAULT_CHAT_PREFIX: &str = "keychat/chats/";

/// Default monitor refresh interval in seconds
pub const DEFAULT_REFRESH_INTERVAL_SECS: u64 = 5;

/// How often a paused monitor loop re-checks its state
pub const PAUSED_POLL_INTERVAL_MS: u64 = 1000;

/// Default capacity of the outbound publish queue
pub const DEFAULT_QUEUE_CAPACITY: usize = 1024;

/// Default directory (trusted identity directory) HTTP port
pub const DEFAULT_DIRECTORY_PORT: u16 = 8080;

/// Directory response codes treated as success on upload
pub const DIRECTORY_OK: &str = "OK";
pub const DIRECTORY_PROFILE_EXISTS: &str = "T003_PROFILE_EXISTS";
