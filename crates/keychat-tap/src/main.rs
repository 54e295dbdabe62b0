//! # keychat-tap
//!
//! Headless broker diagnostic. Connects to the configured MQTT broker,
//! subscribes to the pairing and chat topics of one or more persona URIs and
//! logs every frame it sees, decoded where possible. Ciphertext is never
//! decrypted; only its size is reported.
//!
//! ```text
//! KEYCHAT_MQTT_HOST=broker.local keychat-tap <uri> [<uri> ...]
//! ```
//!
//! With no arguments the URIs are read from `KEYCHAT_TAP_URI`
//! (comma-separated).

use std::sync::Arc;

use tracing::{info, warn};

use keychat_client::{init_tracing, ClientConfig, DEFAULT_LOG_FILTER};
use keychat_net::{Channel, ChannelMessage, ConnectionState, MessageListener, StatusListener};
use keychat_shared::{PairingMessage, TopicPrefixes, WireChatMessage};

struct FrameLogger {
    topics: TopicPrefixes,
}

impl FrameLogger {
    fn log_pairing(&self, frame: &ChannelMessage) -> anyhow::Result<()> {
        let message = PairingMessage::from_json(&frame.payload)?;
        info!(
            topic = %frame.topic,
            msg_type = %message.msg_type,
            sender = %message.sender_id,
            sender_name = %message.sender_name,
            receiver = %message.receiver_id,
            "Pairing frame"
        );
        Ok(())
    }

    fn log_chat(&self, frame: &ChannelMessage) -> anyhow::Result<()> {
        let message = WireChatMessage::from_json(&frame.payload)?;
        let ciphertext_len = message.ciphertext().map(|c| c.len()).unwrap_or(0);
        info!(
            topic = %frame.topic,
            msg_id = %message.id,
            chat_id = ?message.chat_id,
            sender = %message.sender_id,
            receiver = %message.receiver_id,
            ciphertext_len,
            timestamp = message.timestamp,
            "Chat frame"
        );
        Ok(())
    }
}

impl MessageListener for FrameLogger {
    fn on_message(&self, frame: &ChannelMessage) -> anyhow::Result<()> {
        let decoded = if self.topics.is_pairing(&frame.topic) {
            self.log_pairing(frame)
        } else if self.topics.is_chat(&frame.topic) {
            self.log_chat(frame)
        } else {
            info!(topic = %frame.topic, bytes = frame.payload.len(), "Unrecognised frame");
            Ok(())
        };
        if let Err(e) = decoded {
            warn!(topic = %frame.topic, error = %e, payload = %frame.payload, "Undecodable frame");
        }
        Ok(())
    }
}

struct StatusLogger;

impl StatusListener for StatusLogger {
    fn on_status_change(&self, state: ConnectionState) {
        info!(%state, "Broker connection");
    }
}

fn target_uris() -> Vec<String> {
    let from_args: Vec<String> = std::env::args().skip(1).collect();
    if !from_args.is_empty() {
        return from_args;
    }
    std::env::var("KEYCHAT_TAP_URI")
        .unwrap_or_default()
        .split(',')
        .map(str::trim)
        .filter(|uri| !uri.is_empty())
        .map(str::to_string)
        .collect()
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // -----------------------------------------------------------------------
    // 1. Logging and configuration
    // -----------------------------------------------------------------------
    init_tracing(DEFAULT_LOG_FILTER);
    info!("Starting keychat-tap v{}", env!("CARGO_PKG_VERSION"));

    let config = ClientConfig::from_env();
    info!(?config, "Loaded configuration");

    let uris = target_uris();
    if uris.is_empty() {
        anyhow::bail!("no persona URI given (pass as arguments or set KEYCHAT_TAP_URI)");
    }

    // -----------------------------------------------------------------------
    // 2. Connect and subscribe
    // -----------------------------------------------------------------------
    let channel = Channel::mqtt(config.channel_config());
    channel.add_status_listener(Arc::new(StatusLogger));
    channel.add_message_listener(Arc::new(FrameLogger {
        topics: config.topics.clone(),
    }));

    channel.connect().await?;

    let mut topics: Vec<String> = uris
        .iter()
        .flat_map(|uri| config.topics.persona_topics(uri))
        .collect();
    topics.sort();
    topics.dedup();
    channel.subscribe(&topics).await;
    info!(count = topics.len(), "Listening");

    // -----------------------------------------------------------------------
    // 3. Run until interrupted
    // -----------------------------------------------------------------------
    tokio::signal::ctrl_c().await?;
    info!("Shutting down");
    channel.close().await;

    Ok(())
}
