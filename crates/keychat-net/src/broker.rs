//! Seam between the transport channel and a concrete broker client.
//!
//! A broker implementation performs the network calls and reports its
//! lifecycle through [`BrokerEvent`]s on the unbounded sender it was built
//! with. The channel pumps those events into its state machine and inbound
//! queue.

use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::error::NetError;

/// MQTT delivery guarantee.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QualityOfService {
    AtMostOnce,
    AtLeastOnce,
    ExactlyOnce,
}

/// Result of a successful connect.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ConnAck {
    pub session_present: bool,
}

/// Callbacks raised by the broker client.
///
/// Connect outcomes are reported through the [`Broker::connect`] future;
/// events only carry what happens after that.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BrokerEvent {
    /// The connection is gone without the channel asking for it.
    /// `was_connected` is false when an attempt failed before the broker
    /// acknowledged it.
    Disconnected { was_connected: bool },
    /// A message arrived on a subscribed topic.
    Message { topic: String, payload: String },
}

pub type BrokerEvents = mpsc::UnboundedSender<BrokerEvent>;

#[async_trait]
pub trait Broker: Send + Sync {
    /// Open a clean-session connection; must give up after `timeout`.
    async fn connect(&self, timeout: Duration) -> Result<ConnAck, NetError>;

    /// Graceful close. Does not raise [`BrokerEvent::Disconnected`].
    async fn disconnect(&self) -> Result<(), NetError>;

    async fn subscribe(&self, topic: &str, qos: QualityOfService) -> Result<(), NetError>;

    async fn unsubscribe(&self, topic: &str) -> Result<(), NetError>;

    async fn publish(
        &self,
        topic: &str,
        payload: &str,
        qos: QualityOfService,
        retain: bool,
    ) -> Result<(), NetError>;
}
