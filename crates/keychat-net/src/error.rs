use std::time::Duration;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum NetError {
    #[error("Timed out connecting to broker after {0:?}")]
    ConnectTimeout(Duration),

    #[error("Broker rejected connection: {0}")]
    ConnectRejected(String),

    #[error("Not connected to broker")]
    NotConnected,

    #[error("Outbound queue is full ({0} messages)")]
    QueueFull(usize),

    #[error("Channel is closed")]
    Closed,

    #[error("Broker error: {0}")]
    Broker(String),
}

impl From<rumqttc::ClientError> for NetError {
    fn from(e: rumqttc::ClientError) -> Self {
        NetError::Broker(e.to_string())
    }
}
