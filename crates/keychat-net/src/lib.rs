// Reconnecting, queued publish/subscribe transport over one MQTT broker connection.

pub mod broker;
pub mod channel;
pub mod error;
pub mod loopback;
pub mod mqtt;
pub mod observers;
pub mod queue;
pub mod status;
pub mod topics;

pub use broker::{Broker, BrokerEvent, ConnAck, QualityOfService};
pub use channel::{Channel, ChannelConfig, ChannelMessage, MessageListener};
pub use error::NetError;
pub use loopback::{LoopbackBroker, LoopbackHub, PublishedFrame};
pub use mqtt::{MqttBroker, MqttSettings};
pub use observers::ObserverList;
pub use queue::WorkQueue;
pub use status::{ConnectionState, StatusListener, StatusTracker};
pub use topics::TopicSet;
