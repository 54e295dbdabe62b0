//! In-process broker.
//!
//! Every [`LoopbackBroker`] handed out by a [`LoopbackHub`] behaves like a
//! client connected to the same MQTT broker: exact-match topic routing,
//! retained messages replayed on subscribe, clean sessions. The hub can also
//! misbehave on request (duplicate delivery, refused connects, dropped
//! connections) and keeps a log of everything published through it.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tracing::debug;

use crate::broker::{Broker, BrokerEvent, BrokerEvents, ConnAck, QualityOfService};
use crate::channel::{Channel, ChannelConfig};
use crate::error::NetError;

/// One publish observed by the hub.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishedFrame {
    pub client_id: String,
    pub topic: String,
    pub payload: String,
    pub retain: bool,
}

struct ClientSlot {
    events: BrokerEvents,
    connected: bool,
    subscriptions: HashSet<String>,
}

#[derive(Default)]
struct HubState {
    clients: HashMap<String, ClientSlot>,
    published: Vec<PublishedFrame>,
    retained: HashMap<String, String>,
    duplicate_delivery: bool,
    refuse_connections: bool,
    stall_connections: bool,
    connect_attempts: usize,
}

impl HubState {
    fn route(&self, topic: &str, payload: &str) {
        let copies = if self.duplicate_delivery { 2 } else { 1 };
        for (id, slot) in &self.clients {
            if !slot.connected || !slot.subscriptions.contains(topic) {
                continue;
            }
            for _ in 0..copies {
                let event = BrokerEvent::Message {
                    topic: topic.to_string(),
                    payload: payload.to_string(),
                };
                if slot.events.send(event).is_err() {
                    debug!(client_id = %id, "Loopback client receiver gone");
                }
            }
        }
    }
}

#[derive(Clone, Default)]
pub struct LoopbackHub {
    state: Arc<Mutex<HubState>>,
}

impl LoopbackHub {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HubState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Register a client and return its broker handle plus the event stream
    /// the channel should pump. Reusing a client id replaces the old client.
    pub fn broker(&self, client_id: &str) -> (LoopbackBroker, mpsc::UnboundedReceiver<BrokerEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        self.lock().clients.insert(
            client_id.to_string(),
            ClientSlot {
                events: tx,
                connected: false,
                subscriptions: HashSet::new(),
            },
        );
        let broker = LoopbackBroker {
            client_id: client_id.to_string(),
            hub: self.clone(),
        };
        (broker, rx)
    }

    /// Spawn a [`Channel`] wired to this hub under `config.client_id`.
    pub fn channel(&self, config: ChannelConfig) -> Channel {
        let (broker, events) = self.broker(&config.client_id);
        Channel::spawn(Arc::new(broker), events, config)
    }

    /// Deliver every routed message twice, like an at-least-once broker
    /// that lost an acknowledgement.
    pub fn set_duplicate_delivery(&self, enabled: bool) {
        self.lock().duplicate_delivery = enabled;
    }

    pub fn refuse_connections(&self, refuse: bool) {
        self.lock().refuse_connections = refuse;
    }

    /// Never acknowledge connects; each attempt times out.
    pub fn stall_connections(&self, stall: bool) {
        self.lock().stall_connections = stall;
    }

    /// Sever a client's connection as if the network failed.
    pub fn drop_connection(&self, client_id: &str) -> bool {
        let mut state = self.lock();
        match state.clients.get_mut(client_id) {
            Some(slot) if slot.connected => {
                slot.connected = false;
                slot.subscriptions.clear();
                let _ = slot
                    .events
                    .send(BrokerEvent::Disconnected { was_connected: true });
                true
            }
            _ => false,
        }
    }

    pub fn is_connected(&self, client_id: &str) -> bool {
        self.lock()
            .clients
            .get(client_id)
            .map(|slot| slot.connected)
            .unwrap_or(false)
    }

    pub fn subscriptions(&self, client_id: &str) -> Vec<String> {
        let state = self.lock();
        let mut topics: Vec<String> = state
            .clients
            .get(client_id)
            .map(|slot| slot.subscriptions.iter().cloned().collect())
            .unwrap_or_default();
        topics.sort();
        topics
    }

    pub fn published(&self) -> Vec<PublishedFrame> {
        self.lock().published.clone()
    }

    pub fn published_to(&self, topic: &str) -> Vec<PublishedFrame> {
        self.lock()
            .published
            .iter()
            .filter(|frame| frame.topic == topic)
            .cloned()
            .collect()
    }

    pub fn connect_attempts(&self) -> usize {
        self.lock().connect_attempts
    }
}

/// A client of a [`LoopbackHub`].
pub struct LoopbackBroker {
    client_id: String,
    hub: LoopbackHub,
}

impl LoopbackBroker {
    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    fn with_connected<T>(
        &self,
        f: impl FnOnce(&mut HubState) -> T,
    ) -> Result<T, NetError> {
        let mut state = self.hub.lock();
        let connected = state
            .clients
            .get(&self.client_id)
            .map(|slot| slot.connected)
            .unwrap_or(false);
        if !connected {
            return Err(NetError::NotConnected);
        }
        Ok(f(&mut state))
    }
}

#[async_trait]
impl Broker for LoopbackBroker {
    async fn connect(&self, timeout: Duration) -> Result<ConnAck, NetError> {
        let stalled = {
            let mut state = self.hub.lock();
            state.connect_attempts += 1;
            if state.refuse_connections {
                return Err(NetError::ConnectRejected("refused by loopback hub".into()));
            }
            state.stall_connections
        };
        if stalled {
            tokio::time::sleep(timeout).await;
            return Err(NetError::ConnectTimeout(timeout));
        }

        let mut state = self.hub.lock();
        let slot = state
            .clients
            .get_mut(&self.client_id)
            .ok_or_else(|| NetError::Broker(format!("unknown client {}", self.client_id)))?;
        slot.connected = true;
        slot.subscriptions.clear();
        Ok(ConnAck::default())
    }

    async fn disconnect(&self) -> Result<(), NetError> {
        if let Some(slot) = self.hub.lock().clients.get_mut(&self.client_id) {
            slot.connected = false;
            slot.subscriptions.clear();
        }
        Ok(())
    }

    async fn subscribe(&self, topic: &str, _qos: QualityOfService) -> Result<(), NetError> {
        self.with_connected(|state| {
            let retained = state.retained.get(topic).cloned();
            let Some(slot) = state.clients.get_mut(&self.client_id) else {
                return;
            };
            slot.subscriptions.insert(topic.to_string());
            if let Some(payload) = retained {
                let _ = slot.events.send(BrokerEvent::Message {
                    topic: topic.to_string(),
                    payload,
                });
            }
        })
    }

    async fn unsubscribe(&self, topic: &str) -> Result<(), NetError> {
        self.with_connected(|state| {
            if let Some(slot) = state.clients.get_mut(&self.client_id) {
                slot.subscriptions.remove(topic);
            }
        })
    }

    async fn publish(
        &self,
        topic: &str,
        payload: &str,
        _qos: QualityOfService,
        retain: bool,
    ) -> Result<(), NetError> {
        self.with_connected(|state| {
            state.published.push(PublishedFrame {
                client_id: self.client_id.clone(),
                topic: topic.to_string(),
                payload: payload.to_string(),
                retain,
            });
            if retain {
                state.retained.insert(topic.to_string(), payload.to_string());
            }
            state.route(topic, payload);
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_routes_exact_topics_only() {
        let hub = LoopbackHub::new();
        let (a, _a_events) = hub.broker("a");
        let (b, mut b_events) = hub.broker("b");

        a.connect(Duration::from_secs(1)).await.unwrap();
        b.connect(Duration::from_secs(1)).await.unwrap();
        b.subscribe("chat/B", QualityOfService::ExactlyOnce)
            .await
            .unwrap();

        a.publish("chat/C", "x", QualityOfService::ExactlyOnce, false)
            .await
            .unwrap();
        a.publish("chat/B", "hi", QualityOfService::ExactlyOnce, false)
            .await
            .unwrap();

        assert_eq!(
            b_events.recv().await,
            Some(BrokerEvent::Message {
                topic: "chat/B".into(),
                payload: "hi".into()
            })
        );
        assert!(b_events.try_recv().is_err());
        assert_eq!(hub.published().len(), 2);
    }

    #[tokio::test]
    async fn test_retained_replayed_on_subscribe() {
        let hub = LoopbackHub::new();
        let (a, _a_events) = hub.broker("a");
        let (b, mut b_events) = hub.broker("b");
        a.connect(Duration::from_secs(1)).await.unwrap();
        b.connect(Duration::from_secs(1)).await.unwrap();

        a.publish("pair/B", "req", QualityOfService::ExactlyOnce, true)
            .await
            .unwrap();
        b.subscribe("pair/B", QualityOfService::ExactlyOnce)
            .await
            .unwrap();

        assert!(matches!(
            b_events.recv().await,
            Some(BrokerEvent::Message { payload, .. }) if payload == "req"
        ));
    }

    #[tokio::test]
    async fn test_stalled_connect_times_out() {
        let hub = LoopbackHub::new();
        let (a, _events) = hub.broker("a");
        hub.stall_connections(true);

        let result = a.connect(Duration::from_millis(30)).await;
        assert!(matches!(result, Err(NetError::ConnectTimeout(_))));
        assert!(!hub.is_connected("a"));
    }

    #[tokio::test]
    async fn test_refused_and_dropped_connections() {
        let hub = LoopbackHub::new();
        let (a, mut events) = hub.broker("a");

        hub.refuse_connections(true);
        assert!(matches!(
            a.connect(Duration::from_secs(1)).await,
            Err(NetError::ConnectRejected(_))
        ));
        assert!(matches!(
            a.publish("t", "p", QualityOfService::ExactlyOnce, false).await,
            Err(NetError::NotConnected)
        ));

        hub.refuse_connections(false);
        a.connect(Duration::from_secs(1)).await.unwrap();
        assert!(hub.drop_connection("a"));
        assert!(!hub.is_connected("a"));
        assert_eq!(
            events.recv().await,
            Some(BrokerEvent::Disconnected { was_connected: true })
        );
        assert_eq!(hub.connect_attempts(), 2);
    }
}
