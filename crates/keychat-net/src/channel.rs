//! Reconnecting, queued publish/subscribe transport.
//!
//! A [`Channel`] owns one broker connection and three background tasks:
//!
//! - the **outbound worker** publishes queued messages one at a time, in
//!   enqueue order, with QoS 2 and the retain flag set;
//! - the **inbound worker** drains received messages into the registered
//!   [`MessageListener`]s, preserving receive order;
//! - the **event pump** turns [`BrokerEvent`]s into state transitions and
//!   inbound messages, and performs the single automatic reconnect after an
//!   unexpected disconnect.
//!
//! `send` only enqueues, so callers never wait on the network. Everything
//! except `connect` logs its failures instead of returning them.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::{mpsc, Notify};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use keychat_shared::constants::{
    DEFAULT_CONNECT_TIMEOUT_SECS, DEFAULT_KEEP_ALIVE_SECS, DEFAULT_MQTT_PORT,
    DEFAULT_QUEUE_CAPACITY,
};

use crate::broker::{Broker, BrokerEvent, ConnAck, QualityOfService};
use crate::error::NetError;
use crate::mqtt::{MqttBroker, MqttSettings};
use crate::observers::ObserverList;
use crate::queue::WorkQueue;
use crate::status::{ConnectionState, StatusListener, StatusTracker};
use crate::topics::TopicSet;

// ---------------------------------------------------------------------------
// Configuration / message types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct ChannelConfig {
    pub host: String,
    pub port: u16,
    /// Fixed for the lifetime of the process.
    pub client_id: String,
    pub connect_timeout: Duration,
    pub keep_alive: Duration,
    /// Maximum queued outbound messages. Inbound is unbounded.
    pub queue_capacity: usize,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            host: "localhost".into(),
            port: DEFAULT_MQTT_PORT,
            client_id: "keychat-local".into(),
            connect_timeout: Duration::from_secs(DEFAULT_CONNECT_TIMEOUT_SECS),
            keep_alive: Duration::from_secs(DEFAULT_KEEP_ALIVE_SECS),
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
        }
    }
}

/// A payload addressed to (or received from) a topic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelMessage {
    pub topic: String,
    pub payload: String,
}

pub trait MessageListener: Send + Sync {
    fn on_message(&self, message: &ChannelMessage) -> anyhow::Result<()>;
}

// ---------------------------------------------------------------------------
// Channel
// ---------------------------------------------------------------------------

struct Inner {
    broker: Arc<dyn Broker>,
    config: ChannelConfig,
    status: StatusTracker,
    listeners: ObserverList<dyn MessageListener>,
    topics: Mutex<TopicSet>,
    outbound: WorkQueue<ChannelMessage>,
    inbound: WorkQueue<ChannelMessage>,
    /// Serializes connect, disconnect, reconnect and close.
    lifecycle: tokio::sync::Mutex<()>,
    shutdown: AtomicBool,
    disconnect_requested: AtomicBool,
    reconnect_armed: AtomicBool,
    reconnect_attempts: AtomicUsize,
    stop_pump: Notify,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

/// Handle to a running transport. Cheap to clone.
#[derive(Clone)]
pub struct Channel {
    inner: Arc<Inner>,
}

impl Channel {
    /// Start the worker tasks around `broker`. `events` must be the
    /// receiving end of the sender the broker reports through.
    ///
    /// Must be called from within a tokio runtime.
    pub fn spawn(
        broker: Arc<dyn Broker>,
        events: mpsc::UnboundedReceiver<BrokerEvent>,
        config: ChannelConfig,
    ) -> Self {
        let inner = Arc::new(Inner {
            broker,
            status: StatusTracker::new(),
            listeners: ObserverList::new(),
            topics: Mutex::new(TopicSet::new()),
            outbound: WorkQueue::new(config.queue_capacity),
            // Unbounded: a dropped delivery would never be redelivered.
            inbound: WorkQueue::new(0),
            lifecycle: tokio::sync::Mutex::new(()),
            shutdown: AtomicBool::new(false),
            disconnect_requested: AtomicBool::new(false),
            reconnect_armed: AtomicBool::new(false),
            reconnect_attempts: AtomicUsize::new(0),
            stop_pump: Notify::new(),
            workers: Mutex::new(Vec::new()),
            config,
        });
        inner.status.set(ConnectionState::Disconnected);

        let handles = vec![
            tokio::spawn(outbound_worker(inner.clone())),
            tokio::spawn(inbound_worker(inner.clone())),
            tokio::spawn(event_pump(inner.clone(), events)),
        ];
        *inner.workers.lock().unwrap_or_else(|e| e.into_inner()) = handles;

        debug!(client_id = %inner.config.client_id, "Channel started");
        Self { inner }
    }

    /// A channel backed by a real MQTT broker at `config.host:config.port`.
    pub fn mqtt(config: ChannelConfig) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let broker = MqttBroker::new(MqttSettings::from(&config), tx);
        Self::spawn(Arc::new(broker), rx, config)
    }

    pub fn config(&self) -> &ChannelConfig {
        &self.inner.config
    }

    /// Connect with the configured timeout.
    pub async fn connect(&self) -> Result<ConnAck, NetError> {
        self.connect_with_timeout(self.inner.config.connect_timeout)
            .await
    }

    /// Open the broker connection and re-issue every tracked subscription.
    /// Re-arms the automatic reconnect.
    pub async fn connect_with_timeout(&self, timeout: Duration) -> Result<ConnAck, NetError> {
        if self.inner.shutdown.load(Ordering::SeqCst) {
            return Err(NetError::Closed);
        }
        let _lifecycle = self.inner.lifecycle.lock().await;
        self.inner
            .disconnect_requested
            .store(false, Ordering::SeqCst);
        self.inner.reconnect_armed.store(true, Ordering::SeqCst);
        let ack = self.inner.open(timeout).await?;
        self.inner.restore_subscriptions().await;
        Ok(ack)
    }

    /// Graceful close of the broker connection. Never fails.
    pub async fn disconnect(&self) {
        let _lifecycle = self.inner.lifecycle.lock().await;
        self.inner
            .disconnect_requested
            .store(true, Ordering::SeqCst);
        self.inner.status.set(ConnectionState::Disconnecting);
        self.inner.broker_disconnect().await;
        self.inner.status.set(ConnectionState::Disconnected);
    }

    /// Track and subscribe to each topic. One topic failing does not stop
    /// the others.
    pub async fn subscribe(&self, topics: &[String]) {
        for topic in topics {
            self.inner
                .topics
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .insert(topic);
            match self
                .inner
                .broker
                .subscribe(topic, QualityOfService::ExactlyOnce)
                .await
            {
                Ok(()) => debug!(topic = %topic, "Subscribed"),
                Err(e) => warn!(topic = %topic, error = %e, "Subscribe failed"),
            }
        }
    }

    pub async fn unsubscribe(&self, topic: &str) {
        self.inner
            .topics
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(topic);
        match self.inner.broker.unsubscribe(topic).await {
            Ok(()) => debug!(topic = %topic, "Unsubscribed"),
            Err(e) => warn!(topic = %topic, error = %e, "Unsubscribe failed"),
        }
    }

    /// Queue `payload` for publishing on `destination`. Returns as soon as
    /// the message is queued.
    pub fn send(&self, destination: &str, payload: impl Into<String>) -> Result<(), NetError> {
        if self.inner.shutdown.load(Ordering::SeqCst) {
            return Err(NetError::Closed);
        }
        let message = ChannelMessage {
            topic: destination.to_string(),
            payload: payload.into(),
        };
        self.inner
            .outbound
            .push(message)
            .map_err(|_| NetError::QueueFull(self.inner.outbound.capacity()))
    }

    pub fn status(&self) -> ConnectionState {
        self.inner.status.current()
    }

    pub fn is_connected(&self) -> bool {
        self.status() == ConnectionState::Connected
    }

    pub fn subscribed_topics(&self) -> Vec<String> {
        self.inner
            .topics
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .all()
    }

    /// Automatic reconnects performed so far.
    pub fn reconnect_attempts(&self) -> usize {
        self.inner.reconnect_attempts.load(Ordering::SeqCst)
    }

    pub fn add_status_listener(&self, listener: Arc<dyn StatusListener>) -> bool {
        self.inner.status.add_listener(listener)
    }

    pub fn remove_status_listener(&self, listener: &Arc<dyn StatusListener>) -> bool {
        self.inner.status.remove_listener(listener)
    }

    pub fn add_message_listener(&self, listener: Arc<dyn MessageListener>) -> bool {
        self.inner.listeners.add(listener)
    }

    pub fn remove_message_listener(&self, listener: &Arc<dyn MessageListener>) -> bool {
        self.inner.listeners.remove(listener)
    }

    /// Shut the channel down: unsubscribe every tracked topic, disconnect,
    /// and stop the worker tasks. Queued messages that were not yet
    /// published are dropped.
    pub async fn close(&self) {
        if self.inner.shutdown.swap(true, Ordering::SeqCst) {
            return;
        }
        {
            let _lifecycle = self.inner.lifecycle.lock().await;
            self.inner.status.set(ConnectionState::Disconnecting);

            let topics = self
                .inner
                .topics
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .clear();
            for topic in topics {
                if let Err(e) = self.inner.broker.unsubscribe(&topic).await {
                    warn!(topic = %topic, error = %e, "Unsubscribe on close failed");
                }
            }
            self.inner.broker_disconnect().await;
            self.inner.status.set(ConnectionState::Closed);
        }

        self.inner.outbound.wake();
        self.inner.inbound.wake();
        self.inner.stop_pump.notify_one();

        let handles: Vec<JoinHandle<()>> = self
            .inner
            .workers
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .drain(..)
            .collect();
        for handle in handles {
            if let Err(e) = handle.await {
                warn!(error = %e, "Channel worker ended abnormally");
            }
        }
        info!(client_id = %self.inner.config.client_id, "Channel closed");
    }
}

impl Inner {
    async fn open(&self, timeout: Duration) -> Result<ConnAck, NetError> {
        self.status.set(ConnectionState::Connecting);
        info!(
            host = %self.config.host,
            port = self.config.port,
            client_id = %self.config.client_id,
            "Connecting to broker"
        );
        let outcome = tokio::time::timeout(timeout, self.broker.connect(timeout))
            .await
            .unwrap_or(Err(NetError::ConnectTimeout(timeout)));
        match outcome {
            Ok(ack) => {
                self.status.set(ConnectionState::Connected);
                Ok(ack)
            }
            Err(e) => {
                warn!(error = %e, "Broker connect failed");
                self.status.set(ConnectionState::Disconnected);
                Err(e)
            }
        }
    }

    async fn broker_disconnect(&self) {
        if let Err(e) = self.broker.disconnect().await {
            warn!(error = %e, "Broker disconnect failed");
        }
    }

    async fn publish(&self, message: &ChannelMessage) {
        match self
            .broker
            .publish(
                &message.topic,
                &message.payload,
                QualityOfService::ExactlyOnce,
                true,
            )
            .await
        {
            Ok(()) => debug!(
                topic = %message.topic,
                bytes = message.payload.len(),
                "Published"
            ),
            Err(e) => warn!(topic = %message.topic, error = %e, "Publish failed, message dropped"),
        }
    }

    fn on_receive(&self, topic: String, payload: String) {
        if let Err(dropped) = self.inbound.push(ChannelMessage { topic, payload }) {
            error!(topic = %dropped.topic, "Inbound queue rejected message");
        }
    }

    async fn on_connection_lost(&self, was_connected: bool) {
        if !was_connected {
            // The failed attempt was already reported by `connect`.
            debug!("Connection attempt ended before acknowledgement");
            return;
        }

        let _lifecycle = self.lifecycle.lock().await;
        if self.shutdown.load(Ordering::SeqCst)
            || self.disconnect_requested.load(Ordering::SeqCst)
        {
            return;
        }
        self.status.set(ConnectionState::Disconnected);
        warn!(client_id = %self.config.client_id, "Broker connection lost");

        if !self.reconnect_armed.swap(false, Ordering::SeqCst) {
            info!("Automatic reconnect already used; waiting for an explicit connect");
            return;
        }

        self.reconnect_attempts.fetch_add(1, Ordering::SeqCst);
        if self.open(self.config.connect_timeout).await.is_ok() {
            info!("Reconnected to broker");
            self.restore_subscriptions().await;
        }
    }

    /// Clean sessions forget subscriptions, so replay the tracked set.
    async fn restore_subscriptions(&self) {
        let topics = self.topics.lock().unwrap_or_else(|e| e.into_inner()).all();
        for topic in topics {
            if let Err(e) = self
                .broker
                .subscribe(&topic, QualityOfService::ExactlyOnce)
                .await
            {
                warn!(topic = %topic, error = %e, "Resubscribe failed");
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Background tasks
// ---------------------------------------------------------------------------

async fn outbound_worker(inner: Arc<Inner>) {
    loop {
        if inner.shutdown.load(Ordering::SeqCst) {
            break;
        }
        match inner.outbound.pop() {
            Some(message) => inner.publish(&message).await,
            None => inner.outbound.notified().await,
        }
    }
    debug!(dropped = inner.outbound.len(), "Outbound worker stopped");
}

async fn inbound_worker(inner: Arc<Inner>) {
    loop {
        if inner.shutdown.load(Ordering::SeqCst) {
            break;
        }
        let batch = inner.inbound.drain();
        if batch.is_empty() {
            inner.inbound.notified().await;
            continue;
        }
        for message in &batch {
            inner
                .listeners
                .notify_all("message", |listener| listener.on_message(message));
        }
    }
    debug!("Inbound worker stopped");
}

async fn event_pump(inner: Arc<Inner>, mut events: mpsc::UnboundedReceiver<BrokerEvent>) {
    loop {
        let event = tokio::select! {
            event = events.recv() => match event {
                Some(event) => event,
                None => {
                    debug!("Broker event stream ended");
                    break;
                }
            },
            _ = inner.stop_pump.notified() => break,
        };

        match event {
            BrokerEvent::Message { topic, payload } => inner.on_receive(topic, payload),
            BrokerEvent::Disconnected { was_connected } => {
                inner.on_connection_lost(was_connected).await
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::loopback::LoopbackHub;

    fn config(client_id: &str) -> ChannelConfig {
        ChannelConfig {
            client_id: client_id.into(),
            connect_timeout: Duration::from_secs(1),
            ..ChannelConfig::default()
        }
    }

    #[derive(Default)]
    struct Collector(Mutex<Vec<ChannelMessage>>);

    impl Collector {
        fn payloads(&self) -> Vec<String> {
            self.0
                .lock()
                .unwrap()
                .iter()
                .map(|m| m.payload.clone())
                .collect()
        }
    }

    impl MessageListener for Collector {
        fn on_message(&self, message: &ChannelMessage) -> anyhow::Result<()> {
            self.0.lock().unwrap().push(message.clone());
            Ok(())
        }
    }

    struct Broken;

    impl MessageListener for Broken {
        fn on_message(&self, _message: &ChannelMessage) -> anyhow::Result<()> {
            anyhow::bail!("listener failed")
        }
    }

    #[derive(Default)]
    struct States(Mutex<Vec<ConnectionState>>);

    impl StatusListener for States {
        fn on_status_change(&self, state: ConnectionState) {
            self.0.lock().unwrap().push(state);
        }
    }

    async fn eventually(mut check: impl FnMut() -> bool) -> bool {
        for _ in 0..200 {
            if check() {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        check()
    }

    #[tokio::test]
    async fn test_publishes_in_enqueue_order() {
        let hub = LoopbackHub::new();
        let channel = hub.channel(config("a"));
        channel.connect().await.unwrap();

        channel.send("chat/B", "first").unwrap();
        channel.send("chat/B", "second").unwrap();
        channel.send("chat/B", "third").unwrap();

        assert!(eventually(|| hub.published_to("chat/B").len() == 3).await);
        let payloads: Vec<String> = hub
            .published_to("chat/B")
            .into_iter()
            .map(|f| f.payload)
            .collect();
        assert_eq!(payloads, vec!["first", "second", "third"]);
        assert!(hub.published().iter().all(|f| f.retain));

        channel.close().await;
    }

    #[tokio::test]
    async fn test_delivers_to_every_listener_despite_failures() {
        let hub = LoopbackHub::new();
        let sender = hub.channel(config("a"));
        let receiver = hub.channel(config("b"));
        sender.connect().await.unwrap();
        receiver.connect().await.unwrap();

        let collector = Arc::new(Collector::default());
        receiver.add_message_listener(Arc::new(Broken));
        receiver.add_message_listener(collector.clone());
        receiver.subscribe(&["chat/B".to_string()]).await;

        sender.send("chat/B", "one").unwrap();
        sender.send("chat/B", "two").unwrap();

        assert!(eventually(|| collector.payloads().len() == 2).await);
        assert_eq!(collector.payloads(), vec!["one", "two"]);

        sender.close().await;
        receiver.close().await;
    }

    #[tokio::test]
    async fn test_connect_failure_leaves_disconnected() {
        let hub = LoopbackHub::new();
        hub.refuse_connections(true);
        let channel = hub.channel(config("a"));

        let err = channel.connect().await.unwrap_err();
        assert!(matches!(err, NetError::ConnectRejected(_)));
        assert_eq!(channel.status(), ConnectionState::Disconnected);

        channel.close().await;
    }

    #[tokio::test]
    async fn test_connect_timeout_leaves_disconnected() {
        let hub = LoopbackHub::new();
        hub.stall_connections(true);
        let channel = hub.channel(config("a"));
        let states = Arc::new(States::default());
        channel.add_status_listener(states.clone());

        let err = channel
            .connect_with_timeout(Duration::from_millis(50))
            .await
            .unwrap_err();
        assert!(matches!(err, NetError::ConnectTimeout(_)));
        assert_eq!(channel.status(), ConnectionState::Disconnected);
        assert_eq!(
            *states.0.lock().unwrap(),
            vec![ConnectionState::Connecting, ConnectionState::Disconnected]
        );

        hub.stall_connections(false);
        channel.connect().await.unwrap();
        assert!(channel.is_connected());
        channel.close().await;
    }

    #[tokio::test]
    async fn test_state_transitions_are_deduplicated() {
        let hub = LoopbackHub::new();
        let channel = hub.channel(config("a"));
        let states = Arc::new(States::default());
        channel.add_status_listener(states.clone());

        channel.connect().await.unwrap();
        channel.disconnect().await;
        channel.disconnect().await;
        channel.close().await;

        assert_eq!(
            *states.0.lock().unwrap(),
            vec![
                ConnectionState::Connecting,
                ConnectionState::Connected,
                ConnectionState::Disconnecting,
                ConnectionState::Disconnected,
                ConnectionState::Disconnecting,
                ConnectionState::Disconnected,
                ConnectionState::Disconnecting,
                ConnectionState::Closed,
            ]
        );
    }

    #[tokio::test]
    async fn test_reconnects_once_after_unexpected_drop() {
        let hub = LoopbackHub::new();
        let channel = hub.channel(config("a"));
        channel.connect().await.unwrap();
        channel.subscribe(&["chat/A".to_string()]).await;
        assert_eq!(hub.connect_attempts(), 1);

        hub.drop_connection("a");
        assert!(
            eventually(|| channel.reconnect_attempts() == 1
                && channel.is_connected()
                && hub.subscriptions("a") == vec!["chat/A"])
            .await
        );
        assert_eq!(hub.connect_attempts(), 2);

        // Second drop in the same session: no automatic retry.
        hub.drop_connection("a");
        assert!(eventually(|| channel.status() == ConnectionState::Disconnected).await);
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(hub.connect_attempts(), 2);
        assert_eq!(channel.reconnect_attempts(), 1);

        // An explicit connect restores subscriptions and re-arms the policy.
        channel.connect().await.unwrap();
        assert_eq!(hub.subscriptions("a"), vec!["chat/A"]);
        assert_eq!(channel.subscribed_topics(), vec!["chat/A"]);
        hub.drop_connection("a");
        assert!(eventually(|| channel.reconnect_attempts() == 2 && channel.is_connected()).await);
        assert_eq!(hub.connect_attempts(), 4);

        channel.close().await;
    }

    #[tokio::test]
    async fn test_no_reconnect_after_requested_disconnect() {
        let hub = LoopbackHub::new();
        let channel = hub.channel(config("a"));
        channel.connect().await.unwrap();
        channel.disconnect().await;

        assert!(!hub.drop_connection("a"));
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(channel.reconnect_attempts(), 0);
        assert_eq!(channel.status(), ConnectionState::Disconnected);

        channel.close().await;
    }

    #[tokio::test]
    async fn test_close_unsubscribes_and_rejects_sends() {
        let hub = LoopbackHub::new();
        let channel = hub.channel(config("a"));
        channel.connect().await.unwrap();
        channel
            .subscribe(&["pair/A".to_string(), "chat/A".to_string()])
            .await;
        channel.subscribe(&["chat/A".to_string()]).await;
        assert_eq!(channel.subscribed_topics(), vec!["chat/A", "pair/A"]);

        channel.close().await;

        assert_eq!(channel.status(), ConnectionState::Closed);
        assert!(channel.subscribed_topics().is_empty());
        assert!(!hub.is_connected("a"));
        assert!(matches!(channel.send("chat/B", "late"), Err(NetError::Closed)));
        assert!(matches!(channel.connect().await, Err(NetError::Closed)));
    }

    #[tokio::test]
    async fn test_send_never_waits_for_broker() {
        let hub = LoopbackHub::new();
        let channel = hub.channel(ChannelConfig {
            queue_capacity: 2,
            ..config("a")
        });

        // Not connected: sends queue and the worker drops them on publish.
        channel.send("chat/B", "x").unwrap();
        assert!(eventually(|| channel.inner.outbound.is_empty()).await);
        assert!(hub.published().is_empty());

        channel.close().await;
    }

    /// Holds every delivery for a while, like a listener doing storage and
    /// decryption work.
    #[derive(Default)]
    struct SlowCollector(Collector);

    impl MessageListener for SlowCollector {
        fn on_message(&self, message: &ChannelMessage) -> anyhow::Result<()> {
            std::thread::sleep(Duration::from_millis(20));
            self.0.on_message(message)
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_burst_behind_slow_listener_is_not_dropped() {
        let hub = LoopbackHub::new();
        let sender = hub.channel(config("a"));
        let receiver = hub.channel(ChannelConfig {
            queue_capacity: 2,
            ..config("b")
        });
        let slow = Arc::new(SlowCollector::default());
        receiver.add_message_listener(slow.clone());

        sender.connect().await.unwrap();
        receiver.connect().await.unwrap();
        receiver.subscribe(&["chat/B".to_string()]).await;

        for i in 0..6 {
            sender.send("chat/B", format!("m{i}")).unwrap();
        }

        let expected: Vec<String> = (0..6).map(|i| format!("m{i}")).collect();
        assert!(eventually(|| slow.0.payloads() == expected).await);
        assert_eq!(hub.published_to("chat/B").len(), 6);

        sender.close().await;
        receiver.close().await;
    }
}
