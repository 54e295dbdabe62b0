//! [`Broker`] implementation over `rumqttc`.
//!
//! Each connect builds a fresh clean-session client and spawns a task that
//! drives its event loop. The connect future resolves once the broker's
//! CONNACK (or a failure) has come back through a oneshot.

use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use rumqttc::{AsyncClient, Event, EventLoop, MqttOptions, Outgoing, Packet, QoS};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use keychat_shared::constants::MIN_KEEP_ALIVE_SECS;

use crate::broker::{Broker, BrokerEvent, BrokerEvents, ConnAck, QualityOfService};
use crate::channel::ChannelConfig;
use crate::error::NetError;

/// Request channel capacity between the client handle and its event loop.
const CLIENT_CAPACITY: usize = 64;

#[derive(Debug, Clone)]
pub struct MqttSettings {
    pub host: String,
    pub port: u16,
    pub client_id: String,
    pub keep_alive: Duration,
}

impl From<&ChannelConfig> for MqttSettings {
    fn from(config: &ChannelConfig) -> Self {
        Self {
            host: config.host.clone(),
            port: config.port,
            client_id: config.client_id.clone(),
            keep_alive: config.keep_alive,
        }
    }
}

impl From<QualityOfService> for QoS {
    fn from(qos: QualityOfService) -> Self {
        match qos {
            QualityOfService::AtMostOnce => QoS::AtMostOnce,
            QualityOfService::AtLeastOnce => QoS::AtLeastOnce,
            QualityOfService::ExactlyOnce => QoS::ExactlyOnce,
        }
    }
}

pub struct MqttBroker {
    settings: MqttSettings,
    events: BrokerEvents,
    client: Mutex<Option<AsyncClient>>,
    driver: Mutex<Option<JoinHandle<()>>>,
}

impl MqttBroker {
    pub fn new(settings: MqttSettings, events: BrokerEvents) -> Self {
        Self {
            settings,
            events,
            client: Mutex::new(None),
            driver: Mutex::new(None),
        }
    }

    fn options(&self) -> MqttOptions {
        let mut options = MqttOptions::new(
            self.settings.client_id.clone(),
            self.settings.host.clone(),
            self.settings.port,
        );
        // rumqttc panics on keep-alives under five seconds.
        let keep_alive = self
            .settings
            .keep_alive
            .max(Duration::from_secs(MIN_KEEP_ALIVE_SECS));
        options.set_keep_alive(keep_alive);
        options.set_clean_session(true);
        options
    }

    fn client_slot(&self) -> MutexGuard<'_, Option<AsyncClient>> {
        self.client.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn client(&self) -> Result<AsyncClient, NetError> {
        self.client_slot().clone().ok_or(NetError::NotConnected)
    }

    fn stop_driver(&self) {
        let handle = self
            .driver
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take();
        if let Some(handle) = handle {
            handle.abort();
        }
    }
}

#[async_trait]
impl Broker for MqttBroker {
    async fn connect(&self, timeout: Duration) -> Result<ConnAck, NetError> {
        self.stop_driver();
        self.client_slot().take();

        let (client, eventloop) = AsyncClient::new(self.options(), CLIENT_CAPACITY);
        let (ack_tx, ack_rx) = oneshot::channel();
        let handle = tokio::spawn(drive(eventloop, self.events.clone(), ack_tx));
        *self.driver.lock().unwrap_or_else(|e| e.into_inner()) = Some(handle);

        let outcome = match tokio::time::timeout(timeout, ack_rx).await {
            Ok(Ok(outcome)) => outcome,
            Ok(Err(_)) => Err(NetError::Broker(
                "event loop ended before acknowledgement".into(),
            )),
            Err(_) => Err(NetError::ConnectTimeout(timeout)),
        };

        match outcome {
            Ok(ack) => {
                info!(
                    host = %self.settings.host,
                    port = self.settings.port,
                    session_present = ack.session_present,
                    "MQTT connection acknowledged"
                );
                *self.client_slot() = Some(client);
                Ok(ack)
            }
            Err(e) => {
                self.stop_driver();
                Err(e)
            }
        }
    }

    async fn disconnect(&self) -> Result<(), NetError> {
        let client = self.client_slot().take();
        match client {
            Some(client) => {
                client.disconnect().await?;
                Ok(())
            }
            None => {
                self.stop_driver();
                Ok(())
            }
        }
    }

    async fn subscribe(&self, topic: &str, qos: QualityOfService) -> Result<(), NetError> {
        self.client()?.subscribe(topic, qos.into()).await?;
        Ok(())
    }

    async fn unsubscribe(&self, topic: &str) -> Result<(), NetError> {
        self.client()?.unsubscribe(topic).await?;
        Ok(())
    }

    async fn publish(
        &self,
        topic: &str,
        payload: &str,
        qos: QualityOfService,
        retain: bool,
    ) -> Result<(), NetError> {
        self.client()?
            .publish(topic, qos.into(), retain, payload.as_bytes().to_vec())
            .await?;
        Ok(())
    }
}

impl Drop for MqttBroker {
    fn drop(&mut self) {
        self.stop_driver();
    }
}

/// Poll the event loop until the connection ends.
async fn drive(
    mut eventloop: EventLoop,
    events: BrokerEvents,
    ack: oneshot::Sender<Result<ConnAck, NetError>>,
) {
    let mut ack = Some(ack);
    let mut connected = false;

    loop {
        match eventloop.poll().await {
            Ok(Event::Incoming(Packet::ConnAck(connack))) => {
                connected = true;
                if let Some(tx) = ack.take() {
                    let _ = tx.send(Ok(ConnAck {
                        session_present: connack.session_present,
                    }));
                }
            }
            Ok(Event::Incoming(Packet::Publish(publish))) => {
                let payload = String::from_utf8_lossy(&publish.payload).into_owned();
                let event = BrokerEvent::Message {
                    topic: publish.topic,
                    payload,
                };
                if events.send(event).is_err() {
                    debug!("Broker event receiver dropped, stopping MQTT driver");
                    break;
                }
            }
            Ok(Event::Outgoing(Outgoing::Disconnect)) => {
                debug!("MQTT disconnect sent");
                break;
            }
            Ok(_) => {}
            Err(e) => {
                match ack.take() {
                    Some(tx) => {
                        let _ = tx.send(Err(NetError::ConnectRejected(e.to_string())));
                    }
                    None => warn!(error = %e, "MQTT connection lost"),
                }
                let _ = events.send(BrokerEvent::Disconnected {
                    was_connected: connected,
                });
                break;
            }
        }
    }
}
