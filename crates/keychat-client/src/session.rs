//! Composition root.
//!
//! A [`Session`] owns one channel, one store and one identity gateway, and
//! wires the pairing engine, the delivery engine, the persona tracker and the
//! refresh monitor around them. Nothing is process-global: two sessions can
//! share a process (and, in tests, a loopback broker).

use std::sync::{Arc, Mutex, MutexGuard};

use tracing::{info, warn};

use keychat_net::{Channel, StatusListener};
use keychat_store::{ChatRepository, Contact, Conversation, Database};

use crate::config::ClientConfig;
use crate::delivery::{ChatEvent, ChatListener, MessageDelivery};
use crate::directory::{Directory, HttpDirectory};
use crate::error::{ClientError, DirectoryError};
use crate::gateway::{IdentityGateway, Persona};
use crate::monitor::Monitor;
use crate::pairing::PairingEngine;
use crate::personas::PersonaTracker;

pub struct Session {
    config: ClientConfig,
    channel: Channel,
    gateway: Arc<dyn IdentityGateway>,
    store: Arc<dyn ChatRepository>,
    pairing: Arc<PairingEngine>,
    delivery: Arc<MessageDelivery>,
    personas: Arc<PersonaTracker>,
    monitor: Monitor,
    directory: Option<Arc<dyn Directory>>,
    signed_in: Mutex<Option<String>>,
}

impl Session {
    /// Wire a session around an already spawned channel.
    pub fn new(
        config: ClientConfig,
        channel: Channel,
        gateway: Arc<dyn IdentityGateway>,
        store: Arc<dyn ChatRepository>,
    ) -> Self {
        let pairing = Arc::new(PairingEngine::new(
            channel.clone(),
            gateway.clone(),
            store.clone(),
            config.topics.clone(),
        ));
        let delivery = Arc::new(MessageDelivery::new(
            channel.clone(),
            gateway.clone(),
            store.clone(),
            config.topics.clone(),
        ));
        channel.add_message_listener(pairing.clone());
        channel.add_message_listener(delivery.clone());

        let personas = Arc::new(PersonaTracker::new(gateway.clone(), store.clone()));
        let monitor = Monitor::new(gateway.clone(), config.refresh_interval);
        monitor.add_listener(personas.clone());

        let directory = config.directory_host.as_deref().map(|host| {
            Arc::new(HttpDirectory::new(
                host,
                config.directory_port,
                &config.directory_domain,
            )) as Arc<dyn Directory>
        });

        Self {
            config,
            channel,
            gateway,
            store,
            pairing,
            delivery,
            personas,
            monitor,
            directory,
            signed_in: Mutex::new(None),
        }
    }

    /// A session against the configured MQTT broker and on-disk database.
    ///
    /// Must be called from within a tokio runtime.
    pub fn open(config: ClientConfig, gateway: Arc<dyn IdentityGateway>) -> Result<Self, ClientError> {
        let database = match &config.db_path {
            Some(path) => Database::open_at(path)?,
            None => Database::new()?,
        };
        let channel = Channel::mqtt(config.channel_config());
        Ok(Self::new(config, channel, gateway, Arc::new(database)))
    }

    /// Replace the directory built from configuration.
    pub fn with_directory(mut self, directory: Arc<dyn Directory>) -> Self {
        self.directory = Some(directory);
        self
    }

    fn signed_in_slot(&self) -> MutexGuard<'_, Option<String>> {
        self.signed_in.lock().unwrap_or_else(|e| e.into_inner())
    }

    // -----------------------------------------------------------------------
    // Lifecycle
    // -----------------------------------------------------------------------

    /// Start the refresh monitor.
    pub fn start(&self) -> Result<(), ClientError> {
        self.monitor.start()
    }

    /// Make `uri` the active persona, connect if needed and listen on its
    /// topics. Switching persona drops the previous one's subscriptions.
    pub async fn sign_in(&self, uri: &str) -> Result<Persona, ClientError> {
        let persona = self.gateway.set_active_identity(uri)?;

        if !self.channel.is_connected() {
            self.channel.connect().await?;
        }

        let previous = self.signed_in_slot().replace(uri.to_string());
        if let Some(previous) = previous.filter(|previous| previous != uri) {
            self.unsubscribe_persona(&previous).await;
        }
        self.channel.subscribe(&self.my_topics(uri)).await;

        info!(uri = %uri, name = %persona.name, "Signed in");
        Ok(persona)
    }

    pub async fn sign_out(&self) {
        let previous = self.signed_in_slot().take();
        if let Some(uri) = previous {
            self.unsubscribe_persona(&uri).await;
            info!(uri = %uri, "Signed out");
        }
        self.gateway.clear_active_identity();
    }

    /// Stop the monitor and close the channel for good.
    pub async fn shutdown(&self) {
        if let Some(hooks) = self.monitor.stop() {
            if let Err(e) = hooks.await {
                warn!(error = %e, "Monitor shutdown hooks did not complete");
            }
        }
        self.signed_in_slot().take();
        self.channel.close().await;
        info!("Session shut down");
    }

    /// Pairing topic, chat topic and broadcast chat topic of `uri`.
    pub fn my_topics(&self, uri: &str) -> Vec<String> {
        self.config.topics.persona_topics(uri)
    }

    pub fn signed_in_as(&self) -> Option<String> {
        self.signed_in_slot().clone()
    }

    async fn unsubscribe_persona(&self, uri: &str) {
        for topic in self.my_topics(uri) {
            self.channel.unsubscribe(&topic).await;
        }
    }

    // -----------------------------------------------------------------------
    // Pairing
    // -----------------------------------------------------------------------

    pub fn pair_with(&self, uri: &str) -> Result<(), ClientError> {
        self.pairing.pair_with(uri)
    }

    pub fn pair_with_as(&self, uri: &str, sub_name: Option<&str>) -> Result<(), ClientError> {
        self.pairing.pair_with_as(uri, sub_name)
    }

    pub fn pair_with_token(&self, token: &str) -> Result<String, ClientError> {
        self.pairing.pair_with_token(token)
    }

    pub fn make_identity_token(&self) -> Result<String, ClientError> {
        self.pairing.make_identity_token()
    }

    pub async fn pair_using_directory(&self) -> Result<usize, ClientError> {
        let directory = self.directory.as_ref().ok_or(DirectoryError::NotConfigured)?;
        self.pairing.pair_using_directory(directory.as_ref()).await
    }

    /// Publish the active persona's URI to the directory.
    pub async fn publish_to_directory(&self) -> Result<(), ClientError> {
        let directory = self.directory.as_ref().ok_or(DirectoryError::NotConfigured)?;
        let uri = self
            .gateway
            .active_identity()
            .and_then(|persona| persona.confirmed_uri().map(str::to_string))
            .ok_or(ClientError::NoActiveIdentity)?;
        directory.upload_uri(&uri).await?;
        info!(uri = %uri, "URI published to directory");
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Messaging
    // -----------------------------------------------------------------------

    pub fn send(&self, destination: &str, text: &str) -> Result<ChatEvent, ClientError> {
        self.delivery.send(destination, text)
    }

    pub fn history(&self, contact_uri: &str) -> Result<Vec<ChatEvent>, ClientError> {
        self.delivery.history(contact_uri)
    }

    pub fn conversations(&self) -> Result<Vec<Conversation>, ClientError> {
        self.delivery.conversations()
    }

    pub fn contacts(&self) -> Result<Vec<Contact>, ClientError> {
        Ok(self.store.list_contacts()?)
    }

    pub fn rename_contact(&self, uri: &str, name: &str, sub_name: &str) -> Result<(), ClientError> {
        self.store.rename_contact(uri, name, sub_name)?;
        info!(uri = %uri, name = %name, "Contact renamed");
        Ok(())
    }

    /// Forget a contact. Messages from it are dropped until pairing again.
    pub fn delete_contact(&self, uri: &str) -> Result<bool, ClientError> {
        let removed = self.store.delete_contact(uri)?;
        if removed {
            info!(uri = %uri, "Contact deleted");
        }
        Ok(removed)
    }

    pub fn add_chat_listener(&self, listener: Arc<dyn ChatListener>) -> bool {
        self.delivery.add_listener(listener)
    }

    pub fn add_status_listener(&self, listener: Arc<dyn StatusListener>) -> bool {
        self.channel.add_status_listener(listener)
    }

    // -----------------------------------------------------------------------
    // Personas
    // -----------------------------------------------------------------------

    pub fn request_persona(&self, name: &str, sub_name: &str) -> Result<(), ClientError> {
        self.personas.request(name, sub_name)
    }

    pub fn persona_tracker(&self) -> &PersonaTracker {
        &self.personas
    }

    pub fn monitor(&self) -> &Monitor {
        &self.monitor
    }

    pub fn channel(&self) -> &Channel {
        &self.channel
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }
}
