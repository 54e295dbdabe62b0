//! Pairing handshake.
//!
//! ```text
//!   A                                  B
//!   | -- pairRequest  (to B) --------> |   B replies, adds nothing
//!   | <------- pairResponse (to A) --- |
//!   |   A adds B, replies              |
//!   | -- pairAck      (to B) --------> |   B adds A
//! ```
//!
//! Every message is published on the receiver's pairing topic. Inbound
//! messages not addressed to the active persona, and responses or acks that
//! come from one of our own personas, are ignored. Nothing here retries.

use std::collections::HashSet;
use std::sync::Arc;

use tracing::{debug, info, warn};

use keychat_net::{Channel, ChannelMessage, MessageListener};
use keychat_shared::protocol::PairingIdentity;
use keychat_shared::{IdentityToken, MessageType, PairingMessage, ProtocolError, TopicPrefixes};
use keychat_store::{ChatRepository, Contact};

use crate::directory::Directory;
use crate::error::ClientError;
use crate::gateway::IdentityGateway;

pub struct PairingEngine {
    channel: Channel,
    gateway: Arc<dyn IdentityGateway>,
    store: Arc<dyn ChatRepository>,
    topics: TopicPrefixes,
}

impl PairingEngine {
    pub fn new(
        channel: Channel,
        gateway: Arc<dyn IdentityGateway>,
        store: Arc<dyn ChatRepository>,
        topics: TopicPrefixes,
    ) -> Self {
        Self {
            channel,
            gateway,
            store,
            topics,
        }
    }

    // -----------------------------------------------------------------------
    // Outbound
    // -----------------------------------------------------------------------

    /// Send a pairing request to `uri`.
    pub fn pair_with(&self, uri: &str) -> Result<(), ClientError> {
        self.pair_with_as(uri, None)
    }

    /// Send a pairing request to `uri`, optionally presenting a different
    /// sub-name than the active persona's.
    pub fn pair_with_as(&self, uri: &str, sub_name: Option<&str>) -> Result<(), ClientError> {
        let me = self.me()?;
        if self.own_uris(&me).contains(uri) {
            return Err(ClientError::SelfPairing(uri.to_string()));
        }
        self.publish(&PairingMessage::request_as(&me, uri, sub_name))?;
        info!(target_uri = %uri, sub_name = ?sub_name, "Pairing request sent");
        Ok(())
    }

    /// Pair with the persona described by a shared identity token. Returns
    /// the URI the request went to.
    pub fn pair_with_token(&self, token: &str) -> Result<String, ClientError> {
        let token = IdentityToken::parse(token)?;
        self.pair_with(&token.id)?;
        Ok(token.id)
    }

    /// Send a request to every directory entry that is not one of our own
    /// personas. Returns how many requests were queued.
    pub async fn pair_using_directory(&self, directory: &dyn Directory) -> Result<usize, ClientError> {
        let me = self.me()?;
        let own = self.own_uris(&me);
        let candidates = directory.candidate_uris().await?;

        let mut sent = 0;
        for uri in candidates.iter().filter(|uri| !own.contains(uri.as_str())) {
            match self.publish(&PairingMessage::request(&me, uri)) {
                Ok(()) => sent += 1,
                Err(e) => warn!(target_uri = %uri, error = %e, "Pairing request not queued"),
            }
        }
        info!(candidates = candidates.len(), sent, "Directory pairing requests sent");
        Ok(sent)
    }

    /// The active persona as a shareable token.
    pub fn make_identity_token(&self) -> Result<String, ClientError> {
        let me = self.me()?;
        Ok(IdentityToken::new(&me.name, &me.sub_name, &me.uri).encode()?)
    }

    // -----------------------------------------------------------------------
    // Inbound
    // -----------------------------------------------------------------------

    /// Process one pairing payload. Failures are logged, never returned.
    pub fn handle(&self, payload: &str) {
        let message = match PairingMessage::from_json(payload) {
            Ok(message) => message,
            Err(e) => {
                warn!(error = %e, "Malformed pairing message dropped");
                return;
            }
        };

        let me = match self.me() {
            Ok(me) => me,
            Err(_) => {
                debug!(msg_type = %message.msg_type, "No active persona, pairing message ignored");
                return;
            }
        };
        if message.receiver_id != me.uri {
            debug!(
                msg_type = %message.msg_type,
                receiver = %message.receiver_id,
                "Pairing message for another persona ignored"
            );
            return;
        }

        debug!(msg_type = %message.msg_type, sender = %message.sender_id, "Pairing message received");

        match message.msg_type {
            MessageType::PairRequest => {
                self.reply(PairingMessage::response_to(&me, &message));
            }
            MessageType::PairResponse => {
                if self.is_own(&me, &message.sender_id) {
                    return;
                }
                self.add_contact(&message);
                self.reply(PairingMessage::ack_to(&me, &message));
            }
            MessageType::PairAck => {
                if self.is_own(&me, &message.sender_id) {
                    return;
                }
                self.add_contact(&message);
            }
        }
    }

    fn reply(&self, reply: Result<PairingMessage, ProtocolError>) {
        let result = reply
            .map_err(ClientError::from)
            .and_then(|message| self.publish(&message));
        if let Err(e) = result {
            warn!(error = %e, "Pairing reply not sent");
        }
    }

    fn add_contact(&self, message: &PairingMessage) {
        let uri = &message.sender_id;
        match self.store.find_contact(uri) {
            Ok(Some(_)) => {
                debug!(uri = %uri, "Already paired");
                return;
            }
            Ok(None) => {}
            Err(e) => {
                warn!(uri = %uri, error = %e, "Contact lookup failed");
                return;
            }
        }

        if let Err(e) =
            self.gateway
                .create_contact(uri, &message.sender_name, &message.sender_sub_name)
        {
            warn!(uri = %uri, error = %e, "Gateway refused contact");
            return;
        }
        let contact = Contact::new(uri, &message.sender_name, &message.sender_sub_name);
        match self.store.save_contact(&contact) {
            Ok(()) => info!(uri = %uri, name = %contact.name, "Paired"),
            Err(e) => warn!(uri = %uri, error = %e, "Failed to persist contact"),
        }
    }

    // -----------------------------------------------------------------------
    // Helpers
    // -----------------------------------------------------------------------

    fn me(&self) -> Result<PairingIdentity, ClientError> {
        self.gateway
            .active_identity()
            .and_then(|persona| persona.pairing_identity())
            .ok_or(ClientError::NoActiveIdentity)
    }

    fn own_uris(&self, me: &PairingIdentity) -> HashSet<String> {
        let mut uris: HashSet<String> = match self.gateway.personas() {
            Ok(personas) => personas.into_iter().filter_map(|p| p.uri).collect(),
            Err(e) => {
                warn!(error = %e, "Could not list local personas");
                HashSet::new()
            }
        };
        uris.insert(me.uri.clone());
        uris
    }

    fn is_own(&self, me: &PairingIdentity, uri: &str) -> bool {
        let own = self.own_uris(me).contains(uri);
        if own {
            debug!(uri = %uri, "Pairing message from own persona ignored");
        }
        own
    }

    fn publish(&self, message: &PairingMessage) -> Result<(), ClientError> {
        let topic = self.topics.pairing_topic(&message.receiver_id);
        self.channel.send(&topic, message.to_json()?)?;
        Ok(())
    }
}

impl MessageListener for PairingEngine {
    fn on_message(&self, message: &ChannelMessage) -> anyhow::Result<()> {
        if self.topics.is_pairing(&message.topic) {
            self.handle(&message.payload);
        }
        Ok(())
    }
}
