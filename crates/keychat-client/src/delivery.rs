//! Chat message delivery.
//!
//! Send: encrypt once for the destination's peer set, persist, publish the
//! base64-wrapped ciphertext on the destination's chat topic, then tell local
//! listeners. Receive: drop ids already stored, drop unknown senders, persist,
//! decrypt, then tell listeners.

use std::sync::Arc;

use tracing::{debug, info, warn};

use keychat_net::{Channel, ChannelMessage, MessageListener, ObserverList};
use keychat_shared::types::unix_now;
use keychat_shared::{is_broadcast, ChatDirection, TopicPrefixes, WireChatMessage};
use keychat_store::{ChatRepository, Conversation, StoreError, StoredMessage};

use crate::error::ClientError;
use crate::gateway::IdentityGateway;

/// A chat message in plaintext, as surfaced to listeners.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatEvent {
    pub message_id: String,
    pub chat_id: String,
    pub direction: ChatDirection,
    pub sender_id: String,
    pub receiver_id: String,
    pub image_url: Option<String>,
    pub text: String,
    pub timestamp: i64,
}

impl ChatEvent {
    fn from_stored(stored: &StoredMessage, text: String) -> Self {
        Self {
            message_id: stored.id.clone(),
            chat_id: stored.chat_id.clone(),
            direction: stored.direction,
            sender_id: stored.sender_id.clone(),
            receiver_id: stored.receiver_id.clone(),
            image_url: stored.image_url.clone(),
            text,
            timestamp: stored.timestamp,
        }
    }
}

pub trait ChatListener: Send + Sync {
    fn on_chat_message(&self, event: &ChatEvent) -> anyhow::Result<()>;
}

pub struct MessageDelivery {
    channel: Channel,
    gateway: Arc<dyn IdentityGateway>,
    store: Arc<dyn ChatRepository>,
    topics: TopicPrefixes,
    listeners: ObserverList<dyn ChatListener>,
}

impl MessageDelivery {
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
            listeners: ObserverList::new(),
        }
    }

    pub fn add_listener(&self, listener: Arc<dyn ChatListener>) -> bool {
        self.listeners.add(listener)
    }

    pub fn remove_listener(&self, listener: &Arc<dyn ChatListener>) -> bool {
        self.listeners.remove(listener)
    }

    /// Send `text` to a contact, or to every contact when `destination` is
    /// the broadcast id. The message is queued for publishing when this
    /// returns.
    pub fn send(&self, destination: &str, text: &str) -> Result<ChatEvent, ClientError> {
        let me = self.my_uri()?;

        let peers: Vec<String> = if is_broadcast(destination) {
            self.store
                .list_contacts()?
                .into_iter()
                .map(|contact| contact.uri)
                .collect()
        } else {
            self.store
                .find_contact(destination)?
                .ok_or_else(|| ClientError::UnknownContact(destination.to_string()))?;
            vec![destination.to_string()]
        };
        if peers.is_empty() {
            return Err(ClientError::NoRecipients);
        }

        let ciphertext = self.gateway.sign_then_encrypt(&peers, text)?;
        let chat = self.store.get_or_create_conversation(&me, destination)?;

        let stored = StoredMessage {
            id: uuid::Uuid::new_v4().to_string(),
            chat_id: chat.id.clone(),
            direction: ChatDirection::Send,
            sender_id: me.clone(),
            receiver_id: destination.to_string(),
            image_url: None,
            msg: ciphertext,
            timestamp: unix_now(),
        };
        self.store.insert_message(&stored)?;
        self.touch(&chat, text, stored.timestamp);

        let wire = WireChatMessage::outbound(
            &stored.id,
            &chat.id,
            &me,
            destination,
            &stored.msg,
            stored.timestamp,
        );
        self.channel
            .send(&self.topics.chat_topic(destination), wire.to_json()?)?;
        debug!(msg_id = %stored.id, receiver = %destination, peers = peers.len(), "Chat message queued");

        let event = ChatEvent::from_stored(&stored, text.to_string());
        self.notify(&event);
        Ok(event)
    }

    /// Process one inbound chat payload. Failures are logged, never returned.
    pub fn handle(&self, payload: &str) {
        let wire = match WireChatMessage::from_json(payload) {
            Ok(wire) => wire,
            Err(e) => {
                warn!(error = %e, "Malformed chat message dropped");
                return;
            }
        };

        match self.store.message_exists(&wire.id) {
            Ok(false) => {}
            Ok(true) => {
                debug!(msg_id = %wire.id, "Duplicate chat message dropped");
                return;
            }
            Err(e) => {
                warn!(msg_id = %wire.id, error = %e, "Dedup check failed, message dropped");
                return;
            }
        }

        let ciphertext = match wire.ciphertext() {
            Ok(ciphertext) if !ciphertext.is_empty() => ciphertext,
            Ok(_) => {
                warn!(msg_id = %wire.id, "Empty chat payload dropped");
                return;
            }
            Err(e) => {
                warn!(msg_id = %wire.id, error = %e, "Undecodable chat payload dropped");
                return;
            }
        };

        match self.store.find_contact(&wire.sender_id) {
            Ok(Some(_)) => {}
            Ok(None) => {
                warn!(msg_id = %wire.id, sender = %wire.sender_id, "Message from unknown sender dropped");
                return;
            }
            Err(e) => {
                warn!(msg_id = %wire.id, error = %e, "Contact lookup failed, message dropped");
                return;
            }
        }

        let chat = match self
            .store
            .get_or_create_conversation(&wire.sender_id, &wire.receiver_id)
        {
            Ok(chat) => chat,
            Err(e) => {
                warn!(msg_id = %wire.id, error = %e, "Conversation lookup failed, message dropped");
                return;
            }
        };

        let stored = StoredMessage {
            id: wire.id.clone(),
            chat_id: chat.id.clone(),
            direction: ChatDirection::Receive,
            sender_id: wire.sender_id.clone(),
            receiver_id: wire.receiver_id.clone(),
            image_url: wire.image_url.clone(),
            msg: ciphertext,
            timestamp: if wire.timestamp > 0 { wire.timestamp } else { unix_now() },
        };
        match self.store.insert_message(&stored) {
            Ok(()) => {}
            Err(StoreError::Duplicate(id)) => {
                // Lost a race with a concurrent delivery of the same id.
                debug!(msg_id = %id, "Duplicate chat message dropped on insert");
                return;
            }
            Err(e) => {
                warn!(msg_id = %stored.id, error = %e, "Failed to persist chat message");
                return;
            }
        }

        let text = match self.gateway.decrypt_then_verify(&stored.msg) {
            Ok(text) if !text.is_empty() => text,
            Ok(_) => {
                debug!(msg_id = %stored.id, "Decryption yielded nothing, dropped");
                return;
            }
            Err(e) => {
                warn!(msg_id = %stored.id, error = %e, "Decryption failed, message dropped");
                return;
            }
        };

        self.touch(&chat, &text, stored.timestamp);
        info!(msg_id = %stored.id, sender = %stored.sender_id, "Chat message received");
        self.notify(&ChatEvent::from_stored(&stored, text));
    }

    /// Decrypted history with a contact (or the broadcast id), oldest first.
    /// Records that no longer decrypt are skipped.
    pub fn history(&self, contact_uri: &str) -> Result<Vec<ChatEvent>, ClientError> {
        let me = self.my_uri()?;
        let chat = self.store.get_or_create_conversation(&me, contact_uri)?;

        let mut events = Vec::new();
        for stored in self.store.messages_for_conversation(&chat)? {
            match self.gateway.decrypt_then_verify(&stored.msg) {
                Ok(text) => events.push(ChatEvent::from_stored(&stored, text)),
                Err(e) => warn!(msg_id = %stored.id, error = %e, "Skipping undecryptable record"),
            }
        }
        Ok(events)
    }

    pub fn conversations(&self) -> Result<Vec<Conversation>, ClientError> {
        Ok(self.store.list_conversations()?)
    }

    fn my_uri(&self) -> Result<String, ClientError> {
        self.gateway
            .active_identity()
            .and_then(|persona| persona.confirmed_uri().map(str::to_string))
            .ok_or(ClientError::NoActiveIdentity)
    }

    fn touch(&self, chat: &Conversation, text: &str, timestamp: i64) {
        if let Err(e) = self.store.touch_conversation(&chat.id, text, timestamp) {
            warn!(chat_id = %chat.id, error = %e, "Failed to update conversation");
        }
    }

    fn notify(&self, event: &ChatEvent) {
        self.listeners
            .notify_all("chat", |listener| listener.on_chat_message(event));
    }
}

impl MessageListener for MessageDelivery {
    fn on_message(&self, message: &ChannelMessage) -> anyhow::Result<()> {
        if self.topics.is_chat(&message.topic) {
            self.handle(&message.payload);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::Ordering;
    use std::sync::Mutex;
    use std::time::Duration;

    use keychat_net::{ChannelConfig, LoopbackHub};
    use keychat_store::{Contact, Database};

    use crate::testing::MemoryGateway;

    #[derive(Default)]
    struct Inbox(Mutex<Vec<ChatEvent>>);

    impl ChatListener for Inbox {
        fn on_chat_message(&self, event: &ChatEvent) -> anyhow::Result<()> {
            self.0.lock().unwrap().push(event.clone());
            Ok(())
        }
    }

    struct Fixture {
        hub: LoopbackHub,
        channel: Channel,
        gateway: Arc<MemoryGateway>,
        store: Arc<Database>,
        delivery: MessageDelivery,
        inbox: Arc<Inbox>,
    }

    async fn fixture(me: &str) -> Fixture {
        let hub = LoopbackHub::new();
        let channel = hub.channel(ChannelConfig {
            client_id: me.into(),
            ..ChannelConfig::default()
        });
        channel.connect().await.unwrap();
        let gateway = Arc::new(MemoryGateway::with_persona("Me", me));
        let store = Arc::new(Database::open_in_memory().unwrap());
        let delivery = MessageDelivery::new(
            channel.clone(),
            gateway.clone(),
            store.clone(),
            TopicPrefixes::default(),
        );
        let inbox = Arc::new(Inbox::default());
        delivery.add_listener(inbox.clone());
        Fixture {
            hub,
            channel,
            gateway,
            store,
            delivery,
            inbox,
        }
    }

    fn wire(id: &str, from: &str, to: &str, ciphertext: &str) -> String {
        WireChatMessage::outbound(id, "their-chat", from, to, ciphertext, 1_700_000_000)
            .to_json()
            .unwrap()
    }

    #[tokio::test]
    async fn test_receive_is_idempotent() {
        let f = fixture("B-uri").await;
        f.store.save_contact(&Contact::new("A-uri", "Alice", "")).unwrap();

        let payload = wire("m1", "A-uri", "B-uri", "<sealed peers=\"B-uri\">hello</sealed>");
        f.delivery.handle(&payload);
        f.delivery.handle(&payload);

        let events = f.inbox.0.lock().unwrap().clone();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].text, "hello");
        assert_eq!(events[0].direction, ChatDirection::Receive);
        assert_eq!(events[0].timestamp, 1_700_000_000);

        let chat = f.store.get_or_create_conversation("B-uri", "A-uri").unwrap();
        assert_eq!(f.store.messages_for_conversation(&chat).unwrap().len(), 1);
        assert_eq!(chat.last_msg.as_deref(), Some("hello"));
        f.channel.close().await;
    }

    #[tokio::test]
    async fn test_unknown_sender_is_dropped() {
        let f = fixture("B-uri").await;
        f.delivery
            .handle(&wire("m1", "X-uri", "B-uri", "<sealed peers=\"B-uri\">hi</sealed>"));

        assert!(f.inbox.0.lock().unwrap().is_empty());
        assert!(!f.store.message_exists("m1").unwrap());
        f.channel.close().await;
    }

    #[tokio::test]
    async fn test_failed_decrypt_is_persisted_but_not_surfaced() {
        let f = fixture("B-uri").await;
        f.store.save_contact(&Contact::new("A-uri", "Alice", "")).unwrap();
        f.gateway.fail_decrypt.store(true, Ordering::SeqCst);

        f.delivery
            .handle(&wire("m1", "A-uri", "B-uri", "<sealed peers=\"B-uri\">hi</sealed>"));
        f.delivery.handle(&wire("m2", "A-uri", "B-uri", ""));

        assert!(f.inbox.0.lock().unwrap().is_empty());
        assert!(f.store.message_exists("m1").unwrap());
        assert!(!f.store.message_exists("m2").unwrap());
        f.channel.close().await;
    }

    #[tokio::test]
    async fn test_send_persists_publishes_and_notifies() {
        let f = fixture("A-uri").await;
        f.store.save_contact(&Contact::new("B-uri", "Bob", "")).unwrap();

        let event = f.delivery.send("B-uri", "hello").unwrap();
        assert_eq!(event.direction, ChatDirection::Send);
        assert_eq!(f.inbox.0.lock().unwrap().len(), 1);
        assert!(f.store.message_exists(&event.message_id).unwrap());

        tokio::time::sleep(Duration::from_millis(50)).await;
        let frames = f.hub.published_to("keychat/chats/B-uri");
        assert_eq!(frames.len(), 1);
        let sent = WireChatMessage::from_json(&frames[0].payload).unwrap();
        assert_eq!(sent.id, event.message_id);
        assert_eq!(sent.ciphertext().unwrap(), "<sealed peers=\"B-uri\">hello</sealed>");

        let history = f.delivery.history("B-uri").unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].text, "hello");
        f.channel.close().await;
    }

    #[tokio::test]
    async fn test_send_to_stranger_fails() {
        let f = fixture("A-uri").await;
        assert!(matches!(
            f.delivery.send("Z-uri", "hi"),
            Err(ClientError::UnknownContact(_))
        ));
        assert!(matches!(
            f.delivery.send("ALL", "hi"),
            Err(ClientError::NoRecipients)
        ));
        assert_eq!(f.gateway.encrypt_calls.load(Ordering::SeqCst), 0);
        f.channel.close().await;
    }

    #[tokio::test]
    async fn test_broadcast_encrypts_once() {
        let f = fixture("A-uri").await;
        for uri in ["B-uri", "C-uri", "D-uri"] {
            f.store.save_contact(&Contact::new(uri, uri, "")).unwrap();
        }

        f.delivery.send("ALL", "hello everyone").unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;

        assert_eq!(f.gateway.encrypt_calls.load(Ordering::SeqCst), 1);
        assert_eq!(f.hub.published().len(), 1);
        assert_eq!(f.hub.published_to("keychat/chats/ALL").len(), 1);
        f.channel.close().await;
    }
}
