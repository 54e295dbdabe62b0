//! Records persisted in the local database.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use keychat_shared::constants::BROADCAST_ID;
use keychat_shared::{ChatDirection, PersonaStatus};

// ---------------------------------------------------------------------------
// Contact
// ---------------------------------------------------------------------------

/// A remote persona we completed pairing with. Keyed by URI.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Contact {
    pub uri: String,
    pub name: String,
    pub sub_name: String,
    pub created_at: DateTime<Utc>,
}

impl Contact {
    pub fn new(uri: &str, name: &str, sub_name: &str) -> Self {
        Self {
            uri: uri.to_string(),
            name: name.to_string(),
            sub_name: sub_name.to_string(),
            created_at: Utc::now(),
        }
    }
}

// ---------------------------------------------------------------------------
// Persona
// ---------------------------------------------------------------------------

/// A local identity as last reported by the identity gateway.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PersonaRecord {
    pub name: String,
    pub sub_name: String,
    pub uri: Option<String>,
    pub status: PersonaStatus,
}

// ---------------------------------------------------------------------------
// Conversation
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Conversation {
    pub id: String,
    /// The lexically smaller participant URI.
    pub participant_a: String,
    pub participant_b: String,
    pub last_msg: Option<String>,
    /// Unix seconds of the latest message.
    pub timestamp: i64,
}

impl Conversation {
    pub fn is_broadcast(&self) -> bool {
        self.participant_a == BROADCAST_ID || self.participant_b == BROADCAST_ID
    }

    pub fn includes(&self, uri: &str) -> bool {
        self.is_broadcast() || self.participant_a == uri || self.participant_b == uri
    }
}

// ---------------------------------------------------------------------------
// StoredMessage
// ---------------------------------------------------------------------------

/// A chat message at rest. `msg` holds the ciphertext.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct StoredMessage {
    pub id: String,
    pub chat_id: String,
    pub direction: ChatDirection,
    pub sender_id: String,
    pub receiver_id: String,
    pub image_url: Option<String>,
    pub msg: String,
    pub timestamp: i64,
}
