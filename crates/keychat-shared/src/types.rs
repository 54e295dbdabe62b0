use serde::{Deserialize, Serialize};

use crate::constants::BROADCAST_ID;

/// Whether a chat record was produced locally or received from a peer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatDirection {
    Send,
    Receive,
}

impl ChatDirection {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Send => "send",
            Self::Receive => "receive",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "send" => Some(Self::Send),
            "receive" => Some(Self::Receive),
            _ => None,
        }
    }
}

impl std::fmt::Display for ChatDirection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Provisioning state of a local persona as reported by the identity gateway.
///
/// A persona only has a stable URI once it is `Confirmed`; creation takes a
/// few seconds on the gateway side.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum PersonaStatus {
    Created = 0,
    Confirming = 1,
    Confirmed = 2,
}

impl PersonaStatus {
    pub fn from_code(code: i64) -> Option<Self> {
        match code {
            0 => Some(Self::Created),
            1 => Some(Self::Confirming),
            2 => Some(Self::Confirmed),
            _ => None,
        }
    }

    pub fn code(&self) -> i64 {
        *self as i64
    }

    pub fn is_confirmed(&self) -> bool {
        matches!(self, Self::Confirmed)
    }
}

/// True when `id` is the broadcast participant.
pub fn is_broadcast(id: &str) -> bool {
    id == BROADCAST_ID
}

/// Current time as unix-epoch seconds.
pub fn unix_now() -> i64 {
    chrono::Utc::now().timestamp()
}
