use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use serde::{Deserialize, Serialize};

use crate::error::ProtocolError;
use crate::types::{unix_now, ChatDirection};

/// Step of the three-message pairing handshake.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum MessageType {
    PairRequest,
    PairResponse,
    PairAck,
}

impl std::fmt::Display for MessageType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::PairRequest => "pairRequest",
            Self::PairResponse => "pairResponse",
            Self::PairAck => "pairAck",
        };
        f.write_str(s)
    }
}

/// The name card a persona puts into every pairing message it sends.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PairingIdentity {
    pub uri: String,
    pub name: String,
    pub sub_name: String,
}

/// One step of the pairing handshake, as published on a pairing topic.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PairingMessage {
    pub msg_type: MessageType,
    pub receiver_id: String,
    pub sender_id: String,
    pub sender_name: String,
    pub sender_sub_name: String,
}

impl PairingMessage {
    /// Ask `target_uri` to become a mutual contact.
    pub fn request(me: &PairingIdentity, target_uri: &str) -> Self {
        Self::request_as(me, target_uri, None)
    }

    /// Like [`PairingMessage::request`], but presenting `sub_name` instead
    /// of the persona's own sub-name when one is given.
    pub fn request_as(me: &PairingIdentity, target_uri: &str, sub_name: Option<&str>) -> Self {
        Self {
            msg_type: MessageType::PairRequest,
            receiver_id: target_uri.to_string(),
            sender_id: me.uri.clone(),
            sender_name: me.name.clone(),
            sender_sub_name: sub_name.map_or_else(|| me.sub_name.clone(), str::to_string),
        }
    }

    /// Answer a `pairRequest`. Fails if `respond_to` is any other step.
    pub fn response_to(me: &PairingIdentity, respond_to: &Self) -> Result<Self, ProtocolError> {
        Self::reply(me, respond_to, MessageType::PairRequest, MessageType::PairResponse)
    }

    /// Acknowledge a `pairResponse`. Fails if `respond_to` is any other step.
    pub fn ack_to(me: &PairingIdentity, respond_to: &Self) -> Result<Self, ProtocolError> {
        Self::reply(me, respond_to, MessageType::PairResponse, MessageType::PairAck)
    }

    fn reply(
        me: &PairingIdentity,
        respond_to: &Self,
        expected: MessageType,
        msg_type: MessageType,
    ) -> Result<Self, ProtocolError> {
        if respond_to.msg_type != expected {
            return Err(ProtocolError::UnexpectedPrecursor {
                expected,
                found: respond_to.msg_type,
            });
        }
        if respond_to.sender_id.is_empty() {
            return Err(ProtocolError::MissingField("senderId"));
        }

        Ok(Self {
            msg_type,
            receiver_id: respond_to.sender_id.clone(),
            sender_id: me.uri.clone(),
            sender_name: me.name.clone(),
            sender_sub_name: me.sub_name.clone(),
        })
    }

    pub fn to_json(&self) -> Result<String, ProtocolError> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn from_json(s: &str) -> Result<Self, ProtocolError> {
        Ok(serde_json::from_str(s)?)
    }
}

/// A chat message as carried on a chat topic.
///
/// `msg` holds the base64 encoding of the ciphertext produced by the identity
/// gateway; some ciphertext encodings are XML-framed and not otherwise safe to
/// embed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WireChatMessage {
    /// Client-generated UUID, the deduplication key.
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chat_id: Option<String>,
    #[serde(rename = "sendOrRcvd", default, skip_serializing_if = "Option::is_none")]
    pub direction: Option<ChatDirection>,
    pub sender_id: String,
    pub receiver_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_url: Option<String>,
    pub msg: String,
    /// Unix-epoch seconds.
    #[serde(default)]
    pub timestamp: i64,
}

impl WireChatMessage {
    /// Wrap a ciphertext for the wire, base64-encoding it.
    pub fn outbound(
        id: &str,
        chat_id: &str,
        sender_id: &str,
        receiver_id: &str,
        ciphertext: &str,
        timestamp: i64,
    ) -> Self {
        Self {
            id: id.to_string(),
            chat_id: Some(chat_id.to_string()),
            direction: Some(ChatDirection::Send),
            sender_id: sender_id.to_string(),
            receiver_id: receiver_id.to_string(),
            image_url: None,
            msg: STANDARD.encode(ciphertext.as_bytes()),
            timestamp: if timestamp > 0 { timestamp } else { unix_now() },
        }
    }

    /// Decode the base64 payload back to the ciphertext string.
    pub fn ciphertext(&self) -> Result<String, ProtocolError> {
        let bytes = STANDARD.decode(self.msg.trim())?;
        String::from_utf8(bytes).map_err(|_| ProtocolError::InvalidUtf8)
    }

    pub fn to_json(&self) -> Result<String, ProtocolError> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn from_json(s: &str) -> Result<Self, ProtocolError> {
        let message: Self = serde_json::from_str(s)?;
        if message.id.trim().is_empty() {
            return Err(ProtocolError::MissingField("id"));
        }
        Ok(message)
    }
}
