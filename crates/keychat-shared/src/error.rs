use thiserror::Error;

use crate::protocol::MessageType;

#[derive(Error, Debug)]
pub enum ProtocolError {
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Base64 decode error: {0}")]
    Base64(#[from] base64::DecodeError),

    #[error("Payload is not valid UTF-8")]
    InvalidUtf8,

    #[error("Cannot answer a {found} message, expected {expected}")]
    UnexpectedPrecursor {
        expected: MessageType,
        found: MessageType,
    },

    #[error("Missing field: {0}")]
    MissingField(&'static str),

    #[error("Persona has no confirmed URI")]
    MissingUri,
}
