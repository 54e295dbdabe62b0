use thiserror::Error;

use keychat_net::NetError;
use keychat_shared::ProtocolError;
use keychat_store::StoreError;

/// Failures reported by the identity gateway.
#[derive(Error, Debug)]
pub enum GatewayError {
    #[error("No active identity")]
    NoActiveIdentity,

    #[error("Unknown persona: {0}")]
    UnknownPersona(String),

    #[error("Encryption failed: {0}")]
    Encrypt(String),

    #[error("Decryption failed: {0}")]
    Decrypt(String),

    #[error("Identity gateway error: {0}")]
    Other(String),
}

/// Failures talking to the trusted directory.
#[derive(Error, Debug)]
pub enum DirectoryError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Directory answered {0}")]
    Rejected(String),

    #[error("Malformed identity URI: {0}")]
    InvalidUri(String),

    #[error("Directory is not configured")]
    NotConfigured,
}

#[derive(Error, Debug)]
pub enum ClientError {
    #[error(transparent)]
    Gateway(#[from] GatewayError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Net(#[from] NetError),

    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    #[error(transparent)]
    Directory(#[from] DirectoryError),

    #[error("No confirmed persona is active")]
    NoActiveIdentity,

    #[error("Not a contact: {0}")]
    UnknownContact(String),

    #[error("No contacts to send to")]
    NoRecipients,

    #[error("Refusing to pair with own persona {0}")]
    SelfPairing(String),
}
