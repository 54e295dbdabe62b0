// Wire protocol and domain types shared by the keychat transport, store and client crates.

pub mod constants;
pub mod error;
pub mod protocol;
pub mod token;
pub mod topics;
pub mod types;

pub use error::ProtocolError;
pub use protocol::{MessageType, PairingMessage, WireChatMessage};
pub use token::IdentityToken;
pub use topics::TopicPrefixes;
pub use types::{is_broadcast, ChatDirection, PersonaStatus};
