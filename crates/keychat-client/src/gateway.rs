//! The identity/crypto collaborator.
//!
//! Key management, persona provisioning and the actual cryptography live
//! behind this trait; the engines only see URIs and opaque ciphertext.

use keychat_shared::protocol::PairingIdentity;
use keychat_shared::PersonaStatus;

use crate::error::GatewayError;

/// A local identity as reported by the gateway.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Persona {
    pub name: String,
    pub sub_name: String,
    /// Assigned once provisioning has progressed far enough.
    pub uri: Option<String>,
    pub status: PersonaStatus,
}

impl Persona {
    /// The URI, but only once the persona is confirmed.
    pub fn confirmed_uri(&self) -> Option<&str> {
        if self.status.is_confirmed() {
            self.uri.as_deref()
        } else {
            None
        }
    }

    pub fn pairing_identity(&self) -> Option<PairingIdentity> {
        self.confirmed_uri().map(|uri| PairingIdentity {
            uri: uri.to_string(),
            name: self.name.clone(),
            sub_name: self.sub_name.clone(),
        })
    }
}

pub trait IdentityGateway: Send + Sync {
    /// The persona currently acting for this client.
    fn active_identity(&self) -> Option<Persona>;

    /// Make the confirmed persona with `uri` the active one.
    fn set_active_identity(&self, uri: &str) -> Result<Persona, GatewayError>;

    fn clear_active_identity(&self);

    /// Every local persona, confirmed or not.
    fn personas(&self) -> Result<Vec<Persona>, GatewayError>;

    /// Start provisioning a new persona. Completes asynchronously; poll
    /// [`IdentityGateway::personas`] for progress.
    fn create_persona(&self, name: &str, sub_name: &str) -> Result<(), GatewayError>;

    /// Register a paired peer so messages can be encrypted for it.
    fn create_contact(&self, uri: &str, name: &str, sub_name: &str) -> Result<(), GatewayError>;

    fn sign_then_encrypt(&self, peers: &[String], plaintext: &str) -> Result<String, GatewayError>;

    fn decrypt_then_verify(&self, ciphertext: &str) -> Result<String, GatewayError>;

    fn on_start(&self) -> Result<(), GatewayError> {
        Ok(())
    }

    fn on_resume(&self) -> Result<(), GatewayError> {
        Ok(())
    }

    fn on_pause(&self) -> Result<(), GatewayError> {
        Ok(())
    }

    fn on_stop(&self) -> Result<(), GatewayError> {
        Ok(())
    }
}
