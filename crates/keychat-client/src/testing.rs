//! In-memory identity gateway for engine tests.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;

use keychat_shared::PersonaStatus;

use crate::error::GatewayError;
use crate::gateway::{IdentityGateway, Persona};

#[derive(Default)]
struct State {
    personas: Vec<Persona>,
    active: Option<String>,
    contacts: Vec<(String, String, String)>,
    hooks: Vec<&'static str>,
}

/// Ciphertext is `<sealed peers="...">plaintext</sealed>`.
#[derive(Default)]
pub struct MemoryGateway {
    state: Mutex<State>,
    pub encrypt_calls: AtomicUsize,
    pub fail_decrypt: AtomicBool,
    pub fail_hooks: AtomicBool,
}

impl MemoryGateway {
    /// A gateway with one confirmed, active persona.
    pub fn with_persona(name: &str, uri: &str) -> Self {
        let gateway = Self::default();
        gateway.add_persona(name, "", Some(uri), PersonaStatus::Confirmed);
        gateway.set_active_identity(uri).unwrap();
        gateway
    }

    pub fn add_persona(&self, name: &str, sub_name: &str, uri: Option<&str>, status: PersonaStatus) {
        self.state.lock().unwrap().personas.push(Persona {
            name: name.into(),
            sub_name: sub_name.into(),
            uri: uri.map(str::to_string),
            status,
        });
    }

    /// Advance a persona's provisioning, as the gateway would on its own.
    pub fn provision(&self, name: &str, uri: &str, status: PersonaStatus) {
        let mut state = self.state.lock().unwrap();
        if let Some(persona) = state.personas.iter_mut().find(|p| p.name == name) {
            persona.uri = Some(uri.into());
            persona.status = status;
        }
    }

    pub fn contact_uris(&self) -> Vec<String> {
        self.state
            .lock()
            .unwrap()
            .contacts
            .iter()
            .map(|(uri, _, _)| uri.clone())
            .collect()
    }

    pub fn hooks(&self) -> Vec<&'static str> {
        self.state.lock().unwrap().hooks.clone()
    }

    fn hook(&self, name: &'static str) -> Result<(), GatewayError> {
        self.state.lock().unwrap().hooks.push(name);
        if self.fail_hooks.load(Ordering::SeqCst) {
            return Err(GatewayError::Other(format!("{name} failed")));
        }
        Ok(())
    }
}

impl IdentityGateway for MemoryGateway {
    fn active_identity(&self) -> Option<Persona> {
        let state = self.state.lock().unwrap();
        let uri = state.active.as_ref()?;
        state
            .personas
            .iter()
            .find(|p| p.uri.as_ref() == Some(uri))
            .cloned()
    }

    fn set_active_identity(&self, uri: &str) -> Result<Persona, GatewayError> {
        let mut state = self.state.lock().unwrap();
        let persona = state
            .personas
            .iter()
            .find(|p| p.confirmed_uri() == Some(uri))
            .cloned()
            .ok_or_else(|| GatewayError::UnknownPersona(uri.into()))?;
        state.active = Some(uri.into());
        Ok(persona)
    }

    fn clear_active_identity(&self) {
        self.state.lock().unwrap().active = None;
    }

    fn personas(&self) -> Result<Vec<Persona>, GatewayError> {
        Ok(self.state.lock().unwrap().personas.clone())
    }

    fn create_persona(&self, name: &str, sub_name: &str) -> Result<(), GatewayError> {
        self.add_persona(name, sub_name, None, PersonaStatus::Created);
        Ok(())
    }

    fn create_contact(&self, uri: &str, name: &str, sub_name: &str) -> Result<(), GatewayError> {
        self.state
            .lock()
            .unwrap()
            .contacts
            .push((uri.into(), name.into(), sub_name.into()));
        Ok(())
    }

    fn sign_then_encrypt(&self, peers: &[String], plaintext: &str) -> Result<String, GatewayError> {
        self.encrypt_calls.fetch_add(1, Ordering::SeqCst);
        Ok(format!("<sealed peers=\"{}\">{}</sealed>", peers.join(","), plaintext))
    }

    fn decrypt_then_verify(&self, ciphertext: &str) -> Result<String, GatewayError> {
        if self.fail_decrypt.load(Ordering::SeqCst) {
            return Err(GatewayError::Decrypt("forced failure".into()));
        }
        let body = ciphertext
            .strip_prefix("<sealed peers=\"")
            .and_then(|rest| rest.split_once("\">"))
            .and_then(|(_, rest)| rest.strip_suffix("</sealed>"))
            .ok_or_else(|| GatewayError::Decrypt("not a sealed message".into()))?;
        Ok(body.to_string())
    }

    fn on_start(&self) -> Result<(), GatewayError> {
        self.hook("start")
    }

    fn on_resume(&self) -> Result<(), GatewayError> {
        self.hook("resume")
    }

    fn on_pause(&self) -> Result<(), GatewayError> {
        self.hook("pause")
    }

    fn on_stop(&self) -> Result<(), GatewayError> {
        self.hook("stop")
    }
}
