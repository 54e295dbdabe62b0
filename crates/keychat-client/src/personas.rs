//! Tracking of local personas that are still being provisioned.
//!
//! Creating a persona on the gateway takes a few seconds. A pending entry is
//! keyed by display name until the gateway reports a URI, then by URI, and is
//! dropped once the persona is confirmed.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use tracing::{debug, info, warn};

use keychat_shared::PersonaStatus;
use keychat_store::{ChatRepository, PersonaRecord};

use crate::error::ClientError;
use crate::gateway::{IdentityGateway, Persona};
use crate::monitor::RefreshListener;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingPersona {
    pub name: String,
    pub sub_name: String,
    pub uri: Option<String>,
    pub status: PersonaStatus,
}

impl PendingPersona {
    fn key(&self) -> String {
        self.uri.clone().unwrap_or_else(|| self.name.clone())
    }

    fn matches(&self, persona: &Persona) -> bool {
        match (&self.uri, &persona.uri) {
            (Some(mine), Some(theirs)) => mine == theirs,
            _ => self.name == persona.name && self.sub_name == persona.sub_name,
        }
    }

    fn record(&self) -> PersonaRecord {
        PersonaRecord {
            name: self.name.clone(),
            sub_name: self.sub_name.clone(),
            uri: self.uri.clone(),
            status: self.status,
        }
    }
}

pub struct PersonaTracker {
    gateway: Arc<dyn IdentityGateway>,
    store: Arc<dyn ChatRepository>,
    pending: Mutex<HashMap<String, PendingPersona>>,
}

impl PersonaTracker {
    pub fn new(gateway: Arc<dyn IdentityGateway>, store: Arc<dyn ChatRepository>) -> Self {
        Self {
            gateway,
            store,
            pending: Mutex::new(HashMap::new()),
        }
    }

    fn pending_map(&self) -> MutexGuard<'_, HashMap<String, PendingPersona>> {
        self.pending.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Ask the gateway for a new persona and start tracking it.
    pub fn request(&self, name: &str, sub_name: &str) -> Result<(), ClientError> {
        self.gateway.create_persona(name, sub_name)?;

        let entry = PendingPersona {
            name: name.to_string(),
            sub_name: sub_name.to_string(),
            uri: None,
            status: PersonaStatus::Created,
        };
        self.store.upsert_persona(&entry.record())?;
        self.pending_map().insert(entry.key(), entry);
        info!(name = %name, "Persona requested");
        Ok(())
    }

    /// Pending entries, in no particular order.
    pub fn pending(&self) -> Vec<PendingPersona> {
        self.pending_map().values().cloned().collect()
    }

    /// Stop tracking an entry, by display name or URI.
    pub fn remove(&self, key: &str) -> bool {
        self.pending_map().remove(key).is_some()
    }

    /// Pull the latest provisioning state from the gateway.
    pub fn refresh(&self) -> Result<(), ClientError> {
        let mut pending = self.pending_map();
        if pending.is_empty() {
            return Ok(());
        }
        let personas = self.gateway.personas()?;

        let entries: Vec<PendingPersona> = pending.drain().map(|(_, entry)| entry).collect();
        for mut entry in entries {
            if let Some(persona) = personas.iter().find(|p| entry.matches(p)) {
                let changed = entry.status != persona.status || entry.uri != persona.uri;
                entry.status = persona.status;
                if persona.uri.is_some() {
                    entry.uri = persona.uri.clone();
                }
                if changed {
                    debug!(name = %entry.name, status = ?entry.status, "Persona progressed");
                    if let Err(e) = self.store.upsert_persona(&entry.record()) {
                        warn!(name = %entry.name, error = %e, "Failed to persist persona");
                    }
                }
                if entry.status.is_confirmed() {
                    info!(name = %entry.name, uri = ?entry.uri, "Persona confirmed");
                    continue;
                }
            }
            pending.insert(entry.key(), entry);
        }
        Ok(())
    }
}

impl RefreshListener for PersonaTracker {
    fn on_refresh(&self) -> anyhow::Result<()> {
        self.refresh()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use keychat_store::Database;

    use crate::testing::MemoryGateway;

    #[test]
    fn test_pending_persona_lifecycle() {
        let gateway = Arc::new(MemoryGateway::default());
        let store = Arc::new(Database::open_in_memory().unwrap());
        let tracker = PersonaTracker::new(gateway.clone(), store.clone());

        tracker.request("Alice", "Work").unwrap();
        assert_eq!(tracker.pending()[0].status, PersonaStatus::Created);

        // Nothing changed yet.
        tracker.refresh().unwrap();
        assert_eq!(tracker.pending().len(), 1);

        // URI assigned: entry is re-keyed.
        gateway.provision("Alice", "A-uri", PersonaStatus::Confirming);
        tracker.refresh().unwrap();
        let pending = tracker.pending();
        assert_eq!(pending[0].uri.as_deref(), Some("A-uri"));
        assert!(!tracker.remove("Alice"));

        // Confirmed: entry leaves the tracker, the store keeps it.
        gateway.provision("Alice", "A-uri", PersonaStatus::Confirmed);
        tracker.on_refresh().unwrap();
        assert!(tracker.pending().is_empty());

        let stored = store.list_personas().unwrap();
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].uri.as_deref(), Some("A-uri"));
        assert_eq!(stored[0].status, PersonaStatus::Confirmed);
    }

    #[test]
    fn test_remove_by_name() {
        let gateway = Arc::new(MemoryGateway::default());
        let store = Arc::new(Database::open_in_memory().unwrap());
        let tracker = PersonaTracker::new(gateway, store);

        tracker.request("Bob", "").unwrap();
        assert!(tracker.remove("Bob"));
        assert!(tracker.pending().is_empty());
    }
}
