//! Connection lifecycle state machine.
//!
//! `Disconnected -> Connecting -> Connected -> Disconnecting -> Closed`, with
//! `Unknown` before the channel has started. Every transition is broadcast
//! synchronously to the registered [`StatusListener`]s; setting the state it
//! already holds is a no-op and notifies nobody.

use std::sync::{Arc, Mutex};

use tracing::debug;

use crate::observers::ObserverList;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Disconnecting,
    Closed,
    #[default]
    Unknown,
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Disconnected => "DISCONNECTED",
            Self::Connecting => "CONNECTING",
            Self::Connected => "CONNECTED",
            Self::Disconnecting => "DISCONNECTING",
            Self::Closed => "CLOSED",
            Self::Unknown => "UNKNOWN",
        };
        f.write_str(s)
    }
}

pub trait StatusListener: Send + Sync {
    fn on_status_change(&self, state: ConnectionState);
}

pub struct StatusTracker {
    current: Mutex<ConnectionState>,
    // Serializes transitions so listeners see them in order.
    transition: Mutex<()>,
    listeners: ObserverList<dyn StatusListener>,
}

impl StatusTracker {
    pub fn new() -> Self {
        Self {
            current: Mutex::new(ConnectionState::Unknown),
            transition: Mutex::new(()),
            listeners: ObserverList::new(),
        }
    }

    pub fn current(&self) -> ConnectionState {
        *self.current.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Move to `state`. Returns `false` (and notifies nobody) if the tracker
    /// was already there.
    pub fn set(&self, state: ConnectionState) -> bool {
        let _transition = self.transition.lock().unwrap_or_else(|e| e.into_inner());
        {
            let mut current = self.current.lock().unwrap_or_else(|e| e.into_inner());
            if *current == state {
                return false;
            }
            debug!(from = %*current, to = %state, "Connection state changed");
            *current = state;
        }

        self.listeners.notify_all("status", |listener| {
            listener.on_status_change(state);
            Ok(())
        });
        true
    }

    pub fn add_listener(&self, listener: Arc<dyn StatusListener>) -> bool {
        self.listeners.add(listener)
    }

    pub fn remove_listener(&self, listener: &Arc<dyn StatusListener>) -> bool {
        self.listeners.remove(listener)
    }
}

impl Default for StatusTracker {
    fn default() -> Self {
        Self::new()
    }
}
