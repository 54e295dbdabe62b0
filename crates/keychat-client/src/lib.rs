// Pairing handshake, encrypted chat delivery and persona lifecycle on top of the keychat transport.

pub mod config;
pub mod delivery;
pub mod directory;
pub mod error;
pub mod gateway;
pub mod monitor;
pub mod pairing;
pub mod personas;
pub mod session;

#[cfg(test)]
pub(crate) mod testing;

use tracing_subscriber::{fmt, EnvFilter};

pub use config::ClientConfig;
pub use delivery::{ChatEvent, ChatListener, MessageDelivery};
pub use directory::{Directory, HttpDirectory};
pub use error::{ClientError, DirectoryError, GatewayError};
pub use gateway::{IdentityGateway, Persona};
pub use monitor::{Monitor, MonitorState, RefreshListener};
pub use pairing::PairingEngine;
pub use personas::{PendingPersona, PersonaTracker};
pub use session::Session;

/// Filter used when `RUST_LOG` is unset.
pub const DEFAULT_LOG_FILTER: &str = "info,keychat_net=debug,keychat_client=debug";

/// Install the global `fmt` subscriber, honouring `RUST_LOG`.
pub fn init_tracing(default_filter: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));

    fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .init();
}
