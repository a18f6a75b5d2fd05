//! # duet-client
//!
//! Chat core of the duet client: per-room sessions, the attachment
//! transfer coordinator, progress throttling, and the event stream a UI
//! shell renders from.

pub mod bridge;
pub mod config;
pub mod coordinator;
pub mod error;
pub mod events;
pub mod progress;
pub mod session;
pub mod state;

#[cfg(test)]
pub(crate) mod testing;

use tracing_subscriber::{fmt, EnvFilter};

pub use config::ClientConfig;
pub use coordinator::{TransferCoordinator, TransferOutcome};
pub use error::ClientError;
pub use events::{ClientEvent, EventBus};
pub use progress::{ProgressAccumulator, ProgressEntry};
pub use session::{Action, ChatSession, Collaborators};

/// Install the global `tracing` subscriber. `RUST_LOG` overrides the
/// default filter. Calling it twice is harmless.
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new("duet_client=debug,duet_net=debug,duet_store=info,duet_media=info,warn")
    });

    let _ = fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .try_init();
}
