pub mod core;

use tracing_subscriber::EnvFilter;

pub use crate::core::downloader::StreamingDownloader;
pub use crate::core::error::{SetupError, SetupResult};
pub use crate::core::progress::{ProgressHandle, ProgressState, ProgressStatus};
pub use crate::core::setup::{ServerSetup, ServerVersion, SetupOptions};
pub use crate::core::state::EngineSettings;
pub use crate::core::transactions::{TransactionEntry, TransactionKind, TransactionScheduler};

/// Install the structured logging subscriber.
///
/// Honors `RUST_LOG`; does nothing if a subscriber is already set.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,server_setup=debug")),
        )
        .try_init();

    tracing::debug!("Server setup logging initialized");
}
