//! Control surface for the memory-pressure subsystem
//!
//! The host creates one [`MemoryManager`], starts it, and forwards UI messages
//! through [`MemoryManager::handle_message`]. Requests and responses are JSON
//! objects tagged by `type`.
//!
//! # Example
//!
//! ```no_run
//! use memory_api::{init_tracing, MemoryManager};
//! use pressure_types::{mock::MockProbe, PlatformProbe};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() {
//!     let probe: Arc<dyn PlatformProbe> = Arc::new(MockProbe::new());
//!     let manager = MemoryManager::open_default(probe);
//!     init_tracing(manager.config().global_settings().debug_mode);
//!
//!     manager.start().await;
//!     let reply = manager
//!         .handle_message(r#"{"type": "toggleFeature", "name": "autoReload", "enabled": true}"#)
//!         .await;
//!     println!("{}", reply);
//! }
//! ```

#![warn(missing_docs)]

mod manager;
mod messages;

pub use manager::MemoryManager;
pub use messages::{Request, Response, INVALID_REQUEST};

// Re-export the types that appear in requests and responses
pub use config_manager::{Profile, ProfileTrigger};
pub use feature_coordinator::{MemoryReport, WebContentsEntry};
pub use features::MemorySnapshot;
pub use memory_profiler::{MemoryProfile, ProfilingOptions};
pub use pressure_types::{AggregateMetrics, MemoryError, Result};

use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Install a global `tracing` subscriber
///
/// `RUST_LOG` wins when set; otherwise the level is `info`, or `debug` when
/// `debug_mode` is on. Returns false if a subscriber was already installed.
pub fn init_tracing(debug_mode: bool) -> bool {
    let level = if debug_mode { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_target(false))
        .try_init()
        .is_ok()
}
