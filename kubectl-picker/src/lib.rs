//! Session and cache core for a Kubernetes pod picker.
//!
//! `PickerContext` is the entry point: TTL-cached pod and namespace lists, the
//! namespace scope the picker is looking at, and supervised `kubectl logs -f`
//! sessions with a bounded, follow-aware line buffer. The `lua` feature builds
//! the `kubectl_picker` Lua module on top of it.

cfg_if::cfg_if! {
    if #[cfg(feature = "telemetry")] {
        use kubectl_telemetry as logging;
    } else {
        mod log;
        use log as logging;
    }
}

pub mod cache;
pub mod client;
pub mod cmd;
pub mod context;
pub mod error;
pub mod event_queue;
pub mod log_session;
pub mod namespace;
pub mod settings;
pub mod streaming;
pub mod structs;
pub mod supervisor;
pub mod utils;

#[cfg(feature = "lua")]
mod lua;

pub use cache::{ResourceCache, ResourceKind};
pub use client::{ClusterClient, LogProcess, StreamEvent};
pub use cmd::KubeClient;
pub use context::{Listing, LogView, PickerContext};
pub use error::{Error, Result};
pub use log_session::{LogBuffer, LogSession, LogSnapshot, SessionId, SessionStatus};
pub use namespace::{NamespaceMode, NamespaceState, ScopeKey};
pub use settings::{LogOutputMode, Settings, SettingsHandle};
pub use structs::{LogTarget, NamespaceRecord, PodRecord, WorkloadKind, WorkloadRef};
pub use supervisor::{Supervisor, TimerId};

/// Installs the file logger (and the OTLP exporter with `telemetry`).
pub fn setup_logger(
    log_dir: &str,
    endpoint: &str,
) -> std::result::Result<(), Box<dyn std::error::Error + Send + Sync + 'static>> {
    logging::setup_logger(log_dir, endpoint)
}

/// Flushes whatever the logger buffers. Call before the host process exits.
pub fn shutdown_logger() {
    logging::shutdown()
}
