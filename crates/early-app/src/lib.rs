//! Early App
//!
//! Rear-view camera application started early in boot. Wires the capture
//! pipeline to the display and instruments the session with boot KPIs.

pub mod config;
pub mod controller;
pub mod runner;

pub use config::{AppConfig, CameraInput, ConfigError};
pub use controller::{CameraController, SessionError, SessionParams, SessionReport, Stage};
pub use runner::run_until_interrupted;

use tracing_subscriber::{EnvFilter, FmtSubscriber};

/// Initialize logging
///
/// `RUST_LOG` takes precedence over `level`.
pub fn init_logging(level: &str, json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    let builder = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_names(true);

    let result = if json {
        tracing::subscriber::set_global_default(builder.json().finish())
    } else {
        tracing::subscriber::set_global_default(builder.finish())
    };
    if let Err(e) = result {
        eprintln!("Failed to set tracing subscriber: {}", e);
    }
}
