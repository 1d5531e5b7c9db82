//! Display Output for the Early App
//!
//! Consumer half of the capture-to-display pipeline:
//! - Display backend interface (setup, dispatch, teardown)
//! - Headless presenter reading the latest-frame slot
//! - Render loop driving dispatch until the session stops
//! - Compositor readiness wait

mod backend;
mod headless;
mod ready;
mod render;

pub use backend::{DisplayBackend, DisplayConnection, DisplaySetup};
pub use headless::{DispatchFault, HeadlessBackend, HeadlessConnection, PresentStats};
pub use ready::{marker_path, wait_for_marker, DEFAULT_POLL_INTERVAL};
pub use render::{RenderLoop, RenderStats};

use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Display error types
#[derive(Error, Debug)]
pub enum DisplayError {
    #[error("Failed to connect to display: {0}")]
    Connect(String),

    #[error("Display setup failed: {0}")]
    Setup(String),

    #[error("Event dispatch failed: {0}")]
    Dispatch(String),

    #[error("Event dispatch interrupted")]
    Interrupted,

    #[error("Display marker {path:?} did not appear within {waited:?}")]
    ReadyTimeout { path: PathBuf, waited: Duration },

    #[error("Wait for display cancelled")]
    Cancelled,

    #[error("Display I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl DisplayError {
    /// Errors the render loop logs and rides out
    pub fn is_transient(&self) -> bool {
        match self {
            DisplayError::Interrupted => true,
            DisplayError::Io(e) => matches!(
                e.kind(),
                std::io::ErrorKind::Interrupted | std::io::ErrorKind::WouldBlock
            ),
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_errors() {
        assert!(DisplayError::Interrupted.is_transient());
        let would_block = std::io::Error::from(std::io::ErrorKind::WouldBlock);
        assert!(DisplayError::from(would_block).is_transient());
        assert!(!DisplayError::Dispatch("broken pipe".into()).is_transient());
        let broken_pipe = std::io::Error::from(std::io::ErrorKind::BrokenPipe);
        assert!(!DisplayError::from(broken_pipe).is_transient());
    }
}
