//! Compositor readiness wait

use crate::DisplayError;
use camera_capture::RunState;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use tracing::{debug, info};

/// Default interval between checks for the marker
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Location of the compositor socket, `$XDG_RUNTIME_DIR/<socket>`
pub fn marker_path(runtime_dir: Option<&Path>, socket: &str) -> Option<PathBuf> {
    runtime_dir.map(|dir| dir.join(socket))
}

/// Poll until `path` exists, the timeout expires or the session stops
///
/// Returns how long the wait took.
pub fn wait_for_marker(
    path: &Path,
    timeout: Duration,
    poll_interval: Duration,
    run: &RunState,
) -> Result<Duration, DisplayError> {
    let start = Instant::now();
    debug!("Waiting for display marker {:?}", path);

    loop {
        if path.exists() {
            let waited = start.elapsed();
            info!("Display ready after {} ms", waited.as_millis());
            return Ok(waited);
        }
        if !run.is_running() {
            return Err(DisplayError::Cancelled);
        }

        let waited = start.elapsed();
        if waited >= timeout {
            return Err(DisplayError::ReadyTimeout {
                path: path.to_path_buf(),
                waited,
            });
        }
        std::thread::sleep(poll_interval.min(timeout - waited));
    }
}
