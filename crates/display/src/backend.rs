//! Display backend interface

use crate::DisplayError;
use camera_capture::{BufferExport, DisplayFrame, StreamFormat};
use frame_slot::SlotReader;

/// Output size used when none is configured
const DEFAULT_OUTPUT: (u32, u32) = (1920, 1080);

/// Everything a backend needs to start presenting
#[derive(Debug)]
pub struct DisplaySetup {
    /// Output width (0 = default)
    pub width: u32,
    /// Output height (0 = default)
    pub height: u32,
    pub fullscreen: bool,
    /// Negotiated capture format of the imported buffers
    pub format: StreamFormat,
    /// Capture buffers to import, indexed like the pool
    pub buffers: Vec<BufferExport>,
    /// Latest completed frame
    pub frames: SlotReader<DisplayFrame>,
}

impl DisplaySetup {
    /// Output size with defaults applied
    pub fn output_size(&self) -> (u32, u32) {
        if self.width == 0 || self.height == 0 {
            DEFAULT_OUTPUT
        } else {
            (self.width, self.height)
        }
    }
}

/// A live display connection
pub trait DisplayConnection {
    /// Dispatch one batch of display events, presenting the latest frame if
    /// there is one. Blocks at most for the backend's own timeout.
    /// Returns the number of events handled.
    fn dispatch(&mut self) -> Result<usize, DisplayError>;

    /// Release every display resource
    fn teardown(&mut self);
}

/// Factory for display connections
pub trait DisplayBackend: Send + Sync {
    type Connection: DisplayConnection;

    /// Short name for logs
    fn name(&self) -> &'static str;

    fn setup(&self, setup: DisplaySetup) -> Result<Self::Connection, DisplayError>;
}
