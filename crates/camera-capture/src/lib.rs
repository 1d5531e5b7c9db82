//! Camera Capture Library for the Early App
//!
//! Owns the producer half of the capture-to-display pipeline:
//! - Buffer pool shared with the kernel driver (mapped or DMA-BUF memory)
//! - Device driver interface, with V4L2 and simulated backends
//! - Interlaced field pairing and buffer recycling
//! - Acquisition loop publishing display frames to the render thread

pub mod acquisition;
pub mod buffer;
pub mod device;
pub mod format;
pub mod fps;
pub mod pairing;
pub mod session;
pub mod sim;
#[cfg(target_os = "linux")]
pub mod v4l2;

pub use acquisition::{AcquisitionConfig, AcquisitionLoop, AcquisitionStats, ExitReason};
pub use buffer::{Buffer, BufferExport, BufferPool, MemoryKind, Owner};
pub use device::{CaptureBackend, CaptureDevice, Dequeued};
pub use format::{
    FieldMode, FieldTag, FormatRequest, PixelFormat, StreamConfig, StreamFormat, StreamInput,
};
pub use fps::{FpsReport, FrameRateMeter};
pub use pairing::{DisplayFrame, FieldPairer, FrameBuffers, PairEvent, PairingState};
pub use session::{FramePublisher, RunState, SessionContext, StopOnDrop};

use thiserror::Error;

/// Capture error types
#[derive(Error, Debug)]
pub enum CaptureError {
    #[error("Failed to open capture device {path}: {source}")]
    Open {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid format: {0}")]
    Format(String),

    #[error("Buffer allocation failed: {0}")]
    Buffer(String),

    #[error("Streaming error: {0}")]
    Stream(String),

    #[error("Driver returned buffer index {index} outside pool of {count}")]
    IndexOutOfRange { index: i64, count: usize },

    #[error("Buffer {index} is already owned by the {owner:?}")]
    Ownership { index: usize, owner: Owner },

    #[error("{count} buffers still owned by the driver")]
    BuffersOutstanding { count: usize },

    #[error("Device I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl CaptureError {
    /// Errors that mean the driver broke the buffer exchange contract
    pub fn is_protocol_violation(&self) -> bool {
        matches!(
            self,
            CaptureError::IndexOutOfRange { .. } | CaptureError::Ownership { .. }
        )
    }
}
