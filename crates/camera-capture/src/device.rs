//! Device driver interface

use crate::buffer::{Buffer, MemoryKind};
use crate::format::{FieldTag, FormatRequest, StreamFormat};
use crate::CaptureError;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// A completed buffer as reported by the driver, before validation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Dequeued {
    /// Raw index; may be anything the driver chose to report
    pub index: i64,
    pub field: FieldTag,
    pub bytes_used: usize,
    pub sequence: u32,
}

impl Dequeued {
    /// Progressive buffer with no payload details
    pub fn new(index: i64, field: FieldTag) -> Self {
        Self {
            index,
            field,
            bytes_used: 0,
            sequence: 0,
        }
    }
}

/// An open capture device
///
/// Calls arrive in the order `negotiate_format`, `request_buffers`,
/// `enqueue`*, `stream_on`, then `wait_ready`/`dequeue`/`enqueue` from the
/// acquisition thread, then `stream_off` and `close`.
pub trait CaptureDevice: Send {
    /// Apply `request` and return the format the driver settled on
    fn negotiate_format(&mut self, request: &FormatRequest) -> Result<StreamFormat, CaptureError>;

    /// Prepare the driver for `count` application-allocated buffers
    fn request_buffers(&mut self, count: usize, memory: MemoryKind) -> Result<(), CaptureError>;

    /// Give a buffer to the driver to fill
    fn enqueue(&mut self, buffer: &Buffer) -> Result<(), CaptureError>;

    /// Wait up to `timeout` for a completed buffer. `Ok(false)` on timeout.
    fn wait_ready(&mut self, timeout: Duration) -> Result<bool, CaptureError>;

    /// Take the next completed buffer; `Ok(None)` if none is ready after all
    fn dequeue(&mut self) -> Result<Option<Dequeued>, CaptureError>;

    fn stream_on(&mut self) -> Result<(), CaptureError>;

    /// Stop streaming and drop every driver reference to the buffers
    fn stream_off(&mut self) -> Result<(), CaptureError>;

    fn close(&mut self) -> Result<(), CaptureError>;
}

/// Factory for capture devices
pub trait CaptureBackend: Send + Sync {
    type Device: CaptureDevice;

    /// Short name for logs
    fn name(&self) -> &'static str;

    /// Device node for a numeric device id
    fn device_path(&self, device_id: u32) -> PathBuf;

    fn open(&self, path: &Path) -> Result<Self::Device, CaptureError>;
}
