//! Headless display backend
//!
//! Presents frames by taking them from the slot and recording what it saw.
//! Used when no compositor is involved and by the session tests.

use crate::backend::{DisplayBackend, DisplayConnection, DisplaySetup};
use crate::DisplayError;
use camera_capture::{BufferExport, DisplayFrame, FrameBuffers};
use frame_slot::SlotReader;
use serde::Serialize;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Default bound on one dispatch
const DEFAULT_DISPATCH_TIMEOUT: Duration = Duration::from_millis(16);

/// Granularity of the wait for a new frame
const FRAME_POLL_STEP: Duration = Duration::from_millis(1);

/// Injected dispatch failure
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchFault {
    /// Transient; the render loop continues
    Interrupted,
    /// Fatal; the render loop exits
    Disconnected,
}

/// What the presenter has done so far
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct PresentStats {
    pub connected: bool,
    pub imported_buffers: usize,
    pub dispatches: u64,
    pub presented: u64,
    pub last_sequence: Option<u64>,
    #[serde(skip)]
    pub last_buffers: Option<FrameBuffers>,
    /// Frames overwritten before they could be presented
    pub skipped: u64,
    pub torn_down: bool,
}

/// Presenter without a real output
#[derive(Debug, Clone)]
pub struct HeadlessBackend {
    dispatch_timeout: Duration,
    fail_setup: bool,
    faults: Arc<Mutex<VecDeque<DispatchFault>>>,
    stats: Arc<Mutex<PresentStats>>,
}

impl Default for HeadlessBackend {
    fn default() -> Self {
        Self::new(DEFAULT_DISPATCH_TIMEOUT)
    }
}

impl HeadlessBackend {
    pub fn new(dispatch_timeout: Duration) -> Self {
        Self {
            dispatch_timeout,
            fail_setup: false,
            faults: Arc::default(),
            stats: Arc::default(),
        }
    }

    /// Refuse setup, as a display that never comes up would
    pub fn failing_setup(mut self) -> Self {
        self.fail_setup = true;
        self
    }

    /// Fail upcoming dispatches, in order
    pub fn with_faults(self, faults: impl IntoIterator<Item = DispatchFault>) -> Self {
        if let Ok(mut queue) = self.faults.lock() {
            queue.extend(faults);
        }
        self
    }

    /// Snapshot of presentation statistics
    pub fn stats(&self) -> PresentStats {
        self.stats
            .lock()
            .map(|stats| stats.clone())
            .unwrap_or_default()
    }
}

impl DisplayBackend for HeadlessBackend {
    type Connection = HeadlessConnection;

    fn name(&self) -> &'static str {
        "headless"
    }

    fn setup(&self, setup: DisplaySetup) -> Result<HeadlessConnection, DisplayError> {
        if self.fail_setup {
            return Err(DisplayError::Connect(
                "headless output unavailable".to_string(),
            ));
        }
        if setup.buffers.is_empty() {
            return Err(DisplayError::Setup(
                "no capture buffers to import".to_string(),
            ));
        }

        let (width, height) = setup.output_size();
        info!(
            "Headless display {}x{} (fullscreen={}) presenting {}x{} {} stride {} from {} buffers",
            width,
            height,
            setup.fullscreen,
            setup.format.width,
            setup.format.frame_height(),
            setup.format.pixel_format,
            setup.format.stride_width(),
            setup.buffers.len()
        );

        if let Ok(mut stats) = self.stats.lock() {
            stats.connected = true;
            stats.imported_buffers = setup.buffers.len();
        }
        Ok(HeadlessConnection {
            frames: setup.frames,
            buffers: setup.buffers,
            dispatch_timeout: self.dispatch_timeout,
            faults: self.faults.clone(),
            stats: self.stats.clone(),
        })
    }
}

/// Live headless connection
#[derive(Debug)]
pub struct HeadlessConnection {
    frames: SlotReader<DisplayFrame>,
    buffers: Vec<BufferExport>,
    dispatch_timeout: Duration,
    faults: Arc<Mutex<VecDeque<DispatchFault>>>,
    stats: Arc<Mutex<PresentStats>>,
}

impl HeadlessConnection {
    fn next_fault(&self) -> Option<DispatchFault> {
        self.faults.lock().ok().and_then(|mut queue| queue.pop_front())
    }

    fn present(&mut self, frame: DisplayFrame) -> Result<(), DisplayError> {
        if let Some(index) = frame.buffers.indices().find(|&i| i >= self.buffers.len()) {
            return Err(DisplayError::Dispatch(format!(
                "frame {} references unknown buffer {}",
                frame.sequence, index
            )));
        }
        debug!(
            "Presenting frame {} ({:?}), {} us after capture",
            frame.sequence,
            frame.buffers,
            frame.captured_at.elapsed().as_micros()
        );
        if let Ok(mut stats) = self.stats.lock() {
            stats.presented += 1;
            stats.last_sequence = Some(frame.sequence);
            stats.last_buffers = Some(frame.buffers);
            stats.skipped = self.frames.skipped();
        }
        Ok(())
    }
}

impl DisplayConnection for HeadlessConnection {
    fn dispatch(&mut self) -> Result<usize, DisplayError> {
        if let Ok(mut stats) = self.stats.lock() {
            stats.dispatches += 1;
        }
        match self.next_fault() {
            Some(DispatchFault::Interrupted) => return Err(DisplayError::Interrupted),
            Some(DispatchFault::Disconnected) => {
                return Err(DisplayError::Dispatch("display disconnected".to_string()))
            }
            None => {}
        }

        let mut waited = Duration::ZERO;
        loop {
            if let Some(frame) = self.frames.take_update() {
                self.present(frame)?;
                return Ok(1);
            }
            if waited >= self.dispatch_timeout {
                return Ok(0);
            }
            let step = FRAME_POLL_STEP.min(self.dispatch_timeout - waited);
            std::thread::sleep(step);
            waited += step;
        }
    }

    fn teardown(&mut self) {
        match self.stats.lock() {
            Ok(mut stats) => {
                stats.torn_down = true;
                stats.connected = false;
                info!(
                    "Headless display torn down after {} frames",
                    stats.presented
                );
            }
            Err(_) => warn!("Headless display stats unavailable at teardown"),
        }
    }
}
