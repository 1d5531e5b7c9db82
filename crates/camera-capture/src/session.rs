//! Per-session shared state

use crate::pairing::DisplayFrame;
use boot_kpi::KpiTimestamps;
use frame_slot::SlotWriter;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Latched `running` flag shared by the acquisition and render threads
///
/// Starts set; once cleared it stays cleared.
#[derive(Debug, Clone)]
pub struct RunState {
    running: Arc<AtomicBool>,
}

impl Default for RunState {
    fn default() -> Self {
        Self::new()
    }
}

impl RunState {
    pub fn new() -> Self {
        Self {
            running: Arc::new(AtomicBool::new(true)),
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Clear the flag. Returns true only for the call that cleared it.
    pub fn stop(&self) -> bool {
        self.running.swap(false, Ordering::AcqRel)
    }

    /// Guard that clears the flag when dropped, unwinding included
    pub fn stop_on_drop(&self) -> StopOnDrop<'_> {
        StopOnDrop { run: self }
    }
}

/// Clears a `RunState` when it goes out of scope
#[derive(Debug)]
pub struct StopOnDrop<'a> {
    run: &'a RunState,
}

impl Drop for StopOnDrop<'_> {
    fn drop(&mut self) {
        self.run.stop();
    }
}

/// Context of one streaming session, passed by reference to both loops
#[derive(Debug, Clone, Default)]
pub struct SessionContext {
    pub run: RunState,
    pub kpi: Arc<KpiTimestamps>,
}

impl SessionContext {
    pub fn new() -> Self {
        Self::default()
    }
}

/// Destination for completed display frames
pub trait FramePublisher: Sync {
    fn publish(&self, frame: DisplayFrame);
}

impl FramePublisher for SlotWriter<DisplayFrame> {
    fn publish(&self, frame: DisplayFrame) {
        SlotWriter::publish(self, frame);
    }
}
