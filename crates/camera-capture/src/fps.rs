//! Frame rate measurement

use std::time::{Duration, Instant};

/// Default measurement window
pub const DEFAULT_WINDOW: Duration = Duration::from_secs(1);

/// Throughput over one completed window
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FpsReport {
    pub frames: u64,
    pub elapsed: Duration,
    pub fps: f64,
}

/// Counts frames per fixed wall-clock window
///
/// Windows are measured between the instants passed to `record`, so the
/// reported rate does not drift with the caller's scheduling.
#[derive(Debug, Clone)]
pub struct FrameRateMeter {
    window: Duration,
    window_start: Instant,
    frames: u64,
    total: u64,
}

impl FrameRateMeter {
    /// Meter whose first window starts now
    pub fn new(window: Duration) -> Self {
        Self::starting_at(Instant::now(), window)
    }

    /// Meter whose first window starts at `start`
    pub fn starting_at(start: Instant, window: Duration) -> Self {
        Self {
            window,
            window_start: start,
            frames: 0,
            total: 0,
        }
    }

    /// Count a frame received at `now`; returns a report when the window closes
    pub fn record(&mut self, now: Instant) -> Option<FpsReport> {
        self.frames += 1;
        self.total += 1;

        let elapsed = now.saturating_duration_since(self.window_start);
        if elapsed < self.window {
            return None;
        }

        let report = FpsReport {
            frames: self.frames,
            elapsed,
            fps: self.frames as f64 / elapsed.as_secs_f64(),
        };
        self.frames = 0;
        self.window_start = now;
        Some(report)
    }

    /// Frames in the open window
    pub fn window_frames(&self) -> u64 {
        self.frames
    }

    /// Frames since creation
    pub fn total(&self) -> u64 {
        self.total
    }
}
