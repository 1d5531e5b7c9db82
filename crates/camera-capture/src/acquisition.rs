//! Acquisition loop
//!
//! Runs on the dedicated acquisition thread. Each iteration waits for the
//! driver, dequeues one buffer, validates it against the pool, feeds the field
//! pairer and publishes completed frames. Buffers go back to the driver as
//! soon as nothing references them: superseded and unpaired fields right
//! away, displayed frames once the next frame replaces them.

use crate::buffer::BufferPool;
use crate::device::{CaptureDevice, Dequeued};
use crate::format::StreamFormat;
use crate::fps::{FrameRateMeter, DEFAULT_WINDOW};
use crate::pairing::{DisplayFrame, FieldPairer, FrameBuffers, PairEvent};
use crate::session::{FramePublisher, SessionContext};
use crate::CaptureError;
use boot_kpi::KpiMark;
use serde::Serialize;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

/// Default wait for the driver before re-checking the run flag
pub const DEFAULT_POLL_TIMEOUT: Duration = Duration::from_secs(5);

/// Acquisition parameters
#[derive(Debug, Clone, Copy)]
pub struct AcquisitionConfig {
    /// Longest single wait for a completed buffer
    pub poll_timeout: Duration,
    /// Frame rate measurement window
    pub fps_window: Duration,
    /// Stop after this many dequeued buffers (0 = unlimited)
    pub frame_budget: u64,
    /// Pair alternating fields into frames
    pub interlaced: bool,
}

impl Default for AcquisitionConfig {
    fn default() -> Self {
        Self {
            poll_timeout: DEFAULT_POLL_TIMEOUT,
            fps_window: DEFAULT_WINDOW,
            frame_budget: 0,
            interlaced: false,
        }
    }
}

impl AcquisitionConfig {
    /// Configuration for a negotiated stream
    pub fn for_stream(format: &StreamFormat, frame_budget: u64) -> Self {
        Self {
            frame_budget,
            interlaced: format.is_interlaced(),
            ..Default::default()
        }
    }

    /// Smallest pool that keeps one buffer with the driver while the
    /// application holds a displayed frame and a pending field
    pub fn min_buffers(&self) -> usize {
        if self.interlaced {
            4
        } else {
            2
        }
    }
}

/// Why the loop returned normally
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub enum ExitReason {
    /// Run flag cleared by someone else
    #[default]
    Stopped,
    /// Frame budget consumed
    BudgetReached,
}

/// Counters for one acquisition run
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct AcquisitionStats {
    pub frames_received: u64,
    pub frames_published: u64,
    pub dropped_fields: u64,
    pub superseded_tops: u64,
    pub requeue_failures: u64,
    pub spurious_wakeups: u64,
    pub poll_timeouts: u64,
    pub last_fps: Option<f64>,
    pub exit: ExitReason,
}

/// Producer half of the pipeline
pub struct AcquisitionLoop<'a> {
    config: AcquisitionConfig,
    ctx: &'a SessionContext,
    pairer: FieldPairer,
    meter: FrameRateMeter,
    displayed: Option<DisplayFrame>,
    next_sequence: u64,
    stats: AcquisitionStats,
}

impl<'a> AcquisitionLoop<'a> {
    pub fn new(config: AcquisitionConfig, ctx: &'a SessionContext) -> Self {
        Self {
            config,
            ctx,
            pairer: FieldPairer::new(config.interlaced),
            meter: FrameRateMeter::new(config.fps_window),
            displayed: None,
            next_sequence: 0,
            stats: AcquisitionStats::default(),
        }
    }

    /// Run until the session stops, the budget is spent or an error occurs
    ///
    /// Any error clears the run flag before returning, so the render side
    /// winds down too.
    pub fn run<D, P>(
        mut self,
        device: &mut D,
        pool: &mut BufferPool,
        publisher: &P,
    ) -> Result<AcquisitionStats, CaptureError>
    where
        D: CaptureDevice + ?Sized,
        P: FramePublisher + ?Sized,
    {
        info!(
            "Acquisition loop started: {} buffers, interlaced={}, budget={}",
            pool.len(),
            self.config.interlaced,
            self.config.frame_budget
        );
        self.meter = FrameRateMeter::new(self.config.fps_window);

        match self.poll_loop(device, pool, publisher) {
            Ok(()) => {
                info!(
                    "Acquisition loop exited ({:?}) after {} buffers, {} frames published",
                    self.stats.exit, self.stats.frames_received, self.stats.frames_published
                );
                Ok(self.stats)
            }
            Err(e) => {
                error!("Acquisition loop failed: {}", e);
                self.ctx.run.stop();
                Err(e)
            }
        }
    }

    fn poll_loop<D, P>(
        &mut self,
        device: &mut D,
        pool: &mut BufferPool,
        publisher: &P,
    ) -> Result<(), CaptureError>
    where
        D: CaptureDevice + ?Sized,
        P: FramePublisher + ?Sized,
    {
        while self.ctx.run.is_running() {
            if !device.wait_ready(self.config.poll_timeout)? {
                self.stats.poll_timeouts += 1;
                debug!("No buffer within {:?}", self.config.poll_timeout);
                continue;
            }

            let Some(dequeued) = device.dequeue()? else {
                self.stats.spurious_wakeups += 1;
                continue;
            };

            self.process(dequeued, device, pool, publisher, Instant::now())?;

            if self.budget_spent() {
                info!("Frame budget of {} reached", self.config.frame_budget);
                self.stats.exit = ExitReason::BudgetReached;
                self.ctx.run.stop();
            }
        }
        Ok(())
    }

    fn budget_spent(&self) -> bool {
        self.config.frame_budget > 0 && self.stats.frames_received >= self.config.frame_budget
    }

    /// Handle one dequeued buffer received at `now`
    pub fn process<D, P>(
        &mut self,
        dequeued: Dequeued,
        device: &mut D,
        pool: &mut BufferPool,
        publisher: &P,
        now: Instant,
    ) -> Result<(), CaptureError>
    where
        D: CaptureDevice + ?Sized,
        P: FramePublisher + ?Sized,
    {
        let index = pool.validate_index(dequeued.index)?;
        pool.take_from_driver(
            index,
            dequeued.field,
            dequeued.bytes_used,
            dequeued.sequence,
        )?;
        self.stats.frames_received += 1;
        metrics::counter!("capture_frames_total").increment(1);

        match self.pairer.push(index, dequeued.field) {
            PairEvent::Single(index) => self.present(
                FrameBuffers::Progressive(index),
                now,
                device,
                pool,
                publisher,
            ),
            PairEvent::Complete { top, bottom } => self.present(
                FrameBuffers::Interlaced { top, bottom },
                now,
                device,
                pool,
                publisher,
            ),
            PairEvent::Pending => {}
            PairEvent::Replaced { superseded } => {
                self.stats.superseded_tops += 1;
                self.requeue(superseded, device, pool);
            }
            PairEvent::Underrun { dropped } => {
                self.stats.dropped_fields += 1;
                metrics::counter!("capture_dropped_fields_total").increment(1);
                self.requeue(dropped, device, pool);
            }
        }

        if let Some(report) = self.meter.record(now) {
            info!(
                "Received {} frames in {:6.3} seconds = {:6.3} FPS",
                report.frames,
                report.elapsed.as_secs_f64(),
                report.fps
            );
            metrics::gauge!("capture_fps").set(report.fps);
            self.stats.last_fps = Some(report.fps);
        }
        Ok(())
    }

    fn present<D, P>(
        &mut self,
        buffers: FrameBuffers,
        captured_at: Instant,
        device: &mut D,
        pool: &mut BufferPool,
        publisher: &P,
    ) where
        D: CaptureDevice + ?Sized,
        P: FramePublisher + ?Sized,
    {
        self.next_sequence += 1;
        let frame = DisplayFrame {
            buffers,
            sequence: self.next_sequence,
            captured_at,
        };
        publisher.publish(frame);
        self.stats.frames_published += 1;

        if self.stats.frames_published == 1 && self.ctx.kpi.record(KpiMark::FirstFrame) {
            info!("First frame published: {:?}", buffers);
        }

        // The renderer has moved on; the previous frame's buffers are free
        if let Some(previous) = self.displayed.replace(frame) {
            for index in previous.buffers.indices() {
                self.requeue(index, device, pool);
            }
        }
    }

    /// Give a buffer back to the driver. Failures are counted, not fatal.
    fn requeue<D>(&mut self, index: usize, device: &mut D, pool: &mut BufferPool)
    where
        D: CaptureDevice + ?Sized,
    {
        if let Err(e) = pool.hand_to_driver(index) {
            warn!("Not requeueing buffer {}: {}", index, e);
            return;
        }
        if let Err(e) = device.enqueue(&pool[index]) {
            pool.reclaim(index);
            self.stats.requeue_failures += 1;
            metrics::counter!("capture_requeue_failures_total").increment(1);
            warn!("Failed to requeue buffer {}: {}", index, e);
        }
    }
}
