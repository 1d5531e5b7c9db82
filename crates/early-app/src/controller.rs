//! Camera session lifecycle
//!
//! One session is: open and configure the device, start streaming, run the
//! acquisition loop on a scoped `acquisition` thread, present on the calling
//! thread, then stop, join and tear down in reverse order. The scoped thread
//! borrows the device and the buffer pool, so neither can be released before
//! the join.

use boot_kpi::{KpiMark, KpiSignal, KpiStamp, NoSignal};
use camera_capture::{
    AcquisitionConfig, AcquisitionLoop, AcquisitionStats, BufferPool, CaptureBackend,
    CaptureDevice, CaptureError, RunState, SessionContext, StreamConfig, StreamFormat,
};
use display::{
    wait_for_marker, DisplayBackend, DisplayConnection, DisplayError, DisplaySetup, RenderLoop,
    RenderStats, DEFAULT_POLL_INTERVAL,
};
use serde::Serialize;
use std::path::PathBuf;
use std::sync::{Mutex, MutexGuard};
use std::thread;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, error, info, warn};

/// Lifecycle milestones, in the order a clean session reaches them
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Stage {
    Opened,
    FormatNegotiated,
    BuffersRequested,
    BuffersAllocated,
    BuffersQueued,
    StreamOn,
    AcquisitionSpawned,
    DisplayReady,
    RenderInit,
    RenderExited,
    Joined,
    StreamOff,
    PoolReleased,
    DeviceClosed,
    DisplayTornDown,
}

/// Session error types
#[derive(Error, Debug)]
pub enum SessionError {
    #[error("A camera session is already running")]
    Busy,

    #[error("Setup failed at {stage:?}: {source}")]
    Setup {
        stage: Stage,
        #[source]
        source: CaptureError,
    },

    #[error("Failed to spawn acquisition thread: {0}")]
    Spawn(#[source] std::io::Error),

    #[error("Display error: {0}")]
    Display(#[source] DisplayError),

    #[error("Render loop failed: {0}")]
    Render(#[source] DisplayError),

    #[error("Acquisition failed: {0}")]
    Acquisition(#[source] CaptureError),

    #[error("Acquisition thread panicked")]
    AcquisitionPanicked,

    #[error("Teardown failed: {0}")]
    Teardown(#[source] CaptureError),
}

fn setup_error(stage: Stage) -> impl FnOnce(CaptureError) -> SessionError {
    move |source| SessionError::Setup { stage, source }
}

/// Display side of the session parameters
#[derive(Debug, Clone)]
pub struct DisplayParams {
    pub width: u32,
    pub height: u32,
    pub fullscreen: bool,
    /// Compositor marker to wait for before display setup
    pub ready_marker: Option<PathBuf>,
    pub ready_timeout: Duration,
}

impl Default for DisplayParams {
    fn default() -> Self {
        Self {
            width: 0,
            height: 0,
            fullscreen: true,
            ready_marker: None,
            ready_timeout: Duration::from_secs(5),
        }
    }
}

/// Everything `start` needs besides the device id
#[derive(Debug, Clone)]
pub struct SessionParams {
    pub stream: StreamConfig,
    pub display: DisplayParams,
    /// Longest single wait for a captured buffer
    pub poll_timeout: Duration,
}

impl Default for SessionParams {
    fn default() -> Self {
        Self {
            stream: StreamConfig::default(),
            display: DisplayParams::default(),
            poll_timeout: AcquisitionConfig::default().poll_timeout,
        }
    }
}

/// Outcome of a completed session
#[derive(Debug, Clone, Serialize)]
pub struct SessionReport {
    pub format: StreamFormat,
    pub acquisition: AcquisitionStats,
    /// Absent when the session stopped before the display came up
    pub render: Option<RenderStats>,
    pub stages: Vec<Stage>,
    pub kpi: Vec<(KpiMark, KpiStamp)>,
}

struct Streamed {
    format: StreamFormat,
    acquisition: AcquisitionStats,
    render: Option<RenderStats>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Registration of the running session; cleared on drop, unwinding included
struct ActiveSession<'a> {
    current: &'a Mutex<Option<RunState>>,
}

impl<'a> ActiveSession<'a> {
    fn register(
        current: &'a Mutex<Option<RunState>>,
        run: &RunState,
    ) -> Result<Self, SessionError> {
        let mut slot = lock(current);
        if slot.is_some() {
            return Err(SessionError::Busy);
        }
        *slot = Some(run.clone());
        Ok(Self { current })
    }
}

impl Drop for ActiveSession<'_> {
    fn drop(&mut self) {
        *lock(self.current) = None;
    }
}

/// Drives camera sessions, one at a time
pub struct CameraController<C: CaptureBackend, B: DisplayBackend> {
    capture: C,
    display: B,
    signal: Box<dyn KpiSignal>,
    current: Mutex<Option<RunState>>,
    last_stages: Mutex<Vec<Stage>>,
}

impl<C: CaptureBackend, B: DisplayBackend> CameraController<C, B> {
    pub fn new(capture: C, display: B) -> Self {
        Self {
            capture,
            display,
            signal: Box::new(NoSignal),
            current: Mutex::new(None),
            last_stages: Mutex::new(Vec::new()),
        }
    }

    /// Signal raised when rendering starts
    pub fn with_signal(mut self, signal: Box<dyn KpiSignal>) -> Self {
        self.signal = signal;
        self
    }

    /// Whether a session is running
    pub fn is_active(&self) -> bool {
        lock(&self.current).is_some()
    }

    /// Stages reached by the most recent session
    pub fn last_stages(&self) -> Vec<Stage> {
        lock(&self.last_stages).clone()
    }

    /// Ask the running session to wind down; returns immediately
    ///
    /// True if this call stopped a running session.
    pub fn stop(&self) -> bool {
        match lock(&self.current).as_ref() {
            Some(run) => {
                let stopped = run.stop();
                if stopped {
                    info!("Camera session stop requested");
                }
                stopped
            }
            None => {
                debug!("Stop requested with no active session");
                false
            }
        }
    }

    /// Run a session to completion. Returns false on any fatal error.
    pub fn start(&self, params: &SessionParams, device_id: u32) -> bool {
        match self.run_session(params, device_id) {
            Ok(report) => {
                info!(
                    "Camera session finished: {} buffers received, {} frames published",
                    report.acquisition.frames_received, report.acquisition.frames_published
                );
                true
            }
            Err(e) => {
                error!("Camera session failed: {}", e);
                false
            }
        }
    }

    /// Run a session to completion, blocking the calling thread
    pub fn run_session(
        &self,
        params: &SessionParams,
        device_id: u32,
    ) -> Result<SessionReport, SessionError> {
        let ctx = SessionContext::new();
        let _active = ActiveSession::register(&self.current, &ctx.run)?;
        metrics::counter!("camera_sessions_total").increment(1);

        let mut stages = Vec::new();
        let result = self.drive(&ctx, params, device_id, &mut stages);

        ctx.kpi.log_summary();
        *lock(&self.last_stages) = stages.clone();

        let streamed = result?;
        Ok(SessionReport {
            format: streamed.format,
            acquisition: streamed.acquisition,
            render: streamed.render,
            stages,
            kpi: ctx.kpi.report(),
        })
    }

    fn drive(
        &self,
        ctx: &SessionContext,
        params: &SessionParams,
        device_id: u32,
        stages: &mut Vec<Stage>,
    ) -> Result<Streamed, SessionError> {
        ctx.kpi.record(KpiMark::AppStart);
        let path = self.capture.device_path(device_id);
        info!(
            "Starting camera session on {} ({} backend)",
            path.display(),
            self.capture.name()
        );

        let mut device = self.capture.open(&path).map_err(setup_error(Stage::Opened))?;
        stages.push(Stage::Opened);

        let mut connection = None;
        let result = self.stream(ctx, params, &mut device, stages, &mut connection);

        if let Err(e) = device.close() {
            warn!("Closing {}: {}", path.display(), e);
        }
        stages.push(Stage::DeviceClosed);

        if let Some(mut connection) = connection {
            connection.teardown();
            stages.push(Stage::DisplayTornDown);
        }
        result
    }

    /// Configure and run the stream. The pool never outlives this call.
    fn stream(
        &self,
        ctx: &SessionContext,
        params: &SessionParams,
        device: &mut C::Device,
        stages: &mut Vec<Stage>,
        connection: &mut Option<B::Connection>,
    ) -> Result<Streamed, SessionError> {
        let request = params.stream.format_request();
        let format = device
            .negotiate_format(&request)
            .map_err(setup_error(Stage::FormatNegotiated))?;
        stages.push(Stage::FormatNegotiated);

        let acquisition = AcquisitionConfig {
            poll_timeout: params.poll_timeout,
            ..AcquisitionConfig::for_stream(&format, params.stream.frames_count)
        };
        let count = params.stream.buffer_count;
        if count < acquisition.min_buffers() {
            return Err(SessionError::Setup {
                stage: Stage::BuffersRequested,
                source: CaptureError::Buffer(format!(
                    "{} buffers configured, this stream needs at least {}",
                    count,
                    acquisition.min_buffers()
                )),
            });
        }
        device
            .request_buffers(count, params.stream.memory)
            .map_err(setup_error(Stage::BuffersRequested))?;
        stages.push(Stage::BuffersRequested);

        let mut pool = match BufferPool::allocate(count, format.size_image, params.stream.memory) {
            Ok(pool) => pool,
            Err(e) => {
                // The driver may have set up its side already
                if let Err(e) = device.stream_off() {
                    warn!("Stream off after failed allocation: {}", e);
                }
                return Err(SessionError::Setup {
                    stage: Stage::BuffersAllocated,
                    source: e,
                });
            }
        };
        stages.push(Stage::BuffersAllocated);

        let result = self.run_streaming(
            ctx,
            params,
            device,
            &mut pool,
            format,
            acquisition,
            stages,
            connection,
        );

        let stopped = match device.stream_off() {
            Ok(()) => true,
            Err(e) => {
                error!("Stream off failed: {}", e);
                false
            }
        };
        stages.push(Stage::StreamOff);
        if stopped {
            pool.reclaim_all();
        }
        let released = pool.release();
        stages.push(Stage::PoolReleased);

        let (acquisition, render) = result?;
        released.map_err(SessionError::Teardown)?;
        Ok(Streamed {
            format,
            acquisition,
            render,
        })
    }

    #[allow(clippy::too_many_arguments)]
    fn run_streaming(
        &self,
        ctx: &SessionContext,
        params: &SessionParams,
        device: &mut C::Device,
        pool: &mut BufferPool,
        format: StreamFormat,
        acquisition: AcquisitionConfig,
        stages: &mut Vec<Stage>,
        connection: &mut Option<B::Connection>,
    ) -> Result<(AcquisitionStats, Option<RenderStats>), SessionError> {
        for index in 0..pool.len() {
            pool.hand_to_driver(index)
                .map_err(setup_error(Stage::BuffersQueued))?;
            if let Err(e) = device.enqueue(&pool[index]) {
                pool.reclaim(index);
                return Err(setup_error(Stage::BuffersQueued)(e));
            }
        }
        stages.push(Stage::BuffersQueued);

        device.stream_on().map_err(setup_error(Stage::StreamOn))?;
        ctx.kpi.record(KpiMark::StreamOn);
        stages.push(Stage::StreamOn);

        let (writer, reader) = frame_slot::slot();
        let exports = pool.exports();

        thread::scope(|scope| {
            // Clears the run flag on every way out of the scope, so the
            // acquisition thread is never joined while still told to run
            let stop_on_exit = ctx.run.stop_on_drop();
            let acquisition_thread = thread::Builder::new()
                .name("acquisition".to_string())
                .spawn_scoped(scope, move || {
                    AcquisitionLoop::new(acquisition, ctx).run(device, pool, &writer)
                })
                .map_err(SessionError::Spawn)?;
            stages.push(Stage::AcquisitionSpawned);

            let setup = DisplaySetup {
                width: params.display.width,
                height: params.display.height,
                fullscreen: params.display.fullscreen,
                format,
                buffers: exports,
                frames: reader,
            };
            let presented = self.present(ctx, &params.display, setup, stages, connection);

            drop(stop_on_exit);
            let joined = acquisition_thread.join();
            stages.push(Stage::Joined);

            let acquired = match joined {
                Ok(result) => result,
                Err(_) => return Err(SessionError::AcquisitionPanicked),
            };
            match (acquired, presented) {
                (Ok(stats), Ok(render)) => Ok((stats, render)),
                (Err(e), presented) => {
                    if let Err(display_err) = presented {
                        warn!("Display also failed: {}", display_err);
                    }
                    Err(SessionError::Acquisition(e))
                }
                (Ok(_), Err(e)) => Err(e),
            }
        })
    }

    /// Display half of the session, on the calling thread
    fn present(
        &self,
        ctx: &SessionContext,
        params: &DisplayParams,
        setup: DisplaySetup,
        stages: &mut Vec<Stage>,
        connection: &mut Option<B::Connection>,
    ) -> Result<Option<RenderStats>, SessionError> {
        if let Some(marker) = &params.ready_marker {
            let ready = wait_for_marker(
                marker,
                params.ready_timeout,
                DEFAULT_POLL_INTERVAL,
                &ctx.run,
            );
            match ready {
                Ok(_) => {}
                Err(DisplayError::Cancelled) => {
                    info!("Session stopped before the display became ready");
                    return Ok(None);
                }
                Err(e) => return Err(SessionError::Display(e)),
            }
        }
        ctx.kpi.record(KpiMark::DisplayReady);
        stages.push(Stage::DisplayReady);

        let connection = connection.insert(
            self.display
                .setup(setup)
                .map_err(SessionError::Display)?,
        );
        ctx.kpi.record(KpiMark::RenderInit);
        self.signal.pulse(KpiMark::RenderInit);
        stages.push(Stage::RenderInit);
        info!("Rendering on {} display", self.display.name());

        let rendered = RenderLoop::new(&ctx.run).run(connection);
        stages.push(Stage::RenderExited);
        rendered.map(Some).map_err(SessionError::Render)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use camera_capture::sim::{DeviceCall, SimEvent, SimFailure, SimulatedBackend};
    use camera_capture::{Dequeued, ExitReason, FieldTag, FrameBuffers, MemoryKind};
    use display::HeadlessBackend;
    use std::sync::Arc;
    use std::time::Instant;

    fn params(stream: StreamConfig) -> SessionParams {
        SessionParams {
            stream: StreamConfig {
                memory: MemoryKind::Mapped,
                ..stream
            },
            poll_timeout: Duration::from_millis(20),
            ..Default::default()
        }
    }

    fn budget(frames_count: u64) -> SessionParams {
        params(StreamConfig {
            frames_count,
            ..Default::default()
        })
    }

    fn headless() -> HeadlessBackend {
        HeadlessBackend::new(Duration::from_millis(2))
    }

    fn position(stages: &[Stage], stage: Stage) -> usize {
        stages
            .iter()
            .position(|s| *s == stage)
            .unwrap_or_else(|| panic!("{:?} missing from {:?}", stage, stages))
    }

    fn assert_before(stages: &[Stage], first: Stage, then: Stage) {
        assert!(
            position(stages, first) < position(stages, then),
            "{:?} not before {:?} in {:?}",
            first,
            then,
            stages
        );
    }

    #[derive(Default, Clone)]
    struct RecordingSignal(Arc<Mutex<Vec<KpiMark>>>);

    impl KpiSignal for RecordingSignal {
        fn pulse(&self, mark: KpiMark) {
            self.0.lock().unwrap().push(mark);
        }
    }

    #[test]
    fn test_session_runs_to_budget() {
        let capture = SimulatedBackend::free_running(Duration::from_millis(1));
        let journal = capture.journal();
        let display = headless();
        let signal = RecordingSignal::default();
        let controller =
            CameraController::new(capture, display.clone()).with_signal(Box::new(signal.clone()));

        let report = controller.run_session(&budget(10), 0).unwrap();
        assert_eq!(report.acquisition.exit, ExitReason::BudgetReached);
        assert_eq!(report.acquisition.frames_received, 10);
        assert_eq!(report.format.width, 720);
        assert!(report.render.is_some());
        assert!(!controller.is_active());

        let stages = &report.stages;
        assert_eq!(stages.first(), Some(&Stage::Opened));
        assert_eq!(stages.last(), Some(&Stage::DisplayTornDown));
        assert_before(stages, Stage::StreamOn, Stage::AcquisitionSpawned);
        assert_before(stages, Stage::RenderExited, Stage::Joined);
        assert_before(stages, Stage::Joined, Stage::StreamOff);
        assert_before(stages, Stage::StreamOff, Stage::PoolReleased);
        assert_before(stages, Stage::PoolReleased, Stage::DeviceClosed);
        assert_eq!(controller.last_stages(), report.stages);

        let marks: Vec<KpiMark> = report.kpi.iter().map(|(mark, _)| *mark).collect();
        assert_eq!(marks, KpiMark::ALL.to_vec());
        assert_eq!(*signal.0.lock().unwrap(), vec![KpiMark::RenderInit]);

        let calls = journal.calls();
        let stream_off = calls.iter().position(|c| *c == DeviceCall::StreamOff).unwrap();
        assert_eq!(calls.last(), Some(&DeviceCall::Close));
        assert!(stream_off < calls.len() - 1);
        assert!(display.stats().torn_down);
    }

    #[test]
    fn test_interlaced_session_publishes_pairs() {
        let capture = SimulatedBackend::free_running(Duration::from_millis(1));
        let controller = CameraController::new(capture, headless());
        let params = params(StreamConfig {
            frames_count: 20,
            ..StreamConfig::rear_view()
        });

        let report = controller.run_session(&params, 0).unwrap();
        assert!(report.format.is_interlaced());
        assert_eq!(report.acquisition.frames_received, 20);
        assert_eq!(report.acquisition.frames_published, 10);
        assert_eq!(report.acquisition.dropped_fields, 0);
    }

    #[test]
    fn test_stop_without_session_is_noop() {
        let controller = CameraController::new(SimulatedBackend::default(), headless());
        assert!(!controller.stop());
        assert!(!controller.stop());
        assert!(!controller.is_active());

        // A later session is unaffected
        let controller = CameraController::new(
            SimulatedBackend::free_running(Duration::from_millis(1)),
            headless(),
        );
        assert!(!controller.stop());
        assert!(controller.start(&budget(3), 0));
    }

    #[test]
    fn test_stop_twice_during_session() {
        let display = headless();
        let controller = Arc::new(CameraController::new(
            SimulatedBackend::free_running(Duration::from_millis(1)),
            display.clone(),
        ));

        let session = {
            let controller = controller.clone();
            thread::spawn(move || controller.run_session(&budget(0), 0))
        };

        let deadline = Instant::now() + Duration::from_secs(5);
        while display.stats().presented < 3 && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(1));
        }
        assert!(controller.stop());
        assert!(!controller.stop());

        let report = session.join().unwrap().unwrap();
        assert_eq!(report.acquisition.exit, ExitReason::Stopped);
        assert!(report.acquisition.frames_received >= 3);
        assert!(!controller.is_active());
        assert!(!controller.stop());
    }

    #[test]
    fn test_protocol_violation_tears_down() {
        let capture = SimulatedBackend::scripted([
            SimEvent::Field(FieldTag::None),
            SimEvent::Raw(Dequeued::new(9, FieldTag::None)),
        ]);
        let journal = capture.journal();
        let controller = CameraController::new(capture, headless());

        let err = controller.run_session(&budget(0), 0).unwrap_err();
        assert!(matches!(
            err,
            SessionError::Acquisition(CaptureError::IndexOutOfRange { index: 9, count: 4 })
        ));

        let calls = journal.calls();
        assert!(calls.contains(&DeviceCall::StreamOff));
        assert!(calls.contains(&DeviceCall::Close));
    }

    #[test]
    fn test_protocol_violation_joins_before_release() {
        let capture =
            SimulatedBackend::scripted([SimEvent::Raw(Dequeued::new(-1, FieldTag::None))]);
        let controller = CameraController::new(capture, headless());

        assert!(!controller.start(&budget(0), 0));
        let stages = controller.last_stages();
        assert_before(&stages, Stage::Joined, Stage::PoolReleased);
        assert_before(&stages, Stage::PoolReleased, Stage::DeviceClosed);
    }

    #[test]
    fn test_setup_failure_spawns_nothing() {
        let capture = SimulatedBackend::default().failing(SimFailure::StreamOn);
        let journal = capture.journal();
        let controller = CameraController::new(capture, headless());

        let err = controller.run_session(&budget(0), 0).unwrap_err();
        assert!(matches!(
            err,
            SessionError::Setup { stage: Stage::StreamOn, .. }
        ));

        let stages = controller.last_stages();
        assert!(!stages.contains(&Stage::AcquisitionSpawned));
        assert_before(&stages, Stage::StreamOff, Stage::PoolReleased);
        assert_eq!(stages.last(), Some(&Stage::DeviceClosed));
        assert_eq!(journal.calls().last(), Some(&DeviceCall::Close));
    }

    #[test]
    fn test_open_failure() {
        let capture = SimulatedBackend::default().failing(SimFailure::Open);
        let controller = CameraController::new(capture, headless());

        let err = controller.run_session(&budget(0), 3).unwrap_err();
        assert!(matches!(
            err,
            SessionError::Setup { stage: Stage::Opened, .. }
        ));
        assert!(controller.last_stages().is_empty());
        assert!(!controller.is_active());
    }

    #[test]
    fn test_interlaced_needs_enough_buffers() {
        let controller = CameraController::new(SimulatedBackend::default(), headless());
        let params = params(StreamConfig {
            buffer_count: 2,
            ..StreamConfig::rear_view()
        });

        let err = controller.run_session(&params, 0).unwrap_err();
        assert!(matches!(
            err,
            SessionError::Setup {
                stage: Stage::BuffersRequested,
                source: CaptureError::Buffer(_)
            }
        ));
        assert_eq!(
            controller.last_stages(),
            vec![Stage::Opened, Stage::FormatNegotiated, Stage::DeviceClosed]
        );
    }

    #[test]
    fn test_display_setup_failure() {
        let controller = CameraController::new(
            SimulatedBackend::free_running(Duration::from_millis(1)),
            headless().failing_setup(),
        );

        let err = controller.run_session(&budget(0), 0).unwrap_err();
        assert!(matches!(
            err,
            SessionError::Display(DisplayError::Connect(_))
        ));

        let stages = controller.last_stages();
        assert_before(&stages, Stage::Joined, Stage::PoolReleased);
        assert!(!stages.contains(&Stage::RenderInit));
        assert!(!stages.contains(&Stage::DisplayTornDown));
    }

    /// Display whose setup crashes
    struct CrashingDisplay;

    impl DisplayBackend for CrashingDisplay {
        type Connection = display::HeadlessConnection;

        fn name(&self) -> &'static str {
            "crashing"
        }

        fn setup(&self, _setup: DisplaySetup) -> Result<Self::Connection, DisplayError> {
            panic!("display driver crashed during setup");
        }
    }

    #[test]
    fn test_display_panic_stops_acquisition() {
        let controller = Arc::new(CameraController::new(
            SimulatedBackend::free_running(Duration::from_millis(1)),
            CrashingDisplay,
        ));
        let session = {
            let controller = controller.clone();
            thread::spawn(move || controller.run_session(&budget(0), 0))
        };

        let deadline = Instant::now() + Duration::from_secs(5);
        while !session.is_finished() && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(5));
        }
        assert!(
            session.is_finished(),
            "session hung after the display panicked"
        );
        assert!(session.join().is_err());
        assert!(!controller.is_active());
    }

    #[test]
    fn test_display_never_ready() {
        let dir = tempfile::tempdir().unwrap();
        let controller = CameraController::new(
            SimulatedBackend::free_running(Duration::from_millis(1)),
            headless(),
        );
        let mut params = budget(0);
        params.display.ready_marker = Some(dir.path().join("wayland-0"));
        params.display.ready_timeout = Duration::from_millis(20);

        let err = controller.run_session(&params, 0).unwrap_err();
        assert!(matches!(
            err,
            SessionError::Display(DisplayError::ReadyTimeout { .. })
        ));
        assert!(controller.last_stages().contains(&Stage::Joined));
    }

    #[test]
    fn test_waits_for_display_marker() {
        let dir = tempfile::tempdir().unwrap();
        let marker = dir.path().join("wayland-0");
        std::fs::write(&marker, b"").unwrap();

        let display = headless();
        let controller = CameraController::new(
            SimulatedBackend::free_running(Duration::from_millis(1)),
            display.clone(),
        );
        let mut params = budget(5);
        params.display.ready_marker = Some(marker);

        let report = controller.run_session(&params, 0).unwrap();
        assert!(report.stages.contains(&Stage::DisplayReady));
        assert_eq!(report.acquisition.frames_received, 5);
        assert!(!matches!(
            display.stats().last_buffers,
            Some(FrameBuffers::Interlaced { .. })
        ));
    }
}
