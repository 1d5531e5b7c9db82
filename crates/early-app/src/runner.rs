//! Drive one camera session from async code
//!
//! The session blocks, so it runs on the blocking pool. Interrupts arrive on
//! a channel and are held until the session has registered and can be
//! stopped.

use camera_capture::CaptureBackend;
use crate::controller::{CameraController, SessionParams};
use display::DisplayBackend;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinError;
use tracing::{debug, info};

/// Retry period for an interrupt that arrived before the session was stoppable
const STOP_RETRY: Duration = Duration::from_millis(20);

/// Run a session to completion, stopping it on the first interrupt
///
/// Returns the session's success flag. A closed interrupt channel leaves the
/// session to finish on its own.
pub async fn run_until_interrupted<C, B>(
    controller: Arc<CameraController<C, B>>,
    params: SessionParams,
    device_id: u32,
    mut interrupts: mpsc::Receiver<()>,
) -> Result<bool, JoinError>
where
    C: CaptureBackend + 'static,
    B: DisplayBackend + 'static,
{
    let mut session = tokio::task::spawn_blocking({
        let controller = controller.clone();
        move || controller.start(&params, device_id)
    });

    let mut listening = true;
    let mut pending_stop = false;
    loop {
        tokio::select! {
            result = &mut session => return result,
            interrupt = interrupts.recv(), if listening => match interrupt {
                Some(()) => {
                    info!("Interrupt received, stopping camera session");
                    pending_stop = true;
                }
                None => {
                    debug!("Interrupt channel closed");
                    listening = false;
                }
            },
            _ = tokio::time::sleep(STOP_RETRY), if pending_stop => {}
        }
        if pending_stop && controller.stop() {
            pending_stop = false;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use camera_capture::sim::SimulatedBackend;
    use camera_capture::{MemoryKind, StreamConfig};
    use display::HeadlessBackend;

    fn controller() -> Arc<CameraController<SimulatedBackend, HeadlessBackend>> {
        Arc::new(CameraController::new(
            SimulatedBackend::free_running(Duration::from_millis(1)),
            HeadlessBackend::new(Duration::from_millis(2)),
        ))
    }

    fn budget(frames_count: u64) -> SessionParams {
        SessionParams {
            stream: StreamConfig {
                frames_count,
                memory: MemoryKind::Mapped,
                ..Default::default()
            },
            poll_timeout: Duration::from_millis(20),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_interrupt_before_session_starts() {
        let controller = controller();
        let (tx, rx) = mpsc::channel(1);
        // Delivered before the blocking task has registered its session
        tx.send(()).await.unwrap();

        let ok = tokio::time::timeout(
            Duration::from_secs(5),
            run_until_interrupted(controller.clone(), budget(0), 0, rx),
        )
        .await
        .expect("session ignored the early interrupt")
        .unwrap();

        assert!(ok);
        assert!(!controller.is_active());
        assert!(controller
            .last_stages()
            .contains(&crate::controller::Stage::DeviceClosed));
    }

    #[tokio::test]
    async fn test_closed_channel_lets_session_finish() {
        let controller = controller();
        let (tx, rx) = mpsc::channel(1);
        drop(tx);

        let ok = tokio::time::timeout(
            Duration::from_secs(5),
            run_until_interrupted(controller.clone(), budget(3), 0, rx),
        )
        .await
        .expect("session did not finish")
        .unwrap();

        assert!(ok);
        assert!(!controller.is_active());
    }
}
