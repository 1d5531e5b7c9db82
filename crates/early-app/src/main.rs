//! Early App - Main Entry Point
//!
//! Usage: `early-app [CONFIG_FILE]`

use anyhow::Context;
use boot_kpi::{GpioSignal, KpiSignal, NoSignal};
use camera_capture::sim::SimulatedBackend;
use camera_capture::CaptureBackend;
use display::{DisplayBackend, HeadlessBackend};
use early_app::{
    init_logging, run_until_interrupted, AppConfig, CameraController, CameraInput, SessionParams,
};
use metrics_exporter_prometheus::PrometheusBuilder;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{info, warn};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config_path = std::env::args_os().nth(1).map(PathBuf::from);
    let config = AppConfig::load(config_path.as_deref()).context("loading configuration")?;
    init_logging(&config.log_level, config.log_json);

    info!("=== Early App v{} ===", env!("CARGO_PKG_VERSION"));

    if let Some(addr) = config.metrics.listen {
        PrometheusBuilder::new()
            .with_http_listener(addr)
            .install()
            .context("installing Prometheus exporter")?;
        info!("Metrics exporter listening on {}", addr);
    }

    let signal: Box<dyn KpiSignal> = match GpioSignal::new(
        config.kpi.gpio_number,
        Duration::from_millis(config.kpi.gpio_sustain_ms),
    ) {
        Some(gpio) => Box::new(gpio),
        None => Box::new(NoSignal),
    };
    let params = config.session_params();
    let device_id = config.camera.device_id;
    let display = HeadlessBackend::new(config.display.dispatch_timeout());

    let ok = match config.camera.input {
        CameraInput::Test => {
            let capture = SimulatedBackend::free_running(config.test_frame_interval());
            let controller = CameraController::new(capture, display).with_signal(signal);
            run(controller, params, device_id).await?
        }
        #[cfg(target_os = "linux")]
        CameraInput::Icam | CameraInput::V4l2 => {
            let capture = camera_capture::v4l2::V4l2Backend;
            let controller = CameraController::new(capture, display).with_signal(signal);
            run(controller, params, device_id).await?
        }
        #[cfg(not(target_os = "linux"))]
        CameraInput::Icam | CameraInput::V4l2 => {
            anyhow::bail!(
                "camera input {:?} needs V4L2, which is Linux only",
                config.camera.input
            )
        }
    };

    if !ok {
        anyhow::bail!("camera session failed");
    }
    info!("Early app exiting");
    Ok(())
}

/// Run one session on a blocking thread; Ctrl-C stops it
async fn run<C, B>(
    controller: CameraController<C, B>,
    params: SessionParams,
    device_id: u32,
) -> anyhow::Result<bool>
where
    C: CaptureBackend + 'static,
    B: DisplayBackend + 'static,
{
    let (interrupt_tx, interrupt_rx) = mpsc::channel(4);
    let listener = tokio::spawn(async move {
        loop {
            if let Err(e) = tokio::signal::ctrl_c().await {
                warn!("Listening for Ctrl-C failed: {}", e);
                break;
            }
            if interrupt_tx.send(()).await.is_err() {
                break;
            }
        }
    });

    let result = run_until_interrupted(Arc::new(controller), params, device_id, interrupt_rx)
        .await
        .context("camera session task");
    listener.abort();
    result
}
