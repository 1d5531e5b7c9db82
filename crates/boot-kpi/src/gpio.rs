//! GPIO KPI signal
//!
//! Pulses a sysfs GPIO line at lifecycle instants so boot latency can be
//! measured externally. The line is exported and switched to output on first
//! use if its value file is not there yet.

use crate::{KpiError, KpiMark};
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Default sysfs GPIO directory
pub const DEFAULT_GPIO_ROOT: &str = "/sys/class/gpio";

/// Side channel raised at KPI instants
pub trait KpiSignal: Send + Sync {
    /// Signal that `mark` was reached
    fn pulse(&self, mark: KpiMark);
}

/// Signal that does nothing
#[derive(Debug, Default, Clone, Copy)]
pub struct NoSignal;

impl KpiSignal for NoSignal {
    fn pulse(&self, _mark: KpiMark) {}
}

/// Sysfs GPIO output line
#[derive(Debug, Clone)]
pub struct GpioSignal {
    number: u32,
    sustain: Duration,
    root: PathBuf,
}

impl GpioSignal {
    /// Create a signal on GPIO `number`. Numbers <= 0 disable signalling.
    pub fn new(number: i32, sustain: Duration) -> Option<Self> {
        Self::with_root(number, sustain, DEFAULT_GPIO_ROOT)
    }

    /// Same as `new` with an explicit sysfs root
    pub fn with_root(number: i32, sustain: Duration, root: impl Into<PathBuf>) -> Option<Self> {
        if number <= 0 {
            info!("Not controlling GPIO");
            return None;
        }
        info!(
            "GPIO output to {} (sustain {} us)",
            number,
            sustain.as_micros()
        );
        Some(Self {
            number: number as u32,
            sustain,
            root: root.into(),
        })
    }

    fn export_path(&self) -> PathBuf {
        self.root.join("export")
    }

    fn line_dir(&self) -> PathBuf {
        self.root.join(format!("gpio{}", self.number))
    }

    fn direction_path(&self) -> PathBuf {
        self.line_dir().join("direction")
    }

    fn value_path(&self) -> PathBuf {
        self.line_dir().join("value")
    }

    /// Drive the line high or low
    pub fn output(&self, high: bool) -> Result<(), KpiError> {
        let number = self.number;
        let mut value = match open_write(&self.value_path()) {
            Ok(file) => file,
            Err(_) => {
                debug!("GPIO {} not exported yet", number);
                write_file(&self.export_path(), number.to_string().as_bytes())
                    .map_err(|source| KpiError::Export { number, source })?;
                write_file(&self.direction_path(), b"out")
                    .map_err(|source| KpiError::Direction { number, source })?;
                open_write(&self.value_path()).map_err(|source| KpiError::Value { number, source })?
            }
        };

        let level: &[u8] = if high { b"1" } else { b"0" };
        value
            .write_all(level)
            .map_err(|source| KpiError::Value { number, source })
    }

    /// High, hold for the sustain time, low
    pub fn output_pattern(&self) -> Result<(), KpiError> {
        self.output(true)?;
        std::thread::sleep(self.sustain);
        self.output(false)
    }
}

impl KpiSignal for GpioSignal {
    fn pulse(&self, mark: KpiMark) {
        if let Err(e) = self.output_pattern() {
            warn!("GPIO pulse for {} failed: {}", mark, e);
        }
    }
}

fn open_write(path: &Path) -> std::io::Result<std::fs::File> {
    OpenOptions::new().write(true).open(path)
}

fn write_file(path: &Path, contents: &[u8]) -> std::io::Result<()> {
    open_write(path)?.write_all(contents)
}
