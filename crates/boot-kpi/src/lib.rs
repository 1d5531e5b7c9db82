//! Boot KPI Instrumentation
//!
//! Records the coarse lifecycle instants the early app is judged on
//! (stream-on, first frame, render ready) and optionally raises a GPIO line
//! so an external scope can measure them against kernel start.

mod gpio;
mod timestamps;

pub use gpio::{GpioSignal, KpiSignal, NoSignal, DEFAULT_GPIO_ROOT};
pub use timestamps::{boot_time, KpiMark, KpiStamp, KpiTimestamps};

use thiserror::Error;

/// KPI signalling errors
#[derive(Error, Debug)]
pub enum KpiError {
    #[error("Failed to export GPIO {number}: {source}")]
    Export {
        number: u32,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to set GPIO {number} direction: {source}")]
    Direction {
        number: u32,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to write GPIO {number} value: {source}")]
    Value {
        number: u32,
        #[source]
        source: std::io::Error,
    },
}
