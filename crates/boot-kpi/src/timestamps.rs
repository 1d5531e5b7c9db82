//! Write-once KPI timestamps

use serde::Serialize;
use std::fmt;
use std::sync::OnceLock;
use std::time::{Duration, Instant};
use tracing::{debug, info};

/// Named lifecycle instants, in the order they normally occur
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum KpiMark {
    /// Session entered `start`
    AppStart,
    /// Driver accepted stream-on
    StreamOn,
    /// First display frame published by the acquisition loop
    FirstFrame,
    /// Compositor socket appeared
    DisplayReady,
    /// Display and graphics setup finished
    RenderInit,
}

impl KpiMark {
    /// All marks in lifecycle order
    pub const ALL: [KpiMark; 5] = [
        KpiMark::AppStart,
        KpiMark::StreamOn,
        KpiMark::FirstFrame,
        KpiMark::DisplayReady,
        KpiMark::RenderInit,
    ];

    fn slot(self) -> usize {
        self as usize
    }

    /// Stable name used in logs
    pub fn name(self) -> &'static str {
        match self {
            KpiMark::AppStart => "app-start",
            KpiMark::StreamOn => "stream-on",
            KpiMark::FirstFrame => "first-frame",
            KpiMark::DisplayReady => "display-ready",
            KpiMark::RenderInit => "render-init",
        }
    }
}

impl fmt::Display for KpiMark {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// One recorded instant
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct KpiStamp {
    /// Time since the session origin
    pub since_origin: Duration,
    /// Time since kernel boot, when the platform exposes it
    pub since_boot: Option<Duration>,
}

/// Fixed map of write-once timestamps for one streaming session
#[derive(Debug)]
pub struct KpiTimestamps {
    origin: Instant,
    stamps: [OnceLock<KpiStamp>; 5],
}

impl Default for KpiTimestamps {
    fn default() -> Self {
        Self::new()
    }
}

impl KpiTimestamps {
    /// Create an empty map with the origin set to now
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
            stamps: Default::default(),
        }
    }

    /// Record `mark` now. Returns false if it was already recorded.
    pub fn record(&self, mark: KpiMark) -> bool {
        let stamp = KpiStamp {
            since_origin: self.origin.elapsed(),
            since_boot: boot_time(),
        };
        self.record_stamp(mark, stamp)
    }

    /// Record an explicit stamp. Returns false if `mark` was already recorded.
    pub fn record_stamp(&self, mark: KpiMark, stamp: KpiStamp) -> bool {
        let recorded = self.stamps[mark.slot()].set(stamp).is_ok();
        if recorded {
            debug!(
                kpi = mark.name(),
                since_origin_ms = stamp.since_origin.as_secs_f64() * 1000.0,
                "KPI recorded"
            );
        }
        recorded
    }

    /// Look up a recorded mark
    pub fn get(&self, mark: KpiMark) -> Option<KpiStamp> {
        self.stamps[mark.slot()].get().copied()
    }

    /// Whether `mark` has been recorded
    pub fn is_recorded(&self, mark: KpiMark) -> bool {
        self.get(mark).is_some()
    }

    /// Recorded marks in lifecycle order
    pub fn report(&self) -> Vec<(KpiMark, KpiStamp)> {
        KpiMark::ALL
            .iter()
            .filter_map(|&mark| self.get(mark).map(|stamp| (mark, stamp)))
            .collect()
    }

    /// Log every recorded mark at info level
    pub fn log_summary(&self) {
        for (mark, stamp) in self.report() {
            match stamp.since_boot {
                Some(boot) => info!(
                    "KPI {:<13} +{:>9.3} ms (boot {:.3} ms)",
                    mark.name(),
                    stamp.since_origin.as_secs_f64() * 1000.0,
                    boot.as_secs_f64() * 1000.0
                ),
                None => info!(
                    "KPI {:<13} +{:>9.3} ms",
                    mark.name(),
                    stamp.since_origin.as_secs_f64() * 1000.0
                ),
            }
        }
    }
}

/// Time since kernel boot, including suspend
#[cfg(target_os = "linux")]
pub fn boot_time() -> Option<Duration> {
    let mut ts = libc::timespec {
        tv_sec: 0,
        tv_nsec: 0,
    };
    // SAFETY: ts is a valid, writable timespec
    let ret = unsafe { libc::clock_gettime(libc::CLOCK_BOOTTIME, &mut ts) };
    if ret != 0 {
        return None;
    }
    Some(Duration::new(ts.tv_sec as u64, ts.tv_nsec as u32))
}

/// Time since kernel boot, including suspend
#[cfg(not(target_os = "linux"))]
pub fn boot_time() -> Option<Duration> {
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_once() {
        let kpi = KpiTimestamps::new();
        assert!(!kpi.is_recorded(KpiMark::FirstFrame));
        assert!(kpi.record(KpiMark::FirstFrame));
        let first = kpi.get(KpiMark::FirstFrame).unwrap();

        std::thread::sleep(Duration::from_millis(2));
        assert!(!kpi.record(KpiMark::FirstFrame));
        assert_eq!(kpi.get(KpiMark::FirstFrame), Some(first));
    }

    #[test]
    fn test_report_in_lifecycle_order() {
        let kpi = KpiTimestamps::new();
        kpi.record(KpiMark::RenderInit);
        kpi.record(KpiMark::AppStart);
        kpi.record(KpiMark::StreamOn);

        let marks: Vec<_> = kpi.report().into_iter().map(|(m, _)| m).collect();
        assert_eq!(
            marks,
            vec![KpiMark::AppStart, KpiMark::StreamOn, KpiMark::RenderInit]
        );
    }

    #[test]
    fn test_concurrent_record_single_winner() {
        let kpi = std::sync::Arc::new(KpiTimestamps::new());
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let kpi = kpi.clone();
                std::thread::spawn(move || kpi.record(KpiMark::StreamOn))
            })
            .collect();
        let winners = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|&won| won)
            .count();
        assert_eq!(winners, 1);
    }

    #[test]
    fn test_mark_names() {
        assert_eq!(KpiMark::FirstFrame.to_string(), "first-frame");
        assert_eq!(KpiMark::ALL.len(), 5);
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn test_boot_time_available() {
        assert!(boot_time().is_some());
    }
}
