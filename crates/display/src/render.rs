//! Render loop
//!
//! Runs on the thread that called `start`. The only suspension point is the
//! backend's dispatch, so the loop notices a cleared run flag within one
//! dispatch timeout.

use crate::backend::DisplayConnection;
use crate::DisplayError;
use camera_capture::RunState;
use serde::Serialize;
use tracing::{debug, error, info, warn};

/// Counters for one render run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RenderStats {
    pub iterations: u64,
    pub events: u64,
    pub transient_errors: u64,
}

/// Consumer half of the pipeline
pub struct RenderLoop<'a> {
    run: &'a RunState,
    stats: RenderStats,
}

impl<'a> RenderLoop<'a> {
    pub fn new(run: &'a RunState) -> Self {
        Self {
            run,
            stats: RenderStats::default(),
        }
    }

    /// Dispatch until the run flag clears or dispatch fails for good
    pub fn run<C>(mut self, connection: &mut C) -> Result<RenderStats, DisplayError>
    where
        C: DisplayConnection + ?Sized,
    {
        info!("Render loop started");
        while self.run.is_running() {
            self.stats.iterations += 1;
            match connection.dispatch() {
                Ok(events) => self.stats.events += events as u64,
                Err(e) if e.is_transient() => {
                    self.stats.transient_errors += 1;
                    metrics::counter!("render_dispatch_errors_total").increment(1);
                    warn!("Display dispatch interrupted: {}", e);
                }
                Err(e) => {
                    error!("Display dispatch failed: {}", e);
                    return Err(e);
                }
            }
        }
        debug!(
            "Render loop ran {} iterations, {} events",
            self.stats.iterations, self.stats.events
        );
        info!("Render loop exited");
        Ok(self.stats)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;

    /// Connection replaying a fixed dispatch script, then stopping the run
    struct Scripted<'a> {
        results: VecDeque<Result<usize, DisplayError>>,
        run: &'a RunState,
        torn_down: bool,
    }

    impl DisplayConnection for Scripted<'_> {
        fn dispatch(&mut self) -> Result<usize, DisplayError> {
            let result = self.results.pop_front().unwrap_or(Ok(0));
            if self.results.is_empty() {
                self.run.stop();
            }
            result
        }

        fn teardown(&mut self) {
            self.torn_down = true;
        }
    }

    fn scripted(run: &RunState, results: Vec<Result<usize, DisplayError>>) -> Scripted<'_> {
        Scripted {
            results: results.into(),
            run,
            torn_down: false,
        }
    }

    #[test]
    fn test_runs_until_stopped() {
        let run = RunState::new();
        let mut connection = scripted(&run, vec![Ok(1), Ok(0), Ok(2)]);

        let stats = RenderLoop::new(&run).run(&mut connection).unwrap();
        assert_eq!(stats.iterations, 3);
        assert_eq!(stats.events, 3);
        assert!(!connection.torn_down);
    }

    #[test]
    fn test_transient_errors_continue() {
        let run = RunState::new();
        let mut connection = scripted(
            &run,
            vec![Ok(1), Err(DisplayError::Interrupted), Ok(1)],
        );

        let stats = RenderLoop::new(&run).run(&mut connection).unwrap();
        assert_eq!(stats.transient_errors, 1);
        assert_eq!(stats.events, 2);
    }

    #[test]
    fn test_fatal_error_exits() {
        let run = RunState::new();
        let mut connection = scripted(
            &run,
            vec![
                Ok(1),
                Err(DisplayError::Dispatch("connection reset".into())),
                Ok(1),
            ],
        );

        let err = RenderLoop::new(&run).run(&mut connection).unwrap_err();
        assert!(matches!(err, DisplayError::Dispatch(_)));
        // One result left unconsumed
        assert_eq!(connection.results.len(), 1);
    }

    #[test]
    fn test_stopped_before_first_dispatch() {
        let run = RunState::new();
        run.stop();
        let mut connection = scripted(&run, vec![Ok(1)]);

        let stats = RenderLoop::new(&run).run(&mut connection).unwrap();
        assert_eq!(stats, RenderStats::default());
    }
}
