//! Progress reporting for the accumulation loop.
//!
//! Purely observational: the accumulator ticks a shared counter under a
//! mutex and periodically hands the completion fraction and a wall-time
//! estimate to an observer. The default observer logs at info level.

use std::sync::Mutex;
use std::time::{Duration, Instant};

/// How many completed samples between reports.
pub const REPORT_PERIOD: usize = 100;

/// Observer for incremental progress of the covariance accumulation.
pub trait ProgressObserver: Sync {
    fn on_start(&self, total_samples: usize) {
        let _ = total_samples;
    }
    fn on_advance(&self, completed: usize, total: usize, remaining: Duration) {
        let _ = (completed, total, remaining);
    }
    fn on_finish(&self) {}
}

#[derive(Default)]
pub struct NoopProgress;

impl ProgressObserver for NoopProgress {}

/// Logs progress with an ETA extrapolated from the elapsed wall time.
#[derive(Default)]
pub struct LogProgress;

impl ProgressObserver for LogProgress {
    fn on_start(&self, total_samples: usize) {
        log::info!("covariance accumulation over {total_samples} phi samples");
    }

    fn on_advance(&self, completed: usize, total: usize, remaining: Duration) {
        let percent = (100.0 * completed as f64 / total as f64).round() as u32;
        let hrs = remaining.as_secs() / 3600;
        let min = (remaining.as_secs_f64() / 60.0 - 60.0 * hrs as f64).round() as u64;
        log::info!(
            "{percent:3} % done, {hrs:02} hrs {min:02} min remaining in covariance accumulation"
        );
    }

    fn on_finish(&self) {
        log::info!("covariance accumulation finished");
    }
}

/// Shared tick counter driving an observer.
pub(crate) struct ProgressMeter<'a> {
    observer: &'a dyn ProgressObserver,
    total: usize,
    started: Instant,
    completed: Mutex<usize>,
}

impl<'a> ProgressMeter<'a> {
    pub(crate) fn new(total: usize, observer: &'a dyn ProgressObserver) -> Self {
        observer.on_start(total);
        Self {
            observer,
            total,
            started: Instant::now(),
            completed: Mutex::new(0),
        }
    }

    /// Records one completed sample; reports every [`REPORT_PERIOD`].
    /// The mutex guarantees no duplicate or skipped report.
    pub(crate) fn tick(&self) {
        let mut completed = self.completed.lock().unwrap();
        *completed += 1;
        if *completed % REPORT_PERIOD == 0 {
            let done = *completed;
            let elapsed = self.started.elapsed();
            let remaining = elapsed.mul_f64((self.total - done) as f64 / done as f64);
            self.observer.on_advance(done, self.total, remaining);
        }
    }

    pub(crate) fn finish(&self) {
        self.observer.on_finish();
    }
}
