use std::time::{Duration, Instant};

use schema::Measurement;

use crate::HarnessError;

/// When to stop repeating a trial: both conditions must hold, checked only
/// at trial boundaries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StablePolicy {
    pub min_iterations: usize,
    pub min_wall_clock: Duration,
}

impl Default for StablePolicy {
    fn default() -> Self {
        Self {
            min_iterations: 6,
            min_wall_clock: Duration::from_secs(30),
        }
    }
}

/// Give the allocator and scheduler a chance to settle before a timed
/// trial. Runs between trials, never inside one.
pub fn quiesce() {
    drop(vec![0u8; 1 << 20]);
    std::thread::yield_now();
}

/// Repeat `trial` under the policy's iteration/wall-clock budget and reduce
/// the series to its minimum elapsed time. The minimum, not the mean: the
/// engine's timing is dominated by occasional outliers, and the smallest
/// observation approximates steady-state cost.
pub fn reduce_to_stable<F>(mut trial: F, policy: &StablePolicy) -> Result<Duration, HarnessError>
where
    F: FnMut() -> Result<Measurement, HarnessError>,
{
    let started = Instant::now();
    let mut completed = 0usize;
    let mut minimum: Option<Duration> = None;
    loop {
        if completed >= policy.min_iterations && started.elapsed() >= policy.min_wall_clock {
            break;
        }
        quiesce();
        let measurement = trial()?;
        completed += 1;
        minimum = Some(match minimum {
            Some(best) => best.min(measurement.elapsed),
            None => measurement.elapsed,
        });
    }
    minimum.ok_or_else(|| HarnessError::Config("stable-time policy admitted zero trials".into()))
}
