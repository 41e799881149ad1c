//! Back-off policies governing how long a tripped breaker dwells open
//! before admitting a probe.
//!
//! A policy produces a non-decreasing sequence of intervals between resets.
//! Returning `None` is the stop sentinel: the breaker will never transition
//! half-open until it is explicitly reset.

use rand::Rng;
use std::cmp;
use std::time::Duration;

/// Initial interval used by breakers constructed without an explicit
/// back-off policy.
pub const DEFAULT_INITIAL_BACKOFF: Duration = Duration::from_millis(500);

const DEFAULT_MULTIPLIER: f64 = 1.5;
const DEFAULT_MAX_INTERVAL: Duration = Duration::from_secs(60);

/// A resettable source of retry intervals. `next_backoff` yields the next
/// dwell time; `None` means "never retry".
pub trait BackOff: Send {
    fn next_backoff(&mut self) -> Option<Duration>;
    fn reset(&mut self);
}

/// Exponentially growing intervals, optionally jittered, capped at a
/// maximum interval. With `max_elapsed` configured the policy stops once
/// the cumulative handed-out time exceeds it.
#[derive(Debug, Clone)]
pub struct ExponentialBackOff {
    initial_interval: Duration,
    multiplier: f64,
    max_interval: Duration,
    randomization_factor: f64,
    max_elapsed: Option<Duration>,
    current_interval: Duration,
    elapsed: Duration,
}

impl ExponentialBackOff {
    pub fn new(initial_interval: Duration) -> Self {
        ExponentialBackOff {
            initial_interval,
            multiplier: DEFAULT_MULTIPLIER,
            max_interval: DEFAULT_MAX_INTERVAL,
            randomization_factor: 0.0,
            max_elapsed: None,
            current_interval: initial_interval,
            elapsed: Duration::ZERO,
        }
    }

    pub fn with_multiplier(mut self, multiplier: f64) -> Self {
        self.multiplier = multiplier.max(1.0);
        self
    }

    pub fn with_max_interval(mut self, max_interval: Duration) -> Self {
        self.max_interval = max_interval;
        self
    }

    /// Jitter factor in `[0.0, 1.0)`. A non-zero factor trades the strict
    /// monotonicity of the sequence for decorrelated probe times.
    pub fn with_randomization_factor(mut self, factor: f64) -> Self {
        self.randomization_factor = factor.clamp(0.0, 0.999);
        self
    }

    pub fn with_max_elapsed(mut self, max_elapsed: Duration) -> Self {
        self.max_elapsed = Some(max_elapsed);
        self
    }
}

impl Default for ExponentialBackOff {
    fn default() -> Self {
        ExponentialBackOff::new(DEFAULT_INITIAL_BACKOFF)
    }
}

impl BackOff for ExponentialBackOff {
    fn next_backoff(&mut self) -> Option<Duration> {
        if let Some(max) = self.max_elapsed {
            if self.elapsed >= max {
                return None;
            }
        }

        let interval = if self.randomization_factor > 0.0 {
            let base = self.current_interval.as_secs_f64();
            let delta = self.randomization_factor * base;
            let jittered = (base - delta) + rand::thread_rng().gen::<f64>() * (2.0 * delta);
            Duration::from_secs_f64(jittered)
        } else {
            self.current_interval
        };

        self.elapsed += interval;
        self.current_interval = cmp::min(
            Duration::from_secs_f64(self.current_interval.as_secs_f64() * self.multiplier),
            self.max_interval,
        );
        Some(interval)
    }

    fn reset(&mut self) {
        self.current_interval = self.initial_interval;
        self.elapsed = Duration::ZERO;
    }
}

/// The same interval forever.
#[derive(Debug, Clone, Copy)]
pub struct ConstantBackOff(pub Duration);

impl BackOff for ConstantBackOff {
    fn next_backoff(&mut self) -> Option<Duration> {
        Some(self.0)
    }

    fn reset(&mut self) {}
}

/// Never retry.
#[derive(Debug, Clone, Copy, Default)]
pub struct StopBackOff;

impl BackOff for StopBackOff {
    fn next_backoff(&mut self) -> Option<Duration> {
        None
    }

    fn reset(&mut self) {}
}
