//! Declarative breaker configuration.
//!
//! `BreakerConfig` is the serializable counterpart of
//! [`BreakerOptions`](crate::BreakerOptions): a plain data description of a
//! breaker that can come out of a config file and be loaded into a
//! [`Panel`](crate::Panel) under its name.

use crate::backoff::ExponentialBackOff;
use crate::breaker::{Breaker, BreakerOptions};
use crate::logging;
use crate::policy::{ConsecutivePolicy, RatePolicy, ThresholdPolicy, TripPolicy};
use crate::window::{DEFAULT_WINDOW_BUCKETS, DEFAULT_WINDOW_SPAN_MS};
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// Which trip policy a configured breaker uses.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PolicyConfig {
    /// Manual tripping only.
    None,
    /// Trip when the failure count reaches the threshold.
    Threshold { threshold: u64 },
    /// Trip when this many failures occur in a row.
    Consecutive { threshold: u64 },
    /// Trip when the windowed error rate reaches `rate` after at least
    /// `min_samples` events.
    Rate { rate: f64, min_samples: u64 },
}

impl Default for PolicyConfig {
    fn default() -> Self {
        PolicyConfig::None
    }
}

impl PolicyConfig {
    fn build(&self) -> Option<Box<dyn TripPolicy>> {
        match *self {
            PolicyConfig::None => None,
            PolicyConfig::Threshold { threshold } => {
                Some(Box::new(ThresholdPolicy::new(threshold)))
            }
            PolicyConfig::Consecutive { threshold } => {
                Some(Box::new(ConsecutivePolicy::new(threshold)))
            }
            PolicyConfig::Rate { rate, min_samples } => {
                Some(Box::new(RatePolicy::new(rate, min_samples)))
            }
        }
    }
}

/// Data description of a single breaker, keyed by `name` when loaded into a
/// panel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BreakerConfig {
    pub name: String,
    pub policy: PolicyConfig,
    /// Sliding window span in milliseconds. Must divide evenly into
    /// `window_buckets`, otherwise a single bucket is used.
    pub window_span_ms: u64,
    pub window_buckets: u32,
    /// Initial open-state dwell time in milliseconds.
    pub initial_backoff_ms: u64,
    /// Upper bound for the exponential dwell time, in milliseconds.
    pub max_backoff_ms: u64,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        BreakerConfig {
            name: String::new(),
            policy: PolicyConfig::default(),
            window_span_ms: DEFAULT_WINDOW_SPAN_MS,
            window_buckets: DEFAULT_WINDOW_BUCKETS,
            initial_backoff_ms: 500,
            max_backoff_ms: 60_000,
        }
    }
}

impl BreakerConfig {
    pub fn is_valid(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(Error::msg("empty breaker name"));
        }
        if self.window_span_ms == 0 {
            return Err(Error::msg("invalid window_span_ms"));
        }
        if self.initial_backoff_ms == 0 || self.max_backoff_ms < self.initial_backoff_ms {
            return Err(Error::msg("invalid back-off bounds"));
        }
        match self.policy {
            PolicyConfig::Threshold { threshold } | PolicyConfig::Consecutive { threshold } => {
                if threshold == 0 {
                    return Err(Error::msg("trip threshold must be positive"));
                }
            }
            PolicyConfig::Rate { rate, min_samples } => {
                if !(0.0..=1.0).contains(&rate) {
                    return Err(Error::msg("rate threshold must lie in [0.0, 1.0]"));
                }
                if min_samples == 0 {
                    return Err(Error::msg("min_samples must be positive"));
                }
            }
            PolicyConfig::None => {}
        }
        if self.window_buckets != 0 && self.window_span_ms % self.window_buckets as u64 != 0 {
            logging::warn!(
                "window_span_ms must divide evenly into window_buckets, a single bucket will be used: {}",
                self
            );
        }
        Ok(())
    }

    /// Validate and build the described breaker.
    pub fn build(&self) -> Result<Breaker> {
        self.is_valid()?;
        let buckets =
            if self.window_buckets == 0 || self.window_span_ms % self.window_buckets as u64 != 0 {
                1
            } else {
                self.window_buckets
            };
        let backoff = ExponentialBackOff::new(Duration::from_millis(self.initial_backoff_ms))
            .with_max_interval(Duration::from_millis(self.max_backoff_ms));
        Ok(Breaker::with_options(BreakerOptions {
            backoff: Some(Box::new(backoff)),
            trip_policy: self.policy.build(),
            clock: None,
            window_span: Some(Duration::from_millis(self.window_span_ms)),
            window_buckets: Some(buckets),
        }))
    }
}

impl fmt::Display for BreakerConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let fmtted = serde_json::to_string_pretty(self).unwrap();
        write!(f, "{}", fmtted)
    }
}
