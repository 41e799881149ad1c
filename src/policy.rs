//! Trip policies: pure predicates over a breaker's statistics, consulted
//! after every recorded failure.

/// Snapshot of the counters a policy may consult.
///
/// `failures`, `consec_failures` and `successes` are cumulative since the
/// last reset; `error_rate` is computed over the sliding window, so it is
/// bounded to recent traffic.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BreakerStats {
    pub failures: u64,
    pub consec_failures: u64,
    pub successes: u64,
    pub error_rate: f64,
}

impl BreakerStats {
    pub fn samples(&self) -> u64 {
        self.failures + self.successes
    }
}

/// Decides whether a recorded failure should trip the breaker.
pub trait TripPolicy: Send + Sync {
    fn should_trip(&self, stats: &BreakerStats) -> bool;
}

/// Adapts a closure into a [`TripPolicy`].
pub struct CustomPolicy<F>(F);

impl<F> CustomPolicy<F>
where
    F: Fn(&BreakerStats) -> bool + Send + Sync,
{
    pub fn new(predicate: F) -> Self {
        CustomPolicy(predicate)
    }
}

impl<F> TripPolicy for CustomPolicy<F>
where
    F: Fn(&BreakerStats) -> bool + Send + Sync,
{
    fn should_trip(&self, stats: &BreakerStats) -> bool {
        (self.0)(stats)
    }
}

/// Trips when the cumulative failure count reaches the threshold. The
/// comparison is equality, so the policy fires exactly once as the counter
/// crosses the threshold; it does not matter how long the failures take to
/// accumulate or whether they are consecutive.
#[derive(Debug, Clone, Copy)]
pub struct ThresholdPolicy {
    threshold: u64,
}

impl ThresholdPolicy {
    pub fn new(threshold: u64) -> Self {
        ThresholdPolicy { threshold }
    }
}

impl TripPolicy for ThresholdPolicy {
    fn should_trip(&self, stats: &BreakerStats) -> bool {
        stats.failures == self.threshold
    }
}

/// Trips when the consecutive failure count reaches the threshold.
#[derive(Debug, Clone, Copy)]
pub struct ConsecutivePolicy {
    threshold: u64,
}

impl ConsecutivePolicy {
    pub fn new(threshold: u64) -> Self {
        ConsecutivePolicy { threshold }
    }
}

impl TripPolicy for ConsecutivePolicy {
    fn should_trip(&self, stats: &BreakerStats) -> bool {
        stats.consec_failures == self.threshold
    }
}

/// Trips when the error rate reaches `rate`, once at least `min_samples`
/// events have been observed.
#[derive(Debug, Clone, Copy)]
pub struct RatePolicy {
    rate: f64,
    min_samples: u64,
}

impl RatePolicy {
    pub fn new(rate: f64, min_samples: u64) -> Self {
        RatePolicy { rate, min_samples }
    }
}

impl TripPolicy for RatePolicy {
    fn should_trip(&self, stats: &BreakerStats) -> bool {
        stats.samples() >= self.min_samples && stats.error_rate >= self.rate
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn stats(failures: u64, consec: u64, successes: u64, rate: f64) -> BreakerStats {
        BreakerStats {
            failures,
            consec_failures: consec,
            successes,
            error_rate: rate,
        }
    }

    #[test]
    fn threshold_fires_on_equality_only() {
        let p = ThresholdPolicy::new(2);
        assert!(!p.should_trip(&stats(1, 1, 0, 1.0)));
        assert!(p.should_trip(&stats(2, 2, 0, 1.0)));
        assert!(!p.should_trip(&stats(3, 3, 0, 1.0)));
    }

    #[test]
    fn consecutive_ignores_total_failures() {
        let p = ConsecutivePolicy::new(3);
        assert!(!p.should_trip(&stats(10, 2, 5, 0.5)));
        assert!(p.should_trip(&stats(10, 3, 5, 0.5)));
    }

    #[test]
    fn rate_requires_minimum_samples() {
        let p = RatePolicy::new(0.5, 4);
        assert!(!p.should_trip(&stats(2, 2, 1, 0.66)));
        assert!(p.should_trip(&stats(2, 2, 2, 0.5)));
        assert!(!p.should_trip(&stats(1, 1, 3, 0.25)));
    }

    #[test]
    fn closures_adapt_into_policies() {
        let p = CustomPolicy::new(|stats: &BreakerStats| {
            stats.consec_failures > 0 && stats.error_rate > 0.9
        });
        assert!(p.should_trip(&stats(9, 9, 1, 0.91)));
        assert!(!p.should_trip(&stats(9, 9, 1, 0.89)));
    }
}
