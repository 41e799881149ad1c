//! Rolling bucketed counters of failures and successes.
//!
//! The window is a fixed ring of buckets, each covering `span / buckets` of
//! time. Rotation is lazy: an access locates the bucket for "now", and a
//! bucket whose start stamp has fallen out of the window is reset before it
//! is reused. Aggregate reads skip deprecated buckets, so a long quiet
//! period empties the window without a background task.

use crate::clock::Clock;
use crate::logging;
use crate::{Error, Result};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

/// Default time covered by the whole window, 10 seconds.
pub const DEFAULT_WINDOW_SPAN_MS: u64 = 10_000;
/// Default number of buckets the window is divided into.
pub const DEFAULT_WINDOW_BUCKETS: u32 = 10;

// Start stamp of a bucket that has never been used.
const UNUSED: u64 = 0;

#[derive(Debug, Default)]
struct Bucket {
    failure: AtomicU64,
    success: AtomicU64,
}

impl Bucket {
    fn reset(&self) {
        self.failure.store(0, Ordering::SeqCst);
        self.success.store(0, Ordering::SeqCst);
    }
}

/// A bucket plus the start of the time slice it currently covers.
#[derive(Debug, Default)]
struct BucketWrap {
    start_stamp: AtomicU64,
    bucket: Bucket,
}

impl BucketWrap {
    fn start_stamp(&self) -> u64 {
        self.start_stamp.load(Ordering::SeqCst)
    }

    fn reset_start_stamp(&self, start_stamp: u64) {
        self.start_stamp.store(start_stamp, Ordering::SeqCst);
    }

    fn is_deprecated(&self, now: u64, interval_ms: u64) -> bool {
        let start = self.start_stamp();
        now > start && now - start > interval_ms
    }
}

/// Ring of failure/success buckets over an injected clock.
#[derive(Debug)]
pub struct Window {
    bucket_len_ms: u64,
    sample_count: u32,
    interval_ms: u64,
    clock: Arc<dyn Clock>,
    array: Vec<BucketWrap>,
    // Taken only when a deprecated bucket must be reset before reuse.
    update_locks: Vec<Mutex<()>>,
}

impl Window {
    pub fn new(clock: Arc<dyn Clock>, span_ms: u64, buckets: u32) -> Result<Window> {
        if buckets == 0 || span_ms % buckets as u64 != 0 {
            return Err(Error::msg(
                "invalid window span or bucket count, span must divide evenly into buckets",
            ));
        }
        let mut array = Vec::with_capacity(buckets as usize);
        let mut update_locks = Vec::with_capacity(buckets as usize);
        for _ in 0..buckets {
            array.push(BucketWrap::default());
            update_locks.push(Mutex::new(()));
        }
        Ok(Window {
            bucket_len_ms: span_ms / buckets as u64,
            sample_count: buckets,
            interval_ms: span_ms,
            clock,
            array,
            update_locks,
        })
    }

    pub fn bucket_len_ms(&self) -> u64 {
        self.bucket_len_ms
    }

    pub fn span_ms(&self) -> u64 {
        self.interval_ms
    }

    /// Record a failure in the current bucket.
    pub fn fail(&self) {
        let now = self.clock.now_millis();
        match self.bucket_of_time(now) {
            Ok(wrap) => {
                wrap.bucket.failure.fetch_add(1, Ordering::SeqCst);
            }
            Err(err) => logging::error!("failed to locate window bucket for a failure: {}", err),
        }
    }

    /// Record a success in the current bucket.
    pub fn success(&self) {
        let now = self.clock.now_millis();
        match self.bucket_of_time(now) {
            Ok(wrap) => {
                wrap.bucket.success.fetch_add(1, Ordering::SeqCst);
            }
            Err(err) => logging::error!("failed to locate window bucket for a success: {}", err),
        }
    }

    /// Total failures across all live buckets.
    pub fn failures(&self) -> u64 {
        self.fold(|b| b.failure.load(Ordering::SeqCst))
    }

    /// Total successes across all live buckets.
    pub fn successes(&self) -> u64 {
        self.fold(|b| b.success.load(Ordering::SeqCst))
    }

    /// Error rate over the window, 0.0 when the window holds no samples.
    pub fn error_rate(&self) -> f64 {
        let now = self.clock.now_millis();
        let mut failures = 0u64;
        let mut total = 0u64;
        for wrap in &self.array {
            if wrap.is_deprecated(now, self.interval_ms) {
                continue;
            }
            let f = wrap.bucket.failure.load(Ordering::SeqCst);
            failures += f;
            total += f + wrap.bucket.success.load(Ordering::SeqCst);
        }
        if total == 0 {
            return 0.0;
        }
        failures as f64 / total as f64
    }

    /// Zero every bucket.
    pub fn reset(&self) {
        for wrap in &self.array {
            wrap.bucket.reset();
        }
    }

    fn fold<F>(&self, read: F) -> u64
    where
        F: Fn(&Bucket) -> u64,
    {
        let now = self.clock.now_millis();
        self.array
            .iter()
            .filter(|wrap| !wrap.is_deprecated(now, self.interval_ms))
            .map(|wrap| read(&wrap.bucket))
            .sum()
    }

    /// Locate the bucket covering `now`, rotating a stale bucket into place
    /// when needed. The per-bucket lock bounds the reset race; in the common
    /// up-to-date case no lock is taken.
    fn bucket_of_time(&self, now: u64) -> Result<&BucketWrap> {
        let idx = (now / self.bucket_len_ms) as usize % self.sample_count as usize;
        let target_start = now - now % self.bucket_len_ms;
        loop {
            let wrap = &self.array[idx];
            let start = wrap.start_stamp();
            if start == UNUSED {
                wrap.reset_start_stamp(target_start);
                return Ok(wrap);
            } else if start == target_start {
                return Ok(wrap);
            } else if target_start > start {
                if let Ok(_guard) = self.update_locks[idx].try_lock() {
                    wrap.bucket.reset();
                    wrap.reset_start_stamp(target_start);
                    return Ok(wrap);
                }
                // another thread is resetting this bucket
                std::thread::yield_now();
            } else {
                return Err(Error::msg("timestamp is behind the current bucket"));
            }
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::clock::MockClock;
    use std::thread;

    fn window_with_clock(span_ms: u64, buckets: u32) -> (Window, MockClock) {
        let clock = MockClock::new();
        let w = Window::new(Arc::new(clock.clone()), span_ms, buckets).unwrap();
        (w, clock)
    }

    #[test]
    fn rejects_uneven_span() {
        let clock: Arc<dyn Clock> = Arc::new(MockClock::new());
        assert!(Window::new(Arc::clone(&clock), 1000, 3).is_err());
        assert!(Window::new(Arc::clone(&clock), 1000, 0).is_err());
        assert!(Window::new(clock, 1000, 10).is_ok());
    }

    #[test]
    fn counts_and_error_rate() {
        let (w, _clock) = window_with_clock(10_000, 10);
        assert_eq!(w.error_rate(), 0.0);

        w.fail();
        w.fail();
        w.success();
        w.success();
        assert_eq!(w.failures(), 2);
        assert_eq!(w.successes(), 2);
        assert_eq!(w.error_rate(), 0.5);

        w.reset();
        assert_eq!(w.failures(), 0);
        assert_eq!(w.successes(), 0);
        assert_eq!(w.error_rate(), 0.0);
    }

    #[test]
    fn counts_spread_across_buckets() {
        let (w, clock) = window_with_clock(10_000, 10);
        for _ in 0..5 {
            w.fail();
            w.success();
            clock.advance(1000);
        }
        assert_eq!(w.failures(), 5);
        assert_eq!(w.successes(), 5);
    }

    #[test]
    fn old_buckets_fall_out_of_the_window() {
        let (w, clock) = window_with_clock(10_000, 10);
        w.fail();
        w.fail();
        assert_eq!(w.failures(), 2);

        // Past the full span the stale bucket no longer counts.
        clock.advance(10_001);
        assert_eq!(w.failures(), 0);

        // Reusing the slot resets its counters first.
        w.fail();
        assert_eq!(w.failures(), 1);
    }

    #[test]
    fn idle_gap_resets_traversed_buckets() {
        let (w, clock) = window_with_clock(1000, 10);
        for _ in 0..10 {
            w.fail();
            clock.advance(100);
        }
        // ring has wrapped; entries decay one bucket at a time
        assert!(w.failures() <= 10);
        clock.advance(500);
        let mid = w.failures();
        assert!(mid < 10);
        clock.advance(1000);
        assert_eq!(w.failures(), 0);
    }

    #[test]
    fn concurrent_increments_sum_exactly() {
        let clock = MockClock::new();
        let w = Arc::new(Window::new(Arc::new(clock.clone()), 10_000, 10).unwrap());
        let mut handles = Vec::new();
        for _ in 0..16 {
            let w = Arc::clone(&w);
            handles.push(thread::spawn(move || {
                for _ in 0..100 {
                    w.fail();
                    w.success();
                }
            }));
        }
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(w.failures(), 1600);
        assert_eq!(w.successes(), 1600);
        assert_eq!(w.error_rate(), 0.5);
    }
}
