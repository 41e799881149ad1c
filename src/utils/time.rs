use time::{macros::format_description, OffsetDateTime};

const NANOS_PER_MILLI: i128 = 1_000_000;

#[inline]
pub fn sleep_for_ms(ms: u64) {
    std::thread::sleep(std::time::Duration::from_millis(ms));
}

#[inline]
fn cal_curr_time_millis() -> u64 {
    (OffsetDateTime::now_utc().unix_timestamp_nanos() / NANOS_PER_MILLI) as u64
}

#[inline]
pub fn format_time_millis(ts_millis: u64) -> String {
    OffsetDateTime::from_unix_timestamp_nanos(ts_millis as i128 * NANOS_PER_MILLI)
        .unwrap()
        .format(format_description!("[hour]:[minute]:[second].[subsecond digits:3]"))
        .unwrap()
}

/// Current wall-clock time in milliseconds. Prefers the cached value when the
/// background ticker has been started, falling back to a direct read.
pub fn curr_time_millis() -> u64 {
    let ticker_time = ticker::curr_time_millis_cached();
    if ticker_time > 0 {
        ticker_time
    } else {
        cal_curr_time_millis()
    }
}

pub use ticker::start_time_ticker;

// provide cached time by a ticker
mod ticker {
    use super::*;
    use lazy_static::lazy_static;
    use std::sync::atomic::{AtomicU64, Ordering};

    lazy_static! {
        static ref NOW_IN_MS: AtomicU64 = AtomicU64::new(0);
    }

    /// `start_time_ticker()` starts a background task that caches the current
    /// timestamp per millisecond, which may provide better performance in
    /// high-concurrency scenarios.
    pub fn start_time_ticker() {
        update_time();
        std::thread::spawn(move || loop {
            update_time();
            std::thread::sleep(std::time::Duration::from_millis(1));
        });
    }

    #[inline]
    fn update_time() {
        NOW_IN_MS.store(cal_curr_time_millis(), Ordering::SeqCst);
    }

    #[inline]
    pub(super) fn curr_time_millis_cached() -> u64 {
        NOW_IN_MS.load(Ordering::SeqCst)
    }
}
