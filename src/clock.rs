//! Virtualised time source.
//!
//! Every time-dependent component in this crate takes a [`Clock`] by
//! dependency injection, so tests can substitute a [`MockClock`] that only
//! advances on demand. Real deployments use the [`SystemClock`].

use crate::utils;
use std::fmt;
use std::sync::mpsc::{self, Receiver, SyncSender, TrySendError};
use std::sync::{Arc, Condvar, Mutex};

/// A minimal time source: a millisecond timestamp, a blocking sleep, and a
/// ticker producing a lazy infinite sequence of tick timestamps.
pub trait Clock: Send + Sync + fmt::Debug {
    /// Current time on this clock's timeline, in milliseconds.
    fn now_millis(&self) -> u64;

    /// Block the calling thread until the clock has advanced by `ms`.
    fn sleep(&self, ms: u64);

    /// A stream of tick timestamps, one every `period_ms`.
    fn ticker(&self, period_ms: u64) -> Ticker;
}

/// Receiving half of a ticker. Ticks that are not consumed in time are
/// dropped rather than queued without bound.
#[derive(Debug)]
pub struct Ticker {
    rx: Receiver<u64>,
}

impl Ticker {
    /// Block until the next tick. Returns `None` once the producing clock
    /// has gone away.
    pub fn recv(&self) -> Option<u64> {
        self.rx.recv().ok()
    }

    pub fn try_recv(&self) -> Option<u64> {
        self.rx.try_recv().ok()
    }
}

impl Iterator for Ticker {
    type Item = u64;

    fn next(&mut self) -> Option<u64> {
        self.rx.recv().ok()
    }
}

const TICKER_BACKLOG: usize = 32;

/// Wall-clock time through `utils::time`.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl SystemClock {
    pub fn new() -> Self {
        SystemClock
    }
}

impl Clock for SystemClock {
    fn now_millis(&self) -> u64 {
        utils::curr_time_millis()
    }

    fn sleep(&self, ms: u64) {
        utils::sleep_for_ms(ms);
    }

    fn ticker(&self, period_ms: u64) -> Ticker {
        let (tx, rx) = mpsc::sync_channel(TICKER_BACKLOG);
        std::thread::spawn(move || loop {
            utils::sleep_for_ms(period_ms);
            match tx.try_send(utils::curr_time_millis()) {
                Ok(()) | Err(TrySendError::Full(_)) => {}
                Err(TrySendError::Disconnected(_)) => break,
            }
        });
        Ticker { rx }
    }
}

/// A manually driven clock for deterministic tests. Cloning yields handles
/// onto the same timeline; time starts at zero and only moves through
/// [`MockClock::advance`].
#[derive(Debug, Clone)]
pub struct MockClock {
    inner: Arc<MockInner>,
}

#[derive(Debug)]
struct MockInner {
    state: Mutex<MockState>,
    cond: Condvar,
}

#[derive(Debug)]
struct MockState {
    now: u64,
    tickers: Vec<MockTicker>,
}

#[derive(Debug)]
struct MockTicker {
    next_due: u64,
    period: u64,
    tx: SyncSender<u64>,
}

impl MockClock {
    pub fn new() -> Self {
        MockClock {
            inner: Arc::new(MockInner {
                state: Mutex::new(MockState {
                    now: 0,
                    tickers: Vec::new(),
                }),
                cond: Condvar::new(),
            }),
        }
    }

    /// Move the clock forward, waking any sleeper whose deadline has passed
    /// and firing every ticker tick that became due.
    pub fn advance(&self, ms: u64) {
        let mut state = self.inner.state.lock().unwrap();
        state.now += ms;
        let now = state.now;
        state.tickers.retain_mut(|t| {
            while t.next_due <= now {
                match t.tx.try_send(t.next_due) {
                    Ok(()) | Err(TrySendError::Full(_)) => {}
                    Err(TrySendError::Disconnected(_)) => return false,
                }
                t.next_due += t.period;
            }
            true
        });
        drop(state);
        self.inner.cond.notify_all();
    }
}

impl Default for MockClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for MockClock {
    fn now_millis(&self) -> u64 {
        self.inner.state.lock().unwrap().now
    }

    fn sleep(&self, ms: u64) {
        let mut state = self.inner.state.lock().unwrap();
        let deadline = state.now + ms;
        while state.now < deadline {
            state = self.inner.cond.wait(state).unwrap();
        }
    }

    fn ticker(&self, period_ms: u64) -> Ticker {
        let (tx, rx) = mpsc::sync_channel(TICKER_BACKLOG);
        let mut state = self.inner.state.lock().unwrap();
        let next_due = state.now + period_ms;
        state.tickers.push(MockTicker {
            next_due,
            period: period_ms,
            tx,
        });
        Ticker { rx }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use std::sync::mpsc::channel;
    use std::thread;

    #[test]
    fn mock_now_starts_at_zero() {
        let c = MockClock::new();
        assert_eq!(c.now_millis(), 0);
        c.advance(250);
        assert_eq!(c.now_millis(), 250);
    }

    #[test]
    fn mock_sleep_blocks_until_advanced() {
        let c = MockClock::new();
        let (started_tx, started_rx) = channel();
        let (done_tx, done_rx) = channel();
        let sleeper = c.clone();
        let handle = thread::spawn(move || {
            started_tx.send(()).unwrap();
            sleeper.sleep(10);
            done_tx.send(()).unwrap();
        });

        // let the sleeper reach its wait before moving time
        started_rx.recv().unwrap();
        thread::sleep(std::time::Duration::from_millis(10));

        // Not woken by a partial advance.
        c.advance(5);
        assert!(done_rx
            .recv_timeout(std::time::Duration::from_millis(50))
            .is_err());

        c.advance(5);
        done_rx
            .recv_timeout(std::time::Duration::from_secs(1))
            .unwrap();
        handle.join().unwrap();
    }

    #[test]
    fn mock_ticker_fires_due_ticks() {
        let c = MockClock::new();
        let ticker = c.ticker(10);
        assert!(ticker.try_recv().is_none());

        c.advance(35);
        assert_eq!(ticker.try_recv(), Some(10));
        assert_eq!(ticker.try_recv(), Some(20));
        assert_eq!(ticker.try_recv(), Some(30));
        assert!(ticker.try_recv().is_none());
    }

    #[test]
    fn system_clock_moves() {
        let c = SystemClock::new();
        let t0 = c.now_millis();
        c.sleep(2);
        assert!(c.now_millis() >= t0 + 2);
    }

    #[test]
    fn system_ticker_ticks() {
        let c = SystemClock::new();
        let mut ticker = c.ticker(1);
        assert!(ticker.next().is_some());
    }
}
