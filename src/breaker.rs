//! The breaker core: state machine, counters, guarded calls.
//!
//! A breaker is always in one of three states, derived on every read and
//! never stored:
//!
//! ```text
//!                             trip policy fires
//!
//!          +-----------------------------------------------------+
//!          |                                                     |
//!          |                                                     v
//!  +----------------+            +----------------+  back-off  +----------------+
//!  |                |   probe    |                |  elapsed   |                |
//!  |     Closed     |<-----------|    HalfOpen    |<-----------|      Open      |
//!  |                |  succeeded |                |   (CAS)    |                |
//!  +----------------+            +----------------+----------->+----------------+
//!                                               probe failed
//! ```
//!
//! The half-open admission is a compare-and-swap latch: exactly one caller
//! per back-off expiry observes half-open and runs the probe, every other
//! concurrent caller keeps short-circuiting until the probe's outcome is
//! known.

use crate::backoff::{BackOff, ExponentialBackOff, DEFAULT_INITIAL_BACKOFF};
use crate::clock::{Clock, SystemClock};
use crate::errors::CallError;
use crate::events::{BreakerEvent, EventBus, EventListener, EventStream};
use crate::logging;
use crate::policy::{BreakerStats, ConsecutivePolicy, RatePolicy, ThresholdPolicy, TripPolicy};
use crate::window::{Window, DEFAULT_WINDOW_BUCKETS, DEFAULT_WINDOW_SPAN_MS};
use crate::Error;
use std::collections::VecDeque;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::mpsc;
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

/// How many recent errors `last_error`/`errors` retain.
pub const DEFAULT_ERROR_HISTORY: usize = 64;

// Stored in next_backoff_ms when the policy said "never retry".
const BACKOFF_STOP: u64 = u64::MAX;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Closed,
    Open,
    HalfOpen,
}

fn backoff_to_ms(backoff: Option<Duration>) -> u64 {
    match backoff {
        Some(d) => (d.as_millis() as u64).min(BACKOFF_STOP - 1),
        None => BACKOFF_STOP,
    }
}

/// Injection points for [`Breaker::with_options`]. Every field falls back
/// to the stock implementation when absent.
#[derive(Default)]
pub struct BreakerOptions {
    /// Dwell-time policy for the open state. Default: exponential with a
    /// 500 ms initial interval.
    pub backoff: Option<Box<dyn BackOff>>,
    /// Predicate consulted after every failure. Default: none, the breaker
    /// only trips manually.
    pub trip_policy: Option<Box<dyn TripPolicy>>,
    /// Time source. Default: the system clock.
    pub clock: Option<Arc<dyn Clock>>,
    /// Sliding window span. Default 10 s.
    pub window_span: Option<Duration>,
    /// Sliding window bucket count. Default 10.
    pub window_buckets: Option<u32>,
}

/// A circuit breaker protecting callers of an unreliable operation.
///
/// All methods take `&self`; the breaker is safe to share behind an `Arc`
/// and use from any number of threads.
pub struct Breaker {
    backoff: Mutex<Box<dyn BackOff>>,
    trip_policy: Option<Box<dyn TripPolicy>>,
    clock: Arc<dyn Clock>,
    window: Window,
    bus: EventBus,

    failures: AtomicU64,
    consec_failures: AtomicU64,
    successes: AtomicU64,
    last_failure_ms: AtomicU64,
    next_backoff_ms: AtomicU64,
    // Half-open admission latch; CAS 0 -> 1 admits exactly one probe.
    half_opens: AtomicU64,
    tripped: AtomicBool,
    broken: AtomicBool,

    error_history: Mutex<VecDeque<Arc<Error>>>,
    noop: bool,
}

impl Breaker {
    /// A breaker with an exponential back-off and no trip policy; it will
    /// never trip on its own.
    pub fn new() -> Breaker {
        Breaker::with_options(BreakerOptions::default())
    }

    /// Trips when the failure count reaches `threshold`, however long that
    /// takes and whether or not the failures are consecutive.
    pub fn new_threshold(threshold: u64) -> Breaker {
        Breaker::with_options(BreakerOptions {
            trip_policy: Some(Box::new(ThresholdPolicy::new(threshold))),
            ..Default::default()
        })
    }

    /// Trips when `threshold` failures occur in a row.
    pub fn new_consecutive(threshold: u64) -> Breaker {
        Breaker::with_options(BreakerOptions {
            trip_policy: Some(Box::new(ConsecutivePolicy::new(threshold))),
            ..Default::default()
        })
    }

    /// Trips when the windowed error rate reaches `rate` after at least
    /// `min_samples` recorded events.
    pub fn new_rate(rate: f64, min_samples: u64) -> Breaker {
        Breaker::with_options(BreakerOptions {
            trip_policy: Some(Box::new(RatePolicy::new(rate, min_samples))),
            ..Default::default()
        })
    }

    pub fn with_options(options: BreakerOptions) -> Breaker {
        let clock = options
            .clock
            .unwrap_or_else(|| Arc::new(SystemClock::new()) as Arc<dyn Clock>);

        let mut backoff = options
            .backoff
            .unwrap_or_else(|| Box::new(ExponentialBackOff::new(DEFAULT_INITIAL_BACKOFF)));
        backoff.reset();
        let next_backoff_ms = backoff_to_ms(backoff.next_backoff());

        let mut span_ms = options
            .window_span
            .map(|d| d.as_millis() as u64)
            .unwrap_or(DEFAULT_WINDOW_SPAN_MS);
        if span_ms == 0 {
            span_ms = DEFAULT_WINDOW_SPAN_MS;
        }
        let mut buckets = options.window_buckets.unwrap_or(DEFAULT_WINDOW_BUCKETS);
        if buckets == 0 || span_ms % buckets as u64 != 0 {
            logging::warn!(
                "window span {}ms does not divide into {} buckets, using a single bucket",
                span_ms,
                buckets
            );
            buckets = 1;
        }
        let window = Window::new(Arc::clone(&clock), span_ms, buckets).unwrap();

        Breaker {
            backoff: Mutex::new(backoff),
            trip_policy: options.trip_policy,
            clock,
            window,
            bus: EventBus::new(),
            failures: AtomicU64::new(0),
            consec_failures: AtomicU64::new(0),
            successes: AtomicU64::new(0),
            last_failure_ms: AtomicU64::new(0),
            next_backoff_ms: AtomicU64::new(next_backoff_ms),
            half_opens: AtomicU64::new(0),
            tripped: AtomicBool::new(false),
            broken: AtomicBool::new(false),
            error_history: Mutex::new(VecDeque::with_capacity(DEFAULT_ERROR_HISTORY)),
            noop: false,
        }
    }

    // The shared fallback handed out by a panel for unknown names. It never
    // trips, so calls through it always reach the operation.
    pub(crate) fn new_noop() -> Breaker {
        let mut breaker = Breaker::new();
        breaker.noop = true;
        breaker
    }

    /// Wrap `op` with breaker protection.
    ///
    /// While the breaker is open the call short-circuits with
    /// [`CallError::Open`] and `op` is not invoked. A zero `timeout` runs
    /// `op` synchronously; otherwise `op` runs on a helper thread and a
    /// deadline overrun yields [`CallError::Timeout`], counted as a
    /// failure. The operation is never cancelled: it runs to completion in
    /// the background and a late result is discarded.
    pub fn call<T, E, F>(&self, op: F, timeout: Duration) -> Result<T, CallError<E>>
    where
        F: FnOnce() -> Result<T, E> + Send + 'static,
        T: Send + 'static,
        E: fmt::Display + Send + 'static,
    {
        self.call_context(&CancelToken::new(), op, timeout)
    }

    /// Like [`call`](Breaker::call), but a cancellation of `token` observed
    /// before the outcome makes the call return [`CallError::Cancelled`]
    /// without recording a failure.
    pub fn call_context<T, E, F>(
        &self,
        token: &CancelToken,
        op: F,
        timeout: Duration,
    ) -> Result<T, CallError<E>>
    where
        F: FnOnce() -> Result<T, E> + Send + 'static,
        T: Send + 'static,
        E: fmt::Display + Send + 'static,
    {
        let state = self.read_state();
        if state == State::Open {
            return Err(CallError::Open);
        }

        let verdict = if timeout.is_zero() {
            Verdict::Finished(op())
        } else {
            self.race(token, op, timeout)
        };

        match verdict {
            Verdict::Finished(Ok(value)) => {
                self.success();
                Ok(value)
            }
            Verdict::Finished(Err(err)) => {
                if token.is_cancelled() {
                    // a cancelled probe releases its admission but records
                    // no failure
                    if state == State::HalfOpen {
                        self.half_opens.store(0, Ordering::SeqCst);
                    }
                    return Err(CallError::Cancelled);
                }
                if state == State::HalfOpen {
                    self.half_opens.store(0, Ordering::SeqCst);
                }
                self.fail_with_error(Error::msg(err.to_string()));
                Err(CallError::Inner(err))
            }
            Verdict::TimedOut => {
                if state == State::HalfOpen {
                    self.half_opens.store(0, Ordering::SeqCst);
                }
                self.fail_with_error(Error::msg("breaker time out"));
                Err(CallError::Timeout)
            }
            Verdict::Cancelled => {
                if state == State::HalfOpen {
                    self.half_opens.store(0, Ordering::SeqCst);
                }
                Err(CallError::Cancelled)
            }
        }
    }

    // Race the operation against the deadline and the cancel token. The
    // channel takes the first verdict; the losers' sends land in unread
    // capacity and are dropped with the receiver.
    fn race<T, E, F>(&self, token: &CancelToken, op: F, timeout: Duration) -> Verdict<T, E>
    where
        F: FnOnce() -> Result<T, E> + Send + 'static,
        T: Send + 'static,
        E: Send + 'static,
    {
        let (tx, rx) = mpsc::sync_channel::<Verdict<T, E>>(3);

        let op_tx = tx.clone();
        thread::spawn(move || {
            let _ = op_tx.try_send(Verdict::Finished(op()));
        });

        let deadline_tx = tx.clone();
        let clock = Arc::clone(&self.clock);
        let timeout_ms = timeout.as_millis() as u64;
        thread::spawn(move || {
            clock.sleep(timeout_ms);
            let _ = deadline_tx.try_send(Verdict::TimedOut);
        });

        let cancel_tx = tx.clone();
        let _cancel_guard = token.register(move || {
            let _ = cancel_tx.try_send(Verdict::Cancelled);
        });

        drop(tx);
        rx.recv().unwrap_or(Verdict::TimedOut)
    }

    /// Record a failure. Increments the failure counters, stamps the
    /// failure time and consults the trip policy. An in-flight probe
    /// admission is left alone; only the probe's own call clears it.
    pub fn fail(&self) {
        self.record_failure(None);
    }

    /// Record a failure along with the error that caused it; the error
    /// lands in the bounded history behind [`last_error`](Breaker::last_error).
    pub fn fail_with_error(&self, err: Error) {
        self.record_failure(Some(err));
    }

    fn record_failure(&self, err: Option<Error>) {
        if let Some(err) = err {
            let mut history = self.error_history.lock().unwrap();
            if history.len() == DEFAULT_ERROR_HISTORY {
                history.pop_front();
            }
            history.push_back(Arc::new(err));
        }

        let failures = self.failures.fetch_add(1, Ordering::SeqCst) + 1;
        let consec_failures = self.consec_failures.fetch_add(1, Ordering::SeqCst) + 1;
        self.last_failure_ms
            .store(self.clock.now_millis(), Ordering::SeqCst);
        self.window.fail();
        self.bus.emit(BreakerEvent::Fail);

        if let Some(policy) = &self.trip_policy {
            let stats = BreakerStats {
                failures,
                consec_failures,
                successes: self.successes.load(Ordering::SeqCst),
                error_rate: self.window.error_rate(),
            };
            if policy.should_trip(&stats) {
                self.trip();
            }
        }
    }

    /// Record a success. A success that answers an admitted half-open probe
    /// resets the breaker.
    pub fn success(&self) {
        {
            let mut backoff = self.backoff.lock().unwrap();
            backoff.reset();
            self.next_backoff_ms
                .store(backoff_to_ms(backoff.next_backoff()), Ordering::SeqCst);
        }

        if self.tripped() && !self.broken.load(Ordering::SeqCst) && self.probing() {
            self.reset();
        }

        self.consec_failures.store(0, Ordering::SeqCst);
        self.successes.fetch_add(1, Ordering::SeqCst);
        self.window.success();
    }

    // True when this success concludes a half-open probe: either the
    // admission latch is still held by a `call` probe, or a fresh state
    // read admits one (the `ready()` path clears the latch up front).
    fn probing(&self) -> bool {
        self.half_opens.load(Ordering::SeqCst) == 1 || self.read_state() == State::HalfOpen
    }

    /// Trip the breaker open. Idempotent with respect to state; every call
    /// emits a `Tripped` event.
    pub fn trip(&self) {
        if self.noop {
            return;
        }
        self.tripped.store(true, Ordering::SeqCst);
        self.last_failure_ms
            .store(self.clock.now_millis(), Ordering::SeqCst);
        self.bus.emit(BreakerEvent::Tripped);
    }

    /// Reset to closed, clearing every counter, the manual-break flag, the
    /// probe admission and the back-off sequence. Emits `Reset` only when
    /// the breaker was actually tripped.
    pub fn reset(&self) {
        let was_tripped = self.tripped.swap(false, Ordering::SeqCst);
        self.broken.store(false, Ordering::SeqCst);
        self.failures.store(0, Ordering::SeqCst);
        self.consec_failures.store(0, Ordering::SeqCst);
        self.successes.store(0, Ordering::SeqCst);
        self.half_opens.store(0, Ordering::SeqCst);
        {
            let mut backoff = self.backoff.lock().unwrap();
            backoff.reset();
            self.next_backoff_ms
                .store(backoff_to_ms(backoff.next_backoff()), Ordering::SeqCst);
        }
        self.window.reset();
        if was_tripped {
            self.bus.emit(BreakerEvent::Reset);
        }
    }

    /// Trip the breaker and keep it open until an explicit reset; the
    /// half-open transition is suppressed. Use when manual control over the
    /// breaker state is needed.
    pub fn force_break(&self) {
        if self.noop {
            return;
        }
        self.broken.store(true, Ordering::SeqCst);
        self.trip();
    }

    /// True when a call would be allowed right now: the breaker is closed,
    /// or it is time to probe. Observing the half-open transition emits a
    /// `Ready` event and re-arms the admission latch for the caller.
    pub fn ready(&self) -> bool {
        let state = self.read_state();
        if state == State::HalfOpen {
            self.half_opens.store(0, Ordering::SeqCst);
            self.bus.emit(BreakerEvent::Ready);
        }
        state == State::Closed || state == State::HalfOpen
    }

    pub fn tripped(&self) -> bool {
        self.tripped.load(Ordering::SeqCst)
    }

    /// Failures recorded since the last reset.
    pub fn failures(&self) -> u64 {
        self.failures.load(Ordering::SeqCst)
    }

    /// Failures recorded since the last success.
    pub fn consec_failures(&self) -> u64 {
        self.consec_failures.load(Ordering::SeqCst)
    }

    /// Successes recorded since the last reset.
    pub fn successes(&self) -> u64 {
        self.successes.load(Ordering::SeqCst)
    }

    /// Error rate over the sliding window, 0.0 without samples.
    pub fn error_rate(&self) -> f64 {
        self.window.error_rate()
    }

    /// The most recently recorded error, if any.
    pub fn last_error(&self) -> Option<Arc<Error>> {
        self.error_history.lock().unwrap().back().cloned()
    }

    /// The retained error history, oldest first.
    pub fn errors(&self) -> Vec<Arc<Error>> {
        self.error_history.lock().unwrap().iter().cloned().collect()
    }

    /// A stream of state-change events, buffered up to 100 entries with the
    /// oldest dropped on overflow.
    pub fn subscribe(&self) -> EventStream {
        self.bus.subscribe()
    }

    /// Register a listener invoked synchronously on every emitted event.
    pub fn add_listener(&self, listener: Arc<dyn EventListener>) {
        self.bus.add_listener(listener);
    }

    /// Remove a previously registered listener (pointer identity).
    pub fn remove_listener(&self, listener: &Arc<dyn EventListener>) {
        self.bus.remove_listener(listener);
    }

    // Derive the current state. When the back-off has elapsed, the CAS on
    // the admission latch lets exactly one reader observe HalfOpen; the
    // winning reader also advances the back-off so a failed probe dwells
    // longer the next time around.
    fn read_state(&self) -> State {
        if !self.tripped.load(Ordering::SeqCst) {
            return State::Closed;
        }
        if self.broken.load(Ordering::SeqCst) {
            return State::Open;
        }
        let next_backoff = self.next_backoff_ms.load(Ordering::SeqCst);
        if next_backoff == BACKOFF_STOP {
            return State::Open;
        }
        let since = self
            .clock
            .now_millis()
            .saturating_sub(self.last_failure_ms.load(Ordering::SeqCst));
        if since > next_backoff
            && self
                .half_opens
                .compare_exchange(0, 1, Ordering::SeqCst, Ordering::SeqCst)
                .is_ok()
        {
            let mut backoff = self.backoff.lock().unwrap();
            self.next_backoff_ms
                .store(backoff_to_ms(backoff.next_backoff()), Ordering::SeqCst);
            return State::HalfOpen;
        }
        State::Open
    }
}

impl Default for Breaker {
    fn default() -> Self {
        Breaker::new()
    }
}

impl fmt::Debug for Breaker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Breaker")
            .field("tripped", &self.tripped())
            .field("broken", &self.broken.load(Ordering::SeqCst))
            .field("failures", &self.failures())
            .field("consec_failures", &self.consec_failures())
            .field("successes", &self.successes())
            .field("next_backoff_ms", &self.next_backoff_ms.load(Ordering::SeqCst))
            .finish()
    }
}

enum Verdict<T, E> {
    Finished(Result<T, E>),
    TimedOut,
    Cancelled,
}

/// Cloneable cancellation handle for [`Breaker::call_context`]. Cancelling
/// is sticky: once cancelled, a token stays cancelled.
#[derive(Clone)]
pub struct CancelToken {
    inner: Arc<CancelInner>,
}

struct CancelInner {
    cancelled: AtomicBool,
    waiters: Mutex<Vec<(u64, Box<dyn Fn() + Send>)>>,
    next_id: AtomicU64,
}

impl CancelToken {
    pub fn new() -> Self {
        CancelToken {
            inner: Arc::new(CancelInner {
                cancelled: AtomicBool::new(false),
                waiters: Mutex::new(Vec::new()),
                next_id: AtomicU64::new(1),
            }),
        }
    }

    pub fn cancel(&self) {
        self.inner.cancelled.store(true, Ordering::SeqCst);
        let waiters = std::mem::take(&mut *self.inner.waiters.lock().unwrap());
        for (_, wake) in waiters {
            wake();
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.inner.cancelled.load(Ordering::SeqCst)
    }

    fn register<F>(&self, wake: F) -> CancelGuard
    where
        F: Fn() + Send + 'static,
    {
        let mut waiters = self.inner.waiters.lock().unwrap();
        if self.is_cancelled() {
            drop(waiters);
            wake();
            return CancelGuard { inner: None, id: 0 };
        }
        let id = self.inner.next_id.fetch_add(1, Ordering::SeqCst);
        waiters.push((id, Box::new(wake)));
        CancelGuard {
            inner: Some(Arc::clone(&self.inner)),
            id,
        }
    }
}

impl Default for CancelToken {
    fn default() -> Self {
        CancelToken::new()
    }
}

impl fmt::Debug for CancelToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CancelToken")
            .field("cancelled", &self.is_cancelled())
            .finish()
    }
}

struct CancelGuard {
    inner: Option<Arc<CancelInner>>,
    id: u64,
}

impl Drop for CancelGuard {
    fn drop(&mut self) {
        if let Some(inner) = &self.inner {
            inner
                .waiters
                .lock()
                .unwrap()
                .retain(|(id, _)| *id != self.id);
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::backoff::StopBackOff;
    use crate::clock::MockClock;
    use std::sync::atomic::AtomicUsize;

    fn mock_breaker(options: BreakerOptions) -> (Breaker, MockClock) {
        let clock = MockClock::new();
        let mut options = options;
        options.clock = Some(Arc::new(clock.clone()));
        if options.backoff.is_none() {
            options.backoff = Some(Box::new(ExponentialBackOff::new(Duration::from_millis(1))));
        }
        (Breaker::with_options(options), clock)
    }

    #[test]
    fn tripping() {
        let cb = Breaker::new();
        assert!(!cb.tripped());
        cb.trip();
        assert!(cb.tripped());
        cb.reset();
        assert!(!cb.tripped());
    }

    #[test]
    fn counters() {
        let cb = Breaker::new();

        cb.fail();
        assert_eq!(cb.failures(), 1);

        cb.fail();
        assert_eq!(cb.consec_failures(), 2);

        cb.success();
        assert_eq!(cb.successes(), 1);
        assert_eq!(cb.consec_failures(), 0);

        cb.reset();
        assert_eq!(cb.failures(), 0);
        assert_eq!(cb.successes(), 0);
        assert_eq!(cb.consec_failures(), 0);
    }

    #[test]
    fn error_rate_without_samples() {
        let cb = Breaker::new();
        assert_eq!(cb.error_rate(), 0.0);
    }

    #[test]
    fn state_cycle_through_backoff() {
        let (cb, clock) = mock_breaker(BreakerOptions::default());

        assert!(cb.ready());

        cb.trip();
        assert!(!cb.ready());

        clock.advance(2);
        assert!(cb.ready());

        // A failed probe restamps the failure time and starts a new dwell.
        cb.fail();
        assert!(!cb.ready());
        clock.advance(3);
        assert!(cb.ready());
    }

    #[test]
    fn manual_break_suppresses_half_open() {
        let (cb, clock) = mock_breaker(BreakerOptions::default());
        cb.force_break();
        clock.advance(10);
        assert!(!cb.ready());

        cb.reset();
        cb.trip();
        clock.advance(10);
        assert!(cb.ready());
    }

    #[test]
    fn stop_backoff_never_goes_half_open() {
        let (cb, clock) = mock_breaker(BreakerOptions {
            backoff: Some(Box::new(StopBackOff)),
            ..Default::default()
        });
        cb.trip();
        clock.advance(1_000_000);
        assert!(!cb.ready());

        let called = Arc::new(AtomicUsize::new(0));
        let called2 = Arc::clone(&called);
        let result = cb.call(
            move || {
                called2.fetch_add(1, Ordering::SeqCst);
                Ok::<_, String>(())
            },
            Duration::ZERO,
        );
        assert_eq!(result, Err(CallError::Open));
        assert_eq!(called.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn threshold_breaker_trips_at_threshold() {
        let cb = Breaker::new_threshold(2);
        assert!(!cb.tripped());
        cb.fail();
        assert!(!cb.tripped());
        cb.fail();
        assert!(cb.tripped());

        cb.reset();
        assert_eq!(cb.failures(), 0);
        assert!(!cb.tripped());
    }

    #[test]
    fn consecutive_breaker_needs_a_run() {
        let cb = Breaker::new_consecutive(3);
        cb.fail();
        cb.success();
        cb.fail();
        cb.fail();
        assert!(!cb.tripped());
        cb.fail();
        assert!(cb.tripped());
    }

    #[test]
    fn rate_breaker_waits_for_samples() {
        let cb = Breaker::new_rate(0.5, 100);
        cb.fail();
        assert!(!cb.tripped());
    }

    #[test]
    fn call_counts_failures_and_trips() {
        let cb = Breaker::new_threshold(2);

        let result = cb.call(|| Err::<(), _>("error"), Duration::ZERO);
        assert!(result.is_err());
        assert!(!cb.tripped());

        let result = cb.call(|| Err::<(), _>("error"), Duration::ZERO);
        assert!(result.is_err());
        assert!(cb.tripped());
    }

    #[test]
    fn open_breaker_short_circuits_calls() {
        let cb = Breaker::new_threshold(1);
        cb.trip();
        let result = cb.call(|| Ok::<_, String>("unreachable"), Duration::ZERO);
        assert_eq!(result, Err(CallError::Open));
    }

    #[test]
    fn successful_probe_resets_the_breaker() {
        let (cb, clock) = mock_breaker(BreakerOptions {
            trip_policy: Some(Box::new(ThresholdPolicy::new(1))),
            ..Default::default()
        });

        let result = cb.call(|| Err::<(), _>("error"), Duration::ZERO);
        assert!(result.is_err());
        assert!(cb.tripped());

        clock.advance(2);
        for _ in 0..4 {
            let result = cb.call(|| Ok::<_, String>(()), Duration::ZERO);
            assert!(result.is_ok());
            assert!(!cb.tripped());
        }
    }

    #[test]
    fn error_history_is_bounded_and_ordered() {
        let cb = Breaker::new_threshold(2);
        assert!(cb.last_error().is_none());

        cb.fail_with_error(Error::msg("error 1"));
        assert_eq!(cb.last_error().unwrap().to_string(), "error 1");

        let result = cb.call(|| Err::<(), _>("circuit error"), Duration::ZERO);
        assert!(result.is_err());
        assert_eq!(cb.last_error().unwrap().to_string(), "circuit error");

        let errors = cb.errors();
        assert_eq!(errors.len(), 2);
        assert_eq!(errors[0].to_string(), "error 1");
        assert_eq!(errors[1].to_string(), "circuit error");

        for i in 0..2 * DEFAULT_ERROR_HISTORY {
            cb.fail_with_error(Error::msg(format!("error {}", i)));
        }
        assert_eq!(cb.errors().len(), DEFAULT_ERROR_HISTORY);
    }

    #[test]
    fn timeout_counts_as_failure() {
        let cb = Breaker::new_threshold(1);
        let result = cb.call(
            || {
                std::thread::sleep(Duration::from_millis(250));
                Ok::<_, String>(())
            },
            Duration::from_millis(5),
        );
        assert_eq!(result, Err(CallError::Timeout));
        assert!(cb.tripped());
        assert_eq!(cb.last_error().unwrap().to_string(), "breaker time out");
    }

    #[test]
    fn cancellation_is_not_a_failure() {
        let cb = Breaker::new_threshold(2);
        let token = CancelToken::new();

        let result = cb.call_context(&token, || Err::<(), _>("error"), Duration::ZERO);
        assert!(result.is_err());
        assert!(!cb.tripped());

        token.cancel();
        let result = cb.call_context(&token, || Err::<(), _>("error"), Duration::ZERO);
        assert_eq!(result, Err(CallError::Cancelled));
        assert!(!cb.tripped());
        assert_eq!(cb.failures(), 1);

        let fresh = CancelToken::new();
        let result = cb.call_context(&fresh, || Err::<(), _>("error"), Duration::ZERO);
        assert!(result.is_err());
        assert!(cb.tripped());
    }

    #[test]
    fn cancel_token_wakes_pending_call() {
        let cb = Arc::new(Breaker::new_threshold(10));
        let token = CancelToken::new();

        let caller = Arc::clone(&cb);
        let caller_token = token.clone();
        let handle = std::thread::spawn(move || {
            caller.call_context(
                &caller_token,
                || {
                    std::thread::sleep(Duration::from_secs(5));
                    Ok::<_, String>(())
                },
                Duration::from_secs(10),
            )
        });

        std::thread::sleep(Duration::from_millis(20));
        token.cancel();
        let result = handle.join().unwrap();
        assert_eq!(result, Err(CallError::Cancelled));
        assert_eq!(cb.failures(), 0);
    }

    #[test]
    fn trip_is_idempotent_but_emits_each_time() {
        let cb = Breaker::new();
        let events = cb.subscribe();
        cb.trip();
        cb.trip();
        assert!(cb.tripped());
        assert_eq!(events.try_recv(), Some(BreakerEvent::Tripped));
        assert_eq!(events.try_recv(), Some(BreakerEvent::Tripped));
        assert_eq!(events.try_recv(), None);
    }

    #[test]
    fn reset_does_not_emit_when_not_tripped() {
        let cb = Breaker::new();
        let events = cb.subscribe();
        cb.reset();
        assert_eq!(events.try_recv(), None);
    }

    #[test]
    fn noop_breaker_never_trips() {
        let cb = Breaker::new_noop();
        cb.trip();
        cb.force_break();
        cb.fail();
        assert!(!cb.tripped());
        let result = cb.call(|| Ok::<_, String>(7), Duration::ZERO);
        assert_eq!(result.unwrap(), 7);
    }

    #[test]
    fn shared_across_threads() {
        let cb = Arc::new(Breaker::new());
        let mut handles = Vec::new();
        for _ in 0..4 {
            let cb = Arc::clone(&cb);
            handles.push(std::thread::spawn(move || {
                cb.fail_with_error(Error::msg("x"));
                cb.last_error();
                cb.errors();
            }));
        }
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(cb.failures(), 4);
    }
}
