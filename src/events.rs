//! State-change notification fan-out.
//!
//! A breaker owns one internal bus. Consumers either pull from an
//! [`EventStream`] (a bounded queue, capacity 100, where the oldest event is
//! dropped once the queue is full) or register an [`EventListener`] invoked
//! synchronously on emission. Emission never blocks on a slow subscriber.

use std::collections::VecDeque;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex, RwLock, Weak};
use std::time::{Duration, Instant};

/// Buffered events per subscriber before the oldest is dropped.
pub const EVENT_BUFFER: usize = 100;

/// Emitted on the corresponding breaker state transitions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BreakerEvent {
    /// The breaker transitioned closed → open.
    Tripped,
    /// The breaker was reset to closed while tripped.
    Reset,
    /// A failure was recorded.
    Fail,
    /// The breaker transitioned open → half-open and will admit a probe.
    Ready,
}

impl fmt::Display for BreakerEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            BreakerEvent::Tripped => "tripped",
            BreakerEvent::Reset => "reset",
            BreakerEvent::Fail => "fail",
            BreakerEvent::Ready => "ready",
        };
        write!(f, "{}", name)
    }
}

/// Callback surface over the same bus as [`EventStream`].
pub trait EventListener: Send + Sync {
    fn on_event(&self, event: BreakerEvent);
}

/// Returned by [`EventStream::recv`] once the stream has been closed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamClosed;

impl fmt::Display for StreamClosed {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "event stream closed")
    }
}

impl std::error::Error for StreamClosed {}

struct StreamState {
    queue: VecDeque<BreakerEvent>,
    closed: bool,
}

struct StreamShared {
    state: Mutex<StreamState>,
    cond: Condvar,
    capacity: usize,
}

impl StreamShared {
    fn new(capacity: usize) -> Self {
        StreamShared {
            state: Mutex::new(StreamState {
                queue: VecDeque::with_capacity(capacity),
                closed: false,
            }),
            cond: Condvar::new(),
            capacity,
        }
    }

    // Lossy-newest-wins: a full queue sheds its oldest event.
    fn push(&self, event: BreakerEvent) {
        let mut state = self.state.lock().unwrap();
        if state.closed {
            return;
        }
        if state.queue.len() == self.capacity {
            state.queue.pop_front();
        }
        state.queue.push_back(event);
        drop(state);
        self.cond.notify_one();
    }

    fn close(&self) {
        let mut state = self.state.lock().unwrap();
        state.closed = true;
        drop(state);
        self.cond.notify_all();
    }
}

/// A subscription to a breaker's events. All methods take `&self`, so a
/// stream can be shared behind an `Arc` between a consumer thread and the
/// owner that eventually closes it.
pub struct EventStream {
    shared: Arc<StreamShared>,
    bus: Weak<BusInner>,
    id: u64,
}

impl EventStream {
    /// Block until an event arrives or the stream is closed.
    pub fn recv(&self) -> Result<BreakerEvent, StreamClosed> {
        let mut state = self.shared.state.lock().unwrap();
        loop {
            if state.closed {
                return Err(StreamClosed);
            }
            if let Some(event) = state.queue.pop_front() {
                return Ok(event);
            }
            state = self.shared.cond.wait(state).unwrap();
        }
    }

    /// A buffered event, if any.
    pub fn try_recv(&self) -> Option<BreakerEvent> {
        self.shared.state.lock().unwrap().queue.pop_front()
    }

    /// Block for at most `timeout`; `None` on timeout or close.
    pub fn recv_timeout(&self, timeout: Duration) -> Option<BreakerEvent> {
        let deadline = Instant::now() + timeout;
        let mut state = self.shared.state.lock().unwrap();
        loop {
            if let Some(event) = state.queue.pop_front() {
                return Some(event);
            }
            if state.closed {
                return None;
            }
            let now = Instant::now();
            if now >= deadline {
                return None;
            }
            let (guard, _timeout) = self
                .shared
                .cond
                .wait_timeout(state, deadline - now)
                .unwrap();
            state = guard;
        }
    }

    /// Stop delivery; a blocked `recv` returns [`StreamClosed`].
    pub fn close(&self) {
        self.shared.close();
    }
}

impl Drop for EventStream {
    fn drop(&mut self) {
        self.shared.close();
        if let Some(bus) = self.bus.upgrade() {
            bus.remove_stream(self.id);
        }
    }
}

impl fmt::Debug for EventStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.shared.state.lock().unwrap();
        f.debug_struct("EventStream")
            .field("buffered", &state.queue.len())
            .field("closed", &state.closed)
            .finish()
    }
}

pub(crate) struct EventBus {
    inner: Arc<BusInner>,
}

struct BusInner {
    streams: RwLock<Vec<(u64, Arc<StreamShared>)>>,
    listeners: RwLock<Vec<Arc<dyn EventListener>>>,
    next_id: AtomicU64,
}

impl BusInner {
    fn remove_stream(&self, id: u64) {
        self.streams.write().unwrap().retain(|(sid, _)| *sid != id);
    }
}

impl EventBus {
    pub(crate) fn new() -> Self {
        EventBus {
            inner: Arc::new(BusInner {
                streams: RwLock::new(Vec::new()),
                listeners: RwLock::new(Vec::new()),
                next_id: AtomicU64::new(1),
            }),
        }
    }

    pub(crate) fn subscribe(&self) -> EventStream {
        let id = self.inner.next_id.fetch_add(1, Ordering::SeqCst);
        let shared = Arc::new(StreamShared::new(EVENT_BUFFER));
        self.inner
            .streams
            .write()
            .unwrap()
            .push((id, Arc::clone(&shared)));
        EventStream {
            shared,
            bus: Arc::downgrade(&self.inner),
            id,
        }
    }

    pub(crate) fn add_listener(&self, listener: Arc<dyn EventListener>) {
        self.inner.listeners.write().unwrap().push(listener);
    }

    pub(crate) fn remove_listener(&self, listener: &Arc<dyn EventListener>) {
        self.inner
            .listeners
            .write()
            .unwrap()
            .retain(|l| !Arc::ptr_eq(l, listener));
    }

    pub(crate) fn emit(&self, event: BreakerEvent) {
        for listener in self.inner.listeners.read().unwrap().iter() {
            listener.on_event(event);
        }
        for (_, stream) in self.inner.streams.read().unwrap().iter() {
            stream.push(event);
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use mockall::mock;
    use mockall::predicate::eq;
    use std::thread;

    mock! {
        pub Listener {}
        impl EventListener for Listener {
            fn on_event(&self, event: BreakerEvent);
        }
    }

    #[test]
    fn stream_receives_in_order() {
        let bus = EventBus::new();
        let stream = bus.subscribe();

        bus.emit(BreakerEvent::Tripped);
        bus.emit(BreakerEvent::Fail);
        bus.emit(BreakerEvent::Reset);

        assert_eq!(stream.try_recv(), Some(BreakerEvent::Tripped));
        assert_eq!(stream.try_recv(), Some(BreakerEvent::Fail));
        assert_eq!(stream.try_recv(), Some(BreakerEvent::Reset));
        assert_eq!(stream.try_recv(), None);
    }

    #[test]
    fn overflow_drops_oldest() {
        let bus = EventBus::new();
        let stream = bus.subscribe();

        bus.emit(BreakerEvent::Tripped);
        for _ in 0..EVENT_BUFFER {
            bus.emit(BreakerEvent::Fail);
        }

        // The initial Tripped was shed to make room for the newest Fail.
        assert_eq!(stream.try_recv(), Some(BreakerEvent::Fail));
        let mut count = 1;
        while stream.try_recv().is_some() {
            count += 1;
        }
        assert_eq!(count, EVENT_BUFFER);
    }

    #[test]
    fn close_wakes_blocked_receiver() {
        let bus = EventBus::new();
        let stream = Arc::new(bus.subscribe());
        let consumer = Arc::clone(&stream);
        let handle = thread::spawn(move || consumer.recv());

        stream.close();
        assert_eq!(handle.join().unwrap(), Err(StreamClosed));
    }

    #[test]
    fn dropped_stream_is_unsubscribed() {
        let bus = EventBus::new();
        let stream = bus.subscribe();
        assert_eq!(bus.inner.streams.read().unwrap().len(), 1);
        drop(stream);
        assert_eq!(bus.inner.streams.read().unwrap().len(), 0);
        bus.emit(BreakerEvent::Fail);
    }

    #[test]
    fn listeners_fire_synchronously_and_remove_by_identity() {
        let bus = EventBus::new();
        let mut mock = MockListener::new();
        mock.expect_on_event()
            .with(eq(BreakerEvent::Tripped))
            .times(1)
            .return_const(());
        let listener: Arc<dyn EventListener> = Arc::new(mock);

        bus.add_listener(Arc::clone(&listener));
        bus.emit(BreakerEvent::Tripped);

        bus.remove_listener(&listener);
        bus.emit(BreakerEvent::Tripped);
    }

    #[test]
    fn recv_timeout_returns_none_when_idle() {
        let bus = EventBus::new();
        let stream = bus.subscribe();
        assert_eq!(stream.recv_timeout(Duration::from_millis(10)), None);
        bus.emit(BreakerEvent::Ready);
        assert_eq!(
            stream.recv_timeout(Duration::from_millis(10)),
            Some(BreakerEvent::Ready)
        );
    }
}
