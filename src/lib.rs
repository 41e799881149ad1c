//! # Circuit
//!
//! A circuit breaker guards callers of unreliable remote operations. It wraps
//! a fallible operation and monitors failures and time outs; once failures
//! accumulate past a configured trip policy, further calls short-circuit with
//! a distinguished error instead of invoking the operation. After a back-off
//! interval the breaker admits a single probe: a successful probe closes the
//! breaker again, a failed probe re-opens it with a longer back-off.
//!
//! Generally, there are a few steps when using the crate:
//! 1. Construct a [`Breaker`] with a trip policy (or a declarative
//!    [`BreakerConfig`]).
//! 2. Wrap operations with [`Breaker::call`] and match on [`CallError`].
//! 3. Optionally subscribe to state-change events or register breakers in a
//!    [`Panel`] for shared telemetry.
//!
//! ## Wrapping an operation
//!
//! ```rust
//! use std::time::Duration;
//! use circuit::{Breaker, CallError};
//!
//! let cb = Breaker::new_threshold(10);
//! match cb.call(|| remote_fetch(), Duration::from_secs(1)) {
//!     Ok(body) => println!("{}", body),
//!     Err(CallError::Open) => println!("short-circuited"),
//!     Err(CallError::Timeout) => println!("took too long"),
//!     Err(err) => println!("{}", err),
//! }
//! # fn remote_fetch() -> Result<String, std::io::Error> { Ok(String::new()) }
//! ```
//!
//! ## Manual accounting
//!
//! When the breaker cannot wrap the operation directly, drive the counters
//! yourself:
//!
//! ```rust
//! use circuit::Breaker;
//!
//! let cb = Breaker::new_threshold(10);
//! if cb.ready() {
//!     match do_work() {
//!         Ok(_) => cb.success(),
//!         Err(_) => cb.fail(),
//!     }
//! }
//! # fn do_work() -> Result<(), ()> { Ok(()) }
//! ```
//!
//! ## Grouping breakers
//!
//! A [`Panel`] keeps a named collection of breakers and forwards each
//! breaker's events to a [`Statter`] as counters and timings:
//!
//! ```rust
//! use circuit::{Breaker, Panel};
//! use std::sync::Arc;
//!
//! let panel = Panel::new();
//! panel.add("db", Arc::new(Breaker::new_rate(0.95, 100)));
//! panel.add("cache", Arc::new(Breaker::new_consecutive(5)));
//!
//! let (db, _found) = panel.get("db");
//! let _ = db.call(|| query(), std::time::Duration::ZERO);
//! # fn query() -> Result<(), std::io::Error> { Ok(()) }
//! ```

pub mod backoff;
pub mod breaker;
pub mod clock;
pub mod config;
pub mod errors;
pub mod events;
/// Adapters for different logging crates.
pub mod logging;
pub mod metrics;
pub mod panel;
pub mod policy;
pub mod utils;
pub mod window;

pub use backoff::{BackOff, ConstantBackOff, ExponentialBackOff, StopBackOff};
pub use breaker::{Breaker, BreakerOptions, CancelToken};
pub use clock::{Clock, MockClock, SystemClock, Ticker};
pub use config::{BreakerConfig, PolicyConfig};
pub use errors::CallError;
pub use events::{BreakerEvent, EventListener, EventStream, StreamClosed};
pub use metrics::{NoopStatter, Statter};
pub use panel::Panel;
pub use policy::{
    BreakerStats, ConsecutivePolicy, CustomPolicy, RatePolicy, ThresholdPolicy, TripPolicy,
};
pub use window::Window;

pub type Result<T> = anyhow::Result<T>;
pub type Error = anyhow::Error;
