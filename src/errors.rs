//! Distinguished error values surfaced by `Breaker::call`.

use std::fmt;

/// Outcome of a guarded call that did not succeed.
///
/// `Open` and `Timeout` are the breaker's own signals; `Inner` carries the
/// wrapped operation's error verbatim. `Cancelled` is only produced by
/// `call_context` and is never counted as a failure.
#[derive(Debug, PartialEq)]
pub enum CallError<E> {
    /// The breaker short-circuited; the operation was not invoked.
    Open,
    /// The operation exceeded the per-call deadline. Counted as a failure.
    /// The operation itself is not cancelled; a late result is discarded.
    Timeout,
    /// The caller's cancel token fired before the operation returned.
    Cancelled,
    /// The operation returned an error. Counted as a failure.
    Inner(E),
}

impl<E> CallError<E> {
    pub fn is_open(&self) -> bool {
        matches!(self, CallError::Open)
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, CallError::Timeout)
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, CallError::Cancelled)
    }

    /// The wrapped operation's error, if that is what this is.
    pub fn into_inner(self) -> Option<E> {
        match self {
            CallError::Inner(err) => Some(err),
            _ => None,
        }
    }
}

impl<E: fmt::Display> fmt::Display for CallError<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CallError::Open => write!(f, "breaker open"),
            CallError::Timeout => write!(f, "breaker time out"),
            CallError::Cancelled => write!(f, "breaker call cancelled"),
            CallError::Inner(err) => write!(f, "{}", err),
        }
    }
}

impl<E: fmt::Display + fmt::Debug> std::error::Error for CallError<E> {}
