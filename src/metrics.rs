//! Telemetry sink interface for panels.
//!
//! The panel forwards breaker events to a [`Statter`] as counter increments
//! and timings; wire it to statsd, Prometheus or whatever the host
//! application uses. The default sink discards everything.

/// A statsd-shaped metrics sink.
pub trait Statter: Send + Sync {
    fn counter(&self, name: &str, value: i64);
    fn timing(&self, name: &str, duration_ms: u64);
    fn gauge(&self, name: &str, value: f64);
}

/// Discards every metric.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopStatter;

impl Statter for NoopStatter {
    fn counter(&self, _name: &str, _value: i64) {}

    fn timing(&self, _name: &str, _duration_ms: u64) {}

    fn gauge(&self, _name: &str, _value: f64) {}
}
