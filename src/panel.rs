//! Named registry of breakers with shared telemetry.
//!
//! Each added breaker gets a dispatcher thread that drains its event stream
//! and forwards the events to the panel's [`Statter`], tagged with the
//! breaker's name. The subscription is one-way: breakers know nothing about
//! the panels watching them, and dropping the panel tears the dispatchers
//! down.

use crate::breaker::Breaker;
use crate::config::BreakerConfig;
use crate::events::{BreakerEvent, EventStream};
use crate::logging;
use crate::metrics::{NoopStatter, Statter};
use crate::utils;
use lazy_static::lazy_static;
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, RwLock};
use std::thread::JoinHandle;

/// Default metric name prefix: `circuit.<name>.<event>`.
pub const DEFAULT_STATS_PREFIX: &str = "circuit";

lazy_static! {
    // Handed out by `get` for unknown names; never trips, shared process-wide.
    static ref NOOP_BREAKER: Arc<Breaker> = Arc::new(Breaker::new_noop());
}

struct PanelEntry {
    breaker: Arc<Breaker>,
    stream: Arc<EventStream>,
    dispatcher: Option<JoinHandle<()>>,
}

/// A named collection of breakers feeding one telemetry sink.
pub struct Panel {
    circuits: RwLock<HashMap<String, PanelEntry>>,
    // Trip stamps live behind their own lock; never held together with the
    // circuits lock.
    last_trip_ms: Arc<Mutex<HashMap<String, u64>>>,
    statter: Arc<RwLock<Arc<dyn Statter>>>,
    stats_prefix: Arc<RwLock<String>>,
}

impl Panel {
    pub fn new() -> Panel {
        Panel {
            circuits: RwLock::new(HashMap::new()),
            last_trip_ms: Arc::new(Mutex::new(HashMap::new())),
            statter: Arc::new(RwLock::new(Arc::new(NoopStatter) as Arc<dyn Statter>)),
            stats_prefix: Arc::new(RwLock::new(DEFAULT_STATS_PREFIX.to_string())),
        }
    }

    /// Replace the telemetry sink. Affects events dispatched from then on.
    pub fn set_statter(&self, statter: Arc<dyn Statter>) {
        *self.statter.write().unwrap() = statter;
    }

    /// Replace the metric name prefix (default `circuit`).
    pub fn set_stats_prefix(&self, prefix: &str) {
        *self.stats_prefix.write().unwrap() = prefix.to_string();
    }

    /// Register `breaker` under `name` and start forwarding its events to
    /// the statter. Re-using a name replaces the old entry and stops its
    /// dispatcher.
    pub fn add(&self, name: &str, breaker: Arc<Breaker>) {
        let stream = Arc::new(breaker.subscribe());
        let dispatcher = self.spawn_dispatcher(name.to_string(), Arc::clone(&stream));
        let replaced = self.circuits.write().unwrap().insert(
            name.to_string(),
            PanelEntry {
                breaker,
                stream,
                dispatcher: Some(dispatcher),
            },
        );
        if let Some(mut old) = replaced {
            logging::debug!("replacing breaker {:?} in panel", name);
            shutdown_entry(&mut old);
        }
    }

    /// Look up a breaker by name. Unknown names yield the shared no-op
    /// breaker, which never trips and passes every call through.
    pub fn get(&self, name: &str) -> (Arc<Breaker>, bool) {
        let circuits = self.circuits.read().unwrap();
        match circuits.get(name) {
            Some(entry) => (Arc::clone(&entry.breaker), true),
            None => (Arc::clone(&NOOP_BREAKER), false),
        }
    }

    /// A new panel holding the named entries; missing names map to the
    /// shared no-op breaker.
    pub fn get_all(&self, names: &[&str]) -> Panel {
        let panel = Panel::new();
        for name in names {
            let (breaker, _) = self.get(name);
            panel.add(name, breaker);
        }
        panel
    }

    /// Build and register a breaker per config entry; invalid entries are
    /// logged and skipped.
    pub fn load_config(&self, configs: Vec<BreakerConfig>) {
        for config in configs {
            match config.build() {
                Ok(breaker) => self.add(&config.name, Arc::new(breaker)),
                Err(err) => {
                    logging::warn!("ignoring invalid breaker config, reason: {}\n{}", err, config)
                }
            }
        }
    }

    pub fn len(&self) -> usize {
        self.circuits.read().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.circuits.read().unwrap().is_empty()
    }

    fn spawn_dispatcher(&self, name: String, stream: Arc<EventStream>) -> JoinHandle<()> {
        let statter = Arc::clone(&self.statter);
        let prefix = Arc::clone(&self.stats_prefix);
        let last_trip_ms = Arc::clone(&self.last_trip_ms);
        std::thread::spawn(move || {
            while let Ok(event) = stream.recv() {
                let sink = Arc::clone(&*statter.read().unwrap());
                let prefix = prefix.read().unwrap().clone();
                forward(&*sink, &prefix, &name, event, &last_trip_ms);
            }
        })
    }
}

fn metric_name(prefix: &str, name: &str, suffix: &str) -> String {
    format!("{}.{}.{}", prefix, name, suffix)
}

fn forward(
    statter: &dyn Statter,
    prefix: &str,
    name: &str,
    event: BreakerEvent,
    last_trip_ms: &Mutex<HashMap<String, u64>>,
) {
    match event {
        BreakerEvent::Tripped => {
            statter.counter(&metric_name(prefix, name, "tripped"), 1);
            last_trip_ms
                .lock()
                .unwrap()
                .insert(name.to_string(), utils::curr_time_millis());
        }
        BreakerEvent::Reset => {
            statter.counter(&metric_name(prefix, name, "reset"), 1);
            let tripped_at = last_trip_ms.lock().unwrap().remove(name);
            if let Some(tripped_at) = tripped_at {
                let elapsed = utils::curr_time_millis().saturating_sub(tripped_at);
                statter.timing(&metric_name(prefix, name, "trip-time"), elapsed);
            }
        }
        BreakerEvent::Fail => statter.counter(&metric_name(prefix, name, "fail"), 1),
        BreakerEvent::Ready => statter.counter(&metric_name(prefix, name, "ready"), 1),
    }
}

fn shutdown_entry(entry: &mut PanelEntry) {
    entry.stream.close();
    if let Some(handle) = entry.dispatcher.take() {
        let _ = handle.join();
    }
}

impl Default for Panel {
    fn default() -> Self {
        Panel::new()
    }
}

impl Drop for Panel {
    fn drop(&mut self) {
        let mut circuits = self.circuits.write().unwrap();
        for entry in circuits.values_mut() {
            shutdown_entry(entry);
        }
    }
}

impl fmt::Debug for Panel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Panel")
            .field("circuits", &self.len())
            .field("stats_prefix", &*self.stats_prefix.read().unwrap())
            .finish()
    }
}
