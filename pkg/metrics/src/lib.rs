use std::collections::BTreeMap;
use std::fmt::Write;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

/// Object writes performed by the applier.
pub const APPLY_WRITES_TOTAL: &str = "virtrs_apply_writes_total";
/// Applies that ended in an error.
pub const APPLY_ERRORS_TOTAL: &str = "virtrs_apply_errors_total";
/// Mounted-by label writes on claims.
pub const PVC_LABEL_WRITES_TOTAL: &str = "virtrs_pvc_label_writes_total";
/// Requests rejected with 401.
pub const AUTH_REJECTIONS_TOTAL: &str = "virtrs_auth_rejections_total";
/// Requests continued under the unauthenticated identity.
pub const AUTH_UNAUTHENTICATED_TOTAL: &str = "virtrs_auth_unauthenticated_total";
/// Open watch streams.
pub const WATCH_STREAMS: &str = "virtrs_watch_streams";

/// A lightweight, thread-safe metrics registry that renders in Prometheus text exposition format.
///
/// Updates to unregistered names are ignored.
pub struct MetricsRegistry {
    counters: RwLock<BTreeMap<String, Counter>>,
    gauges: RwLock<BTreeMap<String, Gauge>>,
}

/// Monotonically increasing counter.
pub struct Counter {
    value: AtomicU64,
    help: String,
}

/// Value that can go up or down.
pub struct Gauge {
    value: AtomicI64,
    help: String,
}

// Metric values are atomics, so a panic while holding a guard cannot leave a
// half-written entry behind; recover the map instead of propagating the poison.
fn read<T>(lock: &RwLock<T>) -> RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(PoisonError::into_inner)
}

fn write<T>(lock: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(PoisonError::into_inner)
}

impl MetricsRegistry {
    pub fn new() -> Self {
        Self {
            counters: RwLock::new(BTreeMap::new()),
            gauges: RwLock::new(BTreeMap::new()),
        }
    }

    /// A registry with every server metric registered.
    pub fn with_defaults() -> Self {
        let registry = Self::new();
        registry.register_counter(APPLY_WRITES_TOTAL, "Object writes performed by the applier");
        registry.register_counter(APPLY_ERRORS_TOTAL, "Owner set applies that failed");
        registry.register_counter(
            PVC_LABEL_WRITES_TOTAL,
            "Mounted-by label writes on persistent volume claims",
        );
        registry.register_counter(AUTH_REJECTIONS_TOTAL, "Requests rejected as unauthorized");
        registry.register_counter(
            AUTH_UNAUTHENTICATED_TOTAL,
            "Requests continued as system:unauthenticated",
        );
        registry.register_gauge(WATCH_STREAMS, "Open watch event streams");
        registry
    }

    /// Register a counter. If it already exists, this is a no-op.
    pub fn register_counter(&self, name: &str, help: &str) {
        write(&self.counters)
            .entry(name.to_string())
            .or_insert_with(|| Counter {
                value: AtomicU64::new(0),
                help: help.to_string(),
            });
    }

    /// Register a gauge. If it already exists, this is a no-op.
    pub fn register_gauge(&self, name: &str, help: &str) {
        write(&self.gauges)
            .entry(name.to_string())
            .or_insert_with(|| Gauge {
                value: AtomicI64::new(0),
                help: help.to_string(),
            });
    }

    pub fn counter_inc(&self, name: &str) {
        self.counter_add(name, 1);
    }

    pub fn counter_add(&self, name: &str, val: u64) {
        if let Some(c) = read(&self.counters).get(name) {
            c.value.fetch_add(val, Ordering::Relaxed);
        }
    }

    pub fn counter_get(&self, name: &str) -> Option<u64> {
        read(&self.counters)
            .get(name)
            .map(|c| c.value.load(Ordering::Relaxed))
    }

    pub fn gauge_set(&self, name: &str, val: i64) {
        if let Some(g) = read(&self.gauges).get(name) {
            g.value.store(val, Ordering::Relaxed);
        }
    }

    pub fn gauge_inc(&self, name: &str) {
        if let Some(g) = read(&self.gauges).get(name) {
            g.value.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn gauge_dec(&self, name: &str) {
        if let Some(g) = read(&self.gauges).get(name) {
            g.value.fetch_sub(1, Ordering::Relaxed);
        }
    }

    pub fn gauge_get(&self, name: &str) -> Option<i64> {
        read(&self.gauges)
            .get(name)
            .map(|g| g.value.load(Ordering::Relaxed))
    }

    /// Render all metrics in Prometheus text exposition format.
    pub fn render(&self) -> String {
        let mut output = String::new();

        for (name, counter) in read(&self.counters).iter() {
            let _ = writeln!(output, "# HELP {} {}", name, counter.help);
            let _ = writeln!(output, "# TYPE {} counter", name);
            let _ = writeln!(output, "{} {}", name, counter.value.load(Ordering::Relaxed));
        }

        for (name, gauge) in read(&self.gauges).iter() {
            let _ = writeln!(output, "# HELP {} {}", name, gauge.help);
            let _ = writeln!(output, "# TYPE {} gauge", name);
            let _ = writeln!(output, "{} {}", name, gauge.value.load(Ordering::Relaxed));
        }

        output
    }
}

impl Default for MetricsRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn renders_registered_metrics() {
        let registry = MetricsRegistry::with_defaults();
        registry.counter_add(APPLY_WRITES_TOTAL, 3);
        registry.counter_inc(APPLY_WRITES_TOTAL);
        registry.gauge_inc(WATCH_STREAMS);
        registry.gauge_inc(WATCH_STREAMS);
        registry.gauge_dec(WATCH_STREAMS);

        let text = registry.render();
        assert!(text.contains("# TYPE virtrs_apply_writes_total counter\n"));
        assert!(text.contains("virtrs_apply_writes_total 4\n"));
        assert!(text.contains("virtrs_watch_streams 1\n"));
    }

    #[test]
    fn unregistered_names_are_ignored() {
        let registry = MetricsRegistry::new();
        registry.counter_inc("nope");
        registry.gauge_set("nope", 5);
        assert_eq!(registry.counter_get("nope"), None);
        assert!(registry.render().is_empty());
    }

    #[test]
    fn re_registering_keeps_value() {
        let registry = MetricsRegistry::new();
        registry.register_counter("c", "first");
        registry.counter_inc("c");
        registry.register_counter("c", "second");
        assert_eq!(registry.counter_get("c"), Some(1));
        assert!(registry.render().contains("# HELP c first"));
    }
}
