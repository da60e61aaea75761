use std::sync::atomic::{AtomicU64, Ordering};

use cdp_adapter::metrics as cdp_metrics;
use lazy_static::lazy_static;
use once_cell::sync::{Lazy, OnceCell};
use prometheus::{core::Collector, opts, IntCounter, IntCounterVec, IntGauge, Registry};
use tracing::error;

static GLOBAL_REGISTRY: Lazy<Registry> = Lazy::new(Registry::new);
static REGISTER_ONCE: OnceCell<()> = OnceCell::new();

static HANDLES_RELEASED: AtomicU64 = AtomicU64::new(0);
static RELEASE_FAILURES: AtomicU64 = AtomicU64::new(0);
static HANDLES_DISCARDED: AtomicU64 = AtomicU64::new(0);

lazy_static! {
    static ref DOM_HANDLES_RELEASED_TOTAL: IntCounter = IntCounter::new(
        "soul_dom_handles_released_total",
        "Remote objects released through handle disposal"
    )
    .unwrap();
    static ref DOM_HANDLE_RELEASE_FAILURES_TOTAL: IntCounter = IntCounter::new(
        "soul_dom_handle_release_failures_total",
        "Remote releases the browser rejected"
    )
    .unwrap();
    static ref DOM_HANDLES_DISCARDED_TOTAL: IntCounter = IntCounter::new(
        "soul_dom_handles_discarded_total",
        "Remote objects released because no wrapper could represent them"
    )
    .unwrap();
    static ref DOM_WAIT_TASKS_TOTAL: IntCounterVec = IntCounterVec::new(
        opts!("soul_dom_wait_tasks_total", "Wait tasks grouped by outcome"),
        &["outcome"]
    )
    .unwrap();
    static ref DOM_FRAMES_TOTAL: IntGauge =
        IntGauge::new("soul_dom_frames_total", "Frames currently attached").unwrap();
}

#[derive(Default, Clone, Copy, Debug, PartialEq, Eq)]
pub struct RuntimeMetricsSnapshot {
    pub handles_released: u64,
    pub release_failures: u64,
    pub handles_discarded: u64,
}

fn register<C>(registry: &Registry, collector: C)
where
    C: Collector + Clone + Send + Sync + 'static,
{
    if let Err(err) = registry.register(Box::new(collector.clone())) {
        if !matches!(err, prometheus::Error::AlreadyReg) {
            error!(?err, "failed to register dom runtime metric");
        }
    }
}

pub fn global_registry() -> &'static Registry {
    &GLOBAL_REGISTRY
}

/// Registers runtime and adapter collectors on the process-wide registry.
pub fn register_metrics() {
    REGISTER_ONCE.get_or_init(|| {
        let registry = global_registry();
        register(registry, DOM_HANDLES_RELEASED_TOTAL.clone());
        register(registry, DOM_HANDLE_RELEASE_FAILURES_TOTAL.clone());
        register(registry, DOM_HANDLES_DISCARDED_TOTAL.clone());
        register(registry, DOM_WAIT_TASKS_TOTAL.clone());
        register(registry, DOM_FRAMES_TOTAL.clone());
        cdp_metrics::register_metrics(registry);
    });
}

pub fn record_handle_released() {
    HANDLES_RELEASED.fetch_add(1, Ordering::Relaxed);
    DOM_HANDLES_RELEASED_TOTAL.inc();
}

pub fn record_release_failure() {
    RELEASE_FAILURES.fetch_add(1, Ordering::Relaxed);
    DOM_HANDLE_RELEASE_FAILURES_TOTAL.inc();
}

pub fn record_handle_discarded() {
    HANDLES_DISCARDED.fetch_add(1, Ordering::Relaxed);
    DOM_HANDLES_DISCARDED_TOTAL.inc();
}

pub fn record_wait_outcome(outcome: &str) {
    DOM_WAIT_TASKS_TOTAL.with_label_values(&[outcome]).inc();
}

pub fn set_frame_count(count: usize) {
    DOM_FRAMES_TOTAL.set(count as i64);
}

pub fn snapshot() -> RuntimeMetricsSnapshot {
    RuntimeMetricsSnapshot {
        handles_released: HANDLES_RELEASED.load(Ordering::Relaxed),
        release_failures: RELEASE_FAILURES.load(Ordering::Relaxed),
        handles_discarded: HANDLES_DISCARDED.load(Ordering::Relaxed),
    }
}

pub fn reset() {
    HANDLES_RELEASED.store(0, Ordering::Relaxed);
    RELEASE_FAILURES.store(0, Ordering::Relaxed);
    HANDLES_DISCARDED.store(0, Ordering::Relaxed);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counters_are_monotonic_and_registered() {
        let before = snapshot();
        record_handle_released();
        record_release_failure();
        record_handle_discarded();
        record_wait_outcome("succeeded");
        let after = snapshot();
        assert!(after.handles_released > before.handles_released);
        assert!(after.release_failures > before.release_failures);
        assert!(after.handles_discarded > before.handles_discarded);

        register_metrics();
        let families = global_registry().gather();
        assert!(families
            .iter()
            .any(|family| family.get_name() == "soul_dom_wait_tasks_total"));
    }
}
