//! Protocol traffic counters.
//!
//! Commands are labelled by protocol domain (`Runtime`, `DOM`, `Page`) rather than by full
//! method name so the label set stays bounded; events keep their method name since the
//! runtime only consumes a fixed handful of them.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use lazy_static::lazy_static;
use prometheus::{core::Collector, histogram_opts, HistogramVec, IntCounterVec, Registry};
use tracing::error;

use crate::error::{AdapterError, AdapterErrorKind};

#[derive(Default, Clone, Copy, Debug, PartialEq, Eq)]
pub struct AdapterMetricsSnapshot {
    pub commands: u64,
    pub command_failures: u64,
    pub protocol_errors: u64,
    pub events: u64,
    pub command_latency_total_us: u64,
}

static COMMANDS: AtomicU64 = AtomicU64::new(0);
static COMMAND_FAILURES: AtomicU64 = AtomicU64::new(0);
static PROTOCOL_ERRORS: AtomicU64 = AtomicU64::new(0);
static EVENTS: AtomicU64 = AtomicU64::new(0);
static COMMAND_LATENCY_TOTAL_US: AtomicU64 = AtomicU64::new(0);

lazy_static! {
    static ref CDP_COMMANDS_TOTAL: IntCounterVec = IntCounterVec::new(
        prometheus::Opts::new(
            "soul_cdp_commands_total",
            "Protocol commands by domain and outcome"
        ),
        &["domain", "outcome"]
    )
    .unwrap();
    static ref CDP_COMMAND_DURATION: HistogramVec = HistogramVec::new(
        histogram_opts!(
            "soul_cdp_command_duration_seconds",
            "Round-trip latency of protocol commands",
            vec![0.001, 0.005, 0.01, 0.05, 0.1, 0.5, 1.0, 5.0, 30.0]
        ),
        &["domain"]
    )
    .unwrap();
    static ref CDP_EVENTS_TOTAL: IntCounterVec = IntCounterVec::new(
        prometheus::Opts::new("soul_cdp_events_total", "Browser events consumed"),
        &["method"]
    )
    .unwrap();
}

fn register<C>(registry: &Registry, collector: C)
where
    C: Collector + Clone + Send + Sync + 'static,
{
    if let Err(err) = registry.register(Box::new(collector.clone())) {
        if !matches!(err, prometheus::Error::AlreadyReg) {
            error!(?err, "failed to register cdp metric");
        }
    }
}

pub fn register_metrics(registry: &Registry) {
    register(registry, CDP_COMMANDS_TOTAL.clone());
    register(registry, CDP_COMMAND_DURATION.clone());
    register(registry, CDP_EVENTS_TOTAL.clone());
}

/// `Runtime.evaluate` -> `Runtime`.
pub fn domain_of(method: &str) -> &str {
    method.split_once('.').map_or(method, |(domain, _)| domain)
}

/// Records a finished command. Browser-side rejections count as protocol errors on top of
/// the failure.
pub fn record_command(method: &str, elapsed: Duration, result: Result<(), &AdapterError>) {
    let domain = domain_of(method);
    COMMANDS.fetch_add(1, Ordering::Relaxed);
    let micros = elapsed.as_micros().min(u64::MAX as u128) as u64;
    COMMAND_LATENCY_TOTAL_US.fetch_add(micros, Ordering::Relaxed);
    CDP_COMMAND_DURATION
        .with_label_values(&[domain])
        .observe(elapsed.as_secs_f64());
    let outcome = match result {
        Ok(()) => "ok",
        Err(err) => {
            COMMAND_FAILURES.fetch_add(1, Ordering::Relaxed);
            if err.kind == AdapterErrorKind::Protocol {
                PROTOCOL_ERRORS.fetch_add(1, Ordering::Relaxed);
                "protocol_error"
            } else {
                "failed"
            }
        }
    };
    CDP_COMMANDS_TOTAL
        .with_label_values(&[domain, outcome])
        .inc();
}

pub fn record_event(method: &str) {
    EVENTS.fetch_add(1, Ordering::Relaxed);
    CDP_EVENTS_TOTAL.with_label_values(&[method]).inc();
}

pub fn snapshot() -> AdapterMetricsSnapshot {
    AdapterMetricsSnapshot {
        commands: COMMANDS.load(Ordering::Relaxed),
        command_failures: COMMAND_FAILURES.load(Ordering::Relaxed),
        protocol_errors: PROTOCOL_ERRORS.load(Ordering::Relaxed),
        events: EVENTS.load(Ordering::Relaxed),
        command_latency_total_us: COMMAND_LATENCY_TOTAL_US.load(Ordering::Relaxed),
    }
}

pub fn reset() {
    for counter in [
        &COMMANDS,
        &COMMAND_FAILURES,
        &PROTOCOL_ERRORS,
        &EVENTS,
        &COMMAND_LATENCY_TOTAL_US,
    ] {
        counter.store(0, Ordering::Relaxed);
    }
}
