//! Event Store Metrics
//!
//! Prometheus counters for appends, retries and rejected writes.

use prometheus::{IntCounter, IntCounterVec, Opts, Registry, TextEncoder};

/// Metrics registry owned by one or more event stores
#[derive(Clone)]
pub struct EventStoreMetrics {
    registry: Registry,

    /// Events persisted, by aggregate type
    pub events_appended: IntCounterVec,
    /// Retry attempts (not counting the first attempt), by operation
    pub retries: IntCounterVec,
    /// Write operations that failed for good, by operation
    pub failures: IntCounterVec,
    /// Writes rejected by the open circuit breaker
    pub circuit_rejections: IntCounter,
}

impl EventStoreMetrics {
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new();

        let events_appended = IntCounterVec::new(
            Opts::new("events_appended_total", "Total events appended to the event store"),
            &["aggregate_type"],
        )?;
        registry.register(Box::new(events_appended.clone()))?;

        let retries = IntCounterVec::new(
            Opts::new("event_store_retries_total", "Retry attempts of event store writes"),
            &["operation"],
        )?;
        registry.register(Box::new(retries.clone()))?;

        let failures = IntCounterVec::new(
            Opts::new("event_store_failures_total", "Event store writes that failed"),
            &["operation"],
        )?;
        registry.register(Box::new(failures.clone()))?;

        let circuit_rejections = IntCounter::new(
            "circuit_breaker_rejections_total",
            "Event store writes rejected by the open circuit breaker",
        )?;
        registry.register(Box::new(circuit_rejections.clone()))?;

        Ok(Self {
            registry,
            events_appended,
            retries,
            failures,
            circuit_rejections,
        })
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Render all metrics in the Prometheus text exposition format
    pub fn render(&self) -> Result<String, prometheus::Error> {
        TextEncoder::new().encode_to_string(&self.registry.gather())
    }
}
