//! Prometheus metrics for the daemon.
//!
//! # Metrics
//!
//! - `courier_transitions_total{to}` - Committed status transitions
//! - `courier_ledger_postings_total` - Settlement entries written
//! - `courier_ledger_reversals_total` - Entries rolled back on reopen
//! - `courier_settlement_skips_total` - Postings skipped by the idempotency guard
//! - `courier_api_errors_total{code}` - API errors by machine code
//! - `courier_events_forwarded_total` - Store events forwarded to the bus
//!
//! Every collector lives in the daemon's own `Registry`, so several
//! daemons (tests) can coexist in one process.

use std::sync::Arc;

use prometheus::{Encoder, IntCounter, IntCounterVec, Opts, Registry, TextEncoder};

use courier_exec::TransitionReport;

use crate::error::{DaemonError, DaemonResult};

/// Metrics collector
#[derive(Clone)]
pub struct Metrics {
    /// Committed transitions by target status
    pub transitions_total: IntCounterVec,

    /// Settlement entries written
    pub postings_total: IntCounter,

    /// Entries rolled back
    pub reversals_total: IntCounter,

    /// Postings skipped as already present
    pub skips_total: IntCounter,

    /// API errors by code
    pub api_errors_total: IntCounterVec,

    /// Store events forwarded to the event bus
    pub events_forwarded_total: IntCounter,

    /// Prometheus registry
    pub registry: Arc<Registry>,
}

impl Metrics {
    /// Create new metrics collector
    pub fn new() -> DaemonResult<Self> {
        let registry = Arc::new(Registry::new());

        let transitions_total = IntCounterVec::new(
            Opts::new("courier_transitions_total", "Committed order status transitions"),
            &["to"],
        )?;
        registry.register(Box::new(transitions_total.clone()))?;

        let postings_total =
            IntCounter::new("courier_ledger_postings_total", "Settlement entries written")?;
        registry.register(Box::new(postings_total.clone()))?;

        let reversals_total =
            IntCounter::new("courier_ledger_reversals_total", "Ledger entries rolled back")?;
        registry.register(Box::new(reversals_total.clone()))?;

        let skips_total = IntCounter::new(
            "courier_settlement_skips_total",
            "Settlement postings skipped because they were already present",
        )?;
        registry.register(Box::new(skips_total.clone()))?;

        let api_errors_total = IntCounterVec::new(
            Opts::new("courier_api_errors_total", "API errors by machine code"),
            &["code"],
        )?;
        registry.register(Box::new(api_errors_total.clone()))?;

        let events_forwarded_total = IntCounter::new(
            "courier_events_forwarded_total",
            "Store events forwarded to the event bus",
        )?;
        registry.register(Box::new(events_forwarded_total.clone()))?;

        Ok(Self {
            transitions_total,
            postings_total,
            reversals_total,
            skips_total,
            api_errors_total,
            events_forwarded_total,
            registry,
        })
    }

    /// Record a committed transition
    pub fn record_transition(&self, report: &TransitionReport) {
        self.transitions_total.with_label_values(&[report.transition.to.name()]).inc();
        self.postings_total.inc_by(report.posted.len() as u64);
        self.reversals_total.inc_by(report.reversed.len() as u64);
        self.skips_total.inc_by(report.skipped.len() as u64);
    }

    /// Record an API error
    pub fn record_error(&self, code: &str) {
        self.api_errors_total.with_label_values(&[code]).inc();
    }

    /// Render the registry in the Prometheus text format
    pub fn render(&self) -> DaemonResult<String> {
        let mut buffer = Vec::new();
        TextEncoder::new().encode(&self.registry.gather(), &mut buffer)?;
        String::from_utf8(buffer).map_err(|e| DaemonError::Config(format!("metrics output: {}", e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_independent_registries() {
        let a = Metrics::new().unwrap();
        let b = Metrics::new().unwrap();

        a.record_error("not_found");
        assert_eq!(a.api_errors_total.with_label_values(&["not_found"]).get(), 1);
        assert_eq!(b.api_errors_total.with_label_values(&["not_found"]).get(), 0);
    }

    #[test]
    fn test_render_contains_counters() {
        let metrics = Metrics::new().unwrap();
        metrics.postings_total.inc_by(3);
        metrics.record_error("invalid_transition");

        let text = metrics.render().unwrap();
        assert!(text.contains("courier_ledger_postings_total 3"));
        assert!(text.contains("courier_api_errors_total{code=\"invalid_transition\"} 1"));
    }
}
