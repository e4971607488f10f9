use std::sync::Arc;
use std::sync::Mutex;

use serde::Serialize;
use tracing::warn;

/// In-process operational counters. Each replica keeps its own numbers;
/// nothing is persisted or shared across processes.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct TelemetryCounters {
    pub postings: usize,
    pub duplicate_postings: usize,
    pub reversals: usize,
    pub gate_denials: usize,
    pub settlement_transitions: usize,
    pub settlement_retries: usize,
    pub webhooks_acknowledged: usize,
    pub webhooks_rejected: usize,
    pub reconciliation_items: usize,
}

#[derive(Clone, Default)]
pub struct AggregatorTelemetry {
    inner: Arc<Mutex<TelemetryCounters>>,
}

impl AggregatorTelemetry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn update(&self, apply: impl FnOnce(&mut TelemetryCounters)) {
        match self.inner.lock() {
            Ok(mut counters) => apply(&mut counters),
            Err(_) => warn!("telemetry mutex poisoned; dropping counter update"),
        }
    }

    pub fn record_posting(&self, duplicate: bool) {
        self.update(|counters| {
            counters.postings += 1;
            if duplicate {
                counters.duplicate_postings += 1;
            }
        });
    }

    pub fn record_reversal(&self) {
        self.update(|counters| counters.reversals += 1);
    }

    pub fn record_gate_denial(&self) {
        self.update(|counters| counters.gate_denials += 1);
    }

    pub fn record_settlement_transition(&self) {
        self.update(|counters| counters.settlement_transitions += 1);
    }

    pub fn record_settlement_retry(&self) {
        self.update(|counters| counters.settlement_retries += 1);
    }

    pub fn record_webhook(&self, acknowledged: bool) {
        self.update(|counters| {
            if acknowledged {
                counters.webhooks_acknowledged += 1;
            } else {
                counters.webhooks_rejected += 1;
            }
        });
    }

    pub fn record_reconciliation_items(&self, count: usize) {
        self.update(|counters| counters.reconciliation_items += count);
    }

    #[must_use]
    pub fn snapshot(&self) -> TelemetryCounters {
        match self.inner.lock() {
            Ok(counters) => counters.clone(),
            Err(_) => TelemetryCounters::default(),
        }
    }
}
