//! Optional observability hooks.
//!
//! `metrics` registers OpenTelemetry instruments on the global meter; the
//! embedding application decides on the exporter. `tracing` adds spans.

#[cfg(feature = "metrics")]
pub use otel::{UpgradeMetrics, METRICS};

#[cfg(feature = "metrics")]
mod otel {
    use once_cell::sync::Lazy;
    use opentelemetry::metrics::{Counter, Histogram};
    use opentelemetry::{global, KeyValue};
    use std::time::Duration;

    pub static METRICS: Lazy<UpgradeMetrics> = Lazy::new(UpgradeMetrics::init);

    pub struct UpgradeMetrics {
        pub changesets_applied: Counter<u64>,
        pub upgrade_duration: Histogram<f64>,
        pub lock_contention: Counter<u64>,
        pub upgrade_failures: Counter<u64>,
    }

    impl UpgradeMetrics {
        pub fn init() -> Self {
            let meter = global::meter("tmmt");

            Self {
                changesets_applied: meter
                    .u64_counter("tmmt_changesets_applied_total")
                    .with_description("Changesets applied to target databases")
                    .build(),
                upgrade_duration: meter
                    .f64_histogram("tmmt_upgrade_duration_seconds")
                    .with_description("Duration of install/upgrade runs")
                    .build(),
                lock_contention: meter
                    .u64_counter("tmmt_lock_contention_total")
                    .with_description("Upgrade attempts rejected because the module lock was held")
                    .build(),
                upgrade_failures: meter
                    .u64_counter("tmmt_upgrade_failures_total")
                    .with_description("Install/upgrade runs rolled back")
                    .build(),
            }
        }

        pub fn record_upgrade(&self, module: &str, applied: usize, elapsed: Duration) {
            let attrs = [KeyValue::new("module", module.to_string())];
            self.changesets_applied.add(applied as u64, &attrs);
            self.upgrade_duration.record(elapsed.as_secs_f64(), &attrs);
        }

        pub fn record_failure(&self, module: &str) {
            self.upgrade_failures
                .add(1, &[KeyValue::new("module", module.to_string())]);
        }

        pub fn record_lock_contention(&self, module: &str) {
            self.lock_contention
                .add(1, &[KeyValue::new("module", module.to_string())]);
        }
    }
}

#[cfg(feature = "tracing")]
pub mod tracing_helpers {
    use tracing::{info_span, Span};

    pub fn begin_transaction_span() -> Span {
        info_span!("tmmt.transaction.begin")
    }

    pub fn commit_transaction_span() -> Span {
        info_span!("tmmt.transaction.commit")
    }

    pub fn rollback_transaction_span() -> Span {
        info_span!("tmmt.transaction.rollback")
    }

    pub fn execute_query_span(query: &str) -> Span {
        // Changeset scripts can be large; the span only carries the head
        let head: String = query.trim_start().chars().take(80).collect();
        info_span!("tmmt.query", sql = %head)
    }

    pub fn upgrade_span(module: &str) -> Span {
        info_span!("tmmt.upgrade", module = %module)
    }

    pub fn changeset_span(version: &str) -> Span {
        info_span!("tmmt.changeset", version = %version)
    }
}
