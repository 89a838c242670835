//! Prometheus metrics for the Watchpost server.

use prometheus_client::encoding::EncodeLabelSet;
use prometheus_client::metrics::counter::Counter;
use prometheus_client::metrics::family::Family;
use prometheus_client::metrics::gauge::Gauge;
use prometheus_client::metrics::histogram::{exponential_buckets, Histogram};
use prometheus_client::registry::Registry;
use std::time::Duration;

use watchpost::{ExecutionResult, ExecutorStatistics};

/// Labels for per-state result metrics
#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct StateLabels {
    /// Result state (OK, WARN, CRIT, UNKNOWN)
    pub state: String,
}

/// Metrics registry with all Watchpost server metrics
pub struct ServerMetrics {
    /// Prometheus registry
    pub registry: Registry,

    /// Polls served
    polls_total: Counter,
    /// Poll duration
    poll_duration_seconds: Histogram,
    /// Results emitted, by state
    results_total: Family<StateLabels, Counter>,

    /// Executor gauges, refreshed on scrape
    executor_running: Gauge,
    executor_completed: Gauge,
    executor_errored: Gauge,
}

impl ServerMetrics {
    pub fn new() -> Self {
        let mut registry = Registry::with_prefix("watchpost");

        let polls_total = Counter::default();
        registry.register("polls", "Polls served", polls_total.clone());

        let poll_duration_seconds = Histogram::new(exponential_buckets(0.01, 2.0, 12));
        registry.register(
            "poll_duration_seconds",
            "Wall-clock duration of one poll",
            poll_duration_seconds.clone(),
        );

        let results_total = Family::<StateLabels, Counter>::default();
        registry.register(
            "results",
            "Execution results emitted, by state",
            results_total.clone(),
        );

        let executor_running = Gauge::default();
        registry.register(
            "executor_running",
            "Jobs currently in flight",
            executor_running.clone(),
        );

        let executor_completed = Gauge::default();
        registry.register(
            "executor_completed",
            "Jobs completed since startup",
            executor_completed.clone(),
        );

        let executor_errored = Gauge::default();
        registry.register(
            "executor_errored",
            "Jobs errored since startup",
            executor_errored.clone(),
        );

        Self {
            registry,
            polls_total,
            poll_duration_seconds,
            results_total,
            executor_running,
            executor_completed,
            executor_errored,
        }
    }

    /// Record one completed poll.
    pub fn record_poll(&self, duration: Duration, results: &[ExecutionResult]) {
        self.polls_total.inc();
        self.poll_duration_seconds.observe(duration.as_secs_f64());
        for result in results {
            self.results_total
                .get_or_create(&StateLabels {
                    state: result.state.to_string(),
                })
                .inc();
        }
    }

    /// Refresh the executor gauges from a statistics snapshot.
    pub fn update_executor(&self, stats: ExecutorStatistics) {
        self.executor_running.set(stats.running as i64);
        self.executor_completed.set(stats.completed as i64);
        self.executor_errored.set(stats.errored as i64);
    }
}

impl Default for ServerMetrics {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;
    use watchpost::{CheckId, CheckState};

    fn result(state: CheckState) -> ExecutionResult {
        ExecutionResult {
            check_id: CheckId::new("tests.metric"),
            piggyback_host: "host".to_string(),
            service_name: "Service".to_string(),
            service_labels: BTreeMap::new(),
            environment: "prod".to_string(),
            state,
            summary: "s".to_string(),
            details: String::new(),
            metrics: Vec::new(),
        }
    }

    #[test]
    fn poll_recording_does_not_panic() {
        let metrics = ServerMetrics::new();
        metrics.record_poll(
            Duration::from_millis(120),
            &[result(CheckState::Ok), result(CheckState::Crit)],
        );
        metrics.update_executor(ExecutorStatistics {
            running: 1,
            completed: 10,
            errored: 2,
        });
    }
}
