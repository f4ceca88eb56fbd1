//! Ambient observability (C10): thin wrappers over the `metrics` crate's
//! macros, mirroring the observable counters from the data model. Recorder
//! installation (e.g. a Prometheus exporter) is the host binary's job; this
//! module only records.

use std::time::Duration;

pub fn inc_paused_history() {
    metrics::counter!("consumer_runner_paused_history_total").increment(1);
}

pub fn inc_unpaused_history() {
    metrics::counter!("consumer_runner_unpaused_history_total").increment(1);
}

pub fn inc_post_commit(units: u64) {
    metrics::counter!("consumer_runner_units_committed_total").increment(units);
}

pub fn record_process_latency(latency: Duration) {
    metrics::histogram!("consumer_runner_process_latency_ms").record(latency.as_secs_f64() * 1000.0);
}

pub fn inc_fatal() {
    metrics::counter!("consumer_runner_fatal_total").increment(1);
}

#[cfg(test)]
mod tests {
    use super::*;
    use metrics_exporter_prometheus::PrometheusBuilder;

    // Installing the recorder is process-global and can only happen once, so
    // this crate's other tests must never call the `metrics::*!` macros
    // directly -- they go through the wrapper functions above, which behave
    // identically with or without a recorder installed.
    #[test]
    fn wrapper_functions_emit_under_their_documented_names() {
        let handle = PrometheusBuilder::new().install_recorder().unwrap();

        inc_paused_history();
        inc_unpaused_history();
        inc_post_commit(3);
        inc_fatal();
        record_process_latency(Duration::from_millis(5));

        let rendered = handle.render();
        assert!(rendered.contains("consumer_runner_paused_history_total"));
        assert!(rendered.contains("consumer_runner_unpaused_history_total"));
        assert!(rendered.contains("consumer_runner_units_committed_total"));
        assert!(rendered.contains("consumer_runner_fatal_total"));
        assert!(rendered.contains("consumer_runner_process_latency_ms"));
    }
}
