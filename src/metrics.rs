//! Metrics wiring.
//!
//! Thin wrappers around the `metrics` facade so call sites read like the
//! domain ("a claim happened") rather than the sink. Installed once at
//! startup via [`install_recorder`]; every call site after that is a no-op
//! until a recorder is installed, per the `metrics` crate's design.

use metrics_exporter_prometheus::PrometheusBuilder;

/// Install the process-wide Prometheus recorder and return a handle whose
/// `render()` produces the text exposition format for `GET /metrics`.
pub fn install_recorder() -> metrics_exporter_prometheus::PrometheusHandle {
    PrometheusBuilder::new()
        .install_recorder()
        .expect("failed to install metrics recorder")
}

/// Record a cache read outcome.
pub fn record_cache_lookup(hit: bool) {
    if hit {
        metrics::counter!("cache_hits_total").increment(1);
    } else {
        metrics::counter!("cache_misses_total").increment(1);
    }
}

/// Record a dispatched inbound message by its `type`.
pub fn record_message(message_type: &'static str) {
    metrics::counter!("messages_total", "type" => message_type).increment(1);
}

/// Record an error reply by kind.
pub fn record_error(kind: &'static str) {
    metrics::counter!("errors_total", "kind" => kind).increment(1);
}

/// Record a rejected-for-rate-limit message.
pub fn record_rate_limited() {
    metrics::counter!("rate_limited_total").increment(1);
}

/// Record a subscriber evicted for outbound buffer overflow.
pub fn record_buffer_overflow() {
    metrics::counter!("buffer_overflow_total").increment(1);
}

/// Record a Store optimistic-update retry.
pub fn record_store_retry() {
    metrics::counter!("store_retries_total").increment(1);
}

/// Record a session restored on startup.
pub fn record_session_restored() {
    metrics::counter!("sessions_restored_total").increment(1);
}

/// Record a session closed by idle cleanup.
pub fn record_session_closed(reason: &'static str) {
    metrics::counter!("sessions_closed_total", "reason" => reason).increment(1);
}

/// Update the in-memory session gauge.
pub fn set_sessions_in_memory(count: f64) {
    metrics::gauge!("sessions_in_memory").set(count);
}
