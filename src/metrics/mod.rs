//! Metrics module
//!
//! Prometheus metrics for authentication outcomes and the issuer trust cache.
//! Served in text format by the `/metrics` route of the HTTP server.

use lazy_static::lazy_static;
use prometheus::{
    register_counter, register_counter_vec, register_histogram, Counter, CounterVec, Encoder,
    Histogram, TextEncoder,
};

lazy_static! {
    // Auth metrics
    pub static ref AUTH_ATTEMPTS: CounterVec = register_counter_vec!(
        "tenant_gate_auth_attempts_total",
        "Authentication attempts",
        &["outcome", "reason"]
    ).unwrap();

    // Issuer cache metrics
    pub static ref ISSUER_FETCHES: CounterVec = register_counter_vec!(
        "tenant_gate_issuer_fetches_total",
        "Issuer metadata and key set fetches",
        &["result"]
    ).unwrap();

    pub static ref ISSUER_FETCH_DURATION: Histogram = register_histogram!(
        "tenant_gate_issuer_fetch_duration_seconds",
        "Issuer fetch duration in seconds",
        vec![0.01, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0]
    ).unwrap();

    pub static ref CACHE_LOOKUPS: CounterVec = register_counter_vec!(
        "tenant_gate_cache_lookups_total",
        "Issuer cache lookups",
        &["result"]  // "hit", "miss" or "stale"
    ).unwrap();

    pub static ref KEY_REFRESHES: Counter = register_counter!(
        "tenant_gate_forced_key_refreshes_total",
        "Forced issuer refreshes after a signing key miss"
    ).unwrap();
}

/// Record an authentication attempt
///
/// `reason` is `"none"` for successful attempts.
pub fn record_auth_attempt(success: bool, reason: &str) {
    let outcome = if success { "success" } else { "failure" };
    AUTH_ATTEMPTS.with_label_values(&[outcome, reason]).inc();
}

/// Record the result of an issuer fetch
pub fn record_issuer_fetch(success: bool, duration_secs: f64) {
    let result = if success { "success" } else { "failure" };
    ISSUER_FETCHES.with_label_values(&[result]).inc();
    ISSUER_FETCH_DURATION.observe(duration_secs);
}

/// Record an issuer cache lookup
pub fn record_cache_lookup(result: &str) {
    CACHE_LOOKUPS.with_label_values(&[result]).inc();
}

/// Record a forced refresh caused by a key miss
pub fn record_key_refresh() {
    KEY_REFRESHES.inc();
}

/// Encode all registered metrics in the Prometheus text format
///
/// Returns the body and its content type.
pub fn encode_text() -> Result<(Vec<u8>, String), prometheus::Error> {
    let encoder = TextEncoder::new();
    let mut buffer = Vec::new();
    encoder.encode(&prometheus::gather(), &mut buffer)?;
    Ok((buffer, encoder.format_type().to_string()))
}
