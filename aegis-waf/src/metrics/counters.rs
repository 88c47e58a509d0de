use once_cell::sync::Lazy;
use prometheus::{
    register_histogram_vec, register_int_counter, register_int_counter_vec, register_int_gauge_vec,
    HistogramVec, IntCounter, IntCounterVec, IntGaugeVec,
};

use crate::config::ConfigVersion;

pub static HTTP_REQUESTS_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!("waf_http_requests_total", "Total HTTP requests handled", &["host"])
        .expect("register waf_http_requests_total")
});

pub static HTTP_REQUEST_DURATION_SECONDS: Lazy<HistogramVec> = Lazy::new(|| {
    let buckets = vec![0.001, 0.002, 0.005, 0.01, 0.02, 0.05, 0.1, 0.2, 0.5, 1.0, 2.0, 5.0];
    register_histogram_vec!(
        "waf_http_request_duration_seconds",
        "End-to-end request latency in seconds, by final decision",
        &["decision"],
        buckets
    )
    .expect("register waf_http_request_duration_seconds")
});

pub static DECISIONS_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!("waf_decisions_total", "Verdicts returned by the rule engine", &["decision"])
        .expect("register waf_decisions_total")
});

pub static RATE_LIMITED_TOTAL: Lazy<IntCounter> = Lazy::new(|| {
    register_int_counter!("waf_rate_limited_total", "Requests rejected by the rate limiter")
        .expect("register waf_rate_limited_total")
});

pub static UPSTREAM_ERRORS_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "upstream_errors_total",
        "Forwarding failures, by error_type",
        &["error_type"]
    )
    .expect("register upstream_errors_total")
});

pub static CONFIG_VERSION_INFO: Lazy<IntGaugeVec> = Lazy::new(|| {
    register_int_gauge_vec!(
        "waf_config_version_info",
        "Presence series for the currently loaded config version",
        &["version"]
    )
    .expect("register waf_config_version_info")
});

pub static CONFIG_RELOAD_SUCCESS_TOTAL: Lazy<IntCounter> = Lazy::new(|| {
    register_int_counter!("waf_config_reload_success_total", "Successful config (re)loads")
        .expect("register waf_config_reload_success_total")
});

pub static CONFIG_RELOAD_FAILURE_TOTAL: Lazy<IntCounter> = Lazy::new(|| {
    register_int_counter!(
        "waf_config_reload_failure_total",
        "Rejected or unreachable control-plane reload attempts"
    )
    .expect("register waf_config_reload_failure_total")
});

pub static CONFIG_LAST_RELOAD_TIMESTAMP_SECONDS: Lazy<IntGaugeVec> = Lazy::new(|| {
    register_int_gauge_vec!(
        "waf_config_last_reload_timestamp_seconds",
        "Unix timestamp of the last successful reload",
        &["version"]
    )
    .expect("register waf_config_last_reload_timestamp_seconds")
});

#[inline]
pub fn inc_request(host: &str) {
    HTTP_REQUESTS_TOTAL.with_label_values(&[host]).inc();
}

#[inline]
pub fn observe_duration(decision: &str, secs: f64) {
    HTTP_REQUEST_DURATION_SECONDS.with_label_values(&[decision]).observe(secs);
}

#[inline]
pub fn inc_decision(decision: &str) {
    DECISIONS_TOTAL.with_label_values(&[decision]).inc();
}

#[inline]
pub fn inc_rate_limited() {
    RATE_LIMITED_TOTAL.inc();
}

#[inline]
pub fn inc_upstream_error(error_type: &str) {
    UPSTREAM_ERRORS_TOTAL.with_label_values(&[error_type]).inc();
}

#[inline]
pub fn inc_config_reload_failure() {
    CONFIG_RELOAD_FAILURE_TOTAL.inc();
}

/// §4.H "Version exposure". The gauge's value doesn't carry meaning beyond
/// presence — `set(1)` just makes the version's label series exist.
pub fn observe_reload(version: &ConfigVersion) {
    CONFIG_VERSION_INFO.with_label_values(&[version.version_hash.as_str()]).set(1);
    CONFIG_RELOAD_SUCCESS_TOTAL.inc();
    CONFIG_LAST_RELOAD_TIMESTAMP_SECONDS
        .with_label_values(&[version.version_hash.as_str()])
        .set(version.loaded_at.timestamp());
}
