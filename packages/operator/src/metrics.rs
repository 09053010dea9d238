//! Prometheus metrics for the bridge operator
//!
//! Exposes metrics on /metrics endpoint for Prometheus scraping.

use lazy_static::lazy_static;
use prometheus::{
    register_counter_vec, register_gauge, register_gauge_vec, register_histogram_vec, CounterVec,
    Gauge, GaugeVec, HistogramVec,
};

lazy_static! {
    // Confirmation tracking
    pub static ref OBSERVATIONS: CounterVec = register_counter_vec!(
        "bridge_operator_observations_total",
        "Confirmation checks by resulting status",
        &["status"]
    ).unwrap();

    // Allocation
    pub static ref ALLOCATIONS: CounterVec = register_counter_vec!(
        "bridge_operator_allocations_total",
        "Allocation attempts by result code",
        &["result"]
    ).unwrap();

    pub static ref TRANSFER_ATTEMPTS: CounterVec = register_counter_vec!(
        "bridge_operator_transfer_attempts_total",
        "Vault release broadcasts by outcome",
        &["outcome"]
    ).unwrap();

    pub static ref ALLOCATION_LATENCY: HistogramVec = register_histogram_vec!(
        "bridge_operator_allocation_latency_seconds",
        "Time from allocation request to persisted destination hash",
        &["token"],
        vec![0.5, 1.0, 2.0, 5.0, 10.0, 30.0, 60.0, 120.0]
    ).unwrap();

    pub static ref VOLUME_ALLOCATED: CounterVec = register_counter_vec!(
        "bridge_operator_volume_allocated_total",
        "Net amount released (in vault base units)",
        &["token"]
    ).unwrap();

    pub static ref FEES_COLLECTED: CounterVec = register_counter_vec!(
        "bridge_operator_fees_collected_total",
        "Fees withheld (in vault base units)",
        &["token"]
    ).unwrap();

    // Claims
    pub static ref CLAIMS_ISSUED: CounterVec = register_counter_vec!(
        "bridge_operator_claims_issued_total",
        "Claim requests by result (signed, reissued, rejected)",
        &["result"]
    ).unwrap();

    // Worker backlog
    pub static ref BACKLOG: GaugeVec = register_gauge_vec!(
        "bridge_operator_backlog",
        "Records waiting on the worker",
        &["queue"]
    ).unwrap();

    // Health metrics
    pub static ref UP: Gauge = register_gauge!(
        "bridge_operator_up",
        "Whether the operator is up and running"
    ).unwrap();
}

/// Record the status an observation resolved to
pub fn record_observation(status: &str) {
    OBSERVATIONS.with_label_values(&[status]).inc();
}

/// Record an allocation outcome by code (`ALLOCATED` on success)
pub fn record_allocation(result: &str) {
    ALLOCATIONS.with_label_values(&[result]).inc();
}

/// Record a completed allocation
pub fn record_allocated(token: &str, net: u128, fee: u128, seconds: f64) {
    VOLUME_ALLOCATED
        .with_label_values(&[token])
        .inc_by(net as f64);
    FEES_COLLECTED.with_label_values(&[token]).inc_by(fee as f64);
    ALLOCATION_LATENCY
        .with_label_values(&[token])
        .observe(seconds);
}

/// Record one release broadcast
pub fn record_transfer_attempt(outcome: &str) {
    TRANSFER_ATTEMPTS.with_label_values(&[outcome]).inc();
}

pub fn record_claim(result: &str) {
    CLAIMS_ISSUED.with_label_values(&[result]).inc();
}

/// Update worker backlog gauges
pub fn set_backlog(queue: &str, count: usize) {
    BACKLOG.with_label_values(&[queue]).set(count as f64);
}
