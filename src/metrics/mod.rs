//! Prometheus metrics for the gateway.
//!
//! - Connection population (active connections, connected users)
//! - Admission outcomes (admitted, rejected by reason, handshake failures)
//! - Removals by reason
//! - Delivery outcomes
//! - Idle sweep timing and evictions
//! - Host resource utilisation

mod helpers;

pub use helpers::{encode_metrics, HostMetrics, RegistryMetrics, SweepMetrics};

use lazy_static::lazy_static;
use prometheus::{
    register_gauge, register_histogram, register_int_counter, register_int_counter_vec,
    register_int_gauge, Gauge, Histogram, IntCounter, IntCounterVec, IntGauge,
};

/// Prefix for all metrics
const METRIC_PREFIX: &str = "gateway";

lazy_static! {
    // ============================================================================
    // Connection Metrics
    // ============================================================================

    /// Number of admitted, live connections
    pub static ref CONNECTIONS_ACTIVE: IntGauge = register_int_gauge!(
        format!("{}_connections_active", METRIC_PREFIX),
        "Number of active connections"
    ).unwrap();

    /// Number of users with at least one connection
    pub static ref USERS_CONNECTED: IntGauge = register_int_gauge!(
        format!("{}_users_connected", METRIC_PREFIX),
        "Number of unique connected users"
    ).unwrap();

    pub static ref CONNECTIONS_ADMITTED_TOTAL: IntCounter = register_int_counter!(
        format!("{}_connections_admitted_total", METRIC_PREFIX),
        "Total connections admitted"
    ).unwrap();

    /// Capacity rejections (capacity / user_limit)
    pub static ref CONNECTIONS_REJECTED_TOTAL: IntCounterVec = register_int_counter_vec!(
        format!("{}_connections_rejected_total", METRIC_PREFIX),
        "Total connections rejected by admission limits",
        &["reason"]
    ).unwrap();

    pub static ref HANDSHAKE_FAILURES_TOTAL: IntCounter = register_int_counter!(
        format!("{}_handshake_failures_total", METRIC_PREFIX),
        "Total transport handshakes that failed during admission"
    ).unwrap();

    pub static ref CONNECTIONS_REMOVED_TOTAL: IntCounterVec = register_int_counter_vec!(
        format!("{}_connections_removed_total", METRIC_PREFIX),
        "Total connections removed",
        &["reason"]
    ).unwrap();

    // ============================================================================
    // Delivery Metrics
    // ============================================================================

    pub static ref MESSAGES_DELIVERED_TOTAL: IntCounter = register_int_counter!(
        format!("{}_messages_delivered_total", METRIC_PREFIX),
        "Total payloads successfully delivered to connections"
    ).unwrap();

    pub static ref MESSAGES_FAILED_TOTAL: IntCounter = register_int_counter!(
        format!("{}_messages_failed_total", METRIC_PREFIX),
        "Total payload deliveries that failed"
    ).unwrap();

    // ============================================================================
    // Sweep Metrics
    // ============================================================================

    pub static ref SWEEP_DURATION_SECONDS: Histogram = register_histogram!(
        format!("{}_sweep_duration_seconds", METRIC_PREFIX),
        "Duration of idle sweep passes in seconds",
        vec![0.0001, 0.0005, 0.001, 0.005, 0.01, 0.05, 0.1, 0.5, 1.0]
    ).unwrap();

    pub static ref SWEEP_EVICTIONS_TOTAL: IntCounter = register_int_counter!(
        format!("{}_sweep_evictions_total", METRIC_PREFIX),
        "Total connections evicted by the idle sweep"
    ).unwrap();

    // ============================================================================
    // Host Metrics
    // ============================================================================

    pub static ref HOST_MEMORY_PERCENT: Gauge = register_gauge!(
        format!("{}_host_memory_percent", METRIC_PREFIX),
        "Host memory utilisation percentage"
    ).unwrap();

    pub static ref HOST_CPU_PERCENT: Gauge = register_gauge!(
        format!("{}_host_cpu_percent", METRIC_PREFIX),
        "Host CPU utilisation percentage"
    ).unwrap();
}
