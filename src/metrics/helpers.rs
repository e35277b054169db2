//! Metrics helper structs for convenient metric recording

use std::time::Duration;

use prometheus::{Encoder, TextEncoder};

use super::{
    CONNECTIONS_ACTIVE, CONNECTIONS_ADMITTED_TOTAL, CONNECTIONS_REJECTED_TOTAL,
    CONNECTIONS_REMOVED_TOTAL, HANDSHAKE_FAILURES_TOTAL, HOST_CPU_PERCENT, HOST_MEMORY_PERCENT,
    MESSAGES_DELIVERED_TOTAL, MESSAGES_FAILED_TOTAL, SWEEP_DURATION_SECONDS,
    SWEEP_EVICTIONS_TOTAL, USERS_CONNECTED,
};

/// Encode all metrics to Prometheus text format
pub fn encode_metrics() -> Result<String, prometheus::Error> {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    encoder.encode(&metric_families, &mut buffer)?;
    Ok(String::from_utf8(buffer).unwrap_or_default())
}

/// Helper struct for registry lifecycle and delivery metrics
pub struct RegistryMetrics;

impl RegistryMetrics {
    pub fn set_population(connections: usize, users: usize) {
        CONNECTIONS_ACTIVE.set(connections as i64);
        USERS_CONNECTED.set(users as i64);
    }

    pub fn record_admitted() {
        CONNECTIONS_ADMITTED_TOTAL.inc();
    }

    pub fn record_rejected(reason: &str) {
        CONNECTIONS_REJECTED_TOTAL.with_label_values(&[reason]).inc();
    }

    pub fn record_handshake_failure() {
        HANDSHAKE_FAILURES_TOTAL.inc();
    }

    pub fn record_removed(reason: &str) {
        CONNECTIONS_REMOVED_TOTAL.with_label_values(&[reason]).inc();
    }

    pub fn record_delivered(count: u64) {
        MESSAGES_DELIVERED_TOTAL.inc_by(count);
    }

    pub fn record_failed(count: u64) {
        MESSAGES_FAILED_TOTAL.inc_by(count);
    }
}

/// Helper struct for idle sweep metrics
pub struct SweepMetrics;

impl SweepMetrics {
    pub fn record_duration(elapsed: Duration) {
        SWEEP_DURATION_SECONDS.observe(elapsed.as_secs_f64());
    }

    pub fn record_evicted(count: u64) {
        SWEEP_EVICTIONS_TOTAL.inc_by(count);
    }
}

/// Helper struct for host resource gauges
pub struct HostMetrics;

impl HostMetrics {
    pub fn set(memory_percent: f32, cpu_percent: f32) {
        HOST_MEMORY_PERCENT.set(memory_percent as f64);
        HOST_CPU_PERCENT.set(cpu_percent as f64);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_registry_metrics() {
        RegistryMetrics::set_population(3, 2);
        RegistryMetrics::record_admitted();
        RegistryMetrics::record_rejected("capacity");
        RegistryMetrics::record_removed("timeout");
        RegistryMetrics::record_delivered(5);
        RegistryMetrics::record_failed(1);
        SweepMetrics::record_duration(Duration::from_millis(3));
        SweepMetrics::record_evicted(2);
        HostMetrics::set(42.0, 7.5);
        // Just verify no panics
    }

    #[test]
    fn test_encode_contains_registered_metrics() {
        RegistryMetrics::record_admitted();
        let output = encode_metrics().unwrap();
        assert!(output.contains("gateway_connections_admitted_total"));
    }
}
