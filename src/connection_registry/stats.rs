//! Registry statistics and operation reports

use serde::Serialize;
use std::collections::HashMap;

use super::types::ConnectionId;

/// Point-in-time view of the registry, taken under one lock acquisition
#[derive(Debug, Clone, Serialize)]
pub struct RegistryStats {
    pub total_active: usize,
    pub total_users: usize,
    pub configured_max_total: usize,
    pub configured_max_per_user: usize,
    pub per_user_counts: HashMap<String, usize>,
}

/// Outcome of a fan-out send
#[derive(Debug, Clone, Default, Serialize)]
pub struct BroadcastReport {
    pub attempted: usize,
    pub delivered: usize,
    /// Ids whose send failed; each was removed from the registry
    pub failed: Vec<ConnectionId>,
}

impl BroadcastReport {
    pub fn failed_count(&self) -> usize {
        self.failed.len()
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct ShutdownReport {
    pub connections_closed: usize,
    /// Whether a running sweep task was stopped
    pub sweep_stopped: bool,
}
