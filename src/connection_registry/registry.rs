use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use futures::future::join_all;
use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::timeout;

use crate::metrics::RegistryMetrics;
use crate::monitor::ResourceMonitor;
use crate::tasks::SweepTask;

use super::clock::{Clock, SystemClock};
use super::error::{AdmitError, RejectReason, SendError};
use super::id::{IdGenerator, RandomIdGenerator};
use super::stats::{BroadcastReport, RegistryStats, ShutdownReport};
use super::transport::{close_code, Transport};
use super::types::{
    Connection, ConnectionId, ConnectionInfo, Metadata, Payload, RegistryOptions, RemovalReason,
};

/// Attempts at drawing an unused id before admission gives up
const MAX_ID_ATTEMPTS: usize = 16;

/// Maximum concurrent sends per fan-out batch
const MAX_CONCURRENT_SENDS: usize = 1000;

/// The three interlinked tables. Only ever touched under `ConnectionRegistry::state`.
#[derive(Default)]
struct RegistryState {
    connections: HashMap<ConnectionId, Connection>,
    /// user_id -> ids of that user's live connections; never holds an empty set
    user_index: HashMap<String, HashSet<ConnectionId>>,
    /// Slots held by admissions whose handshake is in flight (id -> user_id)
    reservations: HashMap<ConnectionId, String>,
}

impl RegistryState {
    fn user_count(&self, user_id: &str) -> usize {
        self.user_index.get(user_id).map_or(0, HashSet::len)
    }

    fn check_limits(&self, user_id: &str, options: &RegistryOptions) -> Result<(), RejectReason> {
        let occupied = self.connections.len() + self.reservations.len();
        if occupied >= options.max_total_connections {
            return Err(RejectReason::ServerAtCapacity {
                max: options.max_total_connections,
            });
        }

        let pending = self
            .reservations
            .values()
            .filter(|owner| owner.as_str() == user_id)
            .count();
        if self.user_count(user_id) + pending >= options.max_connections_per_user {
            return Err(RejectReason::UserLimitReached {
                user_id: user_id.to_string(),
                max: options.max_connections_per_user,
            });
        }

        Ok(())
    }

    fn is_taken(&self, id: &ConnectionId) -> bool {
        self.connections.contains_key(id) || self.reservations.contains_key(id)
    }

    fn insert(&mut self, connection: Connection) {
        self.user_index
            .entry(connection.user_id.clone())
            .or_default()
            .insert(connection.id.clone());
        self.connections.insert(connection.id.clone(), connection);
    }

    fn detach(&mut self, id: &ConnectionId) -> Option<Connection> {
        let connection = self.connections.remove(id)?;
        if let Some(group) = self.user_index.get_mut(&connection.user_id) {
            group.remove(id);
            if group.is_empty() {
                self.user_index.remove(&connection.user_id);
            }
        }
        Some(connection)
    }

    fn publish_population(&self) {
        RegistryMetrics::set_population(self.connections.len(), self.user_index.len());
    }
}

/// Releases an admission slot if the handshake never commits.
///
/// Dropping an `admit` future mid-handshake therefore cannot leak capacity.
struct Reservation<'a> {
    state: &'a Mutex<RegistryState>,
    id: ConnectionId,
    armed: bool,
}

impl Drop for Reservation<'_> {
    fn drop(&mut self) {
        if self.armed {
            self.state.lock().reservations.remove(&self.id);
        }
    }
}

struct SweepHandle {
    shutdown_tx: broadcast::Sender<()>,
    join: JoinHandle<()>,
}

/// Single source of truth for connection admission, removal, addressing and
/// liveness.
///
/// All table mutations happen under one short critical section; network
/// operations (handshake, send, close) always run after the lock is
/// released. Sends to the same connection may run concurrently; callers
/// that need ordering must serialize their own sends per connection.
pub struct ConnectionRegistry {
    options: RegistryOptions,
    clock: Arc<dyn Clock>,
    id_generator: Arc<dyn IdGenerator>,
    state: Mutex<RegistryState>,
    sweep: Mutex<Option<SweepHandle>>,
}

impl ConnectionRegistry {
    pub fn new(options: RegistryOptions) -> Self {
        Self::with_parts(options, Arc::new(SystemClock), Arc::new(RandomIdGenerator))
    }

    /// Create with an injected clock and id generator
    pub fn with_parts(
        options: RegistryOptions,
        clock: Arc<dyn Clock>,
        id_generator: Arc<dyn IdGenerator>,
    ) -> Self {
        tracing::info!(
            max_total = options.max_total_connections,
            max_per_user = options.max_connections_per_user,
            connection_timeout_secs = options.connection_timeout.as_secs(),
            "Connection registry initialized"
        );

        Self {
            options,
            clock,
            id_generator,
            state: Mutex::new(RegistryState::default()),
            sweep: Mutex::new(None),
        }
    }

    pub fn options(&self) -> &RegistryOptions {
        &self.options
    }

    // ==================== Admission ====================

    /// Check the capacity limits without admitting anything.
    ///
    /// Lets callers refuse before doing a transport handshake. The answer can
    /// be stale by the time `admit` runs; `admit` re-checks atomically.
    pub fn can_admit(&self, user_id: &str) -> Result<(), RejectReason> {
        self.state.lock().check_limits(user_id, &self.options)
    }

    /// Admit a new connection.
    ///
    /// The stored metadata is the caller's map plus `user_id`, `session_id`
    /// and `connected_at`; those three keys always win over caller values.
    ///
    /// On a capacity rejection the transport is closed with a policy-violation
    /// code and the reason text before this returns. A failed handshake leaves
    /// no trace in the registry.
    pub async fn admit(
        &self,
        transport: Arc<dyn Transport>,
        user_id: &str,
        session_id: &str,
        metadata: Option<Metadata>,
    ) -> Result<ConnectionId, AdmitError> {
        let reservation = match self.reserve(user_id, session_id) {
            Ok(reservation) => reservation,
            Err(AdmitError::Rejected(reason)) => {
                tracing::warn!(
                    user_id = %user_id,
                    session_id = %session_id,
                    reason = %reason,
                    "Connection rejected"
                );
                RegistryMetrics::record_rejected(reason.metric_label());
                self.close_quietly(transport.as_ref(), close_code::POLICY_VIOLATION, &reason.to_string())
                    .await;
                return Err(AdmitError::Rejected(reason));
            }
            Err(e) => {
                tracing::error!(user_id = %user_id, error = %e, "Connection id allocation failed");
                self.close_quietly(transport.as_ref(), close_code::INTERNAL_ERROR, "internal error").await;
                return Err(e);
            }
        };

        if let Err(e) = transport.accept().await {
            // Dropping the reservation releases the slot
            drop(reservation);
            tracing::error!(
                user_id = %user_id,
                session_id = %session_id,
                error = %e,
                "Transport handshake failed"
            );
            RegistryMetrics::record_handshake_failure();
            self.close_quietly(transport.as_ref(), close_code::INTERNAL_ERROR, "handshake failed").await;
            return Err(AdmitError::Transport(e));
        }

        let connected_at = self.clock.utc_now();
        let mut merged = metadata.unwrap_or_default();
        merged.insert("user_id".into(), Value::String(user_id.to_string()));
        merged.insert("session_id".into(), Value::String(session_id.to_string()));
        merged.insert("connected_at".into(), Value::String(connected_at.to_rfc3339()));

        let connection = Connection {
            id: reservation.id.clone(),
            user_id: user_id.to_string(),
            session_id: session_id.to_string(),
            transport,
            metadata: merged,
            connected_at,
            last_activity: self.clock.now(),
        };

        let id = connection.id.clone();
        let total = {
            let mut reservation = reservation;
            let mut state = self.state.lock();
            state.reservations.remove(&reservation.id);
            reservation.armed = false;
            state.insert(connection);
            state.publish_population();
            state.connections.len()
        };

        RegistryMetrics::record_admitted();
        tracing::info!(
            connection_id = %id,
            user_id = %user_id,
            session_id = %session_id,
            total = total,
            "Connection admitted"
        );

        Ok(id)
    }

    /// Check limits and hold a slot under one lock acquisition.
    fn reserve(&self, user_id: &str, session_id: &str) -> Result<Reservation<'_>, AdmitError> {
        let mut state = self.state.lock();
        state.check_limits(user_id, &self.options)?;

        for _ in 0..MAX_ID_ATTEMPTS {
            let id = self.id_generator.generate(user_id, session_id);
            if state.is_taken(&id) {
                tracing::debug!(connection_id = %id, "Connection id collision, regenerating");
                continue;
            }
            state.reservations.insert(id.clone(), user_id.to_string());
            return Ok(Reservation {
                state: &self.state,
                id,
                armed: true,
            });
        }

        Err(AdmitError::IdExhausted {
            attempts: MAX_ID_ATTEMPTS,
        })
    }

    // ==================== Removal ====================

    /// Remove a connection and close its transport.
    ///
    /// Idempotent: returns false and does nothing if the id is not active.
    /// Close failures are swallowed; the connection is gone either way.
    pub async fn remove(&self, connection_id: &ConnectionId, reason: RemovalReason) -> bool {
        let detached = {
            let mut state = self.state.lock();
            let detached = state.detach(connection_id);
            if detached.is_some() {
                state.publish_population();
            }
            detached.map(|connection| (connection, state.connections.len()))
        };

        match detached {
            Some((connection, remaining)) => {
                self.finish_removal(connection, &reason, remaining).await;
                true
            }
            None => false,
        }
    }

    /// Close a transport, bounded by `send_timeout`. Never fails.
    async fn close_quietly(&self, transport: &dyn Transport, code: u16, reason: &str) {
        match timeout(self.options.send_timeout, transport.close(code, reason)).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                tracing::debug!(code = code, error = %e, "Transport close failed (ignored)");
            }
            Err(_) => {
                tracing::debug!(
                    code = code,
                    timeout_ms = self.options.send_timeout.as_millis() as u64,
                    "Transport close timed out (ignored)"
                );
            }
        }
    }

    async fn finish_removal(&self, connection: Connection, reason: &RemovalReason, remaining: usize) {
        self.close_quietly(connection.transport.as_ref(), reason.close_code(), reason.as_str()).await;

        RegistryMetrics::record_removed(reason.metric_label());
        tracing::info!(
            connection_id = %connection.id,
            user_id = %connection.user_id,
            reason = %reason,
            remaining = remaining,
            "Connection removed"
        );
    }

    // ==================== Delivery ====================

    /// Send a payload to one connection.
    ///
    /// Success refreshes the connection's activity timestamp. Any transport
    /// failure (including a send timeout) is treated as connection death:
    /// the connection is removed with `SendFailed` before this returns. There
    /// is no retry.
    pub async fn send(&self, connection_id: &ConnectionId, payload: &Payload) -> Result<(), SendError> {
        let transport = {
            let state = self.state.lock();
            state
                .connections
                .get(connection_id)
                .map(|connection| connection.transport.clone())
        };

        let Some(transport) = transport else {
            tracing::debug!(connection_id = %connection_id, "Send to unknown connection");
            return Err(SendError::UnknownConnection(connection_id.clone()));
        };

        let outcome = match timeout(self.options.send_timeout, transport.send(payload)).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(source)) => Err(SendError::Transport {
                id: connection_id.clone(),
                source,
            }),
            Err(_) => Err(SendError::Timeout {
                id: connection_id.clone(),
                timeout_ms: self.options.send_timeout.as_millis() as u64,
            }),
        };

        match outcome {
            Ok(()) => {
                self.touch(connection_id);
                RegistryMetrics::record_delivered(1);
                Ok(())
            }
            Err(e) => {
                tracing::warn!(connection_id = %connection_id, error = %e, "Send failed, removing connection");
                RegistryMetrics::record_failed(1);
                self.remove(connection_id, RemovalReason::SendFailed).await;
                Err(e)
            }
        }
    }

    /// Send to every connection of a user. Returns the number of deliveries.
    pub async fn send_to_user(&self, user_id: &str, payload: &Payload) -> usize {
        let ids: Vec<ConnectionId> = {
            let state = self.state.lock();
            state
                .user_index
                .get(user_id)
                .map(|group| group.iter().cloned().collect())
                .unwrap_or_default()
        };

        if ids.is_empty() {
            tracing::debug!(user_id = %user_id, "No connections for user");
            return 0;
        }

        self.deliver_all(ids, payload).await.delivered
    }

    /// Send to every connection opened under a session id.
    pub async fn send_to_session(&self, session_id: &str, payload: &Payload) -> usize {
        let ids: Vec<ConnectionId> = {
            let state = self.state.lock();
            state
                .connections
                .values()
                .filter(|connection| connection.session_id == session_id)
                .map(|connection| connection.id.clone())
                .collect()
        };

        if ids.is_empty() {
            tracing::debug!(session_id = %session_id, "No connections for session");
            return 0;
        }

        self.deliver_all(ids, payload).await.delivered
    }

    /// Send to all active connections except those in `exclude`.
    ///
    /// Never fails as a whole; failed deliveries are listed in the report and
    /// their connections have already been removed.
    pub async fn broadcast(
        &self,
        payload: &Payload,
        exclude: Option<&HashSet<ConnectionId>>,
    ) -> BroadcastReport {
        let ids: Vec<ConnectionId> = {
            let state = self.state.lock();
            state
                .connections
                .keys()
                .filter(|id| exclude.map_or(true, |excluded| !excluded.contains(*id)))
                .cloned()
                .collect()
        };

        let report = self.deliver_all(ids, payload).await;

        if !report.failed.is_empty() {
            tracing::warn!(
                failed = report.failed_count(),
                attempted = report.attempted,
                "Broadcast failed for some connections"
            );
        }

        report
    }

    /// Fan out independent sends in bounded concurrent batches.
    async fn deliver_all(&self, ids: Vec<ConnectionId>, payload: &Payload) -> BroadcastReport {
        let mut report = BroadcastReport {
            attempted: ids.len(),
            ..Default::default()
        };

        for batch in ids.chunks(MAX_CONCURRENT_SENDS) {
            let sends = batch.iter().map(|id| async move { (id, self.send(id, payload).await) });

            for (id, result) in join_all(sends).await {
                match result {
                    Ok(()) => report.delivered += 1,
                    Err(_) => report.failed.push(id.clone()),
                }
            }
        }

        report
    }

    // ==================== Liveness ====================

    /// Record inbound activity without sending anything.
    ///
    /// Returns false if the connection is not active.
    pub fn touch(&self, connection_id: &ConnectionId) -> bool {
        let now = self.clock.now();
        let mut state = self.state.lock();
        match state.connections.get_mut(connection_id) {
            Some(connection) => {
                connection.mark_active(now);
                true
            }
            None => false,
        }
    }

    /// One idle-sweep pass. Returns the number of connections evicted.
    ///
    /// Works from a snapshot and removes each stale connection independently.
    /// Idleness is re-checked under the lock at removal time, so a connection
    /// touched after the snapshot survives.
    pub async fn sweep_idle(&self) -> usize {
        let timeout = self.options.connection_timeout;
        let now = self.clock.now();

        let candidates: Vec<ConnectionId> = {
            let state = self.state.lock();
            state
                .connections
                .values()
                .filter(|connection| connection.idle_for(now) > timeout)
                .map(|connection| connection.id.clone())
                .collect()
        };

        let mut evicted = 0;
        for id in candidates {
            let detached = {
                let mut state = self.state.lock();
                let now = self.clock.now();
                let still_idle = state
                    .connections
                    .get(&id)
                    .is_some_and(|connection| connection.idle_for(now) > timeout);
                if still_idle {
                    let detached = state.detach(&id);
                    state.publish_population();
                    detached.map(|connection| (connection, state.connections.len()))
                } else {
                    None
                }
            };

            match detached {
                Some((connection, remaining)) => {
                    tracing::warn!(connection_id = %id, "Disconnecting idle connection");
                    self.finish_removal(connection, &RemovalReason::Timeout, remaining).await;
                    evicted += 1;
                }
                None => {
                    tracing::debug!(connection_id = %id, "Idle candidate no longer stale, skipping");
                }
            }
        }

        if evicted > 0 {
            tracing::info!(
                evicted = evicted,
                timeout_secs = timeout.as_secs(),
                "Cleaned up idle connections"
            );
        }

        evicted
    }

    /// Start the background idle sweep. Returns false if it is already running.
    ///
    /// The task holds only a weak reference, so dropping the last registry
    /// handle also stops it.
    pub fn start_sweep(self: &Arc<Self>, monitor: Option<ResourceMonitor>) -> bool {
        let mut slot = self.sweep.lock();
        if slot.is_some() {
            return false;
        }

        let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
        let task = SweepTask::new(
            Arc::downgrade(self),
            self.options.effective_sweep_interval(),
            monitor,
            shutdown_rx,
        );
        let join = tokio::spawn(task.run());

        *slot = Some(SweepHandle { shutdown_tx, join });
        true
    }

    pub fn is_sweep_running(&self) -> bool {
        self.sweep
            .lock()
            .as_ref()
            .is_some_and(|handle| !handle.join.is_finished())
    }

    /// Stop the sweep, then remove every connection with `ServerShutdown`.
    ///
    /// Waits for an in-flight sweep pass to finish before tearing down, so the
    /// two never race. Admitting again afterwards is the caller's problem.
    pub async fn shutdown(&self) -> ShutdownReport {
        tracing::info!("Shutting down connection registry");

        let handle = self.sweep.lock().take();
        let sweep_stopped = match handle {
            Some(handle) => {
                let _ = handle.shutdown_tx.send(());
                if let Err(e) = handle.join.await {
                    tracing::error!(error = %e, "Idle sweep task ended abnormally");
                }
                true
            }
            None => false,
        };

        let ids: Vec<ConnectionId> = self.state.lock().connections.keys().cloned().collect();

        let mut connections_closed = 0;
        for id in ids {
            if self.remove(&id, RemovalReason::ServerShutdown).await {
                connections_closed += 1;
            }
        }

        tracing::info!(
            connections_closed = connections_closed,
            "Connection registry shutdown complete"
        );

        ShutdownReport {
            connections_closed,
            sweep_stopped,
        }
    }

    // ==================== Queries ====================

    pub fn get_metadata(&self, connection_id: &ConnectionId) -> Option<Metadata> {
        self.state
            .lock()
            .connections
            .get(connection_id)
            .map(|connection| connection.metadata.clone())
    }

    pub fn connection_info(&self, connection_id: &ConnectionId) -> Option<ConnectionInfo> {
        let now = self.clock.now();
        let state = self.state.lock();
        state.connections.get(connection_id).map(|connection| ConnectionInfo {
            connection_id: connection.id.clone(),
            user_id: connection.user_id.clone(),
            session_id: connection.session_id.clone(),
            connected_at: connection.connected_at,
            idle_seconds: connection.idle_for(now).as_secs(),
            metadata: connection.metadata.clone(),
        })
    }

    pub fn is_active(&self, connection_id: &ConnectionId) -> bool {
        self.state.lock().connections.contains_key(connection_id)
    }

    pub fn connections_for(&self, user_id: &str) -> usize {
        self.state.lock().user_count(user_id)
    }

    pub fn user_connections(&self, user_id: &str) -> Vec<ConnectionId> {
        self.state
            .lock()
            .user_index
            .get(user_id)
            .map(|group| group.iter().cloned().collect())
            .unwrap_or_default()
    }

    pub fn stats(&self) -> RegistryStats {
        let state = self.state.lock();
        RegistryStats {
            total_active: state.connections.len(),
            total_users: state.user_index.len(),
            configured_max_total: self.options.max_total_connections,
            configured_max_per_user: self.options.max_connections_per_user,
            per_user_counts: state
                .user_index
                .iter()
                .map(|(user_id, group)| (user_id.clone(), group.len()))
                .collect(),
        }
    }
}

impl Default for ConnectionRegistry {
    fn default() -> Self {
        Self::new(RegistryOptions::default())
    }
}
