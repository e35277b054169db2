//! Registry behaviour through the public API
//!
//! Exercises admission limits under concurrent handshakes, cancellation,
//! idle eviction, fan-out failures and shutdown without any network I/O.

use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;
use tokio::sync::{mpsc, Notify};
use tokio_test::assert_ok;

use realtime_gateway::connection_registry::{
    AdmitError, ConnectionId, ConnectionRegistry, ManualClock, Payload, RegistryOptions,
    RejectReason, SendError, SequentialIdGenerator, Transport, TransportError,
};
use realtime_gateway::websocket::{WsTransport, CHANNEL_BUFFER_SIZE};

/// Transport with a configurable handshake delay and a broken-pipe switch
#[derive(Default)]
struct StubTransport {
    handshake_delay: Option<Duration>,
    hang_handshake: bool,
    broken: bool,
    sends: AtomicUsize,
}

impl StubTransport {
    fn slow(delay: Duration) -> Self {
        Self {
            handshake_delay: Some(delay),
            ..Default::default()
        }
    }

    fn hanging() -> Self {
        Self {
            hang_handshake: true,
            ..Default::default()
        }
    }

    fn broken() -> Self {
        Self {
            broken: true,
            ..Default::default()
        }
    }
}

#[async_trait]
impl Transport for StubTransport {
    async fn accept(&self) -> Result<(), TransportError> {
        if self.hang_handshake {
            std::future::pending::<()>().await;
        }
        if let Some(delay) = self.handshake_delay {
            tokio::time::sleep(delay).await;
        }
        Ok(())
    }

    async fn send(&self, _payload: &Payload) -> Result<(), TransportError> {
        if self.broken {
            return Err(TransportError::Io("broken pipe".into()));
        }
        self.sends.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn close(&self, _code: u16, _reason: &str) -> Result<(), TransportError> {
        Ok(())
    }
}

fn limits(max_total: usize, max_per_user: usize) -> RegistryOptions {
    RegistryOptions {
        max_total_connections: max_total,
        max_connections_per_user: max_per_user,
        ..Default::default()
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_admissions_never_exceed_limits() {
    let registry = Arc::new(ConnectionRegistry::new(limits(10, 3)));

    let mut handles = Vec::new();
    for i in 0..50 {
        let registry = registry.clone();
        handles.push(tokio::spawn(async move {
            let user = format!("user-{}", i % 5);
            let transport = Arc::new(StubTransport::slow(Duration::from_millis(10)));
            registry.admit(transport, &user, "s", None).await
        }));
    }

    let mut admitted = 0;
    for handle in handles {
        match handle.await.unwrap() {
            Ok(_) => admitted += 1,
            Err(AdmitError::Rejected(_)) => {}
            Err(e) => panic!("unexpected admission error: {e}"),
        }
    }

    let stats = registry.stats();
    assert_eq!(admitted, 10);
    assert_eq!(stats.total_active, 10);
    assert!(stats.per_user_counts.values().all(|&n| n <= 3));
}

#[tokio::test]
async fn cancelled_handshake_releases_its_slot() {
    let registry = ConnectionRegistry::new(limits(1, 1));

    let pending = registry.admit(Arc::new(StubTransport::hanging()), "u1", "s1", None);
    assert!(tokio::time::timeout(Duration::from_millis(20), pending)
        .await
        .is_err());

    assert_eq!(registry.stats().total_active, 0);
    assert_ok!(registry.can_admit("u1"));
    assert_ok!(
        registry
            .admit(Arc::new(StubTransport::default()), "u1", "s1", None)
            .await
    );
}

#[tokio::test]
async fn in_flight_handshake_counts_against_capacity() {
    let registry = Arc::new(ConnectionRegistry::new(limits(1, 1)));

    let slow = {
        let registry = registry.clone();
        tokio::spawn(async move {
            registry
                .admit(Arc::new(StubTransport::slow(Duration::from_millis(50))), "u1", "s1", None)
                .await
        })
    };
    tokio::time::sleep(Duration::from_millis(10)).await;

    // Reserved but not yet visible
    assert_eq!(registry.stats().total_active, 0);
    let err = registry
        .admit(Arc::new(StubTransport::default()), "u2", "s2", None)
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        AdmitError::Rejected(RejectReason::ServerAtCapacity { max: 1 })
    ));

    assert!(slow.await.unwrap().is_ok());
    assert_eq!(registry.stats().total_active, 1);
}

#[tokio::test]
async fn sweep_evicts_idle_and_keeps_recently_touched() {
    let clock = Arc::new(ManualClock::new());
    let registry = ConnectionRegistry::with_parts(
        RegistryOptions {
            connection_timeout: Duration::from_secs(300),
            ..Default::default()
        },
        clock.clone(),
        Arc::new(SequentialIdGenerator::new()),
    );

    let idle = registry
        .admit(Arc::new(StubTransport::default()), "u1", "s1", None)
        .await
        .unwrap();
    let busy = registry
        .admit(Arc::new(StubTransport::default()), "u2", "s2", None)
        .await
        .unwrap();

    clock.advance(Duration::from_secs(200));
    assert!(registry.touch(&busy));
    clock.advance(Duration::from_secs(150));

    assert_eq!(registry.sweep_idle().await, 1);
    assert!(!registry.is_active(&idle));
    assert!(registry.is_active(&busy));
    assert_eq!(registry.connections_for("u1"), 0);
}

#[tokio::test]
async fn broadcast_skips_excluded_and_removes_broken() {
    let registry = ConnectionRegistry::new(limits(10, 3));

    let healthy = Arc::new(StubTransport::default());
    let excluded = Arc::new(StubTransport::default());
    let healthy_id = registry.admit(healthy.clone(), "u1", "s1", None).await.unwrap();
    let excluded_id = registry.admit(excluded.clone(), "u2", "s2", None).await.unwrap();
    let broken_id = registry
        .admit(Arc::new(StubTransport::broken()), "u3", "s3", None)
        .await
        .unwrap();

    let exclude: HashSet<ConnectionId> = [excluded_id.clone()].into_iter().collect();
    let report = registry
        .broadcast(&json!({"type": "notice"}), Some(&exclude))
        .await;

    assert_eq!(report.attempted, 2);
    assert_eq!(report.delivered, 1);
    assert_eq!(report.failed, vec![broken_id.clone()]);
    assert_eq!(healthy.sends.load(Ordering::SeqCst), 1);
    assert_eq!(excluded.sends.load(Ordering::SeqCst), 0);

    assert!(registry.is_active(&healthy_id));
    assert!(registry.is_active(&excluded_id));
    assert!(!registry.is_active(&broken_id));
}

#[tokio::test]
async fn send_to_user_without_connections_delivers_nothing() {
    let registry = ConnectionRegistry::new(RegistryOptions::default());
    assert_eq!(registry.send_to_user("nobody", &json!({})).await, 0);
}

#[tokio::test]
async fn shutdown_stops_sweep_and_empties_registry() {
    let registry = Arc::new(ConnectionRegistry::new(RegistryOptions {
        sweep_interval: Duration::from_secs(1),
        connection_timeout: Duration::from_secs(5),
        ..Default::default()
    }));
    for user in ["u1", "u2", "u3"] {
        registry
            .admit(Arc::new(StubTransport::default()), user, "s", None)
            .await
            .unwrap();
    }

    assert!(registry.start_sweep(None));
    assert!(!registry.start_sweep(None));
    assert!(registry.is_sweep_running());

    let report = registry.shutdown().await;

    assert_eq!(report.connections_closed, 3);
    assert!(report.sweep_stopped);
    assert!(!registry.is_sweep_running());
    assert_eq!(registry.stats().total_active, 0);
}

/// Close parks until released, announcing that it started
#[derive(Default)]
struct GatedCloseTransport {
    close_started: Notify,
    release: Notify,
}

#[async_trait]
impl Transport for GatedCloseTransport {
    async fn accept(&self) -> Result<(), TransportError> {
        Ok(())
    }

    async fn send(&self, _payload: &Payload) -> Result<(), TransportError> {
        Ok(())
    }

    async fn close(&self, _code: u16, _reason: &str) -> Result<(), TransportError> {
        self.close_started.notify_one();
        self.release.notified().await;
        Ok(())
    }
}

#[tokio::test(start_paused = true)]
async fn send_to_stalled_websocket_returns_and_removes() {
    let registry = ConnectionRegistry::new(RegistryOptions::default());

    // Nobody drains the writer channel
    let (tx, _rx) = mpsc::channel(CHANNEL_BUFFER_SIZE);
    let transport = Arc::new(WsTransport::new(tx));
    let id = registry
        .admit(transport.clone(), "u1", "s1", None)
        .await
        .unwrap();
    for n in 0..CHANNEL_BUFFER_SIZE {
        assert_ok!(transport.send(&json!({ "n": n })).await);
    }

    let outcome = tokio::time::timeout(
        Duration::from_secs(60),
        registry.send(&id, &json!({"type": "notice"})),
    )
    .await;

    assert!(matches!(outcome, Ok(Err(SendError::Timeout { .. }))));
    assert!(!registry.is_active(&id));
    assert_eq!(registry.stats().total_active, 0);
}

#[tokio::test(start_paused = true)]
async fn shutdown_waits_for_in_flight_sweep_pass() {
    let clock = Arc::new(ManualClock::new());
    let registry = Arc::new(ConnectionRegistry::with_parts(
        RegistryOptions {
            sweep_interval: Duration::from_secs(1),
            connection_timeout: Duration::from_secs(5),
            send_timeout: Duration::from_secs(60),
            ..Default::default()
        },
        clock.clone(),
        Arc::new(SequentialIdGenerator::new()),
    ));

    let gated = Arc::new(GatedCloseTransport::default());
    let idle = registry.admit(gated.clone(), "u1", "s1", None).await.unwrap();
    clock.advance(Duration::from_secs(10));
    let fresh = registry
        .admit(Arc::new(StubTransport::default()), "u2", "s2", None)
        .await
        .unwrap();

    assert!(registry.start_sweep(None));
    gated.close_started.notified().await;
    assert!(!registry.is_active(&idle));

    let teardown = {
        let registry = registry.clone();
        tokio::spawn(async move { registry.shutdown().await })
    };
    tokio::time::sleep(Duration::from_secs(2)).await;

    // Still parked behind the sweep pass
    assert!(!teardown.is_finished());
    assert!(registry.is_active(&fresh));

    gated.release.notify_one();
    let report = teardown.await.unwrap();

    assert!(report.sweep_stopped);
    assert_eq!(report.connections_closed, 1);
    assert!(!registry.is_active(&fresh));
    assert_eq!(registry.stats().total_active, 0);
}
