use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

use futures::FutureExt;
use tokio::sync::broadcast;
use tokio::time::MissedTickBehavior;

use crate::connection_registry::ConnectionRegistry;
use crate::metrics::SweepMetrics;
use crate::monitor::ResourceMonitor;

/// Background task that evicts idle connections on a fixed interval
pub struct SweepTask {
    registry: Weak<ConnectionRegistry>,
    interval: Duration,
    monitor: Option<Arc<ResourceMonitor>>,
    shutdown: broadcast::Receiver<()>,
}

impl SweepTask {
    pub fn new(
        registry: Weak<ConnectionRegistry>,
        interval: Duration,
        monitor: Option<ResourceMonitor>,
        shutdown: broadcast::Receiver<()>,
    ) -> Self {
        Self {
            registry,
            interval,
            monitor: monitor.map(Arc::new),
            shutdown,
        }
    }

    /// Run until shutdown is signalled or the registry is dropped.
    ///
    /// Shutdown is observed between passes, never in the middle of one.
    pub async fn run(mut self) {
        let mut timer = tokio::time::interval(self.interval);
        timer.set_missed_tick_behavior(MissedTickBehavior::Delay);

        // Skip immediate first tick
        timer.tick().await;

        tracing::info!(
            sweep_interval_ms = self.interval.as_millis() as u64,
            "Idle sweep task started"
        );

        loop {
            tokio::select! {
                _ = self.shutdown.recv() => {
                    tracing::info!("Idle sweep task received shutdown signal");
                    break;
                }
                _ = timer.tick() => {
                    let Some(registry) = self.registry.upgrade() else {
                        tracing::debug!("Registry dropped, stopping idle sweep");
                        break;
                    };
                    self.run_pass(&registry).await;
                }
            }
        }

        tracing::info!("Idle sweep task stopped");
    }

    /// One iteration. A panicking pass is logged and the task keeps going.
    async fn run_pass(&self, registry: &ConnectionRegistry) {
        let start = Instant::now();

        match AssertUnwindSafe(registry.sweep_idle()).catch_unwind().await {
            Ok(evicted) => {
                SweepMetrics::record_evicted(evicted as u64);
                tracing::debug!(
                    evicted = evicted,
                    elapsed_ms = start.elapsed().as_millis() as u64,
                    "Idle sweep pass completed"
                );
            }
            Err(_) => {
                tracing::error!("Idle sweep pass panicked; continuing with next interval");
            }
        }

        SweepMetrics::record_duration(start.elapsed());

        if let Some(monitor) = &self.monitor {
            // sysinfo refreshes block; keep them off the runtime workers
            let monitor = monitor.clone();
            let connections = registry.stats().total_active;
            if let Err(e) = tokio::task::spawn_blocking(move || monitor.check(connections)).await {
                tracing::error!(error = %e, "Resource check failed; continuing with next interval");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection_registry::{Payload, RegistryOptions, Transport, TransportError};
    use crate::connection_registry::{ManualClock, SequentialIdGenerator};
    use crate::monitor::ResourceThresholds;
    use async_trait::async_trait;

    struct NullTransport;

    #[async_trait]
    impl Transport for NullTransport {
        async fn accept(&self) -> Result<(), TransportError> {
            Ok(())
        }
        async fn send(&self, _payload: &Payload) -> Result<(), TransportError> {
            Ok(())
        }
        async fn close(&self, _code: u16, _reason: &str) -> Result<(), TransportError> {
            Ok(())
        }
    }

    /// Panics the first time the registry closes it
    struct PanickingCloseTransport;

    #[async_trait]
    impl Transport for PanickingCloseTransport {
        async fn accept(&self) -> Result<(), TransportError> {
            Ok(())
        }
        async fn send(&self, _payload: &Payload) -> Result<(), TransportError> {
            Ok(())
        }
        async fn close(&self, _code: u16, _reason: &str) -> Result<(), TransportError> {
            panic!("close exploded");
        }
    }

    fn fast_registry() -> Arc<ConnectionRegistry> {
        Arc::new(ConnectionRegistry::new(RegistryOptions {
            sweep_interval: Duration::from_secs(1),
            connection_timeout: Duration::from_secs(3),
            ..Default::default()
        }))
    }

    #[tokio::test]
    async fn test_sweep_task_shutdown() {
        let registry = fast_registry();
        let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
        let task = SweepTask::new(Arc::downgrade(&registry), Duration::from_secs(1), None, shutdown_rx);

        let handle = tokio::spawn(task.run());

        tokio::time::sleep(Duration::from_millis(50)).await;
        shutdown_tx.send(()).unwrap();

        tokio::time::timeout(Duration::from_secs(2), handle)
            .await
            .expect("Task should complete")
            .expect("Task should not panic");
    }

    #[tokio::test(start_paused = true)]
    async fn test_sweep_task_evicts_idle_connection() {
        let registry = fast_registry();
        let id = registry
            .admit(Arc::new(NullTransport), "u1", "s1", None)
            .await
            .unwrap();
        assert!(registry.start_sweep(None));

        tokio::time::sleep(Duration::from_secs(5)).await;

        assert!(!registry.is_active(&id));
        registry.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_sweep_task_stops_when_registry_dropped() {
        let registry = fast_registry();
        let (_shutdown_tx, shutdown_rx) = broadcast::channel(1);
        let task = SweepTask::new(Arc::downgrade(&registry), Duration::from_secs(1), None, shutdown_rx);
        let handle = tokio::spawn(task.run());

        drop(registry);
        tokio::time::sleep(Duration::from_secs(2)).await;

        assert!(handle.is_finished());
    }

    #[tokio::test(start_paused = true)]
    async fn test_sweep_task_survives_panicking_pass() {
        let clock = Arc::new(ManualClock::new());
        let registry = Arc::new(ConnectionRegistry::with_parts(
            RegistryOptions {
                sweep_interval: Duration::from_secs(1),
                connection_timeout: Duration::from_secs(3),
                ..Default::default()
            },
            clock.clone(),
            Arc::new(SequentialIdGenerator::new()),
        ));

        let exploding = registry
            .admit(Arc::new(PanickingCloseTransport), "u1", "s1", None)
            .await
            .unwrap();
        clock.advance(Duration::from_secs(10));
        assert!(registry.start_sweep(None));

        // First pass panics while closing the idle connection
        tokio::time::sleep(Duration::from_millis(1500)).await;
        assert!(!registry.is_active(&exploding));
        assert!(registry.is_sweep_running());

        let idle = registry
            .admit(Arc::new(NullTransport), "u2", "s2", None)
            .await
            .unwrap();
        clock.advance(Duration::from_secs(10));
        tokio::time::sleep(Duration::from_secs(1)).await;

        assert!(!registry.is_active(&idle));
        assert!(registry.is_sweep_running());
        registry.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_sweep_task_with_monitor_keeps_evicting() {
        let registry = fast_registry();
        let id = registry
            .admit(Arc::new(NullTransport), "u1", "s1", None)
            .await
            .unwrap();
        let monitor = ResourceMonitor::new(ResourceThresholds::default());
        assert!(registry.start_sweep(Some(monitor)));

        tokio::time::sleep(Duration::from_secs(5)).await;

        assert!(!registry.is_active(&id));
        assert!(registry.is_sweep_running());
        registry.shutdown().await;
    }
}
