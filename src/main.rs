use anyhow::Result;
use tokio::net::TcpListener;
use tokio::signal;

use realtime_gateway::config::Settings;
use realtime_gateway::monitor::ResourceMonitor;
use realtime_gateway::server::{create_app, AppState};
use realtime_gateway::shutdown::GracefulShutdown;
use realtime_gateway::telemetry::init_telemetry;

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration
    let settings = Settings::new()?;

    // Initialize tracing
    init_telemetry(&settings.logging)?;
    tracing::info!("Configuration loaded");

    // Create application state
    let state = AppState::new(settings.clone());
    tracing::info!(
        max_total_connections = settings.registry.max_total_connections,
        max_connections_per_user = settings.registry.max_connections_per_user,
        "Application state initialized"
    );

    // Start idle sweep in background
    let monitor = ResourceMonitor::from_config(&settings.monitor);
    state.registry.start_sweep(monitor);

    // Create Axum app
    let app = create_app(state.clone());

    // Start server
    let addr = settings.server_addr();
    let listener = TcpListener::bind(&addr).await?;
    tracing::info!("Server listening on {}", addr);

    // Notify clients and tear the registry down as soon as a signal arrives,
    // so open WebSockets do not hold the HTTP drain open
    let graceful = GracefulShutdown::new(state.registry.clone());
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            let reason = shutdown_signal_handler().await;
            graceful.execute(reason).await;
        })
        .await?;

    tracing::info!("Server shutdown complete");
    Ok(())
}

async fn shutdown_signal_handler() -> &'static str {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install signal handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received Ctrl+C, initiating graceful shutdown");
            "Server shutting down (interrupt)"
        }
        _ = terminate => {
            tracing::info!("Received terminate signal, initiating graceful shutdown");
            "Server shutting down (terminate)"
        }
    }
}
