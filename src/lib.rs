// Connection registry core
pub mod connection_registry;
pub mod monitor;
pub mod tasks;

// Shared components
pub mod auth;
pub mod config;
pub mod error;
pub mod metrics;

// Application layer
pub mod api;
pub mod server;
pub mod websocket;

// Supporting modules
pub mod shutdown;
pub mod telemetry;
