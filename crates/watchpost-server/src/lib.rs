//! Watchpost server - the serving surface around the engine
//!
//! Everything between the engine and the outside world lives here:
//!
//! - **Output**: the Checkmk piggyback renderer
//! - **HTTP**: agent feed, health, executor debug endpoints, Prometheus
//!   metrics
//! - **CLI**: list, run-once, verify, hostname listing, serve
//! - **Config**: YAML file with validation and standard search paths
//! - **Probes**: built-in TCP/HTTP checks so the binary is useful without
//!   user code

pub mod app;
pub mod cli;
pub mod config;
pub mod http;
pub mod logging;
pub mod metrics;
pub mod output;
pub mod probes;
pub mod telemetry;

pub use app::build_engine;
pub use cli::{Cli, Command};
pub use config::{Config, ConfigError};
pub use http::AppState;
pub use metrics::ServerMetrics;
pub use telemetry::{init_telemetry, TelemetryGuard};
