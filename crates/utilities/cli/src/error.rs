//! Error types for CLI utilities.

use metrics_exporter_prometheus::BuildError;
use thiserror::Error;
use tracing_subscriber::util::TryInitError;

/// The Prometheus exporter could not be started.
#[derive(Debug, Error)]
pub enum PrometheusError {
    /// The exporter or its listener failed to build, or a recorder is already installed.
    #[error("failed to install prometheus exporter: {0}")]
    Build(#[from] BuildError),
}

/// Errors that can occur while bringing up a binary.
#[derive(Debug, Error)]
pub enum CliError {
    /// The tracing subscriber could not be installed.
    #[error("failed to initialize tracing: {0}")]
    Tracing(#[from] TryInitError),

    /// The metrics exporter could not be started.
    #[error("failed to initialize metrics: {0}")]
    MetricsInitialization(#[from] PrometheusError),

    /// The async runtime could not be built.
    #[error("failed to build runtime: {0}")]
    Runtime(#[from] std::io::Error),
}

/// Type alias for CLI results.
pub type CliResult<T> = Result<T, CliError>;
