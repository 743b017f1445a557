//! Error kinds shared across the library

use std::time::Duration;

/// Result alias used throughout the library
pub type Result<T> = std::result::Result<T, BenchError>;

#[derive(thiserror::Error, Debug)]
pub enum BenchError {
    #[error("command `{command}` exited with status {status}: {stderr}")]
    CommandFailed {
        command: String,
        status: i32,
        stderr: String,
    },

    #[error("failed to launch `{command}`: {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },

    /// The backend could not answer an inspection query. `discover` collapses
    /// this into "absent"; it is only visible through `try_discover`.
    #[error("backend did not report {name}: {reason}")]
    BackendUnavailable { name: String, reason: String },

    #[error("{name} did not report an address within {waited:?}")]
    DiscoveryTimeout { name: String, waited: Duration },

    #[error("no private address known for {0}")]
    MissingAddress(String),

    #[error("invalid IPv4 address {0:?}")]
    InvalidAddress(String),

    #[error("port {0} is outside 1..=65535")]
    InvalidPort(u32),

    #[error("offered rate must be positive, got {0}")]
    InvalidRate(u32),

    #[error("rates must be strictly increasing ({previous} then {next})")]
    InvalidRateSequence { previous: u32, next: u32 },

    #[error("invalid sweep: {0}")]
    InvalidSweep(String),

    #[error("cannot read metric value {0:?}")]
    MetricParse(String),

    #[error("interface {0} has no IPv4 address")]
    NoInterfaceAddress(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("failed to encode session manifest: {0}")]
    Manifest(#[from] serde_json::Error),
}

impl BenchError {
    /// True for errors raised by input validation, before any external call.
    pub fn is_precondition(&self) -> bool {
        matches!(
            self,
            BenchError::MissingAddress(_)
                | BenchError::InvalidAddress(_)
                | BenchError::InvalidPort(_)
                | BenchError::InvalidRate(_)
                | BenchError::InvalidRateSequence { .. }
                | BenchError::InvalidSweep(_)
        )
    }
}
