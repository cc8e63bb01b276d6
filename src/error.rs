//! Error types for container lifecycle management.

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

/// Result type for lifecycle operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors surfaced by launch and readiness operations.
///
/// Shutdown never produces one of these; its failures are recorded in a
/// [`ShutdownReport`](crate::container::ShutdownReport) instead.
#[derive(Debug, Error)]
pub enum Error {
    /// The engine connection could not be established.
    ///
    /// Callers should treat this as an environment precondition and skip
    /// dependent work rather than fail.
    #[error("Docker not available: {reason}")]
    EngineUnavailable {
        /// Reason why the engine is unavailable.
        reason: String,
    },

    /// No ephemeral port could be bound on the loopback interface.
    #[error("Failed to allocate a free host port: {0}")]
    PortAllocation(#[source] std::io::Error),

    /// The launch request is malformed.
    #[error("Invalid container request: {reason}")]
    InvalidRequest {
        /// What is wrong with the request.
        reason: String,
    },

    /// A volume source path could not be made absolute.
    #[error("Failed to resolve volume source '{}': {source}", .path.display())]
    VolumeResolution {
        /// Path as supplied by the caller.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// Failed to pull the image.
    #[error("Failed to pull image '{image}': {reason}")]
    ImagePullFailed {
        /// Image reference.
        image: String,
        /// Reason for failure.
        reason: String,
    },

    /// Failed to create the container.
    #[error("Failed to create container '{name}': {reason}")]
    ContainerCreationFailed {
        /// Container name.
        name: String,
        /// Reason for failure.
        reason: String,
    },

    /// Failed to start the container.
    #[error("Failed to start container '{name}': {reason}")]
    ContainerStartFailed {
        /// Container name.
        name: String,
        /// Reason for failure.
        reason: String,
    },

    /// The readiness predicate never succeeded before the deadline.
    #[error("Predicate never succeeded within {timeout:?} ({attempts} attempts){}", fmt_last_error(.last_error))]
    ReadinessTimeout {
        /// Deadline that elapsed.
        timeout: Duration,
        /// Number of predicate evaluations performed.
        attempts: u32,
        /// Error returned by the final predicate evaluation, if any.
        last_error: Option<String>,
    },

    /// Container logs could not be read.
    #[error("Failed to read logs for container '{id}': {reason}")]
    LogFetch {
        /// Container id.
        id: String,
        /// Reason for failure.
        reason: String,
    },

    /// Configuration error.
    #[error(transparent)]
    Config(#[from] ConfigError),
}

fn fmt_last_error(last_error: &Option<String>) -> String {
    match last_error {
        Some(e) => format!(": last error: {e}"),
        None => String::new(),
    }
}

impl Error {
    /// True if the readiness deadline elapsed.
    pub fn is_timeout(&self) -> bool {
        matches!(self, Error::ReadinessTimeout { .. })
    }

    /// True if the engine could not be reached at all.
    pub fn is_engine_unavailable(&self) -> bool {
        matches!(self, Error::EngineUnavailable { .. })
    }

    /// True for failures raised while resolving the image or creating or
    /// starting the container.
    pub fn is_launch_failure(&self) -> bool {
        matches!(
            self,
            Error::ImagePullFailed { .. }
                | Error::ContainerCreationFailed { .. }
                | Error::ContainerStartFailed { .. }
        )
    }
}

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// An environment variable held a value that could not be parsed.
    #[error("Invalid value for {key}: {message}")]
    InvalidValue {
        /// Variable name.
        key: String,
        /// What went wrong.
        message: String,
    },
}
