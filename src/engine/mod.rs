//! Container engine abstraction.
//!
//! The lifecycle code never talks to Docker directly. It goes through the
//! [`ContainerEngine`] capability set, which [`DockerEngine`] implements with
//! bollard and [`FakeEngine`](crate::testing::FakeEngine) implements in memory.
//!
//! Each launch obtains its own connection from an [`EngineConnector`], so
//! closing one container's connection can never affect another container.

pub mod detect;
pub mod docker;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

pub use detect::{DockerStatus, check_docker, docker_available};
pub use docker::{DockerConnector, DockerEngine, connect_docker};

/// Result type for engine operations.
pub type EngineResult<T> = std::result::Result<T, EngineError>;

/// Errors returned by a [`ContainerEngine`].
#[derive(Debug, Error)]
pub enum EngineError {
    /// The referenced container or image does not exist.
    #[error("No such object: {0}")]
    NotFound(String),

    /// The connection was closed with [`ContainerEngine::close`].
    #[error("Engine connection is closed")]
    Closed,

    /// The engine rejected the request.
    #[error("Engine error: {0}")]
    Api(String),

    /// Transport or protocol error from the Docker client.
    #[error("Docker error: {0}")]
    Docker(#[from] bollard::errors::Error),
}

impl EngineError {
    /// True if the target object does not exist.
    pub fn is_not_found(&self) -> bool {
        match self {
            EngineError::NotFound(_) => true,
            EngineError::Docker(bollard::errors::Error::DockerResponseServerError {
                status_code,
                ..
            }) => *status_code == 404,
            _ => false,
        }
    }
}

/// Process-level settings of a container to create.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ContainerSpec {
    /// Image reference.
    pub image: String,
    /// Command arguments. Empty keeps the image default.
    pub cmd: Vec<String>,
    /// Environment in `KEY=VALUE` form.
    pub env: Vec<String>,
    /// Container-internal TCP ports to expose.
    pub exposed_ports: Vec<u16>,
}

/// Host-side settings of a container to create.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HostSpec {
    /// `(container_port, host_port)` TCP publications.
    pub port_bindings: Vec<(u16, u16)>,
    /// Host bind mounts.
    pub mounts: Vec<BindMount>,
    /// Host interface to publish on. `None` means all interfaces.
    pub host_ip: Option<String>,
}

/// A host directory or file bind-mounted into the container.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BindMount {
    /// Absolute host path.
    pub source: PathBuf,
    /// Path inside the container.
    pub target: String,
}

/// Options for [`ContainerEngine::remove_container`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RemoveContainerOptions {
    pub remove_links: bool,
    pub remove_volumes: bool,
    pub force: bool,
}

/// Options for [`ContainerEngine::container_logs`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LogOptions {
    pub stdout: bool,
    pub stderr: bool,
}

impl Default for LogOptions {
    fn default() -> Self {
        Self {
            stdout: true,
            stderr: true,
        }
    }
}

/// Options for [`ContainerEngine::remove_image`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RemoveImageOptions {
    pub force: bool,
    pub prune_children: bool,
}

/// The operations the lifecycle code needs from a container engine.
#[async_trait]
pub trait ContainerEngine: Send + Sync {
    /// Daemon liveness probe.
    async fn ping(&self) -> EngineResult<()>;

    /// Whether the image is present locally.
    async fn image_exists(&self, image: &str) -> EngineResult<bool>;

    /// Pull an image from its registry. Resolves once the pull stream has
    /// been fully drained.
    async fn pull_image(&self, image: &str) -> EngineResult<()>;

    /// Create a container and return its engine-assigned id.
    async fn create_container(
        &self,
        name: &str,
        spec: &ContainerSpec,
        host: &HostSpec,
    ) -> EngineResult<String>;

    async fn start_container(&self, id: &str) -> EngineResult<()>;

    /// Ask the container to stop, waiting `grace` before the engine kills it.
    async fn stop_container(&self, id: &str, grace: Duration) -> EngineResult<()>;

    async fn kill_container(&self, id: &str, signal: &str) -> EngineResult<()>;

    async fn remove_container(&self, id: &str, options: RemoveContainerOptions)
    -> EngineResult<()>;

    /// Full log output since container start.
    async fn container_logs(&self, id: &str, options: LogOptions) -> EngineResult<Vec<u8>>;

    async fn remove_image(&self, image: &str, options: RemoveImageOptions) -> EngineResult<()>;

    /// Release the connection. Later calls fail with [`EngineError::Closed`].
    async fn close(&self) -> EngineResult<()>;
}

/// Opens engine connections.
#[async_trait]
pub trait EngineConnector: Send + Sync {
    /// Open a new, independent connection.
    async fn connect(&self) -> EngineResult<Arc<dyn ContainerEngine>>;
}
