//! Disposable Docker containers for integration tests.
//!
//! `tempdock` starts a container with its ports published on freshly
//! allocated host ports, waits until the workload inside is actually ready
//! (a port accepts connections or a log line appears), and tears it down
//! deterministically afterwards, escalating from a graceful stop to a kill
//! and always removing the container.
//!
//! Launch failures are returned as [`Error`]s. Shutdown never fails: each
//! step is attempted regardless of earlier failures and the outcomes are
//! logged and collected into a [`ShutdownReport`].

pub mod config;
pub mod container;
pub mod engine;
pub mod error;
pub mod image;
pub mod port;
pub mod testing;
pub mod wait;

pub use config::LifecycleConfig;
pub use container::{
    CONTAINER_TO_LOCALHOST_DNS, ContainerHandle, ContainerRequest, Launcher, PortMapping,
    ShutdownReport, ShutdownStep, StepOutcome, start_container,
};
pub use engine::{ContainerEngine, DockerConnector, EngineConnector, EngineError, docker_available};
pub use error::{ConfigError, Error, Result};
pub use image::Image;
pub use port::allocate_free_port;
pub use wait::{POLL_INTERVAL, wait_for};
