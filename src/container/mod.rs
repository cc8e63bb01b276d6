//! Disposable container lifecycle: launch, readiness, teardown.
//!
//! # Architecture
//!
//! ```text
//! ┌───────────────────────────────────────────────────────────────────────────┐
//! │                              Launcher                                      │
//! │                                                                            │
//! │   launch(request, prefix)                                                  │
//! │         │                                                                  │
//! │         ▼                                                                  │
//! │   ┌──────────────┐     ┌──────────────┐     ┌──────────────────────────┐  │
//! │   │ Resolve      │────▶│ Allocate     │────▶│ Pull Image (if missing   │  │
//! │   │ Binds & Env  │     │ Host Ports   │     │ or forced)               │  │
//! │   └──────────────┘     └──────────────┘     └──────────────────────────┘  │
//! │                                                        │                   │
//! │                                                        ▼                   │
//! │                                              ┌──────────────────────────┐  │
//! │                                              │ Create & Start Container │  │
//! │                                              └──────────────────────────┘  │
//! └───────────────────────────────────────────────────────────┬───────────────┘
//!                                                             ▼
//! ┌───────────────────────────────────────────────────────────────────────────┐
//! │                           ContainerHandle                                  │
//! │                                                                            │
//! │   wait_for_port_to_open / wait_for_log_line   (poll every 50ms)           │
//! │                                                                            │
//! │   shutdown():  stop ──(failed)──▶ kill ──▶ remove ──▶ close               │
//! │                  └──────(ok)────────────────▲                              │
//! └───────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Example
//!
//! ```rust,no_run
//! use std::time::Duration;
//!
//! use tempdock::{ContainerRequest, start_container};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! // Pin the tag so tests stay reproducible.
//! let request = ContainerRequest::new("redis:4.0.11")
//!     .env("FOO", "BAR")
//!     .port(6379);
//!
//! let container = start_container(&request, "example-redis").await?;
//! container
//!     .wait_for_log_line("Ready to accept connections", Duration::from_secs(10))
//!     .await?;
//!
//! let local_port = container.host_port(6379).unwrap_or_default();
//! println!("redis is up on local port {local_port}");
//!
//! container.shutdown().await;
//! # Ok(())
//! # }
//! ```

/// Hostname a container uses to reach services on the host under Docker
/// Desktop for Mac.
pub const CONTAINER_TO_LOCALHOST_DNS: &str = "docker.for.mac.localhost";

pub mod handle;
pub mod launcher;
pub mod request;
pub mod shutdown;

pub use handle::ContainerHandle;
pub use launcher::{Launcher, start_container};
pub use request::{ContainerRequest, PortMapping};
pub use shutdown::{KILL_SIGNAL, ShutdownReport, ShutdownStep, StepOutcome, shutdown_container};
