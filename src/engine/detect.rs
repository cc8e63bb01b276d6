//! Docker presence detection for skipping tests on machines without Docker.
//!
//! A missing daemon is an environment precondition, not a test failure, so
//! tests bail out early with the [`require_docker!`](crate::require_docker)
//! macro, which says whether Docker is missing or just not running.

/// Whether Docker-backed tests can run on this machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DockerStatus {
    /// A daemon answered a ping.
    Available,
    /// No daemon answered and there is no `docker` binary on PATH.
    NotInstalled,
    /// The `docker` binary exists but no daemon answered.
    NotRunning,
}

impl DockerStatus {
    pub fn is_available(self) -> bool {
        self == DockerStatus::Available
    }

    /// Why Docker tests have to be skipped, or `None` if they can run.
    pub fn skip_reason(self) -> Option<&'static str> {
        match self {
            DockerStatus::Available => None,
            DockerStatus::NotInstalled => Some("docker isn't installed"),
            DockerStatus::NotRunning => Some("the docker daemon isn't running"),
        }
    }
}

/// Check whether Docker is installed and running.
///
/// A reachable daemon wins even without a local `docker` binary, since
/// `DOCKER_HOST` may point at a remote engine.
pub async fn check_docker() -> DockerStatus {
    if docker_available().await {
        return DockerStatus::Available;
    }
    if docker_binary_exists() {
        DockerStatus::NotRunning
    } else {
        DockerStatus::NotInstalled
    }
}

/// True if a Docker daemon answers a ping.
pub async fn docker_available() -> bool {
    crate::engine::connect_docker().await.is_ok()
}

/// Check if the `docker` binary exists on PATH.
fn docker_binary_exists() -> bool {
    let finder = if cfg!(windows) { "where" } else { "which" };
    std::process::Command::new(finder)
        .arg("docker")
        .stdout(std::process::Stdio::null())
        .stderr(std::process::Stdio::null())
        .status()
        .is_ok_and(|s| s.success())
}

/// Return early from the enclosing test when no Docker daemon is reachable.
///
/// Pass the value to return for tests that return a `Result`.
///
/// ```rust,ignore
/// #[tokio::test]
/// async fn starts_redis() {
///     tempdock::require_docker!();
///     // ...
/// }
///
/// #[tokio::test]
/// async fn starts_postgres() -> anyhow::Result<()> {
///     tempdock::require_docker!(Ok(()));
///     // ...
///     Ok(())
/// }
/// ```
#[macro_export]
macro_rules! require_docker {
    () => {
        $crate::require_docker!(())
    };
    ($skip:expr) => {
        if let Some(reason) = $crate::engine::check_docker().await.skip_reason() {
            eprintln!("Docker tests ignored because {reason}");
            return $skip;
        }
    };
}
