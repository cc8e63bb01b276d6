//! Handle to a running container.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use crate::config::LifecycleConfig;
use crate::container::request::PortMapping;
use crate::container::shutdown::{ShutdownReport, shutdown_container};
use crate::engine::{ContainerEngine, LogOptions};
use crate::error::{Error, Result};
use crate::wait::{check_port_open, logs_contain, wait_for_with_interval};

/// A container started by a [`Launcher`](crate::Launcher).
///
/// Owns its own engine connection and port mapping. Call
/// [`shutdown`](Self::shutdown) when done; dropping the handle does not stop
/// the container.
pub struct ContainerHandle {
    id: String,
    name: String,
    image: String,
    ports: PortMapping,
    engine: Arc<dyn ContainerEngine>,
    config: LifecycleConfig,
    shut_down: AtomicBool,
}

impl ContainerHandle {
    pub(crate) fn new(
        id: String,
        name: String,
        image: String,
        ports: PortMapping,
        engine: Arc<dyn ContainerEngine>,
        config: LifecycleConfig,
    ) -> Self {
        Self {
            id,
            name,
            image,
            ports,
            engine,
            config,
            shut_down: AtomicBool::new(false),
        }
    }

    /// Engine-assigned container id.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Container name (`{prefix}-{uuid}`).
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn image(&self) -> &str {
        &self.image
    }

    pub fn port_mapping(&self) -> &PortMapping {
        &self.ports
    }

    /// Host port the given container port is published on.
    pub fn host_port(&self, container_port: u16) -> Option<u16> {
        self.ports.get(container_port)
    }

    /// Whether [`shutdown`](Self::shutdown) has been called.
    pub fn is_shut_down(&self) -> bool {
        self.shut_down.load(Ordering::SeqCst)
    }

    /// Wait until a TCP connection to `host_port` succeeds.
    ///
    /// Dials the configured host ip when ports are published on a specific
    /// interface, localhost otherwise. Pass the mapped port (see
    /// [`host_port`](Self::host_port)), not the container-internal one. A
    /// container whose process exits without ever listening makes this time
    /// out rather than hang.
    pub async fn wait_for_port_to_open(&self, host_port: u16, timeout: Duration) -> Result<()> {
        let addr = SocketAddr::new(dial_ip(self.config.host_ip.as_deref()), host_port);
        let dial_timeout = self.config.dial_timeout;
        tracing::debug!("Waiting up to {:?} for {} to accept connections", timeout, addr);
        wait_for_with_interval(
            || check_port_open(addr, dial_timeout),
            timeout,
            self.config.poll_interval,
        )
        .await
    }

    /// Wait until some line of the container's combined stdout/stderr
    /// contains `text` (literal match).
    ///
    /// The whole log is fetched again on every attempt, so cost grows with
    /// log volume. That is fine for test-sized logs.
    pub async fn wait_for_log_line(&self, text: &str, timeout: Duration) -> Result<()> {
        tracing::debug!(
            "Waiting up to {:?} for '{}' in logs of {}",
            timeout,
            text,
            self.name
        );
        wait_for_with_interval(
            || async move {
                let logs = self.logs().await.map_err(|e| e.to_string())?;
                if logs_contain(&logs, text) {
                    Ok(())
                } else {
                    Err(format!("no log line contains '{text}'"))
                }
            },
            timeout,
            self.config.poll_interval,
        )
        .await
    }

    /// Full combined stdout/stderr since the container started.
    pub async fn logs(&self) -> Result<Vec<u8>> {
        self.engine
            .container_logs(&self.id, LogOptions::default())
            .await
            .map_err(|e| Error::LogFetch {
                id: self.id.clone(),
                reason: e.to_string(),
            })
    }

    /// Tear down with the configured grace period (1s unless overridden).
    pub async fn shutdown(&self) -> ShutdownReport {
        self.shutdown_with_timeout(self.config.stop_grace_period)
            .await
    }

    /// Stop (then kill if needed), remove and disconnect. Never fails; see
    /// the returned report for per-step outcomes.
    ///
    /// Calling this again re-runs every step; each one fails quietly.
    pub async fn shutdown_with_timeout(&self, grace: Duration) -> ShutdownReport {
        if self.shut_down.swap(true, Ordering::SeqCst) {
            tracing::debug!("Container {} already shut down, retrying teardown", self.name);
        }
        shutdown_container(self.engine.as_ref(), &self.id, grace).await
    }
}

/// Address to dial for a port published on `host_ip`.
///
/// Unset, unparsable and wildcard addresses publish on every interface, so
/// loopback of the same family reaches them.
fn dial_ip(host_ip: Option<&str>) -> IpAddr {
    match host_ip.map(str::parse::<IpAddr>) {
        Some(Ok(ip)) if ip.is_unspecified() => match ip {
            IpAddr::V4(_) => IpAddr::V4(Ipv4Addr::LOCALHOST),
            IpAddr::V6(_) => IpAddr::V6(std::net::Ipv6Addr::LOCALHOST),
        },
        Some(Ok(ip)) => ip,
        Some(Err(e)) => {
            tracing::debug!("Ignoring unparsable host ip {:?}: {}", host_ip, e);
            IpAddr::V4(Ipv4Addr::LOCALHOST)
        }
        None => IpAddr::V4(Ipv4Addr::LOCALHOST),
    }
}

impl std::fmt::Debug for ContainerHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ContainerHandle")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("image", &self.image)
            .field("ports", &self.ports)
            .finish_non_exhaustive()
    }
}

impl Drop for ContainerHandle {
    fn drop(&mut self) {
        if !self.shut_down.load(Ordering::SeqCst) {
            tracing::warn!(
                "ContainerHandle '{}' dropped without shutdown(), container may remain running",
                self.name
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::container::shutdown::{ShutdownStep, StepOutcome};
    use crate::testing::{FakeEngine, FakeOp};

    fn handle_for(engine: &FakeEngine, id: &str, ports: PortMapping) -> ContainerHandle {
        ContainerHandle::new(
            id.to_string(),
            "test-container".to_string(),
            "redis:4.0.11".to_string(),
            ports,
            Arc::new(engine.clone()),
            LifecycleConfig::default(),
        )
    }

    #[test]
    fn test_accessors() {
        let engine = FakeEngine::new();
        let handle = handle_for(&engine, "abc", PortMapping::from_pairs([(6379, 49153)]));

        assert_eq!(handle.id(), "abc");
        assert_eq!(handle.name(), "test-container");
        assert_eq!(handle.image(), "redis:4.0.11");
        assert_eq!(handle.host_port(6379), Some(49153));
        assert_eq!(handle.host_port(80), None);
        assert_eq!(handle.port_mapping().len(), 1);
        assert!(!handle.is_shut_down());
        assert!(format!("{handle:?}").contains("abc"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_log_line_found() {
        let engine = FakeEngine::new();
        let id = engine.add_running_container("redis");
        engine.append_logs(&id, "1:C starting\n1:M * Ready to accept connections\n");
        let handle = handle_for(&engine, &id, PortMapping::default());

        let result = handle
            .wait_for_log_line("Ready to accept connections", Duration::from_secs(1))
            .await;
        assert!(result.is_ok());
        handle.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_log_line_appearing_later() {
        let engine = FakeEngine::new();
        let id = engine.add_running_container("redis");
        let handle = handle_for(&engine, &id, PortMapping::default());

        let writer = engine.clone();
        let writer_id = id.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(300)).await;
            writer.append_logs(&writer_id, "Ready to accept connections\n");
        });

        let start = tokio::time::Instant::now();
        handle
            .wait_for_log_line("Ready to accept connections", Duration::from_secs(5))
            .await
            .unwrap();
        assert!(start.elapsed() <= Duration::from_millis(350));
        handle.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_log_line_near_miss_times_out() {
        let engine = FakeEngine::new();
        let id = engine.add_running_container("redis");
        engine.append_logs(&id, "ready to accept connections\n");
        let handle = handle_for(&engine, &id, PortMapping::default());

        let timeout = Duration::from_millis(500);
        let start = tokio::time::Instant::now();
        let err = handle
            .wait_for_log_line("Ready to accept connections", timeout)
            .await
            .unwrap_err();

        assert!(err.is_timeout());
        assert!(start.elapsed() <= timeout + crate::wait::POLL_INTERVAL);
        handle.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_log_fetch_errors_keep_polling() {
        let engine = FakeEngine::new();
        let id = engine.add_running_container("redis");
        engine.append_logs(&id, "Ready to accept connections\n");
        engine.fail_on(FakeOp::Logs);
        let handle = handle_for(&engine, &id, PortMapping::default());

        let healer = engine.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(200)).await;
            healer.clear_failure(FakeOp::Logs);
        });

        handle
            .wait_for_log_line("Ready to accept connections", Duration::from_secs(2))
            .await
            .unwrap();
        handle.shutdown().await;
    }

    #[tokio::test]
    async fn test_port_wait_against_local_listener() {
        let listener = tokio::net::TcpListener::bind((Ipv4Addr::LOCALHOST, 0))
            .await
            .unwrap();
        let host_port = listener.local_addr().unwrap().port();

        let engine = FakeEngine::new();
        let id = engine.add_running_container("web");
        let handle = handle_for(&engine, &id, PortMapping::from_pairs([(80, host_port)]));

        let mapped = handle.host_port(80).unwrap();
        handle
            .wait_for_port_to_open(mapped, Duration::from_secs(2))
            .await
            .unwrap();
        handle.shutdown().await;
    }

    #[test]
    fn test_dial_ip_follows_host_ip() {
        let v4_loopback = IpAddr::V4(Ipv4Addr::LOCALHOST);
        assert_eq!(dial_ip(None), v4_loopback);
        assert_eq!(dial_ip(Some("0.0.0.0")), v4_loopback);
        assert_eq!(dial_ip(Some("not-an-ip")), v4_loopback);
        assert_eq!(
            dial_ip(Some("::")),
            IpAddr::V6(std::net::Ipv6Addr::LOCALHOST)
        );
        assert_eq!(
            dial_ip(Some("192.168.1.20")),
            IpAddr::V4(Ipv4Addr::new(192, 168, 1, 20))
        );
    }

    // The whole 127.0.0.0/8 block is routed to loopback on Linux only.
    #[cfg(target_os = "linux")]
    #[tokio::test]
    async fn test_port_wait_dials_configured_host_ip() {
        let alias = Ipv4Addr::new(127, 0, 0, 2);
        let listener = tokio::net::TcpListener::bind((alias, 0)).await.unwrap();
        let host_port = listener.local_addr().unwrap().port();

        let engine = FakeEngine::new();
        let id = engine.add_running_container("web");
        let handle = ContainerHandle::new(
            id,
            "bound".to_string(),
            "nginx".to_string(),
            PortMapping::from_pairs([(80, host_port)]),
            Arc::new(engine.clone()),
            LifecycleConfig {
                host_ip: Some(alias.to_string()),
                ..Default::default()
            },
        );

        handle
            .wait_for_port_to_open(host_port, Duration::from_millis(500))
            .await
            .unwrap();
        handle.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_log_line_miss_is_not_a_fetch_error() {
        let engine = FakeEngine::new();
        let id = engine.add_running_container("redis");
        engine.append_logs(&id, "booting\n");
        let handle = handle_for(&engine, &id, PortMapping::default());

        let err = handle
            .wait_for_log_line("Ready to accept connections", Duration::from_millis(200))
            .await
            .unwrap_err();
        match err {
            Error::ReadinessTimeout { last_error, .. } => assert_eq!(
                last_error.as_deref(),
                Some("no log line contains 'Ready to accept connections'")
            ),
            other => panic!("unexpected error: {other}"),
        }
        handle.shutdown().await;
    }

    #[tokio::test]
    async fn test_shutdown_twice_is_harmless() {
        let engine = FakeEngine::new();
        let id = engine.add_running_container("redis");
        let handle = handle_for(&engine, &id, PortMapping::default());

        let first = handle.shutdown().await;
        assert!(first.is_clean());
        assert!(handle.is_shut_down());
        assert!(!engine.container_exists(&id));

        // Connection is closed now, so every step fails quietly.
        let second = handle.shutdown().await;
        assert_eq!(second.steps.len(), 4);
        assert!(matches!(
            second.outcome(ShutdownStep::Close),
            Some(StepOutcome::Failed(_))
        ));
    }

    #[tokio::test]
    async fn test_shutdown_uses_configured_grace_period() {
        let engine = FakeEngine::new();
        let id = engine.add_running_container("redis");
        let handle = ContainerHandle::new(
            id.clone(),
            "grace".to_string(),
            "redis".to_string(),
            PortMapping::default(),
            Arc::new(engine.clone()),
            LifecycleConfig {
                stop_grace_period: Duration::from_secs(7),
                ..Default::default()
            },
        );

        handle.shutdown().await;
        assert_eq!(engine.last_stop_grace(&id), Some(Duration::from_secs(7)));
    }
}
