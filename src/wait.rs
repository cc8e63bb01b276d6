//! Bounded-retry readiness polling.
//!
//! Engines do not push readiness events, so readiness is detected by polling
//! a predicate on a fixed interval until it succeeds or a deadline passes.
//! Evaluations start on a fixed cadence measured from the previous start, so
//! as long as one evaluation is shorter than the interval a wait returns no
//! later than one interval past its timeout.

use std::fmt::Display;
use std::future::Future;
use std::net::SocketAddr;
use std::time::Duration;

use tokio::net::TcpStream;
use tokio::time::Instant;

use crate::error::{Error, Result};

/// Interval between predicate evaluations.
pub const POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Poll `predicate` every [`POLL_INTERVAL`] until it returns `Ok` or
/// `timeout` elapses.
pub async fn wait_for<F, Fut, E>(predicate: F, timeout: Duration) -> Result<()>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = std::result::Result<(), E>>,
    E: Display,
{
    wait_for_with_interval(predicate, timeout, POLL_INTERVAL).await
}

/// Poll `predicate` every `interval` until it returns `Ok` or `timeout`
/// elapses.
///
/// Evaluations never overlap: each one is awaited before the next starts.
/// The next evaluation starts one `interval` after the previous one started,
/// not after it finished.
/// Predicate errors do not stop polling; the last one is carried by the
/// [`Error::ReadinessTimeout`] returned when the deadline passes.
pub async fn wait_for_with_interval<F, Fut, E>(
    mut predicate: F,
    timeout: Duration,
    interval: Duration,
) -> Result<()>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = std::result::Result<(), E>>,
    E: Display,
{
    let deadline = Instant::now() + timeout;
    let mut attempts: u32 = 0;

    loop {
        let attempt_start = Instant::now();
        attempts = attempts.saturating_add(1);
        let last_error = match predicate().await {
            Ok(()) => {
                tracing::trace!("Predicate succeeded after {} attempts", attempts);
                return Ok(());
            }
            Err(e) => e.to_string(),
        };

        if Instant::now() >= deadline {
            return Err(Error::ReadinessTimeout {
                timeout,
                attempts,
                last_error: Some(last_error),
            });
        }

        tracing::trace!("Predicate not yet satisfied: {}", last_error);
        // Returns at once if the evaluation already took a full interval.
        tokio::time::sleep_until(attempt_start + interval).await;
    }
}

/// Dial `addr` once; succeed iff the TCP handshake completes within
/// `dial_timeout`. The connection is dropped immediately.
pub async fn check_port_open(addr: SocketAddr, dial_timeout: Duration) -> std::io::Result<()> {
    match tokio::time::timeout(dial_timeout, TcpStream::connect(addr)).await {
        Ok(Ok(_stream)) => Ok(()),
        Ok(Err(e)) => Err(e),
        Err(_) => Err(std::io::Error::new(
            std::io::ErrorKind::TimedOut,
            format!("connect to {addr} timed out after {dial_timeout:?}"),
        )),
    }
}

/// True if any newline-separated line of `logs` contains `needle` literally.
pub fn logs_contain(logs: &[u8], needle: &str) -> bool {
    String::from_utf8_lossy(logs)
        .split('\n')
        .any(|line| line.contains(needle))
}
