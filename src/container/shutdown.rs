//! Best-effort container teardown.
//!
//! Stop, kill, remove and close run as independent steps: a failure in one
//! never skips the ones after it, and nothing is returned as an error. Each
//! step's outcome is logged and collected into a [`ShutdownReport`] for
//! callers that want to inspect it.

use std::fmt;
use std::time::Duration;

use crate::engine::{ContainerEngine, EngineError, RemoveContainerOptions};

/// Signal sent when a graceful stop fails.
pub const KILL_SIGNAL: &str = "KILL";

/// One step of the teardown sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownStep {
    Stop,
    Kill,
    Remove,
    Close,
}

impl ShutdownStep {
    pub fn as_str(&self) -> &'static str {
        match self {
            ShutdownStep::Stop => "stop",
            ShutdownStep::Kill => "kill",
            ShutdownStep::Remove => "remove",
            ShutdownStep::Close => "close",
        }
    }
}

impl fmt::Display for ShutdownStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What happened when a step ran.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StepOutcome {
    Succeeded,
    /// Not attempted (kill after a successful stop).
    Skipped,
    /// The container no longer exists.
    Gone,
    Failed(String),
}

impl StepOutcome {
    fn from_result(result: Result<(), EngineError>) -> Self {
        match result {
            Ok(()) => StepOutcome::Succeeded,
            Err(e) if e.is_not_found() => StepOutcome::Gone,
            Err(e) => StepOutcome::Failed(e.to_string()),
        }
    }

    /// True unless the step failed.
    pub fn is_ok(&self) -> bool {
        !matches!(self, StepOutcome::Failed(_))
    }
}

/// Per-step outcomes of one teardown.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShutdownReport {
    pub container_id: String,
    pub steps: Vec<(ShutdownStep, StepOutcome)>,
}

impl ShutdownReport {
    /// Outcome of `step`, if it was recorded.
    pub fn outcome(&self, step: ShutdownStep) -> Option<&StepOutcome> {
        self.steps.iter().find(|(s, _)| *s == step).map(|(_, o)| o)
    }

    /// True if no step failed.
    pub fn is_clean(&self) -> bool {
        self.steps.iter().all(|(_, o)| o.is_ok())
    }

    /// Failed steps and their reasons.
    pub fn failures(&self) -> impl Iterator<Item = (ShutdownStep, &str)> {
        self.steps.iter().filter_map(|(s, o)| match o {
            StepOutcome::Failed(reason) => Some((*s, reason.as_str())),
            _ => None,
        })
    }

    fn record(&mut self, step: ShutdownStep, outcome: StepOutcome) {
        match &outcome {
            StepOutcome::Failed(reason) => {
                tracing::debug!(
                    container_id = %self.container_id,
                    "Unable to {} container: {}",
                    step,
                    reason
                );
            }
            other => {
                tracing::trace!(container_id = %self.container_id, "{}: {:?}", step, other);
            }
        }
        self.steps.push((step, outcome));
    }
}

/// Stop, kill if needed, remove and disconnect.
///
/// 1. Stop with `grace` as the engine-side grace period.
/// 2. Kill with [`KILL_SIGNAL`] only if the stop failed for a reason other
///    than the container being gone.
/// 3. Force-remove the container with its volumes and links.
/// 4. Close the engine connection.
pub async fn shutdown_container(
    engine: &dyn ContainerEngine,
    container_id: &str,
    grace: Duration,
) -> ShutdownReport {
    let mut report = ShutdownReport {
        container_id: container_id.to_string(),
        steps: Vec::with_capacity(4),
    };

    let stop = StepOutcome::from_result(engine.stop_container(container_id, grace).await);
    let needs_kill = matches!(stop, StepOutcome::Failed(_));
    report.record(ShutdownStep::Stop, stop);

    let kill = if needs_kill {
        StepOutcome::from_result(engine.kill_container(container_id, KILL_SIGNAL).await)
    } else {
        StepOutcome::Skipped
    };
    report.record(ShutdownStep::Kill, kill);

    let remove = engine
        .remove_container(
            container_id,
            RemoveContainerOptions {
                remove_links: true,
                remove_volumes: true,
                force: true,
            },
        )
        .await;
    report.record(ShutdownStep::Remove, StepOutcome::from_result(remove));

    report.record(
        ShutdownStep::Close,
        StepOutcome::from_result(engine.close().await),
    );

    if report.is_clean() {
        tracing::debug!("Shut down container {}", container_id);
    } else {
        tracing::warn!(
            "Container {} shut down with {} failed step(s)",
            container_id,
            report.failures().count()
        );
    }

    report
}
