//! In-memory container engine for tests.
//!
//! Provides:
//! - [`FakeEngine`]: a recording [`ContainerEngine`] with injectable failures
//! - [`FakeConnector`]: hands out independent connections to one fake daemon
//!
//! # Usage
//!
//! ```rust
//! use std::sync::Arc;
//!
//! use tempdock::testing::{FakeConnector, FakeEngine};
//! use tempdock::{ContainerRequest, Launcher, LifecycleConfig};
//!
//! # tokio_test::block_on(async {
//! let engine = FakeEngine::new();
//! let launcher = Launcher::new(
//!     Arc::new(FakeConnector::new(engine.clone())),
//!     LifecycleConfig::default(),
//! );
//! let handle = launcher
//!     .launch(&ContainerRequest::new("redis:4.0.11").port(6379), "doc")
//!     .await
//!     .unwrap();
//! assert!(engine.container_exists(handle.id()));
//! handle.shutdown().await;
//! # });
//! ```

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;

use crate::engine::{
    ContainerEngine, ContainerSpec, EngineConnector, EngineError, EngineResult, HostSpec,
    LogOptions, RemoveContainerOptions, RemoveImageOptions,
};

/// Engine operations that can be made to fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FakeOp {
    Ping,
    ImageExists,
    Pull,
    Create,
    Start,
    Stop,
    Kill,
    Remove,
    Logs,
    RemoveImage,
    Close,
}

/// A call received by the fake daemon, in arrival order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineCall {
    Ping,
    ImageExists {
        image: String,
    },
    Pull {
        image: String,
    },
    Create {
        name: String,
    },
    Start {
        id: String,
    },
    Stop {
        id: String,
        grace: Duration,
    },
    Kill {
        id: String,
        signal: String,
    },
    Remove {
        id: String,
        options: RemoveContainerOptions,
    },
    Logs {
        id: String,
    },
    RemoveImage {
        image: String,
        options: RemoveImageOptions,
    },
    Close,
}

/// A container known to the fake daemon.
#[derive(Debug, Clone)]
pub struct FakeContainer {
    pub name: String,
    pub spec: ContainerSpec,
    pub host: HostSpec,
    pub running: bool,
    pub logs: Vec<u8>,
}

#[derive(Default)]
struct DaemonState {
    images: HashSet<String>,
    containers: HashMap<String, FakeContainer>,
    failures: HashSet<FakeOp>,
    calls: Vec<EngineCall>,
    next_id: u64,
}

/// One connection to an in-memory daemon.
///
/// Clones share both the daemon and the connection, so closing any clone
/// closes them all. Use [`FakeConnector`] to get independent connections to
/// the same daemon.
#[derive(Clone, Default)]
pub struct FakeEngine {
    daemon: Arc<Mutex<DaemonState>>,
    closed: Arc<AtomicBool>,
}

impl FakeEngine {
    /// A fresh daemon with no images or containers.
    pub fn new() -> Self {
        Self::default()
    }

    /// Another connection to the same daemon.
    pub fn new_connection(&self) -> Self {
        Self {
            daemon: self.daemon.clone(),
            closed: Arc::new(AtomicBool::new(false)),
        }
    }

    fn state(&self) -> MutexGuard<'_, DaemonState> {
        self.daemon.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Make every future call to `op` fail.
    pub fn fail_on(&self, op: FakeOp) {
        self.state().failures.insert(op);
    }

    pub fn clear_failure(&self, op: FakeOp) {
        self.state().failures.remove(&op);
    }

    pub fn add_image(&self, image: &str) {
        self.state().images.insert(image.to_string());
    }

    pub fn has_image(&self, image: &str) -> bool {
        self.state().images.contains(image)
    }

    /// Register a running container directly and return its id.
    pub fn add_running_container(&self, name: &str) -> String {
        let mut state = self.state();
        let id = next_container_id(&mut state);
        state.containers.insert(
            id.clone(),
            FakeContainer {
                name: name.to_string(),
                spec: ContainerSpec::default(),
                host: HostSpec::default(),
                running: true,
                logs: Vec::new(),
            },
        );
        id
    }

    /// Append output to a container's log.
    pub fn append_logs(&self, id: &str, text: &str) {
        if let Some(container) = self.state().containers.get_mut(id) {
            container.logs.extend_from_slice(text.as_bytes());
        }
    }

    pub fn container(&self, id: &str) -> Option<FakeContainer> {
        self.state().containers.get(id).cloned()
    }

    pub fn container_exists(&self, id: &str) -> bool {
        self.state().containers.contains_key(id)
    }

    pub fn container_count(&self) -> usize {
        self.state().containers.len()
    }

    /// Every call received by the daemon, across all connections.
    pub fn calls(&self) -> Vec<EngineCall> {
        self.state().calls.clone()
    }

    /// Grace period of the most recent stop call for `id`.
    pub fn last_stop_grace(&self, id: &str) -> Option<Duration> {
        self.state().calls.iter().rev().find_map(|call| match call {
            EngineCall::Stop { id: stopped, grace } if stopped == id => Some(*grace),
            _ => None,
        })
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Record `call`, then reject it if the connection is closed or `op` is
    /// set to fail.
    fn begin(&self, op: FakeOp, call: EngineCall) -> EngineResult<MutexGuard<'_, DaemonState>> {
        let mut state = self.state();
        state.calls.push(call);
        if self.is_closed() {
            return Err(EngineError::Closed);
        }
        if state.failures.contains(&op) {
            return Err(EngineError::Api(format!("injected {op:?} failure")));
        }
        Ok(state)
    }
}

fn next_container_id(state: &mut DaemonState) -> String {
    state.next_id += 1;
    format!("fake-{:012x}", state.next_id)
}

fn container_mut<'a>(
    state: &'a mut DaemonState,
    id: &str,
) -> EngineResult<&'a mut FakeContainer> {
    state
        .containers
        .get_mut(id)
        .ok_or_else(|| EngineError::NotFound(id.to_string()))
}

#[async_trait]
impl ContainerEngine for FakeEngine {
    async fn ping(&self) -> EngineResult<()> {
        self.begin(FakeOp::Ping, EngineCall::Ping)?;
        Ok(())
    }

    async fn image_exists(&self, image: &str) -> EngineResult<bool> {
        let state = self.begin(
            FakeOp::ImageExists,
            EngineCall::ImageExists {
                image: image.to_string(),
            },
        )?;
        Ok(state.images.contains(image))
    }

    async fn pull_image(&self, image: &str) -> EngineResult<()> {
        let mut state = self.begin(
            FakeOp::Pull,
            EngineCall::Pull {
                image: image.to_string(),
            },
        )?;
        state.images.insert(image.to_string());
        Ok(())
    }

    async fn create_container(
        &self,
        name: &str,
        spec: &ContainerSpec,
        host: &HostSpec,
    ) -> EngineResult<String> {
        let mut state = self.begin(
            FakeOp::Create,
            EngineCall::Create {
                name: name.to_string(),
            },
        )?;
        if !state.images.contains(&spec.image) {
            return Err(EngineError::NotFound(spec.image.clone()));
        }
        if state.containers.values().any(|c| c.name == name) {
            return Err(EngineError::Api(format!(
                "Conflict. The container name \"{name}\" is already in use"
            )));
        }
        let id = next_container_id(&mut state);
        state.containers.insert(
            id.clone(),
            FakeContainer {
                name: name.to_string(),
                spec: spec.clone(),
                host: host.clone(),
                running: false,
                logs: Vec::new(),
            },
        );
        Ok(id)
    }

    async fn start_container(&self, id: &str) -> EngineResult<()> {
        let mut state = self.begin(FakeOp::Start, EngineCall::Start { id: id.to_string() })?;
        container_mut(&mut state, id)?.running = true;
        Ok(())
    }

    async fn stop_container(&self, id: &str, grace: Duration) -> EngineResult<()> {
        let mut state = self.begin(
            FakeOp::Stop,
            EngineCall::Stop {
                id: id.to_string(),
                grace,
            },
        )?;
        container_mut(&mut state, id)?.running = false;
        Ok(())
    }

    async fn kill_container(&self, id: &str, signal: &str) -> EngineResult<()> {
        let mut state = self.begin(
            FakeOp::Kill,
            EngineCall::Kill {
                id: id.to_string(),
                signal: signal.to_string(),
            },
        )?;
        container_mut(&mut state, id)?.running = false;
        Ok(())
    }

    async fn remove_container(
        &self,
        id: &str,
        options: RemoveContainerOptions,
    ) -> EngineResult<()> {
        let mut state = self.begin(
            FakeOp::Remove,
            EngineCall::Remove {
                id: id.to_string(),
                options,
            },
        )?;
        let container = container_mut(&mut state, id)?;
        if container.running && !options.force {
            return Err(EngineError::Api(format!(
                "You cannot remove a running container {id}"
            )));
        }
        state.containers.remove(id);
        Ok(())
    }

    async fn container_logs(&self, id: &str, options: LogOptions) -> EngineResult<Vec<u8>> {
        let mut state = self.begin(FakeOp::Logs, EngineCall::Logs { id: id.to_string() })?;
        let container = container_mut(&mut state, id)?;
        if options.stdout || options.stderr {
            Ok(container.logs.clone())
        } else {
            Ok(Vec::new())
        }
    }

    async fn remove_image(&self, image: &str, options: RemoveImageOptions) -> EngineResult<()> {
        let mut state = self.begin(
            FakeOp::RemoveImage,
            EngineCall::RemoveImage {
                image: image.to_string(),
                options,
            },
        )?;
        if !state.images.remove(image) {
            return Err(EngineError::NotFound(image.to_string()));
        }
        Ok(())
    }

    async fn close(&self) -> EngineResult<()> {
        let _state = self.begin(FakeOp::Close, EngineCall::Close)?;
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }
}

/// Connector handing out independent [`FakeEngine`] connections to one
/// daemon.
pub struct FakeConnector {
    daemon: FakeEngine,
    connections: Mutex<Vec<FakeEngine>>,
    unreachable: AtomicBool,
}

impl FakeConnector {
    pub fn new(daemon: FakeEngine) -> Self {
        Self {
            daemon,
            connections: Mutex::new(Vec::new()),
            unreachable: AtomicBool::new(false),
        }
    }

    /// Make `connect` fail, as if no daemon were listening.
    pub fn set_unreachable(&self, unreachable: bool) {
        self.unreachable.store(unreachable, Ordering::SeqCst);
    }

    /// Connections opened so far, oldest first.
    pub fn connections(&self) -> Vec<FakeEngine> {
        self.connections
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    pub fn connection_count(&self) -> usize {
        self.connections
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .len()
    }
}

#[async_trait]
impl EngineConnector for FakeConnector {
    async fn connect(&self) -> EngineResult<Arc<dyn ContainerEngine>> {
        if self.unreachable.load(Ordering::SeqCst) {
            return Err(EngineError::Api(
                "Cannot connect to the Docker daemon".to_string(),
            ));
        }
        let connection = self.daemon.new_connection();
        self.connections
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(connection.clone());
        Ok(Arc::new(connection))
    }
}
