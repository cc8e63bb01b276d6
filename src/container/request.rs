//! Launch request and port mapping types.

use std::collections::{BTreeMap, HashSet};
use std::path::PathBuf;

use crate::error::{Error, Result};

/// Everything needed to launch one disposable container.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ContainerRequest {
    /// Image reference, ideally pinned to a tag (e.g. `redis:4.0.11`).
    pub image: String,
    /// Container-internal TCP ports to publish on random host ports.
    pub ports: Vec<u16>,
    /// Command arguments. Empty keeps the image's default command.
    pub args: Vec<String>,
    /// Pull the image even when it is present locally.
    pub pull_always: bool,
    /// `(host_path, container_path)` bind mounts. Relative host paths are
    /// resolved against the current directory.
    pub volume_mounts: Vec<(PathBuf, String)>,
    /// `(name, value)` environment variables.
    pub env_vars: Vec<(String, String)>,
}

impl ContainerRequest {
    /// Request for `image` with nothing else configured.
    pub fn new(image: impl Into<String>) -> Self {
        Self {
            image: image.into(),
            ..Default::default()
        }
    }

    /// Publish a container port.
    pub fn port(mut self, port: u16) -> Self {
        self.ports.push(port);
        self
    }

    /// Publish several container ports.
    pub fn ports(mut self, ports: impl IntoIterator<Item = u16>) -> Self {
        self.ports.extend(ports);
        self
    }

    /// Append a command argument.
    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    /// Append command arguments.
    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Set an environment variable.
    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env_vars.push((key.into(), value.into()));
        self
    }

    /// Bind-mount a host path into the container.
    pub fn volume(mut self, host_path: impl Into<PathBuf>, container_path: impl Into<String>) -> Self {
        self.volume_mounts
            .push((host_path.into(), container_path.into()));
        self
    }

    /// Always pull the image before launching.
    pub fn pull_always(mut self, pull_always: bool) -> Self {
        self.pull_always = pull_always;
        self
    }

    /// Reject requests that cannot produce a one-to-one port mapping.
    pub fn validate(&self) -> Result<()> {
        if self.image.trim().is_empty() {
            return Err(Error::InvalidRequest {
                reason: "image must not be empty".to_string(),
            });
        }

        let mut seen = HashSet::new();
        for port in &self.ports {
            if *port == 0 {
                return Err(Error::InvalidRequest {
                    reason: "container port 0 cannot be published".to_string(),
                });
            }
            if !seen.insert(*port) {
                return Err(Error::InvalidRequest {
                    reason: format!("container port {port} requested more than once"),
                });
            }
        }
        Ok(())
    }

    /// Environment in `KEY=VALUE` form, in request order.
    pub(crate) fn env_list(&self) -> Vec<String> {
        self.env_vars
            .iter()
            .map(|(k, v)| format!("{}={}", k, v))
            .collect()
    }
}

/// Container port to host port table, fixed at launch.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PortMapping {
    ports: BTreeMap<u16, u16>,
}

impl PortMapping {
    pub(crate) fn from_pairs(pairs: impl IntoIterator<Item = (u16, u16)>) -> Self {
        Self {
            ports: pairs.into_iter().collect(),
        }
    }

    /// Host port a container port was published on.
    pub fn get(&self, container_port: u16) -> Option<u16> {
        self.ports.get(&container_port).copied()
    }

    pub fn len(&self) -> usize {
        self.ports.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ports.is_empty()
    }

    /// `(container_port, host_port)` pairs in container port order.
    pub fn iter(&self) -> impl Iterator<Item = (u16, u16)> + '_ {
        self.ports.iter().map(|(c, h)| (*c, *h))
    }
}
