//! bollard-backed [`ContainerEngine`].

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bollard::Docker;
use bollard::container::{
    Config, CreateContainerOptions, KillContainerOptions, LogsOptions, StartContainerOptions,
    StopContainerOptions,
};
use bollard::image::{CreateImageOptions, RemoveImageOptions as DockerRemoveImageOptions};
use bollard::models::{HostConfig, Mount, MountTypeEnum, PortBinding};
use bytes::BytesMut;
use futures::StreamExt;
use tokio::sync::RwLock;

use crate::engine::{
    ContainerEngine, ContainerSpec, EngineConnector, EngineError, EngineResult, HostSpec,
    LogOptions, RemoveContainerOptions, RemoveImageOptions,
};

/// Connect to the local Docker daemon.
///
/// Tries bollard's defaults first (`DOCKER_HOST`, then the platform socket),
/// then the Docker Desktop per-user socket and the rootless socket. A
/// connection is only returned once it answers a ping.
pub async fn connect_docker() -> EngineResult<Docker> {
    #[cfg_attr(not(unix), allow(unused_mut))]
    let mut last_error = match Docker::connect_with_local_defaults() {
        Ok(docker) => match docker.ping().await {
            Ok(_) => return Ok(docker),
            Err(e) => EngineError::from(e),
        },
        Err(e) => EngineError::from(e),
    };

    #[cfg(unix)]
    for socket in fallback_sockets() {
        if !socket.exists() {
            continue;
        }
        let Some(path) = socket.to_str() else {
            continue;
        };
        match Docker::connect_with_socket(path, 120, bollard::API_DEFAULT_VERSION) {
            Ok(docker) => match docker.ping().await {
                Ok(_) => {
                    tracing::debug!("Connected to Docker via {}", path);
                    return Ok(docker);
                }
                Err(e) => last_error = EngineError::from(e),
            },
            Err(e) => last_error = EngineError::from(e),
        }
    }

    Err(last_error)
}

#[cfg(unix)]
fn fallback_sockets() -> Vec<PathBuf> {
    let mut sockets = Vec::new();
    if let Some(home) = dirs::home_dir() {
        sockets.push(home.join(".docker/run/docker.sock"));
    }
    if let Some(runtime) = dirs::runtime_dir() {
        sockets.push(runtime.join("docker.sock"));
    }
    sockets
}

/// Opens one [`DockerEngine`] per call.
#[derive(Debug, Clone, Copy, Default)]
pub struct DockerConnector;

#[async_trait]
impl EngineConnector for DockerConnector {
    async fn connect(&self) -> EngineResult<Arc<dyn ContainerEngine>> {
        let engine = DockerEngine::connect().await?;
        Ok(Arc::new(engine))
    }
}

/// A single Docker daemon connection.
pub struct DockerEngine {
    docker: RwLock<Option<Docker>>,
}

impl DockerEngine {
    /// Connect and verify the daemon responds.
    pub async fn connect() -> EngineResult<Self> {
        Ok(Self::from_client(connect_docker().await?))
    }

    /// Wrap an existing client.
    pub fn from_client(docker: Docker) -> Self {
        Self {
            docker: RwLock::new(Some(docker)),
        }
    }

    async fn client(&self) -> EngineResult<Docker> {
        self.docker.read().await.clone().ok_or(EngineError::Closed)
    }
}

/// Map a 404 from the daemon to [`EngineError::NotFound`].
fn map_err(e: bollard::errors::Error, what: &str) -> EngineError {
    match e {
        bollard::errors::Error::DockerResponseServerError {
            status_code: 404, ..
        } => EngineError::NotFound(what.to_string()),
        other => EngineError::Docker(other),
    }
}

fn port_key(port: u16) -> String {
    format!("{}/tcp", port)
}

fn to_docker_config(spec: &ContainerSpec, host: &HostSpec) -> Config<String> {
    let mut port_bindings = HashMap::new();
    for (container_port, host_port) in &host.port_bindings {
        port_bindings.insert(
            port_key(*container_port),
            Some(vec![PortBinding {
                host_ip: host.host_ip.clone(),
                host_port: Some(host_port.to_string()),
            }]),
        );
    }

    // bollard expects HashMap<String, HashMap<(), ()>>
    let exposed_ports: HashMap<String, HashMap<(), ()>> = spec
        .exposed_ports
        .iter()
        .map(|port| (port_key(*port), HashMap::new()))
        .collect();

    let mounts: Vec<Mount> = host
        .mounts
        .iter()
        .map(|m| Mount {
            source: Some(m.source.to_string_lossy().into_owned()),
            target: Some(m.target.clone()),
            typ: Some(MountTypeEnum::BIND),
            ..Default::default()
        })
        .collect();

    let host_config = HostConfig {
        port_bindings: if port_bindings.is_empty() {
            None
        } else {
            Some(port_bindings)
        },
        mounts: if mounts.is_empty() { None } else { Some(mounts) },
        // Removal is explicit during shutdown
        auto_remove: Some(false),
        ..Default::default()
    };

    Config {
        image: Some(spec.image.clone()),
        cmd: if spec.cmd.is_empty() {
            None
        } else {
            Some(spec.cmd.clone())
        },
        env: if spec.env.is_empty() {
            None
        } else {
            Some(spec.env.clone())
        },
        exposed_ports: Some(exposed_ports),
        host_config: Some(host_config),
        ..Default::default()
    }
}

#[async_trait]
impl ContainerEngine for DockerEngine {
    async fn ping(&self) -> EngineResult<()> {
        self.client().await?.ping().await?;
        Ok(())
    }

    async fn image_exists(&self, image: &str) -> EngineResult<bool> {
        match self.client().await?.inspect_image(image).await {
            Ok(_) => Ok(true),
            Err(e) => match map_err(e, image) {
                EngineError::NotFound(_) => Ok(false),
                other => Err(other),
            },
        }
    }

    async fn pull_image(&self, image: &str) -> EngineResult<()> {
        let docker = self.client().await?;
        let options = CreateImageOptions {
            from_image: image.to_string(),
            ..Default::default()
        };

        let mut stream = docker.create_image(Some(options), None, None);
        while let Some(result) = stream.next().await {
            let info = result.map_err(|e| map_err(e, image))?;
            if let Some(error) = info.error {
                return Err(EngineError::Api(error));
            }
            if let Some(status) = info.status {
                tracing::trace!("Pull status: {}", status);
            }
        }
        Ok(())
    }

    async fn create_container(
        &self,
        name: &str,
        spec: &ContainerSpec,
        host: &HostSpec,
    ) -> EngineResult<String> {
        let options = CreateContainerOptions {
            name: name.to_string(),
            ..Default::default()
        };

        let response = self
            .client()
            .await?
            .create_container(Some(options), to_docker_config(spec, host))
            .await
            .map_err(|e| map_err(e, &spec.image))?;

        for warning in &response.warnings {
            tracing::warn!("Docker warning creating {}: {}", name, warning);
        }
        Ok(response.id)
    }

    async fn start_container(&self, id: &str) -> EngineResult<()> {
        self.client()
            .await?
            .start_container(id, None::<StartContainerOptions<String>>)
            .await
            .map_err(|e| map_err(e, id))
    }

    async fn stop_container(&self, id: &str, grace: Duration) -> EngineResult<()> {
        // The API takes whole seconds; round up so a short grace period is
        // never turned into an immediate kill.
        let secs = grace.as_secs() + u64::from(grace.subsec_nanos() > 0);
        let t = i64::try_from(secs).unwrap_or(i64::MAX);
        self.client()
            .await?
            .stop_container(id, Some(StopContainerOptions { t }))
            .await
            .map_err(|e| map_err(e, id))
    }

    async fn kill_container(&self, id: &str, signal: &str) -> EngineResult<()> {
        self.client()
            .await?
            .kill_container(id, Some(KillContainerOptions { signal }))
            .await
            .map_err(|e| map_err(e, id))
    }

    async fn remove_container(
        &self,
        id: &str,
        options: RemoveContainerOptions,
    ) -> EngineResult<()> {
        let options = bollard::container::RemoveContainerOptions {
            v: options.remove_volumes,
            force: options.force,
            link: options.remove_links,
        };
        self.client()
            .await?
            .remove_container(id, Some(options))
            .await
            .map_err(|e| map_err(e, id))
    }

    async fn container_logs(&self, id: &str, options: LogOptions) -> EngineResult<Vec<u8>> {
        let docker = self.client().await?;
        let options = LogsOptions::<String> {
            stdout: options.stdout,
            stderr: options.stderr,
            ..Default::default()
        };

        let mut buf = BytesMut::new();
        let mut stream = docker.logs(id, Some(options));
        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(|e| map_err(e, id))?;
            buf.extend_from_slice(&chunk.into_bytes());
        }
        Ok(buf.to_vec())
    }

    async fn remove_image(&self, image: &str, options: RemoveImageOptions) -> EngineResult<()> {
        let options = DockerRemoveImageOptions {
            force: options.force,
            noprune: !options.prune_children,
        };
        self.client()
            .await?
            .remove_image(image, Some(options), None)
            .await
            .map_err(|e| map_err(e, image))?;
        Ok(())
    }

    async fn close(&self) -> EngineResult<()> {
        // bollard has no explicit close; dropping the client releases the
        // underlying connection pool.
        match self.docker.write().await.take() {
            Some(_) => Ok(()),
            None => Err(EngineError::Closed),
        }
    }
}
