//! Container creation.

use std::sync::Arc;

use uuid::Uuid;

use crate::config::LifecycleConfig;
use crate::container::handle::ContainerHandle;
use crate::container::request::{ContainerRequest, PortMapping};
use crate::engine::{
    BindMount, ContainerEngine, ContainerSpec, DockerConnector, EngineConnector, HostSpec,
    RemoveContainerOptions,
};
use crate::error::{Error, Result};
use crate::image::Image;
use crate::port::allocate_free_port;

/// Start a container on the local Docker daemon, configured from the
/// environment (see [`LifecycleConfig::from_env`]).
pub async fn start_container(req: &ContainerRequest, prefix: &str) -> Result<ContainerHandle> {
    Launcher::docker()?.launch(req, prefix).await
}

/// Launches containers, opening one engine connection per container.
pub struct Launcher {
    connector: Arc<dyn EngineConnector>,
    config: LifecycleConfig,
}

impl Launcher {
    pub fn new(connector: Arc<dyn EngineConnector>, config: LifecycleConfig) -> Self {
        Self { connector, config }
    }

    /// Launcher for the local Docker daemon with configuration from the
    /// environment.
    pub fn docker() -> Result<Self> {
        Ok(Self::new(
            Arc::new(DockerConnector),
            LifecycleConfig::from_env()?,
        ))
    }

    pub fn config(&self) -> &LifecycleConfig {
        &self.config
    }

    /// Create and start a container named `{prefix}-{uuid}`.
    ///
    /// Ports are allocated before the engine is contacted, so a port
    /// allocation failure never leaves a container behind. If the container
    /// is created but fails to start, it is force-removed before the error is
    /// returned.
    pub async fn launch(&self, req: &ContainerRequest, prefix: &str) -> Result<ContainerHandle> {
        req.validate()?;

        let mounts = resolve_mounts(req)?;
        let ports = allocate_ports(&req.ports)?;

        let spec = ContainerSpec {
            image: req.image.clone(),
            cmd: req.args.clone(),
            env: req.env_list(),
            exposed_ports: req.ports.clone(),
        };
        let host = HostSpec {
            port_bindings: ports.iter().collect(),
            mounts,
            host_ip: self.config.host_ip.clone(),
        };

        let engine = self
            .connector
            .connect()
            .await
            .map_err(|e| Error::EngineUnavailable {
                reason: e.to_string(),
            })?;

        let name = container_name(prefix);
        match self
            .create_and_start(engine.as_ref(), req, &name, &spec, &host)
            .await
        {
            Ok(id) => {
                tracing::info!("Started container {} with id {}", req.image, id);
                Ok(ContainerHandle::new(
                    id,
                    name,
                    req.image.clone(),
                    ports,
                    engine,
                    self.config.clone(),
                ))
            }
            Err(e) => {
                if let Err(close_err) = engine.close().await {
                    tracing::debug!("Unable to close docker client: {}", close_err);
                }
                Err(e)
            }
        }
    }

    async fn create_and_start(
        &self,
        engine: &dyn ContainerEngine,
        req: &ContainerRequest,
        name: &str,
        spec: &ContainerSpec,
        host: &HostSpec,
    ) -> Result<String> {
        self.ensure_image(engine, &req.image, req.pull_always)
            .await?;

        let id = engine
            .create_container(name, spec, host)
            .await
            .map_err(|e| Error::ContainerCreationFailed {
                name: name.to_string(),
                reason: e.to_string(),
            })?;

        if let Err(e) = engine.start_container(&id).await {
            // Don't leave a created-but-never-started container behind.
            let removal = engine
                .remove_container(
                    &id,
                    RemoveContainerOptions {
                        remove_links: false,
                        remove_volumes: true,
                        force: true,
                    },
                )
                .await;
            if let Err(remove_err) = removal {
                tracing::warn!(
                    "Unable to remove container {} after failed start: {}",
                    name,
                    remove_err
                );
            }
            return Err(Error::ContainerStartFailed {
                name: name.to_string(),
                reason: e.to_string(),
            });
        }

        Ok(id)
    }

    /// Pull `image` if it is missing locally or if a pull is forced.
    async fn ensure_image(
        &self,
        engine: &dyn ContainerEngine,
        image: &str,
        pull_always: bool,
    ) -> Result<()> {
        let present = match engine.image_exists(image).await {
            Ok(present) => present,
            Err(e) => {
                tracing::debug!("Unable to inspect image {}: {}", image, e);
                false
            }
        };

        if present && !pull_always && !self.config.pull_always {
            tracing::debug!("Image '{}' exists locally", image);
            return Ok(());
        }

        tracing::info!("Pulling image: {}", image);
        engine
            .pull_image(image)
            .await
            .map_err(|e| Error::ImagePullFailed {
                image: image.to_string(),
                reason: e.to_string(),
            })?;
        tracing::info!("Pulled image: {}", image);
        Ok(())
    }

    /// Handle to an image on a fresh engine connection, for deletion.
    pub async fn image(&self, name: impl Into<String>) -> Result<Image> {
        let engine = self
            .connector
            .connect()
            .await
            .map_err(|e| Error::EngineUnavailable {
                reason: e.to_string(),
            })?;
        Ok(Image::new(name.into(), engine))
    }
}

fn container_name(prefix: &str) -> String {
    format!("{}-{}", prefix, Uuid::new_v4())
}

/// Absolute host paths for every bind mount.
fn resolve_mounts(req: &ContainerRequest) -> Result<Vec<BindMount>> {
    req.volume_mounts
        .iter()
        .map(|(source, target)| {
            let source = std::path::absolute(source).map_err(|e| Error::VolumeResolution {
                path: source.clone(),
                source: e,
            })?;
            Ok(BindMount {
                source,
                target: target.clone(),
            })
        })
        .collect()
}

/// One freshly allocated host port per container port.
fn allocate_ports(container_ports: &[u16]) -> Result<PortMapping> {
    let pairs = container_ports
        .iter()
        .map(|port| Ok((*port, allocate_free_port()?)))
        .collect::<Result<Vec<_>>>()?;
    Ok(PortMapping::from_pairs(pairs))
}
