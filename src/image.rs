//! Image cleanup.

use std::sync::Arc;

use crate::engine::{ContainerEngine, RemoveImageOptions};

/// A named image plus the connection used to delete it.
pub struct Image {
    name: String,
    engine: Arc<dyn ContainerEngine>,
}

impl Image {
    pub(crate) fn new(name: String, engine: Arc<dyn ContainerEngine>) -> Self {
        Self { name, engine }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Force-remove the image and its untagged parents, then close the
    /// connection. Failures are logged and otherwise ignored.
    pub async fn delete(self) {
        let options = RemoveImageOptions {
            force: true,
            prune_children: true,
        };
        match self.engine.remove_image(&self.name, options).await {
            Ok(()) => tracing::debug!("Removed image {}", self.name),
            Err(e) => tracing::debug!("Unable to remove image {}: {}", self.name, e),
        }
        if let Err(e) = self.engine.close().await {
            tracing::debug!("Unable to close docker client: {}", e);
        }
    }
}

impl std::fmt::Debug for Image {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Image")
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{FakeEngine, FakeOp};

    #[tokio::test]
    async fn test_delete_missing_image_is_quiet() {
        let engine = FakeEngine::new();
        let image = Image::new("ghost:latest".to_string(), Arc::new(engine.clone()));
        image.delete().await;
        assert!(engine.is_closed());
    }

    #[tokio::test]
    async fn test_delete_failure_still_closes() {
        let engine = FakeEngine::new();
        engine.add_image("redis");
        engine.fail_on(FakeOp::RemoveImage);
        let image = Image::new("redis".to_string(), Arc::new(engine.clone()));
        image.delete().await;
        assert!(engine.has_image("redis"));
        assert!(engine.is_closed());
    }
}
