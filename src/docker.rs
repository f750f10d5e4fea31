use anyhow::{Context, Result};
use async_trait::async_trait;
use bollard::Docker;
use tracing::debug;

use crate::transfer::DigestInspector;

/// Registry digest lookups through the local Docker daemon's distribution
/// endpoint, using whatever credentials the daemon already has.
pub struct DockerClient {
    client: Docker,
}

impl DockerClient {
    pub fn new() -> Result<Self> {
        let client = Docker::connect_with_local_defaults()
            .context("Failed to connect to Docker daemon. Is Docker running?")?;
        Ok(Self { client })
    }

    pub async fn registry_digest(&self, image: &str) -> Result<Option<String>> {
        let inspect = self
            .client
            .inspect_registry_image(image, None)
            .await
            .context(format!("Failed to inspect registry image '{}'", image))?;

        Ok(inspect.descriptor.digest)
    }
}

#[async_trait]
impl DigestInspector for DockerClient {
    async fn inspect_digest(&self, reference: &str) -> Option<String> {
        match self.registry_digest(reference).await {
            Ok(digest) => digest,
            Err(e) => {
                debug!(reference, error = %format!("{:#}", e), "registry inspect failed");
                None
            }
        }
    }
}
