use futures::stream::{self, StreamExt};

use ferry_core::registry::RegistryClient;
use ferry_core::BoxError;

pub use super::errors::Result;
use super::Image;

/// Pushes test images into a registry through the [`RegistryClient`] interface.
pub struct RepositoryLoader<R: RegistryClient> {
    registry: R,
}

impl<R: RegistryClient> RepositoryLoader<R> {
    pub fn new(registry: R) -> Self {
        Self { registry }
    }

    pub async fn upload_image(&self, repo_name: &str, tag: &str, image: &Image) -> Result<()> {
        tracing::info!("pushing image: {repo_name}:{tag}");

        for (digest, data) in image.blobs() {
            tracing::info!("pushing image blob: {digest} ({} bytes)", data.len());
            let body = stream::once(async move { Ok::<_, BoxError>(data) }).boxed();
            self.registry
                .upload_blob(repo_name, &digest, None, body)
                .await
                .map_err(Into::<ferry_core::Error>::into)?;
        }

        tracing::info!("pushing image manifest: {repo_name}:{tag}");
        self.registry
            .publish_manifest(repo_name, tag, &image.manifest)
            .await
            .map_err(Into::<ferry_core::Error>::into)?;
        Ok(())
    }

    pub async fn upload_images(&self, repo_name: &str, images: &[(String, Image)]) -> Result<()> {
        for (tag, image) in images {
            self.upload_image(repo_name, tag, image).await?;
        }
        Ok(())
    }
}
