use crate::config::TransferConfig;
use crate::coordinator::{MigrationCoordinator, MigrationReport};
use crate::errors::Result;
use crate::manifest::ManifestAssembler;
use crate::registry::RegistryClient;
use crate::OciDigest;

/// Names an image in the source registry and where it should land in the destination.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CopyRequest {
    pub source_repository: String,
    pub source_tag: String,
    pub destination_repository: String,
    pub destination_tag: String,
}

impl CopyRequest {
    /// Copy `repository:tag` to the same name in the destination.
    pub fn same_name(repository: &str, tag: &str) -> Self {
        Self {
            source_repository: repository.to_string(),
            source_tag: tag.to_string(),
            destination_repository: repository.to_string(),
            destination_tag: tag.to_string(),
        }
    }
}

#[derive(Clone, Debug)]
pub struct CopyReport {
    pub manifest_digest: OciDigest,
    pub blobs: MigrationReport,
}

/// Copies images from one registry to another.
///
/// A copy fetches and validates the source manifest, migrates its config and layer blobs, and
/// publishes the manifest at the destination only once every blob is confirmed there. Running the
/// same copy again is safe: blobs that are already present are not transferred.
pub struct ImageCopier<S: RegistryClient, D: RegistryClient> {
    assembler: ManifestAssembler<S, D>,
    coordinator: MigrationCoordinator<S, D>,
}

impl<S: RegistryClient, D: RegistryClient> ImageCopier<S, D> {
    pub fn new(source: S, destination: D, config: &TransferConfig) -> Self {
        Self {
            assembler: ManifestAssembler::new(source.clone(), destination.clone()),
            coordinator: MigrationCoordinator::new(source, destination, config),
        }
    }

    pub async fn copy(&self, request: &CopyRequest) -> Result<CopyReport> {
        tracing::info!(
            "copying {}:{} to {}:{}",
            request.source_repository,
            request.source_tag,
            request.destination_repository,
            request.destination_tag,
        );

        let (manifest, blobs) = self
            .assembler
            .fetch(&request.source_repository, &request.source_tag)
            .await?;

        let report = self
            .coordinator
            .migrate_all(
                &request.source_repository,
                &request.destination_repository,
                &blobs,
            )
            .await?;

        self.assembler
            .publish(
                &request.destination_repository,
                &request.destination_tag,
                &manifest,
                &blobs,
                &report,
            )
            .await?;

        tracing::info!(
            "copied {}:{} successfully ({} blobs transferred, {} bytes)",
            request.source_repository,
            request.source_tag,
            report.transferred.len(),
            report.bytes_transferred(),
        );

        Ok(CopyReport {
            manifest_digest: manifest.digest(),
            blobs: report,
        })
    }
}
