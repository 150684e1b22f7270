//! Idempotent migration of a single blob.
//!
//! Each blob goes through
//!
//! ```text
//! CheckingDestination -> present: done
//!                     -> absent:  Transferring -> Verifying -> done | failed
//! ```
//!
//! The destination is queried both before the transfer, so blobs that are already there are never
//! moved again, and after it, so that an upload the destination acknowledged but did not keep is
//! reported as [`Error::VerificationFailed`] instead of passing silently.
use std::sync::Arc;

use crate::errors::{Error, Phase, Result};
use crate::exists::BlobExistenceChecker;
use crate::manifest::BlobDescriptor;
use crate::pipe::TransferPipe;
use crate::registry::RegistryClient;

/// "Ensure this blob exists in the destination repository, sourced from the source repository."
#[derive(Clone, Debug)]
pub struct TransferTask {
    pub source_repository: Arc<str>,
    pub destination_repository: Arc<str>,
    pub blob: BlobDescriptor,
}

impl TransferTask {
    fn context(&self, phase: Phase, e: Error) -> Error {
        e.context(phase, &self.destination_repository, &self.blob.digest)
    }

    fn source_context(&self, phase: Phase, e: Error) -> Error {
        e.context(phase, &self.source_repository, &self.blob.digest)
    }
}

/// Terminal success states of a blob migration.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BlobOutcome {
    /// The destination already had the blob; nothing was transferred.
    AlreadyPresent,
    /// The blob was streamed to the destination and confirmed present afterwards.
    Transferred { bytes: u64 },
}

pub struct BlobMigrator<S: RegistryClient, D: RegistryClient> {
    source: S,
    destination: D,
    checker: BlobExistenceChecker<D>,
    pipe: TransferPipe,
}

impl<S: RegistryClient, D: RegistryClient> BlobMigrator<S, D> {
    pub fn new(source: S, destination: D, pipe: TransferPipe) -> Self {
        Self {
            source,
            checker: BlobExistenceChecker::new(destination.clone()),
            destination,
            pipe,
        }
    }

    pub async fn migrate(&self, task: &TransferTask) -> Result<BlobOutcome> {
        let digest = &task.blob.digest;

        tracing::debug!("checking {} for {digest}", task.destination_repository);
        let present = self
            .checker
            .exists(&task.destination_repository, digest)
            .await
            .map_err(|e| task.context(Phase::CheckingDestination, e))?;
        if present {
            tracing::info!(
                "{digest} already exists in {}, skipping",
                task.destination_repository
            );
            return Ok(BlobOutcome::AlreadyPresent);
        }

        tracing::info!(
            "transferring {digest} from {} to {}",
            task.source_repository,
            task.destination_repository
        );
        let bytes = self.transfer(task).await?;

        tracing::debug!("verifying {digest} in {}", task.destination_repository);
        let present = self
            .checker
            .exists(&task.destination_repository, digest)
            .await
            .map_err(|e| task.context(Phase::Verifying, e))?;
        if !present {
            return Err(task.context(
                Phase::Verifying,
                Error::VerificationFailed {
                    repository: task.destination_repository.to_string(),
                    digest: digest.to_string(),
                },
            ));
        }

        tracing::info!("transferred {digest} ({bytes} bytes)");
        Ok(BlobOutcome::Transferred { bytes })
    }

    /// Errors carry the repository of the side that failed.
    async fn transfer(&self, task: &TransferTask) -> Result<u64> {
        let source = self
            .source
            .download_blob(&task.source_repository, &task.blob.digest)
            .await
            .map_err(|e| task.source_context(Phase::Transferring, e.into()))?;

        let destination = self.destination.clone();
        let repository = task.destination_repository.clone();
        let digest = task.blob.digest.clone();
        let content_length = task.blob.size;

        self.pipe
            .transfer(source, &task.blob.digest, |body| async move {
                destination
                    .upload_blob(&repository, &digest, content_length, body)
                    .await
                    .map_err(Into::<Error>::into)
            })
            .await
            .map_err(|e| match e {
                Error::SourceStream(_) | Error::SourceAborted => {
                    task.source_context(Phase::Transferring, e)
                }
                e => task.context(Phase::Transferring, e),
            })
    }
}
