//! Fan-out of blob migrations for one image.
use std::collections::HashSet;
use std::sync::Arc;

use tokio::task::JoinSet;

use crate::config::TransferConfig;
use crate::errors::{Error, Result};
use crate::manifest::ImageBlobs;
use crate::migrate::{BlobMigrator, BlobOutcome, TransferTask};
use crate::registry::RegistryClient;
use crate::OciDigest;

/// What happened to each blob of a successful migration.
#[derive(Clone, Debug, Default)]
pub struct MigrationReport {
    pub transferred: Vec<(OciDigest, u64)>,
    pub already_present: Vec<OciDigest>,
}

impl MigrationReport {
    fn record(&mut self, digest: OciDigest, outcome: BlobOutcome) {
        match outcome {
            BlobOutcome::AlreadyPresent => self.already_present.push(digest),
            BlobOutcome::Transferred { bytes } => self.transferred.push((digest, bytes)),
        }
    }

    /// Whether the blob is known to be present at the destination.
    pub fn contains(&self, digest: &OciDigest) -> bool {
        self.already_present.contains(digest) || self.transferred.iter().any(|(d, _)| d == digest)
    }

    pub fn bytes_transferred(&self) -> u64 {
        self.transferred.iter().map(|(_, b)| b).sum()
    }
}

/// Runs one [`BlobMigrator`] per blob of an image concurrently.
///
/// All blobs are migrated or none is reported as successful: the first failure observed is
/// returned, but only after every migration already started has reached a terminal state.
/// Migrations not yet started when a failure is observed are never started.
pub struct MigrationCoordinator<S: RegistryClient, D: RegistryClient> {
    migrator: Arc<BlobMigrator<S, D>>,
    max_concurrent: usize,
}

impl<S: RegistryClient, D: RegistryClient> MigrationCoordinator<S, D> {
    pub fn new(source: S, destination: D, config: &TransferConfig) -> Self {
        Self {
            migrator: Arc::new(BlobMigrator::new(source, destination, config.pipe())),
            max_concurrent: config.max_concurrent_transfers.max(1),
        }
    }

    pub async fn migrate_all(
        &self,
        source_repository: &str,
        destination_repository: &str,
        blobs: &ImageBlobs,
    ) -> Result<MigrationReport> {
        let source_repository: Arc<str> = Arc::from(source_repository);
        let destination_repository: Arc<str> = Arc::from(destination_repository);

        // config first; a digest shared between descriptors is migrated once
        let mut seen = HashSet::new();
        let mut pending = blobs
            .iter()
            .filter(|b| seen.insert(b.digest.clone()))
            .map(|b| TransferTask {
                source_repository: source_repository.clone(),
                destination_repository: destination_repository.clone(),
                blob: b.clone(),
            })
            .collect::<Vec<_>>()
            .into_iter();

        let mut running: JoinSet<(OciDigest, Result<BlobOutcome>)> = JoinSet::new();
        let mut report = MigrationReport::default();
        let mut first_error: Option<Error> = None;

        loop {
            while first_error.is_none() && running.len() < self.max_concurrent {
                let Some(task) = pending.next() else {
                    break;
                };
                let migrator = self.migrator.clone();
                running.spawn(async move {
                    let outcome = migrator.migrate(&task).await;
                    (task.blob.digest, outcome)
                });
            }

            let joined = match running.join_next().await {
                Some(joined) => joined,
                None => break,
            };

            match joined {
                Ok((digest, Ok(outcome))) => report.record(digest, outcome),
                Ok((digest, Err(e))) => {
                    tracing::warn!("migration of {digest} failed: {e}");
                    if first_error.is_none() {
                        first_error = Some(e);
                    }
                }
                Err(e) => {
                    tracing::warn!("blob migration task did not complete: {e}");
                    if first_error.is_none() {
                        first_error = Some(e.into());
                    }
                }
            }
        }

        match first_error {
            Some(e) => {
                let skipped = pending.len();
                if skipped > 0 {
                    tracing::warn!("{skipped} blob migrations not started after failure");
                }
                Err(e)
            }
            None => {
                tracing::debug!(
                    "migrated {} blobs: {} transferred, {} already present",
                    report.transferred.len() + report.already_present.len(),
                    report.transferred.len(),
                    report.already_present.len(),
                );
                Ok(report)
            }
        }
    }
}
