mod config;
pub use config::TransferConfig;

pub mod errors;
pub use errors::{BoxError, Error, Phase, Result};

mod oci_digest;
pub use oci_digest::{Digester, OciDigest};

pub mod registry;
pub use registry::{BlobBody, RegistryClient};

mod stream;
pub use stream::DigestBody;

pub mod pipe;
pub use pipe::TransferPipe;

mod exists;
pub use exists::BlobExistenceChecker;

pub mod migrate;
pub use migrate::{BlobMigrator, BlobOutcome, TransferTask};

pub mod coordinator;
pub use coordinator::{MigrationCoordinator, MigrationReport};

pub mod manifest;
pub use manifest::{BlobDescriptor, ImageBlobs, Manifest, ManifestAssembler};

mod copier;
pub use copier::{CopyReport, CopyRequest, ImageCopier};
