//! # Registry Abstractions
//!
//! Defines the interoperability layer between the replication engine in this crate and the
//! registries it reads from and writes to.
//!
//! A [`RegistryClient`] is scoped to a single registry endpoint; the repository is passed on each
//! call so that one client can serve every repository of a registry. Credential resolution,
//! session establishment, TLS and request timeouts are the concern of the implementation and are
//! fixed when it is constructed.
//!
//! ## Known Implementations
//!
//! ### ferry_registry
//!
//! Talks to a registry over the [OCI Distribution
//! API](https://github.com/opencontainers/distribution-spec/blob/main/spec.md) using hyper.
//!
//! ### ferry_test
//!
//! In-memory registry used to exercise the engine with call counting and failure injection.
use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::BoxStream;

use crate::errors::BoxError;
use crate::manifest::Manifest;
use crate::oci_digest::OciDigest;

/// Stream of blob bytes flowing out of a source registry or into a destination registry.
pub type BlobBody = BoxStream<'static, std::result::Result<Bytes, BoxError>>;

/// Provides access to the blobs and manifests of a registry.
///
/// Every method fails with an error convertible into [`crate::Error`]; implementations are
/// expected to map their failures onto that taxonomy (eg `NotFound`, `StoreUnavailable`,
/// `DigestMismatch`, `Rejected`).
#[async_trait]
pub trait RegistryClient: Clone + Send + Sync + 'static {
    type Error: std::error::Error + Into<crate::errors::Error> + Send + Sync + 'static;

    /// Whether the blob identified by `digest` is present in `repository`. A missing blob is
    /// `Ok(false)`; an error means the question could not be answered.
    async fn blob_exists(
        &self,
        repository: &str,
        digest: &OciDigest,
    ) -> std::result::Result<bool, Self::Error>;

    /// Open a read stream over the blob's bytes.
    async fn download_blob(
        &self,
        repository: &str,
        digest: &OciDigest,
    ) -> std::result::Result<BlobBody, Self::Error>;

    /// Store the bytes of `body` under `digest`. The registry must reject content that does not
    /// hash to `digest`. The call completes only once `body` has been fully consumed or the
    /// upload has failed.
    async fn upload_blob(
        &self,
        repository: &str,
        digest: &OciDigest,
        content_length: Option<u64>,
        body: BlobBody,
    ) -> std::result::Result<(), Self::Error>;

    /// Fetch the image manifest tagged `reference`.
    async fn fetch_manifest(
        &self,
        repository: &str,
        reference: &str,
    ) -> std::result::Result<Manifest, Self::Error>;

    /// Publish `manifest` under the tag `reference`.
    async fn publish_manifest(
        &self,
        repository: &str,
        reference: &str,
        manifest: &Manifest,
    ) -> std::result::Result<(), Self::Error>;
}
