//! An in-memory [`RegistryClient`] for exercising the replication engine.
//!
//! Blobs are verified against their digest on upload the way a real registry does. Faults can be
//! injected per digest and every call is counted so tests can assert on exactly what the engine
//! asked of each registry.
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::{self, StreamExt};

use ferry_core::registry::{BlobBody, RegistryClient};
use ferry_core::{BoxError, Error, Manifest, OciDigest};

/// Misbehaviour injected for a single digest.
#[derive(Clone, Debug)]
pub enum Fault {
    /// Existence checks fail with `StoreUnavailable`.
    ExistsUnavailable,
    /// Uploads consume the body and report success without storing anything.
    DropUpload,
    /// Uploads fail with `StoreUnavailable` without reading the body.
    RejectUpload,
    /// Uploads take this long before storing the blob.
    SlowUpload(Duration),
    /// Downloads yield the first half of the blob and then fail.
    BreakDownload,
    /// Downloads serve bytes that do not match the digest.
    CorruptDownload,
}

/// Number of calls made to each [`RegistryClient`] method.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Calls {
    pub blob_exists: usize,
    pub download_blob: usize,
    pub upload_blob: usize,
    pub fetch_manifest: usize,
    pub publish_manifest: usize,
}

#[derive(Default)]
struct State {
    blobs: HashMap<String, HashMap<OciDigest, Bytes>>,
    manifests: HashMap<(String, String), Manifest>,
    faults: HashMap<OciDigest, Fault>,
    reject_manifests: bool,
    calls: Calls,
    uploads: HashMap<OciDigest, usize>,
    published_with_missing_blobs: bool,
}

#[derive(Clone, Default)]
pub struct MemoryRegistry {
    state: Arc<Mutex<State>>,
}

impl MemoryRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state
            .lock()
            .expect("memory registry lock should never be poisoned")
    }

    pub fn insert_blob(&self, repository: &str, data: impl Into<Bytes>) -> OciDigest {
        let data = data.into();
        let digest = OciDigest::from(data.as_ref());
        self.state()
            .blobs
            .entry(repository.to_string())
            .or_default()
            .insert(digest.clone(), data);
        digest
    }

    pub fn insert_manifest(&self, repository: &str, tag: &str, manifest: Manifest) {
        self.state()
            .manifests
            .insert((repository.to_string(), tag.to_string()), manifest);
    }

    pub fn inject(&self, digest: &OciDigest, fault: Fault) {
        self.state().faults.insert(digest.clone(), fault);
    }

    pub fn reject_manifests(&self) {
        self.state().reject_manifests = true;
    }

    pub fn has_blob(&self, repository: &str, digest: &OciDigest) -> bool {
        self.state()
            .blobs
            .get(repository)
            .map(|r| r.contains_key(digest))
            .unwrap_or(false)
    }

    pub fn blob(&self, repository: &str, digest: &OciDigest) -> Option<Bytes> {
        self.state()
            .blobs
            .get(repository)
            .and_then(|r| r.get(digest).cloned())
    }

    pub fn blob_digests(&self, repository: &str) -> HashSet<OciDigest> {
        self.state()
            .blobs
            .get(repository)
            .map(|r| r.keys().cloned().collect())
            .unwrap_or_default()
    }

    pub fn manifest(&self, repository: &str, tag: &str) -> Option<Manifest> {
        self.state()
            .manifests
            .get(&(repository.to_string(), tag.to_string()))
            .cloned()
    }

    pub fn calls(&self) -> Calls {
        self.state().calls.clone()
    }

    /// Number of upload attempts for `digest`, successful or not.
    pub fn uploads_of(&self, digest: &OciDigest) -> usize {
        self.state().uploads.get(digest).copied().unwrap_or(0)
    }

    /// Whether a manifest was ever published while a blob it references was absent.
    pub fn published_with_missing_blobs(&self) -> bool {
        self.state().published_with_missing_blobs
    }

    fn fault(&self, digest: &OciDigest) -> Option<Fault> {
        self.state().faults.get(digest).cloned()
    }
}

#[async_trait]
impl RegistryClient for MemoryRegistry {
    type Error = Error;

    async fn blob_exists(&self, repository: &str, digest: &OciDigest) -> Result<bool, Error> {
        self.state().calls.blob_exists += 1;
        if let Some(Fault::ExistsUnavailable) = self.fault(digest) {
            return Err(Error::StoreUnavailable(format!(
                "injected failure checking {digest}"
            )));
        }
        Ok(self.has_blob(repository, digest))
    }

    async fn download_blob(&self, repository: &str, digest: &OciDigest) -> Result<BlobBody, Error> {
        self.state().calls.download_blob += 1;
        let data = self
            .blob(repository, digest)
            .ok_or_else(|| Error::NotFound(format!("blob {digest} in {repository}")))?;

        let body = match self.fault(digest) {
            Some(Fault::BreakDownload) => {
                let half = data.slice(..data.len() / 2);
                let broken: BoxError = "connection reset by peer".into();
                stream::iter(vec![Ok(half), Err(broken)]).boxed()
            }
            Some(Fault::CorruptDownload) => {
                let mut corrupt = data.to_vec();
                corrupt.push(b'!');
                stream::iter(vec![Ok::<_, BoxError>(Bytes::from(corrupt))]).boxed()
            }
            _ => {
                // serve in small chunks to exercise the conduit
                let chunks = data
                    .chunks(4)
                    .map(|c| Ok::<_, BoxError>(data.slice_ref(c)))
                    .collect::<Vec<_>>();
                stream::iter(chunks).boxed()
            }
        };
        Ok(body)
    }

    async fn upload_blob(
        &self,
        repository: &str,
        digest: &OciDigest,
        _content_length: Option<u64>,
        mut body: BlobBody,
    ) -> Result<(), Error> {
        {
            let mut state = self.state();
            state.calls.upload_blob += 1;
            *state.uploads.entry(digest.clone()).or_default() += 1;
        }

        let fault = self.fault(digest);
        if let Some(Fault::RejectUpload) = fault {
            return Err(Error::StoreUnavailable(format!(
                "injected failure uploading {digest}"
            )));
        }

        let mut digester = digest.digester();
        let mut data = Vec::new();
        while let Some(chunk) = body.next().await {
            let chunk = chunk
                .map_err(|e| Error::StoreUnavailable(format!("upload body failed: {e}")))?;
            digester.update(&chunk);
            data.extend_from_slice(&chunk);
        }
        let actual = digester.finalize();
        if &actual != digest {
            return Err(Error::DigestMismatch {
                expected: digest.to_string(),
                actual: actual.to_string(),
            });
        }

        match fault {
            Some(Fault::DropUpload) => return Ok(()),
            Some(Fault::SlowUpload(delay)) => tokio::time::sleep(delay).await,
            _ => {}
        }

        self.state()
            .blobs
            .entry(repository.to_string())
            .or_default()
            .insert(digest.clone(), Bytes::from(data));
        Ok(())
    }

    async fn fetch_manifest(&self, repository: &str, reference: &str) -> Result<Manifest, Error> {
        self.state().calls.fetch_manifest += 1;
        self.manifest(repository, reference)
            .ok_or_else(|| Error::NotFound(format!("manifest {repository}:{reference}")))
    }

    async fn publish_manifest(
        &self,
        repository: &str,
        reference: &str,
        manifest: &Manifest,
    ) -> Result<(), Error> {
        let mut state = self.state();
        state.calls.publish_manifest += 1;

        let referenced = std::iter::once(manifest.config())
            .chain(manifest.layers().iter())
            .map(|d| OciDigest::try_from(d.digest().as_str()))
            .collect::<Result<Vec<_>, _>>()?;
        let present = state.blobs.get(repository);
        let missing = referenced
            .iter()
            .find(|d| !present.map(|p| p.contains_key(*d)).unwrap_or(false));
        if let Some(missing) = missing {
            let msg = format!("manifest references unknown blob {missing}");
            state.published_with_missing_blobs = true;
            return Err(Error::Rejected(msg));
        }

        if state.reject_manifests {
            return Err(Error::Rejected("injected manifest rejection".to_string()));
        }

        state
            .manifests
            .insert((repository.to_string(), reference.to_string()), manifest.clone());
        Ok(())
    }
}
