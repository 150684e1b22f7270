use crate::errors::{Error, Result};
use crate::registry::RegistryClient;
use crate::OciDigest;

/// Answers whether a destination repository already holds a blob.
///
/// A missing blob is `Ok(false)`. Any failure to answer is reported as
/// [`Error::StoreUnavailable`].
#[derive(Clone)]
pub struct BlobExistenceChecker<D: RegistryClient> {
    destination: D,
}

impl<D: RegistryClient> BlobExistenceChecker<D> {
    pub fn new(destination: D) -> Self {
        Self { destination }
    }

    pub async fn exists(&self, repository: &str, digest: &OciDigest) -> Result<bool> {
        match self.destination.blob_exists(repository, digest).await {
            Ok(present) => Ok(present),
            Err(e) => match Into::<Error>::into(e) {
                Error::NotFound(_) => Ok(false),
                e @ Error::StoreUnavailable(_) => Err(e),
                e => Err(Error::StoreUnavailable(e.to_string())),
            },
        }
    }
}
