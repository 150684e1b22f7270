use thiserror;

pub type Result<T> = std::result::Result<T, Error>;

/// Boxed error type carried by blob byte streams.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("invalid digest: {0}")]
    InvalidDigest(String),
    #[error("unsupported digest algorithm: {0}")]
    UnsupportedDigestAlgorithm(String),

    #[error("invalid manifest: {0}")]
    InvalidManifest(String),

    #[error("unsupported manifest schema: {0}")]
    SchemaUnsupported(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("store unavailable: {0}")]
    StoreUnavailable(String),

    #[error("digest mismatch: expected {expected}, got {actual}")]
    DigestMismatch { expected: String, actual: String },

    #[error("blob {digest} not present in {repository} after a successful transfer")]
    VerificationFailed { repository: String, digest: String },

    #[error("manifest rejected: {0}")]
    Rejected(String),

    #[error("source stream failed: {0}")]
    SourceStream(BoxError),

    #[error("source stream aborted")]
    SourceAborted,

    #[error("destination finished before consuming the whole blob")]
    DestinationIncomplete,

    #[error("{0}")]
    TokioJoinError(#[from] tokio::task::JoinError),

    #[error("error serializing manifest: {0}")]
    SerdeJsonError(#[from] serde_json::Error),

    #[error("{phase} {reference} in {repository}: {source}")]
    Context {
        phase: Phase,
        repository: String,
        reference: String,
        #[source]
        source: Box<Error>,
    },
}

impl Error {
    /// Attach the phase, repository and digest (or tag) that produced this error.
    pub fn context(self, phase: Phase, repository: &str, reference: impl ToString) -> Error {
        Error::Context {
            phase,
            repository: repository.to_string(),
            reference: reference.to_string(),
            source: Box::new(self),
        }
    }

    /// Strip any [`Error::Context`] layers and return the underlying error.
    pub fn root(&self) -> &Error {
        match self {
            Error::Context { source, .. } => source.root(),
            e => e,
        }
    }

    /// The outermost phase recorded on this error, if any.
    pub fn phase(&self) -> Option<Phase> {
        match self {
            Error::Context { phase, .. } => Some(*phase),
            _ => None,
        }
    }

    /// The outermost repository recorded on this error, if any.
    pub fn repository(&self) -> Option<&str> {
        match self {
            Error::Context { repository, .. } => Some(repository.as_str()),
            _ => None,
        }
    }

    /// The outermost digest or tag recorded on this error, if any.
    pub fn reference(&self) -> Option<&str> {
        match self {
            Error::Context { reference, .. } => Some(reference.as_str()),
            _ => None,
        }
    }
}

/// Step of an image copy, recorded on errors for diagnosis.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Phase {
    FetchingManifest,
    CheckingDestination,
    Transferring,
    Verifying,
    PublishingManifest,
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        let s = match self {
            Phase::FetchingManifest => "fetching manifest",
            Phase::CheckingDestination => "checking destination for",
            Phase::Transferring => "transferring",
            Phase::Verifying => "verifying",
            Phase::PublishingManifest => "publishing manifest",
        };
        write!(f, "{s}")
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn root_unwraps_nested_context() {
        let e = Error::VerificationFailed {
            repository: "library/alpine".to_string(),
            digest: "sha256:ccc".to_string(),
        }
        .context(Phase::Verifying, "library/alpine", "sha256:ccc");

        assert_eq!(e.phase(), Some(Phase::Verifying));
        assert_eq!(e.reference(), Some("sha256:ccc"));
        assert!(matches!(e.root(), Error::VerificationFailed { .. }));
        assert_eq!(
            format!("{e}"),
            "verifying sha256:ccc in library/alpine: blob sha256:ccc not present in \
             library/alpine after a successful transfer"
        );
    }
}
