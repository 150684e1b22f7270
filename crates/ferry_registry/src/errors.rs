//! Registry client errors

use http::StatusCode;
use thiserror;

pub type Result<T> = std::result::Result<T, Error>;

/// General purpose [`super::HttpRegistry`] error handling.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("http error: {0}")]
    HTTPError(#[from] http::Error),
    #[error("http invalid uri: {0}")]
    HTTPInvalidUri(#[from] http::uri::InvalidUri),
    #[error("http invalid header value: {0}")]
    HTTPInvalidHeaderValue(#[from] http::header::InvalidHeaderValue),
    #[error("http header is not visible ascii: {0}")]
    HTTPHeaderToStr(#[from] http::header::ToStrError),
    #[error("hyper error: {0}")]
    HyperError(#[from] hyper::Error),

    #[error("invalid url: {0}")]
    UrlParse(#[from] url::ParseError),

    #[error("{0}")]
    SerdeJsonError(#[from] serde_json::Error),

    #[error("{method} {url} timed out after {seconds}s")]
    Timeout {
        method: http::Method,
        url: String,
        seconds: u64,
    },

    #[error("refusing plain http for {0} without insecure mode")]
    InsecureUrl(String),
    #[error("registry url must be absolute: {0}")]
    RelativeUrl(String),

    #[error("{method} {url} returned {status}: {message}")]
    UnexpectedStatus {
        method: http::Method,
        url: String,
        status: StatusCode,
        message: String,
    },

    #[error("not found: {0}")]
    NotFound(String),

    #[error("registry rejected digest {digest}: {message}")]
    DigestInvalid { digest: String, message: String },

    #[error("registry rejected manifest ({status}): {message}")]
    ManifestRejected { status: StatusCode, message: String },

    #[error("authentication failed: {0}")]
    AuthenticationFailed(String),
    #[error("unparseable authentication challenge: {0}")]
    InvalidChallenge(String),

    #[error("missing header: {0}")]
    MissingHeader(&'static str),
    #[error("more than {0} redirects")]
    TooManyRedirects(usize),

    #[error(transparent)]
    Core(#[from] ferry_core::Error),
}

impl From<Error> for ferry_core::Error {
    fn from(e: Error) -> ferry_core::Error {
        match e {
            Error::Core(e) => e,
            Error::NotFound(s) => ferry_core::Error::NotFound(s),
            Error::DigestInvalid { digest, message } => ferry_core::Error::DigestMismatch {
                expected: digest,
                actual: format!("rejected by registry: {message}"),
            },
            Error::ManifestRejected { .. } => ferry_core::Error::Rejected(e.to_string()),
            e => ferry_core::Error::StoreUnavailable(e.to_string()),
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn converts_into_core_errors() {
        let e: ferry_core::Error = Error::NotFound("blob".to_string()).into();
        assert!(matches!(e, ferry_core::Error::NotFound(_)));

        let e: ferry_core::Error = Error::ManifestRejected {
            status: StatusCode::BAD_REQUEST,
            message: "MANIFEST_BLOB_UNKNOWN".to_string(),
        }
        .into();
        assert!(matches!(e, ferry_core::Error::Rejected(_)));

        let e: ferry_core::Error = Error::DigestInvalid {
            digest: "sha256:abc".to_string(),
            message: "DIGEST_INVALID".to_string(),
        }
        .into();
        assert!(
            matches!(e, ferry_core::Error::DigestMismatch { ref expected, .. } if expected == "sha256:abc")
        );

        let e: ferry_core::Error = Error::UnexpectedStatus {
            method: http::Method::GET,
            url: "https://registry.example/v2/".to_string(),
            status: StatusCode::SERVICE_UNAVAILABLE,
            message: String::new(),
        }
        .into();
        assert!(matches!(e, ferry_core::Error::StoreUnavailable(_)));

        let e: ferry_core::Error = Error::from(url::Url::parse("not a url").unwrap_err()).into();
        assert!(matches!(e, ferry_core::Error::StoreUnavailable(ref s) if s.starts_with("invalid url")));
    }
}
