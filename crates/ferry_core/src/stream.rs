use core::pin::Pin;
use core::task::{Context, Poll};

use bytes::Bytes;
use futures::stream::Stream;
use pin_project::pin_project;

use crate::errors::{BoxError, Error};
use crate::registry::BlobBody;
use crate::OciDigest;
use crate::Digester;

/// Wrapper around a [`BlobBody`] that calculates the digest of the contents as they are read.
///
/// Makes use of [`super::Digester`] to incrementally calculate the digest of the stream bytes as
/// they are read and forwarded on to the next consumer. When the wrapped stream ends, the
/// calculated digest is compared against the expected one; on mismatch the stream yields a final
/// [`Error::DigestMismatch`] instead of ending, so a consumer never sees a truncated or corrupt
/// blob terminate cleanly.
#[pin_project]
pub struct DigestBody {
    body: BlobBody,
    expected: OciDigest,
    digester: Option<Digester>,
    bytes: u64,
}

impl DigestBody {
    pub fn new(body: BlobBody, expected: OciDigest) -> DigestBody {
        let digester = Some(expected.digester());
        DigestBody {
            body,
            expected,
            digester,
            bytes: 0,
        }
    }

    /// Number of bytes read from the wrapped stream so far.
    #[inline]
    pub fn bytes(&self) -> u64 {
        self.bytes
    }
}

impl Stream for DigestBody {
    type Item = std::result::Result<Bytes, BoxError>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.project();
        match this.body.as_mut().poll_next(cx) {
            Poll::Ready(Some(Ok(bytes))) => {
                // and this is where we calculate incremental digest
                if let Some(digester) = this.digester.as_mut() {
                    digester.update(bytes.as_ref());
                }
                *this.bytes += bytes.len() as u64;
                Poll::Ready(Some(Ok(bytes)))
            }
            Poll::Ready(Some(Err(e))) => {
                *this.digester = None;
                Poll::Ready(Some(Err(e)))
            }
            Poll::Ready(None) => match this.digester.take() {
                Some(digester) => {
                    let actual = digester.finalize();
                    if actual == *this.expected {
                        Poll::Ready(None)
                    } else {
                        Poll::Ready(Some(Err(Box::new(Error::DigestMismatch {
                            expected: this.expected.to_string(),
                            actual: actual.to_string(),
                        }))))
                    }
                }
                None => Poll::Ready(None),
            },
            Poll::Pending => Poll::Pending,
        }
    }
}
