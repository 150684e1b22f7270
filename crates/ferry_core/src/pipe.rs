//! Streaming transfer of a single blob from a source stream to a destination upload.
//!
//! A pull task reads the source stream into a bounded channel while the push side hands the
//! receiving end of that channel to the destination as its upload body. At most
//! [`TransferPipe::depth`] chunks are buffered at any time, so memory use does not depend on the
//! size of the blob.
use std::future::Future;

use bytes::Bytes;
use futures::stream::StreamExt;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;

use crate::errors::{BoxError, Error, Result};
use crate::registry::BlobBody;
use crate::stream::DigestBody;
use crate::OciDigest;

pub const DEFAULT_PIPE_DEPTH: usize = 8;

type Chunk = std::result::Result<Bytes, BoxError>;

/// How the pull side of a transfer ended.
#[derive(Debug)]
enum PullOutcome {
    /// Source reached end-of-stream with a matching digest and every chunk was handed over.
    Finished { bytes: u64 },
    /// The push side dropped its end of the conduit before the source was exhausted.
    ConsumerGone { bytes: u64 },
    /// Reading the source failed; the push side was sent an error item.
    Failed(Error),
}

#[derive(Clone, Copy, Debug)]
pub struct TransferPipe {
    depth: usize,
}

impl Default for TransferPipe {
    fn default() -> Self {
        Self::new(DEFAULT_PIPE_DEPTH)
    }
}

impl TransferPipe {
    pub fn new(depth: usize) -> Self {
        Self {
            depth: depth.max(1),
        }
    }

    #[inline]
    pub fn depth(&self) -> usize {
        self.depth
    }

    /// Move the bytes of `source` into the upload driven by `push`, returning the number of bytes
    /// transferred.
    ///
    /// `push` receives the read end of the conduit and must resolve once it has consumed it or
    /// failed. The source is verified against `expected` while it streams; a mismatch reaches the
    /// push side as an error item rather than a clean end-of-input.
    ///
    /// Exactly one outcome is returned. A source failure takes precedence over the push failure it
    /// provokes; a push that succeeds without draining the conduit is
    /// [`Error::DestinationIncomplete`].
    pub async fn transfer<F, Fut>(
        &self,
        source: BlobBody,
        expected: &OciDigest,
        push: F,
    ) -> Result<u64>
    where
        F: FnOnce(BlobBody) -> Fut,
        Fut: Future<Output = Result<()>>,
    {
        let (tx, rx) = mpsc::channel::<Chunk>(self.depth);
        let source = DigestBody::new(source, expected.clone());
        let pull = tokio::spawn(pull(source, tx));

        let pushed = push(ReceiverStream::new(rx).boxed()).await;
        let pulled = pull.await?;

        match (pulled, pushed) {
            (PullOutcome::Failed(e), pushed) => {
                if let Err(push_err) = pushed {
                    tracing::debug!("destination upload aborted after source failure: {push_err}");
                }
                Err(e)
            }
            (_, Err(e)) => Err(e),
            (PullOutcome::Finished { bytes }, Ok(())) => Ok(bytes),
            (PullOutcome::ConsumerGone { bytes }, Ok(())) => {
                tracing::warn!("destination accepted upload after reading only {bytes} bytes");
                Err(Error::DestinationIncomplete)
            }
        }
    }
}

async fn pull(mut source: DigestBody, tx: mpsc::Sender<Chunk>) -> PullOutcome {
    loop {
        let next = tokio::select! {
            biased;
            _ = tx.closed() => {
                return PullOutcome::ConsumerGone { bytes: source.bytes() };
            }
            next = source.next() => next,
        };

        match next {
            Some(Ok(chunk)) => {
                if tx.send(Ok(chunk)).await.is_err() {
                    return PullOutcome::ConsumerGone {
                        bytes: source.bytes(),
                    };
                }
            }
            Some(Err(e)) => {
                // the push side must see a failure, never a clean end of a truncated blob
                let _ = tx.send(Err(Box::new(Error::SourceAborted))).await;
                let e = match e.downcast::<Error>() {
                    Ok(e) => *e,
                    Err(e) => Error::SourceStream(e),
                };
                return PullOutcome::Failed(e);
            }
            None => {
                return PullOutcome::Finished {
                    bytes: source.bytes(),
                }
            }
        }
    }
}
