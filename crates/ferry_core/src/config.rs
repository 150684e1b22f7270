use serde::Deserialize;

use crate::pipe::{TransferPipe, DEFAULT_PIPE_DEPTH};

pub const DEFAULT_MAX_CONCURRENT_TRANSFERS: usize = 4;

/// Tuning for blob transfers.
#[derive(Clone, Debug, Deserialize)]
pub struct TransferConfig {
    /// Upper bound on blob migrations in flight for one image.
    #[serde(default = "default_max_concurrent_transfers")]
    pub max_concurrent_transfers: usize,

    /// Number of chunks buffered between the pull and push side of one transfer.
    #[serde(default = "default_pipe_depth")]
    pub pipe_depth: usize,
}

fn default_max_concurrent_transfers() -> usize {
    DEFAULT_MAX_CONCURRENT_TRANSFERS
}

fn default_pipe_depth() -> usize {
    DEFAULT_PIPE_DEPTH
}

impl Default for TransferConfig {
    fn default() -> Self {
        Self {
            max_concurrent_transfers: DEFAULT_MAX_CONCURRENT_TRANSFERS,
            pipe_depth: DEFAULT_PIPE_DEPTH,
        }
    }
}

impl TransferConfig {
    pub fn pipe(&self) -> TransferPipe {
        TransferPipe::new(self.pipe_depth)
    }
}
