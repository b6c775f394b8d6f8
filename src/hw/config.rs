use serde::{Deserialize, Serialize};

use crate::{hw::HardwareError, utils::Dispatch};

/// Elaboration-time shape of the multi-head attention accelerator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MhaConfig {
    pub seq_len: usize,
    pub embed_dim: usize,
    #[serde(default = "default_num_heads")]
    pub num_heads: usize,
    #[serde(default)]
    pub dispatch: Dispatch,
    /// Upper bound on the worker pool used by concurrent dispatch.
    /// Defaults to one worker per head.
    #[serde(default)]
    pub worker_threads: Option<usize>,
}

fn default_num_heads() -> usize {
    MhaConfig::DEFAULT_NUM_HEADS
}

impl MhaConfig {
    pub const DEFAULT_NUM_HEADS: usize = 8;

    pub fn new(seq_len: usize, embed_dim: usize, num_heads: usize) -> Self {
        Self {
            seq_len,
            embed_dim,
            num_heads,
            dispatch: Dispatch::default(),
            worker_threads: None,
        }
    }

    pub fn with_dispatch(mut self, dispatch: Dispatch) -> Self {
        self.dispatch = dispatch;
        self
    }

    pub fn with_worker_threads(mut self, workers: usize) -> Self {
        self.worker_threads = Some(workers);
        self
    }

    pub fn head_dim(&self) -> usize {
        self.embed_dim / self.num_heads
    }

    pub fn validate(&self) -> Result<(), HardwareError> {
        if self.seq_len == 0 || self.embed_dim == 0 || self.num_heads == 0 {
            return Err(HardwareError::ConfigError(format!(
                "seq_len, embed_dim and num_heads must be non-zero (got {}, {}, {})",
                self.seq_len, self.embed_dim, self.num_heads
            )));
        }
        if self.embed_dim % self.num_heads != 0 {
            return Err(HardwareError::ConfigError(format!(
                "embed_dim {} is not divisible by num_heads {}",
                self.embed_dim, self.num_heads
            )));
        }
        if self.worker_threads == Some(0) {
            return Err(HardwareError::ConfigError(
                "worker_threads must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}
