//! Settings file for the CLI
//!
//! Every key is optional. `seq_len` and `embed_dim` default to the shape of
//! the stimulus being run.
//!
//! ```toml
//! [attention]
//! num_heads = 4
//! dispatch = "concurrent"
//!
//! [testbench]
//! max_cycles = 10000
//! ```
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::{
    error::SimError,
    hw::MhaConfig,
    testbench::TestbenchConfig,
    utils::{read_to_string, Dispatch},
};

/// The `[attention]` table. Unset keys fall back to the stimulus shape or to
/// the `MhaConfig` defaults.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttentionSettings {
    pub seq_len: Option<usize>,
    pub embed_dim: Option<usize>,
    pub num_heads: Option<usize>,
    pub dispatch: Option<Dispatch>,
    pub worker_threads: Option<usize>,
}

impl AttentionSettings {
    /// Builds the accelerator configuration for a stimulus of the given shape.
    pub fn resolve(&self, seq_len: usize, embed_dim: usize) -> MhaConfig {
        let config = MhaConfig::new(
            self.seq_len.unwrap_or(seq_len),
            self.embed_dim.unwrap_or(embed_dim),
            self.num_heads(),
        )
        .with_dispatch(self.dispatch.unwrap_or_default());
        match self.worker_threads {
            Some(workers) => config.with_worker_threads(workers),
            None => config,
        }
    }

    pub fn num_heads(&self) -> usize {
        self.num_heads.unwrap_or(MhaConfig::DEFAULT_NUM_HEADS)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SimSettings {
    #[serde(default)]
    pub attention: AttentionSettings,
    #[serde(default)]
    pub testbench: TestbenchConfig,
}

impl SimSettings {
    pub fn from_toml(text: &str) -> Result<Self, SimError> {
        Ok(toml::from_str(text)?)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, SimError> {
        Self::from_toml(&read_to_string(path)?)
    }
}
