use serde::{Deserialize, Serialize};

/// How the orchestrator drives its heads.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum Dispatch {
    /// One head at a time, in index order
    #[default]
    Sequential,
    /// Every head in flight at once, stepped on a worker pool
    Concurrent,
}

/// Distribution random stimulus is drawn from.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum StimulusDistribution {
    /// Uniform in `[-scale, scale)`
    #[default]
    Uniform,
    /// Zero-mean normal with standard deviation `scale`
    Normal,
}
