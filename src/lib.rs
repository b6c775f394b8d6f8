pub mod analysis;
pub use analysis::{analyze_bits, FormatReport};

pub mod config;
pub use config::{AttentionSettings, SimSettings};

pub mod error;
pub use error::SimError;

pub mod fixed;
pub use fixed::{AccT, DataT, Fixed, Matrix, ProbT, Vector};

pub mod hw;
pub use hw::{MhaConfig, MultiHeadAttentionUnit, Unit};

pub mod reference;
pub use reference::{multi_head_attention_f64, project_f64, reference_forward};

pub mod sim;

pub mod stimulus;
pub use stimulus::{QuantizedStimulus, Stimulus, StimulusFiles};

pub mod testbench;
pub use testbench::{RunReport, Testbench, TestbenchConfig, TestbenchError};

pub mod utils;
pub use utils::{Dispatch, StimulusDistribution};
