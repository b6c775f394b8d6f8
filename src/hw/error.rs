use thiserror::Error;

use crate::sim::ProtocolError;

#[derive(Error, Debug)]
pub enum HardwareError {
    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Dimension mismatch in {unit}: {detail}")]
    DimensionMismatch { unit: String, detail: String },

    #[error("Protocol violation in {unit}: {source}")]
    Protocol {
        unit: String,
        #[source]
        source: ProtocolError,
    },

    #[error("{0} observed start with no operands bound")]
    UnboundOperands(String),

    #[error("Worker pool error: {0}")]
    WorkerPool(String),
}

impl HardwareError {
    pub fn protocol(unit: &str, source: ProtocolError) -> Self {
        HardwareError::Protocol {
            unit: unit.to_string(),
            source,
        }
    }

    pub fn mismatch(unit: &str, detail: impl Into<String>) -> Self {
        HardwareError::DimensionMismatch {
            unit: unit.to_string(),
            detail: detail.into(),
        }
    }
}
