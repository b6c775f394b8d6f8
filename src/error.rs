use thiserror::Error;

use crate::{
    hw::HardwareError,
    testbench::TestbenchError,
    utils::{IoError, MathError},
};

#[derive(Error, Debug)]
pub enum SimError {
    #[error("IO error: {0}")]
    Io(#[from] IoError),

    #[error("Hardware error: {0}")]
    Hardware(#[from] HardwareError),

    #[error("Testbench error: {0}")]
    Testbench(#[from] TestbenchError),

    #[error("Math error: {0}")]
    Math(#[from] MathError),

    #[error("Invalid configuration: {0}")]
    Config(#[from] toml::de::Error),
}
