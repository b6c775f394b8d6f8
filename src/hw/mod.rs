//! Clocked hardware units of the attention accelerator
//!
//! The hierarchy is a [`MultiHeadAttentionUnit`] owning one
//! [`SingleHeadUnit`] per head plus a projection [`MatMulUnit`]; every head in
//! turn owns a private [`MatMulUnit`]. Parents talk to children only through
//! the start/done handshake of [`crate::sim`].

pub mod attention;
mod config;
mod error;
mod matmul;
mod softmax;
mod unit;

pub use attention::{
    HeadOperands, HeadState, InvocationStats, MhaOperands, MhaState, MultiHeadAttentionUnit,
    SingleHeadUnit,
};
pub use config::MhaConfig;
pub use error::HardwareError;
pub use matmul::{matmul_transposed, MatMulOperands, MatMulUnit};
pub use softmax::{clamp_probability, quantized_softmax, PROBABILITY_CEILING};
pub use unit::Unit;
