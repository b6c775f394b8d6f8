//! Attention units
mod multihead;
mod single_head;

pub use multihead::{InvocationStats, MhaOperands, MhaState, MultiHeadAttentionUnit};
pub use single_head::{HeadOperands, HeadState, SingleHeadUnit};
