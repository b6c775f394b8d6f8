//! Fixed-point numeric formats used by the datapath
mod qformat;
mod types;

pub use qformat::Fixed;
pub use types::{AccT, DataT, Matrix, ProbT, Vector, dequantize_matrix, quantize_matrix, quantize_vector};
