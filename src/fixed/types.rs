use ndarray::{Array1, Array2};

use super::Fixed;

/// Activations, weights and matrix elements in and out of every unit.
pub type DataT = Fixed<32, 10>;

/// Softmax probabilities, effectively in [-1, 1).
pub type ProbT = Fixed<16, 1>;

/// Multiply-accumulate running sums, two extra integer bits of headroom.
pub type AccT = Fixed<32, 12>;

pub type Matrix = Array2<DataT>;
pub type Vector = Array1<DataT>;

pub fn quantize_matrix(values: &Array2<f64>) -> Matrix {
    values.mapv(DataT::from_f64)
}

pub fn quantize_vector(values: &Array1<f64>) -> Vector {
    values.mapv(DataT::from_f64)
}

pub fn dequantize_matrix(values: &Matrix) -> Array2<f64> {
    values.mapv(DataT::to_f64)
}
