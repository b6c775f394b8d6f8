use std::ops::Range;

use ndarray::{s, Array1, Array2, ArrayView1, ArrayView2, ArrayViewMut2};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum MathError {
    #[error("Dimension mismatch: {0}")]
    DimensionMismatch(String),
    #[error("Numerical error: {0}")]
    NumericalError(String),
}

/// Softmax over one row with the row maximum subtracted first, computed in f64.
///
/// A row with no finite maximum or whose exponentials sum to zero falls back
/// to a uniform distribution.
pub fn softmax_safe_row(row: ArrayView1<f64>) -> Array1<f64> {
    let len = row.len();
    let max = row.fold(f64::NEG_INFINITY, |a, &b| a.max(b));
    if !max.is_finite() {
        return Array1::from_elem(len, 1.0 / len as f64);
    }

    let exps = row.mapv(|x| (x - max).exp());
    let sum = exps.sum();
    if !(sum.is_finite() && sum > 0.0) {
        return Array1::from_elem(len, 1.0 / len as f64);
    }
    exps / sum
}

/// Row-wise [`softmax_safe_row`].
pub fn softmax_safe(matrix: ArrayView2<f64>) -> Array2<f64> {
    let mut out = Array2::zeros(matrix.raw_dim());
    for (src, mut dst) in matrix.rows().into_iter().zip(out.rows_mut()) {
        dst.assign(&softmax_safe_row(src));
    }
    out
}

pub fn transpose<A: Clone>(matrix: ArrayView2<A>) -> Array2<A> {
    matrix.t().to_owned()
}

/// Embedding columns owned by one head.
pub fn head_columns(head: usize, head_dim: usize) -> Range<usize> {
    head * head_dim..(head + 1) * head_dim
}

/// Copies the columns of `head` out of a full-width matrix.
pub fn copy_head_slice<A: Clone>(full: ArrayView2<A>, head: usize, mut dst: ArrayViewMut2<A>) {
    let head_dim = dst.ncols();
    dst.assign(&full.slice(s![.., head_columns(head, head_dim)]));
}

/// Writes one head's output back into its columns of a full-width matrix.
pub fn write_head_slice<A: Clone>(part: ArrayView2<A>, head: usize, mut full: ArrayViewMut2<A>) {
    let head_dim = part.ncols();
    full.slice_mut(s![.., head_columns(head, head_dim)]).assign(&part);
}

pub fn split_heads<A: Clone>(
    full: ArrayView2<A>,
    num_heads: usize,
) -> Result<Vec<Array2<A>>, MathError> {
    let embed_dim = full.ncols();
    if num_heads == 0 || embed_dim % num_heads != 0 {
        return Err(MathError::DimensionMismatch(format!(
            "embed_dim {} cannot be split into {} heads",
            embed_dim, num_heads
        )));
    }
    let head_dim = embed_dim / num_heads;
    Ok((0..num_heads)
        .map(|h| full.slice(s![.., head_columns(h, head_dim)]).to_owned())
        .collect())
}

pub fn merge_heads<A: Clone + Default>(heads: &[Array2<A>]) -> Result<Array2<A>, MathError> {
    let Some(first) = heads.first() else {
        return Ok(Array2::default((0, 0)));
    };
    let (rows, head_dim) = first.dim();
    if let Some(bad) = heads.iter().position(|p| p.dim() != (rows, head_dim)) {
        return Err(MathError::DimensionMismatch(format!(
            "head {} has shape {:?}, expected {:?}",
            bad,
            heads[bad].dim(),
            (rows, head_dim)
        )));
    }

    let mut merged = Array2::default((rows, head_dim * heads.len()));
    for (h, part) in heads.iter().enumerate() {
        write_head_slice(part.view(), h, merged.view_mut());
    }
    Ok(merged)
}

/// Largest element-wise absolute difference.
pub fn max_abs_diff(a: ArrayView2<f64>, b: ArrayView2<f64>) -> Result<f64, MathError> {
    if a.dim() != b.dim() {
        return Err(MathError::DimensionMismatch(format!(
            "{:?} vs {:?}",
            a.dim(),
            b.dim()
        )));
    }
    Ok(a.iter()
        .zip(b.iter())
        .map(|(x, y)| (x - y).abs())
        .fold(0.0, f64::max))
}

/// First element (row, col, a, b) that differs by more than `tolerance`.
pub fn first_mismatch(
    a: ArrayView2<f64>,
    b: ArrayView2<f64>,
    tolerance: f64,
) -> Result<Option<(usize, usize, f64, f64)>, MathError> {
    if a.dim() != b.dim() {
        return Err(MathError::DimensionMismatch(format!(
            "{:?} vs {:?}",
            a.dim(),
            b.dim()
        )));
    }
    Ok(a.indexed_iter()
        .find(|&((i, j), x)| (x - b[[i, j]]).abs() > tolerance)
        .map(|((i, j), &x)| (i, j, x, b[[i, j]])))
}

pub fn all_close(a: ArrayView2<f64>, b: ArrayView2<f64>, tolerance: f64) -> Result<bool, MathError> {
    Ok(first_mismatch(a, b, tolerance)?.is_none())
}
