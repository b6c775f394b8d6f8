//! Floating-point reference model
//!
//! Same split, score, softmax, weighting and merge as the accelerator, in
//! unconstrained f64 arithmetic. The softmax here is unclamped, so any
//! difference against the simulator is pure quantization error.
use ndarray::{Array2, ArrayView1, ArrayView2};
use tracing::debug;

use crate::utils::{merge_heads, softmax_safe, split_heads, MathError};

/// Intermediate matrices of one head.
#[derive(Debug, Clone)]
pub struct HeadTrace {
    pub scores: Array2<f64>,
    pub probs: Array2<f64>,
    pub output: Array2<f64>,
}

/// Every stage of the reference computation, in evaluation order.
#[derive(Debug, Clone)]
pub struct ReferenceTrace {
    pub heads: Vec<HeadTrace>,
    pub merged: Array2<f64>,
    pub output: Option<Array2<f64>>,
}

impl ReferenceTrace {
    /// Labelled stage matrices, the way a bit-width survey walks them.
    pub fn stages(&self) -> Vec<(String, &Array2<f64>)> {
        let mut stages = Vec::with_capacity(self.heads.len() * 3 + 2);
        for (h, head) in self.heads.iter().enumerate() {
            stages.push((format!("head {} scores", h), &head.scores));
            stages.push((format!("head {} softmax", h), &head.probs));
            stages.push((format!("head {} output", h), &head.output));
        }
        stages.push(("merged".to_string(), &self.merged));
        if let Some(output) = &self.output {
            stages.push(("final output".to_string(), output));
        }
        stages
    }
}

/// One unscaled attention head: `softmax(Q · Kᵗ) · V`.
pub fn attention_head(q: ArrayView2<f64>, k: ArrayView2<f64>, v: ArrayView2<f64>) -> HeadTrace {
    let scores = q.dot(&k.t());
    let probs = softmax_safe(scores.view());
    let output = probs.dot(&v);
    HeadTrace { scores, probs, output }
}

pub fn trace_multi_head(
    q: ArrayView2<f64>,
    k: ArrayView2<f64>,
    v: ArrayView2<f64>,
    num_heads: usize,
) -> Result<ReferenceTrace, MathError> {
    if q.dim() != k.dim() || q.dim() != v.dim() {
        return Err(MathError::DimensionMismatch(format!(
            "Q {:?}, K {:?}, V {:?}",
            q.dim(),
            k.dim(),
            v.dim()
        )));
    }
    let q_heads = split_heads(q, num_heads)?;
    let k_heads = split_heads(k, num_heads)?;
    let v_heads = split_heads(v, num_heads)?;

    let heads: Vec<HeadTrace> = q_heads
        .iter()
        .zip(&k_heads)
        .zip(&v_heads)
        .map(|((q, k), v)| attention_head(q.view(), k.view(), v.view()))
        .collect();

    let outputs: Vec<Array2<f64>> = heads.iter().map(|head| head.output.clone()).collect();
    let merged = merge_heads(&outputs)?;
    debug!(num_heads, shape = ?merged.dim(), "reference heads merged");

    Ok(ReferenceTrace { heads, merged, output: None })
}

/// Split, attend and merge, without the output projection.
pub fn multi_head_attention_f64(
    q: ArrayView2<f64>,
    k: ArrayView2<f64>,
    v: ArrayView2<f64>,
    num_heads: usize,
) -> Result<Array2<f64>, MathError> {
    Ok(trace_multi_head(q, k, v, num_heads)?.merged)
}

/// Output projection `merged · w_outᵗ + b_out` with `w_out` stored
/// `[out][in]`, the layout the projection unit consumes.
pub fn project_f64(
    merged: ArrayView2<f64>,
    w_out: ArrayView2<f64>,
    b_out: ArrayView1<f64>,
) -> Result<Array2<f64>, MathError> {
    if merged.ncols() != w_out.ncols() || w_out.nrows() != b_out.len() {
        return Err(MathError::DimensionMismatch(format!(
            "merged {:?}, W_out {:?}, b_out {}",
            merged.dim(),
            w_out.dim(),
            b_out.len()
        )));
    }
    Ok(merged.dot(&w_out.t()) + &b_out)
}

/// Full reference pass including the projection.
pub fn reference_forward(
    q: ArrayView2<f64>,
    k: ArrayView2<f64>,
    v: ArrayView2<f64>,
    w_out: ArrayView2<f64>,
    b_out: ArrayView1<f64>,
    num_heads: usize,
) -> Result<ReferenceTrace, MathError> {
    let mut trace = trace_multi_head(q, k, v, num_heads)?;
    trace.output = Some(project_f64(trace.merged.view(), w_out, b_out)?);
    Ok(trace)
}
