use ndarray::{ArrayView2, ArrayViewMut2};

use crate::{
    fixed::{DataT, ProbT},
    utils::softmax_safe_row,
};

/// Stored in place of any probability that would reach the saturation value
/// of [`ProbT`].
pub const PROBABILITY_CEILING: f64 = 0.999;

/// Quantizes a probability into [`ProbT`]. Anything that would round to 1.0
/// or above (and therefore land on the format's saturation value) is stored
/// as [`PROBABILITY_CEILING`].
pub fn clamp_probability(p: f64) -> ProbT {
    let q = ProbT::from_f64(p);
    if p >= 1.0 || q == ProbT::MAX {
        ProbT::from_f64(PROBABILITY_CEILING)
    } else {
        q
    }
}

/// Softmax stage of an attention head.
///
/// Each row is max-subtracted and exponentiated in f64, normalized, clamped
/// and quantized into [`ProbT`], then widened into the [`DataT`] operand
/// format of the following multiply.
pub fn quantized_softmax(scores: ArrayView2<DataT>, mut probs: ArrayViewMut2<DataT>) {
    for (score_row, mut prob_row) in scores.rows().into_iter().zip(probs.rows_mut()) {
        let p = softmax_safe_row(score_row.mapv(DataT::to_f64).view());
        for (dst, &p) in prob_row.iter_mut().zip(p.iter()) {
            *dst = clamp_probability(p).convert();
        }
    }
}
