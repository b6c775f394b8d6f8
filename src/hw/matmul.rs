use ndarray::{ArrayView1, ArrayView2, ArrayViewMut2};
use tracing::{debug, trace};

use crate::{
    fixed::{AccT, DataT},
    hw::{HardwareError, Unit},
    sim::{ChildPort, Clock},
};

/// Operands of one matrix-multiply invocation.
///
/// `w` is stored `[out_feat][in_feat]`, so the unit computes `x · wᵗ`.
#[derive(Debug)]
pub struct MatMulOperands<'a> {
    pub x: ArrayView2<'a, DataT>,    // [seq_len, in_feat]
    pub w: ArrayView2<'a, DataT>,    // [out_feat, in_feat]
    pub bias: Option<ArrayView1<'a, DataT>>, // [out_feat]
    pub y: ArrayViewMut2<'a, DataT>, // [seq_len, out_feat]
}

/// `y[i][j] = bias[j] + Σ_k x[i][k] * w[j][k]`
///
/// Products are accumulated at full precision into [`AccT`], one quantization
/// per step, and the sum is narrowed into [`DataT`] on write. Shapes must
/// agree; that is established by the composing unit, not here.
pub fn matmul_transposed(
    x: ArrayView2<DataT>,
    w: ArrayView2<DataT>,
    bias: Option<ArrayView1<DataT>>,
    mut y: ArrayViewMut2<DataT>,
) {
    debug_assert_eq!(x.ncols(), w.ncols(), "contraction length");
    debug_assert_eq!(y.dim(), (x.nrows(), w.nrows()), "output shape");

    for ((i, j), out) in y.indexed_iter_mut() {
        let sum = x
            .row(i)
            .iter()
            .zip(w.row(j).iter())
            .fold(AccT::ZERO, |acc, (&a, &b)| acc.mac(a, b));

        *out = match &bias {
            Some(bias) => DataT::exact_sum(sum, bias[j]),
            None => sum.convert(),
        };
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum MatMulState {
    Idle,
    /// result written, done held until start drops
    Done,
}

/// Matrix-multiply unit.
///
/// Start is sampled as a level at each rising edge, so it has to be stable
/// before the edge that is meant to trigger the unit.
#[derive(Debug)]
pub struct MatMulUnit {
    name: String,
    state: MatMulState,
    invocations: u64,
}

impl MatMulUnit {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            state: MatMulState::Idle,
            invocations: 0,
        }
    }

    pub fn invocations(&self) -> u64 {
        self.invocations
    }
}

impl Unit for MatMulUnit {
    type Operands<'a> = MatMulOperands<'a>;

    fn name(&self) -> &str {
        &self.name
    }

    fn posedge(
        &mut self,
        clock: &Clock,
        mut port: ChildPort<'_>,
        operands: Option<MatMulOperands<'_>>,
    ) -> Result<(), HardwareError> {
        match self.state {
            MatMulState::Idle => {
                if port.start.read() {
                    let ops = operands
                        .ok_or_else(|| HardwareError::UnboundOperands(self.name.clone()))?;
                    trace!(
                        unit = %self.name,
                        cycle = clock.cycle(),
                        rows = ops.x.nrows(),
                        in_feat = ops.x.ncols(),
                        out_feat = ops.w.nrows(),
                        "multiply"
                    );
                    matmul_transposed(ops.x, ops.w, ops.bias, ops.y);
                    self.invocations += 1;
                    port.done.write(true);
                    self.state = MatMulState::Done;
                }
            }
            MatMulState::Done => {
                if !port.start.read() {
                    port.done.write(false);
                    self.state = MatMulState::Idle;
                    debug!(unit = %self.name, cycle = clock.cycle(), "released");
                }
            }
        }
        Ok(())
    }

    fn commit(&mut self) {}

    fn is_idle(&self) -> bool {
        self.state == MatMulState::Idle
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixed::{dequantize_matrix, quantize_matrix, quantize_vector, Matrix};
    use crate::sim::{Handshake, Requester};
    use approx::assert_abs_diff_eq;
    use ndarray::{array, Array2};
    use proptest::prelude::*;
    use rand::{rngs::SmallRng, Rng, SeedableRng};

    fn run_round(unit: &mut MatMulUnit, x: &Matrix, w: &Matrix, y: &mut Matrix) -> u64 {
        let mut clock = Clock::default();
        let mut link = Handshake::new();
        let mut requester = Requester::new();
        requester.request(link.parent()).unwrap();
        link.commit();

        loop {
            assert!(clock.cycle() < 100, "matmul round did not complete");
            let ops = MatMulOperands {
                x: x.view(),
                w: w.view(),
                bias: None,
                y: y.view_mut(),
            };
            unit.posedge(&clock, link.child(), Some(ops)).unwrap();
            let finished = requester.poll(link.parent());
            link.commit();
            clock.tick();
            if finished {
                return clock.cycle();
            }
        }
    }

    #[test]
    fn test_contraction_over_second_index() {
        let x = quantize_matrix(&array![[1.0, 2.0, 3.0], [-1.0, 0.5, 0.0]]);
        let w = quantize_matrix(&array![[1.0, 0.0, -1.0], [0.5, 0.5, 0.5]]);
        let bias = quantize_vector(&array![0.25, -1.0]);
        let mut y = Matrix::from_elem((2, 2), DataT::ZERO);

        matmul_transposed(x.view(), w.view(), Some(bias.view()), y.view_mut());

        let y = dequantize_matrix(&y);
        assert_abs_diff_eq!(y[[0, 0]], 1.0 - 3.0 + 0.25);
        assert_abs_diff_eq!(y[[0, 1]], 3.0 - 1.0);
        assert_abs_diff_eq!(y[[1, 0]], -1.0 + 0.25);
        assert_abs_diff_eq!(y[[1, 1]], -0.25 - 1.0);
    }

    /// Each accumulation step rounds once into `AccT`, and widening into
    /// `DataT` is exact, so the error grows by at most half an `AccT` LSB per
    /// contraction step.
    fn accumulation_bound(in_feat: usize) -> f64 {
        in_feat as f64 * AccT::lsb() / 2.0 + 1e-9
    }

    fn check_against_exact(
        seed: u64,
        seq_len: usize,
        in_feat: usize,
        out_feat: usize,
        with_bias: bool,
    ) {
        let mut rng = SmallRng::seed_from_u64(seed);
        let mut sample = |rows: usize, cols: usize| {
            quantize_matrix(&Array2::from_shape_fn((rows, cols), |_| rng.gen_range(-4.0..4.0)))
        };
        let x = sample(seq_len, in_feat);
        let w = sample(out_feat, in_feat);
        let bias = sample(1, out_feat).row(0).to_owned();
        let mut y = Matrix::from_elem((seq_len, out_feat), DataT::ZERO);

        matmul_transposed(x.view(), w.view(), with_bias.then(|| bias.view()), y.view_mut());

        let mut exact = dequantize_matrix(&x).dot(&dequantize_matrix(&w).t());
        if with_bias {
            exact += &bias.mapv(DataT::to_f64);
        }
        for (got, want) in y.iter().zip(exact.iter()) {
            assert_abs_diff_eq!(got.to_f64(), *want, epsilon = accumulation_bound(in_feat));
        }
    }

    #[test]
    fn test_matches_exact_reference_within_accumulation_bound() {
        check_against_exact(7, 5, 6, 3, false);
        check_against_exact(8, 1, 1, 1, true);
    }

    proptest! {
        #[test]
        fn prop_any_shape_within_accumulation_bound(
            seq_len in 1usize..6,
            in_feat in 1usize..17,
            out_feat in 1usize..6,
            with_bias in any::<bool>(),
            seed in any::<u64>(),
        ) {
            check_against_exact(seed, seq_len, in_feat, out_feat, with_bias);
        }
    }

    #[test]
    fn test_accumulator_saturates_instead_of_wrapping() {
        let x = quantize_matrix(&array![[500.0, 500.0, 500.0]]);
        let w = quantize_matrix(&array![[500.0, 500.0, 500.0], [-500.0, -500.0, -500.0]]);
        let mut y = Matrix::from_elem((1, 2), DataT::ZERO);

        matmul_transposed(x.view(), w.view(), None, y.view_mut());

        assert_eq!(y[[0, 0]], DataT::MAX);
        assert_eq!(y[[0, 1]], DataT::MIN);

        let acc = (0..3).fold(AccT::ZERO, |acc, _| acc.mac(x[[0, 0]], w[[0, 0]]));
        assert_eq!(acc, AccT::MAX);
        assert!(acc.to_f64() > 0.0);
    }

    #[test]
    fn test_handshake_round_writes_result_and_rearms() {
        let x = quantize_matrix(&array![[1.0, 2.0]]);
        let w = quantize_matrix(&array![[3.0, 4.0]]);
        let mut y = Matrix::from_elem((1, 1), DataT::ZERO);
        let mut unit = MatMulUnit::new("mm");

        let cycles = run_round(&mut unit, &x, &w, &mut y);
        assert_abs_diff_eq!(y[[0, 0]].to_f64(), 11.0);
        assert!(unit.is_idle());
        assert!(cycles <= 5);

        // second invocation on the same unit
        let w = quantize_matrix(&array![[-1.0, 0.0]]);
        run_round(&mut unit, &x, &w, &mut y);
        assert_abs_diff_eq!(y[[0, 0]].to_f64(), -1.0);
        assert_eq!(unit.invocations(), 2);
    }

    #[test]
    fn test_start_without_operands_is_an_error() {
        let clock = Clock::default();
        let mut link = Handshake::new();
        link.parent().start.write(true);
        link.commit();

        let mut unit = MatMulUnit::new("mm");
        let err = unit.posedge(&clock, link.child(), None).unwrap_err();
        assert!(matches!(err, HardwareError::UnboundOperands(name) if name == "mm"));
    }
}
