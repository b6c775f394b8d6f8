use ndarray::{ArrayView2, ArrayViewMut2};
use tracing::debug;

use crate::{
    fixed::{DataT, Matrix},
    hw::{quantized_softmax, HardwareError, MatMulOperands, MatMulUnit, Unit},
    sim::{ChildPort, Clock, Edge, Handshake, ProtocolError, Requester},
};

/// Operands of one attention head, each `[seq_len, head_dim]`.
#[derive(Debug)]
pub struct HeadOperands<'a> {
    pub q: ArrayView2<'a, DataT>,
    pub k: ArrayView2<'a, DataT>,
    pub v: ArrayView2<'a, DataT>,
    pub y: ArrayViewMut2<'a, DataT>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeadState {
    Idle,
    /// round 1 on the multiply unit: scores = Q · Kᵗ
    Scoring,
    Softmax,
    /// round 2 on the multiply unit: y = probs · (Vᵗ)ᵗ
    Weighting,
    Done,
}

/// One attention head built around a single privately owned multiply unit.
///
/// No `1/sqrt(head_dim)` scaling is applied; whoever supplies Q folds it in.
#[derive(Debug)]
pub struct SingleHeadUnit {
    name: String,
    seq_len: usize,
    head_dim: usize,
    state: HeadState,
    matmul: MatMulUnit,
    matmul_link: Handshake,
    requester: Requester,
    scores: Matrix, // [seq_len, seq_len]
    probs: Matrix,  // [seq_len, seq_len], values are ProbT
    v_t: Matrix,    // [head_dim, seq_len]
    started_at: u64,
    last_latency: Option<u64>,
}

impl SingleHeadUnit {
    pub fn new(name: impl Into<String>, seq_len: usize, head_dim: usize) -> Self {
        let name = name.into();
        Self {
            matmul: MatMulUnit::new(format!("{}.matmul", name)),
            name,
            seq_len,
            head_dim,
            state: HeadState::Idle,
            matmul_link: Handshake::new(),
            requester: Requester::new(),
            scores: Matrix::from_elem((seq_len, seq_len), DataT::ZERO),
            probs: Matrix::from_elem((seq_len, seq_len), DataT::ZERO),
            v_t: Matrix::from_elem((head_dim, seq_len), DataT::ZERO),
            started_at: 0,
            last_latency: None,
        }
    }

    pub fn state(&self) -> HeadState {
        self.state
    }

    /// Probabilities of the most recent invocation.
    pub fn probabilities(&self) -> &Matrix {
        &self.probs
    }

    /// Edges from observing start to asserting done, for the last invocation.
    pub fn last_latency(&self) -> Option<u64> {
        self.last_latency
    }

    fn check_shapes(&self, ops: &HeadOperands<'_>) -> Result<(), HardwareError> {
        let expected = (self.seq_len, self.head_dim);
        for (label, dim) in [
            ("Q", ops.q.dim()),
            ("K", ops.k.dim()),
            ("V", ops.v.dim()),
            ("Y", ops.y.dim()),
        ] {
            if dim != expected {
                return Err(HardwareError::mismatch(
                    &self.name,
                    format!("{} is {:?}, expected {:?}", label, dim, expected),
                ));
            }
        }
        Ok(())
    }

    fn request_matmul(&mut self) -> Result<(), HardwareError> {
        self.requester
            .request(self.matmul_link.parent())
            .map_err(|e| HardwareError::protocol(&self.name, e))
    }

    fn unbound(&self) -> HardwareError {
        HardwareError::UnboundOperands(self.name.clone())
    }
}

impl Unit for SingleHeadUnit {
    type Operands<'a> = HeadOperands<'a>;

    fn name(&self) -> &str {
        &self.name
    }

    fn posedge(
        &mut self,
        clock: &Clock,
        mut port: ChildPort<'_>,
        mut operands: Option<HeadOperands<'_>>,
    ) -> Result<(), HardwareError> {
        // the multiply unit sees the operand set of the round in flight
        let child_ops = match (self.state, operands.as_mut()) {
            (HeadState::Scoring, Some(ops)) => Some(MatMulOperands {
                x: ops.q.view(),
                w: ops.k.view(),
                bias: None,
                y: self.scores.view_mut(),
            }),
            (HeadState::Weighting, Some(ops)) => Some(MatMulOperands {
                x: self.probs.view(),
                w: self.v_t.view(),
                bias: None,
                y: ops.y.view_mut(),
            }),
            _ => None,
        };
        self.matmul.posedge(clock, self.matmul_link.child(), child_ops)?;

        if !matches!(self.state, HeadState::Idle | HeadState::Done)
            && port.start.saw(Edge::Rising)
        {
            return Err(HardwareError::protocol(&self.name, ProtocolError::Reentered));
        }

        match self.state {
            HeadState::Idle => {
                if port.start.saw(Edge::Rising) {
                    let ops = operands.as_ref().ok_or_else(|| self.unbound())?;
                    self.check_shapes(ops)?;
                    self.request_matmul()?;
                    self.started_at = clock.cycle();
                    self.state = HeadState::Scoring;
                    debug!(unit = %self.name, cycle = clock.cycle(), "scoring");
                }
            }
            HeadState::Scoring => {
                if self.requester.poll(self.matmul_link.parent()) {
                    self.state = HeadState::Softmax;
                }
            }
            HeadState::Softmax => {
                let ops = operands.as_ref().ok_or_else(|| self.unbound())?;
                quantized_softmax(self.scores.view(), self.probs.view_mut());
                self.v_t.assign(&ops.v.t());
                self.request_matmul()?;
                self.state = HeadState::Weighting;
                debug!(unit = %self.name, cycle = clock.cycle(), "weighting");
            }
            HeadState::Weighting => {
                if self.requester.poll(self.matmul_link.parent()) {
                    port.done.write(true);
                    self.last_latency = Some(clock.cycle() - self.started_at);
                    self.state = HeadState::Done;
                    debug!(unit = %self.name, cycle = clock.cycle(), "done");
                }
            }
            HeadState::Done => {
                if !port.start.read() {
                    port.done.write(false);
                    self.state = HeadState::Idle;
                }
            }
        }
        Ok(())
    }

    fn commit(&mut self) {
        self.matmul_link.commit();
        self.matmul.commit();
    }

    fn is_idle(&self) -> bool {
        self.state == HeadState::Idle
    }
}
