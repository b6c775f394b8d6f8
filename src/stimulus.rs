//! Stimulus sets for the accelerator
//!
//! A stimulus is the five operands of one invocation in real values: Q, K and
//! V (`[seq_len, embed_dim]`), the projection weight `W_out` stored
//! `[out][in]`, and the projection bias `b_out`.
use std::path::{Path, PathBuf};

use ndarray::{Array1, Array2};
use ndarray_rand::RandomExt;
use rand::{rngs::SmallRng, SeedableRng};
use rand_distr::{Normal, Uniform};
use tracing::{debug, info};

use crate::{
    fixed::{quantize_matrix, quantize_vector, DataT, Matrix, Vector},
    hw::{MhaConfig, MhaOperands},
    utils::{
        read_matrix, read_vector, transpose, write_matrix, write_vector, Dispatch, IoError,
        MathError, StimulusDistribution,
    },
};

/// File names of a stimulus set inside one directory.
#[derive(Debug, Clone)]
pub struct StimulusFiles {
    pub q: PathBuf,
    pub k: PathBuf,
    pub v: PathBuf,
    pub w_out: PathBuf,
    pub b_out: PathBuf,
}

impl StimulusFiles {
    pub fn in_dir(dir: impl AsRef<Path>) -> Self {
        let dir = dir.as_ref();
        Self {
            q: dir.join("q.txt"),
            k: dir.join("k.txt"),
            v: dir.join("v.txt"),
            w_out: dir.join("w_out.txt"),
            b_out: dir.join("b_out.txt"),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Stimulus {
    pub q: Array2<f64>,
    pub k: Array2<f64>,
    pub v: Array2<f64>,
    /// `[out][in]`
    pub w_out: Array2<f64>,
    pub b_out: Array1<f64>,
}

impl Stimulus {
    /// Loads a stimulus set. With `transpose_w_out` the weight file is taken
    /// to be stored `[in][out]` and is transposed on load.
    pub fn load(files: &StimulusFiles, transpose_w_out: bool) -> Result<Self, IoError> {
        let w_out = read_matrix(&files.w_out)?;
        let stimulus = Self {
            q: read_matrix(&files.q)?,
            k: read_matrix(&files.k)?,
            v: read_matrix(&files.v)?,
            w_out: if transpose_w_out { transpose(w_out.view()) } else { w_out },
            b_out: read_vector(&files.b_out)?,
        };
        info!(
            seq_len = stimulus.seq_len(),
            embed_dim = stimulus.embed_dim(),
            transpose_w_out,
            "stimulus loaded"
        );
        Ok(stimulus)
    }

    /// Writes the set with `W_out` in its `[out][in]` layout.
    pub fn save(&self, files: &StimulusFiles) -> Result<(), IoError> {
        write_matrix(&files.q, &self.q)?;
        write_matrix(&files.k, &self.k)?;
        write_matrix(&files.v, &self.v)?;
        write_matrix(&files.w_out, &self.w_out)?;
        write_vector(&files.b_out, &self.b_out)?;
        debug!(dir = ?files.q.parent(), "stimulus saved");
        Ok(())
    }

    /// Draws a seeded random stimulus.
    pub fn random(
        seq_len: usize,
        embed_dim: usize,
        distribution: StimulusDistribution,
        scale: f64,
        seed: u64,
    ) -> Result<Self, MathError> {
        if !(scale.is_finite() && scale > 0.0) {
            return Err(MathError::NumericalError(format!(
                "stimulus scale must be positive and finite, got {}",
                scale
            )));
        }
        let mut rng = SmallRng::seed_from_u64(seed);
        let stimulus = match distribution {
            StimulusDistribution::Uniform => {
                let dist = Uniform::new(-scale, scale);
                Self {
                    q: Array2::random_using((seq_len, embed_dim), dist, &mut rng),
                    k: Array2::random_using((seq_len, embed_dim), dist, &mut rng),
                    v: Array2::random_using((seq_len, embed_dim), dist, &mut rng),
                    w_out: Array2::random_using((embed_dim, embed_dim), dist, &mut rng),
                    b_out: Array1::random_using(embed_dim, dist, &mut rng),
                }
            }
            StimulusDistribution::Normal => {
                let dist = Normal::new(0.0, scale)
                    .map_err(|e| MathError::NumericalError(e.to_string()))?;
                Self {
                    q: Array2::random_using((seq_len, embed_dim), dist, &mut rng),
                    k: Array2::random_using((seq_len, embed_dim), dist, &mut rng),
                    v: Array2::random_using((seq_len, embed_dim), dist, &mut rng),
                    w_out: Array2::random_using((embed_dim, embed_dim), dist, &mut rng),
                    b_out: Array1::random_using(embed_dim, dist, &mut rng),
                }
            }
        };
        debug!(seq_len, embed_dim, ?distribution, scale, seed, "stimulus generated");
        Ok(stimulus)
    }

    pub fn seq_len(&self) -> usize {
        self.q.nrows()
    }

    pub fn embed_dim(&self) -> usize {
        self.q.ncols()
    }

    /// Configuration matching this stimulus' shape.
    pub fn config(&self, num_heads: usize, dispatch: Dispatch) -> MhaConfig {
        MhaConfig::new(self.seq_len(), self.embed_dim(), num_heads).with_dispatch(dispatch)
    }

    pub fn quantize(&self) -> QuantizedStimulus {
        QuantizedStimulus {
            q: quantize_matrix(&self.q),
            k: quantize_matrix(&self.k),
            v: quantize_matrix(&self.v),
            w_out: quantize_matrix(&self.w_out),
            b_out: quantize_vector(&self.b_out),
        }
    }
}

/// A stimulus in the datapath format.
#[derive(Debug, Clone, PartialEq)]
pub struct QuantizedStimulus {
    pub q: Matrix,
    pub k: Matrix,
    pub v: Matrix,
    pub w_out: Matrix,
    pub b_out: Vector,
}

impl QuantizedStimulus {
    /// Output buffer of the right shape for one invocation.
    pub fn output_buffer(&self) -> Matrix {
        Matrix::from_elem(self.q.raw_dim(), DataT::ZERO)
    }

    /// Binds the operands of one edge.
    pub fn operands<'a>(&'a self, y: &'a mut Matrix) -> MhaOperands<'a> {
        MhaOperands {
            q: self.q.view(),
            k: self.k.view(),
            v: self.v.view(),
            w_out: self.w_out.view(),
            b_out: self.b_out.view(),
            y: y.view_mut(),
        }
    }
}
