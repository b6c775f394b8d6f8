//! Bit-width usage analysis
//!
//! Inspects a matrix of real values and reports the smallest Q-format that
//! covers both its magnitude and its finest nonzero detail. The report is
//! advisory; the datapath formats are fixed at build time.
use std::fmt;

use ndarray::Array2;
use tracing::info;

/// Magnitudes at or below this do not count toward the finest detail.
pub const ZERO_THRESHOLD: f64 = 1e-10;

/// Cap on the recommended fractional width.
pub const MAX_FRAC_BITS: u32 = 20;

#[derive(Debug, Clone, PartialEq)]
pub struct FormatReport {
    pub name: String,
    pub max_abs: f64,
    /// `None` when every element is (close to) zero.
    pub min_abs_nonzero: Option<f64>,
    /// Integer bits including sign.
    pub int_bits: u32,
    pub frac_bits: u32,
    pub total_bits: u32,
}

impl FormatReport {
    /// Whether a `Q<int>` format of `total` bits covers this report.
    pub fn fits(&self, total: u32, int: u32) -> bool {
        int >= self.int_bits && total.saturating_sub(int) >= self.frac_bits
    }
}

impl fmt::Display for FormatReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:<25} | range ({} .. {}) | Q{}.{} ({} bits)",
            self.name,
            self.min_abs_nonzero.unwrap_or(0.0),
            self.max_abs,
            self.int_bits,
            self.frac_bits,
            self.total_bits
        )
    }
}

pub fn analyze_bits(name: &str, matrix: &Array2<f64>) -> FormatReport {
    let max_abs = matrix.iter().map(|v| v.abs()).fold(0.0f64, f64::max);
    let min_abs_nonzero = matrix
        .iter()
        .map(|v| v.abs())
        .filter(|&a| a > ZERO_THRESHOLD)
        .reduce(f64::min);

    let magnitude_bits = if max_abs > 0.0 {
        (max_abs.log2().ceil() as i64).max(1) as u32
    } else {
        1
    };
    // one more for the sign, except for an all-zero matrix
    let int_bits = if max_abs > 0.0 { magnitude_bits + 1 } else { 1 };

    let frac_bits = min_abs_nonzero
        .map(|m| (1.0 / m).log2().ceil().clamp(0.0, MAX_FRAC_BITS as f64) as u32)
        .unwrap_or(0);

    let report = FormatReport {
        name: name.to_string(),
        max_abs,
        min_abs_nonzero,
        int_bits,
        frac_bits,
        total_bits: int_bits + frac_bits,
    };
    info!(
        stage = name,
        max_abs,
        int_bits,
        frac_bits,
        total_bits = report.total_bits,
        "bit-width analysis"
    );
    report
}
