//! Stimulus driver for the multi-head attention unit
//!
//! Owns the clock, the top-level handshake and the orchestrator. A run waits
//! out the start delay, pulses start for exactly one edge, then steps the
//! clock until the orchestrator has raised and released done. Liveness is
//! enforced here with a cycle budget; the hardware itself never times out.
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{info, trace};

use crate::{
    fixed::Matrix,
    hw::{HardwareError, MhaConfig, MhaOperands, MultiHeadAttentionUnit, Unit},
    sim::{Clock, Handshake},
    stimulus::QuantizedStimulus,
};

#[derive(Error, Debug)]
pub enum TestbenchError {
    #[error("{unit} did not finish within {cycles} cycles")]
    Timeout { unit: String, cycles: u64 },

    #[error(transparent)]
    Hardware(#[from] HardwareError),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestbenchConfig {
    /// Edges a single run may take before it is declared hung.
    #[serde(default = "default_max_cycles")]
    pub max_cycles: u64,
    /// Idle edges before start is pulsed.
    #[serde(default = "default_start_delay")]
    pub start_delay_cycles: u64,
    #[serde(default = "default_clock_period")]
    pub clock_period_ns: u64,
}

fn default_max_cycles() -> u64 {
    1_000_000
}

fn default_start_delay() -> u64 {
    1
}

fn default_clock_period() -> u64 {
    Clock::DEFAULT_PERIOD_NS
}

impl Default for TestbenchConfig {
    fn default() -> Self {
        Self {
            max_cycles: default_max_cycles(),
            start_delay_cycles: default_start_delay(),
            clock_period_ns: default_clock_period(),
        }
    }
}

/// Outcome of one run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunReport {
    /// Edges from the orchestrator observing start to it asserting done.
    pub cycles: u64,
    /// Per-head latency, in head index order.
    pub head_cycles: Vec<u64>,
    /// Simulated time at which done was observed.
    pub done_at_ns: u64,
}

pub struct Testbench {
    config: TestbenchConfig,
    clock: Clock,
    link: Handshake,
    unit: MultiHeadAttentionUnit,
}

impl Testbench {
    pub fn new(attention: MhaConfig, config: TestbenchConfig) -> Result<Self, HardwareError> {
        Ok(Self {
            clock: Clock::new(config.clock_period_ns),
            link: Handshake::new(),
            unit: MultiHeadAttentionUnit::new(attention)?,
            config,
        })
    }

    pub fn clock(&self) -> &Clock {
        &self.clock
    }

    pub fn unit(&self) -> &MultiHeadAttentionUnit {
        &self.unit
    }

    fn edge(&mut self, start: bool, ops: &mut MhaOperands<'_>) -> Result<(), HardwareError> {
        self.link.parent().start.write(start);
        let bound = MhaOperands {
            q: ops.q.view(),
            k: ops.k.view(),
            v: ops.v.view(),
            w_out: ops.w_out.view(),
            b_out: ops.b_out.view(),
            y: ops.y.view_mut(),
        };
        self.unit.posedge(&self.clock, self.link.child(), Some(bound))?;
        self.link.commit();
        self.unit.commit();
        trace!(
            cycle = self.clock.cycle(),
            start = self.link.start(),
            done = self.link.done(),
            "edge"
        );
        self.clock.tick();
        Ok(())
    }

    /// Runs one invocation with the given operands and returns once the
    /// orchestrator is idle again.
    pub fn run(&mut self, mut operands: MhaOperands<'_>) -> Result<RunReport, TestbenchError> {
        let budget_start = self.clock.cycle();
        let max_cycles = self.config.max_cycles;
        let timeout = |clock: &Clock, unit: &MultiHeadAttentionUnit| {
            if clock.cycle() - budget_start >= max_cycles {
                Err(TestbenchError::Timeout {
                    unit: unit.name().to_string(),
                    cycles: max_cycles,
                })
            } else {
                Ok(())
            }
        };

        for _ in 0..self.config.start_delay_cycles {
            self.edge(false, &mut operands)?;
        }

        // start is high for exactly one edge
        self.edge(true, &mut operands)?;
        while !self.link.done() {
            timeout(&self.clock, &self.unit)?;
            self.edge(false, &mut operands)?;
        }
        let done_at_ns = self.clock.now_ns();

        while self.link.done() || !self.unit.is_idle() {
            timeout(&self.clock, &self.unit)?;
            self.edge(false, &mut operands)?;
        }

        let stats = self.unit.last_stats().cloned().unwrap_or_default();
        info!(cycles = stats.cycles, done_at_ns, "run complete");
        Ok(RunReport {
            cycles: stats.cycles,
            head_cycles: stats.head_cycles,
            done_at_ns,
        })
    }

    /// Runs a quantized stimulus into a fresh output buffer.
    pub fn simulate(
        &mut self,
        stimulus: &QuantizedStimulus,
    ) -> Result<(Matrix, RunReport), TestbenchError> {
        let mut y = stimulus.output_buffer();
        let report = self.run(stimulus.operands(&mut y))?;
        Ok((y, report))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixed::dequantize_matrix;
    use crate::reference::reference_forward;
    use crate::stimulus::Stimulus;
    use crate::utils::{all_close, Dispatch, StimulusDistribution};
    use approx::assert_abs_diff_eq;
    use ndarray::{array, Array1, Array2};

    fn scenario() -> Stimulus {
        let x = array![[1.0, 0.0, 1.0, 0.0], [0.0, 1.0, 0.0, 1.0]];
        Stimulus {
            q: x.clone(),
            k: x.clone(),
            v: x,
            w_out: Array2::eye(4),
            b_out: Array1::zeros(4),
        }
    }

    #[test]
    fn test_scenario_matches_reference() {
        let stimulus = scenario();
        let mut bench =
            Testbench::new(stimulus.config(2, Dispatch::Sequential), TestbenchConfig::default())
                .unwrap();

        let (y, report) = bench.simulate(&stimulus.quantize()).unwrap();

        let reference = reference_forward(
            stimulus.q.view(),
            stimulus.k.view(),
            stimulus.v.view(),
            stimulus.w_out.view(),
            stimulus.b_out.view(),
            2,
        )
        .unwrap();
        let got = dequantize_matrix(&y);
        assert!(all_close(got.view(), reference.output.unwrap().view(), 1e-4).unwrap());
        assert_abs_diff_eq!(got[[0, 0]], 0.731, epsilon = 1e-3);
        assert_eq!(report.head_cycles.len(), 2);
        assert!(report.cycles > 0);
        assert!(report.done_at_ns > 0);
    }

    #[test]
    fn test_random_stimulus_within_tolerance() {
        let stimulus = Stimulus::random(4, 16, StimulusDistribution::Uniform, 1.0, 21).unwrap();
        for dispatch in [Dispatch::Sequential, Dispatch::Concurrent] {
            let mut bench =
                Testbench::new(stimulus.config(4, dispatch), TestbenchConfig::default()).unwrap();
            let (y, _) = bench.simulate(&stimulus.quantize()).unwrap();
            let reference = reference_forward(
                stimulus.q.view(),
                stimulus.k.view(),
                stimulus.v.view(),
                stimulus.w_out.view(),
                stimulus.b_out.view(),
                4,
            )
            .unwrap();
            let got = dequantize_matrix(&y);
            assert!(all_close(got.view(), reference.output.unwrap().view(), 0.01).unwrap());
        }
    }

    #[test]
    fn test_repeated_runs_reuse_the_orchestrator() {
        let stimulus = scenario().quantize();
        let mut bench = Testbench::new(MhaConfig::new(2, 4, 2), TestbenchConfig::default()).unwrap();

        let (first_y, first) = bench.simulate(&stimulus).unwrap();
        let (second_y, second) = bench.simulate(&stimulus).unwrap();

        assert_eq!(first_y, second_y);
        assert_eq!(first.cycles, second.cycles);
        assert!(second.done_at_ns > first.done_at_ns);
        assert!(bench.unit().is_idle());
    }

    #[test]
    fn test_cycle_budget_is_enforced() {
        let stimulus = scenario().quantize();
        let config = TestbenchConfig {
            max_cycles: 5,
            ..TestbenchConfig::default()
        };
        let mut bench = Testbench::new(MhaConfig::new(2, 4, 2), config).unwrap();

        let err = bench.simulate(&stimulus).unwrap_err();
        assert!(matches!(err, TestbenchError::Timeout { cycles: 5, .. }));
    }

    #[test]
    fn test_hardware_errors_pass_through() {
        let stimulus = Stimulus::random(2, 8, StimulusDistribution::Uniform, 1.0, 4).unwrap();
        let mut bench = Testbench::new(MhaConfig::new(2, 4, 2), TestbenchConfig::default()).unwrap();
        let err = bench.simulate(&stimulus.quantize()).unwrap_err();
        assert!(matches!(
            err,
            TestbenchError::Hardware(HardwareError::DimensionMismatch { .. })
        ));
    }

    #[test]
    fn test_config_defaults_from_toml() {
        let config: TestbenchConfig = toml::from_str("max_cycles = 100").unwrap();
        assert_eq!(config.max_cycles, 100);
        assert_eq!(config.start_delay_cycles, 1);
        assert_eq!(config.clock_period_ns, 10);
    }
}
