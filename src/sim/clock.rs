/// Shared clock. One call to [`Clock::tick`] is one rising edge.
#[derive(Debug, Clone)]
pub struct Clock {
    cycle: u64,
    period_ns: u64,
}

impl Clock {
    pub const DEFAULT_PERIOD_NS: u64 = 10;

    pub fn new(period_ns: u64) -> Self {
        Self { cycle: 0, period_ns }
    }

    /// Number of rising edges elapsed.
    pub fn cycle(&self) -> u64 {
        self.cycle
    }

    /// Simulated time of the current edge.
    pub fn now_ns(&self) -> u64 {
        self.cycle * self.period_ns
    }

    pub fn period_ns(&self) -> u64 {
        self.period_ns
    }

    pub fn tick(&mut self) {
        self.cycle += 1;
    }
}

impl Default for Clock {
    fn default() -> Self {
        Self::new(Self::DEFAULT_PERIOD_NS)
    }
}
