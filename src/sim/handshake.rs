use super::{In, Out, ProtocolError, Signal};

/// The start/done wire pair between a parent and one child unit.
///
/// The parent is the only writer of `start`, the child the only writer of
/// `done`. The ports below hand out the drive side accordingly.
#[derive(Debug, Clone, Default)]
pub struct Handshake {
    start: Signal,
    done: Signal,
}

/// Child's view: reads start, drives done.
#[derive(Debug)]
pub struct ChildPort<'a> {
    pub start: In<'a>,
    pub done: Out<'a>,
}

/// Parent's view: drives start, reads done.
#[derive(Debug)]
pub struct ParentPort<'a> {
    pub start: Out<'a>,
    pub done: In<'a>,
}

impl Handshake {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn child(&mut self) -> ChildPort<'_> {
        ChildPort {
            start: In::new(&self.start),
            done: Out::new(&mut self.done),
        }
    }

    pub fn parent(&mut self) -> ParentPort<'_> {
        ParentPort {
            start: Out::new(&mut self.start),
            done: In::new(&self.done),
        }
    }

    pub fn commit(&mut self) {
        self.start.commit();
        self.done.commit();
    }

    pub fn start(&self) -> bool {
        self.start.read()
    }

    pub fn done(&self) -> bool {
        self.done.read()
    }
}

/// Phase of a four-phase round as seen from the requesting side.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum RoundPhase {
    #[default]
    Idle,
    /// start asserted, waiting for done to rise
    Requesting,
    /// start deasserted, waiting for done to fall
    Releasing,
}

/// Drives one child through repeated four-phase rounds:
/// assert start, observe done, deassert start, observe done low.
#[derive(Debug, Clone, Default)]
pub struct Requester {
    phase: RoundPhase,
    rounds: u64,
}

impl Requester {
    pub fn new() -> Self {
        Self::default()
    }

    /// Opens a round by asserting start.
    pub fn request(&mut self, mut port: ParentPort<'_>) -> Result<(), ProtocolError> {
        if self.phase != RoundPhase::Idle {
            return Err(ProtocolError::RoundInFlight);
        }
        if port.done.read() {
            return Err(ProtocolError::StaleDone);
        }
        port.start.write(true);
        self.phase = RoundPhase::Requesting;
        Ok(())
    }

    /// Advances the round by one edge. Returns true on the edge at which the
    /// child has released done, i.e. the round is complete.
    pub fn poll(&mut self, mut port: ParentPort<'_>) -> bool {
        match self.phase {
            RoundPhase::Requesting if port.done.read() => {
                port.start.write(false);
                self.phase = RoundPhase::Releasing;
                false
            }
            RoundPhase::Releasing if !port.done.read() => {
                self.phase = RoundPhase::Idle;
                self.rounds += 1;
                true
            }
            _ => false,
        }
    }

    pub fn phase(&self) -> RoundPhase {
        self.phase
    }

    pub fn is_idle(&self) -> bool {
        self.phase == RoundPhase::Idle
    }

    /// Completed rounds since construction.
    pub fn rounds(&self) -> u64 {
        self.rounds
    }
}
