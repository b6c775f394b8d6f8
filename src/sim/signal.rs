/// Edge a unit may wait for on a wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Edge {
    Rising,
    Falling,
}

/// A boolean wire.
///
/// `current` is the committed value every reader sees during an edge,
/// `previous` the value committed one edge earlier, and `next` the value the
/// writer staged during the current edge.
#[derive(Debug, Clone, Default)]
pub struct Signal {
    previous: bool,
    current: bool,
    next: bool,
}

impl Signal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn read(&self) -> bool {
        self.current
    }

    /// Stages a value; readers observe it from the next edge on.
    pub fn write(&mut self, value: bool) {
        self.next = value;
    }

    /// True on the one edge at which the committed value turned high.
    pub fn posedge(&self) -> bool {
        self.current && !self.previous
    }

    pub fn negedge(&self) -> bool {
        !self.current && self.previous
    }

    pub fn saw(&self, edge: Edge) -> bool {
        match edge {
            Edge::Rising => self.posedge(),
            Edge::Falling => self.negedge(),
        }
    }

    /// Ends the edge. Returns whether the committed value changed.
    pub fn commit(&mut self) -> bool {
        self.previous = self.current;
        self.current = self.next;
        self.previous != self.current
    }
}

/// Read side of a wire.
#[derive(Debug, Clone, Copy)]
pub struct In<'a>(&'a Signal);

impl<'a> In<'a> {
    pub fn new(signal: &'a Signal) -> Self {
        Self(signal)
    }

    pub fn read(&self) -> bool {
        self.0.read()
    }

    pub fn saw(&self, edge: Edge) -> bool {
        self.0.saw(edge)
    }
}

/// Drive side of a wire. There is exactly one per wire since it holds the
/// only mutable borrow.
#[derive(Debug)]
pub struct Out<'a>(&'a mut Signal);

impl<'a> Out<'a> {
    pub fn new(signal: &'a mut Signal) -> Self {
        Self(signal)
    }

    pub fn write(&mut self, value: bool) {
        self.0.write(value);
    }

    /// The value currently driven onto the wire, as committed.
    pub fn driven(&self) -> bool {
        self.0.read()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_write_is_staged_until_commit() {
        let mut signal = Signal::new();
        signal.write(true);
        assert!(!signal.read());
        assert!(signal.commit());
        assert!(signal.read());
    }

    #[test]
    fn test_edges_last_exactly_one_commit() {
        let mut signal = Signal::new();
        signal.write(true);
        signal.commit();
        assert!(signal.posedge());
        assert!(!signal.negedge());

        // holding the value clears the edge
        assert!(!signal.commit());
        assert!(!signal.posedge());
        assert!(signal.read());

        signal.write(false);
        signal.commit();
        assert!(signal.saw(Edge::Falling));
        assert!(!signal.saw(Edge::Rising));
    }

    #[test]
    fn test_ports_wrap_the_same_wire() {
        let mut signal = Signal::new();
        {
            let mut out = Out::new(&mut signal);
            out.write(true);
            assert!(!out.driven());
        }
        signal.commit();
        let input = In::new(&signal);
        assert!(input.read());
        assert!(input.saw(Edge::Rising));
    }
}
