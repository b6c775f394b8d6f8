use crate::hw::HardwareError;
use crate::sim::{ChildPort, Clock};

/// A clocked process in the accelerator hierarchy.
///
/// The parent owns the handshake link to each child and calls [`Unit::posedge`]
/// once per rising edge, passing the child's side of the link and the
/// operands bound for the current invocation. Operands are borrowed for that
/// one edge only, so no unit ever keeps a reference to caller data.
pub trait Unit {
    type Operands<'a>;

    fn name(&self) -> &str;

    /// Evaluates the unit at a rising edge. Writes to wires are staged and
    /// become visible after [`Unit::commit`].
    fn posedge(
        &mut self,
        clock: &Clock,
        port: ChildPort<'_>,
        operands: Option<Self::Operands<'_>>,
    ) -> Result<(), HardwareError>;

    /// Commits every wire owned by this unit and its children.
    fn commit(&mut self);

    /// True when the unit is waiting for a new invocation.
    fn is_idle(&self) -> bool;
}
