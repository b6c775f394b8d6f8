//! Clock and handshake substrate shared by every hardware unit
//!
//! All units advance in lockstep on the rising edge of one shared clock.
//! During an edge every unit reads the values its input wires held when the
//! edge arrived and stages new values on the wires it drives. Staged values
//! are committed once every unit has been evaluated, so the order in which
//! units are evaluated within an edge can never change the outcome.

mod clock;
mod error;
mod handshake;
mod signal;

pub use clock::Clock;
pub use error::ProtocolError;
pub use handshake::{ChildPort, Handshake, ParentPort, Requester, RoundPhase};
pub use signal::{Edge, In, Out, Signal};
