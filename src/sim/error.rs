use thiserror::Error;

/// Violations of the four-phase start/done protocol.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    #[error("request issued while a previous round is still in flight")]
    RoundInFlight,

    #[error("done is still asserted from a previous round")]
    StaleDone,

    #[error("start raised again before done was released")]
    Reentered,
}
