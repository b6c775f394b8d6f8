//! Utility functions shared by the simulator, the reference model and the CLI
pub mod enums;
pub mod io;
pub mod math;

// Re-export commonly used utilities
pub use enums::*;
pub use io::*;
pub use math::*;
