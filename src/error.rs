// error.rs - Fatal error kinds surfaced at the driver boundary

use crate::ir::Address;
use thiserror::Error;

/// Errors that abort a translation run. No pass recovers from any of
/// these; they all bubble up to `main` and exit nonzero.
#[derive(Debug, Error)]
pub enum Error {
    /// The input is not a usable 32-bit RISC-V executable.
    #[error("malformed input: {0}")]
    MalformedInput(String),

    /// A direct jump names an address with no corresponding code. Either
    /// the decoder mis-lifted a branch or the input was truncated.
    #[error("jump target {0:#010x} has no corresponding block")]
    UnknownJumpTarget(Address),

    /// Optimization level outside 0..=2.
    #[error("invalid optimization level {0} (expected 0, 1 or 2)")]
    InvalidOptimizationLevel(u8),

    /// A structural invariant of the block map was violated mid-pipeline.
    #[error("internal invariant violated: {0}")]
    InternalInvariant(String),
}

pub type Result<T> = std::result::Result<T, Error>;
