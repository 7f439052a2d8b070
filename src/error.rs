// This module defines error types for the ez80cc backend using the thiserror crate for
// idiomatic Rust error handling. CompileError is the main error enum covering the fatal
// failure scenarios of the backend: unimplemented word-width arithmetic paths, indexed
// displacement overflow, values that cannot be offset, free-interval bookkeeping bugs in
// the register allocator, unresolved return placeholders at serialization time, and
// force-register variables that fail allocation. Each variant carries relevant context
// (operation names, displacements, register/variable identifiers) for debugging. The
// module also provides CompileResult<T> as a convenience type alias.

//! Error types for the ez80cc backend.
//!
//! Everything raised here is fatal: user-facing diagnostics are the
//! frontend's responsibility and occur strictly before this backend runs.

use thiserror::Error;

/// Main error type for backend compilation.
#[derive(Error, Debug)]
pub enum CompileError {
    #[error("Unsupported {width}-bit {operation} operation")]
    UnsupportedWidth {
        operation: &'static str,
        width: u32,
    },

    #[error("Indexed displacement {disp} out of signed 8-bit range")]
    DisplacementOverflow { disp: i64 },

    #[error("Cannot offset {what} value")]
    NotOffsettable { what: &'static str },

    #[error("Free interval [{begin}, {end}] of {reg} was never reserved")]
    IntervalNotReserved {
        reg: &'static str,
        begin: u32,
        end: u32,
    },

    #[error("Unresolved return placeholder in block {label}")]
    UnresolvedReturn { label: String },

    #[error("Force-register variable %{var} could not be allocated")]
    ForcedRegisterSpill { var: u32 },

    #[error("Template binding slot {slot} read before being bound")]
    UnboundSlot { slot: usize },

    #[error("Unknown goto target '{name}'")]
    UnknownLabel { name: String },

    #[error("Code generation failed: {reason}")]
    CodeGeneration { reason: String },
}

/// Result type alias for backend operations.
pub type CompileResult<T> = Result<T, CompileError>;
