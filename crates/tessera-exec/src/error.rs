//! Error types for kernel execution
//!
//! Phase and dynamic-check failures are fail-fast: the launch returns the
//! error without partial execution, and the embedder is expected to treat it
//! as fatal. Device errors carry the backend diagnostic verbatim; nothing is
//! retried.

use tessera_types::{FieldRef, GlobalId, Processor, RelationId};

/// Result type for execution operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while compiling, binding, or launching kernels
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// A kernel uncentered-reads and non-reduce-writes the same field
    #[error("phase conflict on {field}: uncentered read combined with non-reduce write")]
    PhaseConflict { field: FieldRef },

    /// Accessed field does not reside on the launch processor
    #[error("{field} resides on {actual}, launch targets {expected}")]
    FieldNotResident {
        field: FieldRef,
        expected: Processor,
        actual: Processor,
    },

    /// Reduction op unsupported for the global's scalar kind
    #[error("global {global}: unsupported reduction")]
    UnsupportedReduce { global: GlobalId },

    /// Compiled subset shape differs from the launch's subset shape
    #[error("kernel {kernel:?} compiled for {compiled} launches, got {supplied}")]
    SubsetShapeMismatch {
        kernel: String,
        compiled: String,
        supplied: String,
    },

    /// An inserting kernel ran past its reservation
    #[error("insert overflow on {relation}: wrote {written} rows, reserved {reserved}")]
    InsertOverflow {
        relation: RelationId,
        written: usize,
        reserved: usize,
    },

    /// Device allocation, load, or launch failure (not retried)
    #[error("device error: {0}")]
    Device(String),

    /// Kernel library loading failure
    #[error("kernel library error: {0}")]
    KernelLibrary(String),

    /// Errors bubbling up from the store
    #[error(transparent)]
    Store(#[from] tessera_store::Error),

    /// Errors bubbling up from the type vocabulary
    #[error(transparent)]
    Type(#[from] tessera_types::Error),
}
