//! Error types for mesh and field I/O
//!
//! I/O failures surface as error values with a diagnostic; nothing here
//! crashes the process.

/// Result type for I/O operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur reading or writing mesh and field files
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Underlying filesystem failure
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// File does not start with the mesh magic number
    #[error("bad magic: expected {expected:#010x}, got {got:#010x}")]
    BadMagic { expected: u32, got: u32 },

    /// File ends before a declared table
    #[error("truncated file: need {need} bytes at offset {offset}, have {have}")]
    Truncated { offset: u64, need: usize, have: usize },

    /// Malformed text content (OFF, CSV)
    #[error("parse error at line {line}: {message}")]
    Parse { line: usize, message: String },

    /// Unknown element-type code in a table
    #[error("unknown element type code {0}")]
    BadElemCode(u32),

    /// Field file declares a base type this runtime does not store
    #[error("unknown field base type {0}")]
    BadFieldType(u8),

    /// CSV row count does not match the relation
    #[error("row count mismatch: file has {file_rows}, relation has {relation_rows}")]
    RowCount { file_rows: usize, relation_rows: usize },

    /// Errors bubbling up from the store
    #[error(transparent)]
    Store(#[from] tessera_store::Error),
}
