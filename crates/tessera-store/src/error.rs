//! Error types for store operations
//!
//! Schema errors are reported at the API call and leave the store unchanged.

use tessera_types::{FieldRef, RelationId};

/// Result type for store operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in store operations
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Field or subset name is not a valid identifier
    #[error("invalid name {0:?}")]
    InvalidName(String),

    /// Field or subset name already taken on this relation
    #[error("duplicate name {name:?} on {relation}")]
    DuplicateName { relation: RelationId, name: String },

    /// Mutation attempted on a fragmented relation
    #[error("{0} is fragmented; defrag before mutating the schema")]
    Fragmented(RelationId),

    /// Key fields may not reference elastic relations
    #[error("key field into elastic relation {0}: elastic row ids are not stable")]
    KeyIntoElastic(RelationId),

    /// group_by is only legal on PLAIN relations
    #[error("cannot group {0}: relation is not plain")]
    GroupNonPlain(RelationId),

    /// The grouping key must reference a relation no larger than the grouped one
    #[error("grouping key target {src} is larger than grouped relation {relation}")]
    GroupSourceTooLarge { relation: RelationId, src: RelationId },

    /// The grouping key column must be sorted ascending
    #[error("key field {field} is not sorted ascending at row {row}")]
    KeyFieldUnsorted { field: FieldRef, row: u64 },

    /// group_by requires a key-typed field
    #[error("{field} is not a key field")]
    NotAKeyField { field: FieldRef },

    /// Key value points outside the source relation
    #[error("{field} row {row} holds key {key}, but source has {source_rows} rows")]
    KeyOutOfRange {
        field: FieldRef,
        row: u64,
        key: u64,
        source_rows: usize,
    },

    /// Grid keys must match the target's dimensionality
    #[error("key dims {dims} do not match {relation} dimensionality {expected}")]
    KeyDimsMismatch {
        relation: RelationId,
        dims: usize,
        expected: usize,
    },

    /// Unknown global id
    #[error("unknown global {0}")]
    UnknownGlobal(tessera_types::GlobalId),

    /// Operation requires an elastic relation
    #[error("{0} is not elastic")]
    NotElastic(RelationId),

    /// Insert/delete require a relation with no subsets
    #[error("{relation} has {count} subset(s); elastic mutation is forbidden")]
    SubsetsPresent { relation: RelationId, count: usize },

    /// Grid relations need dimensions
    #[error("grid relation requires 1-3 dimensions, got {0}")]
    BadGridDims(usize),

    /// Periodicity flags must match dimensionality
    #[error("periodic flags ({periodic}) do not match dimensions ({dims})")]
    PeriodicArityMismatch { dims: usize, periodic: usize },

    /// swap/copy require identical element types
    #[error("field type mismatch: {a} is {a_ty}, {b} is {b_ty}")]
    FieldTypeMismatch {
        a: FieldRef,
        a_ty: String,
        b: FieldRef,
        b_ty: String,
    },

    /// swap/copy require the same owning relation
    #[error("fields {a} and {b} have different owners")]
    DifferentOwners { a: FieldRef, b: FieldRef },

    /// Elastic insert record does not match the relation's structural type
    #[error("record type mismatch on {relation}: expected {expected}, got {actual}")]
    RecordTypeMismatch {
        relation: RelationId,
        expected: String,
        actual: String,
    },

    /// Row data length does not match the relation size
    #[error("row count mismatch on {field}: expected {expected}, got {actual}")]
    RowCountMismatch {
        field: FieldRef,
        expected: usize,
        actual: usize,
    },

    /// Operation requires host-resident storage
    #[error("{field} is not host-resident")]
    NotHostResident { field: FieldRef },

    /// Unknown relation id
    #[error("unknown relation {0}")]
    UnknownRelation(RelationId),

    /// Unknown field reference
    #[error("unknown field {0}")]
    UnknownField(FieldRef),

    /// Unknown subset id
    #[error("unknown subset {subset} on {relation}")]
    UnknownSubset {
        relation: RelationId,
        subset: tessera_types::SubsetId,
    },

    /// Value/type errors bubbling up from the type vocabulary
    #[error(transparent)]
    Type(#[from] tessera_types::Error),
}
