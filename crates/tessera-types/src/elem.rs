//! Element types for fields and globals
//!
//! A field's element type is either a scalar primitive, a fixed-size vector
//! or matrix of one primitive, or a key into another relation. Key elements
//! are stored as one `u64` lane per key dimension (grid keys are tuples);
//! keys into elastic relations are rejected at field creation because elastic
//! row ids are not stable.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::ids::RelationId;

/// Scalar primitive kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ScalarKind {
    Bool,
    I32,
    U64,
    F32,
    F64,
}

impl ScalarKind {
    /// Size of one scalar in bytes
    pub const fn size_bytes(self) -> usize {
        match self {
            ScalarKind::Bool => 1,
            ScalarKind::I32 => 4,
            ScalarKind::U64 => 8,
            ScalarKind::F32 => 4,
            ScalarKind::F64 => 8,
        }
    }

    /// Whether the kind supports arithmetic reductions (add/mul/min/max)
    pub const fn is_numeric(self) -> bool {
        !matches!(self, ScalarKind::Bool)
    }
}

impl fmt::Display for ScalarKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ScalarKind::Bool => "bool",
            ScalarKind::I32 => "i32",
            ScalarKind::U64 => "u64",
            ScalarKind::F32 => "f32",
            ScalarKind::F64 => "f64",
        };
        write!(f, "{s}")
    }
}

/// Element type of a field or global
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ElemType {
    /// A single scalar
    Scalar(ScalarKind),
    /// Fixed-size vector, `len` lanes of one scalar kind
    Vector { elem: ScalarKind, len: u8 },
    /// Fixed-size row-major matrix
    Matrix { elem: ScalarKind, rows: u8, cols: u8 },
    /// Key into relation `relation`; `dims` lanes (1 for plain targets,
    /// 2 or 3 for grid targets), each stored as a `u64` row coordinate
    Key { relation: RelationId, dims: u8 },
}

impl ElemType {
    /// Shorthand constructors for the common scalar types
    pub const BOOL: ElemType = ElemType::Scalar(ScalarKind::Bool);
    pub const I32: ElemType = ElemType::Scalar(ScalarKind::I32);
    pub const U64: ElemType = ElemType::Scalar(ScalarKind::U64);
    pub const F32: ElemType = ElemType::Scalar(ScalarKind::F32);
    pub const F64: ElemType = ElemType::Scalar(ScalarKind::F64);

    /// A vector type
    pub const fn vector(elem: ScalarKind, len: u8) -> Self {
        ElemType::Vector { elem, len }
    }

    /// A matrix type
    pub const fn matrix(elem: ScalarKind, rows: u8, cols: u8) -> Self {
        ElemType::Matrix { elem, rows, cols }
    }

    /// A key into `relation`
    pub const fn key(relation: RelationId) -> Self {
        ElemType::Key { relation, dims: 1 }
    }

    /// A tuple key into a grid relation
    pub const fn grid_key(relation: RelationId, dims: u8) -> Self {
        ElemType::Key { relation, dims }
    }

    /// Number of scalar lanes per element
    pub const fn lanes(self) -> usize {
        match self {
            ElemType::Scalar(_) => 1,
            ElemType::Vector { len, .. } => len as usize,
            ElemType::Matrix { rows, cols, .. } => rows as usize * cols as usize,
            ElemType::Key { dims, .. } => dims as usize,
        }
    }

    /// Scalar kind of the lanes; keys report as `U64`
    pub const fn lane_kind(self) -> ScalarKind {
        match self {
            ElemType::Scalar(k) => k,
            ElemType::Vector { elem, .. } => elem,
            ElemType::Matrix { elem, .. } => elem,
            ElemType::Key { .. } => ScalarKind::U64,
        }
    }

    /// Size of one element in bytes
    pub const fn size_bytes(self) -> usize {
        self.lanes() * self.lane_kind().size_bytes()
    }

    /// Relation targeted by a key element type, if any
    pub const fn key_target(self) -> Option<RelationId> {
        match self {
            ElemType::Key { relation, .. } => Some(relation),
            _ => None,
        }
    }
}

impl fmt::Display for ElemType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ElemType::Scalar(k) => write!(f, "{k}"),
            ElemType::Vector { elem, len } => write!(f, "vec{len}<{elem}>"),
            ElemType::Matrix { elem, rows, cols } => write!(f, "mat{rows}x{cols}<{elem}>"),
            ElemType::Key { relation, dims: 1 } => write!(f, "key<{relation}>"),
            ElemType::Key { relation, dims } => write!(f, "key{dims}<{relation}>"),
        }
    }
}
