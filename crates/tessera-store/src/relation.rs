//! Relations
//!
//! A relation is an ordered collection of rows with a stable UID. Four modes:
//!
//! - `PLAIN` - opaque row ids
//! - `GRID` - 1-, 2-, or 3-dimensional index space with per-axis periodicity
//! - `GROUPED` - sorted on a key field, rows with equal key contiguous
//! - `ELASTIC` - supports insert/delete through a boolean live mask
//!
//! Cross-relation mutations (field creation against key targets, grouping,
//! elastic commits) are orchestrated by the [`crate::store::Store`] arena;
//! this module holds the per-relation state and the read surface.

use tessera_types::{FieldIdx, RelationId};

use crate::field::Field;
use crate::subset::Subset;

/// Grouping metadata carried by a GROUPED relation
///
/// `offsets` and `lengths` name auxiliary `u64` fields on the *source*
/// relation: `rows[offset[k] .. offset[k]+length[k])` of the grouped
/// relation all carry key `k`.
#[derive(Debug, Clone, Copy)]
pub struct GroupInfo {
    /// Key field on the grouped relation
    pub key_field: FieldIdx,
    /// Relation the key references
    pub source: RelationId,
    /// Offset field on `source`
    pub offsets: FieldIdx,
    /// Length field on `source`
    pub lengths: FieldIdx,
}

/// Relation mode
#[derive(Debug, Clone)]
pub enum RelationMode {
    Plain,
    Grid { dims: Vec<usize>, periodic: Vec<bool> },
    Grouped(GroupInfo),
    Elastic,
}

impl RelationMode {
    pub fn is_grid(&self) -> bool {
        matches!(self, RelationMode::Grid { .. })
    }

    pub fn is_elastic(&self) -> bool {
        matches!(self, RelationMode::Elastic)
    }

    pub fn is_plain(&self) -> bool {
        matches!(self, RelationMode::Plain)
    }
}

/// An ordered collection of rows and its columns
#[derive(Debug)]
pub struct Relation {
    id: RelationId,
    mode: RelationMode,
    logical_size: usize,
    concrete_size: usize,
    pub(crate) fields: Vec<Field>,
    pub(crate) subsets: Vec<Subset>,
    /// Live-mask field, allocated iff elastic
    pub(crate) live_mask: Option<FieldIdx>,
    pub(crate) fragmented: bool,
    /// Relations grouped by a key into this one
    pub(crate) grouped_children: Vec<RelationId>,
}

impl Relation {
    pub(crate) fn new(id: RelationId, mode: RelationMode, size: usize) -> Self {
        Self {
            id,
            mode,
            logical_size: size,
            concrete_size: size,
            fields: Vec::new(),
            subsets: Vec::new(),
            live_mask: None,
            fragmented: false,
            grouped_children: Vec::new(),
        }
    }

    /// Stable UID
    pub fn id(&self) -> RelationId {
        self.id
    }

    pub fn mode(&self) -> &RelationMode {
        &self.mode
    }

    pub(crate) fn set_mode(&mut self, mode: RelationMode) {
        self.mode = mode;
    }

    /// Rows visible to the user
    pub fn logical_size(&self) -> usize {
        self.logical_size
    }

    /// Rows actually allocated (`>= logical_size`; equal unless elastic)
    pub fn concrete_size(&self) -> usize {
        self.concrete_size
    }

    pub(crate) fn set_sizes(&mut self, logical: usize, concrete: usize) {
        debug_assert!(logical <= concrete, "logical {logical} > concrete {concrete}");
        self.logical_size = logical;
        self.concrete_size = concrete;
    }

    /// Grid dimensions, if grid mode
    pub fn dims(&self) -> Option<&[usize]> {
        match &self.mode {
            RelationMode::Grid { dims, .. } => Some(dims),
            _ => None,
        }
    }

    /// Per-axis periodicity, if grid mode
    pub fn periodic(&self) -> Option<&[bool]> {
        match &self.mode {
            RelationMode::Grid { periodic, .. } => Some(periodic),
            _ => None,
        }
    }

    /// Number of index-space axes (1 for plain/grouped/elastic)
    pub fn n_dims(&self) -> usize {
        self.dims().map(|d| d.len()).unwrap_or(1)
    }

    /// Live rows may be sparse
    pub fn is_fragmented(&self) -> bool {
        self.fragmented
    }

    pub fn is_elastic(&self) -> bool {
        self.mode.is_elastic()
    }

    /// Live-mask field index (elastic only)
    pub fn live_mask(&self) -> Option<FieldIdx> {
        self.live_mask
    }

    /// Relations grouped by a key field into this one
    pub fn grouped_children(&self) -> &[RelationId] {
        &self.grouped_children
    }

    pub fn fields(&self) -> &[Field] {
        &self.fields
    }

    pub fn field(&self, idx: FieldIdx) -> Option<&Field> {
        self.fields.get(idx.index())
    }

    pub fn field_mut(&mut self, idx: FieldIdx) -> Option<&mut Field> {
        self.fields.get_mut(idx.index())
    }

    /// Look a field up by name
    pub fn field_by_name(&self, name: &str) -> Option<(FieldIdx, &Field)> {
        self.fields
            .iter()
            .enumerate()
            .find(|(_, f)| f.name() == name)
            .map(|(i, f)| (FieldIdx::new(i as u32), f))
    }

    pub fn subsets(&self) -> &[Subset] {
        &self.subsets
    }

    pub fn subset(&self, idx: tessera_types::SubsetId) -> Option<&Subset> {
        self.subsets.get(idx.index())
    }

    pub fn subset_by_name(&self, name: &str) -> Option<(tessera_types::SubsetId, &Subset)> {
        self.subsets
            .iter()
            .enumerate()
            .find(|(_, s)| s.name() == name)
            .map(|(i, s)| (tessera_types::SubsetId::new(i as u32), s))
    }

    /// User-visible structural type: ordered element types of the user
    /// fields, live mask excluded
    ///
    /// Elastic insert records must match this signature exactly.
    pub fn structural_signature(&self) -> Vec<tessera_types::ElemType> {
        self.fields
            .iter()
            .enumerate()
            .filter(|(i, _)| Some(FieldIdx::new(*i as u32)) != self.live_mask)
            .map(|(_, f)| f.elem())
            .collect()
    }
}
