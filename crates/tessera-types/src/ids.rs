//! Arena ids and handles
//!
//! Runtime objects reference each other through these index newtypes. A
//! [`RelationId`] doubles as the relation's stable numeric UID: relations are
//! never removed from the store arena, so the index is stable for the life of
//! the process and is what the control plane puts on the wire.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Stable UID of a relation (index into the store's relation arena)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RelationId(pub u32);

impl RelationId {
    /// Create a relation id
    pub const fn new(id: u32) -> Self {
        RelationId(id)
    }

    /// Get the internal index
    pub const fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for RelationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "rel{}", self.0)
    }
}

/// Index of a field within its owning relation's field arena
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FieldIdx(pub u32);

impl FieldIdx {
    pub const fn new(idx: u32) -> Self {
        FieldIdx(idx)
    }

    pub const fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for FieldIdx {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "fld{}", self.0)
    }
}

/// Fully-qualified field reference: owning relation plus field index
///
/// This is the currency the argument layout, the scheduler, and the control
/// plane use to name a column without holding a pointer into the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FieldRef {
    pub relation: RelationId,
    pub field: FieldIdx,
}

impl FieldRef {
    pub const fn new(relation: RelationId, field: FieldIdx) -> Self {
        Self { relation, field }
    }
}

impl fmt::Display for FieldRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.relation, self.field)
    }
}

/// Id of a process-wide global scalar
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct GlobalId(pub u32);

impl GlobalId {
    pub const fn new(id: u32) -> Self {
        GlobalId(id)
    }

    pub const fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for GlobalId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "gbl{}", self.0)
    }
}

/// Index of a subset within its owning relation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SubsetId(pub u32);

impl SubsetId {
    pub const fn new(id: u32) -> Self {
        SubsetId(id)
    }

    pub const fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for SubsetId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "sub{}", self.0)
    }
}

/// Compute-node id in distributed mode
///
/// Node 0 is the control node; compute nodes are `1..N`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NodeId(pub u32);

impl NodeId {
    pub const CONTROL: NodeId = NodeId(0);

    pub const fn new(id: u32) -> Self {
        NodeId(id)
    }

    pub const fn index(self) -> usize {
        self.0 as usize
    }

    /// Whether this is the control node
    pub const fn is_control(self) -> bool {
        self.0 == 0
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "node{}", self.0)
    }
}

/// Target processor for a kernel version
///
/// A kernel source compiles to one version per (processor, subset shape)
/// pair it is launched with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Processor {
    /// Host threads, one per partition
    Cpu,
    /// Device lanes in a block/grid iteration space
    Gpu,
}

impl fmt::Display for Processor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Processor::Cpu => write!(f, "cpu"),
            Processor::Gpu => write!(f, "gpu"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_id_display() {
        assert_eq!(RelationId::new(3).to_string(), "rel3");
        assert_eq!(FieldIdx::new(1).to_string(), "fld1");
        assert_eq!(FieldRef::new(RelationId::new(3), FieldIdx::new(1)).to_string(), "rel3.fld1");
        assert_eq!(GlobalId::new(7).to_string(), "gbl7");
        assert_eq!(NodeId::new(0).to_string(), "node0");
    }

    #[test]
    fn test_control_node() {
        assert!(NodeId::CONTROL.is_control());
        assert!(!NodeId::new(2).is_control());
    }
}
