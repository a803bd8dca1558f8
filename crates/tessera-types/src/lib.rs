//! # tessera-types - Shared Type Vocabulary
//!
//! Workspace-wide vocabulary for the Tessera runtime: element types, dynamic
//! values, reduction operators, processor targets, arena ids, and the
//! immutable startup configuration.
//!
//! Every other crate in the workspace depends on this one and nothing here
//! depends back, so cyclic object graphs (a field referencing its relation,
//! a relation listing its fields) are broken by construction: references
//! between runtime objects are the index newtypes defined in [`ids`], never
//! pointers.

pub mod config;
pub mod elem;
pub mod error;
pub mod ids;
pub mod reduce;
pub mod value;

pub use config::{RuntimeConfig, RuntimeMode};
pub use elem::{ElemType, ScalarKind};
pub use error::{Error, Result};
pub use ids::{FieldIdx, FieldRef, GlobalId, NodeId, Processor, RelationId, SubsetId};
pub use reduce::ReduceOp;
pub use value::Value;
