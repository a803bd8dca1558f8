//! # tessera-store - Relation & Field Store
//!
//! The data plane of the Tessera runtime: relations (plain, grid, grouped,
//! elastic), typed fields, process-wide globals, and row subsets, all held
//! in one arena keyed by index newtypes.
//!
//! ## Architecture
//!
//! ```text
//! Store (arena)
//! ├── Relation[rel0..]      - mode, sizes, live mask, grouped back-refs
//! │   ├── Field[fld0..]     - name + element type + backing storage
//! │   └── Subset[sub0..]    - boolmask or index list, immutable
//! └── Global[gbl0..]        - typed scalars with reduce bindings
//! ```
//!
//! Kernels mutate field contents; the store mutates everything else. The
//! invariant held on every operation: a field's element count equals its
//! relation's concrete size.

pub mod elastic;
pub mod error;
pub mod field;
pub mod global;
pub mod relation;
pub mod storage;
pub mod store;
pub mod subset;

pub use elastic::CopyPlan;
pub use error::{Error, Result};
pub use field::Field;
pub use global::Global;
pub use relation::{GroupInfo, Relation, RelationMode};
pub use storage::{DeviceHandle, FieldStorage, HostArray, RegionHandle};
pub use store::{RelationSpec, Store, LIVE_MASK_NAME};
pub use subset::{Subset, SubsetShape, SubsetStorage};
