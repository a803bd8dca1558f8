//! # tessera-sched - Signals, Ghost Exchange, Partitioning
//!
//! The distributed layer of the Tessera runtime: one-shot signals with a
//! refcount-driven action scheduler, per-field read/write signal
//! discipline, buffered ghost-cell exchange between neighboring blocks,
//! grid/plain partitioning, and the control-plane event set.
//!
//! ## Architecture
//!
//! ```text
//! Fleet (control node 0)
//!   ↓ broadcasts serialized ControlEvents
//! NodeState (compute nodes 1..N)
//!   ├── Scheduler      - worker pool over the SignalGraph
//!   ├── FieldSync      - last_read / last_write per field
//!   ├── GhostExchange  - per-neighbor gather/send + recv/scatter
//!   └── GridPartition  - disjoint blocks, row-major node map
//! ```
//!
//! Enabled by `TESSERA_EXPERIMENTAL_SIGNALS`; the single-node path never
//! constructs any of this.

pub mod error;
pub mod events;
pub mod fieldsync;
pub mod ghost;
pub mod partition;
pub mod scheduler;
pub mod signal;

pub use error::{Error, Result};
pub use events::{Ack, ControlEvent, Fleet, RelationSpecWire, TaskRegistry, WirePrivilege};
pub use fieldsync::{launch_task, AccessKind, FieldSync, TaskAccess};
pub use ghost::{
    ghost_id, inner_region, neighbor_offsets, outer_region, ChannelKey, ChannelTable, GhostExchange,
    GhostReadiness, GhostReceiver, GhostRegion, GhostSender, LocalBlock,
};
pub use partition::{plain_colors, GridBlock, GridPartition};
pub use scheduler::Scheduler;
pub use signal::{Signal, SignalGraph};
