//! # tessera-exec - Kernel Compilation & Launch
//!
//! The execution core of the Tessera runtime: per-kernel argument layouts,
//! the kernel-version state machine, CPU and device backends, and the
//! two-pass device reduction engine.
//!
//! ## Architecture
//!
//! ```text
//! Executor
//!   ↓ compiles (per processor × subset shape)
//! KernelVersion ── ArgLayout ── ArgBlock (bound pointers)
//!   ↓ launches via
//! DeviceBackend (EmulatedDevice, CudaDevice) or rayon partitions
//!   ↓ post-processes
//! ReductionPlan secondary pass · elastic insert/delete commits
//! ```
//!
//! The front end hands over a [`kernel::Kernel`] (typed-AST product plus
//! phase report); the code generator emits the inner executable against the
//! sealed layout. This crate never parses source and never generates
//! expression code itself.

pub mod backend;
pub mod error;
pub mod kernel;
pub mod layout;
pub mod reduce;
pub mod version;

#[cfg(feature = "cuda")]
pub mod cuda;

pub use backend::{DeviceBackend, EmulatedDevice, LaneCtx, LaunchDims, SharedBlock, SharedReduceSpec};
pub use error::{Error, Result};
pub use kernel::{
    CodeGenerator, CpuExecutable, FieldAccess, FnGenerator, GlobalAccess, GpuExecutable, InsertSpec, Kernel,
    KernelLibrary, PhaseReport, KERNEL_ABI_VERSION,
};
pub use layout::{ArgBlock, ArgLayout, ArgView, Bounds, FieldAccessor, GlobalBinding, LanePtr, Privilege};
pub use reduce::{ReductionPlan, DEFAULT_BLOCK_SIZE};
pub use version::{Executor, KernelVersion, LaunchSpec, VersionState};
