//! Device reduction engine
//!
//! Reduces one or more globals across all rows of a launched relation with
//! correct ordering for any commutative-associative op `⊕` with identity
//! `e`. Two passes cooperate; let `B` be the block size (a power of two),
//! `N` the row count, `M = ⌈N/B⌉` the primary grid:
//!
//! - **Primary pass** (part of the generated kernel): every lane's shared
//!   slot starts at `e`; the inner loop accumulates local contributions via
//!   `⊕`; after the block barrier a tree reduction folds the `B` slots in
//!   `log₂ B` barrier-separated steps and lane 0 publishes `shared[0]` to
//!   `scratch[blockIdx]`.
//! - **Secondary pass** (one block of `B` lanes): lanes stride over
//!   `scratch[0..M)` at step `B`, tree-reduce the same way, and lane 0
//!   folds the result into the true global through `⊕`, preserving any
//!   pre-existing value.
//!
//! For `M < B` identity initialization alone makes the result correct; no
//! special case exists. Scratch arrays are allocated immediately before the
//! primary launch and freed on every path out of post-processing.
//!
//! Vector and matrix globals reduce lane-wise: every scalar lane folds
//! independently under the same op.

use tessera_store::{DeviceHandle, Store};
use tessera_types::{ElemType, GlobalId, ReduceOp};

use crate::backend::{DeviceBackend, SharedReduceSpec};
use crate::error::{Error, Result};
use crate::layout::{ArgLayout, GlobalBinding};

/// Default primary block size
pub const DEFAULT_BLOCK_SIZE: u32 = 256;

/// One global being device-reduced
#[derive(Debug, Clone, Copy)]
pub struct ReduceTarget {
    pub global: GlobalId,
    /// Layout slot of the global pointer
    pub global_slot: usize,
    /// Layout slot of the per-block scratch pointer
    pub scratch_slot: usize,
    pub elem: ElemType,
    pub op: ReduceOp,
}

/// Compile-time reduction plan for one kernel version
#[derive(Debug, Clone)]
pub struct ReductionPlan {
    pub block_size: u32,
    pub targets: Vec<ReduceTarget>,
}

impl ReductionPlan {
    /// Extend an open layout with one scratch slot per reduced user global
    ///
    /// Returns `None` when the kernel reduces no globals. The internal
    /// insert/delete counters are atomics, not tree-reduced, and are
    /// skipped.
    pub fn build(store: &Store, layout: &mut ArgLayout, block_size: u32) -> Result<Option<Self>> {
        assert!(
            block_size.is_power_of_two(),
            "reduction block size must be a power of two, got {block_size}"
        );
        let reduced: Vec<(usize, GlobalId, ReduceOp)> = layout
            .globals()
            .iter()
            .enumerate()
            .filter_map(|(slot, gs)| match (gs.binding, gs.reduce) {
                (GlobalBinding::User(id), Some(op)) => Some((slot, id, op)),
                _ => None,
            })
            .collect();
        if reduced.is_empty() {
            return Ok(None);
        }
        let mut targets = Vec::with_capacity(reduced.len());
        for (global_slot, global, op) in reduced {
            let elem = store.global(global)?.elem();
            if !op.supports(elem.lane_kind()) {
                return Err(Error::UnsupportedReduce { global });
            }
            let scratch_slot = layout.add_scratch(global_slot, elem, op);
            targets.push(ReduceTarget {
                global,
                global_slot,
                scratch_slot,
                elem,
                op,
            });
        }
        Ok(Some(Self {
            block_size,
            targets,
        }))
    }

    /// Shared-memory requirements handed to the device launch
    pub fn shared_specs(&self) -> Vec<SharedReduceSpec> {
        self.targets
            .iter()
            .map(|t| SharedReduceSpec {
                elem: t.elem,
                op: t.op,
                scratch_slot: t.scratch_slot,
            })
            .collect()
    }

    /// Allocate one `M`-element scratch buffer per target
    pub fn alloc_scratch(&self, device: &mut dyn DeviceBackend, m_blocks: u32) -> Result<Vec<DeviceHandle>> {
        let mut handles = Vec::with_capacity(self.targets.len());
        for t in &self.targets {
            let size = m_blocks as usize * t.elem.size_bytes();
            match device.allocate(size) {
                Ok(h) => handles.push(h),
                Err(e) => {
                    // Unwind partial allocations before surfacing the error.
                    for h in handles {
                        let _ = device.free(h);
                    }
                    return Err(e);
                }
            }
        }
        Ok(handles)
    }

    /// Secondary pass: fold every scratch array into its true global
    ///
    /// Runs the single-block strided algorithm on the host against bytes
    /// copied back from the device; the CUDA backend substitutes the
    /// generated secondary kernel on-device and copies only the final value.
    pub fn secondary_pass(
        &self,
        store: &mut Store,
        device: &dyn DeviceBackend,
        scratch: &[DeviceHandle],
        m_blocks: u32,
    ) -> Result<()> {
        let b = self.block_size as usize;
        let m = m_blocks as usize;
        for (t, &handle) in self.targets.iter().zip(scratch) {
            let sz = t.elem.size_bytes();
            let mut scratch_bytes = vec![0u8; m * sz];
            device.copy_from(handle, &mut scratch_bytes)?;

            // One block of B lanes, each striding the scratch array at
            // step B (gridDim is 1 for the secondary pass).
            let identity = identity_elem_bytes(t.op, t.elem)?;
            let mut shared = vec![0u8; b * sz];
            for slot in shared.chunks_mut(sz) {
                slot.copy_from_slice(&identity);
            }
            for tid in 0..b {
                for i in (tid..m).step_by(b) {
                    fold_elem_in_place(
                        t.op,
                        t.elem,
                        &mut shared[tid * sz..(tid + 1) * sz],
                        &scratch_bytes[i * sz..(i + 1) * sz],
                    )?;
                }
            }
            tree_reduce_in_place(&mut shared, t.elem, t.op, self.block_size)?;

            // Lane 0 folds into the true global through ⊕: a pre-existing
            // value participates instead of being overwritten.
            let global = store.global_mut(t.global)?;
            fold_elem_in_place(t.op, t.elem, global.bytes_mut(), &shared[..sz])?;
            tracing::debug!(global = %t.global, blocks = m, "reduction_secondary_pass");
        }
        Ok(())
    }
}

/// Identity bytes for one element type (lane-wise)
pub fn identity_elem_bytes(op: ReduceOp, elem: ElemType) -> Result<Vec<u8>> {
    let kind = elem.lane_kind();
    let identity = op.identity(kind)?;
    let lane_sz = kind.size_bytes();
    let mut lane = vec![0u8; lane_sz];
    identity.encode(ElemType::Scalar(kind), &mut lane)?;
    let mut out = vec![0u8; elem.size_bytes()];
    for chunk in out.chunks_mut(lane_sz) {
        chunk.copy_from_slice(&lane);
    }
    Ok(out)
}

/// Lane-wise `dst ← dst ⊕ src` over one element
pub fn fold_elem_in_place(op: ReduceOp, elem: ElemType, dst: &mut [u8], src: &[u8]) -> Result<()> {
    let kind = elem.lane_kind();
    let lane_sz = kind.size_bytes();
    for lane in 0..elem.lanes() {
        let off = lane * lane_sz;
        op.fold_bytes(kind, &mut dst[off..off + lane_sz], &src[off..off + lane_sz])?;
    }
    Ok(())
}

/// In-block tree reduction over `block_dim` element slots
///
/// `for step = B/2, B/4, …, 1: slot[tid] ← slot[tid] ⊕ slot[tid+step]`
/// for every `tid < step`, one barrier per step. Slots execute sequentially
/// here, which makes each step's barrier exact; the result lands in slot 0.
pub fn tree_reduce_in_place(slots: &mut [u8], elem: ElemType, op: ReduceOp, block_dim: u32) -> Result<()> {
    debug_assert!(block_dim.is_power_of_two());
    let sz = elem.size_bytes();
    let mut step = (block_dim / 2) as usize;
    while step >= 1 {
        for tid in 0..step {
            let (lo, hi) = slots.split_at_mut((tid + step) * sz);
            fold_elem_in_place(op, elem, &mut lo[tid * sz..tid * sz + sz], &hi[..sz])?;
        }
        step /= 2;
    }
    Ok(())
}
