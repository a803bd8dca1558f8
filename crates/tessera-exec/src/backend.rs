//! Device backends
//!
//! The device execution model is a 1-D grid of blocks, each a fixed number
//! of lanes with block-shared memory and barrier-ordered phases. The
//! emulated backend is the reference implementation and always available:
//! blocks run in parallel across host threads, lanes within a block run
//! sequentially, which makes every barrier boundary exact. The CUDA backend
//! (`cuda` feature) executes the same contract on NVIDIA hardware.
//!
//! ```text
//! DeviceBackend
//! ├── execute: GpuExecutable × ArgBlock × LaunchDims
//! ├── buffers: allocate / free / copy_to / copy_from / base_addr
//! └── shared:  per-block reduction slots, tree-folded after the lanes
//! ```

use std::collections::HashMap;

use tessera_store::DeviceHandle;
use tessera_types::{ElemType, ReduceOp};

use crate::error::{Error, Result};
use crate::kernel::GpuExecutable;
use crate::layout::{ArgBlock, ArgLayout};
use crate::reduce;

/// 1-D launch dimensions: `grid` blocks of `block` lanes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LaunchDims {
    pub grid: u32,
    pub block: u32,
}

impl LaunchDims {
    pub const fn new(grid: u32, block: u32) -> Self {
        Self { grid, block }
    }

    /// Cover `rows` rows with blocks of `block` lanes
    pub fn for_rows(rows: u64, block: u32) -> Self {
        let grid = rows.div_ceil(block as u64).max(1) as u32;
        Self { grid, block }
    }

    pub const fn total_lanes(self) -> u64 {
        self.grid as u64 * self.block as u64
    }
}

/// Position of one lane in the launch
#[derive(Debug, Clone, Copy)]
pub struct LaneCtx {
    pub block_idx: u32,
    pub lane_idx: u32,
    pub grid_dim: u32,
    pub block_dim: u32,
}

impl LaneCtx {
    /// Global lane id: `block_idx * block_dim + lane_idx`
    pub const fn global_lane(&self) -> u64 {
        self.block_idx as u64 * self.block_dim as u64 + self.lane_idx as u64
    }
}

/// One reduced global's shared-memory requirements
#[derive(Debug, Clone, Copy)]
pub struct SharedReduceSpec {
    pub elem: ElemType,
    pub op: ReduceOp,
    /// Scratch slot in the layout receiving `shared[0]` per block
    pub scratch_slot: usize,
}

/// Block-shared reduction slots: one `block_dim`-slot array per reduced
/// global, identity-initialized at block entry
#[derive(Debug)]
pub struct SharedBlock {
    specs: Vec<SharedReduceSpec>,
    /// Per entry: `block_dim * elem.size_bytes()` bytes
    slots: Vec<Vec<u8>>,
    block_dim: u32,
}

impl SharedBlock {
    pub fn new(specs: &[SharedReduceSpec], block_dim: u32) -> Result<Self> {
        let mut slots = Vec::with_capacity(specs.len());
        for spec in specs {
            let one = reduce::identity_elem_bytes(spec.op, spec.elem)?;
            let sz = spec.elem.size_bytes();
            let mut bytes = vec![0u8; block_dim as usize * sz];
            for slot in bytes.chunks_mut(sz) {
                slot.copy_from_slice(&one);
            }
            slots.push(bytes);
        }
        Ok(Self {
            specs: specs.to_vec(),
            slots,
            block_dim,
        })
    }

    pub fn block_dim(&self) -> u32 {
        self.block_dim
    }

    /// Typed slot `tid` of reduced global `g`
    pub fn slot_mut<T: bytemuck::Pod>(&mut self, g: usize, tid: u32) -> &mut T {
        let sz = std::mem::size_of::<T>();
        let bytes = &mut self.slots[g][tid as usize * sz..(tid as usize + 1) * sz];
        bytemuck::from_bytes_mut(bytes)
    }

    /// Raw bytes of one slot array
    pub(crate) fn slot_bytes_mut(&mut self, g: usize) -> (&mut [u8], SharedReduceSpec) {
        let spec = self.specs[g];
        (&mut self.slots[g], spec)
    }

    pub(crate) fn spec_count(&self) -> usize {
        self.specs.len()
    }
}

/// Backend executing device kernels against device-resident buffers
pub trait DeviceBackend: Send + Sync {
    fn name(&self) -> &'static str;

    /// Allocate a zeroed device buffer
    fn allocate(&mut self, size: usize) -> Result<DeviceHandle>;

    /// Free a buffer; freeing an unknown handle is an error
    fn free(&mut self, handle: DeviceHandle) -> Result<()>;

    fn copy_to(&mut self, handle: DeviceHandle, data: &[u8]) -> Result<()>;

    fn copy_from(&self, handle: DeviceHandle, out: &mut [u8]) -> Result<()>;

    /// Address written into argument-block words for this buffer
    fn base_addr(&self, handle: DeviceHandle) -> Result<u64>;

    /// Launch `exec` over `dims`, with shared reduction slots per block
    fn launch(
        &self,
        exec: &GpuExecutable,
        block: &ArgBlock,
        layout: &ArgLayout,
        dims: LaunchDims,
        shared: &[SharedReduceSpec],
    ) -> Result<()>;
}

/// Reference device: host memory, rayon across blocks, sequential lanes
/// within a block (barrier phases are exact by construction)
pub struct EmulatedDevice {
    buffers: HashMap<u64, Vec<u8>>,
    next_id: u64,
}

impl EmulatedDevice {
    pub fn new() -> Self {
        Self {
            buffers: HashMap::new(),
            next_id: 1,
        }
    }
}

impl Default for EmulatedDevice {
    fn default() -> Self {
        Self::new()
    }
}

impl DeviceBackend for EmulatedDevice {
    fn name(&self) -> &'static str {
        "emulated"
    }

    fn allocate(&mut self, size: usize) -> Result<DeviceHandle> {
        let id = self.next_id;
        self.next_id += 1;
        self.buffers.insert(id, vec![0u8; size]);
        tracing::debug!(handle = id, size_bytes = size, "device_buffer_allocated");
        Ok(DeviceHandle::new(id))
    }

    fn free(&mut self, handle: DeviceHandle) -> Result<()> {
        self.buffers
            .remove(&handle.id())
            .map(|_| ())
            .ok_or_else(|| Error::Device(format!("free of unknown buffer {handle}")))
    }

    fn copy_to(&mut self, handle: DeviceHandle, data: &[u8]) -> Result<()> {
        let buf = self
            .buffers
            .get_mut(&handle.id())
            .ok_or_else(|| Error::Device(format!("copy_to unknown buffer {handle}")))?;
        if data.len() > buf.len() {
            return Err(Error::Device(format!(
                "copy_to overflow on {handle}: {} > {}",
                data.len(),
                buf.len()
            )));
        }
        buf[..data.len()].copy_from_slice(data);
        Ok(())
    }

    fn copy_from(&self, handle: DeviceHandle, out: &mut [u8]) -> Result<()> {
        let buf = self
            .buffers
            .get(&handle.id())
            .ok_or_else(|| Error::Device(format!("copy_from unknown buffer {handle}")))?;
        if out.len() > buf.len() {
            return Err(Error::Device(format!(
                "copy_from overflow on {handle}: {} > {}",
                out.len(),
                buf.len()
            )));
        }
        out.copy_from_slice(&buf[..out.len()]);
        Ok(())
    }

    fn base_addr(&self, handle: DeviceHandle) -> Result<u64> {
        self.buffers
            .get(&handle.id())
            .map(|b| b.as_ptr() as u64)
            .ok_or_else(|| Error::Device(format!("base_addr of unknown buffer {handle}")))
    }

    fn launch(
        &self,
        exec: &GpuExecutable,
        block: &ArgBlock,
        layout: &ArgLayout,
        dims: LaunchDims,
        shared: &[SharedReduceSpec],
    ) -> Result<()> {
        let body = match exec {
            GpuExecutable::Emulated(body) => body,
            GpuExecutable::Ptx { entry, .. } => {
                return Err(Error::Device(format!(
                    "PTX kernel {entry:?} requires the CUDA backend"
                )));
            }
        };
        use rayon::prelude::*;
        (0..dims.grid).into_par_iter().try_for_each(|block_idx| -> Result<()> {
            let view = block.view(layout);
            let mut shared_block = SharedBlock::new(shared, dims.block)?;
            for lane_idx in 0..dims.block {
                let ctx = LaneCtx {
                    block_idx,
                    lane_idx,
                    grid_dim: dims.grid,
                    block_dim: dims.block,
                };
                body(&ctx, &view, &mut shared_block);
            }
            // Barrier boundary: all lanes of the block are done. Tree-fold
            // each shared array and publish shared[0] to scratch[block_idx].
            for g in 0..shared_block.spec_count() {
                let (bytes, spec) = shared_block.slot_bytes_mut(g);
                reduce::tree_reduce_in_place(bytes, spec.elem, spec.op, dims.block)?;
                let sz = spec.elem.size_bytes();
                let scratch = view.scratch_ptr(spec.scratch_slot);
                unsafe {
                    std::ptr::copy_nonoverlapping(
                        bytes.as_ptr(),
                        scratch.add(block_idx as usize * sz),
                        sz,
                    );
                }
            }
            Ok(())
        })
    }
}
