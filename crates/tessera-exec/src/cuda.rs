//! CUDA device backend
//!
//! Executes PTX kernels emitted by the code generator on NVIDIA GPUs via
//! `cudarc`. Load or launch failures surface as [`Error::Device`] with the
//! driver's diagnostic; nothing retries.
//!
//! ```text
//! CudaDevice
//! ├── device   - cudarc driver handle
//! ├── buffers  - handle → CudaSlice<u8>
//! └── modules  - entry name → loaded PTX function
//! ```

#![cfg(feature = "cuda")]

use std::collections::HashMap;
use std::sync::Arc;

use cudarc::driver::{CudaSlice, DevicePtr, LaunchAsync, LaunchConfig as CudaLaunchConfig};
use parking_lot::Mutex;

use tessera_store::DeviceHandle;

use crate::backend::{DeviceBackend, LaunchDims, SharedReduceSpec};
use crate::error::{Error, Result};
use crate::kernel::GpuExecutable;
use crate::layout::{ArgBlock, ArgLayout};

/// CUDA-backed device
pub struct CudaDevice {
    device: Arc<cudarc::driver::CudaDevice>,
    buffers: Mutex<HashMap<u64, CudaSlice<u8>>>,
    next_id: Mutex<u64>,
    ptx_dump: bool,
}

impl CudaDevice {
    /// Bind GPU 0
    pub fn new(ptx_dump: bool) -> Result<Self> {
        let device = cudarc::driver::CudaDevice::new(0)
            .map_err(|e| Error::Device(format!("CUDA init failed: {e}")))?;
        Ok(Self {
            device,
            buffers: Mutex::new(HashMap::new()),
            next_id: Mutex::new(1),
            ptx_dump,
        })
    }

    fn load_entry(&self, src: &str, entry: &str) -> Result<cudarc::driver::CudaFunction> {
        if self.ptx_dump {
            eprintln!("=== PTX {entry} ===\n{src}");
        }
        if self.device.get_func(entry, entry).is_none() {
            self.device
                .load_ptx(cudarc::nvrtc::Ptx::from_src(src), entry, &[entry])
                .map_err(|e| Error::Device(format!("PTX load of {entry:?} failed: {e}")))?;
        }
        self.device
            .get_func(entry, entry)
            .ok_or_else(|| Error::Device(format!("PTX entry {entry:?} missing after load")))
    }
}

impl DeviceBackend for CudaDevice {
    fn name(&self) -> &'static str {
        "cuda"
    }

    fn allocate(&mut self, size: usize) -> Result<DeviceHandle> {
        let slice = self
            .device
            .alloc_zeros::<u8>(size.max(1))
            .map_err(|e| Error::Device(format!("allocation of {size} bytes failed: {e}")))?;
        let mut next = self.next_id.lock();
        let id = *next;
        *next += 1;
        self.buffers.lock().insert(id, slice);
        Ok(DeviceHandle::new(id))
    }

    fn free(&mut self, handle: DeviceHandle) -> Result<()> {
        self.buffers
            .lock()
            .remove(&handle.id())
            .map(|_| ())
            .ok_or_else(|| Error::Device(format!("free of unknown buffer {handle}")))
    }

    fn copy_to(&mut self, handle: DeviceHandle, data: &[u8]) -> Result<()> {
        let mut buffers = self.buffers.lock();
        let slice = buffers
            .get_mut(&handle.id())
            .ok_or_else(|| Error::Device(format!("copy_to unknown buffer {handle}")))?;
        self.device
            .htod_sync_copy_into(data, slice)
            .map_err(|e| Error::Device(format!("H2D copy failed: {e}")))
    }

    fn copy_from(&self, handle: DeviceHandle, out: &mut [u8]) -> Result<()> {
        let buffers = self.buffers.lock();
        let slice = buffers
            .get(&handle.id())
            .ok_or_else(|| Error::Device(format!("copy_from unknown buffer {handle}")))?;
        self.device
            .dtoh_sync_copy_into(slice, out)
            .map_err(|e| Error::Device(format!("D2H copy failed: {e}")))
    }

    fn base_addr(&self, handle: DeviceHandle) -> Result<u64> {
        let buffers = self.buffers.lock();
        let slice = buffers
            .get(&handle.id())
            .ok_or_else(|| Error::Device(format!("base_addr of unknown buffer {handle}")))?;
        Ok(*slice.device_ptr())
    }

    fn launch(
        &self,
        exec: &GpuExecutable,
        block: &ArgBlock,
        _layout: &ArgLayout,
        dims: LaunchDims,
        shared: &[SharedReduceSpec],
    ) -> Result<()> {
        let (src, entry) = match exec {
            GpuExecutable::Ptx { src, entry } => (src, entry),
            GpuExecutable::Emulated(_) => {
                return Err(Error::Device(
                    "emulated kernel body cannot run on the CUDA backend".into(),
                ));
            }
        };
        let func = self.load_entry(src, entry)?;

        // The argument block ships to the device verbatim; generated PTX
        // addresses its words by the layout's offsets.
        let words = self
            .device
            .htod_sync_copy(block.words())
            .map_err(|e| Error::Device(format!("argument upload failed: {e}")))?;
        let shared_mem_bytes: u32 = shared
            .iter()
            .map(|s| dims.block * s.elem.size_bytes() as u32)
            .sum();
        let cfg = CudaLaunchConfig {
            grid_dim: (dims.grid, 1, 1),
            block_dim: (dims.block, 1, 1),
            shared_mem_bytes,
        };
        unsafe { func.launch(cfg, (&words,)) }
            .map_err(|e| Error::Device(format!("launch of {entry:?} failed: {e}")))?;
        self.device
            .synchronize()
            .map_err(|e| Error::Device(format!("synchronize after {entry:?} failed: {e}")))
    }
}
