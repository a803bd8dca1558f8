//! Kernel versions and the executor
//!
//! A *version* is a (kernel, processor, subset-shape) triple: GPU vs CPU and
//! boolmask vs index-subset launches each get their own compiled artifact.
//! Every version walks the same state machine:
//!
//! ```text
//! declared --compile--> compiled --dynamic_checks--> ready --launch--> launched
//!                          ^                                              |
//!                          +--- re-compile on schema change --------------+
//! ```
//!
//! `compile` builds the argument layout, registers privileges, declares
//! insert/delete intent, extends the layout with reduction scratch for
//! device launches, and asks the external code generator for the inner
//! executable. `bind` resolves every pointer into the argument block.
//! `launch` runs the executable: partition-parallel on CPU, block/lane grid
//! on the device. `post_launch` commits elastic mutations, runs the
//! reduction secondary pass, and frees scratch.
//!
//! All dynamic-check failures are fail-fast; nothing retries.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use tessera_store::{FieldStorage, Store, SubsetShape};
use tessera_types::{ElemType, FieldRef, Processor, ReduceOp, RuntimeConfig, SubsetId};

use crate::backend::{DeviceBackend, EmulatedDevice, LaunchDims};
use crate::error::{Error, Result};
use crate::kernel::{CpuExecutable, GpuExecutable, Kernel};
use crate::layout::{ArgBlock, ArgLayout, Bounds, GlobalBinding, Privilege};
use crate::reduce::{self, ReductionPlan, DEFAULT_BLOCK_SIZE};

/// Version lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VersionState {
    Declared,
    Compiled,
    Ready,
    Launched,
}

impl std::fmt::Display for VersionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            VersionState::Declared => "declared",
            VersionState::Compiled => "compiled",
            VersionState::Ready => "ready",
            VersionState::Launched => "launched",
        };
        write!(f, "{s}")
    }
}

/// Key identifying one compiled version
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct VersionKey {
    kernel: String,
    processor: Processor,
    shape: Option<SubsetShape>,
}

/// How to run a kernel: target processor plus optional subset restriction
#[derive(Debug, Clone, Copy)]
pub struct LaunchSpec {
    pub processor: Processor,
    pub subset: Option<SubsetId>,
}

impl LaunchSpec {
    pub const fn cpu() -> Self {
        Self {
            processor: Processor::Cpu,
            subset: None,
        }
    }

    pub const fn gpu() -> Self {
        Self {
            processor: Processor::Gpu,
            subset: None,
        }
    }

    pub fn with_subset(mut self, subset: SubsetId) -> Self {
        self.subset = Some(subset);
        self
    }
}

/// One compiled (kernel, processor, subset-shape) artifact
pub struct KernelVersion {
    kernel: Kernel,
    processor: Processor,
    subset_shape: Option<SubsetShape>,
    state: VersionState,
    layout: ArgLayout,
    cpu_exec: Option<CpuExecutable>,
    gpu_exec: Option<GpuExecutable>,
    reduction: Option<ReductionPlan>,
    /// Structural signature of the mapped relation at compile time;
    /// a mismatch at launch forces re-compilation
    compiled_signature: Vec<ElemType>,
    /// Cached argument block, rebound (not reallocated) per launch
    arg_block: Option<ArgBlock>,
    /// Write-index global for inserting kernels
    insert_cursor: Option<Box<AtomicU64>>,
    /// Deletion counter for deleting kernels
    delete_counter: Option<Box<AtomicU64>>,
    launches: u64,
}

impl KernelVersion {
    pub fn state(&self) -> VersionState {
        self.state
    }

    pub fn layout(&self) -> &ArgLayout {
        &self.layout
    }

    pub fn launches(&self) -> u64 {
        self.launches
    }

    /// Compile a kernel for one processor and subset shape
    fn compile(
        store: &Store,
        kernel: &Kernel,
        processor: Processor,
        shape: Option<SubsetShape>,
    ) -> Result<Self> {
        kernel.phase.validate()?;
        let relation = store.relation(kernel.relation)?;
        let mut layout = ArgLayout::new(relation.n_dims());

        // 1. Register every accessed field and global with its privilege.
        for access in &kernel.phase.fields {
            layout.add_field(access.field, access.privilege);
        }
        match shape {
            Some(SubsetShape::IndexList) => layout.enable_index(),
            Some(SubsetShape::BoolMask) => layout.enable_mask(),
            None => {}
        }
        for access in &kernel.phase.globals {
            if let Some(op) = access.reduce {
                let elem = store.global(access.global)?.elem();
                if !op.supports(elem.lane_kind()) {
                    return Err(Error::UnsupportedReduce {
                        global: access.global,
                    });
                }
            }
            layout.add_global(GlobalBinding::User(access.global), access.reduce);
        }

        // 2. Declare elastic intent: the layout gains the target's columns,
        //    its live mask, and the internal counter globals.
        let mut insert_cursor = None;
        if let Some(ins) = &kernel.inserts {
            let target = store.relation(ins.target)?;
            if target.live_mask().is_none() {
                return Err(Error::Store(tessera_store::Error::NotElastic(ins.target)));
            }
            // Every target column, live mask included, is written at the
            // freshly reserved destination row.
            for field in target.fields() {
                layout.add_field(field.fref(), Privilege::ReadWrite);
            }
            layout.add_global(GlobalBinding::InsertCursor, None);
            insert_cursor = Some(Box::new(AtomicU64::new(0)));
        }
        let mut delete_counter = None;
        if kernel.deletes {
            let mask_idx = relation
                .live_mask()
                .ok_or(Error::Store(tessera_store::Error::NotElastic(kernel.relation)))?;
            layout.add_field(FieldRef::new(kernel.relation, mask_idx), Privilege::ReadWrite);
            layout.add_global(GlobalBinding::DeleteCounter, None);
            delete_counter = Some(Box::new(AtomicU64::new(0)));
        }

        // 3. Device global reductions extend the layout with scratch arrays.
        let reduction = if processor == Processor::Gpu {
            ReductionPlan::build(store, &mut layout, DEFAULT_BLOCK_SIZE)?
        } else {
            None
        };

        // 4. The layout is complete; seal it and emit the inner executable.
        layout.finalize();
        let (cpu_exec, gpu_exec) = match processor {
            Processor::Cpu => (Some(kernel.generator.emit_cpu(&layout)?), None),
            Processor::Gpu => (None, Some(kernel.generator.emit_gpu(&layout)?)),
        };

        tracing::debug!(
            kernel = %kernel.name,
            processor = %processor,
            fields = layout.fields().len(),
            globals = layout.globals().len(),
            scratch = layout.scratch().len(),
            "kernel_compiled"
        );

        Ok(Self {
            kernel: kernel.clone(),
            processor,
            subset_shape: shape,
            state: VersionState::Compiled,
            layout,
            cpu_exec,
            gpu_exec,
            reduction,
            compiled_signature: relation.structural_signature(),
            arg_block: None,
            insert_cursor,
            delete_counter,
            launches: 0,
        })
    }

    /// Checks run at every execute, all fatal on failure
    fn dynamic_checks(&self, store: &Store, shape: Option<SubsetShape>) -> Result<()> {
        if shape != self.subset_shape {
            return Err(Error::SubsetShapeMismatch {
                kernel: self.kernel.name.clone(),
                compiled: shape_name(self.subset_shape),
                supplied: shape_name(shape),
            });
        }
        for slot in self.layout.fields() {
            let field = store.field(slot.field)?;
            let actual = field.processor();
            if actual != self.processor {
                return Err(Error::FieldNotResident {
                    field: slot.field,
                    expected: self.processor,
                    actual,
                });
            }
        }
        if let Some(ins) = &self.kernel.inserts {
            let signature = store.relation(ins.target)?.structural_signature();
            if signature != ins.record {
                return Err(Error::Store(tessera_store::Error::RecordTypeMismatch {
                    relation: ins.target,
                    expected: format!("{signature:?}"),
                    actual: format!("{:?}", ins.record),
                }));
            }
        }
        Ok(())
    }
}

fn shape_name(shape: Option<SubsetShape>) -> String {
    match shape {
        None => "full-relation".into(),
        Some(s) => s.to_string(),
    }
}

/// Per-launch transient bookkeeping
struct LaunchCtx {
    rows: u64,
    /// Insert reservation: (old_concrete, reserved_concrete)
    reservation: Option<(usize, usize)>,
    scratch: Vec<tessera_store::DeviceHandle>,
    grid: u32,
    /// CPU-side reduced user globals: (global slot, id, elem, op)
    cpu_reduce: Vec<(usize, tessera_types::GlobalId, ElemType, ReduceOp)>,
}

/// The execution driver
///
/// Owns the device backend and the version cache; the store is passed into
/// each call so that data and execution state stay independently owned.
pub struct Executor {
    config: RuntimeConfig,
    device: Box<dyn DeviceBackend>,
    versions: HashMap<VersionKey, KernelVersion>,
}

impl Executor {
    /// Executor over the reference emulated device
    pub fn new(config: RuntimeConfig) -> Self {
        Self::with_device(config, Box::new(EmulatedDevice::new()))
    }

    /// Executor over an explicit device backend
    pub fn with_device(config: RuntimeConfig, device: Box<dyn DeviceBackend>) -> Self {
        tracing::debug!(device = device.name(), partitions = config.num_partitions, "executor_created");
        Self {
            config,
            device,
            versions: HashMap::new(),
        }
    }

    /// Executor over the CUDA backend
    #[cfg(feature = "cuda")]
    pub fn with_cuda(config: RuntimeConfig) -> Result<Self> {
        let device = crate::cuda::CudaDevice::new(config.ptx_dump)?;
        Ok(Self::with_device(config, Box::new(device)))
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    pub fn device(&self) -> &dyn DeviceBackend {
        self.device.as_ref()
    }

    /// Number of compiled versions (diagnostics)
    pub fn version_count(&self) -> usize {
        self.versions.len()
    }

    /// Move a field's column between host and device
    pub fn move_field(&mut self, store: &mut Store, fref: FieldRef, to: Processor) -> Result<()> {
        let field = store.field_mut(fref)?;
        match (field.processor(), to) {
            (Processor::Cpu, Processor::Gpu) => {
                let host = field.require_host()?;
                let (elem, len) = (host.elem(), host.len());
                let bytes = host.as_bytes().to_vec();
                let handle = self.device.allocate(bytes.len())?;
                self.device.copy_to(handle, &bytes)?;
                field.set_storage(FieldStorage::Device { handle, elem, len });
                tracing::debug!(field = %fref, bytes = bytes.len(), direction = "H2D", "field_migrated");
            }
            (Processor::Gpu, Processor::Cpu) => {
                let (handle, elem, len) = match field.storage() {
                    FieldStorage::Device { handle, elem, len } => (*handle, *elem, *len),
                    _ => unreachable!("processor() said device"),
                };
                let mut host = tessera_store::HostArray::new(elem, len);
                self.device.copy_from(handle, host.as_bytes_mut())?;
                self.device.free(handle)?;
                field.set_storage(FieldStorage::Host(host));
                tracing::debug!(field = %fref, direction = "D2H", "field_migrated");
            }
            _ => {}
        }
        Ok(())
    }

    /// Defrag an elastic relation, migrating device-resident columns home
    /// first (the compaction scan is host-side)
    pub fn defrag(&mut self, store: &mut Store, rel: tessera_types::RelationId) -> Result<()> {
        let device_fields: Vec<FieldRef> = store
            .relation(rel)?
            .fields()
            .iter()
            .filter(|f| f.processor() == Processor::Gpu)
            .map(|f| f.fref())
            .collect();
        for fref in device_fields {
            self.move_field(store, fref, Processor::Cpu)?;
        }
        store.defrag(rel)?;
        Ok(())
    }

    /// Compile (or reuse), check, bind, launch, and post-process a kernel
    pub fn launch(&mut self, store: &mut Store, kernel: &Kernel, spec: LaunchSpec) -> Result<()> {
        let start = Instant::now();
        let shape = match spec.subset {
            Some(id) => {
                let relation = store.relation(kernel.relation)?;
                let subset = relation.subset(id).ok_or(Error::Store(
                    tessera_store::Error::UnknownSubset {
                        relation: kernel.relation,
                        subset: id,
                    },
                ))?;
                Some(subset.shape())
            }
            None => None,
        };
        let key = VersionKey {
            kernel: kernel.name.clone(),
            processor: spec.processor,
            shape,
        };

        // Re-compile on schema change; the layout may gain or lose slots.
        let needs_compile = match self.versions.get(&key) {
            Some(v) => v.compiled_signature != store.relation(kernel.relation)?.structural_signature(),
            None => true,
        };
        if needs_compile {
            let version = KernelVersion::compile(store, kernel, spec.processor, shape)?;
            self.versions.insert(key.clone(), version);
        }

        // Split borrows: the version lives in the map while the device is
        // driven separately.
        let version = self.versions.get_mut(&key).expect("just inserted");
        version.dynamic_checks(store, shape)?;
        version.state = VersionState::Ready;

        let mut ctx = bind(store, version, self.device.as_mut(), &spec)?;
        version.state = VersionState::Launched;
        let launched = run(store, version, self.device.as_ref(), &self.config, &mut ctx);
        let post = match launched {
            Ok(()) => post_launch(store, version, self.device.as_mut(), &mut ctx),
            Err(e) => {
                // Failed launches still release scratch; nothing retries.
                free_scratch(self.device.as_mut(), &mut ctx);
                Err(e)
            }
        };
        clear_reduce_bindings(store, version);
        version.state = VersionState::Ready;
        version.launches += 1;

        let duration_us = start.elapsed().as_micros() as u64;
        match &post {
            Ok(()) => tracing::debug!(
                kernel = %kernel.name,
                processor = %spec.processor,
                rows = ctx.rows,
                duration_us,
                "kernel_launched"
            ),
            Err(e) => tracing::error!(kernel = %kernel.name, error = %e, "kernel_launch_failed"),
        }
        post
    }
}

/// Resolve every pointer into the version's argument block
fn bind(
    store: &mut Store,
    version: &mut KernelVersion,
    device: &mut dyn DeviceBackend,
    spec: &LaunchSpec,
) -> Result<LaunchCtx> {
    let relation = store.relation(version.kernel.relation)?;
    let n_dims = relation.n_dims();

    // Row bounds. Index-subset launches use bounds[0] over the index list;
    // elastic relations iterate every concrete row (the body filters by
    // live mask); everything else iterates logical rows or grid axes.
    let mut bounds = Vec::with_capacity(n_dims);
    let total_rows: u64;
    let subset_rows = spec.subset.and_then(|id| {
        relation
            .subset(id)
            .and_then(|s| s.indices().map(|ix| ix.len() as u64))
    });
    if let Some(index_len) = subset_rows {
        bounds.push(empty_guard(index_len));
        total_rows = index_len;
    } else if let Some(dims) = relation.dims() {
        for d in dims {
            bounds.push(empty_guard(*d as u64));
        }
        total_rows = dims.iter().product::<usize>() as u64;
    } else if relation.is_elastic() {
        bounds.push(empty_guard(relation.concrete_size() as u64));
        total_rows = relation.concrete_size() as u64;
    } else {
        bounds.push(empty_guard(relation.logical_size() as u64));
        total_rows = relation.logical_size() as u64;
    }

    // Insert reservation happens before pointers resolve: growing columns
    // reallocates them.
    let mut reservation = None;
    if let Some(ins) = &version.kernel.inserts {
        let launch_rows = total_rows as usize;
        let old_concrete = store.reserve_for_insert(ins.target, launch_rows, &ins.record)?;
        reservation = Some((old_concrete, old_concrete + launch_rows));
        if let Some(cursor) = &version.insert_cursor {
            cursor.store(old_concrete as u64, Ordering::SeqCst);
        }
    }
    if let Some(counter) = &version.delete_counter {
        counter.store(0, Ordering::SeqCst);
    }

    let mut block = version
        .arg_block
        .take()
        .unwrap_or_else(|| ArgBlock::for_layout(&version.layout));
    for (d, b) in bounds.iter().enumerate() {
        block.set_bounds(&version.layout, d, *b);
    }

    // Subset pointers.
    let relation = store.relation(version.kernel.relation)?;
    if let Some(w) = version.layout.index_word() {
        let subset = spec
            .subset
            .and_then(|id| relation.subset(id))
            .expect("dynamic_checks verified the subset shape");
        let ix = subset.indices().expect("index-shape subset");
        block.set_word(w, ix.as_ptr() as u64);
        block.set_word(w + 1, ix.len() as u64);
    }
    if let Some(w) = version.layout.mask_word() {
        let subset = spec
            .subset
            .and_then(|id| relation.subset(id))
            .expect("dynamic_checks verified the subset shape");
        let mask = subset.mask().expect("boolmask-shape subset");
        block.set_word(w, mask.as_ptr() as u64);
        block.set_word(w + 1, mask.len() as u64);
    }

    // Field base pointers.
    for (slot, fs) in version.layout.fields().iter().enumerate() {
        let word = version.layout.field_word(slot);
        let field = store.field_mut(fs.field)?;
        let addr = match field.storage_mut() {
            FieldStorage::Host(host) => host.base_ptr() as u64,
            FieldStorage::Device { handle, .. } => device.base_addr(*handle)?,
            FieldStorage::Region { .. } => {
                return Err(Error::FieldNotResident {
                    field: fs.field,
                    expected: version.processor,
                    actual: Processor::Cpu,
                })
            }
        };
        block.set_word(word, addr);
    }

    // Global pointers; reduced user globals also get their op bound for the
    // duration of the kernel.
    let mut cpu_reduce = Vec::new();
    for (slot, gs) in version.layout.globals().iter().enumerate() {
        let word = version.layout.global_word(slot);
        match gs.binding {
            GlobalBinding::User(id) => {
                if let Some(op) = gs.reduce {
                    let elem = store.global(id)?.elem();
                    store.global_mut(id)?.bind_reduce(op);
                    if version.processor == Processor::Cpu {
                        cpu_reduce.push((slot, id, elem, op));
                    }
                }
                block.set_word(word, store.global_mut(id)?.base_ptr() as u64);
            }
            GlobalBinding::InsertCursor => {
                let cursor = version.insert_cursor.as_ref().expect("insert kernels own a cursor");
                block.set_word(word, cursor.as_ref() as *const AtomicU64 as u64);
            }
            GlobalBinding::DeleteCounter => {
                let counter = version.delete_counter.as_ref().expect("delete kernels own a counter");
                block.set_word(word, counter.as_ref() as *const AtomicU64 as u64);
            }
        }
    }

    // Scratch arrays: allocated now, freed on every path out of
    // post-processing.
    let mut scratch = Vec::new();
    let mut grid = 0;
    if let Some(plan) = &version.reduction {
        grid = LaunchDims::for_rows(total_rows, plan.block_size).grid;
        scratch = plan.alloc_scratch(device, grid)?;
        for (slot, &handle) in scratch.iter().enumerate() {
            let word = version.layout.scratch_word(slot);
            block.set_word(word, device.base_addr(handle)?);
        }
    }

    version.arg_block = Some(block);
    Ok(LaunchCtx {
        rows: total_rows,
        reservation,
        scratch,
        grid,
        cpu_reduce,
    })
}

fn empty_guard(rows: u64) -> Bounds {
    if rows == 0 {
        Bounds::new(1, 0)
    } else {
        Bounds::new(0, rows - 1)
    }
}

/// Invoke the compiled executable
fn run(
    store: &mut Store,
    version: &KernelVersion,
    device: &dyn DeviceBackend,
    config: &RuntimeConfig,
    ctx: &mut LaunchCtx,
) -> Result<()> {
    if ctx.rows == 0 {
        return Ok(());
    }
    let block = version.arg_block.as_ref().expect("bound before run");
    match version.processor {
        Processor::Cpu => run_cpu(store, version, block, config, ctx),
        Processor::Gpu => {
            let exec = version.gpu_exec.as_ref().expect("gpu version carries a device executable");
            let dims = match &version.reduction {
                Some(plan) => LaunchDims {
                    grid: ctx.grid,
                    block: plan.block_size,
                },
                None => LaunchDims::for_rows(ctx.rows, DEFAULT_BLOCK_SIZE),
            };
            let shared = version
                .reduction
                .as_ref()
                .map(|p| p.shared_specs())
                .unwrap_or_default();
            device.launch(exec, block, &version.layout, dims, &shared)
        }
    }
}

/// CPU launch: one OS thread per partition over contiguous chunks of
/// `bounds[0]`, with partition-private identity slots for reduced globals
fn run_cpu(
    store: &mut Store,
    version: &KernelVersion,
    block: &ArgBlock,
    config: &RuntimeConfig,
    ctx: &mut LaunchCtx,
) -> Result<()> {
    let exec = version.cpu_exec.as_ref().expect("cpu version carries a host executable");
    let layout = &version.layout;
    let base = block.view(layout).bounds(0);
    let partitions = (config.num_partitions as u64).min(base.rows()).max(1);

    if partitions == 1 {
        exec.run(block, layout);
        return Ok(());
    }

    // Partition-private accumulators keep reduce-globals free of
    // cross-thread writes; the join folds them in partition order.
    let chunk = base.rows().div_ceil(partitions);
    let mut part_blocks = Vec::with_capacity(partitions as usize);
    let mut part_slots: Vec<Vec<Vec<u8>>> = Vec::with_capacity(partitions as usize);
    for p in 0..partitions {
        let lo = base.lo + p * chunk;
        let hi = (base.lo + (p + 1) * chunk - 1).min(base.hi);
        if lo > hi {
            continue;
        }
        let mut pb = block.clone();
        pb.set_bounds(layout, 0, Bounds::new(lo, hi));
        let mut slots = Vec::with_capacity(ctx.cpu_reduce.len());
        for (slot, _id, elem, op) in &ctx.cpu_reduce {
            let mut bytes = reduce::identity_elem_bytes(*op, *elem)?;
            pb.set_word(layout.global_word(*slot), bytes.as_mut_ptr() as u64);
            slots.push(bytes);
        }
        part_slots.push(slots);
        part_blocks.push(pb);
    }

    use rayon::prelude::*;
    part_blocks.par_iter().for_each(|pb| exec.run(pb, layout));

    // Fold private slots into the true globals through ⊕.
    for (t, (_slot, id, elem, op)) in ctx.cpu_reduce.iter().enumerate() {
        let global = store.global_mut(*id)?;
        for slots in &part_slots {
            reduce::fold_elem_in_place(*op, *elem, global.bytes_mut(), &slots[t])?;
        }
    }
    Ok(())
}

/// Post-launch bookkeeping: elastic commits, reduction secondary pass,
/// scratch release
fn post_launch(
    store: &mut Store,
    version: &KernelVersion,
    device: &mut dyn DeviceBackend,
    ctx: &mut LaunchCtx,
) -> Result<()> {
    // Secondary pass first: its scratch must be freed on every path.
    let reduction_result = match (&version.reduction, ctx.scratch.is_empty()) {
        (Some(plan), false) => plan.secondary_pass(store, device, &ctx.scratch, ctx.grid),
        _ => Ok(()),
    };
    free_scratch(device, ctx);
    reduction_result?;

    if let Some(ins) = &version.kernel.inserts {
        let (old_concrete, reserved) = ctx.reservation.expect("insert launches reserve");
        let final_index = version
            .insert_cursor
            .as_ref()
            .expect("insert kernels own a cursor")
            .load(Ordering::SeqCst) as usize;
        if final_index > reserved {
            return Err(Error::InsertOverflow {
                relation: ins.target,
                written: final_index - old_concrete,
                reserved: reserved - old_concrete,
            });
        }
        store.commit_insert(ins.target, old_concrete, final_index)?;
    }

    if version.kernel.deletes {
        let deleted = version
            .delete_counter
            .as_ref()
            .expect("delete kernels own a counter")
            .load(Ordering::SeqCst) as usize;
        let fired = store.commit_delete(version.kernel.relation, deleted)?;
        if fired {
            tracing::debug!(relation = %version.kernel.relation, "auto_defrag_fired");
        }
    }
    Ok(())
}

fn free_scratch(device: &mut dyn DeviceBackend, ctx: &mut LaunchCtx) {
    for handle in ctx.scratch.drain(..) {
        if let Err(e) = device.free(handle) {
            tracing::warn!(error = %e, "scratch_free_failed");
        }
    }
}

fn clear_reduce_bindings(store: &mut Store, version: &KernelVersion) {
    for gs in version.layout.globals() {
        if let (GlobalBinding::User(id), Some(_)) = (gs.binding, gs.reduce) {
            if let Ok(g) = store.global_mut(id) {
                g.clear_reduce();
            }
        }
    }
}
