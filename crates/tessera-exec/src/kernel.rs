//! Kernel descriptions and the code-generator seam
//!
//! The front end (parser + typed-AST producer) is an external collaborator.
//! What reaches this crate is a [`Kernel`]: the mapped relation, a phase
//! report classifying every field and global access, insert/delete intent,
//! and a [`CodeGenerator`] that emits the inner executable against the
//! sealed argument layout.
//!
//! Executables come in two forms, mirroring the hybrid inline/dynamic
//! approach: in-process generated closures, or symbols loaded from a kernel
//! library (`.so`/`.dylib`/`.dll`) against a fixed C ABI taking the argument
//! block's word pointer.

use std::path::Path;
use std::sync::Arc;

use tessera_types::{ElemType, FieldRef, GlobalId, ReduceOp, RelationId};

use crate::backend::{LaneCtx, SharedBlock};
use crate::error::{Error, Result};
use crate::layout::{ArgBlock, ArgLayout, ArgView, Privilege};

/// ABI version exported by kernel libraries
pub const KERNEL_ABI_VERSION: u32 = 1;

/// Symbol every kernel library must export to report its ABI
pub const ABI_SYMBOL: &[u8] = b"tessera_kernel_abi_version";

/// One field access in a kernel's phase report
#[derive(Debug, Clone, Copy)]
pub struct FieldAccess {
    pub field: FieldRef,
    pub privilege: Privilege,
    /// The kernel reads neighbor rows of this field (stencil access)
    pub uncentered_read: bool,
}

impl FieldAccess {
    pub fn read(field: FieldRef) -> Self {
        Self {
            field,
            privilege: Privilege::ReadOnly,
            uncentered_read: false,
        }
    }

    pub fn read_uncentered(field: FieldRef) -> Self {
        Self {
            field,
            privilege: Privilege::ReadOnly,
            uncentered_read: true,
        }
    }

    pub fn read_write(field: FieldRef) -> Self {
        Self {
            field,
            privilege: Privilege::ReadWrite,
            uncentered_read: false,
        }
    }

    pub fn reduce(field: FieldRef, op: ReduceOp) -> Self {
        Self {
            field,
            privilege: Privilege::Reduce(op),
            uncentered_read: false,
        }
    }
}

/// One global access in a kernel's phase report
#[derive(Debug, Clone, Copy)]
pub struct GlobalAccess {
    pub global: GlobalId,
    /// `Some(op)` when the kernel reduces into the global, `None` for reads
    pub reduce: Option<ReduceOp>,
}

impl GlobalAccess {
    pub fn read(global: GlobalId) -> Self {
        Self { global, reduce: None }
    }

    pub fn reduce(global: GlobalId, op: ReduceOp) -> Self {
        Self {
            global,
            reduce: Some(op),
        }
    }
}

/// Per-kernel access classification produced by the front end
#[derive(Debug, Clone, Default)]
pub struct PhaseReport {
    pub fields: Vec<FieldAccess>,
    pub globals: Vec<GlobalAccess>,
}

impl PhaseReport {
    /// Reject racy access combinations
    ///
    /// A kernel that reads a field's neighbor rows while also writing it
    /// non-reductively can observe its own partial writes; that combination
    /// is fatal at compile.
    pub fn validate(&self) -> Result<()> {
        for access in &self.fields {
            if access.uncentered_read && matches!(access.privilege, Privilege::ReadWrite) {
                return Err(Error::PhaseConflict { field: access.field });
            }
        }
        Ok(())
    }
}

/// Insert intent: target relation plus the record's structural type
#[derive(Debug, Clone)]
pub struct InsertSpec {
    pub target: RelationId,
    pub record: Vec<ElemType>,
}

/// A compiled host executable
///
/// Contract: the function receives the bound argument block and returns
/// nothing; it loops the rows named by the block's bounds itself.
#[derive(Clone)]
pub enum CpuExecutable {
    /// In-process generated body
    Native(Arc<dyn Fn(&ArgView) + Send + Sync>),
    /// Symbol from a kernel library
    Dylib(DylibKernel),
}

impl CpuExecutable {
    pub fn run(&self, block: &ArgBlock, layout: &ArgLayout) {
        match self {
            CpuExecutable::Native(f) => f(&block.view(layout)),
            CpuExecutable::Dylib(k) => unsafe { (k.func)(block.base_ptr()) },
        }
    }
}

impl std::fmt::Debug for CpuExecutable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CpuExecutable::Native(_) => write!(f, "CpuExecutable::Native"),
            CpuExecutable::Dylib(_) => write!(f, "CpuExecutable::Dylib"),
        }
    }
}

/// A compiled device executable
#[derive(Clone)]
pub enum GpuExecutable {
    /// Per-lane body for the emulated device
    Emulated(Arc<dyn Fn(&LaneCtx, &ArgView, &mut SharedBlock) + Send + Sync>),
    /// PTX module for the CUDA backend
    Ptx { src: String, entry: String },
}

impl std::fmt::Debug for GpuExecutable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            GpuExecutable::Emulated(_) => write!(f, "GpuExecutable::Emulated"),
            GpuExecutable::Ptx { entry, .. } => write!(f, "GpuExecutable::Ptx({entry})"),
        }
    }
}

/// The external code generator
///
/// Called once per kernel version after the argument layout is sealed; the
/// emitted executable addresses fields and globals through the layout's
/// slot offsets.
pub trait CodeGenerator: Send + Sync {
    fn emit_cpu(&self, layout: &ArgLayout) -> Result<CpuExecutable>;

    fn emit_gpu(&self, layout: &ArgLayout) -> Result<GpuExecutable>;
}

/// Closure-backed generator, the common embedding
pub struct FnGenerator {
    cpu: Option<Arc<dyn Fn(&ArgLayout) -> CpuExecutable + Send + Sync>>,
    gpu: Option<Arc<dyn Fn(&ArgLayout) -> GpuExecutable + Send + Sync>>,
}

impl FnGenerator {
    pub fn cpu<F>(f: F) -> Self
    where
        F: Fn(&ArgLayout) -> CpuExecutable + Send + Sync + 'static,
    {
        Self {
            cpu: Some(Arc::new(f)),
            gpu: None,
        }
    }

    pub fn gpu<F>(f: F) -> Self
    where
        F: Fn(&ArgLayout) -> GpuExecutable + Send + Sync + 'static,
    {
        Self {
            cpu: None,
            gpu: Some(Arc::new(f)),
        }
    }

    pub fn both<C, G>(cpu: C, gpu: G) -> Self
    where
        C: Fn(&ArgLayout) -> CpuExecutable + Send + Sync + 'static,
        G: Fn(&ArgLayout) -> GpuExecutable + Send + Sync + 'static,
    {
        Self {
            cpu: Some(Arc::new(cpu)),
            gpu: Some(Arc::new(gpu)),
        }
    }
}

impl CodeGenerator for FnGenerator {
    fn emit_cpu(&self, layout: &ArgLayout) -> Result<CpuExecutable> {
        match &self.cpu {
            Some(f) => Ok(f(layout)),
            None => Err(Error::Device("kernel has no CPU body".into())),
        }
    }

    fn emit_gpu(&self, layout: &ArgLayout) -> Result<GpuExecutable> {
        match &self.gpu {
            Some(f) => Ok(f(layout)),
            None => Err(Error::Device("kernel has no device body".into())),
        }
    }
}

/// A user kernel as handed over by the front end
#[derive(Clone)]
pub struct Kernel {
    pub name: String,
    /// Relation the kernel maps over
    pub relation: RelationId,
    pub phase: PhaseReport,
    pub inserts: Option<InsertSpec>,
    pub deletes: bool,
    pub generator: Arc<dyn CodeGenerator>,
}

impl Kernel {
    pub fn new(
        name: impl Into<String>,
        relation: RelationId,
        phase: PhaseReport,
        generator: Arc<dyn CodeGenerator>,
    ) -> Self {
        Self {
            name: name.into(),
            relation,
            phase,
            inserts: None,
            deletes: false,
            generator,
        }
    }

    /// Declare that this kernel inserts rows into `target`
    pub fn with_inserts(mut self, target: RelationId, record: Vec<ElemType>) -> Self {
        self.inserts = Some(InsertSpec { target, record });
        self
    }

    /// Declare that this kernel deletes rows of its mapped relation
    pub fn with_deletes(mut self) -> Self {
        self.deletes = true;
        self
    }
}

impl std::fmt::Debug for Kernel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Kernel")
            .field("name", &self.name)
            .field("relation", &self.relation)
            .field("inserts", &self.inserts)
            .field("deletes", &self.deletes)
            .finish_non_exhaustive()
    }
}

/// A loaded kernel library
///
/// Libraries export `tessera_kernel_abi_version` plus one
/// `unsafe extern "C" fn(*const u64)` per kernel, taking the argument
/// block's word pointer.
pub struct KernelLibrary {
    lib: Arc<libloading::Library>,
    abi: u32,
}

/// A resolved dylib kernel symbol
#[derive(Clone)]
pub struct DylibKernel {
    /// Keeps the library mapped for as long as any kernel lives
    _lib: Arc<libloading::Library>,
    pub(crate) func: unsafe extern "C" fn(*const u64),
}

impl KernelLibrary {
    /// Load and ABI-check a kernel library
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let lib = unsafe { libloading::Library::new(path) }
            .map_err(|e| Error::KernelLibrary(format!("failed to load {}: {e}", path.display())))?;
        let abi = unsafe {
            match lib.get::<unsafe extern "C" fn() -> u32>(ABI_SYMBOL) {
                Ok(f) => f(),
                Err(_) => KERNEL_ABI_VERSION,
            }
        };
        if abi != KERNEL_ABI_VERSION {
            return Err(Error::KernelLibrary(format!(
                "{} reports ABI v{abi}, runtime expects v{KERNEL_ABI_VERSION}",
                path.display()
            )));
        }
        tracing::info!(path = %path.display(), abi, "kernel_library_loaded");
        Ok(Self {
            lib: Arc::new(lib),
            abi,
        })
    }

    pub fn abi_version(&self) -> u32 {
        self.abi
    }

    /// Resolve a kernel symbol
    pub fn kernel(&self, symbol: &str) -> Result<CpuExecutable> {
        let func = unsafe {
            self.lib
                .get::<unsafe extern "C" fn(*const u64)>(symbol.as_bytes())
                .map(|f| *f)
                .map_err(|e| Error::KernelLibrary(format!("symbol {symbol:?}: {e}")))?
        };
        Ok(CpuExecutable::Dylib(DylibKernel {
            _lib: Arc::clone(&self.lib),
            func,
        }))
    }
}
