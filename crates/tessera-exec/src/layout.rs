//! Per-kernel argument layout
//!
//! The front end and the generated executable communicate through a packed
//! argument block: a flat array of 64-bit words whose shape is fixed at
//! compile time by [`ArgLayout`]. Slots appear in a fixed order:
//!
//! ```text
//! word 0 ..            bounds        (lo, hi) inclusive per axis
//! then (optional)      index_ptr, index_size     index-subset launches
//! then (optional)      mask_ptr, mask_len        boolmask-subset launches
//! then                 one base pointer per referenced field
//! then                 one pointer per referenced global
//! then                 one scratch pointer per device-reduced global
//! ```
//!
//! Layout finalization is one-shot: the first query of the block shape seals
//! it, and registering anything afterwards is an implementation bug that
//! aborts with a diagnostic rather than corrupting a compiled kernel's view.

use std::sync::atomic::AtomicU64;

use tessera_types::{ElemType, FieldRef, GlobalId, ReduceOp};

/// Maximum index-space dimensionality
pub const MAX_DIMS: usize = 3;

/// Per-field access privilege recorded in the layout
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Privilege {
    /// The kernel only reads
    ReadOnly,
    /// The kernel reads and writes the centered row
    ReadWrite,
    /// Commutative-associative reduction with identity
    Reduce(ReduceOp),
}

impl Privilege {
    pub fn is_write(self) -> bool {
        !matches!(self, Privilege::ReadOnly)
    }
}

/// What a global slot points at when bound
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GlobalBinding {
    /// A user global in the store
    User(GlobalId),
    /// The internal write-index of an inserting kernel
    InsertCursor,
    /// The internal deletion counter of a deleting kernel
    DeleteCounter,
}

/// A registered field slot
#[derive(Debug, Clone, Copy)]
pub struct FieldSlot {
    pub field: FieldRef,
    pub privilege: Privilege,
}

/// A registered global slot
#[derive(Debug, Clone, Copy)]
pub struct GlobalSlot {
    pub binding: GlobalBinding,
    /// Reduction applied by the kernel, `None` for plain reads
    pub reduce: Option<ReduceOp>,
}

/// A scratch slot added by the reduction engine
#[derive(Debug, Clone, Copy)]
pub struct ScratchSlot {
    /// Index of the reduced global slot this scratch array serves
    pub global_slot: usize,
    pub elem: ElemType,
    pub op: ReduceOp,
}

/// Compile-time shape of a kernel's argument block
#[derive(Debug)]
pub struct ArgLayout {
    n_dims: usize,
    fields: Vec<FieldSlot>,
    globals: Vec<GlobalSlot>,
    scratch: Vec<ScratchSlot>,
    has_index: bool,
    has_mask: bool,
    /// Distributed launches: field slots are accessor records
    /// `{base, strides[n_dims], handle}` instead of single pointers
    accessor_fields: bool,
    sealed: bool,
}

impl ArgLayout {
    /// Start an open layout for an `n_dims`-dimensional row space
    pub fn new(n_dims: usize) -> Self {
        assert!(
            (1..=MAX_DIMS).contains(&n_dims),
            "argument layout supports 1-{MAX_DIMS} dims, got {n_dims}"
        );
        Self {
            n_dims,
            fields: Vec::new(),
            globals: Vec::new(),
            scratch: Vec::new(),
            has_index: false,
            has_mask: false,
            accessor_fields: false,
            sealed: false,
        }
    }

    /// Start an open layout whose field slots are distributed accessor
    /// records; the scheduler's task wrapper fills them at bind time
    pub fn new_distributed(n_dims: usize) -> Self {
        let mut layout = Self::new(n_dims);
        layout.accessor_fields = true;
        layout
    }

    /// Words one field slot occupies
    fn field_width(&self) -> usize {
        if self.accessor_fields {
            2 + self.n_dims
        } else {
            1
        }
    }

    pub fn uses_accessors(&self) -> bool {
        self.accessor_fields
    }

    fn assert_open(&self, what: &str) {
        assert!(
            !self.sealed,
            "argument layout already sealed; cannot add {what} (runtime bug)"
        );
    }

    /// Register a field access; returns its slot index
    pub fn add_field(&mut self, field: FieldRef, privilege: Privilege) -> usize {
        self.assert_open("field");
        // A kernel may touch one field through several expressions; the
        // layout keeps a single slot with the strongest privilege.
        if let Some(pos) = self.fields.iter().position(|s| s.field == field) {
            if privilege.is_write() {
                self.fields[pos].privilege = privilege;
            }
            return pos;
        }
        self.fields.push(FieldSlot { field, privilege });
        self.fields.len() - 1
    }

    /// Register a global access; returns its slot index
    pub fn add_global(&mut self, binding: GlobalBinding, reduce: Option<ReduceOp>) -> usize {
        self.assert_open("global");
        if let Some(pos) = self.globals.iter().position(|s| s.binding == binding) {
            if reduce.is_some() {
                self.globals[pos].reduce = reduce;
            }
            return pos;
        }
        self.globals.push(GlobalSlot { binding, reduce });
        self.globals.len() - 1
    }

    /// Register a scratch array for a device-reduced global; returns its
    /// slot index (reduction engine only)
    pub fn add_scratch(&mut self, global_slot: usize, elem: ElemType, op: ReduceOp) -> usize {
        self.assert_open("scratch");
        self.scratch.push(ScratchSlot {
            global_slot,
            elem,
            op,
        });
        self.scratch.len() - 1
    }

    /// Declare that launches supply an index subset
    pub fn enable_index(&mut self) {
        self.assert_open("index slot");
        self.has_index = true;
    }

    /// Declare that launches supply a boolmask subset
    pub fn enable_mask(&mut self) {
        self.assert_open("mask slot");
        self.has_mask = true;
    }

    /// Seal the layout; the block shape is fixed from here on
    pub fn finalize(&mut self) {
        self.sealed = true;
    }

    pub fn is_sealed(&self) -> bool {
        self.sealed
    }

    pub fn n_dims(&self) -> usize {
        self.n_dims
    }

    pub fn fields(&self) -> &[FieldSlot] {
        &self.fields
    }

    pub fn globals(&self) -> &[GlobalSlot] {
        &self.globals
    }

    pub fn scratch(&self) -> &[ScratchSlot] {
        &self.scratch
    }

    pub fn has_index(&self) -> bool {
        self.has_index
    }

    pub fn has_mask(&self) -> bool {
        self.has_mask
    }

    /// Slot index of a registered field, if any
    pub fn field_slot(&self, field: FieldRef) -> Option<usize> {
        self.fields.iter().position(|s| s.field == field)
    }

    /// Slot index of a registered global binding, if any
    pub fn global_slot(&self, binding: GlobalBinding) -> Option<usize> {
        self.globals.iter().position(|s| s.binding == binding)
    }

    fn assert_sealed(&self) {
        assert!(self.sealed, "argument layout queried before finalize (runtime bug)");
    }

    // Word offsets. Bounds live at the front so generated code can address
    // them without knowing the rest of the shape.

    pub fn bounds_word(&self, dim: usize) -> usize {
        self.assert_sealed();
        debug_assert!(dim < self.n_dims);
        2 * dim
    }

    fn after_bounds(&self) -> usize {
        2 * self.n_dims
    }

    pub fn index_word(&self) -> Option<usize> {
        self.assert_sealed();
        self.has_index.then(|| self.after_bounds())
    }

    pub fn mask_word(&self) -> Option<usize> {
        self.assert_sealed();
        self.has_mask
            .then(|| self.after_bounds() + if self.has_index { 2 } else { 0 })
    }

    fn fields_base(&self) -> usize {
        self.after_bounds() + if self.has_index { 2 } else { 0 } + if self.has_mask { 2 } else { 0 }
    }

    pub fn field_word(&self, slot: usize) -> usize {
        self.assert_sealed();
        debug_assert!(slot < self.fields.len());
        self.fields_base() + slot * self.field_width()
    }

    pub fn global_word(&self, slot: usize) -> usize {
        self.assert_sealed();
        debug_assert!(slot < self.globals.len());
        self.fields_base() + self.fields.len() * self.field_width() + slot
    }

    pub fn scratch_word(&self, slot: usize) -> usize {
        self.assert_sealed();
        debug_assert!(slot < self.scratch.len());
        self.fields_base() + self.fields.len() * self.field_width() + self.globals.len() + slot
    }

    /// Total block size in words
    pub fn word_count(&self) -> usize {
        self.assert_sealed();
        self.fields_base() + self.fields.len() * self.field_width() + self.globals.len() + self.scratch.len()
    }
}

/// One bound pair, inclusive on both ends
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Bounds {
    pub lo: u64,
    pub hi: u64,
}

impl Bounds {
    pub const fn new(lo: u64, hi: u64) -> Self {
        Self { lo, hi }
    }

    /// Number of rows covered (`hi` inclusive); 0 for an empty range
    pub const fn rows(self) -> u64 {
        if self.hi < self.lo {
            0
        } else {
            self.hi - self.lo + 1
        }
    }
}

/// Distributed accessor record: region base, per-axis element strides,
/// and the backing region handle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FieldAccessor {
    pub base: u64,
    strides: [u64; MAX_DIMS],
    n_dims: usize,
    pub handle: u64,
}

impl FieldAccessor {
    pub fn strides(&self) -> &[u64] {
        &self.strides[..self.n_dims]
    }

    /// Linear element index of a multi-dimensional coordinate
    pub fn element_of(&self, coord: &[u64]) -> u64 {
        coord
            .iter()
            .zip(self.strides())
            .map(|(c, s)| c * s)
            .sum()
    }
}

/// A bound argument block: the words the generated executable reads
///
/// Written by `bind`, read-only for the duration of a launch, reused across
/// launches of the same version where sizes are stable.
#[derive(Debug, Clone)]
pub struct ArgBlock {
    words: Vec<u64>,
}

impl ArgBlock {
    pub fn for_layout(layout: &ArgLayout) -> Self {
        Self {
            words: vec![0; layout.word_count()],
        }
    }

    pub fn words(&self) -> &[u64] {
        &self.words
    }

    pub fn set_word(&mut self, word: usize, value: u64) {
        self.words[word] = value;
    }

    pub fn set_bounds(&mut self, layout: &ArgLayout, dim: usize, bounds: Bounds) {
        let w = layout.bounds_word(dim);
        self.words[w] = bounds.lo;
        self.words[w + 1] = bounds.hi;
    }

    /// Write a distributed accessor record into a field slot
    pub fn set_field_accessor(&mut self, layout: &ArgLayout, slot: usize, base: u64, strides: &[u64], handle: u64) {
        debug_assert!(layout.uses_accessors());
        debug_assert_eq!(strides.len(), layout.n_dims());
        let w = layout.field_word(slot);
        self.words[w] = base;
        self.words[w + 1..w + 1 + strides.len()].copy_from_slice(strides);
        self.words[w + 1 + strides.len()] = handle;
    }

    /// Base pointer handed to dylib kernels (fixed C ABI)
    pub fn base_ptr(&self) -> *const u64 {
        self.words.as_ptr()
    }

    pub fn view<'a>(&'a self, layout: &'a ArgLayout) -> ArgView<'a> {
        ArgView {
            layout,
            words: &self.words,
        }
    }
}

/// Typed base pointer into one field's lanes
///
/// # Safety contract
///
/// Generated kernel bodies index lanes derived from in-bounds rows only,
/// and concurrent partitions write disjoint rows; both are guaranteed by
/// the code generator and the launch splitter, not checked here.
#[derive(Debug, Clone, Copy)]
pub struct LanePtr<T> {
    base: *mut T,
}

unsafe impl<T> Send for LanePtr<T> {}
unsafe impl<T> Sync for LanePtr<T> {}

impl<T: bytemuck::Pod> LanePtr<T> {
    pub fn get(&self, lane: u64) -> T {
        unsafe { *self.base.add(lane as usize) }
    }

    pub fn set(&self, lane: u64, value: T) {
        unsafe { *self.base.add(lane as usize) = value }
    }
}

/// Read-only view of a bound argument block
///
/// Cheap to copy into worker threads; all accessors resolve through the
/// sealed layout's word offsets.
#[derive(Debug, Clone, Copy)]
pub struct ArgView<'a> {
    layout: &'a ArgLayout,
    words: &'a [u64],
}

unsafe impl<'a> Send for ArgView<'a> {}
unsafe impl<'a> Sync for ArgView<'a> {}

impl<'a> ArgView<'a> {
    pub fn layout(&self) -> &ArgLayout {
        self.layout
    }

    /// Inclusive row bounds on axis `dim`
    pub fn bounds(&self, dim: usize) -> Bounds {
        let w = self.layout.bounds_word(dim);
        Bounds::new(self.words[w], self.words[w + 1])
    }

    /// Index-subset row ids, when the launch uses one
    pub fn index(&self) -> Option<&'a [u64]> {
        let w = self.layout.index_word()?;
        let ptr = self.words[w] as *const u64;
        let len = self.words[w + 1] as usize;
        if ptr.is_null() {
            return None;
        }
        Some(unsafe { std::slice::from_raw_parts(ptr, len) })
    }

    /// Boolmask-subset membership bytes, when the launch uses one
    pub fn mask(&self) -> Option<&'a [u8]> {
        let w = self.layout.mask_word()?;
        let ptr = self.words[w] as *const u8;
        let len = self.words[w + 1] as usize;
        if ptr.is_null() {
            return None;
        }
        Some(unsafe { std::slice::from_raw_parts(ptr, len) })
    }

    /// Typed lane pointer for field slot `slot`
    pub fn field<T: bytemuck::Pod>(&self, slot: usize) -> LanePtr<T> {
        let w = self.layout.field_word(slot);
        LanePtr {
            base: self.words[w] as *mut T,
        }
    }

    /// Distributed accessor record for field slot `slot`
    pub fn field_accessor(&self, slot: usize) -> FieldAccessor {
        debug_assert!(self.layout.uses_accessors());
        let w = self.layout.field_word(slot);
        let n = self.layout.n_dims();
        let mut strides = [0u64; MAX_DIMS];
        strides[..n].copy_from_slice(&self.words[w + 1..w + 1 + n]);
        FieldAccessor {
            base: self.words[w],
            strides,
            n_dims: n,
            handle: self.words[w + 1 + n],
        }
    }

    /// Typed pointer to global slot `slot`
    pub fn global<T: bytemuck::Pod>(&self, slot: usize) -> LanePtr<T> {
        let w = self.layout.global_word(slot);
        LanePtr {
            base: self.words[w] as *mut T,
        }
    }

    /// Atomic view of a `u64` global (insert cursors, delete counters)
    pub fn global_atomic_u64(&self, slot: usize) -> &'a AtomicU64 {
        let w = self.layout.global_word(slot);
        unsafe { AtomicU64::from_ptr(self.words[w] as *mut u64) }
    }

    /// Raw scratch array base for scratch slot `slot`
    pub fn scratch_ptr(&self, slot: usize) -> *mut u8 {
        let w = self.layout.scratch_word(slot);
        self.words[w] as *mut u8
    }
}
