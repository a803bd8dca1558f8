//! Field backing storage
//!
//! A field's column is raw little-endian bytes: `concrete_size` elements of
//! the field's element type, laid out contiguously. Typed access goes
//! through `bytemuck` casts; booleans are stored as one byte per lane.
//!
//! Storage is host-resident by default. Device residency is a handle into
//! the execution crate's backend; the store never touches device memory
//! itself, it only records where the column lives.

use std::fmt;

use tessera_types::{ElemType, Processor, Value};

use crate::error::Result;

/// Handle to a device-resident column, allocated by the execution backend
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DeviceHandle(pub u64);

impl DeviceHandle {
    pub const fn new(id: u64) -> Self {
        DeviceHandle(id)
    }

    pub const fn id(self) -> u64 {
        self.0
    }
}

impl fmt::Display for DeviceHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "dev{}", self.0)
    }
}

/// Handle to an opaque region in distributed mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RegionHandle(pub u64);

impl RegionHandle {
    pub const fn new(id: u64) -> Self {
        RegionHandle(id)
    }

    pub const fn id(self) -> u64 {
        self.0
    }
}

impl fmt::Display for RegionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "region{}", self.0)
    }
}

/// Host-resident column: `len` elements of `elem`, contiguous bytes
#[derive(Debug, Clone)]
pub struct HostArray {
    elem: ElemType,
    len: usize,
    bytes: Vec<u8>,
}

impl HostArray {
    /// Allocate a zero-filled column
    pub fn new(elem: ElemType, len: usize) -> Self {
        Self {
            elem,
            len,
            bytes: vec![0; len * elem.size_bytes()],
        }
    }

    pub fn elem(&self) -> ElemType {
        self.elem
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Resize, preserving contents for indices below `min(old, new)`
    pub fn resize(&mut self, new_len: usize) {
        self.bytes.resize(new_len * self.elem.size_bytes(), 0);
        self.len = new_len;
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn as_bytes_mut(&mut self) -> &mut [u8] {
        &mut self.bytes
    }

    /// Base pointer for argument binding
    pub fn base_ptr(&mut self) -> *mut u8 {
        self.bytes.as_mut_ptr()
    }

    /// Bytes of one element
    pub fn elem_bytes(&self, row: usize) -> &[u8] {
        let sz = self.elem.size_bytes();
        &self.bytes[row * sz..(row + 1) * sz]
    }

    /// Mutable bytes of one element
    pub fn elem_bytes_mut(&mut self, row: usize) -> &mut [u8] {
        let sz = self.elem.size_bytes();
        &mut self.bytes[row * sz..(row + 1) * sz]
    }

    /// Decode one element
    pub fn get(&self, row: usize) -> Result<Value> {
        Ok(Value::decode(self.elem, self.elem_bytes(row))?)
    }

    /// Encode one element, type-checked
    pub fn set(&mut self, row: usize, value: &Value) -> Result<()> {
        let elem = self.elem;
        value.encode(elem, self.elem_bytes_mut(row))?;
        Ok(())
    }

    /// Fill every element with `value`
    pub fn fill(&mut self, value: &Value) -> Result<()> {
        let sz = self.elem.size_bytes();
        let mut first = vec![0u8; sz];
        value.encode(self.elem, &mut first)?;
        for row in 0..self.len {
            self.bytes[row * sz..(row + 1) * sz].copy_from_slice(&first);
        }
        Ok(())
    }

    /// Typed view over the lanes
    ///
    /// `T` must match the lane width exactly (`f64` lanes of a `vec3<f64>`
    /// column give `3 * len` values). Booleans view as `u8`.
    pub fn lanes<T: bytemuck::Pod>(&self) -> &[T] {
        bytemuck::cast_slice(&self.bytes)
    }

    /// Mutable typed view over the lanes
    pub fn lanes_mut<T: bytemuck::Pod>(&mut self) -> &mut [T] {
        bytemuck::cast_slice_mut(&mut self.bytes)
    }

    /// Copy row `src` over row `dst`
    pub fn copy_row(&mut self, src: usize, dst: usize) {
        let sz = self.elem.size_bytes();
        self.bytes.copy_within(src * sz..(src + 1) * sz, dst * sz);
    }
}

/// Where a field's column lives
#[derive(Debug, Clone)]
pub enum FieldStorage {
    /// Host memory
    Host(HostArray),
    /// Device memory managed by the execution backend
    Device {
        handle: DeviceHandle,
        elem: ElemType,
        len: usize,
    },
    /// Opaque region in distributed mode
    Region {
        handle: RegionHandle,
        elem: ElemType,
        len: usize,
    },
}

impl FieldStorage {
    /// Element type of the stored column
    pub fn elem(&self) -> ElemType {
        match self {
            FieldStorage::Host(a) => a.elem(),
            FieldStorage::Device { elem, .. } | FieldStorage::Region { elem, .. } => *elem,
        }
    }

    /// Element count (always the owner's concrete size)
    pub fn len(&self) -> usize {
        match self {
            FieldStorage::Host(a) => a.len(),
            FieldStorage::Device { len, .. } | FieldStorage::Region { len, .. } => *len,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Which processor owns the bytes
    pub fn processor(&self) -> Processor {
        match self {
            FieldStorage::Host(_) | FieldStorage::Region { .. } => Processor::Cpu,
            FieldStorage::Device { .. } => Processor::Gpu,
        }
    }

    /// Host view, if host-resident
    pub fn host(&self) -> Option<&HostArray> {
        match self {
            FieldStorage::Host(a) => Some(a),
            _ => None,
        }
    }

    /// Mutable host view, if host-resident
    pub fn host_mut(&mut self) -> Option<&mut HostArray> {
        match self {
            FieldStorage::Host(a) => Some(a),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tessera_types::ScalarKind;

    #[test]
    fn test_host_array_basics() {
        let a = HostArray::new(ElemType::F64, 8);
        assert_eq!(a.len(), 8);
        assert_eq!(a.as_bytes().len(), 64);
        assert_eq!(a.elem(), ElemType::F64);
    }

    #[test]
    fn test_get_set() {
        let mut a = HostArray::new(ElemType::vector(ScalarKind::F64, 3), 2);
        let v = Value::Lanes(vec![Value::F64(1.0), Value::F64(2.0), Value::F64(3.0)]);
        a.set(1, &v).unwrap();
        assert_eq!(a.get(1).unwrap(), v);
        assert_eq!(
            a.get(0).unwrap(),
            Value::Lanes(vec![Value::F64(0.0), Value::F64(0.0), Value::F64(0.0)])
        );
    }

    #[test]
    fn test_resize_preserves_prefix() {
        let mut a = HostArray::new(ElemType::I32, 4);
        a.set(3, &Value::I32(77)).unwrap();
        a.set(0, &Value::I32(-5)).unwrap();
        a.resize(2);
        assert_eq!(a.get(0).unwrap(), Value::I32(-5));
        a.resize(6);
        assert_eq!(a.get(0).unwrap(), Value::I32(-5));
        assert_eq!(a.get(5).unwrap(), Value::I32(0));
    }

    #[test]
    fn test_copy_row() {
        let mut a = HostArray::new(ElemType::U64, 3);
        a.set(2, &Value::U64(42)).unwrap();
        a.copy_row(2, 0);
        assert_eq!(a.get(0).unwrap(), Value::U64(42));
    }

    #[test]
    fn test_lanes_view() {
        let mut a = HostArray::new(ElemType::vector(ScalarKind::F32, 2), 2);
        a.lanes_mut::<f32>().copy_from_slice(&[1.0, 2.0, 3.0, 4.0]);
        assert_eq!(a.get(1).unwrap(), Value::Lanes(vec![Value::F32(3.0), Value::F32(4.0)]));
    }

    #[test]
    fn test_fill() {
        let mut a = HostArray::new(ElemType::BOOL, 4);
        a.fill(&Value::Bool(true)).unwrap();
        assert_eq!(a.lanes::<u8>(), &[1, 1, 1, 1]);
    }
}
