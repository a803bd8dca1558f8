//! Typed columns
//!
//! A [`Field`] is one named, typed column on one relation. Its element count
//! always equals the owning relation's concrete size; every store operation
//! that changes the concrete size resizes every column in the same call.
//!
//! A field knows its own [`FieldRef`] the way a buffer knows its class: it
//! is an arena id, not a pointer, so the relation↔field cycle stays broken.

use tessera_types::{ElemType, FieldRef, Processor, Value};

use crate::error::{Error, Result};
use crate::storage::{FieldStorage, HostArray};

/// A single typed column
#[derive(Debug, Clone)]
pub struct Field {
    fref: FieldRef,
    name: String,
    storage: FieldStorage,
}

impl Field {
    pub(crate) fn new_host(fref: FieldRef, name: String, elem: ElemType, len: usize) -> Self {
        Self {
            fref,
            name,
            storage: FieldStorage::Host(HostArray::new(elem, len)),
        }
    }

    /// This field's arena reference
    pub fn fref(&self) -> FieldRef {
        self.fref
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn elem(&self) -> ElemType {
        self.storage.elem()
    }

    pub fn len(&self) -> usize {
        self.storage.len()
    }

    pub fn is_empty(&self) -> bool {
        self.storage.is_empty()
    }

    /// Processor holding the column bytes
    pub fn processor(&self) -> Processor {
        self.storage.processor()
    }

    pub fn storage(&self) -> &FieldStorage {
        &self.storage
    }

    pub fn storage_mut(&mut self) -> &mut FieldStorage {
        &mut self.storage
    }

    /// Replace the backing storage (residency moves, swaps)
    pub fn set_storage(&mut self, storage: FieldStorage) {
        self.storage = storage;
    }

    /// Host view; `None` when device- or region-resident
    pub fn host(&self) -> Option<&HostArray> {
        self.storage.host()
    }

    /// Mutable host view
    pub fn host_mut(&mut self) -> Option<&mut HostArray> {
        self.storage.host_mut()
    }

    /// Mutable host view, or a residency error
    pub fn require_host_mut(&mut self) -> Result<&mut HostArray> {
        let fref = self.fref;
        self.storage
            .host_mut()
            .ok_or(Error::NotHostResident { field: fref })
    }

    /// Host view, or a residency error
    pub fn require_host(&self) -> Result<&HostArray> {
        self.storage
            .host()
            .ok_or(Error::NotHostResident { field: self.fref })
    }

    /// Read one element
    pub fn get(&self, row: usize) -> Result<Value> {
        self.require_host()?.get(row)
    }

    /// Write one element, type-checked
    pub fn set(&mut self, row: usize, value: &Value) -> Result<()> {
        self.require_host_mut()?.set(row, value)
    }

    /// Fill every row with one value
    pub fn load_constant(&mut self, value: &Value) -> Result<()> {
        self.require_host_mut()?.fill(value)
    }

    /// Bulk load rows `0..values.len()`
    pub fn load_rows(&mut self, values: &[Value]) -> Result<()> {
        let fref = self.fref;
        let host = self.require_host_mut()?;
        if values.len() > host.len() {
            return Err(Error::RowCountMismatch {
                field: fref,
                expected: host.len(),
                actual: values.len(),
            });
        }
        for (row, v) in values.iter().enumerate() {
            host.set(row, v)?;
        }
        Ok(())
    }

    /// Dump rows `0..limit` as dynamic values
    pub fn dump_rows(&self, limit: usize) -> Result<Vec<Value>> {
        let host = self.require_host()?;
        (0..limit).map(|row| host.get(row)).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tessera_types::{FieldIdx, RelationId, ScalarKind};

    fn fref() -> FieldRef {
        FieldRef::new(RelationId::new(0), FieldIdx::new(0))
    }

    #[test]
    fn test_field_roundtrip() {
        let mut f = Field::new_host(fref(), "pos".into(), ElemType::vector(ScalarKind::F64, 3), 4);
        assert_eq!(f.name(), "pos");
        assert_eq!(f.len(), 4);
        assert_eq!(f.processor(), Processor::Cpu);

        let v = Value::Lanes(vec![Value::F64(2.0), Value::F64(0.0), Value::F64(0.0)]);
        f.set(1, &v).unwrap();
        assert_eq!(f.get(1).unwrap(), v);
    }

    #[test]
    fn test_load_dump_identity() {
        let mut f = Field::new_host(fref(), "t".into(), ElemType::F64, 3);
        let vals = vec![Value::F64(25.0), Value::F64(0.0), Value::F64(-1.5)];
        f.load_rows(&vals).unwrap();
        assert_eq!(f.dump_rows(3).unwrap(), vals);
    }

    #[test]
    fn test_load_constant() {
        let mut f = Field::new_host(fref(), "k".into(), ElemType::I32, 5);
        f.load_constant(&Value::I32(9)).unwrap();
        assert!(f.dump_rows(5).unwrap().iter().all(|v| *v == Value::I32(9)));
    }
}
