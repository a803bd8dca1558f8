//! Process-wide globals
//!
//! A global is one typed scalar outside any relation, accessed through
//! explicit `get`/`set`. During a kernel that reduces into it, the global
//! carries the reduction op; the execution crate folds the kernel's partial
//! results into the stored value through that op and clears it afterwards.

use tessera_types::{ElemType, ReduceOp, Value};

use crate::error::Result;

/// A typed process-wide scalar
#[derive(Debug, Clone)]
pub struct Global {
    name: String,
    elem: ElemType,
    bytes: Vec<u8>,
    reduce: Option<ReduceOp>,
}

impl Global {
    pub(crate) fn new(name: String, elem: ElemType, init: &Value) -> Result<Self> {
        let mut bytes = vec![0u8; elem.size_bytes()];
        init.encode(elem, &mut bytes)?;
        Ok(Self {
            name,
            elem,
            bytes,
            reduce: None,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn elem(&self) -> ElemType {
        self.elem
    }

    /// Current value
    pub fn get(&self) -> Result<Value> {
        Ok(Value::decode(self.elem, &self.bytes)?)
    }

    /// Replace the value, type-checked
    pub fn set(&mut self, value: &Value) -> Result<()> {
        value.encode(self.elem, &mut self.bytes)?;
        Ok(())
    }

    /// Raw bytes for argument binding
    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn bytes_mut(&mut self) -> &mut [u8] {
        &mut self.bytes
    }

    /// Base pointer for argument binding
    pub fn base_ptr(&mut self) -> *mut u8 {
        self.bytes.as_mut_ptr()
    }

    /// Reduction op bound for the current kernel, if any
    pub fn reduce_op(&self) -> Option<ReduceOp> {
        self.reduce
    }

    /// Bind a reduction op for the duration of one kernel
    pub fn bind_reduce(&mut self, op: ReduceOp) {
        self.reduce = Some(op);
    }

    /// Clear the reduction binding after post-processing
    pub fn clear_reduce(&mut self) {
        self.reduce = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_global_get_set() {
        let mut g = Global::new("com".into(), ElemType::F64, &Value::F64(0.0)).unwrap();
        assert_eq!(g.get().unwrap(), Value::F64(0.0));
        g.set(&Value::F64(1.5)).unwrap();
        assert_eq!(g.get().unwrap(), Value::F64(1.5));
    }

    #[test]
    fn test_global_rejects_mismatch() {
        let mut g = Global::new("n".into(), ElemType::U64, &Value::U64(0)).unwrap();
        assert!(g.set(&Value::I32(1)).is_err());
    }

    #[test]
    fn test_reduce_binding() {
        let mut g = Global::new("acc".into(), ElemType::F64, &Value::F64(0.0)).unwrap();
        assert!(g.reduce_op().is_none());
        g.bind_reduce(ReduceOp::Add);
        assert_eq!(g.reduce_op(), Some(ReduceOp::Add));
        g.clear_reduce();
        assert!(g.reduce_op().is_none());
    }
}
