//! Reduction operators
//!
//! Every reduction in the runtime is a commutative-associative binary op
//! with an identity element. The engine relies on exactly those two
//! properties: identity initialization makes short blocks correct without
//! special-casing, and commutativity+associativity make the tree order and
//! the partition fold order irrelevant to the result.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::elem::ScalarKind;
use crate::error::{Error, Result};
use crate::value::Value;

/// A commutative-associative reduction operator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ReduceOp {
    Add,
    Mul,
    Min,
    Max,
    /// Boolean or
    Or,
    /// Boolean and
    And,
}

impl ReduceOp {
    /// Whether this op is defined for the scalar kind
    pub const fn supports(self, kind: ScalarKind) -> bool {
        match self {
            ReduceOp::Add | ReduceOp::Mul | ReduceOp::Min | ReduceOp::Max => kind.is_numeric(),
            ReduceOp::Or | ReduceOp::And => matches!(kind, ScalarKind::Bool),
        }
    }

    /// Identity element `e` with `v ⊕ e == v`
    pub fn identity(self, kind: ScalarKind) -> Result<Value> {
        if !self.supports(kind) {
            return Err(Error::UnsupportedReduction {
                op: self.to_string(),
                kind: kind.to_string(),
            });
        }
        Ok(match (self, kind) {
            (ReduceOp::Add, ScalarKind::I32) => Value::I32(0),
            (ReduceOp::Add, ScalarKind::U64) => Value::U64(0),
            (ReduceOp::Add, ScalarKind::F32) => Value::F32(0.0),
            (ReduceOp::Add, ScalarKind::F64) => Value::F64(0.0),
            (ReduceOp::Mul, ScalarKind::I32) => Value::I32(1),
            (ReduceOp::Mul, ScalarKind::U64) => Value::U64(1),
            (ReduceOp::Mul, ScalarKind::F32) => Value::F32(1.0),
            (ReduceOp::Mul, ScalarKind::F64) => Value::F64(1.0),
            (ReduceOp::Min, ScalarKind::I32) => Value::I32(i32::MAX),
            (ReduceOp::Min, ScalarKind::U64) => Value::U64(u64::MAX),
            (ReduceOp::Min, ScalarKind::F32) => Value::F32(f32::INFINITY),
            (ReduceOp::Min, ScalarKind::F64) => Value::F64(f64::INFINITY),
            (ReduceOp::Max, ScalarKind::I32) => Value::I32(i32::MIN),
            (ReduceOp::Max, ScalarKind::U64) => Value::U64(0),
            (ReduceOp::Max, ScalarKind::F32) => Value::F32(f32::NEG_INFINITY),
            (ReduceOp::Max, ScalarKind::F64) => Value::F64(f64::NEG_INFINITY),
            (ReduceOp::Or, ScalarKind::Bool) => Value::Bool(false),
            (ReduceOp::And, ScalarKind::Bool) => Value::Bool(true),
            _ => unreachable!("supports() filtered this pair"),
        })
    }

    /// Fold two scalar values
    pub fn fold(self, a: &Value, b: &Value) -> Result<Value> {
        match (self, a, b) {
            (ReduceOp::Add, Value::I32(x), Value::I32(y)) => Ok(Value::I32(x.wrapping_add(*y))),
            (ReduceOp::Add, Value::U64(x), Value::U64(y)) => Ok(Value::U64(x.wrapping_add(*y))),
            (ReduceOp::Add, Value::F32(x), Value::F32(y)) => Ok(Value::F32(x + y)),
            (ReduceOp::Add, Value::F64(x), Value::F64(y)) => Ok(Value::F64(x + y)),
            (ReduceOp::Mul, Value::I32(x), Value::I32(y)) => Ok(Value::I32(x.wrapping_mul(*y))),
            (ReduceOp::Mul, Value::U64(x), Value::U64(y)) => Ok(Value::U64(x.wrapping_mul(*y))),
            (ReduceOp::Mul, Value::F32(x), Value::F32(y)) => Ok(Value::F32(x * y)),
            (ReduceOp::Mul, Value::F64(x), Value::F64(y)) => Ok(Value::F64(x * y)),
            (ReduceOp::Min, Value::I32(x), Value::I32(y)) => Ok(Value::I32(*x.min(y))),
            (ReduceOp::Min, Value::U64(x), Value::U64(y)) => Ok(Value::U64(*x.min(y))),
            (ReduceOp::Min, Value::F32(x), Value::F32(y)) => Ok(Value::F32(x.min(*y))),
            (ReduceOp::Min, Value::F64(x), Value::F64(y)) => Ok(Value::F64(x.min(*y))),
            (ReduceOp::Max, Value::I32(x), Value::I32(y)) => Ok(Value::I32(*x.max(y))),
            (ReduceOp::Max, Value::U64(x), Value::U64(y)) => Ok(Value::U64(*x.max(y))),
            (ReduceOp::Max, Value::F32(x), Value::F32(y)) => Ok(Value::F32(x.max(*y))),
            (ReduceOp::Max, Value::F64(x), Value::F64(y)) => Ok(Value::F64(x.max(*y))),
            (ReduceOp::Or, Value::Bool(x), Value::Bool(y)) => Ok(Value::Bool(*x || *y)),
            (ReduceOp::And, Value::Bool(x), Value::Bool(y)) => Ok(Value::Bool(*x && *y)),
            _ => Err(Error::UnsupportedReduction {
                op: self.to_string(),
                kind: format!("{a} ⊕ {b}"),
            }),
        }
    }

    /// Fold raw little-endian scalar bytes in place: `dst ← dst ⊕ src`
    ///
    /// Used on scratch slots and partition accumulators, where both sides
    /// are known to hold `kind`-typed lanes.
    pub fn fold_bytes(self, kind: ScalarKind, dst: &mut [u8], src: &[u8]) -> Result<()> {
        let a = Value::decode(crate::elem::ElemType::Scalar(kind), dst)?;
        let b = Value::decode(crate::elem::ElemType::Scalar(kind), src)?;
        let folded = self.fold(&a, &b)?;
        folded.encode(crate::elem::ElemType::Scalar(kind), dst)?;
        Ok(())
    }
}

impl fmt::Display for ReduceOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ReduceOp::Add => "+",
            ReduceOp::Mul => "*",
            ReduceOp::Min => "min",
            ReduceOp::Max => "max",
            ReduceOp::Or => "or",
            ReduceOp::And => "and",
        };
        write!(f, "{s}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identity_is_neutral() {
        for op in [ReduceOp::Add, ReduceOp::Mul, ReduceOp::Min, ReduceOp::Max] {
            let e = op.identity(ScalarKind::F64).unwrap();
            let v = Value::F64(7.5);
            assert_eq!(op.fold(&v, &e).unwrap(), v, "{op} identity not neutral");
        }
        let e = ReduceOp::Or.identity(ScalarKind::Bool).unwrap();
        assert_eq!(ReduceOp::Or.fold(&Value::Bool(true), &e).unwrap(), Value::Bool(true));
    }

    #[test]
    fn test_bool_ops_reject_numeric() {
        assert!(ReduceOp::Or.identity(ScalarKind::F64).is_err());
        assert!(ReduceOp::Add.identity(ScalarKind::Bool).is_err());
    }

    #[test]
    fn test_fold_min_ints() {
        assert_eq!(
            ReduceOp::Min.fold(&Value::I32(-4), &Value::I32(3)).unwrap(),
            Value::I32(-4)
        );
    }

    #[test]
    fn test_fold_bytes() {
        let mut dst = 10.0f64.to_le_bytes().to_vec();
        let src = 2.5f64.to_le_bytes();
        ReduceOp::Add.fold_bytes(ScalarKind::F64, &mut dst, &src).unwrap();
        assert_eq!(f64::from_le_bytes(dst.try_into().unwrap()), 12.5);
    }
}
