//! Dynamic values
//!
//! [`Value`] is the host-side representation of one field element or one
//! global: the control plane ships them in event payloads, `load_constant`
//! fills columns with them, and the reduction engine folds scratch slots
//! through them. Inner kernel loops never touch `Value` - generated bodies
//! work on typed lanes directly.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::elem::{ElemType, ScalarKind};
use crate::error::{Error, Result};

/// A dynamically-typed element value
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Value {
    Bool(bool),
    I32(i32),
    U64(u64),
    F32(f32),
    F64(f64),
    /// Vector or matrix payload, lanes in row-major order
    Lanes(Vec<Value>),
    /// Key payload, one `u64` row coordinate per key dimension
    Key(Vec<u64>),
}

impl Value {
    /// The scalar kind of a scalar value, if it is one
    pub fn scalar_kind(&self) -> Option<ScalarKind> {
        match self {
            Value::Bool(_) => Some(ScalarKind::Bool),
            Value::I32(_) => Some(ScalarKind::I32),
            Value::U64(_) => Some(ScalarKind::U64),
            Value::F32(_) => Some(ScalarKind::F32),
            Value::F64(_) => Some(ScalarKind::F64),
            _ => None,
        }
    }

    /// Check that this value is assignable to `ty` without widening
    ///
    /// There is no implicit coercion anywhere in the runtime: a mismatch is
    /// rejected here and surfaces at kernel compile or at the load call.
    pub fn type_check(&self, ty: ElemType) -> Result<()> {
        let ok = match (self, ty) {
            (v, ElemType::Scalar(k)) => v.scalar_kind() == Some(k),
            (Value::Lanes(lanes), ElemType::Vector { elem, len }) => {
                lanes.len() == len as usize && lanes.iter().all(|l| l.scalar_kind() == Some(elem))
            }
            (Value::Lanes(lanes), ElemType::Matrix { elem, rows, cols }) => {
                lanes.len() == rows as usize * cols as usize
                    && lanes.iter().all(|l| l.scalar_kind() == Some(elem))
            }
            (Value::Key(coords), ElemType::Key { dims, .. }) => coords.len() == dims as usize,
            _ => false,
        };
        if ok {
            Ok(())
        } else {
            Err(Error::ValueTypeMismatch {
                expected: ty.to_string(),
                actual: self.describe(),
            })
        }
    }

    fn describe(&self) -> String {
        match self {
            Value::Bool(_) => "bool".into(),
            Value::I32(_) => "i32".into(),
            Value::U64(_) => "u64".into(),
            Value::F32(_) => "f32".into(),
            Value::F64(_) => "f64".into(),
            Value::Lanes(l) => format!("lanes[{}]", l.len()),
            Value::Key(k) => format!("key[{}]", k.len()),
        }
    }

    /// Encode into `out`, little-endian, exactly `ty.size_bytes()` bytes
    pub fn encode(&self, ty: ElemType, out: &mut [u8]) -> Result<()> {
        self.type_check(ty)?;
        let need = ty.size_bytes();
        if out.len() < need {
            return Err(Error::EncodeOverflow {
                need,
                have: out.len(),
            });
        }
        let mut cursor = 0usize;
        self.encode_lanes(out, &mut cursor);
        Ok(())
    }

    fn encode_lanes(&self, out: &mut [u8], cursor: &mut usize) {
        match self {
            Value::Bool(b) => {
                out[*cursor] = u8::from(*b);
                *cursor += 1;
            }
            Value::I32(v) => {
                out[*cursor..*cursor + 4].copy_from_slice(&v.to_le_bytes());
                *cursor += 4;
            }
            Value::U64(v) => {
                out[*cursor..*cursor + 8].copy_from_slice(&v.to_le_bytes());
                *cursor += 8;
            }
            Value::F32(v) => {
                out[*cursor..*cursor + 4].copy_from_slice(&v.to_le_bytes());
                *cursor += 4;
            }
            Value::F64(v) => {
                out[*cursor..*cursor + 8].copy_from_slice(&v.to_le_bytes());
                *cursor += 8;
            }
            Value::Lanes(lanes) => {
                for lane in lanes {
                    lane.encode_lanes(out, cursor);
                }
            }
            Value::Key(coords) => {
                for c in coords {
                    out[*cursor..*cursor + 8].copy_from_slice(&c.to_le_bytes());
                    *cursor += 8;
                }
            }
        }
    }

    /// Decode one element of type `ty` from the front of `bytes`
    pub fn decode(ty: ElemType, bytes: &[u8]) -> Result<Value> {
        let need = ty.size_bytes();
        if bytes.len() < need {
            return Err(Error::EncodeOverflow {
                need,
                have: bytes.len(),
            });
        }
        Ok(match ty {
            ElemType::Scalar(k) => Self::decode_scalar(k, bytes),
            ElemType::Vector { elem, len } => {
                let step = elem.size_bytes();
                Value::Lanes(
                    (0..len as usize)
                        .map(|i| Self::decode_scalar(elem, &bytes[i * step..]))
                        .collect(),
                )
            }
            ElemType::Matrix { elem, rows, cols } => {
                let step = elem.size_bytes();
                Value::Lanes(
                    (0..rows as usize * cols as usize)
                        .map(|i| Self::decode_scalar(elem, &bytes[i * step..]))
                        .collect(),
                )
            }
            ElemType::Key { dims, .. } => Value::Key(
                (0..dims as usize)
                    .map(|i| u64::from_le_bytes(bytes[i * 8..i * 8 + 8].try_into().unwrap()))
                    .collect(),
            ),
        })
    }

    fn decode_scalar(kind: ScalarKind, bytes: &[u8]) -> Value {
        match kind {
            ScalarKind::Bool => Value::Bool(bytes[0] != 0),
            ScalarKind::I32 => Value::I32(i32::from_le_bytes(bytes[..4].try_into().unwrap())),
            ScalarKind::U64 => Value::U64(u64::from_le_bytes(bytes[..8].try_into().unwrap())),
            ScalarKind::F32 => Value::F32(f32::from_le_bytes(bytes[..4].try_into().unwrap())),
            ScalarKind::F64 => Value::F64(f64::from_le_bytes(bytes[..8].try_into().unwrap())),
        }
    }

    /// Numeric view as f64, for diagnostics and host-side folds
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::I32(v) => Some(*v as f64),
            Value::U64(v) => Some(*v as f64),
            Value::F32(v) => Some(*v as f64),
            Value::F64(v) => Some(*v),
            _ => None,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Bool(b) => write!(f, "{}", u8::from(*b)),
            Value::I32(v) => write!(f, "{v}"),
            Value::U64(v) => write!(f, "{v}"),
            Value::F32(v) => write!(f, "{v}"),
            Value::F64(v) => write!(f, "{v}"),
            Value::Lanes(lanes) => {
                for (i, lane) in lanes.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{lane}")?;
                }
                Ok(())
            }
            Value::Key(coords) => {
                for (i, c) in coords.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{c}")?;
                }
                Ok(())
            }
        }
    }
}
