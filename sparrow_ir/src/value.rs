//! Value handles and value definitions.
//!
//! Every SSA value in a function (argument, constant, global address, or
//! instruction result) is named by a [`ValueId`] and described by a
//! [`ValueDef`] stored on the function. Handles are plain indices; the
//! function owns all the data.

use std::fmt;
use std::sync::Arc;

use crate::inst::InstId;
use crate::types::ValType;

/// A handle to an SSA value within one function.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ValueId(u32);

impl ValueId {
    /// Create a value handle from a raw index.
    #[inline]
    #[must_use]
    pub const fn new(index: u32) -> Self {
        Self(index)
    }

    /// Get the raw index.
    #[inline]
    #[must_use]
    pub const fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Debug for ValueId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "%{}", self.0)
    }
}

impl fmt::Display for ValueId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "%{}", self.0)
    }
}

/// A compile-time constant.
#[derive(Clone, PartialEq, Eq, Hash, Debug)]
pub enum ConstVal {
    /// Integer constant, stored zero-extended in `bits`.
    Int {
        /// The integer type.
        ty: ValType,
        /// The value, zero-extended to 64 bits.
        bits: u64,
    },
    /// Floating-point constant, stored as its IEEE bit pattern.
    Float {
        /// The float type.
        ty: ValType,
        /// The raw bit pattern (f32 patterns occupy the low 32 bits).
        bits: u64,
    },
    /// The null pointer.
    NullPtr,
    /// An undefined value of the value's declared type.
    Undef,
}

impl ConstVal {
    /// The zero-extended integer payload, if this is an integer constant.
    #[inline]
    #[must_use]
    pub const fn as_int_bits(&self) -> Option<u64> {
        match self {
            ConstVal::Int { bits, .. } => Some(*bits),
            _ => None,
        }
    }

    /// The sign-extended integer payload, if this is an integer constant.
    #[must_use]
    pub fn as_int_sext(&self, ptr_bits: u32) -> Option<i64> {
        match self {
            ConstVal::Int { ty, bits } => {
                let width = ty.bit_width(ptr_bits);
                if width >= 64 {
                    return Some(*bits as i64);
                }
                let shift = 64 - width;
                Some(((*bits << shift) as i64) >> shift)
            }
            _ => None,
        }
    }

    /// The float payload as an `f64`, if this is a float constant.
    #[must_use]
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            ConstVal::Float { ty: ValType::F32, bits } => {
                Some(f64::from(f32::from_bits(*bits as u32)))
            }
            ConstVal::Float { bits, .. } => Some(f64::from_bits(*bits)),
            _ => None,
        }
    }

    /// Check for the all-zero-bits float (positive zero).
    #[inline]
    #[must_use]
    pub const fn is_float_zero(&self) -> bool {
        matches!(self, ConstVal::Float { bits: 0, .. })
    }
}

/// How a value comes into being.
#[derive(Clone, PartialEq, Eq, Debug)]
pub enum ValueDef {
    /// The `index`-th formal parameter of the function.
    Arg {
        /// Zero-based parameter index.
        index: u32,
    },
    /// A constant.
    Const(ConstVal),
    /// The result of an instruction.
    Inst(InstId),
    /// The address of a named global.
    Global {
        /// Link-time symbol name.
        name: Arc<str>,
    },
}

impl ValueDef {
    /// Check if this value is a constant.
    #[inline]
    #[must_use]
    pub const fn is_const(&self) -> bool {
        matches!(self, ValueDef::Const(_))
    }

    /// The defining instruction, if the value is an instruction result.
    #[inline]
    #[must_use]
    pub const fn as_inst(&self) -> Option<InstId> {
        match self {
            ValueDef::Inst(inst) => Some(*inst),
            _ => None,
        }
    }

    /// The constant payload, if the value is a constant.
    #[inline]
    #[must_use]
    pub const fn const_val(&self) -> Option<&ConstVal> {
        match self {
            ValueDef::Const(c) => Some(c),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_value_id_display() {
        assert_eq!(ValueId::new(7).to_string(), "%7");
        assert_eq!(format!("{:?}", ValueId::new(0)), "%0");
    }

    #[test]
    fn test_const_int_sext() {
        let minus_one = ConstVal::Int {
            ty: ValType::I8,
            bits: 0xFF,
        };
        assert_eq!(minus_one.as_int_sext(64), Some(-1));
        assert_eq!(minus_one.as_int_bits(), Some(0xFF));

        let positive = ConstVal::Int {
            ty: ValType::I32,
            bits: 42,
        };
        assert_eq!(positive.as_int_sext(64), Some(42));
    }

    #[test]
    fn test_const_float() {
        let zero = ConstVal::Float {
            ty: ValType::F64,
            bits: 0,
        };
        assert!(zero.is_float_zero());
        assert_eq!(zero.as_f64(), Some(0.0));

        let neg_zero = ConstVal::Float {
            ty: ValType::F64,
            bits: (-0.0f64).to_bits(),
        };
        assert!(!neg_zero.is_float_zero());

        let f32_pi = ConstVal::Float {
            ty: ValType::F32,
            bits: u64::from(std::f32::consts::PI.to_bits()),
        };
        let back = f32_pi.as_f64().unwrap();
        assert!((back - f64::from(std::f32::consts::PI)).abs() < 1e-9);
    }
}
