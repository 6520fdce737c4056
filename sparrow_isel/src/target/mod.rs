//! Target description surface.
//!
//! The engine is target-independent; everything machine-specific comes in
//! through two objects injected at construction:
//!
//! - [`TargetIsa`]: the read-only description — pointer width, legal types,
//!   the emission table mapping a [`GenericOp`] at a type to a machine
//!   opcode, and calling-convention classification.
//! - [`TargetHooks`](hooks::TargetHooks): the override points — per-hook a
//!   target may take over selection of one instruction, argument or call
//!   lowering, or a materialization, and every hook may decline.
//!
//! [`x64`] is the reference target exercising both.

pub mod call_conv;
pub mod hooks;
pub mod x64;

pub use call_conv::{ArgAssigner, ArgLoc, CallConvInfo};
pub use hooks::TargetHooks;

use sparrow_ir::inst::CallConv;
use sparrow_ir::ValType;

use crate::mach::{Opcode, RegClass};

/// Target-independent operation names, the row keys of the emission table.
///
/// One name covers every type it is defined at; the table resolves the
/// (name, type) pair to a concrete opcode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GenericOp {
    /// Integer add.
    Add,
    /// Integer subtract.
    Sub,
    /// Integer multiply.
    Mul,
    /// Signed divide.
    SDiv,
    /// Unsigned divide.
    UDiv,
    /// Signed remainder.
    SRem,
    /// Unsigned remainder.
    URem,
    /// Bitwise and.
    And,
    /// Bitwise or.
    Or,
    /// Bitwise xor.
    Xor,
    /// Shift left.
    Shl,
    /// Logical shift right.
    LShr,
    /// Arithmetic shift right.
    AShr,
    /// Float add.
    FAdd,
    /// Float subtract.
    FSub,
    /// Float multiply.
    FMul,
    /// Float divide.
    FDiv,
    /// Float negate.
    FNeg,
    /// Integer compare, setting flags or a predicate register.
    Cmp,
    /// Materialize an integer immediate.
    MovImm,
    /// Materialize a float immediate from raw bits.
    MovFpImm,
    /// Materialize the address of a global symbol.
    GlobalAddr,
    /// Memory read.
    Load,
    /// Memory write.
    Store,
    /// Unconditional jump.
    Jump,
    /// Abort execution.
    Trap,
    /// Zero-extending conversion.
    ZExt,
    /// Sign-extending conversion.
    SExt,
    /// Truncating conversion.
    Trunc,
    /// Float to signed integer.
    FpToSi,
    /// Float to unsigned integer.
    FpToUi,
    /// Signed integer to float.
    SiToFp,
    /// Unsigned integer to float.
    UiToFp,
    /// Narrow a float.
    FpTrunc,
    /// Widen a float.
    FpExt,
    /// Same-width bit reinterpretation.
    Bitcast,
}

/// The immediate form of a table entry.
#[derive(Debug, Clone, Copy)]
pub struct ImmForm {
    /// Opcode taking an immediate in place of the last register operand.
    pub opcode: Opcode,
    /// Width of the immediate field in bits (64 means any `i64` fits).
    pub bits: u8,
}

/// One emission-table entry: the register-form opcode, result and operand
/// register classes, and the immediate form when the target has one.
#[derive(Debug, Clone, Copy)]
pub struct OpcodeEntry {
    /// Register-form opcode.
    pub reg: Opcode,
    /// Result register class.
    pub class: RegClass,
    /// Register class operands are constrained to.
    pub op_class: RegClass,
    /// Immediate form, if the target has one for this entry.
    pub imm: Option<ImmForm>,
}

impl OpcodeEntry {
    /// An entry with no immediate form, results and operands in `class`.
    #[must_use]
    pub const fn reg_only(reg: Opcode, class: RegClass) -> Self {
        OpcodeEntry {
            reg,
            class,
            op_class: class,
            imm: None,
        }
    }

    /// Attach an immediate form.
    #[must_use]
    pub const fn with_imm(mut self, opcode: Opcode, bits: u8) -> Self {
        self.imm = Some(ImmForm { opcode, bits });
        self
    }
}

/// Check whether `imm` is representable as a sign-extended `bits`-bit field.
#[inline]
#[must_use]
pub fn imm_fits(imm: i64, bits: u8) -> bool {
    if bits >= 64 {
        return true;
    }
    let half = 1i64 << (bits - 1);
    (-half..half).contains(&imm)
}

/// The read-only machine description consumed by the engine.
pub trait TargetIsa {
    /// Target name, for logging.
    fn name(&self) -> &'static str;

    /// Pointer width in bits.
    fn ptr_bits(&self) -> u32;

    /// The integer type addresses are computed in.
    fn addr_type(&self) -> ValType {
        if self.ptr_bits() == 64 {
            ValType::I64
        } else {
            ValType::I32
        }
    }

    /// Check if values of `ty` are operated on directly.
    fn is_legal_type(&self, ty: ValType) -> bool;

    /// The wider type a small integer is promoted to, if any.
    fn promoted_type(&self, ty: ValType) -> Option<ValType>;

    /// The register class holding values of `ty`.
    fn reg_class(&self, ty: ValType) -> RegClass;

    /// Resolve a same-type operation at `ty`.
    fn lookup(&self, gop: GenericOp, ty: ValType) -> Option<OpcodeEntry>;

    /// Resolve a conversion from `from` to `to`.
    fn lookup_cast(&self, gop: GenericOp, from: ValType, to: ValType) -> Option<OpcodeEntry>;

    /// The argument/return assignment scheme of `conv`, if the fast path
    /// recognizes it.
    fn call_conv_info(&self, conv: CallConv) -> Option<&'static CallConvInfo>;

    /// Opcode of a direct call to a symbol.
    fn call_opcode(&self) -> Opcode;

    /// Opcode of a call through a register.
    fn call_indirect_opcode(&self) -> Opcode;

    /// Check if `symbol` is a library routine the general selector expands
    /// specially; recognized calls are declined by the fast path.
    fn is_library_call(&self, symbol: &str) -> bool {
        let _ = symbol;
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_imm_fits() {
        assert!(imm_fits(0, 8));
        assert!(imm_fits(127, 8));
        assert!(!imm_fits(128, 8));
        assert!(imm_fits(-128, 8));
        assert!(!imm_fits(-129, 8));
        assert!(imm_fits(i64::MAX, 64));
        assert!(imm_fits(i64::MIN, 64));
        assert!(imm_fits(i32::MAX.into(), 32));
        assert!(!imm_fits(i64::from(i32::MAX) + 1, 32));
    }

    #[test]
    fn test_entry_builders() {
        let entry = OpcodeEntry::reg_only(Opcode(40), RegClass::Int).with_imm(Opcode(41), 32);
        assert_eq!(entry.reg, Opcode(40));
        assert_eq!(entry.class, RegClass::Int);
        assert_eq!(entry.op_class, RegClass::Int);
        let form = entry.imm.unwrap();
        assert_eq!(form.opcode, Opcode(41));
        assert_eq!(form.bits, 32);
    }
}
