//! Instructions: the operation palette of the IR.
//!
//! Instructions are stored on the [`Function`](crate::func::Function) and
//! referenced by [`InstId`]. Each instruction that produces a value also
//! owns a [`ValueId`](crate::value::ValueId) naming its result.

use std::fmt;

use smallvec::SmallVec;

use crate::func::BlockId;
use crate::span::Span;
use crate::types::Type;
use crate::value::ValueId;

/// A handle to an instruction within one function.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct InstId(u32);

impl InstId {
    /// Create an instruction handle from a raw index.
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

impl fmt::Debug for InstId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "inst{}", self.0)
    }
}

/// Calling convention identifier carried on call sites and signatures.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug, Default)]
pub enum CallConv {
    /// The platform C convention.
    #[default]
    C,
    /// Internal fast convention.
    Fast,
    /// Convention for rarely executed calls.
    Cold,
}

impl fmt::Display for CallConv {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            CallConv::C => "c",
            CallConv::Fast => "fast",
            CallConv::Cold => "cold",
        };
        f.write_str(name)
    }
}

/// ABI attribute bits for one argument or return value.
#[derive(Clone, Copy, PartialEq, Eq, Debug, Default)]
pub struct ArgAttrs {
    /// Sign-extend small integers to register width.
    pub sext: bool,
    /// Zero-extend small integers to register width.
    pub zext: bool,
    /// Pass in a register if at all possible.
    pub inreg: bool,
    /// Pointer to memory the callee fills with the struct return value.
    pub sret: bool,
    /// Pointer argument passed by copying the pointee onto the stack.
    pub byval: bool,
    /// Argument allocated in the caller's outgoing area.
    pub inalloca: bool,
    /// Static-chain pointer.
    pub nest: bool,
    /// Callee returns this argument unchanged.
    pub returned: bool,
    /// Required alignment in bytes, 0 when unspecified.
    pub align: u32,
}

impl ArgAttrs {
    /// Attributes with every bit clear.
    #[inline]
    #[must_use]
    pub const fn none() -> Self {
        Self {
            sext: false,
            zext: false,
            inreg: false,
            sret: false,
            byval: false,
            inalloca: false,
            nest: false,
            returned: false,
            align: 0,
        }
    }

    /// Set the sign-extend bit.
    #[inline]
    #[must_use]
    pub const fn with_sext(mut self) -> Self {
        self.sext = true;
        self
    }

    /// Set the zero-extend bit.
    #[inline]
    #[must_use]
    pub const fn with_zext(mut self) -> Self {
        self.zext = true;
        self
    }

    /// Set the in-register bit.
    #[inline]
    #[must_use]
    pub const fn with_inreg(mut self) -> Self {
        self.inreg = true;
        self
    }

    /// Set the struct-return bit.
    #[inline]
    #[must_use]
    pub const fn with_sret(mut self) -> Self {
        self.sret = true;
        self
    }

    /// Set the by-value bit.
    #[inline]
    #[must_use]
    pub const fn with_byval(mut self) -> Self {
        self.byval = true;
        self
    }

    /// Check whether the argument uses a memory-shaped passing scheme the
    /// fast path refuses (byval, inalloca, or nest).
    #[inline]
    #[must_use]
    pub const fn is_memory_shaped(&self) -> bool {
        self.byval || self.inalloca || self.nest
    }
}

/// Integer and floating-point binary operators.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub enum BinOp {
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
    /// Float remainder.
    FRem,
}

impl BinOp {
    /// Check if operand order is interchangeable.
    #[inline]
    #[must_use]
    pub const fn is_commutative(self) -> bool {
        matches!(
            self,
            BinOp::Add
                | BinOp::Mul
                | BinOp::And
                | BinOp::Or
                | BinOp::Xor
                | BinOp::FAdd
                | BinOp::FMul
        )
    }

    /// Check if this is an integer operator.
    #[inline]
    #[must_use]
    pub const fn is_int(self) -> bool {
        !matches!(
            self,
            BinOp::FAdd | BinOp::FSub | BinOp::FMul | BinOp::FDiv | BinOp::FRem
        )
    }
}

/// Conversion operators.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub enum CastOp {
    /// Truncate an integer to a narrower width.
    Trunc,
    /// Zero-extend an integer.
    ZExt,
    /// Sign-extend an integer.
    SExt,
    /// Float to unsigned integer.
    FpToUi,
    /// Float to signed integer.
    FpToSi,
    /// Unsigned integer to float.
    UiToFp,
    /// Signed integer to float.
    SiToFp,
    /// Narrow a float.
    FpTrunc,
    /// Widen a float.
    FpExt,
    /// Pointer to integer.
    PtrToInt,
    /// Integer to pointer.
    IntToPtr,
    /// Reinterpret bits at the same width.
    Bitcast,
}

/// Integer comparison predicates.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub enum IntCmp {
    /// Equal.
    Eq,
    /// Not equal.
    Ne,
    /// Unsigned greater than.
    Ugt,
    /// Unsigned greater or equal.
    Uge,
    /// Unsigned less than.
    Ult,
    /// Unsigned less or equal.
    Ule,
    /// Signed greater than.
    Sgt,
    /// Signed greater or equal.
    Sge,
    /// Signed less than.
    Slt,
    /// Signed less or equal.
    Sle,
}

/// Floating-point comparison predicates (ordered forms).
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub enum FloatCmp {
    /// Ordered equal.
    Oeq,
    /// Ordered not equal.
    One,
    /// Ordered greater than.
    Ogt,
    /// Ordered greater or equal.
    Oge,
    /// Ordered less than.
    Olt,
    /// Ordered less or equal.
    Ole,
}

/// Recognized intrinsic functions.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub enum Intrinsic {
    /// Signed add with overflow flag.
    SAddOverflow,
    /// Unsigned add with overflow flag.
    UAddOverflow,
    /// Signed subtract with overflow flag.
    SSubOverflow,
    /// Unsigned subtract with overflow flag.
    USubOverflow,
    /// Signed multiply with overflow flag.
    SMulOverflow,
    /// Unsigned multiply with overflow flag.
    UMulOverflow,
    /// Start of an object lifetime, no code.
    LifetimeStart,
    /// End of an object lifetime, no code.
    LifetimeEnd,
    /// Optimizer hint, no code.
    Assume,
    /// Explicitly does nothing.
    DoNothing,
    /// Branch-probability hint; forwards its first operand.
    Expect,
    /// Abort execution.
    Trap,
    /// Copy `len` bytes from source to destination.
    MemCpy,
    /// Record live values at a patchable point.
    StackMap,
    /// Patchable call site with live-value record.
    PatchPoint,
}

impl Intrinsic {
    /// The runtime symbol name of the intrinsic.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Intrinsic::SAddOverflow => "sadd.overflow",
            Intrinsic::UAddOverflow => "uadd.overflow",
            Intrinsic::SSubOverflow => "ssub.overflow",
            Intrinsic::USubOverflow => "usub.overflow",
            Intrinsic::SMulOverflow => "smul.overflow",
            Intrinsic::UMulOverflow => "umul.overflow",
            Intrinsic::LifetimeStart => "lifetime.start",
            Intrinsic::LifetimeEnd => "lifetime.end",
            Intrinsic::Assume => "assume",
            Intrinsic::DoNothing => "donothing",
            Intrinsic::Expect => "expect",
            Intrinsic::Trap => "trap",
            Intrinsic::MemCpy => "memcpy",
            Intrinsic::StackMap => "stackmap",
            Intrinsic::PatchPoint => "patchpoint",
        }
    }

    /// Check if this is one of the overflow-checking arithmetic intrinsics.
    #[inline]
    #[must_use]
    pub const fn is_overflow_arith(self) -> bool {
        matches!(
            self,
            Intrinsic::SAddOverflow
                | Intrinsic::UAddOverflow
                | Intrinsic::SSubOverflow
                | Intrinsic::USubOverflow
                | Intrinsic::SMulOverflow
                | Intrinsic::UMulOverflow
        )
    }
}

/// One instruction's operation and operands.
#[derive(Clone, PartialEq, Debug)]
pub enum InstKind {
    /// Two-operand arithmetic or logic.
    Binary {
        /// The operator.
        op: BinOp,
        /// Left operand.
        lhs: ValueId,
        /// Right operand.
        rhs: ValueId,
        /// Division is known exact (no remainder).
        exact: bool,
    },
    /// Floating-point negation.
    FNeg {
        /// The operand.
        arg: ValueId,
    },
    /// Type conversion.
    Cast {
        /// The conversion operator.
        op: CastOp,
        /// The operand.
        arg: ValueId,
    },
    /// Address computation: base pointer plus scaled indices.
    ///
    /// The first index steps over whole `pointee` units; later indices step
    /// into struct fields (constant only) or array elements.
    Gep {
        /// Base pointer.
        base: ValueId,
        /// The type the base points at.
        pointee: Type,
        /// Index path.
        indices: Vec<ValueId>,
    },
    /// Memory read.
    Load {
        /// Address.
        ptr: ValueId,
        /// Volatile accesses cannot be folded or reordered.
        volatile: bool,
        /// Access alignment in bytes.
        align: u32,
    },
    /// Memory write.
    Store {
        /// Value to store.
        value: ValueId,
        /// Address.
        ptr: ValueId,
        /// Volatile accesses cannot be folded or reordered.
        volatile: bool,
        /// Access alignment in bytes.
        align: u32,
    },
    /// Stack allocation. Static when `dynamic_count` is None.
    Alloca {
        /// Allocated type.
        ty: Type,
        /// Runtime element count for dynamic allocations.
        dynamic_count: Option<ValueId>,
        /// Requested alignment in bytes.
        align: u32,
    },
    /// Integer comparison producing an `i1`.
    ICmp {
        /// The predicate.
        pred: IntCmp,
        /// Left operand.
        lhs: ValueId,
        /// Right operand.
        rhs: ValueId,
    },
    /// Float comparison producing an `i1`.
    FCmp {
        /// The predicate.
        pred: FloatCmp,
        /// Left operand.
        lhs: ValueId,
        /// Right operand.
        rhs: ValueId,
    },
    /// Ordinary call through a value (function address or global).
    Call {
        /// Callee value.
        callee: ValueId,
        /// Arguments in order.
        args: Vec<ValueId>,
        /// Calling convention of the call site.
        conv: CallConv,
        /// Attributes on the return value.
        ret_attrs: ArgAttrs,
        /// Per-argument attributes, parallel to `args`.
        arg_attrs: Vec<ArgAttrs>,
        /// The callee never returns.
        no_return: bool,
        /// The call is in tail position.
        tail: bool,
    },
    /// Call of a recognized intrinsic.
    IntrinsicCall {
        /// Which intrinsic.
        intrinsic: Intrinsic,
        /// Arguments in order.
        args: Vec<ValueId>,
    },
    /// Read one element out of an aggregate value.
    ExtractValue {
        /// The aggregate.
        agg: ValueId,
        /// Nested element path.
        indices: Vec<u32>,
    },
    /// Produce a copy of an aggregate with one element replaced.
    InsertValue {
        /// The aggregate.
        agg: ValueId,
        /// The replacement element.
        elem: ValueId,
        /// Nested element path.
        indices: Vec<u32>,
    },
    /// SSA merge point; must appear at the head of its block.
    Phi {
        /// (predecessor, incoming value) pairs.
        incoming: Vec<(BlockId, ValueId)>,
    },
    /// Unconditional branch.
    Br {
        /// Destination block.
        dest: BlockId,
    },
    /// Two-way conditional branch.
    CondBr {
        /// Branch condition (`i1`).
        cond: ValueId,
        /// Taken when the condition is true.
        then_dest: BlockId,
        /// Taken when the condition is false.
        else_dest: BlockId,
    },
    /// Return from the function.
    Ret {
        /// Returned value, absent for `void`.
        value: Option<ValueId>,
    },
    /// Control never reaches this point.
    Unreachable,
}

impl InstKind {
    /// Check if this instruction ends its block.
    #[inline]
    #[must_use]
    pub const fn is_terminator(&self) -> bool {
        matches!(
            self,
            InstKind::Br { .. }
                | InstKind::CondBr { .. }
                | InstKind::Ret { .. }
                | InstKind::Unreachable
        )
    }

    /// Successor blocks of a terminator, in branch order.
    #[must_use]
    pub fn successors(&self) -> SmallVec<[BlockId; 2]> {
        match self {
            InstKind::Br { dest } => SmallVec::from_slice(&[*dest]),
            InstKind::CondBr {
                then_dest,
                else_dest,
                ..
            } => SmallVec::from_slice(&[*then_dest, *else_dest]),
            _ => SmallVec::new(),
        }
    }

    /// Visit every value operand.
    pub fn for_each_use(&self, mut f: impl FnMut(ValueId)) {
        match self {
            InstKind::Binary { lhs, rhs, .. }
            | InstKind::ICmp { lhs, rhs, .. }
            | InstKind::FCmp { lhs, rhs, .. } => {
                f(*lhs);
                f(*rhs);
            }
            InstKind::FNeg { arg } | InstKind::Cast { arg, .. } => f(*arg),
            InstKind::Gep { base, indices, .. } => {
                f(*base);
                for idx in indices {
                    f(*idx);
                }
            }
            InstKind::Load { ptr, .. } => f(*ptr),
            InstKind::Store { value, ptr, .. } => {
                f(*value);
                f(*ptr);
            }
            InstKind::Alloca { dynamic_count, .. } => {
                if let Some(count) = dynamic_count {
                    f(*count);
                }
            }
            InstKind::Call { callee, args, .. } => {
                f(*callee);
                for arg in args {
                    f(*arg);
                }
            }
            InstKind::IntrinsicCall { args, .. } => {
                for arg in args {
                    f(*arg);
                }
            }
            InstKind::ExtractValue { agg, .. } => f(*agg),
            InstKind::InsertValue { agg, elem, .. } => {
                f(*agg);
                f(*elem);
            }
            InstKind::Phi { incoming } => {
                for (_, value) in incoming {
                    f(*value);
                }
            }
            InstKind::CondBr { cond, .. } => f(*cond),
            InstKind::Ret { value } => {
                if let Some(value) = value {
                    f(*value);
                }
            }
            InstKind::Br { .. } | InstKind::Unreachable => {}
        }
    }
}

/// An instruction plus its result type, owning block, and source span.
#[derive(Clone, Debug)]
pub struct InstData {
    /// The operation.
    pub kind: InstKind,
    /// Result type (`Type::Void` when no value is produced).
    pub ty: Type,
    /// The block this instruction belongs to.
    pub block: BlockId,
    /// Originating source range, dummy for synthesized instructions.
    pub span: Span,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_binop_commutative() {
        assert!(BinOp::Add.is_commutative());
        assert!(BinOp::Mul.is_commutative());
        assert!(BinOp::Xor.is_commutative());
        assert!(BinOp::FAdd.is_commutative());
        assert!(!BinOp::Sub.is_commutative());
        assert!(!BinOp::Shl.is_commutative());
        assert!(!BinOp::SDiv.is_commutative());
    }

    #[test]
    fn test_terminators() {
        assert!(InstKind::Unreachable.is_terminator());
        assert!(InstKind::Ret { value: None }.is_terminator());
        assert!(!InstKind::FNeg {
            arg: ValueId::new(0)
        }
        .is_terminator());
    }

    #[test]
    fn test_successors() {
        let br = InstKind::Br {
            dest: BlockId::new(3),
        };
        assert_eq!(br.successors().as_slice(), &[BlockId::new(3)]);

        let cond = InstKind::CondBr {
            cond: ValueId::new(0),
            then_dest: BlockId::new(1),
            else_dest: BlockId::new(2),
        };
        assert_eq!(
            cond.successors().as_slice(),
            &[BlockId::new(1), BlockId::new(2)]
        );

        assert!(InstKind::Ret { value: None }.successors().is_empty());
    }

    #[test]
    fn test_for_each_use() {
        let kind = InstKind::Store {
            value: ValueId::new(4),
            ptr: ValueId::new(9),
            volatile: false,
            align: 8,
        };
        let mut seen = Vec::new();
        kind.for_each_use(|v| seen.push(v));
        assert_eq!(seen, vec![ValueId::new(4), ValueId::new(9)]);
    }

    #[test]
    fn test_arg_attrs() {
        let attrs = ArgAttrs::none().with_sext().with_inreg();
        assert!(attrs.sext && attrs.inreg);
        assert!(!attrs.zext);
        assert!(!attrs.is_memory_shaped());
        assert!(ArgAttrs::none().with_byval().is_memory_shaped());
    }
}
