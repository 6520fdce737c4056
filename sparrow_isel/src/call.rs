//! Call lowering.
//!
//! A [`CallDescriptor`] collects everything about one call site before any
//! emission: callee, convention, arguments with their ABI flags, and the
//! return shape. [`FastSelector::lower_call_to`] drives the protocol:
//! flush the local cache, verify the convention is recognized (an unknown
//! convention fails before emitting anything), decline recognized library
//! routines, offer the call to the target hook, then run the generic
//! marshalling sequence with full rollback on any mid-sequence failure.
//!
//! The patchable call-site forms (stackmap, patchpoint) bypass generic
//! argument lowering and serialize their live operands into the emitted
//! instruction instead.

use smallvec::SmallVec;
use sparrow_ir::inst::{ArgAttrs, CallConv, InstKind, Intrinsic};
use sparrow_ir::{ConstVal, Function, InstId, Type, ValType, ValueDef, ValueId};
use std::sync::Arc;

use crate::mach::{MachInst, MachOperand, MachReg, MemInfo, Opcode, PReg, RegClass, VReg};
use crate::select::FastSelector;
use crate::target::call_conv::{ArgAssigner, ArgLoc, CallConvInfo};
use crate::target::GenericOp;

/// Marker preceding a serialized constant in a live-operand bundle,
/// distinguishing it from small immediates that encode registers.
const CONSTANT_OP_MARKER: i64 = 4096;

/// Overflow intrinsics whose operands may be reordered freely.
#[inline]
#[must_use]
pub fn is_commutative_intrinsic(intrinsic: Intrinsic) -> bool {
    matches!(
        intrinsic,
        Intrinsic::SAddOverflow
            | Intrinsic::UAddOverflow
            | Intrinsic::SMulOverflow
            | Intrinsic::UMulOverflow
    )
}

// =============================================================================
// Call Descriptor
// =============================================================================

/// What a call targets.
#[derive(Debug, Clone)]
pub enum CalleeKind {
    /// An IR value: a global (direct call) or a computed pointer
    /// (indirect call).
    Value(ValueId),
    /// A raw runtime symbol, for intrinsics lowered to helper calls.
    Symbol(Arc<str>),
}

/// One outgoing argument.
#[derive(Debug, Clone, Copy)]
pub struct ArgEntry {
    /// The argument value.
    pub value: ValueId,
    /// Its ABI flags.
    pub attrs: ArgAttrs,
}

impl ArgEntry {
    /// An argument with no flags.
    #[must_use]
    pub fn plain(value: ValueId) -> Self {
        ArgEntry {
            value,
            attrs: ArgAttrs::none(),
        }
    }
}

/// Everything known about one call before lowering starts.
#[derive(Debug, Clone)]
pub struct CallDescriptor {
    /// Calling convention.
    pub conv: CallConv,
    /// Declared return type.
    pub ret_ty: Type,
    /// Return-value ABI flags.
    pub ret_attrs: ArgAttrs,
    /// Call target.
    pub callee: CalleeKind,
    /// Arguments in declaration order.
    pub args: Vec<ArgEntry>,
    /// The callee is variadic.
    pub var_arg: bool,
    /// The call never returns.
    pub no_return: bool,
    /// The call is in tail position.
    pub is_tail: bool,
    /// The IR value holding the call's result, if the call produces one.
    pub result: Option<ValueId>,
    /// Whether anything consumes the result.
    pub is_result_used: bool,
    /// Explicit fixed-argument count; when absent, every argument in
    /// `args` counts as fixed.
    num_fixed_args: Option<usize>,
}

impl CallDescriptor {
    /// Describe an IR call site, deriving every flag from its attributes.
    #[must_use]
    pub fn from_call_site(func: &Function, inst: InstId) -> Option<Self> {
        let InstKind::Call {
            callee,
            args,
            conv,
            ret_attrs,
            arg_attrs,
            no_return,
            tail,
        } = func.inst(inst).kind.clone()
        else {
            return None;
        };
        let result = func.inst_result(inst);
        let entries = args
            .iter()
            .enumerate()
            .map(|(i, &value)| ArgEntry {
                value,
                attrs: arg_attrs.get(i).copied().unwrap_or_else(ArgAttrs::none),
            })
            .collect();
        Some(CallDescriptor {
            conv,
            ret_ty: func.inst(inst).ty.clone(),
            ret_attrs,
            callee: CalleeKind::Value(callee),
            args: entries,
            var_arg: false,
            no_return,
            is_tail: tail,
            result,
            is_result_used: result.is_some_and_used(func),
            num_fixed_args: None,
        })
    }

    /// Describe a helper call to `symbol` with plain arguments. The
    /// fixed-argument count defaults to the whole list; see
    /// [`with_num_fixed_args`](Self::with_num_fixed_args).
    #[must_use]
    pub fn for_symbol(
        conv: CallConv,
        ret_ty: Type,
        symbol: impl Into<Arc<str>>,
        args: Vec<ValueId>,
    ) -> Self {
        CallDescriptor {
            conv,
            ret_ty,
            ret_attrs: ArgAttrs::none(),
            callee: CalleeKind::Symbol(symbol.into()),
            args: args.into_iter().map(ArgEntry::plain).collect(),
            var_arg: false,
            no_return: false,
            is_tail: false,
            result: None,
            is_result_used: false,
            num_fixed_args: None,
        }
    }

    /// A minimal synthetic call: convention, callee, and arguments with no
    /// attribute derivation.
    #[must_use]
    pub fn synthetic(conv: CallConv, callee: CalleeKind, args: Vec<ValueId>) -> Self {
        CallDescriptor {
            conv,
            ret_ty: Type::Void,
            ret_attrs: ArgAttrs::none(),
            callee,
            args: args.into_iter().map(ArgEntry::plain).collect(),
            var_arg: false,
            no_return: false,
            is_tail: false,
            result: None,
            is_result_used: false,
            num_fixed_args: None,
        }
    }

    /// Set the fixed-argument count explicitly. Correct whether called
    /// before or after the argument list is populated.
    #[must_use]
    pub fn with_num_fixed_args(mut self, count: usize) -> Self {
        self.num_fixed_args = Some(count);
        self
    }

    /// Mark the callee variadic.
    #[must_use]
    pub fn with_var_arg(mut self, var_arg: bool) -> Self {
        self.var_arg = var_arg;
        self
    }

    /// Append an argument.
    pub fn add_arg(&mut self, value: ValueId, attrs: ArgAttrs) {
        self.args.push(ArgEntry { value, attrs });
    }

    /// The fixed-argument count: the explicit value if one was supplied,
    /// otherwise the current argument-list length.
    #[inline]
    #[must_use]
    pub fn num_fixed_args(&self) -> usize {
        self.num_fixed_args.unwrap_or(self.args.len())
    }

    /// The callee's symbol name, when the call is direct.
    #[must_use]
    pub fn callee_symbol(&self, func: &Function) -> Option<Arc<str>> {
        match &self.callee {
            CalleeKind::Symbol(s) => Some(s.clone()),
            CalleeKind::Value(v) => match func.value_def(*v) {
                ValueDef::Global { name } => Some(name.clone()),
                _ => None,
            },
        }
    }
}

/// Result-use test that reads as a method on `Option<ValueId>`.
trait ResultUsed {
    fn is_some_and_used(self, func: &Function) -> bool;
}

impl ResultUsed for Option<ValueId> {
    fn is_some_and_used(self, func: &Function) -> bool {
        self.map_or(false, |v| func.use_count(v) > 0)
    }
}

// =============================================================================
// Lowering
// =============================================================================

impl<'a> FastSelector<'a> {
    /// The two operands of an overflow intrinsic, with a constant left
    /// operand swapped to the right when the operation commutes.
    pub fn overflow_operands(&self, inst: InstId) -> Option<(ValueId, ValueId)> {
        let InstKind::IntrinsicCall { intrinsic, args } = &self.func.inst(inst).kind else {
            return None;
        };
        if args.len() != 2 {
            return None;
        }
        let (mut lhs, mut rhs) = (args[0], args[1]);
        if self.func.value_def(lhs).is_const()
            && !self.func.value_def(rhs).is_const()
            && is_commutative_intrinsic(*intrinsic)
        {
            std::mem::swap(&mut lhs, &mut rhs);
        }
        Some((lhs, rhs))
    }

    /// Lower one call. True when the call is fully emitted; false leaves
    /// no trace of the attempt.
    pub fn lower_call_to(&mut self, desc: &CallDescriptor) -> bool {
        self.flush_local_value_map();

        let Some(info) = self.isa.call_conv_info(desc.conv) else {
            tracing::trace!(conv = %desc.conv, "call declined: unrecognized convention");
            return false;
        };
        if let Some(symbol) = desc.callee_symbol(self.func) {
            // Recognized library routines get the general selector's
            // optimized expansion instead of a plain call.
            if self.isa.is_library_call(&symbol) {
                tracing::trace!(%symbol, "call declined: expanded library routine");
                return false;
            }
        }

        let hooks = self.hooks;
        if hooks.lower_call(self, desc) {
            return true;
        }

        let save = self.savepoint();
        if self.lower_call_generic(desc, info) {
            true
        } else {
            self.rollback_to(save);
            false
        }
    }

    fn lower_call_generic(&mut self, desc: &CallDescriptor, info: &'static CallConvInfo) -> bool {
        if desc.var_arg || desc.args.len() != desc.num_fixed_args() {
            return false;
        }
        if desc.ret_attrs.is_memory_shaped() {
            return false;
        }

        // Classify the return before anything is emitted.
        let mut ret_leaves = Vec::new();
        if !desc.ret_ty.is_void() {
            desc.ret_ty.collect_leaves(&mut ret_leaves);
        }
        let mut ret_classes: SmallVec<[RegClass; 2]> = SmallVec::new();
        let mut int_rets = 0;
        let mut float_rets = 0;
        for leaf in &ret_leaves {
            if !self.isa.is_legal_type(*leaf) && self.isa.promoted_type(*leaf).is_none() {
                return false;
            }
            let class = self.isa.reg_class(*leaf);
            let used = match class {
                RegClass::Int => {
                    int_rets += 1;
                    int_rets
                }
                RegClass::Float => {
                    float_rets += 1;
                    float_rets
                }
            };
            if used > info.num_ret_regs(class) {
                return false;
            }
            ret_classes.push(class);
        }

        let Some(reg_args) = self.marshal_arguments(&desc.args, info) else {
            return false;
        };

        // The call itself, carrying its clobber set.
        let callee_op = match &desc.callee {
            CalleeKind::Symbol(s) => MachOperand::Symbol(s.clone()),
            CalleeKind::Value(v) => match self.func.value_def(*v) {
                ValueDef::Global { name } => MachOperand::Symbol(name.clone()),
                _ => {
                    let Some(reg) = self.reg_for_value(*v) else {
                        return false;
                    };
                    MachOperand::vreg(reg)
                }
            },
        };
        let opcode = if matches!(callee_op, MachOperand::Symbol(_)) {
            self.isa.call_opcode()
        } else {
            self.isa.call_indirect_opcode()
        };
        let mut call = MachInst::new(opcode, self.cur_span).with_op(callee_op);
        for p in &reg_args {
            call = call.with_op(MachOperand::preg(*p));
        }
        call = call.with_op(MachOperand::Clobbers(info.clobbers));
        self.emit(call);

        // Copy results out of their convention registers.
        if !ret_leaves.is_empty() {
            let base = self.mach.new_vreg_block(&ret_classes);
            let mut int_idx = 0;
            let mut float_idx = 0;
            for (i, class) in ret_classes.iter().enumerate() {
                let idx = match class {
                    RegClass::Int => {
                        int_idx += 1;
                        int_idx - 1
                    }
                    RegClass::Float => {
                        float_idx += 1;
                        float_idx - 1
                    }
                };
                let Some(phys) = info.ret_reg(*class, idx) else {
                    return false;
                };
                self.emit_copy(base.offset(i), phys);
            }
            if desc.is_result_used {
                if let Some(result) = desc.result {
                    self.update_value_map(result, base, ret_leaves.len());
                }
            }
        }
        true
    }

    /// Assign each argument its convention location and emit the copy or
    /// store establishing it. Returns the argument registers used, or
    /// `None` when any argument cannot take the fast path.
    fn marshal_arguments(
        &mut self,
        args: &[ArgEntry],
        info: &'static CallConvInfo,
    ) -> Option<SmallVec<[PReg; 8]>> {
        let ptr_bytes = u64::from(self.isa.ptr_bits() / 8);
        let mut assigner = ArgAssigner::new(info);
        let mut reg_args: SmallVec<[PReg; 8]> = SmallVec::new();

        for arg in args {
            // Memory-shaped arguments need frame cooperation the fast
            // path does not have.
            if arg.attrs.is_memory_shaped() {
                return None;
            }
            let ty = self.func.value_val_type(arg.value)?;
            let reg = self.reg_for_value(arg.value)?;

            // Small integers are passed at the promoted width. An
            // explicit flag extends them; otherwise the upper bits stay
            // unspecified.
            let mut pass_ty = ty;
            let mut pass_reg = reg;
            if let Some(promoted) = self.isa.promoted_type(ty) {
                if arg.attrs.zext {
                    pass_reg = if ty == ValType::I1 {
                        self.emit_zext_i1(reg, promoted)?
                    } else {
                        self.emit_cast(GenericOp::ZExt, ty, promoted, reg)?
                    };
                } else if arg.attrs.sext {
                    pass_reg = self.emit_cast(GenericOp::SExt, ty, promoted, reg)?;
                }
                pass_ty = promoted;
            }

            let class = self.isa.reg_class(pass_ty);
            match assigner.next(class) {
                ArgLoc::Reg(p) => {
                    self.emit_copy(p, pass_reg);
                    reg_args.push(p);
                }
                ArgLoc::Stack(offset) => {
                    let entry = self.isa.lookup(GenericOp::Store, pass_ty)?;
                    let store = MachInst::new(entry.reg, self.cur_span)
                        .with_op(MachOperand::Mem {
                            base: MachReg::Phys(info.stack_ptr),
                            disp: offset,
                        })
                        .with_op(MachOperand::vreg(pass_reg))
                        .with_mem_info(MemInfo {
                            size: pass_ty.byte_size(ptr_bytes) as u8,
                            align: 8,
                            volatile: false,
                        });
                    self.emit(store);
                }
            }
        }
        Some(reg_args)
    }

    // =========================================================================
    // Patchable Call-Sites
    // =========================================================================

    /// Record live values at a patchable point: id, shadow byte count,
    /// then the serialized live-operand bundle.
    pub(crate) fn select_stackmap(&mut self, inst: InstId) -> bool {
        let InstKind::IntrinsicCall { args, .. } = self.func.inst(inst).kind.clone() else {
            return false;
        };
        if args.len() < 2 {
            return false;
        }
        let Some(id) = self.const_int_operand(args[0]) else {
            return false;
        };
        let Some(shadow) = self.const_int_operand(args[1]) else {
            return false;
        };
        let Some(live) = self.serialize_live_operands(&args[2..]) else {
            return false;
        };

        let mut out = MachInst::new(Opcode::STACKMAP, self.cur_span)
            .with_op(MachOperand::Imm(id))
            .with_op(MachOperand::Imm(shadow));
        for op in live {
            out = out.with_op(op);
        }
        self.emit(out);
        true
    }

    /// A patchable call site: id, shadow bytes, callee, explicit
    /// call-argument count marshalled through the calling convention,
    /// then the live-operand bundle. An integer-typed site defines a
    /// result register.
    pub(crate) fn select_patchpoint(&mut self, inst: InstId) -> bool {
        let data = self.func.inst(inst);
        let ret_ty = data.ty.clone();
        let InstKind::IntrinsicCall { args, .. } = data.kind.clone() else {
            return false;
        };
        if args.len() < 4 {
            return false;
        }
        let Some(id) = self.const_int_operand(args[0]) else {
            return false;
        };
        let Some(shadow) = self.const_int_operand(args[1]) else {
            return false;
        };
        let Some(num_args) = self.const_int_operand(args[3]) else {
            return false;
        };
        let num_args = num_args as usize;
        if args.len() < 4 + num_args {
            return false;
        }

        let callee_op = match self.func.value_def(args[2]) {
            ValueDef::Global { name } => MachOperand::Symbol(name.clone()),
            ValueDef::Const(ConstVal::NullPtr) => MachOperand::Imm(0),
            ValueDef::Const(ConstVal::Int { bits, .. }) => MachOperand::Imm(*bits as i64),
            _ => return false,
        };

        let Some(info) = self.isa.call_conv_info(CallConv::C) else {
            return false;
        };
        let call_args: Vec<ArgEntry> = args[4..4 + num_args]
            .iter()
            .map(|&v| ArgEntry::plain(v))
            .collect();
        let Some(reg_args) = self.marshal_arguments(&call_args, info) else {
            return false;
        };
        let Some(live) = self.serialize_live_operands(&args[4 + num_args..]) else {
            return false;
        };

        let result_reg = match ret_ty.as_val() {
            Some(ty) if ty.is_int() => Some(self.new_vreg(RegClass::Int)),
            Some(_) => return false,
            None => None,
        };

        let mut out = MachInst::new(Opcode::PATCHPOINT, self.cur_span)
            .with_op(MachOperand::Imm(id))
            .with_op(MachOperand::Imm(shadow))
            .with_op(callee_op)
            .with_op(MachOperand::Imm(num_args as i64));
        for p in &reg_args {
            out = out.with_op(MachOperand::preg(*p));
        }
        for op in live {
            out = out.with_op(op);
        }
        out = out.with_op(MachOperand::Clobbers(info.clobbers));
        self.emit(out);

        if let Some(result_reg) = result_reg {
            let Some(phys) = info.ret_reg(RegClass::Int, 0) else {
                return false;
            };
            self.emit_copy(result_reg, phys);
            if let Some(value) = self.func.inst_result(inst) {
                self.update_value_map(value, result_reg, 1);
            }
        }
        true
    }

    /// Serialize live values for a patchable site: constants as a marker
    /// plus immediate, static allocas as their frame slot, everything
    /// else as a register.
    fn serialize_live_operands(&mut self, values: &[ValueId]) -> Option<Vec<MachOperand>> {
        let mut ops = Vec::with_capacity(values.len());
        for &v in values {
            match self.func.value_def(v) {
                ValueDef::Const(ConstVal::Int { .. }) => {
                    let imm = self
                        .func
                        .value_def(v)
                        .const_val()
                        .and_then(|c| c.as_int_sext(self.isa.ptr_bits()))?;
                    ops.push(MachOperand::Imm(CONSTANT_OP_MARKER));
                    ops.push(MachOperand::Imm(imm));
                }
                ValueDef::Const(ConstVal::NullPtr) => {
                    ops.push(MachOperand::Imm(CONSTANT_OP_MARKER));
                    ops.push(MachOperand::Imm(0));
                }
                _ => {
                    if let Some(slot) = self
                        .func
                        .def_inst(v)
                        .and_then(|def| self.ctx.alloca_slot(def))
                    {
                        ops.push(MachOperand::Slot(slot));
                    } else {
                        let reg = self.reg_for_value(v)?;
                        ops.push(MachOperand::vreg(reg));
                    }
                }
            }
        }
        Some(ops)
    }

    /// An integer constant operand's raw value.
    fn const_int_operand(&self, value: ValueId) -> Option<i64> {
        match self.func.value_def(value) {
            ValueDef::Const(ConstVal::Int { bits, .. }) => Some(*bits as i64),
            _ => None,
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
