//! Per-function lowering context.
//!
//! Owns the state that outlives any single block: the cross-block
//! value-to-register map, the register fixup table, frame slots for static
//! stack allocations, and the machine PHI nodes with their recorded
//! live-out operands. The selector reads and extends this state; operand
//! attachment happens in [`finalize_phis`] once every block is final.

use rustc_hash::FxHashMap;
use sparrow_ir::inst::InstKind;
use sparrow_ir::{BlockId, Function, InstId, Span, ValType, ValueId};

use crate::mach::{FrameSlot, MachFunction, MachInst, MachOperand, MachReg, Opcode, VReg};
use crate::target::TargetIsa;

// =============================================================================
// PHI Live-Out Records
// =============================================================================

/// A pending PHI operand: `reg` flows from `pred` into the machine PHI at
/// position `phi_index` of `block`.
///
/// Recorded instead of written directly, since a predecessor block may
/// still be rewritten (or its registers re-mapped) after the record is
/// made.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PhiLiveOut {
    /// Block whose head holds the machine PHI.
    pub block: BlockId,
    /// Position of the machine PHI within that block.
    pub phi_index: usize,
    /// Register carrying the incoming value.
    pub reg: VReg,
    /// Predecessor edge the value arrives on.
    pub pred: BlockId,
}

// =============================================================================
// Lowering Context
// =============================================================================

/// Cross-block lowering state for one function.
pub struct LowerCtx {
    /// Persistent value-to-register assignments (instruction results and
    /// formal arguments; constants stay in the selector's local cache).
    value_regs: FxHashMap<ValueId, VReg>,
    /// Old-to-new register redirections recorded when a value is
    /// re-registered over an existing assignment.
    reg_fixups: FxHashMap<VReg, VReg>,
    /// Machine PHI position of each lowerable IR PHI.
    phi_indices: FxHashMap<InstId, usize>,
    /// Pending PHI operands, attached by [`finalize_phis`].
    phi_live_outs: Vec<PhiLiveOut>,
    /// Frame slot of each static alloca.
    alloca_slots: FxHashMap<InstId, FrameSlot>,
}

/// The scalar type of a PHI the fast path can carry, if any.
///
/// Aggregate PHIs and scalars the target neither supports nor promotes are
/// out; resolution fails on those and the general selector takes over.
pub(crate) fn phi_val_type(
    func: &Function,
    isa: &dyn TargetIsa,
    value: ValueId,
) -> Option<ValType> {
    let ty = func.value_type(value).as_val()?;
    if isa.is_legal_type(ty) || isa.promoted_type(ty).is_some() {
        Some(ty)
    } else {
        None
    }
}

impl LowerCtx {
    /// Build the context for `func`: allocate frame slots for every static
    /// alloca and plant empty machine PHIs (with their result registers)
    /// at block heads.
    pub fn new(func: &Function, isa: &dyn TargetIsa, mach: &mut MachFunction) -> Self {
        let ptr_bytes = u64::from(isa.ptr_bits() / 8);
        let mut ctx = LowerCtx {
            value_regs: FxHashMap::default(),
            reg_fixups: FxHashMap::default(),
            phi_indices: FxHashMap::default(),
            phi_live_outs: Vec::new(),
            alloca_slots: FxHashMap::default(),
        };

        for block in func.block_ids() {
            let mut phi_count = 0;
            for &inst in func.block_insts(block) {
                match &func.inst(inst).kind {
                    InstKind::Alloca {
                        ty,
                        dynamic_count: None,
                        align,
                    } => {
                        let size = ty.alloc_size(ptr_bytes).max(1);
                        let align = ty.align(ptr_bytes).max(u64::from(*align));
                        let slot = mach.create_frame_slot(size, align);
                        ctx.alloca_slots.insert(inst, slot);
                    }
                    InstKind::Phi { .. } => {
                        let Some(value) = func.inst_result(inst) else {
                            continue;
                        };
                        let Some(ty) = phi_val_type(func, isa, value) else {
                            continue;
                        };
                        let reg = mach.new_vreg(isa.reg_class(ty));
                        ctx.value_regs.insert(value, reg);
                        ctx.phi_indices.insert(inst, phi_count);
                        phi_count += 1;
                        let phi = MachInst::new(Opcode::PHI, Span::dummy()).with_def(reg);
                        mach.block_mut(block).insts.push(phi);
                    }
                    _ => {}
                }
            }
        }
        ctx
    }

    /// The register already assigned to `value`, if any.
    #[inline]
    pub fn value_reg(&self, value: ValueId) -> Option<VReg> {
        self.value_regs.get(&value).copied()
    }

    /// Assign `reg` (the first of `num_regs` consecutive registers) to
    /// `value`. Re-assigning over an existing register records per-leaf
    /// fixups redirecting the old registers to the new ones.
    pub fn set_value_reg(&mut self, value: ValueId, reg: VReg, num_regs: usize) {
        match self.value_regs.get_mut(&value) {
            None => {
                self.value_regs.insert(value, reg);
            }
            Some(assigned) if *assigned == reg => {}
            Some(assigned) => {
                let old = *assigned;
                *assigned = reg;
                for i in 0..num_regs {
                    self.reg_fixups.insert(old.offset(i), reg.offset(i));
                }
            }
        }
    }

    /// Follow the fixup chain from `reg` to its final replacement.
    #[must_use]
    pub fn resolve_fixups(&self, mut reg: VReg) -> VReg {
        while let Some(&next) = self.reg_fixups.get(&reg) {
            if next == reg {
                break;
            }
            reg = next;
        }
        reg
    }

    /// Whether any re-registration has been recorded.
    #[inline]
    pub fn has_fixups(&self) -> bool {
        !self.reg_fixups.is_empty()
    }

    /// The frame slot of a static alloca.
    #[inline]
    pub fn alloca_slot(&self, inst: InstId) -> Option<FrameSlot> {
        self.alloca_slots.get(&inst).copied()
    }

    /// The machine PHI position of an IR PHI, if one was planted.
    #[inline]
    pub fn phi_index(&self, inst: InstId) -> Option<usize> {
        self.phi_indices.get(&inst).copied()
    }

    /// Record a pending PHI operand.
    #[inline]
    pub fn record_phi_live_out(&mut self, record: PhiLiveOut) {
        self.phi_live_outs.push(record);
    }

    /// Number of records made so far; pair with
    /// [`truncate_phi_live_outs`](Self::truncate_phi_live_outs) to undo
    /// the records of a failed terminator.
    #[inline]
    pub fn num_phi_live_outs(&self) -> usize {
        self.phi_live_outs.len()
    }

    /// Drop every record past `len`.
    #[inline]
    pub fn truncate_phi_live_outs(&mut self, len: usize) {
        self.phi_live_outs.truncate(len);
    }
}

/// Attach the recorded PHI operands, applying register fixups.
///
/// Runs after all blocks are selected; each pending record becomes a
/// (register, predecessor) operand pair on its machine PHI.
pub fn finalize_phis(ctx: &LowerCtx, mach: &mut MachFunction) {
    for record in &ctx.phi_live_outs {
        let reg = ctx.resolve_fixups(record.reg);
        let phi = &mut mach.block_mut(record.block).insts[record.phi_index];
        debug_assert!(phi.is_phi());
        phi.ops.push(MachOperand::Reg(MachReg::Virt(reg)));
        phi.ops.push(MachOperand::Block(record.pred));
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::target::x64::X64Target;
    use sparrow_ir::{FunctionBuilder, Signature, Type};

    fn ctx_for(func: &Function) -> (LowerCtx, MachFunction) {
        let isa = X64Target::sysv();
        let mut mach = MachFunction::new(func.name.clone(), func.num_blocks());
        let ctx = LowerCtx::new(func, &isa, &mut mach);
        (ctx, mach)
    }

    #[test]
    fn test_static_allocas_get_slots() {
        let mut b = FunctionBuilder::new("f", Signature::new(vec![], Type::Void));
        let entry = b.create_block();
        b.switch_to_block(entry);
        let slot_val = b.alloca(Type::I64, 8, Span::dummy());
        let count = b.const_int(ValType::I32, 4);
        let dyn_val = b.dynamic_alloca(Type::I8, count, 1, Span::dummy());
        b.ret(None, Span::dummy());
        let func = b.finalize();

        let (ctx, mach) = ctx_for(&func);
        let slot_inst = func.def_inst(slot_val).unwrap();
        let dyn_inst = func.def_inst(dyn_val).unwrap();
        let slot = ctx.alloca_slot(slot_inst).unwrap();
        assert_eq!(mach.frame_slot(slot).size, 8);
        assert_eq!(mach.frame_slot(slot).align, 8);
        assert!(ctx.alloca_slot(dyn_inst).is_none());
        assert_eq!(mach.num_frame_slots(), 1);
    }

    #[test]
    fn test_phis_planted_at_block_heads() {
        let sig = Signature::new(vec![], Type::I32);
        let mut b = FunctionBuilder::new("f", sig);
        let entry = b.create_block();
        let left = b.create_block();
        let right = b.create_block();
        let join = b.create_block();
        b.switch_to_block(entry);
        let cond = b.const_int(ValType::I1, 1);
        b.cond_br(cond, left, right, Span::dummy());
        b.switch_to_block(left);
        b.br(join, Span::dummy());
        b.switch_to_block(right);
        b.br(join, Span::dummy());
        b.switch_to_block(join);
        let one = b.const_int(ValType::I32, 1);
        let two = b.const_int(ValType::I32, 2);
        let phi = b.phi(Type::I32, vec![(left, one), (right, two)], Span::dummy());
        b.ret(Some(phi), Span::dummy());
        let func = b.finalize();

        let (ctx, mach) = ctx_for(&func);
        assert_eq!(mach.block(join).insts.len(), 1);
        assert!(mach.block(join).insts[0].is_phi());
        let phi_inst = func.def_inst(phi).unwrap();
        assert_eq!(ctx.phi_index(phi_inst), Some(0));
        assert_eq!(ctx.value_reg(phi), mach.block(join).insts[0].virt_def());
    }

    #[test]
    fn test_reassignment_records_fixups() {
        let mut b = FunctionBuilder::new("f", Signature::new(vec![], Type::Void));
        let entry = b.create_block();
        b.switch_to_block(entry);
        b.ret(None, Span::dummy());
        let func = b.finalize();
        let (mut ctx, mut mach) = ctx_for(&func);

        let value = ValueId::new(0);
        let first = mach.new_vreg(crate::mach::RegClass::Int);
        let second = mach.new_vreg(crate::mach::RegClass::Int);
        ctx.set_value_reg(value, first, 1);
        assert!(!ctx.has_fixups());
        ctx.set_value_reg(value, second, 1);
        assert!(ctx.has_fixups());
        assert_eq!(ctx.resolve_fixups(first), second);
        assert_eq!(ctx.value_reg(value), Some(second));
    }

    #[test]
    fn test_multi_reg_fixups_cover_all_leaves() {
        let mut b = FunctionBuilder::new("f", Signature::new(vec![], Type::Void));
        let entry = b.create_block();
        b.switch_to_block(entry);
        b.ret(None, Span::dummy());
        let func = b.finalize();
        let (mut ctx, mut mach) = ctx_for(&func);

        use crate::mach::RegClass;
        let value = ValueId::new(0);
        let first = mach.new_vreg_block(&[RegClass::Int, RegClass::Int]);
        let second = mach.new_vreg_block(&[RegClass::Int, RegClass::Int]);
        ctx.set_value_reg(value, first, 2);
        ctx.set_value_reg(value, second, 2);
        assert_eq!(ctx.resolve_fixups(first.offset(1)), second.offset(1));
    }

    #[test]
    fn test_finalize_attaches_operands() {
        let sig = Signature::new(vec![], Type::I32);
        let mut b = FunctionBuilder::new("f", sig);
        let entry = b.create_block();
        let join = b.create_block();
        b.switch_to_block(entry);
        b.br(join, Span::dummy());
        b.switch_to_block(join);
        let one = b.const_int(ValType::I32, 1);
        let phi = b.phi(Type::I32, vec![(entry, one)], Span::dummy());
        b.ret(Some(phi), Span::dummy());
        let func = b.finalize();

        let (mut ctx, mut mach) = ctx_for(&func);
        let incoming = mach.new_vreg(crate::mach::RegClass::Int);
        ctx.record_phi_live_out(PhiLiveOut {
            block: join,
            phi_index: 0,
            reg: incoming,
            pred: entry,
        });
        finalize_phis(&ctx, &mut mach);

        let phi = &mach.block(join).insts[0];
        assert_eq!(phi.ops.len(), 2);
        assert_eq!(phi.ops[0].as_reg(), Some(MachReg::Virt(incoming)));
        assert_eq!(phi.ops[1], MachOperand::Block(entry));
    }
}
