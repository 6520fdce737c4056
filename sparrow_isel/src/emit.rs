//! Emission helpers on the selector.
//!
//! Two layers. The `build_inst*` family constructs and inserts one machine
//! instruction from an already-resolved [`OpcodeEntry`], constraining
//! register operands to the entry's operand class with copies. The `emit_*`
//! family sits above it, consulting the target's emission table first and
//! returning `None` when the table has no entry, so callers can fall back.
//!
//! Everything goes through [`FastSelector::emit`], which inserts at the
//! cursor, stamps nothing (the instruction carries its span already), and
//! keeps per-register machine use counts current for the fold and kill
//! queries.

use sparrow_ir::{BlockId, ValType};

use crate::mach::{MachInst, MachOperand, MachReg, RegClass, VReg};
use crate::select::FastSelector;
use crate::target::{imm_fits, GenericOp, OpcodeEntry};

impl<'a> FastSelector<'a> {
    // =========================================================================
    // Core Insertion
    // =========================================================================

    /// Insert `inst` at the cursor and advance it.
    pub fn emit(&mut self, inst: MachInst) {
        self.note_reg_uses(&inst, true);
        let at = self.cursor.insert_index();
        self.mach.block_mut(self.cur_block).insts.insert(at, inst);
        self.cursor.advance();
    }

    /// Insert a register-to-register copy.
    pub fn emit_copy(&mut self, dst: impl Into<MachReg>, src: impl Into<MachReg>) {
        let inst = MachInst::new(crate::mach::Opcode::COPY, self.cur_span)
            .with_def(dst.into())
            .with_op(MachOperand::Reg(src.into()));
        self.emit(inst);
    }

    /// Track virtual-register reads added (or removed, on rollback) by
    /// `inst`.
    pub(crate) fn note_reg_uses(&mut self, inst: &MachInst, added: bool) {
        for op in &inst.ops {
            let reg = match op {
                MachOperand::Reg(MachReg::Virt(v)) => *v,
                MachOperand::Mem {
                    base: MachReg::Virt(v),
                    ..
                } => *v,
                _ => continue,
            };
            let idx = reg.index() as usize;
            if self.vreg_uses.len() <= idx {
                self.vreg_uses.resize(idx + 1, 0);
            }
            if added {
                self.vreg_uses[idx] += 1;
            } else {
                self.vreg_uses[idx] = self.vreg_uses[idx].saturating_sub(1);
            }
        }
    }

    /// Machine-level read count of `reg` so far.
    #[inline]
    pub(crate) fn vreg_use_count(&self, reg: VReg) -> u32 {
        self.vreg_uses.get(reg.index() as usize).copied().unwrap_or(0)
    }

    // =========================================================================
    // Instruction Builders
    // =========================================================================

    /// Copy `reg` into a fresh register of `class` unless it already is one.
    pub fn constrain_operand_class(&mut self, reg: VReg, class: RegClass) -> VReg {
        if self.mach.vreg_class(reg) == class {
            return reg;
        }
        let constrained = self.new_vreg(class);
        self.emit_copy(constrained, reg);
        constrained
    }

    /// Build and insert a no-operand instruction defining a fresh register.
    pub fn build_inst(&mut self, entry: OpcodeEntry) -> VReg {
        let dst = self.new_vreg(entry.class);
        self.emit(MachInst::new(entry.reg, self.cur_span).with_def(dst));
        dst
    }

    /// Build and insert a one-register-operand instruction.
    pub fn build_inst_r(&mut self, entry: OpcodeEntry, op0: VReg) -> VReg {
        let op0 = self.constrain_operand_class(op0, entry.op_class);
        let dst = self.new_vreg(entry.class);
        let inst = MachInst::new(entry.reg, self.cur_span)
            .with_def(dst)
            .with_op(MachOperand::vreg(op0));
        self.emit(inst);
        dst
    }

    /// Build and insert a two-register-operand instruction.
    pub fn build_inst_rr(&mut self, entry: OpcodeEntry, op0: VReg, op1: VReg) -> VReg {
        let op0 = self.constrain_operand_class(op0, entry.op_class);
        let op1 = self.constrain_operand_class(op1, entry.op_class);
        let dst = self.new_vreg(entry.class);
        let inst = MachInst::new(entry.reg, self.cur_span)
            .with_def(dst)
            .with_op(MachOperand::vreg(op0))
            .with_op(MachOperand::vreg(op1));
        self.emit(inst);
        dst
    }

    /// Build and insert a register-plus-immediate instruction.
    pub fn build_inst_ri(&mut self, entry: OpcodeEntry, op0: VReg, imm: i64) -> VReg {
        let op0 = self.constrain_operand_class(op0, entry.op_class);
        let dst = self.new_vreg(entry.class);
        let inst = MachInst::new(entry.reg, self.cur_span)
            .with_def(dst)
            .with_op(MachOperand::vreg(op0))
            .with_op(MachOperand::Imm(imm));
        self.emit(inst);
        dst
    }

    /// Build and insert an immediate-only instruction.
    pub fn build_inst_i(&mut self, entry: OpcodeEntry, imm: i64) -> VReg {
        let dst = self.new_vreg(entry.class);
        let inst = MachInst::new(entry.reg, self.cur_span)
            .with_def(dst)
            .with_op(MachOperand::Imm(imm));
        self.emit(inst);
        dst
    }

    // =========================================================================
    // Table-Consulting Emission
    // =========================================================================

    /// Emit a result-less table entry (trap). False when the table has
    /// none.
    pub fn emit_nullary(&mut self, gop: GenericOp, ty: ValType) -> bool {
        let Some(entry) = self.isa.lookup(gop, ty) else {
            return false;
        };
        self.emit(MachInst::new(entry.reg, self.cur_span));
        true
    }

    /// Emit `gop` over two registers.
    pub fn emit_rr(&mut self, gop: GenericOp, ty: ValType, op0: VReg, op1: VReg) -> Option<VReg> {
        let entry = self.isa.lookup(gop, ty)?;
        Some(self.build_inst_rr(entry, op0, op1))
    }

    /// Emit `gop` over a register and an immediate, strictly: fails when
    /// the table has no immediate form or the value does not fit it.
    pub fn emit_ri(&mut self, gop: GenericOp, ty: ValType, op0: VReg, imm: i64) -> Option<VReg> {
        let entry = self.isa.lookup(gop, ty)?;
        let form = entry.imm?;
        if !imm_fits(imm, form.bits) {
            return None;
        }
        let imm_entry = OpcodeEntry {
            reg: form.opcode,
            ..entry
        };
        Some(self.build_inst_ri(imm_entry, op0, imm))
    }

    /// Materialize an integer immediate into a fresh register.
    pub fn emit_i(&mut self, ty: ValType, imm: i64) -> Option<VReg> {
        let entry = self.isa.lookup(GenericOp::MovImm, ty)?;
        let form = entry.imm?;
        if !imm_fits(imm, form.bits) {
            return None;
        }
        let imm_entry = OpcodeEntry {
            reg: form.opcode,
            ..entry
        };
        Some(self.build_inst_i(imm_entry, imm))
    }

    /// Materialize a float immediate (given as raw bits) into a fresh
    /// register.
    pub fn emit_f(&mut self, ty: ValType, bits: u64) -> Option<VReg> {
        let entry = self.isa.lookup(GenericOp::MovFpImm, ty)?;
        let dst = self.new_vreg(entry.class);
        let inst = MachInst::new(entry.reg, self.cur_span)
            .with_def(dst)
            .with_op(MachOperand::FpImm(bits));
        self.emit(inst);
        Some(dst)
    }

    /// Emit a conversion through the two-type cast table.
    pub fn emit_cast(
        &mut self,
        gop: GenericOp,
        from: ValType,
        to: ValType,
        op0: VReg,
    ) -> Option<VReg> {
        let entry = self.isa.lookup_cast(gop, from, to)?;
        Some(self.build_inst_r(entry, op0))
    }

    /// Emit `gop` over a register and an immediate with strength
    /// reduction and materialization fallback: a multiply or unsigned
    /// divide by a power of two becomes a shift, out-of-range shift
    /// amounts are rejected, then the immediate form is tried, and
    /// finally the immediate is materialized for the register form.
    pub fn emit_ri_auto(
        &mut self,
        mut gop: GenericOp,
        ty: ValType,
        op0: VReg,
        mut imm: i64,
    ) -> Option<VReg> {
        if gop == GenericOp::Mul && (imm as u64).is_power_of_two() {
            gop = GenericOp::Shl;
            imm = i64::from((imm as u64).trailing_zeros());
        } else if gop == GenericOp::UDiv && (imm as u64).is_power_of_two() {
            gop = GenericOp::LShr;
            imm = i64::from((imm as u64).trailing_zeros());
        }

        if matches!(gop, GenericOp::Shl | GenericOp::LShr | GenericOp::AShr)
            && imm as u64 >= u64::from(ty.bit_width(self.isa.ptr_bits()))
        {
            return None;
        }

        if let Some(reg) = self.emit_ri(gop, ty, op0, imm) {
            return Some(reg);
        }
        let imm_reg = self.emit_i(ty, imm)?;
        self.emit_rr(gop, ty, op0, imm_reg)
    }

    /// Zero-extend a boolean register by masking its low bit.
    pub fn emit_zext_i1(&mut self, op0: VReg, to: ValType) -> Option<VReg> {
        self.emit_ri(GenericOp::And, to, op0, 1)
    }

    /// Branch to `dest`, suppressing the jump when `dest` is the layout
    /// successor, and register the CFG edge. A block whose branch is its
    /// only instruction keeps the jump even then, so the block still
    /// carries an instruction with the branch's source span. False only
    /// when the table has no jump.
    pub fn emit_branch(&mut self, dest: BlockId) -> bool {
        let fallthrough = dest.index() == self.cur_block.index() + 1
            && self.func.block_insts(self.cur_block).len() > 1;
        if !fallthrough {
            let Some(entry) = self.isa.lookup(GenericOp::Jump, ValType::I64) else {
                return false;
            };
            let inst = MachInst::new(entry.reg, self.cur_span).with_op(MachOperand::Block(dest));
            self.emit(inst);
        }
        self.mach.add_successor(self.cur_block, dest);
        true
    }
}
