//! The fast selection engine.
//!
//! [`FastSelector`] lowers one IR function instruction by instruction, in
//! program order, with no selection graph. Per instruction it tries a
//! generic lowering routine, then the target's
//! [`select_inst`](crate::target::TargetHooks::select_inst) hook; if both
//! decline the function is handed back for general selection. Every failed
//! attempt is rolled back, so only fully committed instructions survive.
//!
//! The engine owns the per-block state: the local value cache (constants
//! and alloca addresses materialized this block), the emission cursor with
//! its local value area, and machine-level register use counts feeding the
//! fold legality checks. Cross-block state lives in the injected
//! [`LowerCtx`].
//!
//! Entry point: [`select_function`].

use rustc_hash::FxHashMap;
use smallvec::SmallVec;

use sparrow_ir::inst::{BinOp, CastOp, InstKind, Intrinsic};
use sparrow_ir::{BlockId, ConstVal, Function, InstId, Span, Type, ValType, ValueDef, ValueId};

use crate::call::CallDescriptor;
use crate::config::{SelectStats, SelectorConfig};
use crate::context::{finalize_phis, LowerCtx};
use crate::cursor::{CursorSnapshot, EmissionCursor};
use crate::error::{SelectError, SelectResult};
use crate::mach::{MachFunction, MachInst, MachOperand, Opcode, RegClass, VReg};
use crate::target::{GenericOp, TargetHooks, TargetIsa};

/// Saved selector state bracketing one speculative selection attempt.
#[derive(Debug, Clone, Copy)]
#[must_use = "an unused savepoint leaves the attempt unprotected"]
pub struct SavePoint {
    cursor: CursorSnapshot,
    phi_records: usize,
}

/// The per-function fast selection engine.
pub struct FastSelector<'a> {
    pub(crate) func: &'a Function,
    pub(crate) isa: &'a dyn TargetIsa,
    pub(crate) hooks: &'a dyn TargetHooks,
    pub(crate) ctx: &'a mut LowerCtx,
    pub(crate) mach: &'a mut MachFunction,
    pub(crate) cursor: EmissionCursor,
    pub(crate) cur_block: BlockId,
    pub(crate) cur_span: Span,
    /// Constants and alloca addresses materialized this block.
    local_values: FxHashMap<ValueId, VReg>,
    /// Machine-level read counts, indexed by virtual register.
    pub(crate) vreg_uses: Vec<u32>,
    /// Tunables.
    pub config: SelectorConfig,
    /// Counters for this function.
    pub stats: SelectStats,
}

/// Select `func` on the fast path.
///
/// Returns the machine function with all PHI operands attached, or the
/// first failure requiring general selection.
///
/// # Errors
///
/// [`SelectError::ArgLowering`] when the formal parameters cannot be
/// lowered, [`SelectError::UnsupportedInst`] for the first instruction
/// neither the generic palette nor the target hook selected.
pub fn select_function(
    func: &Function,
    isa: &dyn TargetIsa,
    hooks: &dyn TargetHooks,
    config: SelectorConfig,
) -> SelectResult<(MachFunction, SelectStats)> {
    tracing::trace!(func = %func.name, target = isa.name(), "fast selection");
    let mut mach = MachFunction::new(func.name.clone(), func.num_blocks());
    let mut ctx = LowerCtx::new(func, isa, &mut mach);
    let mut sel = FastSelector::new(func, isa, hooks, &mut ctx, &mut mach, config);
    sel.run()?;
    let stats = sel.stats;
    drop(sel);
    finalize_phis(&ctx, &mut mach);
    Ok((mach, stats))
}

impl<'a> FastSelector<'a> {
    /// Create a selector over a function and its lowering context.
    pub fn new(
        func: &'a Function,
        isa: &'a dyn TargetIsa,
        hooks: &'a dyn TargetHooks,
        ctx: &'a mut LowerCtx,
        mach: &'a mut MachFunction,
        config: SelectorConfig,
    ) -> Self {
        FastSelector {
            func,
            isa,
            hooks,
            ctx,
            mach,
            cursor: EmissionCursor::new(),
            cur_block: func.entry_block(),
            cur_span: Span::dummy(),
            local_values: FxHashMap::default(),
            vreg_uses: Vec::new(),
            config,
            stats: SelectStats::default(),
        }
    }

    /// The function under selection.
    #[inline]
    pub fn func(&self) -> &'a Function {
        self.func
    }

    /// The target description.
    #[inline]
    pub fn isa(&self) -> &'a dyn TargetIsa {
        self.isa
    }

    /// The block currently under construction.
    #[inline]
    pub fn cur_block(&self) -> BlockId {
        self.cur_block
    }

    /// The cross-block lowering context.
    #[inline]
    pub fn ctx(&mut self) -> &mut LowerCtx {
        self.ctx
    }

    /// Allocate a fresh virtual register.
    #[inline]
    pub fn new_vreg(&mut self, class: RegClass) -> VReg {
        self.mach.new_vreg(class)
    }

    // =========================================================================
    // Driver
    // =========================================================================

    /// Select the whole function: formal parameters, then every block in
    /// layout order.
    ///
    /// # Errors
    ///
    /// See [`select_function`].
    pub fn run(&mut self) -> SelectResult<()> {
        self.start_block(self.func.entry_block());
        if !self.lower_arguments() {
            tracing::debug!(func = %self.func.name, "argument lowering fell back");
            return Err(SelectError::ArgLowering);
        }
        for block in self.func.block_ids() {
            self.start_block(block);
            for &inst in self.func.block_insts(block) {
                // PHIs were planted when the context was built; their
                // operands arrive via predecessor terminators.
                if matches!(self.func.inst(inst).kind, InstKind::Phi { .. }) {
                    continue;
                }
                if !self.select_instruction(inst) {
                    return Err(SelectError::unsupported(inst, self.func.inst(inst).span));
                }
            }
        }
        Ok(())
    }

    /// Reset per-block state and position the cursor after anything
    /// already planted at the block head.
    pub fn start_block(&mut self, block: BlockId) {
        self.cur_block = block;
        self.cur_span = Span::dummy();
        self.local_values.clear();
        self.cursor.reset(self.mach.block(block).insts.len());
    }

    /// Select one instruction: generic routine first, target hook second,
    /// each attempt rolled back on failure.
    pub fn select_instruction(&mut self, inst: InstId) -> bool {
        self.cur_span = self.func.inst(inst).span;
        let save = self.savepoint();
        if self.select_operator(inst) {
            self.stats.num_generic += 1;
            self.cur_span = Span::dummy();
            return true;
        }
        self.rollback_to(save);

        let hooks = self.hooks;
        let save = self.savepoint();
        if hooks.select_inst(self, inst) {
            self.stats.num_hook += 1;
            self.cur_span = Span::dummy();
            return true;
        }
        self.rollback_to(save);

        self.stats.num_failed += 1;
        self.cur_span = Span::dummy();
        tracing::debug!(inst = ?inst, "fast path declined, general selection required");
        false
    }

    // =========================================================================
    // Value-Register Cache
    // =========================================================================

    /// The register holding `value`, materializing it on a miss.
    ///
    /// Instruction results get a register assigned (without emission) on
    /// first reference; the defining instruction's own selection produces
    /// the actual definition. Constants, globals, and static alloca
    /// addresses are materialized into the local value area and cached for
    /// the rest of the block.
    pub fn reg_for_value(&mut self, value: ValueId) -> Option<VReg> {
        if let Some(reg) = self.lookup_reg_for_value(value) {
            self.stats.cache_hits += 1;
            return Some(reg);
        }
        match self.func.value_def(value) {
            ValueDef::Inst(inst) => {
                let inst = *inst;
                if self.ctx.alloca_slot(inst).is_some() {
                    return self.materialize_value(value);
                }
                let mut leaves = Vec::new();
                self.func.value_type(value).collect_leaves(&mut leaves);
                if leaves.is_empty() {
                    return None;
                }
                let classes: SmallVec<[RegClass; 4]> =
                    leaves.iter().map(|&l| self.isa.reg_class(l)).collect();
                let reg = self.mach.new_vreg_block(&classes);
                self.ctx.set_value_reg(value, reg, classes.len());
                Some(reg)
            }
            // Formals are registered by argument lowering; a miss means
            // that fell back and the function is not ours to select.
            ValueDef::Arg { .. } => None,
            ValueDef::Const(_) | ValueDef::Global { .. } => self.materialize_value(value),
        }
    }

    /// Cache lookup only: the cross-block map, then the local cache.
    /// Never materializes, never emits.
    #[must_use]
    pub fn lookup_reg_for_value(&self, value: ValueId) -> Option<VReg> {
        self.ctx
            .value_reg(value)
            .or_else(|| self.local_values.get(&value).copied())
    }

    /// The register of a GEP index, widened or truncated to the
    /// addressing width; the flag reports whether an adjustment was
    /// emitted.
    pub fn reg_for_gep_index(&mut self, value: ValueId) -> Option<(VReg, bool)> {
        let addr_ty = self.isa.addr_type();
        let ty = self.func.value_val_type(value)?;
        let reg = self.reg_for_value(value)?;
        let ptr_bits = self.isa.ptr_bits();
        let from = ty.bit_width(ptr_bits);
        let to = addr_ty.bit_width(ptr_bits);
        if from == to {
            return Some((reg, false));
        }
        let gop = if from < to {
            GenericOp::SExt
        } else {
            GenericOp::Trunc
        };
        let adjusted = self.emit_cast(gop, ty, addr_ty, reg)?;
        Some((adjusted, true))
    }

    /// Record the register(s) now holding `value`.
    ///
    /// Instruction results and formals go to the cross-block map (with
    /// fixups on re-registration); everything else stays block-local.
    pub fn update_value_map(&mut self, value: ValueId, reg: VReg, num_regs: usize) {
        match self.func.value_def(value) {
            ValueDef::Inst(_) | ValueDef::Arg { .. } => {
                self.ctx.set_value_reg(value, reg, num_regs);
            }
            ValueDef::Const(_) | ValueDef::Global { .. } => {
                self.local_values.insert(value, reg);
            }
        }
    }

    /// Clear the local cache and collapse the local value area boundary to
    /// the current insertion point. Required before every call, since the
    /// call may clobber the registers backing cached values.
    pub fn flush_local_value_map(&mut self) {
        self.local_values.clear();
        self.cursor.flush_area();
    }

    // =========================================================================
    // Local Value Area
    // =========================================================================

    /// Park the cursor in the local value area; emissions until the
    /// matching leave appear before the caller's position and carry no
    /// source tag.
    pub fn enter_local_value_area(&mut self) -> CursorSnapshot {
        let snap = self.cursor.enter_local_area(self.cur_span);
        self.cur_span = Span::dummy();
        snap
    }

    /// Restore the cursor and source tag saved by the matching enter.
    pub fn leave_local_value_area(&mut self, snap: CursorSnapshot) {
        self.cur_span = self.cursor.leave_local_area(snap);
    }

    // =========================================================================
    // Rollback
    // =========================================================================

    /// Snapshot the state a failed attempt must be rolled back to.
    pub fn savepoint(&self) -> SavePoint {
        SavePoint {
            cursor: self.cursor.savepoint(self.cur_span),
            phi_records: self.ctx.num_phi_live_outs(),
        }
    }

    /// Erase everything emitted or recorded since `save`. Local value
    /// area materializations are committed and survive.
    pub fn rollback_to(&mut self, save: SavePoint) {
        let from = self.cursor.rollback_start(&save.cursor);
        self.remove_dead_code(from, self.cursor.insert_index());
        self.ctx.truncate_phi_live_outs(save.phi_records);
    }

    /// Delete the instruction range `[from, to)` of the current block and
    /// re-derive the cursor.
    pub fn remove_dead_code(&mut self, from: usize, to: usize) {
        debug_assert!(from <= to);
        if from == to {
            return;
        }
        let removed: Vec<MachInst> = self
            .mach
            .block_mut(self.cur_block)
            .insts
            .drain(from..to)
            .collect();
        for inst in &removed {
            self.note_reg_uses(inst, false);
        }
        self.stats.rolled_back += removed.len();
        self.cursor.rolled_back(from);
    }

    // =========================================================================
    // Constant Materializer
    // =========================================================================

    /// Materialize a value into the local value area and cache it for the
    /// rest of the block.
    fn materialize_value(&mut self, value: ValueId) -> Option<VReg> {
        let ty = self.func.value_val_type(value)?;
        let snap = self.enter_local_value_area();
        let reg = self.materialize_reg_for_value(value, ty);
        self.leave_local_value_area(snap);
        if let Some(reg) = reg {
            self.local_values.insert(value, reg);
            self.stats.materializations += 1;
        }
        reg
    }

    /// The materialization rules: target constant hook first, then the
    /// target-independent cases, then the alloca hook. `None` from every
    /// path tells the caller to abandon the fast-path attempt.
    pub fn materialize_reg_for_value(&mut self, value: ValueId, ty: ValType) -> Option<VReg> {
        let hooks = self.hooks;
        match self.func.value_def(value).clone() {
            ValueDef::Const(c) => {
                if let Some(reg) = hooks.materialize_constant(self, value, ty) {
                    return Some(reg);
                }
                match c {
                    ConstVal::Int { .. } => {
                        let imm = c.as_int_sext(self.isa.ptr_bits())?;
                        self.emit_i(ty, imm)
                    }
                    ConstVal::NullPtr => self.emit_i(ty, 0),
                    ConstVal::Float { bits, .. } => self.materialize_float(ty, bits),
                    ConstVal::Undef => {
                        let dst = self.new_vreg(self.isa.reg_class(ty));
                        self.emit(MachInst::new(Opcode::IMPLICIT_DEF, self.cur_span).with_def(dst));
                        Some(dst)
                    }
                }
            }
            ValueDef::Global { name } => {
                let entry = self.isa.lookup(GenericOp::GlobalAddr, ValType::Ptr)?;
                let dst = self.new_vreg(entry.class);
                let inst = MachInst::new(entry.reg, self.cur_span)
                    .with_def(dst)
                    .with_op(MachOperand::Symbol(name));
                self.emit(inst);
                Some(dst)
            }
            ValueDef::Inst(inst) => hooks.materialize_alloca(self, inst),
            ValueDef::Arg { .. } => None,
        }
    }

    fn materialize_float(&mut self, ty: ValType, bits: u64) -> Option<VReg> {
        let hooks = self.hooks;
        if bits == 0 {
            if let Some(reg) = hooks.materialize_float_zero(self, ty) {
                return Some(reg);
            }
        }
        if let Some(reg) = self.emit_f(ty, bits) {
            return Some(reg);
        }
        // No float-immediate form: route integral values through an
        // integer materialization and an exact convert.
        let val = if ty == ValType::F32 {
            f64::from(f32::from_bits(bits as u32))
        } else {
            f64::from_bits(bits)
        };
        let as_int = val as i64;
        #[allow(clippy::cast_precision_loss)]
        if as_int as f64 != val {
            return None;
        }
        let int_ty = if ty == ValType::F32 {
            ValType::I32
        } else {
            ValType::I64
        };
        if int_ty == ValType::I32 && i32::try_from(as_int).is_err() {
            return None;
        }
        let int_reg = self.emit_i(int_ty, as_int)?;
        self.emit_cast(GenericOp::SiToFp, int_ty, ty, int_reg)
    }

    // =========================================================================
    // Dispatcher
    // =========================================================================

    fn select_operator(&mut self, inst: InstId) -> bool {
        match &self.func.inst(inst).kind {
            InstKind::Binary { .. } => self.select_binary(inst).is_some(),
            InstKind::FNeg { .. } => self.select_fneg(inst).is_some(),
            InstKind::Cast { .. } => self.select_cast(inst).is_some(),
            InstKind::Gep { .. } => self.select_gep(inst).is_some(),
            InstKind::Alloca {
                dynamic_count: None,
                ..
            } => {
                // Pre-lowered to a frame slot; the address materializes on
                // first use.
                self.ctx.alloca_slot(inst).is_some()
            }
            InstKind::Call { .. } => self.select_call(inst),
            InstKind::IntrinsicCall { .. } => self.select_intrinsic(inst),
            InstKind::ExtractValue { .. } => self.select_extract_value(inst).is_some(),
            InstKind::InsertValue { .. } => self.select_insert_value(inst).is_some(),
            InstKind::Br { .. } => self.select_br(inst).is_some(),
            InstKind::Unreachable => self.select_unreachable(),
            // Loads, stores, compares, conditional branches, returns,
            // dynamic allocas, and PHIs have no generic routine.
            _ => false,
        }
    }

    fn select_binary(&mut self, inst: InstId) -> Option<()> {
        let InstKind::Binary {
            op,
            mut lhs,
            mut rhs,
            exact,
        } = self.func.inst(inst).kind.clone()
        else {
            return None;
        };
        let result = self.func.inst_result(inst)?;
        let ty = self.func.value_val_type(result)?;
        if !self.isa.is_legal_type(ty) && self.isa.promoted_type(ty).is_none() {
            return None;
        }

        if self.try_fold_binary_load(inst, op, lhs, rhs) {
            return Some(());
        }

        if op.is_commutative()
            && self.func.value_def(lhs).is_const()
            && !self.func.value_def(rhs).is_const()
        {
            std::mem::swap(&mut lhs, &mut rhs);
        }
        let gop = binop_generic(op)?;
        let lhs_reg = self.reg_for_value(lhs)?;

        let reg = if let Some(c) = self.const_int_sext(rhs) {
            if op == BinOp::SDiv && exact && c > 0 && (c as u64).is_power_of_two() {
                let shift = i64::from((c as u64).trailing_zeros());
                self.emit_ri_auto(GenericOp::AShr, ty, lhs_reg, shift)?
            } else if op == BinOp::URem && c > 0 && (c as u64).is_power_of_two() {
                self.emit_ri_auto(GenericOp::And, ty, lhs_reg, c - 1)?
            } else {
                self.emit_ri_auto(gop, ty, lhs_reg, c)?
            }
        } else {
            let rhs_reg = self.reg_for_value(rhs)?;
            self.emit_rr(gop, ty, lhs_reg, rhs_reg)?
        };
        self.update_value_map(result, reg, 1);
        Some(())
    }

    fn select_fneg(&mut self, inst: InstId) -> Option<()> {
        let InstKind::FNeg { arg } = self.func.inst(inst).kind else {
            return None;
        };
        let result = self.func.inst_result(inst)?;
        let ty = self.func.value_val_type(result)?;
        let entry = self.isa.lookup(GenericOp::FNeg, ty)?;
        let reg = self.reg_for_value(arg)?;
        let dst = self.build_inst_r(entry, reg);
        self.update_value_map(result, dst, 1);
        Some(())
    }

    fn select_cast(&mut self, inst: InstId) -> Option<()> {
        let InstKind::Cast { op, arg } = self.func.inst(inst).kind.clone() else {
            return None;
        };
        let result = self.func.inst_result(inst)?;
        let from = self.func.value_val_type(arg)?;
        let to = self.func.value_val_type(result)?;
        let ptr_bits = self.isa.ptr_bits();

        let dst = match op {
            CastOp::Bitcast if from == to => self.reg_for_value(arg)?,
            CastOp::Bitcast if self.isa.reg_class(from) == self.isa.reg_class(to) => {
                let reg = self.reg_for_value(arg)?;
                let dst = self.new_vreg(self.isa.reg_class(to));
                self.emit_copy(dst, reg);
                dst
            }
            CastOp::IntToPtr | CastOp::PtrToInt => {
                let reg = self.reg_for_value(arg)?;
                let from_bits = from.bit_width(ptr_bits);
                let to_bits = to.bit_width(ptr_bits);
                if from_bits == to_bits {
                    reg
                } else if from_bits < to_bits {
                    self.emit_cast(GenericOp::ZExt, from, to, reg)?
                } else {
                    self.emit_cast(GenericOp::Trunc, from, to, reg)?
                }
            }
            CastOp::ZExt if from == ValType::I1 => {
                let reg = self.reg_for_value(arg)?;
                self.emit_zext_i1(reg, to)?
            }
            _ => {
                let gop = cast_generic(op);
                let reg = self.reg_for_value(arg)?;
                self.emit_cast(gop, from, to, reg)?
            }
        };
        self.update_value_map(result, dst, 1);
        Some(())
    }

    fn select_gep(&mut self, inst: InstId) -> Option<()> {
        let InstKind::Gep {
            base,
            pointee,
            indices,
        } = self.func.inst(inst).kind.clone()
        else {
            return None;
        };
        let result = self.func.inst_result(inst)?;
        let addr_ty = self.isa.addr_type();
        let ptr_bytes = u64::from(self.isa.ptr_bits() / 8);

        let mut reg = self.reg_for_value(base)?;
        let mut offset: i64 = 0;
        let mut cur_ty = pointee;

        for (i, &idx) in indices.iter().enumerate() {
            if i > 0 && matches!(cur_ty, Type::Struct(_)) {
                // Struct fields take constant indices only.
                let field = usize::try_from(self.const_int_sext(idx)?).ok()?;
                let field_off = i64::try_from(cur_ty.struct_field_offset(field, ptr_bytes)).ok()?;
                offset = offset.checked_add(field_off)?;
                let Type::Struct(fields) = cur_ty else {
                    return None;
                };
                cur_ty = fields.into_iter().nth(field)?;
            } else {
                let (elem, scale) = if i == 0 {
                    let scale = i64::try_from(cur_ty.alloc_size(ptr_bytes)).ok()?;
                    (cur_ty.clone(), scale)
                } else if let Type::Array { elem, .. } = &cur_ty {
                    let elem = (**elem).clone();
                    let scale = i64::try_from(elem.alloc_size(ptr_bytes)).ok()?;
                    (elem, scale)
                } else {
                    return None;
                };

                if let Some(c) = self.const_int_sext(idx) {
                    offset = offset.checked_add(c.checked_mul(scale)?)?;
                } else {
                    let mut idx_val = idx;
                    if self.can_fold_add_into_gep(inst, idx) {
                        let def = self.func.def_inst(idx)?;
                        let InstKind::Binary { lhs, rhs, .. } = self.func.inst(def).kind else {
                            return None;
                        };
                        let c = self.const_int_sext(rhs)?;
                        offset = offset.checked_add(c.checked_mul(scale)?)?;
                        idx_val = lhs;
                    }
                    let (idx_reg, _) = self.reg_for_gep_index(idx_val)?;
                    let scaled = if scale == 1 {
                        idx_reg
                    } else {
                        self.emit_ri_auto(GenericOp::Mul, addr_ty, idx_reg, scale)?
                    };
                    reg = self.emit_rr(GenericOp::Add, addr_ty, reg, scaled)?;
                }
                cur_ty = elem;
            }

            if offset.unsigned_abs() > self.config.max_gep_offset.unsigned_abs() {
                reg = self.emit_ri_auto(GenericOp::Add, addr_ty, reg, offset)?;
                offset = 0;
            }
        }

        if offset != 0 {
            reg = self.emit_ri_auto(GenericOp::Add, addr_ty, reg, offset)?;
        }
        self.update_value_map(result, reg, 1);
        Some(())
    }

    fn select_extract_value(&mut self, inst: InstId) -> Option<()> {
        let InstKind::ExtractValue { agg, indices } = self.func.inst(inst).kind.clone() else {
            return None;
        };
        let result = self.func.inst_result(inst)?;
        let agg_ty = self.func.value_type(agg).clone();
        if agg_ty.leaf_count() == 0 {
            return None;
        }
        let base = self.reg_for_value(agg)?;
        let leaf = agg_ty.linear_leaf_index(&indices);
        let count = self.func.value_type(result).leaf_count().max(1);
        // Pure re-registration over the aggregate's consecutive registers.
        self.update_value_map(result, base.offset(leaf), count);
        Some(())
    }

    fn select_insert_value(&mut self, inst: InstId) -> Option<()> {
        let InstKind::InsertValue { agg, elem, indices } = self.func.inst(inst).kind.clone()
        else {
            return None;
        };
        let result = self.func.inst_result(inst)?;
        let agg_ty = self.func.value_type(agg).clone();
        let mut leaves = Vec::new();
        agg_ty.collect_leaves(&mut leaves);
        if leaves.is_empty() {
            return None;
        }
        let classes: SmallVec<[RegClass; 4]> =
            leaves.iter().map(|&l| self.isa.reg_class(l)).collect();

        let base = self.reg_for_value(agg)?;
        let elem_reg = self.reg_for_value(elem)?;
        let elem_leaves = self.func.value_type(elem).leaf_count().max(1);
        let at = agg_ty.linear_leaf_index(&indices);

        let dst = self.mach.new_vreg_block(&classes);
        for i in 0..classes.len() {
            let src = if (at..at + elem_leaves).contains(&i) {
                elem_reg.offset(i - at)
            } else {
                base.offset(i)
            };
            self.emit_copy(dst.offset(i), src);
        }
        self.update_value_map(result, dst, classes.len());
        Some(())
    }

    fn select_call(&mut self, inst: InstId) -> bool {
        let Some(desc) = CallDescriptor::from_call_site(self.func, inst) else {
            return false;
        };
        self.lower_call_to(&desc)
    }

    fn select_intrinsic(&mut self, inst: InstId) -> bool {
        let InstKind::IntrinsicCall { intrinsic, args } = self.func.inst(inst).kind.clone() else {
            return false;
        };
        match intrinsic {
            // Markers and hints emit nothing.
            Intrinsic::LifetimeStart
            | Intrinsic::LifetimeEnd
            | Intrinsic::Assume
            | Intrinsic::DoNothing => true,
            Intrinsic::Expect => {
                let Some(&first) = args.first() else {
                    return false;
                };
                let Some(reg) = self.reg_for_value(first) else {
                    return false;
                };
                let Some(result) = self.func.inst_result(inst) else {
                    return false;
                };
                let count = self.func.value_type(result).leaf_count().max(1);
                self.update_value_map(result, reg, count);
                true
            }
            Intrinsic::Trap => self.emit_nullary(GenericOp::Trap, ValType::I64),
            Intrinsic::StackMap => self.select_stackmap(inst),
            Intrinsic::PatchPoint => self.select_patchpoint(inst),
            _ => {
                let hooks = self.hooks;
                hooks.lower_intrinsic(self, inst)
            }
        }
    }

    fn select_br(&mut self, inst: InstId) -> Option<()> {
        let InstKind::Br { dest } = self.func.inst(inst).kind else {
            return None;
        };
        if !self.handle_phi_nodes() {
            return None;
        }
        self.emit_branch(dest).then_some(())
    }

    fn select_unreachable(&mut self) -> bool {
        if self.config.trap_unreachable {
            self.emit_nullary(GenericOp::Trap, ValType::I64)
        } else {
            true
        }
    }

    // =========================================================================
    // Folds
    // =========================================================================

    /// Check whether `add` can fold into the address computation of `gep`:
    /// an integer addition with a constant second operand, at the
    /// addressing width, defined in the same block.
    #[must_use]
    pub fn can_fold_add_into_gep(&self, gep: InstId, add: ValueId) -> bool {
        let Some(def) = self.func.def_inst(add) else {
            return false;
        };
        let InstKind::Binary {
            op: BinOp::Add,
            rhs,
            ..
        } = self.func.inst(def).kind
        else {
            return false;
        };
        if self.func.inst(def).block != self.func.inst(gep).block {
            return false;
        }
        if self.const_int_sext(rhs).is_none() {
            return false;
        }
        let Some(ty) = self.func.value_val_type(add) else {
            return false;
        };
        ty.bit_width(self.isa.ptr_bits()) == self.isa.ptr_bits()
    }

    /// Whether killing `value` at its single use frees its register: the
    /// value is instruction-defined, used exactly once, in its defining
    /// block, and its register is not shared with another value through a
    /// register-reusing operation.
    #[must_use]
    pub fn has_trivial_kill(&self, value: ValueId) -> bool {
        let Some(inst) = self.func.def_inst(value) else {
            return false;
        };
        if self.is_register_reusing(inst) {
            return false;
        }
        if self.func.use_count(value) != 1 {
            return false;
        }
        let user = self.func.users(value)[0];
        self.func.inst(user).block == self.func.inst(inst).block
    }

    /// Operations whose selection re-registers an existing register
    /// instead of defining a new one.
    fn is_register_reusing(&self, inst: InstId) -> bool {
        match &self.func.inst(inst).kind {
            InstKind::Cast {
                op: CastOp::Bitcast,
                arg,
            } => match (
                self.func.value_val_type(*arg),
                self.func.inst(inst).ty.as_val(),
            ) {
                (Some(from), Some(to)) => self.isa.reg_class(from) == self.isa.reg_class(to),
                _ => false,
            },
            InstKind::Cast {
                op: CastOp::IntToPtr | CastOp::PtrToInt,
                arg,
            } => match (
                self.func.value_val_type(*arg),
                self.func.inst(inst).ty.as_val(),
            ) {
                (Some(from), Some(to)) => {
                    let bits = self.isa.ptr_bits();
                    from.bit_width(bits) == to.bit_width(bits)
                }
                _ => false,
            },
            InstKind::ExtractValue { .. } => true,
            InstKind::Gep { indices, .. } => indices
                .iter()
                .all(|&idx| self.const_int_sext(idx) == Some(0)),
            _ => false,
        }
    }

    fn try_fold_binary_load(
        &mut self,
        inst: InstId,
        op: BinOp,
        lhs: ValueId,
        rhs: ValueId,
    ) -> bool {
        if let Some(load) = self.load_def(rhs) {
            if self.try_fold_load(load, inst) {
                return true;
            }
        }
        if op.is_commutative() {
            if let Some(load) = self.load_def(lhs) {
                if self.try_fold_load(load, inst) {
                    return true;
                }
            }
        }
        false
    }

    fn load_def(&self, value: ValueId) -> Option<InstId> {
        let def = self.func.def_inst(value)?;
        matches!(self.func.inst(def).kind, InstKind::Load { .. }).then_some(def)
    }

    /// Fuse `load` into `user` as a memory operand.
    ///
    /// The generic layer certifies legality: a non-volatile load with one
    /// use, same block, no intervening memory write or call, whose
    /// register no emitted instruction reads yet. The target hook performs
    /// the rewrite; declining is not an error. On success the standalone
    /// load definition is deleted.
    pub fn try_fold_load(&mut self, load: InstId, user: InstId) -> bool {
        if !self.config.enable_load_folding {
            return false;
        }
        let InstKind::Load { volatile, .. } = self.func.inst(load).kind else {
            return false;
        };
        if volatile {
            return false;
        }
        let Some(result) = self.func.inst_result(load) else {
            return false;
        };
        if !self.has_trivial_kill(result) {
            return false;
        }
        if self.func.users(result) != [user] {
            return false;
        }
        if self.func.inst(load).block != self.cur_block
            || self.func.inst(user).block != self.cur_block
        {
            return false;
        }
        let load_pos = self.func.block_position(load);
        let user_pos = self.func.block_position(user);
        if load_pos >= user_pos {
            return false;
        }
        for &mid in &self.func.block_insts(self.cur_block)[load_pos + 1..user_pos] {
            match &self.func.inst(mid).kind {
                InstKind::Store { .. } | InstKind::Call { .. } => return false,
                InstKind::IntrinsicCall { intrinsic, .. } => match intrinsic {
                    Intrinsic::MemCpy
                    | Intrinsic::Trap
                    | Intrinsic::StackMap
                    | Intrinsic::PatchPoint => return false,
                    _ => {}
                },
                _ => {}
            }
        }
        // The load must be emitted, and its register still unread.
        let Some(reg) = self.ctx.value_reg(result) else {
            return false;
        };
        if self.vreg_use_count(reg) != 0 {
            return false;
        }

        let hooks = self.hooks;
        if !hooks.fold_load(self, user, load) {
            return false;
        }
        self.delete_def(reg);
        self.stats.loads_folded += 1;
        true
    }

    /// Delete the instruction defining `reg` from the current block.
    fn delete_def(&mut self, reg: VReg) {
        let block = self.mach.block_mut(self.cur_block);
        let Some(idx) = block.insts.iter().position(|i| i.virt_def() == Some(reg)) else {
            return;
        };
        let removed = block.insts.remove(idx);
        self.note_reg_uses(&removed, false);
        self.cursor.rolled_back(self.cursor.insert_index() - 1);
    }

    // =========================================================================
    // Helpers
    // =========================================================================

    /// The sign-extended payload of an integer-constant value.
    #[must_use]
    pub(crate) fn const_int_sext(&self, value: ValueId) -> Option<i64> {
        self.func
            .value_def(value)
            .const_val()
            .and_then(|c| c.as_int_sext(self.isa.ptr_bits()))
    }
}

fn binop_generic(op: BinOp) -> Option<GenericOp> {
    Some(match op {
        BinOp::Add => GenericOp::Add,
        BinOp::Sub => GenericOp::Sub,
        BinOp::Mul => GenericOp::Mul,
        BinOp::SDiv => GenericOp::SDiv,
        BinOp::UDiv => GenericOp::UDiv,
        BinOp::SRem => GenericOp::SRem,
        BinOp::URem => GenericOp::URem,
        BinOp::And => GenericOp::And,
        BinOp::Or => GenericOp::Or,
        BinOp::Xor => GenericOp::Xor,
        BinOp::Shl => GenericOp::Shl,
        BinOp::LShr => GenericOp::LShr,
        BinOp::AShr => GenericOp::AShr,
        BinOp::FAdd => GenericOp::FAdd,
        BinOp::FSub => GenericOp::FSub,
        BinOp::FMul => GenericOp::FMul,
        BinOp::FDiv => GenericOp::FDiv,
        // No direct float-remainder instruction; the general selector
        // expands it to a library call.
        BinOp::FRem => return None,
    })
}

fn cast_generic(op: CastOp) -> GenericOp {
    match op {
        CastOp::Trunc => GenericOp::Trunc,
        CastOp::ZExt => GenericOp::ZExt,
        CastOp::SExt => GenericOp::SExt,
        CastOp::FpToUi => GenericOp::FpToUi,
        CastOp::FpToSi => GenericOp::FpToSi,
        CastOp::UiToFp => GenericOp::UiToFp,
        CastOp::SiToFp => GenericOp::SiToFp,
        CastOp::FpTrunc => GenericOp::FpTrunc,
        CastOp::FpExt => GenericOp::FpExt,
        CastOp::PtrToInt => GenericOp::Trunc,
        CastOp::IntToPtr => GenericOp::ZExt,
        CastOp::Bitcast => GenericOp::Bitcast,
    }
}

// =============================================================================
// Tests
// =============================================================================
