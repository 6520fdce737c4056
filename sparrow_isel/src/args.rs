//! Formal-parameter lowering.
//!
//! Runs once per function, before any block is selected, and is
//! all-or-nothing: either every formal gets a register in the cross-block
//! map, or the whole function is handed to general selection. The target's
//! [`lower_arguments`](crate::target::TargetHooks::lower_arguments) hook is
//! offered the job first; the generic routine covers register-located
//! scalar formals of a recognized convention.

use crate::select::FastSelector;
use crate::target::call_conv::{ArgAssigner, ArgLoc};

impl<'a> FastSelector<'a> {
    /// Lower the formal parameters into the entry block. False means the
    /// function cannot be selected on the fast path at all.
    pub(crate) fn lower_arguments(&mut self) -> bool {
        let hooks = self.hooks;
        if hooks.lower_arguments(self) {
            return true;
        }
        let save = self.savepoint();
        if self.lower_arguments_generic() {
            true
        } else {
            self.rollback_to(save);
            false
        }
    }

    fn lower_arguments_generic(&mut self) -> bool {
        let func = self.func;
        let Some(info) = self.isa.call_conv_info(func.sig.conv) else {
            return false;
        };
        let mut assigner = ArgAssigner::new(info);

        for (index, param) in func.sig.params.iter().enumerate() {
            if param.attrs.is_memory_shaped() {
                return false;
            }
            // Aggregate and stack-located formals need frame layout the
            // fast path does not negotiate.
            let Some(ty) = param.ty.as_val() else {
                return false;
            };
            let Some(value) = func.arg_value(index) else {
                return false;
            };
            let pass_ty = self.isa.promoted_type(ty).unwrap_or(ty);
            let class = self.isa.reg_class(pass_ty);
            match assigner.next(class) {
                ArgLoc::Reg(p) => {
                    let v = self.new_vreg(class);
                    self.emit_copy(v, p);
                    self.ctx.set_value_reg(value, v, 1);
                }
                ArgLoc::Stack(_) => return false,
            }
        }
        true
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use crate::config::SelectorConfig;
    use crate::context::LowerCtx;
    use crate::mach::{MachFunction, MachOperand, MachReg, Opcode};
    use crate::select::FastSelector;
    use crate::target::x64::{X64Target, SYSV_INFO};
    use sparrow_ir::inst::{ArgAttrs, CallConv};
    use sparrow_ir::{Function, FunctionBuilder, Param, Signature, Span, Type};

    fn build_func(params: Vec<Param>, conv: CallConv) -> Function {
        let mut sig = Signature::new(params, Type::Void);
        sig.conv = conv;
        let mut b = FunctionBuilder::new("f", sig);
        let entry = b.create_block();
        b.switch_to_block(entry);
        b.ret(None, Span::dummy());
        b.finalize()
    }

    fn lower(func: &Function) -> (bool, MachFunction, usize) {
        let isa = X64Target::sysv();
        let mut mach = MachFunction::new(func.name.clone(), func.num_blocks());
        let mut ctx = LowerCtx::new(func, &isa, &mut mach);
        let mut sel = FastSelector::new(
            func,
            &isa,
            &isa,
            &mut ctx,
            &mut mach,
            SelectorConfig::default(),
        );
        sel.start_block(func.entry_block());
        let ok = sel.lower_arguments();
        let mapped = (0..func.sig.num_params())
            .filter(|&i| {
                func.arg_value(i)
                    .and_then(|v| sel.ctx.value_reg(v))
                    .is_some()
            })
            .count();
        drop(sel);
        drop(ctx);
        (ok, mach, mapped)
    }

    #[test]
    fn test_scalar_args_copied_from_convention_registers() {
        let func = build_func(
            vec![Param::plain(Type::I64), Param::plain(Type::F64)],
            CallConv::C,
        );
        let (ok, mach, mapped) = lower(&func);
        assert!(ok);
        assert_eq!(mapped, 2);

        let insts = &mach.block(func.entry_block()).insts;
        assert_eq!(insts.len(), 2);
        assert_eq!(insts[0].opcode, Opcode::COPY);
        assert_eq!(
            insts[0].ops[0],
            MachOperand::Reg(MachReg::Phys(SYSV_INFO.int_args[0]))
        );
        assert_eq!(
            insts[1].ops[0],
            MachOperand::Reg(MachReg::Phys(SYSV_INFO.float_args[0]))
        );
    }

    #[test]
    fn test_small_ints_assigned_at_promoted_width() {
        let func = build_func(
            vec![Param::plain(Type::I8), Param::plain(Type::I64)],
            CallConv::C,
        );
        let (ok, _, mapped) = lower(&func);
        assert!(ok);
        assert_eq!(mapped, 2);
    }

    #[test]
    fn test_stack_located_formal_fails_whole_function() {
        let n = SYSV_INFO.int_args.len() + 1;
        let func = build_func(vec![Param::plain(Type::I64); n], CallConv::C);
        let (ok, mach, _) = lower(&func);
        assert!(!ok);
        // All-or-nothing: the copies for in-register formals were rolled
        // back too.
        assert!(mach.block(func.entry_block()).insts.is_empty());
    }

    #[test]
    fn test_memory_shaped_formal_fails() {
        let param = Param {
            ty: Type::PTR,
            attrs: ArgAttrs::none().with_byval(),
        };
        let func = build_func(vec![param], CallConv::C);
        let (ok, _, _) = lower(&func);
        assert!(!ok);
    }

    #[test]
    fn test_aggregate_formal_fails() {
        let func = build_func(
            vec![Param::plain(Type::Struct(vec![Type::I32, Type::I32]))],
            CallConv::C,
        );
        let (ok, _, _) = lower(&func);
        assert!(!ok);
    }

    #[test]
    fn test_unknown_convention_fails() {
        let func = build_func(vec![Param::plain(Type::I64)], CallConv::Cold);
        let (ok, _, _) = lower(&func);
        assert!(!ok);
    }
}
