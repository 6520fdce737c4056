//! End-to-end selection over the x86-64 reference target.
//!
//! These tests drive [`select_function`] over whole IR functions and check
//! the machine code shape, the failure protocol, and the statistics the
//! engine reports.

use sparrow_ir::{
    BinOp, BlockId, Function, FunctionBuilder, IntCmp, Intrinsic, Param, Signature, Span, Type,
    ValType,
};
use sparrow_isel::target::x64::{self, ops, X64Target};
use sparrow_isel::{
    select_function, MachFunction, MachOperand, MachReg, Opcode, SelectError, SelectStats,
    SelectorConfig,
};

fn select(func: &Function) -> Result<(MachFunction, SelectStats), SelectError> {
    let isa = X64Target::sysv();
    select_function(func, &isa, &isa, SelectorConfig::default())
}

fn opcodes(mach: &MachFunction, block: BlockId) -> Vec<Opcode> {
    mach.block(block).insts.iter().map(|i| i.opcode).collect()
}

#[test]
fn test_straight_line_arithmetic() {
    let sig = Signature::new(
        vec![Param::plain(Type::I64), Param::plain(Type::I64)],
        Type::I64,
    );
    let mut b = FunctionBuilder::new("add2", sig);
    let entry = b.create_block();
    b.switch_to_block(entry);
    let x = b.arg(0);
    let y = b.arg(1);
    let sum = b.binary(BinOp::Add, x, y, Span::dummy());
    b.ret(Some(sum), Span::dummy());
    let func = b.finalize();

    let (mach, stats) = select(&func).unwrap();
    assert_eq!(
        opcodes(&mach, func.entry_block()),
        vec![
            Opcode::COPY,
            Opcode::COPY,
            ops::ADD64_RR,
            Opcode::COPY,
            ops::RET,
        ]
    );
    // The result lands in rax.
    let insts = &mach.block(func.entry_block()).insts;
    assert_eq!(insts[3].defs[0], MachReg::Phys(x64::RAX));
    assert_eq!(stats.num_generic, 1);
    assert_eq!(stats.num_hook, 1);
    assert_eq!(stats.num_failed, 0);
}

#[test]
fn test_constant_operand_uses_immediate_form() {
    let sig = Signature::new(vec![], Type::I32);
    let mut b = FunctionBuilder::new("answer", sig);
    let entry = b.create_block();
    b.switch_to_block(entry);
    let forty = b.const_int(ValType::I32, 40);
    let two = b.const_int(ValType::I32, 2);
    let sum = b.binary(BinOp::Add, forty, two, Span::dummy());
    b.ret(Some(sum), Span::dummy());
    let func = b.finalize();

    let (mach, stats) = select(&func).unwrap();
    // One operand is materialized, the other is absorbed as an immediate.
    assert_eq!(
        opcodes(&mach, func.entry_block()),
        vec![ops::MOV32_RI, ops::ADD32_RI, Opcode::COPY, ops::RET]
    );
    assert_eq!(stats.materializations, 1);
}

#[test]
fn test_diamond_with_phi() {
    let sig = Signature::new(
        vec![Param::plain(Type::I32), Param::plain(Type::I32)],
        Type::I32,
    );
    let mut b = FunctionBuilder::new("min", sig);
    let entry = b.create_block();
    let then_bb = b.create_block();
    let else_bb = b.create_block();
    let join = b.create_block();

    b.switch_to_block(entry);
    let x = b.arg(0);
    let y = b.arg(1);
    let cond = b.icmp(IntCmp::Slt, x, y, Span::dummy());
    b.cond_br(cond, then_bb, else_bb, Span::dummy());

    b.switch_to_block(then_bb);
    b.br(join, Span::dummy());
    b.switch_to_block(else_bb);
    b.br(join, Span::dummy());

    b.switch_to_block(join);
    let merged = b.phi(Type::I32, vec![(then_bb, x), (else_bb, y)], Span::dummy());
    b.ret(Some(merged), Span::dummy());
    let func = b.finalize();

    let (mach, stats) = select(&func).unwrap();
    assert_eq!(stats.num_failed, 0);

    let entry_ops = opcodes(&mach, entry);
    assert!(entry_ops.contains(&ops::CMP32_RR));
    assert!(entry_ops.contains(&ops::SETCC));
    assert!(entry_ops.contains(&ops::JCC));
    assert_eq!(mach.block(entry).succs.as_slice(), &[then_bb, else_bb]);

    // The machine PHI carries one (register, predecessor) pair per edge.
    let phi = &mach.block(join).insts[0];
    assert!(phi.is_phi());
    assert_eq!(phi.ops.len(), 4);
    assert_eq!(phi.ops[1], MachOperand::Block(then_bb));
    assert_eq!(phi.ops[3], MachOperand::Block(else_bb));
}

#[test]
fn test_load_folds_into_consumer() {
    let sig = Signature::new(
        vec![Param::plain(Type::PTR), Param::plain(Type::I64)],
        Type::I64,
    );
    let mut b = FunctionBuilder::new("addmem", sig);
    let entry = b.create_block();
    b.switch_to_block(entry);
    let p = b.arg(0);
    let x = b.arg(1);
    let v = b.load(ValType::I64, p, 8, Span::dummy());
    let sum = b.binary(BinOp::Add, x, v, Span::dummy());
    b.ret(Some(sum), Span::dummy());
    let func = b.finalize();

    let (mach, stats) = select(&func).unwrap();
    let entry_ops = opcodes(&mach, func.entry_block());
    // The standalone load is gone; the add reads memory directly.
    assert!(entry_ops.contains(&ops::ADD64_RM));
    assert!(!entry_ops.contains(&ops::MOV64_RM));
    assert_eq!(stats.loads_folded, 1);

    let fused = mach.block(func.entry_block()).insts[2].clone();
    assert_eq!(fused.opcode, ops::ADD64_RM);
    assert_eq!(fused.mem_info.unwrap().size, 8);
}

#[test]
fn test_volatile_load_never_folds() {
    let sig = Signature::new(
        vec![Param::plain(Type::PTR), Param::plain(Type::I64)],
        Type::I64,
    );
    let mut b = FunctionBuilder::new("addvol", sig);
    let entry = b.create_block();
    b.switch_to_block(entry);
    let p = b.arg(0);
    let x = b.arg(1);
    let v = b.load_volatile(ValType::I64, p, 8, Span::dummy());
    let sum = b.binary(BinOp::Add, x, v, Span::dummy());
    b.ret(Some(sum), Span::dummy());
    let func = b.finalize();

    let (mach, stats) = select(&func).unwrap();
    let entry_ops = opcodes(&mach, func.entry_block());
    assert!(entry_ops.contains(&ops::MOV64_RM));
    assert!(entry_ops.contains(&ops::ADD64_RR));
    assert_eq!(stats.loads_folded, 0);
}

#[test]
fn test_unsupported_instruction_reports_error() {
    let sig = Signature::new(
        vec![Param::plain(Type::F64), Param::plain(Type::F64)],
        Type::F64,
    );
    let mut b = FunctionBuilder::new("frem", sig);
    let entry = b.create_block();
    b.switch_to_block(entry);
    let x = b.arg(0);
    let y = b.arg(1);
    // No FRem instruction exists; it needs a library-call expansion.
    let r = b.binary(BinOp::FRem, x, y, Span::dummy());
    b.ret(Some(r), Span::dummy());
    let func = b.finalize();

    let err = select(&func).unwrap_err();
    assert!(matches!(err, SelectError::UnsupportedInst { .. }));
}

#[test]
fn test_stack_arguments_fail_argument_lowering() {
    let make = |n: usize| {
        let sig = Signature::new(vec![Param::plain(Type::I64); n], Type::Void);
        let mut b = FunctionBuilder::new("many", sig);
        let entry = b.create_block();
        b.switch_to_block(entry);
        b.ret(None, Span::dummy());
        b.finalize()
    };

    // Seven integer arguments overflow the six System V registers.
    let err = select(&make(7)).unwrap_err();
    assert!(matches!(err, SelectError::ArgLowering));

    // Five fit on System V but not in Win64's four shared positions.
    assert!(select(&make(5)).is_ok());
    let win = X64Target::win64();
    let err = select_function(&make(5), &win, &win, SelectorConfig::default()).unwrap_err();
    assert!(matches!(err, SelectError::ArgLowering));
}

#[test]
fn test_gep_then_store() {
    let sig = Signature::new(vec![Param::plain(Type::PTR)], Type::Void);
    let mut b = FunctionBuilder::new("put", sig);
    let entry = b.create_block();
    b.switch_to_block(entry);
    let p = b.arg(0);
    let one = b.const_int(ValType::I64, 1);
    let q = b.gep(p, Type::I64, vec![one], Span::dummy());
    let seven = b.const_int(ValType::I64, 7);
    b.store(seven, q, 8, Span::dummy());
    b.ret(None, Span::dummy());
    let func = b.finalize();

    let (mach, stats) = select(&func).unwrap();
    assert_eq!(stats.num_failed, 0);
    let entry_ops = opcodes(&mach, func.entry_block());
    // The constant index becomes a displacement add; the store keeps its
    // access metadata.
    assert!(entry_ops.contains(&ops::ADD64_RI));
    let store = mach
        .block(func.entry_block())
        .insts
        .iter()
        .find(|i| i.opcode == ops::MOV64_MR)
        .unwrap();
    assert_eq!(store.mem_info.unwrap().size, 8);
    assert!(!store.mem_info.unwrap().volatile);
}

#[test]
fn test_call_emits_symbol_and_clobbers() {
    let sig = Signature::new(vec![], Type::Void);
    let mut b = FunctionBuilder::new("caller", sig);
    let entry = b.create_block();
    b.switch_to_block(entry);
    let callee = b.global("print");
    b.call(callee, vec![], Type::Void, Span::dummy());
    b.ret(None, Span::dummy());
    let func = b.finalize();

    let (mach, _) = select(&func).unwrap();
    let call = mach
        .block(func.entry_block())
        .insts
        .iter()
        .find(|i| i.opcode == ops::CALL_SYM)
        .unwrap();
    assert!(call
        .ops
        .iter()
        .any(|op| matches!(op, MachOperand::Symbol(s) if &**s == "print")));
    assert!(call
        .ops
        .iter()
        .any(|op| matches!(op, MachOperand::Clobbers(_))));
}

#[test]
fn test_call_invalidates_cached_constants() {
    let sig = Signature::new(vec![Param::plain(Type::PTR)], Type::Void);
    let mut b = FunctionBuilder::new("twice", sig);
    let entry = b.create_block();
    b.switch_to_block(entry);
    let p = b.arg(0);
    let c = b.const_int(ValType::I32, 5);
    b.store(c, p, 4, Span::dummy());
    let callee = b.global("touch");
    b.call(callee, vec![], Type::Void, Span::dummy());
    b.store(c, p, 4, Span::dummy());
    b.ret(None, Span::dummy());
    let func = b.finalize();

    let (mach, stats) = select(&func).unwrap();
    let count = mach
        .block(func.entry_block())
        .insts
        .iter()
        .filter(|i| i.opcode == ops::MOV32_RI)
        .count();
    // Rematerialized after the call instead of reusing a clobberable
    // register.
    assert_eq!(count, 2);
    assert_eq!(stats.materializations, 2);
}

#[test]
fn test_unreachable_respects_trap_config() {
    let build = || {
        let sig = Signature::new(vec![], Type::Void);
        let mut b = FunctionBuilder::new("dead", sig);
        let entry = b.create_block();
        b.switch_to_block(entry);
        b.unreachable(Span::dummy());
        b.finalize()
    };
    let isa = X64Target::sysv();

    let func = build();
    let (mach, _) = select_function(&func, &isa, &isa, SelectorConfig::default()).unwrap();
    assert!(mach.block(func.entry_block()).insts.is_empty());

    let config = SelectorConfig {
        trap_unreachable: true,
        ..SelectorConfig::default()
    };
    let (mach, _) = select_function(&func, &isa, &isa, config).unwrap();
    assert_eq!(opcodes(&mach, func.entry_block()), vec![ops::UD2]);
}

#[test]
fn test_overflow_intrinsic_lowers_through_hook() {
    let sig = Signature::new(
        vec![Param::plain(Type::I32), Param::plain(Type::I32)],
        Type::I32,
    );
    let mut b = FunctionBuilder::new("checked", sig);
    let entry = b.create_block();
    b.switch_to_block(entry);
    let x = b.arg(0);
    let y = b.arg(1);
    let pair = b.overflow_arith(Intrinsic::SAddOverflow, x, y, Span::dummy());
    let value = b.extract_value(pair, vec![0], Span::dummy());
    b.ret(Some(value), Span::dummy());
    let func = b.finalize();

    let (mach, stats) = select(&func).unwrap();
    assert_eq!(stats.num_failed, 0);
    let entry_ops = opcodes(&mach, func.entry_block());
    assert!(entry_ops.contains(&ops::ADD32_RR));
    assert!(entry_ops.contains(&ops::SETCC));
}

#[test]
fn test_float_constant_loads_from_pool() {
    let sig = Signature::new(vec![Param::plain(Type::F64)], Type::F64);
    let mut b = FunctionBuilder::new("double", sig);
    let entry = b.create_block();
    b.switch_to_block(entry);
    let x = b.arg(0);
    let two = b.const_f64(2.0);
    let r = b.binary(BinOp::FMul, x, two, Span::dummy());
    b.ret(Some(r), Span::dummy());
    let func = b.finalize();

    let (mach, _) = select(&func).unwrap();
    let entry_ops = opcodes(&mach, func.entry_block());
    assert!(entry_ops.contains(&ops::MOVSD_CP));
    assert!(entry_ops.contains(&ops::MULSD));
    // The float result returns in xmm0.
    let insts = &mach.block(func.entry_block()).insts;
    let ret_copy = &insts[insts.len() - 2];
    assert_eq!(ret_copy.opcode, Opcode::COPY);
    assert_eq!(
        ret_copy.defs[0],
        MachReg::Phys(sparrow_isel::PReg::float(0))
    );
}
