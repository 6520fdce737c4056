//! Fast-Path Selection Benchmarks
//!
//! Measures end-to-end selection throughput over the x86-64 reference
//! target: straight-line arithmetic, branchy control flow with PHIs,
//! memory traffic with load folding on and off, and call-heavy code.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use sparrow_ir::{
    BinOp, Function, FunctionBuilder, IntCmp, Param, Signature, Span, Type, ValType,
};
use sparrow_isel::target::x64::X64Target;
use sparrow_isel::{select_function, SelectorConfig};

// =============================================================================
// Workload Construction
// =============================================================================

/// A single block of `n` dependent adds, half with immediate operands.
fn arith_chain(n: usize) -> Function {
    let sig = Signature::new(vec![Param::plain(Type::I64)], Type::I64);
    let mut b = FunctionBuilder::new("chain", sig);
    let entry = b.create_block();
    b.switch_to_block(entry);
    let mut acc = b.arg(0);
    for i in 0..n {
        let rhs = if i % 2 == 0 {
            b.const_int(ValType::I64, i as u64 + 1)
        } else {
            acc
        };
        acc = b.binary(BinOp::Add, acc, rhs, Span::dummy());
    }
    b.ret(Some(acc), Span::dummy());
    b.finalize()
}

/// `n` chained diamonds, each merging through a PHI.
fn diamond_chain(n: usize) -> Function {
    let sig = Signature::new(
        vec![Param::plain(Type::I32), Param::plain(Type::I32)],
        Type::I32,
    );
    let mut b = FunctionBuilder::new("diamonds", sig);
    let entry = b.create_block();
    b.switch_to_block(entry);
    let mut acc = b.arg(0);
    let limit = b.arg(1);
    let mut cur = entry;
    for _ in 0..n {
        let then_bb = b.create_block();
        let else_bb = b.create_block();
        let join = b.create_block();

        b.switch_to_block(cur);
        let cond = b.icmp(IntCmp::Slt, acc, limit, Span::dummy());
        b.cond_br(cond, then_bb, else_bb, Span::dummy());

        b.switch_to_block(then_bb);
        let one = b.const_int(ValType::I32, 1);
        let inc = b.binary(BinOp::Add, acc, one, Span::dummy());
        b.br(join, Span::dummy());

        b.switch_to_block(else_bb);
        let two = b.const_int(ValType::I32, 2);
        let dec = b.binary(BinOp::Sub, acc, two, Span::dummy());
        b.br(join, Span::dummy());

        b.switch_to_block(join);
        acc = b.phi(
            Type::I32,
            vec![(then_bb, inc), (else_bb, dec)],
            Span::dummy(),
        );
        cur = join;
    }
    b.switch_to_block(cur);
    b.ret(Some(acc), Span::dummy());
    b.finalize()
}

/// `n` load-add pairs over one pointer, each a folding opportunity.
fn load_chain(n: usize) -> Function {
    let sig = Signature::new(
        vec![Param::plain(Type::PTR), Param::plain(Type::I64)],
        Type::I64,
    );
    let mut b = FunctionBuilder::new("loads", sig);
    let entry = b.create_block();
    b.switch_to_block(entry);
    let p = b.arg(0);
    let mut acc = b.arg(1);
    for i in 0..n {
        let idx = b.const_int(ValType::I64, i as u64);
        let q = b.gep(p, Type::I64, vec![idx], Span::dummy());
        let v = b.load(ValType::I64, q, 8, Span::dummy());
        acc = b.binary(BinOp::Add, acc, v, Span::dummy());
    }
    b.ret(Some(acc), Span::dummy());
    b.finalize()
}

/// `n` void calls to one symbol.
fn call_chain(n: usize) -> Function {
    let sig = Signature::new(vec![Param::plain(Type::I64)], Type::Void);
    let mut b = FunctionBuilder::new("calls", sig);
    let entry = b.create_block();
    b.switch_to_block(entry);
    let x = b.arg(0);
    let callee = b.global("tick");
    for _ in 0..n {
        b.call(callee, vec![x], Type::Void, Span::dummy());
    }
    b.ret(None, Span::dummy());
    b.finalize()
}

fn run(func: &Function, config: &SelectorConfig) -> usize {
    let isa = X64Target::sysv();
    let (mach, stats) = select_function(func, &isa, &isa, config.clone()).unwrap();
    black_box(mach);
    stats.num_selected()
}

// =============================================================================
// Straight-Line Code
// =============================================================================

fn bench_arith(c: &mut Criterion) {
    let mut group = c.benchmark_group("arith");
    let config = SelectorConfig::default();

    for n in [16, 64, 256] {
        let func = arith_chain(n);
        group.throughput(Throughput::Elements(n as u64));
        group.bench_with_input(BenchmarkId::from_parameter(n), &func, |b, f| {
            b.iter(|| run(f, &config))
        });
    }

    group.finish();
}

// =============================================================================
// Control Flow
// =============================================================================

fn bench_diamonds(c: &mut Criterion) {
    let mut group = c.benchmark_group("diamonds");
    let config = SelectorConfig::default();

    for n in [4, 16, 64] {
        let func = diamond_chain(n);
        group.throughput(Throughput::Elements(n as u64));
        group.bench_with_input(BenchmarkId::from_parameter(n), &func, |b, f| {
            b.iter(|| run(f, &config))
        });
    }

    group.finish();
}

// =============================================================================
// Memory Traffic
// =============================================================================

fn bench_loads(c: &mut Criterion) {
    let mut group = c.benchmark_group("loads");
    let func = load_chain(64);

    let folding = SelectorConfig::default();
    group.bench_function("folding_on", |b| b.iter(|| run(&func, &folding)));

    let no_folding = SelectorConfig {
        enable_load_folding: false,
        ..SelectorConfig::default()
    };
    group.bench_function("folding_off", |b| b.iter(|| run(&func, &no_folding)));

    group.finish();
}

// =============================================================================
// Calls
// =============================================================================

fn bench_calls(c: &mut Criterion) {
    let mut group = c.benchmark_group("calls");
    let config = SelectorConfig::default();

    for n in [4, 32] {
        let func = call_chain(n);
        group.throughput(Throughput::Elements(n as u64));
        group.bench_with_input(BenchmarkId::from_parameter(n), &func, |b, f| {
            b.iter(|| run(f, &config))
        });
    }

    group.finish();
}

criterion_group!(
    select_benches,
    bench_arith,
    bench_diamonds,
    bench_loads,
    bench_calls,
);

criterion_main!(select_benches);
