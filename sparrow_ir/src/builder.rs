//! Incremental construction of [`Function`]s.
//!
//! The builder appends instructions to a current block, interns constants,
//! and on [`finalize`](FunctionBuilder::finalize) computes the use table and
//! freezes the function. Frontends and tests build IR here; nothing mutates
//! a [`Function`] afterwards.
//!
//! # Usage
//!
//! ```ignore
//! let sig = Signature::new(vec![Param::plain(Type::I32)], Type::I32);
//! let mut b = FunctionBuilder::new("double", sig);
//! let entry = b.create_block();
//! b.switch_to_block(entry);
//! let x = b.arg(0);
//! let two = b.const_int(ValType::I32, 2);
//! let prod = b.binary(BinOp::Mul, x, two, Span::dummy());
//! b.ret(Some(prod), Span::dummy());
//! let func = b.finalize();
//! ```

use rustc_hash::FxHashMap;
use smallvec::SmallVec;

use crate::func::{BlockData, BlockId, Function, Signature};
use crate::inst::{
    ArgAttrs, BinOp, CallConv, CastOp, FloatCmp, InstData, InstId, InstKind, IntCmp, Intrinsic,
};
use crate::span::Span;
use crate::types::{Type, ValType};
use crate::value::{ConstVal, ValueDef, ValueId};

/// Builds one [`Function`].
pub struct FunctionBuilder {
    name: String,
    sig: Signature,
    blocks: Vec<BlockData>,
    insts: Vec<InstData>,
    values: Vec<ValueDef>,
    value_types: Vec<Type>,
    inst_results: Vec<Option<ValueId>>,
    consts: FxHashMap<ConstVal, ValueId>,
    globals: FxHashMap<String, ValueId>,
    args: Vec<ValueId>,
    current: Option<BlockId>,
}

impl FunctionBuilder {
    /// Start building a function with the given name and signature.
    ///
    /// One value per formal parameter is created up front; fetch them with
    /// [`arg`](Self::arg).
    #[must_use]
    pub fn new(name: impl Into<String>, sig: Signature) -> Self {
        let mut b = Self {
            name: name.into(),
            sig,
            blocks: Vec::new(),
            insts: Vec::new(),
            values: Vec::new(),
            value_types: Vec::new(),
            inst_results: Vec::new(),
            consts: FxHashMap::default(),
            globals: FxHashMap::default(),
            args: Vec::new(),
            current: None,
        };
        for index in 0..b.sig.params.len() {
            let ty = b.sig.params[index].ty.clone();
            let v = b.make_value(
                ValueDef::Arg {
                    index: index as u32,
                },
                ty,
            );
            b.args.push(v);
        }
        b
    }

    /// The value of the `index`-th formal parameter.
    ///
    /// # Panics
    ///
    /// Panics if the index is out of range.
    #[inline]
    #[must_use]
    pub fn arg(&self, index: usize) -> ValueId {
        self.args[index]
    }

    /// Append a new empty block.
    pub fn create_block(&mut self) -> BlockId {
        let id = BlockId::new(self.blocks.len() as u32);
        self.blocks.push(BlockData::default());
        id
    }

    /// Make `block` the insertion point for subsequent instructions.
    pub fn switch_to_block(&mut self, block: BlockId) {
        self.current = Some(block);
    }

    fn make_value(&mut self, def: ValueDef, ty: Type) -> ValueId {
        let id = ValueId::new(self.values.len() as u32);
        self.values.push(def);
        self.value_types.push(ty);
        id
    }

    fn intern_const(&mut self, c: ConstVal, ty: Type) -> ValueId {
        if let Some(&existing) = self.consts.get(&c) {
            return existing;
        }
        let id = self.make_value(ValueDef::Const(c.clone()), ty);
        self.consts.insert(c, id);
        id
    }

    /// An integer constant of type `ty`; `bits` is masked to the type width.
    ///
    /// # Panics
    ///
    /// Panics if `ty` is not a fixed-width integer type.
    pub fn const_int(&mut self, ty: ValType, bits: u64) -> ValueId {
        assert!(ty.is_int(), "const_int needs an integer type, got {ty}");
        let width = ty.bit_width(64);
        let masked = if width >= 64 {
            bits
        } else {
            bits & ((1u64 << width) - 1)
        };
        self.intern_const(ConstVal::Int { ty, bits: masked }, Type::Val(ty))
    }

    /// A 32-bit float constant.
    pub fn const_f32(&mut self, value: f32) -> ValueId {
        self.intern_const(
            ConstVal::Float {
                ty: ValType::F32,
                bits: u64::from(value.to_bits()),
            },
            Type::F32,
        )
    }

    /// A 64-bit float constant.
    pub fn const_f64(&mut self, value: f64) -> ValueId {
        self.intern_const(
            ConstVal::Float {
                ty: ValType::F64,
                bits: value.to_bits(),
            },
            Type::F64,
        )
    }

    /// The null pointer constant.
    pub fn const_null_ptr(&mut self) -> ValueId {
        self.intern_const(ConstVal::NullPtr, Type::PTR)
    }

    /// A fresh undefined value of type `ty`.
    pub fn const_undef(&mut self, ty: Type) -> ValueId {
        self.make_value(ValueDef::Const(ConstVal::Undef), ty)
    }

    /// The address of the named global, interned per name.
    pub fn global(&mut self, name: &str) -> ValueId {
        if let Some(&existing) = self.globals.get(name) {
            return existing;
        }
        let id = self.make_value(
            ValueDef::Global {
                name: name.into(),
            },
            Type::PTR,
        );
        self.globals.insert(name.to_owned(), id);
        id
    }

    fn push(&mut self, kind: InstKind, ty: Type, span: Span) -> Option<ValueId> {
        let block = self.current.expect("no current block");
        debug_assert!(
            self.blocks[block.index()]
                .insts
                .last()
                .map_or(true, |&last| !self.insts[last.index()].kind.is_terminator()),
            "appending past a terminator in {block}"
        );
        let inst = InstId::new(self.insts.len() as u32);
        let result = if ty.is_void() {
            None
        } else {
            Some(self.make_value(ValueDef::Inst(inst), ty.clone()))
        };
        self.insts.push(InstData {
            kind,
            ty,
            block,
            span,
        });
        self.inst_results.push(result);
        self.blocks[block.index()].insts.push(inst);
        result
    }

    fn push_value(&mut self, kind: InstKind, ty: Type, span: Span) -> ValueId {
        self.push(kind, ty, span).expect("instruction produces no value")
    }

    /// A binary operation; the result has the left operand's type.
    pub fn binary(&mut self, op: BinOp, lhs: ValueId, rhs: ValueId, span: Span) -> ValueId {
        let ty = self.value_types[lhs.index()].clone();
        self.push_value(
            InstKind::Binary {
                op,
                lhs,
                rhs,
                exact: false,
            },
            ty,
            span,
        )
    }

    /// A division known to have no remainder.
    pub fn binary_exact(&mut self, op: BinOp, lhs: ValueId, rhs: ValueId, span: Span) -> ValueId {
        let ty = self.value_types[lhs.index()].clone();
        self.push_value(
            InstKind::Binary {
                op,
                lhs,
                rhs,
                exact: true,
            },
            ty,
            span,
        )
    }

    /// Floating-point negation.
    pub fn fneg(&mut self, arg: ValueId, span: Span) -> ValueId {
        let ty = self.value_types[arg.index()].clone();
        self.push_value(InstKind::FNeg { arg }, ty, span)
    }

    /// A conversion to `to_ty`.
    pub fn cast(&mut self, op: CastOp, arg: ValueId, to_ty: ValType, span: Span) -> ValueId {
        self.push_value(InstKind::Cast { op, arg }, Type::Val(to_ty), span)
    }

    /// An address computation over `pointee`.
    pub fn gep(
        &mut self,
        base: ValueId,
        pointee: Type,
        indices: Vec<ValueId>,
        span: Span,
    ) -> ValueId {
        self.push_value(
            InstKind::Gep {
                base,
                pointee,
                indices,
            },
            Type::PTR,
            span,
        )
    }

    /// A load of `ty` from `ptr`.
    pub fn load(&mut self, ty: ValType, ptr: ValueId, align: u32, span: Span) -> ValueId {
        self.push_value(
            InstKind::Load {
                ptr,
                volatile: false,
                align,
            },
            Type::Val(ty),
            span,
        )
    }

    /// A volatile load of `ty` from `ptr`.
    pub fn load_volatile(&mut self, ty: ValType, ptr: ValueId, align: u32, span: Span) -> ValueId {
        self.push_value(
            InstKind::Load {
                ptr,
                volatile: true,
                align,
            },
            Type::Val(ty),
            span,
        )
    }

    /// A store of `value` to `ptr`.
    pub fn store(&mut self, value: ValueId, ptr: ValueId, align: u32, span: Span) {
        self.push(
            InstKind::Store {
                value,
                ptr,
                volatile: false,
                align,
            },
            Type::Void,
            span,
        );
    }

    /// A stack allocation with a size fixed at compile time.
    pub fn alloca(&mut self, ty: Type, align: u32, span: Span) -> ValueId {
        self.push_value(
            InstKind::Alloca {
                ty,
                dynamic_count: None,
                align,
            },
            Type::PTR,
            span,
        )
    }

    /// A stack allocation sized by a runtime element count.
    pub fn dynamic_alloca(
        &mut self,
        ty: Type,
        count: ValueId,
        align: u32,
        span: Span,
    ) -> ValueId {
        self.push_value(
            InstKind::Alloca {
                ty,
                dynamic_count: Some(count),
                align,
            },
            Type::PTR,
            span,
        )
    }

    /// An integer comparison.
    pub fn icmp(&mut self, pred: IntCmp, lhs: ValueId, rhs: ValueId, span: Span) -> ValueId {
        self.push_value(InstKind::ICmp { pred, lhs, rhs }, Type::I1, span)
    }

    /// A floating-point comparison.
    pub fn fcmp(&mut self, pred: FloatCmp, lhs: ValueId, rhs: ValueId, span: Span) -> ValueId {
        self.push_value(InstKind::FCmp { pred, lhs, rhs }, Type::I1, span)
    }

    /// A C-convention call with no attributes.
    pub fn call(
        &mut self,
        callee: ValueId,
        args: Vec<ValueId>,
        ret_ty: Type,
        span: Span,
    ) -> Option<ValueId> {
        let num_args = args.len();
        self.push(
            InstKind::Call {
                callee,
                args,
                conv: CallConv::C,
                ret_attrs: ArgAttrs::none(),
                arg_attrs: vec![ArgAttrs::none(); num_args],
                no_return: false,
                tail: false,
            },
            ret_ty,
            span,
        )
    }

    /// A call with every knob exposed.
    #[allow(clippy::too_many_arguments)]
    pub fn call_with(
        &mut self,
        callee: ValueId,
        args: Vec<ValueId>,
        ret_ty: Type,
        conv: CallConv,
        ret_attrs: ArgAttrs,
        arg_attrs: Vec<ArgAttrs>,
        no_return: bool,
        tail: bool,
        span: Span,
    ) -> Option<ValueId> {
        debug_assert_eq!(args.len(), arg_attrs.len());
        self.push(
            InstKind::Call {
                callee,
                args,
                conv,
                ret_attrs,
                arg_attrs,
                no_return,
                tail,
            },
            ret_ty,
            span,
        )
    }

    /// An intrinsic call. `ret_ty` must match the intrinsic's contract.
    pub fn intrinsic(
        &mut self,
        intrinsic: Intrinsic,
        args: Vec<ValueId>,
        ret_ty: Type,
        span: Span,
    ) -> Option<ValueId> {
        self.push(InstKind::IntrinsicCall { intrinsic, args }, ret_ty, span)
    }

    /// An overflow-checking arithmetic intrinsic; the result is a
    /// `{value, i1}` pair.
    pub fn overflow_arith(
        &mut self,
        intrinsic: Intrinsic,
        lhs: ValueId,
        rhs: ValueId,
        span: Span,
    ) -> ValueId {
        debug_assert!(intrinsic.is_overflow_arith());
        let value_ty = self.value_types[lhs.index()].clone();
        let ret_ty = Type::Struct(vec![value_ty, Type::I1]);
        self.push_value(
            InstKind::IntrinsicCall {
                intrinsic,
                args: vec![lhs, rhs],
            },
            ret_ty,
            span,
        )
    }

    /// Read the element of `agg` at `indices`.
    pub fn extract_value(&mut self, agg: ValueId, indices: Vec<u32>, span: Span) -> ValueId {
        let ty = self.value_types[agg.index()].type_at_path(&indices).clone();
        self.push_value(InstKind::ExtractValue { agg, indices }, ty, span)
    }

    /// Replace the element of `agg` at `indices` with `elem`.
    pub fn insert_value(
        &mut self,
        agg: ValueId,
        elem: ValueId,
        indices: Vec<u32>,
        span: Span,
    ) -> ValueId {
        let ty = self.value_types[agg.index()].clone();
        self.push_value(InstKind::InsertValue { agg, elem, indices }, ty, span)
    }

    /// An SSA merge of the given incoming values.
    pub fn phi(&mut self, ty: Type, incoming: Vec<(BlockId, ValueId)>, span: Span) -> ValueId {
        self.push_value(InstKind::Phi { incoming }, ty, span)
    }

    /// An unconditional branch.
    pub fn br(&mut self, dest: BlockId, span: Span) {
        self.push(InstKind::Br { dest }, Type::Void, span);
    }

    /// A conditional branch.
    pub fn cond_br(&mut self, cond: ValueId, then_dest: BlockId, else_dest: BlockId, span: Span) {
        self.push(
            InstKind::CondBr {
                cond,
                then_dest,
                else_dest,
            },
            Type::Void,
            span,
        );
    }

    /// A return.
    pub fn ret(&mut self, value: Option<ValueId>, span: Span) {
        self.push(InstKind::Ret { value }, Type::Void, span);
    }

    /// An unreachable marker.
    pub fn unreachable(&mut self, span: Span) {
        self.push(InstKind::Unreachable, Type::Void, span);
    }

    /// Freeze the function: compute the use table and hand it over.
    ///
    /// # Panics
    ///
    /// Panics if any block lacks a terminator.
    #[must_use]
    pub fn finalize(self) -> Function {
        for (index, block) in self.blocks.iter().enumerate() {
            let terminated = block
                .insts
                .last()
                .is_some_and(|&last| self.insts[last.index()].kind.is_terminator());
            assert!(terminated, "b{index} has no terminator");
        }

        let mut users: Vec<SmallVec<[InstId; 2]>> = vec![SmallVec::new(); self.values.len()];
        for (index, inst) in self.insts.iter().enumerate() {
            let id = InstId::new(index as u32);
            inst.kind.for_each_use(|value| users[value.index()].push(id));
        }

        Function {
            name: self.name,
            sig: self.sig,
            blocks: self.blocks,
            insts: self.insts,
            values: self.values,
            value_types: self.value_types,
            inst_results: self.inst_results,
            users,
            consts: self.consts,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::func::Param;

    fn simple_sig() -> Signature {
        Signature::new(vec![Param::plain(Type::I32)], Type::I32)
    }

    #[test]
    fn test_build_straight_line() {
        let mut b = FunctionBuilder::new("double_it", simple_sig());
        let entry = b.create_block();
        b.switch_to_block(entry);
        let x = b.arg(0);
        let two = b.const_int(ValType::I32, 2);
        let prod = b.binary(BinOp::Mul, x, two, Span::dummy());
        b.ret(Some(prod), Span::dummy());

        let f = b.finalize();
        assert_eq!(f.num_blocks(), 1);
        assert_eq!(f.block_insts(entry).len(), 2);
        assert_eq!(f.value_type(prod), &Type::I32);
        assert_eq!(f.use_count(x), 1);
        assert_eq!(f.use_count(prod), 1);
        assert_eq!(f.def_inst(prod), Some(f.block_insts(entry)[0]));
    }

    #[test]
    fn test_const_interning() {
        let mut b = FunctionBuilder::new("f", simple_sig());
        let entry = b.create_block();
        b.switch_to_block(entry);
        let a = b.const_int(ValType::I32, 7);
        let c = b.const_int(ValType::I32, 7);
        assert_eq!(a, c);

        let narrow = b.const_int(ValType::I8, 0xFFF);
        let def = ValueDef::Const(ConstVal::Int {
            ty: ValType::I8,
            bits: 0xFF,
        });
        b.ret(Some(a), Span::dummy());
        let f = b.finalize();
        assert_eq!(f.value_def(narrow), &def);
        assert_eq!(
            f.find_const(&ConstVal::Int {
                ty: ValType::I32,
                bits: 7
            }),
            Some(a)
        );
    }

    #[test]
    fn test_globals_interned_by_name() {
        let mut b = FunctionBuilder::new("f", simple_sig());
        let entry = b.create_block();
        b.switch_to_block(entry);
        let g1 = b.global("table");
        let g2 = b.global("table");
        let other = b.global("other");
        assert_eq!(g1, g2);
        assert_ne!(g1, other);
        b.ret(Some(b.arg(0)), Span::dummy());
        let _ = b.finalize();
    }

    #[test]
    fn test_use_counts_double_use() {
        let mut b = FunctionBuilder::new("square", simple_sig());
        let entry = b.create_block();
        b.switch_to_block(entry);
        let x = b.arg(0);
        let sq = b.binary(BinOp::Mul, x, x, Span::dummy());
        b.ret(Some(sq), Span::dummy());
        let f = b.finalize();
        assert_eq!(f.use_count(x), 2);
    }

    #[test]
    fn test_diamond_with_phi() {
        let mut b = FunctionBuilder::new("pick", simple_sig());
        let entry = b.create_block();
        let left = b.create_block();
        let right = b.create_block();
        let join = b.create_block();

        b.switch_to_block(entry);
        let x = b.arg(0);
        let zero = b.const_int(ValType::I32, 0);
        let is_pos = b.icmp(IntCmp::Sgt, x, zero, Span::dummy());
        b.cond_br(is_pos, left, right, Span::dummy());

        b.switch_to_block(left);
        let one = b.const_int(ValType::I32, 1);
        b.br(join, Span::dummy());

        b.switch_to_block(right);
        let neg = b.const_int(ValType::I32, u64::MAX);
        b.br(join, Span::dummy());

        b.switch_to_block(join);
        let merged = b.phi(
            Type::I32,
            vec![(left, one), (right, neg)],
            Span::dummy(),
        );
        b.ret(Some(merged), Span::dummy());

        let f = b.finalize();
        assert_eq!(f.block_successors(entry).as_slice(), &[left, right]);
        assert_eq!(f.block_successors(left).as_slice(), &[join]);
        assert_eq!(f.use_count(one), 1);
        assert_eq!(f.terminator(join), *f.block_insts(join).last().unwrap());
    }

    #[test]
    #[should_panic(expected = "no terminator")]
    fn test_unterminated_block_rejected() {
        let mut b = FunctionBuilder::new("bad", simple_sig());
        let entry = b.create_block();
        b.switch_to_block(entry);
        let _ = b.const_int(ValType::I32, 1);
        let _ = b.finalize();
    }
}
