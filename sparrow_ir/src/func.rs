//! Functions: blocks, instructions, and the value table.
//!
//! A [`Function`] is an immutable, fully-resolved unit of IR. It is built
//! once through [`FunctionBuilder`](crate::builder::FunctionBuilder) and
//! then only queried; consumers walk blocks in layout order and look up
//! values, uses, and types through the accessors here.

use std::fmt;

use rustc_hash::FxHashMap;
use smallvec::SmallVec;

use crate::inst::{ArgAttrs, CallConv, InstData, InstId};
use crate::types::{Type, ValType};
use crate::value::{ConstVal, ValueDef, ValueId};

/// A handle to a basic block within one function.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BlockId(u32);

impl BlockId {
    /// Create a block handle from a raw index.
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

impl fmt::Debug for BlockId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "b{}", self.0)
    }
}

impl fmt::Display for BlockId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "b{}", self.0)
    }
}

/// One formal parameter: its type and ABI attribute bits.
#[derive(Clone, PartialEq, Debug)]
pub struct Param {
    /// Parameter type.
    pub ty: Type,
    /// ABI attributes.
    pub attrs: ArgAttrs,
}

impl Param {
    /// A parameter with no attributes.
    #[inline]
    #[must_use]
    pub const fn plain(ty: Type) -> Self {
        Self {
            ty,
            attrs: ArgAttrs::none(),
        }
    }
}

/// A function signature: parameters, return type, and calling convention.
#[derive(Clone, PartialEq, Debug)]
pub struct Signature {
    /// Formal parameters in order.
    pub params: Vec<Param>,
    /// Return type (`Type::Void` for none).
    pub ret: Type,
    /// ABI attributes on the return value.
    pub ret_attrs: ArgAttrs,
    /// Calling convention.
    pub conv: CallConv,
    /// The function accepts extra arguments past the formals.
    pub var_arg: bool,
}

impl Signature {
    /// Create a signature with the C convention and no attributes.
    #[must_use]
    pub fn new(params: Vec<Param>, ret: Type) -> Self {
        Self {
            params,
            ret,
            ret_attrs: ArgAttrs::none(),
            conv: CallConv::C,
            var_arg: false,
        }
    }

    /// Number of formal parameters.
    #[inline]
    #[must_use]
    pub fn num_params(&self) -> usize {
        self.params.len()
    }
}

/// A basic block: an ordered list of instructions ending in a terminator.
#[derive(Clone, Debug, Default)]
pub struct BlockData {
    pub(crate) insts: Vec<InstId>,
}

/// A finished function.
///
/// Block 0 is the entry block. Instruction lists are in program order and
/// every block ends with exactly one terminator.
pub struct Function {
    /// Symbol name.
    pub name: String,
    /// The signature.
    pub sig: Signature,
    pub(crate) blocks: Vec<BlockData>,
    pub(crate) insts: Vec<InstData>,
    pub(crate) values: Vec<ValueDef>,
    pub(crate) value_types: Vec<Type>,
    pub(crate) inst_results: Vec<Option<ValueId>>,
    pub(crate) users: Vec<SmallVec<[InstId; 2]>>,
    pub(crate) consts: FxHashMap<ConstVal, ValueId>,
}

impl Function {
    /// The entry block.
    #[inline]
    #[must_use]
    pub const fn entry_block(&self) -> BlockId {
        BlockId::new(0)
    }

    /// Number of blocks.
    #[inline]
    #[must_use]
    pub fn num_blocks(&self) -> usize {
        self.blocks.len()
    }

    /// Iterate over all block handles in layout order.
    pub fn block_ids(&self) -> impl ExactSizeIterator<Item = BlockId> {
        (0..self.blocks.len() as u32).map(BlockId::new)
    }

    /// The instructions of `block` in program order.
    #[inline]
    #[must_use]
    pub fn block_insts(&self, block: BlockId) -> &[InstId] {
        &self.blocks[block.index()].insts
    }

    /// Look up an instruction.
    #[inline]
    #[must_use]
    pub fn inst(&self, inst: InstId) -> &InstData {
        &self.insts[inst.index()]
    }

    /// The result value of an instruction, if it produces one.
    #[inline]
    #[must_use]
    pub fn inst_result(&self, inst: InstId) -> Option<ValueId> {
        self.inst_results[inst.index()]
    }

    /// Number of values.
    #[inline]
    #[must_use]
    pub fn num_values(&self) -> usize {
        self.values.len()
    }

    /// The value of the `index`-th formal parameter.
    ///
    /// Formals are interned ahead of every other value, so this is a direct
    /// index in practice; the scan only exists as a correctness net.
    #[must_use]
    pub fn arg_value(&self, index: usize) -> Option<ValueId> {
        match self.values.get(index) {
            Some(ValueDef::Arg { index: i }) if *i as usize == index => {
                Some(ValueId::new(index as u32))
            }
            _ => self.values.iter().position(|def| {
                matches!(def, ValueDef::Arg { index: i } if *i as usize == index)
            }).map(|pos| ValueId::new(pos as u32)),
        }
    }

    /// How a value is defined.
    #[inline]
    #[must_use]
    pub fn value_def(&self, value: ValueId) -> &ValueDef {
        &self.values[value.index()]
    }

    /// The type of a value.
    #[inline]
    #[must_use]
    pub fn value_type(&self, value: ValueId) -> &Type {
        &self.value_types[value.index()]
    }

    /// The scalar type of a value, or `None` for aggregates and void.
    #[inline]
    #[must_use]
    pub fn value_val_type(&self, value: ValueId) -> Option<ValType> {
        self.value_types[value.index()].as_val()
    }

    /// The defining instruction of a value, if it is an instruction result.
    #[inline]
    #[must_use]
    pub fn def_inst(&self, value: ValueId) -> Option<InstId> {
        self.values[value.index()].as_inst()
    }

    /// Number of operand uses of a value across the whole function.
    ///
    /// An instruction using the same value twice counts twice.
    #[inline]
    #[must_use]
    pub fn use_count(&self, value: ValueId) -> usize {
        self.users[value.index()].len()
    }

    /// The instructions that use a value, one entry per operand use.
    #[inline]
    #[must_use]
    pub fn users(&self, value: ValueId) -> &[InstId] {
        &self.users[value.index()]
    }

    /// Look up an already-interned constant.
    ///
    /// Integer, float, and null-pointer constants are interned during
    /// building, so an equal constant used anywhere in the function maps to
    /// one `ValueId`.
    #[inline]
    #[must_use]
    pub fn find_const(&self, c: &ConstVal) -> Option<ValueId> {
        self.consts.get(c).copied()
    }

    /// Position of an instruction within its block's instruction list.
    ///
    /// # Panics
    ///
    /// Panics if the instruction is not in its recorded block.
    #[must_use]
    pub fn block_position(&self, inst: InstId) -> usize {
        let block = self.insts[inst.index()].block;
        self.blocks[block.index()]
            .insts
            .iter()
            .position(|&i| i == inst)
            .expect("instruction missing from its block")
    }

    /// The terminator of a block.
    ///
    /// # Panics
    ///
    /// Panics if the block is empty.
    #[must_use]
    pub fn terminator(&self, block: BlockId) -> InstId {
        *self.blocks[block.index()]
            .insts
            .last()
            .expect("block has no terminator")
    }

    /// Successor blocks of `block`, in branch order.
    #[must_use]
    pub fn block_successors(&self, block: BlockId) -> SmallVec<[BlockId; 2]> {
        self.inst(self.terminator(block)).kind.successors()
    }
}

impl fmt::Debug for Function {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Function")
            .field("name", &self.name)
            .field("blocks", &self.blocks.len())
            .field("insts", &self.insts.len())
            .field("values", &self.values.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_block_id() {
        let b = BlockId::new(7);
        assert_eq!(b.index(), 7);
        assert_eq!(format!("{b}"), "b7");
        assert_eq!(format!("{b:?}"), "b7");
    }

    #[test]
    fn test_signature() {
        let sig = Signature::new(vec![Param::plain(Type::I32)], Type::I64);
        assert_eq!(sig.num_params(), 1);
        assert_eq!(sig.conv, CallConv::C);
        assert!(!sig.var_arg);
        assert_eq!(sig.ret, Type::I64);
    }
}
