//! Machine-level program representation produced by selection.
//!
//! Selection lowers one IR function into a [`MachFunction`]: the same block
//! structure, but instruction lists of target opcodes over virtual
//! registers. Register allocation runs later and is out of scope here;
//! everything stays in virtual registers except the physical-register
//! copies required by calling conventions.
//!
//! # Architecture
//!
//! - [`VReg`]/[`PReg`]/[`MachReg`]: virtual, physical, and either-kind
//!   register handles.
//! - [`Opcode`]: a flat numeric opcode space. Values below
//!   [`Opcode::FIRST_TARGET`] are target-independent pseudos.
//! - [`MachInst`]: one instruction, defs first, then operands.
//! - [`MachFunction`]: blocks, the virtual register file, and frame slots.

use std::fmt;
use std::sync::Arc;

use smallvec::SmallVec;

use sparrow_ir::{BlockId, Span};

// =============================================================================
// Registers
// =============================================================================

/// A virtual register.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct VReg(u32);

impl VReg {
    /// Create a virtual register from a raw index.
    #[inline]
    pub const fn new(index: u32) -> Self {
        VReg(index)
    }

    /// Get the raw index.
    #[inline]
    pub const fn index(self) -> u32 {
        self.0
    }

    /// The virtual register `offset` places after this one.
    ///
    /// Multi-register values occupy consecutively numbered registers, so
    /// element `i` of an aggregate lives in `base.offset(i)`.
    #[inline]
    #[must_use]
    pub const fn offset(self, offset: usize) -> Self {
        VReg(self.0 + offset as u32)
    }
}

impl fmt::Display for VReg {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "v{}", self.0)
    }
}

/// A physical register: a class plus the target's hardware index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PReg {
    /// Register class.
    pub class: RegClass,
    /// Hardware index within the class.
    pub index: u8,
}

impl PReg {
    /// An integer-class physical register.
    #[inline]
    pub const fn int(index: u8) -> Self {
        PReg {
            class: RegClass::Int,
            index,
        }
    }

    /// A float-class physical register.
    #[inline]
    pub const fn float(index: u8) -> Self {
        PReg {
            class: RegClass::Float,
            index,
        }
    }
}

impl fmt::Display for PReg {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let tag = match self.class {
            RegClass::Int => 'i',
            RegClass::Float => 'f',
        };
        write!(f, "p{}{}", tag, self.index)
    }
}

/// A register operand that is either virtual or physical.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MachReg {
    /// Virtual register.
    Virt(VReg),
    /// Physical register.
    Phys(PReg),
}

impl MachReg {
    /// Get the virtual register if this is one.
    #[inline]
    pub fn as_virt(self) -> Option<VReg> {
        match self {
            MachReg::Virt(v) => Some(v),
            MachReg::Phys(_) => None,
        }
    }

    /// Get the physical register if this is one.
    #[inline]
    pub fn as_phys(self) -> Option<PReg> {
        match self {
            MachReg::Phys(p) => Some(p),
            MachReg::Virt(_) => None,
        }
    }
}

impl From<VReg> for MachReg {
    fn from(v: VReg) -> Self {
        MachReg::Virt(v)
    }
}

impl From<PReg> for MachReg {
    fn from(p: PReg) -> Self {
        MachReg::Phys(p)
    }
}

impl fmt::Display for MachReg {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MachReg::Virt(v) => v.fmt(f),
            MachReg::Phys(p) => p.fmt(f),
        }
    }
}

// =============================================================================
// Register Class
// =============================================================================

/// Register class a virtual register is constrained to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RegClass {
    /// General-purpose integer registers.
    Int,
    /// Floating-point registers.
    Float,
}

// =============================================================================
// Opcodes
// =============================================================================

/// A machine opcode.
///
/// The space below [`Opcode::FIRST_TARGET`] holds target-independent
/// pseudo-instructions; targets number their real opcodes from
/// `FIRST_TARGET` upward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Opcode(pub u16);

impl Opcode {
    /// Register-to-register copy, any class.
    pub const COPY: Opcode = Opcode(0);
    /// Defines its register without emitting code.
    pub const IMPLICIT_DEF: Opcode = Opcode(1);
    /// Machine-level SSA merge at a block head.
    pub const PHI: Opcode = Opcode(2);
    /// Records live values at a patchable point; emits no code of its own.
    pub const STACKMAP: Opcode = Opcode(3);
    /// A call through a patchable region of reserved bytes.
    pub const PATCHPOINT: Opcode = Opcode(4);
    /// First opcode value available to targets.
    pub const FIRST_TARGET: Opcode = Opcode(32);

    /// Check if this is a target-independent pseudo.
    #[inline]
    pub const fn is_pseudo(self) -> bool {
        self.0 < Self::FIRST_TARGET.0
    }
}

// =============================================================================
// Operands
// =============================================================================

/// A frame slot: one object in the function's stack frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FrameSlot(u32);

impl FrameSlot {
    /// Create a frame slot handle from a raw index.
    #[inline]
    pub const fn new(index: u32) -> Self {
        FrameSlot(index)
    }

    /// Get the raw index.
    #[inline]
    pub const fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for FrameSlot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "fs{}", self.0)
    }
}

/// Size, alignment, and volatility of one stack frame object.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameSlotData {
    /// Object size in bytes.
    pub size: u64,
    /// Required alignment in bytes.
    pub align: u64,
}

/// Access metadata carried by memory-touching instructions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemInfo {
    /// Access size in bytes.
    pub size: u8,
    /// Access alignment in bytes.
    pub align: u32,
    /// The access must not be folded, duplicated, or reordered.
    pub volatile: bool,
}

/// One machine instruction operand.
#[derive(Debug, Clone, PartialEq)]
pub enum MachOperand {
    /// Register use.
    Reg(MachReg),
    /// Integer immediate.
    Imm(i64),
    /// Float immediate as raw IEEE bits.
    FpImm(u64),
    /// Memory reference: base register plus byte displacement.
    Mem {
        /// Base address register.
        base: MachReg,
        /// Byte displacement.
        disp: i32,
    },
    /// Direct reference to a stack frame object.
    Slot(FrameSlot),
    /// Branch target.
    Block(BlockId),
    /// Call target or global address by symbol name.
    Symbol(Arc<str>),
    /// Physical registers an instruction may overwrite.
    Clobbers(&'static [PReg]),
}

impl MachOperand {
    /// Register-use shorthand for a virtual register.
    #[inline]
    pub const fn vreg(v: VReg) -> Self {
        MachOperand::Reg(MachReg::Virt(v))
    }

    /// Register-use shorthand for a physical register.
    #[inline]
    pub const fn preg(p: PReg) -> Self {
        MachOperand::Reg(MachReg::Phys(p))
    }

    /// Get the register if this is a plain register operand.
    #[inline]
    pub fn as_reg(&self) -> Option<MachReg> {
        match self {
            MachOperand::Reg(r) => Some(*r),
            _ => None,
        }
    }
}

// =============================================================================
// Instructions
// =============================================================================

/// One machine instruction.
///
/// Result registers live in `defs`; everything read or referenced lives in
/// `ops`, in the order the opcode's encoding expects.
#[derive(Debug, Clone, PartialEq)]
pub struct MachInst {
    /// The opcode.
    pub opcode: Opcode,
    /// Registers written.
    pub defs: SmallVec<[MachReg; 1]>,
    /// Operands read or referenced.
    pub ops: SmallVec<[MachOperand; 3]>,
    /// Memory access metadata, for loads, stores, and folded accesses.
    pub mem_info: Option<MemInfo>,
    /// Originating source range.
    pub span: Span,
}

impl MachInst {
    /// Create an instruction with no defs or operands yet.
    #[must_use]
    pub fn new(opcode: Opcode, span: Span) -> Self {
        MachInst {
            opcode,
            defs: SmallVec::new(),
            ops: SmallVec::new(),
            mem_info: None,
            span,
        }
    }

    /// Add a def register.
    #[must_use]
    pub fn with_def(mut self, def: impl Into<MachReg>) -> Self {
        self.defs.push(def.into());
        self
    }

    /// Add an operand.
    #[must_use]
    pub fn with_op(mut self, op: MachOperand) -> Self {
        self.ops.push(op);
        self
    }

    /// Attach memory access metadata.
    #[must_use]
    pub fn with_mem_info(mut self, info: MemInfo) -> Self {
        self.mem_info = Some(info);
        self
    }

    /// Check if this is a machine-level PHI.
    #[inline]
    pub fn is_phi(&self) -> bool {
        self.opcode == Opcode::PHI
    }

    /// The single def register, if there is exactly one and it is virtual.
    #[inline]
    pub fn virt_def(&self) -> Option<VReg> {
        match self.defs.as_slice() {
            [MachReg::Virt(v)] => Some(*v),
            _ => None,
        }
    }
}

// =============================================================================
// Blocks and Functions
// =============================================================================

/// A machine basic block.
#[derive(Debug, Clone, Default)]
pub struct MachBlock {
    /// Instructions in program order.
    pub insts: Vec<MachInst>,
    /// Successor blocks, in branch order.
    pub succs: SmallVec<[BlockId; 2]>,
}

/// A machine function under construction.
///
/// Blocks mirror the IR function one-to-one, so IR [`BlockId`]s address
/// machine blocks directly.
#[derive(Debug)]
pub struct MachFunction {
    /// Symbol name.
    pub name: String,
    blocks: Vec<MachBlock>,
    vreg_classes: Vec<RegClass>,
    frame: Vec<FrameSlotData>,
}

impl MachFunction {
    /// Create a machine function with `num_blocks` empty blocks.
    #[must_use]
    pub fn new(name: impl Into<String>, num_blocks: usize) -> Self {
        MachFunction {
            name: name.into(),
            blocks: vec![MachBlock::default(); num_blocks],
            vreg_classes: Vec::new(),
            frame: Vec::new(),
        }
    }

    /// Number of blocks.
    #[inline]
    pub fn num_blocks(&self) -> usize {
        self.blocks.len()
    }

    /// Borrow a block.
    #[inline]
    pub fn block(&self, block: BlockId) -> &MachBlock {
        &self.blocks[block.index()]
    }

    /// Mutably borrow a block.
    #[inline]
    pub fn block_mut(&mut self, block: BlockId) -> &mut MachBlock {
        &mut self.blocks[block.index()]
    }

    /// Record a control-flow edge.
    pub fn add_successor(&mut self, block: BlockId, succ: BlockId) {
        let succs = &mut self.blocks[block.index()].succs;
        if !succs.contains(&succ) {
            succs.push(succ);
        }
    }

    /// Allocate a fresh virtual register of the given class.
    pub fn new_vreg(&mut self, class: RegClass) -> VReg {
        let v = VReg::new(self.vreg_classes.len() as u32);
        self.vreg_classes.push(class);
        v
    }

    /// Allocate consecutively numbered virtual registers, one per class in
    /// `classes`, and return the first.
    ///
    /// # Panics
    ///
    /// Panics if `classes` is empty.
    pub fn new_vreg_block(&mut self, classes: &[RegClass]) -> VReg {
        assert!(!classes.is_empty(), "empty register block");
        let first = VReg::new(self.vreg_classes.len() as u32);
        self.vreg_classes.extend_from_slice(classes);
        first
    }

    /// The class of a virtual register.
    #[inline]
    pub fn vreg_class(&self, vreg: VReg) -> RegClass {
        self.vreg_classes[vreg.index() as usize]
    }

    /// Set the class of an existing virtual register.
    pub fn set_vreg_class(&mut self, vreg: VReg, class: RegClass) {
        self.vreg_classes[vreg.index() as usize] = class;
    }

    /// Number of virtual registers allocated so far.
    #[inline]
    pub fn num_vregs(&self) -> usize {
        self.vreg_classes.len()
    }

    /// Create a stack frame object.
    pub fn create_frame_slot(&mut self, size: u64, align: u64) -> FrameSlot {
        let slot = FrameSlot::new(self.frame.len() as u32);
        self.frame.push(FrameSlotData { size, align });
        slot
    }

    /// Look up a frame object.
    #[inline]
    pub fn frame_slot(&self, slot: FrameSlot) -> FrameSlotData {
        self.frame[slot.index()]
    }

    /// Number of frame objects.
    #[inline]
    pub fn num_frame_slots(&self) -> usize {
        self.frame.len()
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_vreg_offset() {
        let base = VReg::new(5);
        assert_eq!(base.offset(0), base);
        assert_eq!(base.offset(3), VReg::new(8));
        assert_eq!(format!("{}", base), "v5");
    }

    #[test]
    fn test_opcode_pseudo_split() {
        assert!(Opcode::COPY.is_pseudo());
        assert!(Opcode::PATCHPOINT.is_pseudo());
        assert!(!Opcode::FIRST_TARGET.is_pseudo());
        assert!(!Opcode(40).is_pseudo());
    }

    #[test]
    fn test_vreg_block_consecutive() {
        let mut f = MachFunction::new("f", 1);
        let _pad = f.new_vreg(RegClass::Int);
        let first = f.new_vreg_block(&[RegClass::Int, RegClass::Float, RegClass::Int]);
        assert_eq!(f.num_vregs(), 4);
        assert_eq!(f.vreg_class(first), RegClass::Int);
        assert_eq!(f.vreg_class(first.offset(1)), RegClass::Float);
        assert_eq!(f.vreg_class(first.offset(2)), RegClass::Int);
    }

    #[test]
    fn test_successor_dedup() {
        let mut f = MachFunction::new("f", 2);
        let b0 = BlockId::new(0);
        let b1 = BlockId::new(1);
        f.add_successor(b0, b1);
        f.add_successor(b0, b1);
        assert_eq!(f.block(b0).succs.as_slice(), &[b1]);
    }

    #[test]
    fn test_inst_builder() {
        let inst = MachInst::new(Opcode::COPY, Span::dummy())
            .with_def(VReg::new(1))
            .with_op(MachOperand::vreg(VReg::new(0)));
        assert_eq!(inst.virt_def(), Some(VReg::new(1)));
        assert_eq!(inst.ops.len(), 1);
        assert!(!inst.is_phi());
    }

    #[test]
    fn test_frame_slots() {
        let mut f = MachFunction::new("f", 1);
        let a = f.create_frame_slot(16, 8);
        let b = f.create_frame_slot(4, 4);
        assert_ne!(a, b);
        assert_eq!(f.frame_slot(a).size, 16);
        assert_eq!(f.frame_slot(b).align, 4);
        assert_eq!(f.num_frame_slots(), 2);
    }
}
