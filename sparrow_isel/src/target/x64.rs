//! x86-64 reference target.
//!
//! One [`X64Target`] value serves as both the machine description and the
//! hook set. The description side fills the emission table for the common
//! integer and SSE operations at 32 and 64 bits (small integers run at 32
//! bits); the hook side covers what the generic palette leaves to the
//! target: memory accesses, compares, conditional branches, returns,
//! alloca addresses, float zeros, overflow arithmetic, and load folding.
//!
//! Two ABI flavors are modeled. System V assigns integer and float
//! arguments from independent register sequences; Win64 advances one
//! shared position per argument and reserves a 32-byte home area below the
//! stack arguments.

use sparrow_ir::inst::{CallConv, FloatCmp, InstKind, IntCmp, Intrinsic};
use sparrow_ir::{InstId, Type, ValType};

use crate::call::CallDescriptor;
use crate::mach::{MachInst, MachOperand, MachReg, MemInfo, Opcode, PReg, RegClass, VReg};
use crate::select::FastSelector;
use crate::target::call_conv::CallConvInfo;
use crate::target::{GenericOp, OpcodeEntry, TargetHooks, TargetIsa};

/// The x86-64 opcode space.
pub mod ops {
    #![allow(missing_docs)]

    use crate::mach::Opcode;

    const fn op(index: u16) -> Opcode {
        Opcode(Opcode::FIRST_TARGET.0 + index)
    }

    pub const ADD32_RR: Opcode = op(0);
    pub const ADD32_RI: Opcode = op(1);
    pub const ADD64_RR: Opcode = op(2);
    pub const ADD64_RI: Opcode = op(3);
    pub const SUB32_RR: Opcode = op(4);
    pub const SUB32_RI: Opcode = op(5);
    pub const SUB64_RR: Opcode = op(6);
    pub const SUB64_RI: Opcode = op(7);
    pub const IMUL32_RR: Opcode = op(8);
    pub const IMUL32_RRI: Opcode = op(9);
    pub const IMUL64_RR: Opcode = op(10);
    pub const IMUL64_RRI: Opcode = op(11);
    pub const AND32_RR: Opcode = op(12);
    pub const AND32_RI: Opcode = op(13);
    pub const AND64_RR: Opcode = op(14);
    pub const AND64_RI: Opcode = op(15);
    pub const OR32_RR: Opcode = op(16);
    pub const OR32_RI: Opcode = op(17);
    pub const OR64_RR: Opcode = op(18);
    pub const OR64_RI: Opcode = op(19);
    pub const XOR32_RR: Opcode = op(20);
    pub const XOR32_RI: Opcode = op(21);
    pub const XOR64_RR: Opcode = op(22);
    pub const XOR64_RI: Opcode = op(23);
    pub const SHL32_RR: Opcode = op(24);
    pub const SHL32_RI: Opcode = op(25);
    pub const SHL64_RR: Opcode = op(26);
    pub const SHL64_RI: Opcode = op(27);
    pub const SHR32_RR: Opcode = op(28);
    pub const SHR32_RI: Opcode = op(29);
    pub const SHR64_RR: Opcode = op(30);
    pub const SHR64_RI: Opcode = op(31);
    pub const SAR32_RR: Opcode = op(32);
    pub const SAR32_RI: Opcode = op(33);
    pub const SAR64_RR: Opcode = op(34);
    pub const SAR64_RI: Opcode = op(35);
    // Division and remainder stay pseudo until the implicit rax/rdx
    // constraints are applied after register allocation.
    pub const IDIV32_RR: Opcode = op(36);
    pub const IDIV64_RR: Opcode = op(37);
    pub const UDIV32_RR: Opcode = op(38);
    pub const UDIV64_RR: Opcode = op(39);
    pub const SREM32_RR: Opcode = op(40);
    pub const SREM64_RR: Opcode = op(41);
    pub const UREM32_RR: Opcode = op(42);
    pub const UREM64_RR: Opcode = op(43);
    pub const CMP32_RR: Opcode = op(44);
    pub const CMP32_RI: Opcode = op(45);
    pub const CMP64_RR: Opcode = op(46);
    pub const CMP64_RI: Opcode = op(47);
    pub const TEST32_RR: Opcode = op(48);
    pub const SETCC: Opcode = op(49);
    pub const JMP: Opcode = op(50);
    pub const JCC: Opcode = op(51);
    pub const RET: Opcode = op(52);
    pub const UD2: Opcode = op(53);
    pub const CALL_SYM: Opcode = op(54);
    pub const CALL_R: Opcode = op(55);
    pub const MOV32_RI: Opcode = op(56);
    pub const MOV64_RI: Opcode = op(57);
    pub const MOV32_RR: Opcode = op(58);
    pub const MOV8_RM: Opcode = op(59);
    pub const MOV16_RM: Opcode = op(60);
    pub const MOV32_RM: Opcode = op(61);
    pub const MOV64_RM: Opcode = op(62);
    pub const MOV8_MR: Opcode = op(63);
    pub const MOV16_MR: Opcode = op(64);
    pub const MOV32_MR: Opcode = op(65);
    pub const MOV64_MR: Opcode = op(66);
    pub const MOVSS_RM: Opcode = op(67);
    pub const MOVSD_RM: Opcode = op(68);
    pub const MOVSS_MR: Opcode = op(69);
    pub const MOVSD_MR: Opcode = op(70);
    // Float immediates load from the constant pool.
    pub const MOVSS_CP: Opcode = op(71);
    pub const MOVSD_CP: Opcode = op(72);
    pub const LEA64_SYM: Opcode = op(73);
    pub const LEA64_SLOT: Opcode = op(74);
    pub const MOVZX32_8: Opcode = op(75);
    pub const MOVZX32_16: Opcode = op(76);
    pub const MOVSX32_8: Opcode = op(77);
    pub const MOVSX32_16: Opcode = op(78);
    pub const MOVSX64_8: Opcode = op(79);
    pub const MOVSX64_16: Opcode = op(80);
    pub const MOVSX64_32: Opcode = op(81);
    pub const CVTTSS2SI32: Opcode = op(82);
    pub const CVTTSS2SI64: Opcode = op(83);
    pub const CVTTSD2SI32: Opcode = op(84);
    pub const CVTTSD2SI64: Opcode = op(85);
    pub const CVTSI2SS32: Opcode = op(86);
    pub const CVTSI2SS64: Opcode = op(87);
    pub const CVTSI2SD32: Opcode = op(88);
    pub const CVTSI2SD64: Opcode = op(89);
    pub const CVTSD2SS: Opcode = op(90);
    pub const CVTSS2SD: Opcode = op(91);
    pub const MOVD_G2F: Opcode = op(92);
    pub const MOVD_F2G: Opcode = op(93);
    pub const MOVQ_G2F: Opcode = op(94);
    pub const MOVQ_F2G: Opcode = op(95);
    pub const ADDSS: Opcode = op(96);
    pub const ADDSD: Opcode = op(97);
    pub const SUBSS: Opcode = op(98);
    pub const SUBSD: Opcode = op(99);
    pub const MULSS: Opcode = op(100);
    pub const MULSD: Opcode = op(101);
    pub const DIVSS: Opcode = op(102);
    pub const DIVSD: Opcode = op(103);
    // Sign-mask xor and zeroing-idiom pseudos.
    pub const FNEG32: Opcode = op(104);
    pub const FNEG64: Opcode = op(105);
    pub const FZERO32: Opcode = op(106);
    pub const FZERO64: Opcode = op(107);
    pub const UCOMISS: Opcode = op(108);
    pub const UCOMISD: Opcode = op(109);
    pub const ADD32_RM: Opcode = op(110);
    pub const ADD64_RM: Opcode = op(111);
    pub const SUB32_RM: Opcode = op(112);
    pub const SUB64_RM: Opcode = op(113);
    pub const AND32_RM: Opcode = op(114);
    pub const AND64_RM: Opcode = op(115);
    pub const OR32_RM: Opcode = op(116);
    pub const OR64_RM: Opcode = op(117);
    pub const XOR32_RM: Opcode = op(118);
    pub const XOR64_RM: Opcode = op(119);
}

use ops::*;

// =============================================================================
// Registers and Calling Conventions
// =============================================================================

/// `rax`.
pub const RAX: PReg = PReg::int(0);
/// `rcx`.
pub const RCX: PReg = PReg::int(1);
/// `rdx`.
pub const RDX: PReg = PReg::int(2);
/// `rsp`.
pub const RSP: PReg = PReg::int(4);
/// `rsi`.
pub const RSI: PReg = PReg::int(6);
/// `rdi`.
pub const RDI: PReg = PReg::int(7);
/// `r8`.
pub const R8: PReg = PReg::int(8);
/// `r9`.
pub const R9: PReg = PReg::int(9);
/// `r10`.
pub const R10: PReg = PReg::int(10);
/// `r11`.
pub const R11: PReg = PReg::int(11);

static SYSV_INT_ARGS: [PReg; 6] = [RDI, RSI, RDX, RCX, R8, R9];
static SYSV_FLOAT_ARGS: [PReg; 8] = [
    PReg::float(0),
    PReg::float(1),
    PReg::float(2),
    PReg::float(3),
    PReg::float(4),
    PReg::float(5),
    PReg::float(6),
    PReg::float(7),
];
static SYSV_INT_RETS: [PReg; 2] = [RAX, RDX];
static SYSV_FLOAT_RETS: [PReg; 2] = [PReg::float(0), PReg::float(1)];
static SYSV_CLOBBERS: [PReg; 25] = [
    RAX,
    RCX,
    RDX,
    RSI,
    RDI,
    R8,
    R9,
    R10,
    R11,
    PReg::float(0),
    PReg::float(1),
    PReg::float(2),
    PReg::float(3),
    PReg::float(4),
    PReg::float(5),
    PReg::float(6),
    PReg::float(7),
    PReg::float(8),
    PReg::float(9),
    PReg::float(10),
    PReg::float(11),
    PReg::float(12),
    PReg::float(13),
    PReg::float(14),
    PReg::float(15),
];

/// The System V AMD64 convention.
pub static SYSV_INFO: CallConvInfo = CallConvInfo {
    name: "sysv64",
    int_args: &SYSV_INT_ARGS,
    float_args: &SYSV_FLOAT_ARGS,
    int_rets: &SYSV_INT_RETS,
    float_rets: &SYSV_FLOAT_RETS,
    stack_ptr: RSP,
    clobbers: &SYSV_CLOBBERS,
    shadow_slots: false,
    shadow_bytes: 0,
    stack_align: 16,
};

static WIN64_INT_ARGS: [PReg; 4] = [RCX, RDX, R8, R9];
static WIN64_FLOAT_ARGS: [PReg; 4] = [
    PReg::float(0),
    PReg::float(1),
    PReg::float(2),
    PReg::float(3),
];
static WIN64_INT_RETS: [PReg; 1] = [RAX];
static WIN64_FLOAT_RETS: [PReg; 1] = [PReg::float(0)];
static WIN64_CLOBBERS: [PReg; 13] = [
    RAX,
    RCX,
    RDX,
    R8,
    R9,
    R10,
    R11,
    PReg::float(0),
    PReg::float(1),
    PReg::float(2),
    PReg::float(3),
    PReg::float(4),
    PReg::float(5),
];

/// The Windows x64 convention.
pub static WIN64_INFO: CallConvInfo = CallConvInfo {
    name: "win64",
    int_args: &WIN64_INT_ARGS,
    float_args: &WIN64_FLOAT_ARGS,
    int_rets: &WIN64_INT_RETS,
    float_rets: &WIN64_FLOAT_RETS,
    stack_ptr: RSP,
    clobbers: &WIN64_CLOBBERS,
    shadow_slots: true,
    shadow_bytes: 32,
    stack_align: 16,
};

// =============================================================================
// Target
// =============================================================================

/// ABI flavor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Abi {
    SysV,
    Win64,
}

/// The x86-64 target: machine description and hook set in one.
#[derive(Debug, Clone, Copy)]
pub struct X64Target {
    abi: Abi,
}

impl X64Target {
    /// A target using the System V AMD64 convention.
    #[must_use]
    pub fn sysv() -> Self {
        X64Target { abi: Abi::SysV }
    }

    /// A target using the Windows x64 convention.
    #[must_use]
    pub fn win64() -> Self {
        X64Target { abi: Abi::Win64 }
    }
}

/// Arithmetic width after promotion: false for 32-bit, true for 64-bit,
/// `None` for float types.
fn arith_wide(ty: ValType) -> Option<bool> {
    match ty {
        ValType::I1 | ValType::I8 | ValType::I16 | ValType::I32 => Some(false),
        ValType::I64 | ValType::Ptr => Some(true),
        ValType::F32 | ValType::F64 => None,
    }
}

fn float_wide(ty: ValType) -> Option<bool> {
    match ty {
        ValType::F32 => Some(false),
        ValType::F64 => Some(true),
        _ => None,
    }
}

fn int_entry(wide: bool, rr32: Opcode, rr64: Opcode, ri32: Opcode, ri64: Opcode, bits: u8) -> OpcodeEntry {
    if wide {
        OpcodeEntry::reg_only(rr64, RegClass::Int).with_imm(ri64, bits)
    } else {
        OpcodeEntry::reg_only(rr32, RegClass::Int).with_imm(ri32, bits)
    }
}

fn int_rr(wide: bool, rr32: Opcode, rr64: Opcode) -> OpcodeEntry {
    OpcodeEntry::reg_only(if wide { rr64 } else { rr32 }, RegClass::Int)
}

fn float_rr(wide: bool, ss: Opcode, sd: Opcode) -> OpcodeEntry {
    OpcodeEntry::reg_only(if wide { sd } else { ss }, RegClass::Float)
}

/// A conversion entry: result in `class`, operand in `op_class`.
const fn conv(reg: Opcode, class: RegClass, op_class: RegClass) -> OpcodeEntry {
    OpcodeEntry {
        reg,
        class,
        op_class,
        imm: None,
    }
}

/// Standard x86 condition-code encoding.
mod cc {
    pub const B: i64 = 2;
    pub const AE: i64 = 3;
    pub const E: i64 = 4;
    pub const NE: i64 = 5;
    pub const BE: i64 = 6;
    pub const A: i64 = 7;
    pub const L: i64 = 12;
    pub const GE: i64 = 13;
    pub const LE: i64 = 14;
    pub const G: i64 = 15;
    pub const O: i64 = 0;
}

fn int_cc(pred: IntCmp) -> i64 {
    match pred {
        IntCmp::Eq => cc::E,
        IntCmp::Ne => cc::NE,
        IntCmp::Ugt => cc::A,
        IntCmp::Uge => cc::AE,
        IntCmp::Ult => cc::B,
        IntCmp::Ule => cc::BE,
        IntCmp::Sgt => cc::G,
        IntCmp::Sge => cc::GE,
        IntCmp::Slt => cc::L,
        IntCmp::Sle => cc::LE,
    }
}

impl TargetIsa for X64Target {
    fn name(&self) -> &'static str {
        match self.abi {
            Abi::SysV => "x64-sysv",
            Abi::Win64 => "x64-win64",
        }
    }

    fn ptr_bits(&self) -> u32 {
        64
    }

    fn is_legal_type(&self, ty: ValType) -> bool {
        matches!(
            ty,
            ValType::I32 | ValType::I64 | ValType::Ptr | ValType::F32 | ValType::F64
        )
    }

    fn promoted_type(&self, ty: ValType) -> Option<ValType> {
        matches!(ty, ValType::I1 | ValType::I8 | ValType::I16).then_some(ValType::I32)
    }

    fn reg_class(&self, ty: ValType) -> RegClass {
        if ty.is_float() {
            RegClass::Float
        } else {
            RegClass::Int
        }
    }

    #[allow(clippy::too_many_lines)]
    fn lookup(&self, gop: GenericOp, ty: ValType) -> Option<OpcodeEntry> {
        use GenericOp as G;
        // Memory accesses keep their width; arithmetic runs promoted.
        match gop {
            G::Load => {
                return Some(match ty {
                    ValType::I1 | ValType::I8 => OpcodeEntry::reg_only(MOV8_RM, RegClass::Int),
                    ValType::I16 => OpcodeEntry::reg_only(MOV16_RM, RegClass::Int),
                    ValType::I32 => OpcodeEntry::reg_only(MOV32_RM, RegClass::Int),
                    ValType::I64 | ValType::Ptr => OpcodeEntry::reg_only(MOV64_RM, RegClass::Int),
                    ValType::F32 => OpcodeEntry::reg_only(MOVSS_RM, RegClass::Float),
                    ValType::F64 => OpcodeEntry::reg_only(MOVSD_RM, RegClass::Float),
                });
            }
            G::Store => {
                return Some(match ty {
                    ValType::I1 | ValType::I8 => OpcodeEntry::reg_only(MOV8_MR, RegClass::Int),
                    ValType::I16 => OpcodeEntry::reg_only(MOV16_MR, RegClass::Int),
                    ValType::I32 => OpcodeEntry::reg_only(MOV32_MR, RegClass::Int),
                    ValType::I64 | ValType::Ptr => OpcodeEntry::reg_only(MOV64_MR, RegClass::Int),
                    ValType::F32 => OpcodeEntry::reg_only(MOVSS_MR, RegClass::Float),
                    ValType::F64 => OpcodeEntry::reg_only(MOVSD_MR, RegClass::Float),
                });
            }
            G::Jump => return Some(OpcodeEntry::reg_only(JMP, RegClass::Int)),
            G::Trap => return Some(OpcodeEntry::reg_only(UD2, RegClass::Int)),
            G::GlobalAddr => return Some(OpcodeEntry::reg_only(LEA64_SYM, RegClass::Int)),
            G::MovFpImm => {
                let wide = float_wide(ty)?;
                return Some(float_rr(wide, MOVSS_CP, MOVSD_CP));
            }
            _ => {}
        }

        if let Some(wide) = float_wide(ty) {
            return Some(match gop {
                G::FAdd => float_rr(wide, ADDSS, ADDSD),
                G::FSub => float_rr(wide, SUBSS, SUBSD),
                G::FMul => float_rr(wide, MULSS, MULSD),
                G::FDiv => float_rr(wide, DIVSS, DIVSD),
                G::FNeg => float_rr(wide, FNEG32, FNEG64),
                _ => return None,
            });
        }

        let wide = arith_wide(ty)?;
        Some(match gop {
            G::Add => int_entry(wide, ADD32_RR, ADD64_RR, ADD32_RI, ADD64_RI, 32),
            G::Sub => int_entry(wide, SUB32_RR, SUB64_RR, SUB32_RI, SUB64_RI, 32),
            G::Mul => int_entry(wide, IMUL32_RR, IMUL64_RR, IMUL32_RRI, IMUL64_RRI, 32),
            G::And => int_entry(wide, AND32_RR, AND64_RR, AND32_RI, AND64_RI, 32),
            G::Or => int_entry(wide, OR32_RR, OR64_RR, OR32_RI, OR64_RI, 32),
            G::Xor => int_entry(wide, XOR32_RR, XOR64_RR, XOR32_RI, XOR64_RI, 32),
            G::Shl => int_entry(wide, SHL32_RR, SHL64_RR, SHL32_RI, SHL64_RI, 8),
            G::LShr => int_entry(wide, SHR32_RR, SHR64_RR, SHR32_RI, SHR64_RI, 8),
            G::AShr => int_entry(wide, SAR32_RR, SAR64_RR, SAR32_RI, SAR64_RI, 8),
            G::SDiv => int_rr(wide, IDIV32_RR, IDIV64_RR),
            G::UDiv => int_rr(wide, UDIV32_RR, UDIV64_RR),
            G::SRem => int_rr(wide, SREM32_RR, SREM64_RR),
            G::URem => int_rr(wide, UREM32_RR, UREM64_RR),
            G::Cmp => int_entry(wide, CMP32_RR, CMP64_RR, CMP32_RI, CMP64_RI, 32),
            G::MovImm => {
                if wide {
                    // movabs takes any 64-bit payload.
                    OpcodeEntry::reg_only(MOV64_RI, RegClass::Int).with_imm(MOV64_RI, 64)
                } else {
                    OpcodeEntry::reg_only(MOV32_RI, RegClass::Int).with_imm(MOV32_RI, 32)
                }
            }
            _ => return None,
        })
    }

    fn lookup_cast(&self, gop: GenericOp, from: ValType, to: ValType) -> Option<OpcodeEntry> {
        use GenericOp as G;
        use RegClass::{Float, Int};
        let entry = match gop {
            G::ZExt => match from {
                ValType::I1 | ValType::I8 => conv(MOVZX32_8, Int, Int),
                ValType::I16 => conv(MOVZX32_16, Int, Int),
                // 32-bit writes zero the upper half implicitly.
                ValType::I32 if arith_wide(to) == Some(true) => conv(MOV32_RR, Int, Int),
                _ => return None,
            },
            G::SExt => match (from, arith_wide(to)?) {
                (ValType::I8, false) => conv(MOVSX32_8, Int, Int),
                (ValType::I8, true) => conv(MOVSX64_8, Int, Int),
                (ValType::I16, false) => conv(MOVSX32_16, Int, Int),
                (ValType::I16, true) => conv(MOVSX64_16, Int, Int),
                (ValType::I32, true) => conv(MOVSX64_32, Int, Int),
                _ => return None,
            },
            G::Trunc => {
                if arith_wide(from).is_none() || arith_wide(to).is_none() {
                    return None;
                }
                conv(MOV32_RR, Int, Int)
            }
            G::FpToSi => match (from, to) {
                (ValType::F32, ValType::I32) => conv(CVTTSS2SI32, Int, Float),
                (ValType::F32, ValType::I64) => conv(CVTTSS2SI64, Int, Float),
                (ValType::F64, ValType::I32) => conv(CVTTSD2SI32, Int, Float),
                (ValType::F64, ValType::I64) => conv(CVTTSD2SI64, Int, Float),
                _ => return None,
            },
            G::SiToFp => match (from, to) {
                (ValType::I32, ValType::F32) => conv(CVTSI2SS32, Float, Int),
                (ValType::I64, ValType::F32) => conv(CVTSI2SS64, Float, Int),
                (ValType::I32, ValType::F64) => conv(CVTSI2SD32, Float, Int),
                (ValType::I64, ValType::F64) => conv(CVTSI2SD64, Float, Int),
                _ => return None,
            },
            G::FpTrunc => match (from, to) {
                (ValType::F64, ValType::F32) => conv(CVTSD2SS, Float, Float),
                _ => return None,
            },
            G::FpExt => match (from, to) {
                (ValType::F32, ValType::F64) => conv(CVTSS2SD, Float, Float),
                _ => return None,
            },
            G::Bitcast => match (from, to) {
                (ValType::I32, ValType::F32) => conv(MOVD_G2F, Float, Int),
                (ValType::F32, ValType::I32) => conv(MOVD_F2G, Int, Float),
                (ValType::I64 | ValType::Ptr, ValType::F64) => conv(MOVQ_G2F, Float, Int),
                (ValType::F64, ValType::I64 | ValType::Ptr) => conv(MOVQ_F2G, Int, Float),
                _ => return None,
            },
            // No unsigned conversion instructions before AVX-512; the
            // general selector expands these.
            G::FpToUi | G::UiToFp => return None,
            _ => return None,
        };
        Some(entry)
    }

    fn call_conv_info(&self, conv: CallConv) -> Option<&'static CallConvInfo> {
        match conv {
            CallConv::C | CallConv::Fast => Some(match self.abi {
                Abi::SysV => &SYSV_INFO,
                Abi::Win64 => &WIN64_INFO,
            }),
            CallConv::Cold => None,
        }
    }

    fn call_opcode(&self) -> Opcode {
        CALL_SYM
    }

    fn call_indirect_opcode(&self) -> Opcode {
        CALL_R
    }

    fn is_library_call(&self, symbol: &str) -> bool {
        // These get inline expansions from the general selector.
        matches!(symbol, "memset" | "memcmp")
    }
}

// =============================================================================
// Hooks
// =============================================================================

impl TargetHooks for X64Target {
    fn select_inst(&self, sel: &mut FastSelector<'_>, inst: InstId) -> bool {
        let func = sel.func();
        match &func.inst(inst).kind {
            InstKind::Load { .. } => self.select_load(sel, inst),
            InstKind::Store { .. } => self.select_store(sel, inst),
            InstKind::ICmp { .. } => self.select_icmp(sel, inst),
            InstKind::FCmp { .. } => self.select_fcmp(sel, inst),
            InstKind::CondBr { .. } => self.select_cond_br(sel, inst),
            InstKind::Ret { .. } => self.select_ret(sel, inst),
            _ => false,
        }
    }

    fn lower_intrinsic(&self, sel: &mut FastSelector<'_>, inst: InstId) -> bool {
        let func = sel.func();
        let InstKind::IntrinsicCall { intrinsic, args } = func.inst(inst).kind.clone() else {
            return false;
        };
        match intrinsic {
            Intrinsic::MemCpy => {
                if args.len() < 3 {
                    return false;
                }
                let desc = CallDescriptor::for_symbol(
                    CallConv::C,
                    Type::Void,
                    "memcpy",
                    args[..3].to_vec(),
                );
                sel.lower_call_to(&desc)
            }
            i if i.is_overflow_arith() => self.lower_overflow(sel, inst, i).is_some(),
            _ => false,
        }
    }

    fn materialize_alloca(&self, sel: &mut FastSelector<'_>, inst: InstId) -> Option<VReg> {
        let slot = sel.ctx.alloca_slot(inst)?;
        let dst = sel.new_vreg(RegClass::Int);
        let lea = MachInst::new(LEA64_SLOT, sel.cur_span)
            .with_def(dst)
            .with_op(MachOperand::Slot(slot));
        sel.emit(lea);
        Some(dst)
    }

    fn materialize_float_zero(&self, sel: &mut FastSelector<'_>, ty: ValType) -> Option<VReg> {
        let wide = float_wide(ty)?;
        let dst = sel.new_vreg(RegClass::Float);
        let zero = MachInst::new(if wide { FZERO64 } else { FZERO32 }, sel.cur_span).with_def(dst);
        sel.emit(zero);
        Some(dst)
    }

    fn fold_load(&self, sel: &mut FastSelector<'_>, user: InstId, load: InstId) -> bool {
        self.fold_load_into_binary(sel, user, load).is_some()
    }
}

impl X64Target {
    fn select_load(&self, sel: &mut FastSelector<'_>, inst: InstId) -> bool {
        let func = sel.func();
        let InstKind::Load {
            ptr,
            volatile,
            align,
        } = func.inst(inst).kind
        else {
            return false;
        };
        let Some(result) = func.inst_result(inst) else {
            return false;
        };
        let Some(ty) = func.value_val_type(result) else {
            return false;
        };
        let Some(entry) = self.lookup(GenericOp::Load, ty) else {
            return false;
        };
        let Some(base) = sel.reg_for_value(ptr) else {
            return false;
        };
        let dst = sel.new_vreg(entry.class);
        let load = MachInst::new(entry.reg, sel.cur_span)
            .with_def(dst)
            .with_op(MachOperand::Mem {
                base: MachReg::Virt(base),
                disp: 0,
            })
            .with_mem_info(MemInfo {
                size: ty.byte_size(8) as u8,
                align,
                volatile,
            });
        sel.emit(load);
        sel.update_value_map(result, dst, 1);
        true
    }

    fn select_store(&self, sel: &mut FastSelector<'_>, inst: InstId) -> bool {
        let func = sel.func();
        let InstKind::Store {
            value,
            ptr,
            volatile,
            align,
        } = func.inst(inst).kind
        else {
            return false;
        };
        let Some(ty) = func.value_val_type(value) else {
            return false;
        };
        let Some(entry) = self.lookup(GenericOp::Store, ty) else {
            return false;
        };
        let Some(val_reg) = sel.reg_for_value(value) else {
            return false;
        };
        let Some(base) = sel.reg_for_value(ptr) else {
            return false;
        };
        let store = MachInst::new(entry.reg, sel.cur_span)
            .with_op(MachOperand::Mem {
                base: MachReg::Virt(base),
                disp: 0,
            })
            .with_op(MachOperand::vreg(val_reg))
            .with_mem_info(MemInfo {
                size: ty.byte_size(8) as u8,
                align,
                volatile,
            });
        sel.emit(store);
        true
    }

    fn select_icmp(&self, sel: &mut FastSelector<'_>, inst: InstId) -> bool {
        let func = sel.func();
        let InstKind::ICmp { pred, lhs, rhs } = func.inst(inst).kind else {
            return false;
        };
        let Some(result) = func.inst_result(inst) else {
            return false;
        };
        let Some(ty) = func.value_val_type(lhs) else {
            return false;
        };
        // Sub-word compares would need their upper bits normalized first.
        if !self.is_legal_type(ty) || ty.is_float() {
            return false;
        }
        let wide = arith_wide(ty) == Some(true);
        let Some(lhs_reg) = sel.reg_for_value(lhs) else {
            return false;
        };

        let imm = sel
            .func()
            .value_def(rhs)
            .const_val()
            .and_then(|c| c.as_int_sext(64))
            .filter(|&c| i32::try_from(c).is_ok());
        let cmp = if let Some(c) = imm {
            MachInst::new(if wide { CMP64_RI } else { CMP32_RI }, sel.cur_span)
                .with_op(MachOperand::vreg(lhs_reg))
                .with_op(MachOperand::Imm(c))
        } else {
            let Some(rhs_reg) = sel.reg_for_value(rhs) else {
                return false;
            };
            MachInst::new(if wide { CMP64_RR } else { CMP32_RR }, sel.cur_span)
                .with_op(MachOperand::vreg(lhs_reg))
                .with_op(MachOperand::vreg(rhs_reg))
        };
        sel.emit(cmp);

        let dst = sel.new_vreg(RegClass::Int);
        let set = MachInst::new(SETCC, sel.cur_span)
            .with_def(dst)
            .with_op(MachOperand::Imm(int_cc(pred)));
        sel.emit(set);
        sel.update_value_map(result, dst, 1);
        true
    }

    fn select_fcmp(&self, sel: &mut FastSelector<'_>, inst: InstId) -> bool {
        let func = sel.func();
        let InstKind::FCmp { pred, lhs, rhs } = func.inst(inst).kind else {
            return false;
        };
        let Some(result) = func.inst_result(inst) else {
            return false;
        };
        let Some(ty) = func.value_val_type(lhs) else {
            return false;
        };
        // ucomis reports unordered through CF, so only the above-style
        // predicates are NaN-safe; equality needs a parity check on top.
        let (a, b, code) = match pred {
            FloatCmp::Ogt => (lhs, rhs, cc::A),
            FloatCmp::Oge => (lhs, rhs, cc::AE),
            FloatCmp::Olt => (rhs, lhs, cc::A),
            FloatCmp::Ole => (rhs, lhs, cc::AE),
            FloatCmp::Oeq | FloatCmp::One => return false,
        };
        let opcode = match ty {
            ValType::F32 => UCOMISS,
            ValType::F64 => UCOMISD,
            _ => return false,
        };
        let Some(a_reg) = sel.reg_for_value(a) else {
            return false;
        };
        let Some(b_reg) = sel.reg_for_value(b) else {
            return false;
        };
        let cmp = MachInst::new(opcode, sel.cur_span)
            .with_op(MachOperand::vreg(a_reg))
            .with_op(MachOperand::vreg(b_reg));
        sel.emit(cmp);

        let dst = sel.new_vreg(RegClass::Int);
        let set = MachInst::new(SETCC, sel.cur_span)
            .with_def(dst)
            .with_op(MachOperand::Imm(code));
        sel.emit(set);
        sel.update_value_map(result, dst, 1);
        true
    }

    fn select_cond_br(&self, sel: &mut FastSelector<'_>, inst: InstId) -> bool {
        let func = sel.func();
        let InstKind::CondBr {
            cond,
            then_dest,
            else_dest,
        } = func.inst(inst).kind
        else {
            return false;
        };
        // Live-out values must reach their edge registers before the
        // control transfer.
        if !sel.handle_phi_nodes() {
            return false;
        }
        let Some(cond_reg) = sel.reg_for_value(cond) else {
            return false;
        };
        let test = MachInst::new(TEST32_RR, sel.cur_span)
            .with_op(MachOperand::vreg(cond_reg))
            .with_op(MachOperand::vreg(cond_reg));
        sel.emit(test);
        let jcc = MachInst::new(JCC, sel.cur_span)
            .with_op(MachOperand::Imm(cc::NE))
            .with_op(MachOperand::Block(then_dest));
        sel.emit(jcc);
        let cur = sel.cur_block();
        sel.mach.add_successor(cur, then_dest);
        sel.emit_branch(else_dest)
    }

    fn select_ret(&self, sel: &mut FastSelector<'_>, inst: InstId) -> bool {
        let func = sel.func();
        let InstKind::Ret { value } = func.inst(inst).kind else {
            return false;
        };
        let Some(info) = self.call_conv_info(func.sig.conv) else {
            return false;
        };
        if let Some(v) = value {
            let Some(ty) = func.value_val_type(v) else {
                return false;
            };
            let Some(reg) = sel.reg_for_value(v) else {
                return false;
            };
            let Some(phys) = info.ret_reg(self.reg_class(ty), 0) else {
                return false;
            };
            sel.emit_copy(phys, reg);
        }
        sel.emit(MachInst::new(RET, sel.cur_span));
        true
    }

    fn lower_overflow(
        &self,
        sel: &mut FastSelector<'_>,
        inst: InstId,
        intrinsic: Intrinsic,
    ) -> Option<()> {
        let func = sel.func();
        let (lhs, rhs) = sel.overflow_operands(inst)?;
        let result = func.inst_result(inst)?;
        let ty = func.value_val_type(lhs)?;
        if !matches!(ty, ValType::I32 | ValType::I64) {
            return None;
        }
        let (gop, code) = match intrinsic {
            Intrinsic::SAddOverflow => (GenericOp::Add, cc::O),
            Intrinsic::UAddOverflow => (GenericOp::Add, cc::B),
            Intrinsic::SSubOverflow => (GenericOp::Sub, cc::O),
            Intrinsic::USubOverflow => (GenericOp::Sub, cc::B),
            Intrinsic::SMulOverflow => (GenericOp::Mul, cc::O),
            // The widening unsigned multiply has implicit-register
            // constraints this path does not model.
            _ => return None,
        };

        let lhs_reg = sel.reg_for_value(lhs)?;
        // No strength reduction here: the overflow flag of the original
        // operation is the result.
        let val = match sel.const_int_sext(rhs) {
            Some(c) => match sel.emit_ri(gop, ty, lhs_reg, c) {
                Some(v) => v,
                None => {
                    let imm_reg = sel.emit_i(ty, c)?;
                    sel.emit_rr(gop, ty, lhs_reg, imm_reg)?
                }
            },
            None => {
                let rhs_reg = sel.reg_for_value(rhs)?;
                sel.emit_rr(gop, ty, lhs_reg, rhs_reg)?
            }
        };

        let pair = sel.mach.new_vreg_block(&[self.reg_class(ty), RegClass::Int]);
        let flag = sel.new_vreg(RegClass::Int);
        let set = MachInst::new(SETCC, sel.cur_span)
            .with_def(flag)
            .with_op(MachOperand::Imm(code));
        sel.emit(set);
        sel.emit_copy(pair, val);
        sel.emit_copy(pair.offset(1), flag);
        sel.update_value_map(result, pair, 2);
        Some(())
    }

    fn fold_load_into_binary(
        &self,
        sel: &mut FastSelector<'_>,
        user: InstId,
        load: InstId,
    ) -> Option<()> {
        let func = sel.func();
        let InstKind::Binary { op, lhs, rhs, .. } = func.inst(user).kind else {
            return None;
        };
        let load_res = func.inst_result(load)?;
        let result = func.inst_result(user)?;
        let ty = func.value_val_type(result)?;
        // The folded access width must match the operation width exactly.
        let wide = match ty {
            ValType::I32 => false,
            ValType::I64 | ValType::Ptr => true,
            _ => return None,
        };
        let other = if rhs == load_res {
            lhs
        } else if lhs == load_res && op.is_commutative() {
            rhs
        } else {
            return None;
        };
        use sparrow_ir::BinOp;
        let opcode = match (op, wide) {
            (BinOp::Add, false) => ADD32_RM,
            (BinOp::Add, true) => ADD64_RM,
            (BinOp::Sub, false) => SUB32_RM,
            (BinOp::Sub, true) => SUB64_RM,
            (BinOp::And, false) => AND32_RM,
            (BinOp::And, true) => AND64_RM,
            (BinOp::Or, false) => OR32_RM,
            (BinOp::Or, true) => OR64_RM,
            (BinOp::Xor, false) => XOR32_RM,
            (BinOp::Xor, true) => XOR64_RM,
            _ => return None,
        };
        let InstKind::Load { ptr, align, .. } = func.inst(load).kind else {
            return None;
        };

        let other_reg = sel.reg_for_value(other)?;
        let base = sel.reg_for_value(ptr)?;
        let dst = sel.new_vreg(RegClass::Int);
        let fused = MachInst::new(opcode, sel.cur_span)
            .with_def(dst)
            .with_op(MachOperand::vreg(other_reg))
            .with_op(MachOperand::Mem {
                base: MachReg::Virt(base),
                disp: 0,
            })
            .with_mem_info(MemInfo {
                size: ty.byte_size(8) as u8,
                align,
                volatile: false,
            });
        sel.emit(fused);
        sel.update_value_map(result, dst, 1);
        Some(())
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_table_promotes_small_integers() {
        let isa = X64Target::sysv();
        let narrow = isa.lookup(GenericOp::Add, ValType::I8).unwrap();
        let word = isa.lookup(GenericOp::Add, ValType::I32).unwrap();
        assert_eq!(narrow.reg, word.reg);
        let wide = isa.lookup(GenericOp::Add, ValType::Ptr).unwrap();
        assert_eq!(wide.reg, ADD64_RR);
        assert_eq!(wide.imm.unwrap().opcode, ADD64_RI);
        assert_eq!(wide.imm.unwrap().bits, 32);
    }

    #[test]
    fn test_shift_immediates_are_byte_sized() {
        let isa = X64Target::sysv();
        let entry = isa.lookup(GenericOp::Shl, ValType::I64).unwrap();
        assert_eq!(entry.imm.unwrap().bits, 8);
    }

    #[test]
    fn test_division_has_no_immediate_form() {
        let isa = X64Target::sysv();
        let entry = isa.lookup(GenericOp::SDiv, ValType::I32).unwrap();
        assert!(entry.imm.is_none());
        assert!(isa.lookup(GenericOp::SRem, ValType::I64).is_some());
    }

    #[test]
    fn test_float_ops_use_float_class() {
        let isa = X64Target::sysv();
        let entry = isa.lookup(GenericOp::FAdd, ValType::F64).unwrap();
        assert_eq!(entry.reg, ADDSD);
        assert_eq!(entry.class, RegClass::Float);
        assert!(isa.lookup(GenericOp::FAdd, ValType::I32).is_none());
    }

    #[test]
    fn test_movabs_takes_full_immediates() {
        let isa = X64Target::sysv();
        let entry = isa.lookup(GenericOp::MovImm, ValType::I64).unwrap();
        assert_eq!(entry.imm.unwrap().bits, 64);
        let entry = isa.lookup(GenericOp::MovImm, ValType::I32).unwrap();
        assert_eq!(entry.imm.unwrap().bits, 32);
    }

    #[test]
    fn test_cast_table() {
        let isa = X64Target::sysv();
        let zext = isa
            .lookup_cast(GenericOp::ZExt, ValType::I8, ValType::I32)
            .unwrap();
        assert_eq!(zext.reg, MOVZX32_8);
        let sext = isa
            .lookup_cast(GenericOp::SExt, ValType::I32, ValType::I64)
            .unwrap();
        assert_eq!(sext.reg, MOVSX64_32);
        let cvt = isa
            .lookup_cast(GenericOp::SiToFp, ValType::I32, ValType::F64)
            .unwrap();
        assert_eq!(cvt.class, RegClass::Float);
        assert_eq!(cvt.op_class, RegClass::Int);
        // Unsigned conversions are not expressible before AVX-512.
        assert!(isa
            .lookup_cast(GenericOp::UiToFp, ValType::I32, ValType::F32)
            .is_none());
        assert!(isa
            .lookup_cast(GenericOp::FpToUi, ValType::F64, ValType::I64)
            .is_none());
    }

    #[test]
    fn test_bitcast_crosses_register_classes() {
        let isa = X64Target::sysv();
        let entry = isa
            .lookup_cast(GenericOp::Bitcast, ValType::F64, ValType::I64)
            .unwrap();
        assert_eq!(entry.reg, MOVQ_F2G);
        assert_eq!(entry.class, RegClass::Int);
        assert_eq!(entry.op_class, RegClass::Float);
    }

    #[test]
    fn test_conventions() {
        let sysv = X64Target::sysv();
        let info = sysv.call_conv_info(CallConv::C).unwrap();
        assert_eq!(info.name, "sysv64");
        assert!(!info.shadow_slots);
        assert_eq!(info.int_args[0], RDI);

        let win = X64Target::win64();
        let info = win.call_conv_info(CallConv::Fast).unwrap();
        assert_eq!(info.name, "win64");
        assert!(info.shadow_slots);
        assert_eq!(info.shadow_bytes, 32);
        assert_eq!(info.int_args[0], RCX);

        // Unrecognized conventions force general selection.
        assert!(sysv.call_conv_info(CallConv::Cold).is_none());
    }

    #[test]
    fn test_library_call_set() {
        let isa = X64Target::sysv();
        assert!(isa.is_library_call("memset"));
        assert!(isa.is_library_call("memcmp"));
        // memcpy is reached through the intrinsic, which lowers to a
        // plain call here.
        assert!(!isa.is_library_call("memcpy"));
        assert!(!isa.is_library_call("printf"));
    }

    #[test]
    fn test_condition_codes() {
        assert_eq!(int_cc(IntCmp::Eq), 4);
        assert_eq!(int_cc(IntCmp::Ne), 5);
        assert_eq!(int_cc(IntCmp::Slt), 12);
        assert_eq!(int_cc(IntCmp::Ugt), 7);
    }
}
