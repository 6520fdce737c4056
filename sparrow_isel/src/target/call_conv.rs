//! Calling-convention classification.
//!
//! A [`CallConvInfo`] is a static table describing how one convention
//! places arguments and results: the register sequences per class, the
//! stack rules, and the caller-saved set a call clobbers. [`ArgAssigner`]
//! walks a table, handing out the next location for each argument in
//! declaration order.
//!
//! Two sequencing schemes exist: System-V-style conventions consume the
//! integer and float sequences independently, while Windows-style
//! conventions advance one shared position so every argument burns a slot
//! from both sequences.

use crate::mach::{PReg, RegClass};

/// One calling convention's argument and return placement rules.
#[derive(Debug)]
pub struct CallConvInfo {
    /// Convention name, for logging.
    pub name: &'static str,
    /// Integer argument registers, in assignment order.
    pub int_args: &'static [PReg],
    /// Float argument registers, in assignment order.
    pub float_args: &'static [PReg],
    /// Integer return registers, in result order.
    pub int_rets: &'static [PReg],
    /// Float return registers, in result order.
    pub float_rets: &'static [PReg],
    /// The stack pointer outgoing stack arguments are addressed from.
    pub stack_ptr: PReg,
    /// Caller-saved registers a call may overwrite.
    pub clobbers: &'static [PReg],
    /// Every argument consumes one position from both register sequences
    /// (the Windows x64 rule).
    pub shadow_slots: bool,
    /// Bytes of callee-addressable spill space below the first outgoing
    /// stack argument (the Windows x64 home area; 0 elsewhere).
    pub shadow_bytes: i32,
    /// Required stack alignment at the call, in bytes.
    pub stack_align: u32,
}

impl CallConvInfo {
    /// Number of return registers in `class`.
    #[inline]
    #[must_use]
    pub fn num_ret_regs(&self, class: RegClass) -> usize {
        match class {
            RegClass::Int => self.int_rets.len(),
            RegClass::Float => self.float_rets.len(),
        }
    }

    /// The `index`-th return register of `class`.
    #[inline]
    #[must_use]
    pub fn ret_reg(&self, class: RegClass, index: usize) -> Option<PReg> {
        match class {
            RegClass::Int => self.int_rets.get(index).copied(),
            RegClass::Float => self.float_rets.get(index).copied(),
        }
    }
}

/// Where one argument goes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArgLoc {
    /// A convention register.
    Reg(PReg),
    /// A byte offset from the outgoing stack pointer.
    Stack(i32),
}

/// Walks a [`CallConvInfo`], assigning each argument its location.
#[derive(Debug)]
pub struct ArgAssigner {
    info: &'static CallConvInfo,
    next_int: usize,
    next_float: usize,
    stack_offset: i32,
}

impl ArgAssigner {
    /// Start an assignment walk for `info`.
    #[must_use]
    pub fn new(info: &'static CallConvInfo) -> Self {
        ArgAssigner {
            info,
            next_int: 0,
            next_float: 0,
            stack_offset: info.shadow_bytes,
        }
    }

    /// The location of the next argument of `class`.
    pub fn next(&mut self, class: RegClass) -> ArgLoc {
        let (seq, pos) = match class {
            RegClass::Int => (self.info.int_args, &mut self.next_int),
            RegClass::Float => (self.info.float_args, &mut self.next_float),
        };
        let reg = seq.get(*pos).copied();
        match reg {
            Some(p) => {
                if self.info.shadow_slots {
                    self.next_int += 1;
                    self.next_float += 1;
                } else {
                    *pos += 1;
                }
                ArgLoc::Reg(p)
            }
            None => {
                if self.info.shadow_slots {
                    self.next_int += 1;
                    self.next_float += 1;
                }
                let offset = self.stack_offset;
                self.stack_offset += 8;
                ArgLoc::Stack(offset)
            }
        }
    }

    /// Outgoing stack bytes consumed so far, shadow area included.
    #[inline]
    #[must_use]
    pub fn stack_bytes(&self) -> i32 {
        self.stack_offset
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::target::x64;

    #[test]
    fn test_sysv_sequences_are_independent() {
        let mut a = ArgAssigner::new(&x64::SYSV_INFO);
        // int, float, int: the float does not consume an int position.
        let i0 = a.next(RegClass::Int);
        let f0 = a.next(RegClass::Float);
        let i1 = a.next(RegClass::Int);
        assert_eq!(i0, ArgLoc::Reg(x64::SYSV_INFO.int_args[0]));
        assert_eq!(f0, ArgLoc::Reg(x64::SYSV_INFO.float_args[0]));
        assert_eq!(i1, ArgLoc::Reg(x64::SYSV_INFO.int_args[1]));
    }

    #[test]
    fn test_sysv_overflow_goes_to_stack() {
        let mut a = ArgAssigner::new(&x64::SYSV_INFO);
        for _ in 0..x64::SYSV_INFO.int_args.len() {
            assert!(matches!(a.next(RegClass::Int), ArgLoc::Reg(_)));
        }
        assert_eq!(a.next(RegClass::Int), ArgLoc::Stack(0));
        assert_eq!(a.next(RegClass::Int), ArgLoc::Stack(8));
        assert_eq!(a.stack_bytes(), 16);
    }

    #[test]
    fn test_win64_shadow_slots_burn_both_sequences() {
        let mut a = ArgAssigner::new(&x64::WIN64_INFO);
        // int, float, int: positions 0, 1, 2 of the respective sequences.
        assert_eq!(
            a.next(RegClass::Int),
            ArgLoc::Reg(x64::WIN64_INFO.int_args[0])
        );
        assert_eq!(
            a.next(RegClass::Float),
            ArgLoc::Reg(x64::WIN64_INFO.float_args[1])
        );
        assert_eq!(
            a.next(RegClass::Int),
            ArgLoc::Reg(x64::WIN64_INFO.int_args[2])
        );
    }

    #[test]
    fn test_win64_stack_args_start_past_home_area() {
        let mut a = ArgAssigner::new(&x64::WIN64_INFO);
        for _ in 0..4 {
            assert!(matches!(a.next(RegClass::Int), ArgLoc::Reg(_)));
        }
        assert_eq!(a.next(RegClass::Int), ArgLoc::Stack(32));
        assert_eq!(a.next(RegClass::Float), ArgLoc::Stack(40));
    }

    #[test]
    fn test_ret_reg_queries() {
        let info = &x64::SYSV_INFO;
        assert_eq!(info.num_ret_regs(RegClass::Int), 2);
        assert_eq!(info.ret_reg(RegClass::Int, 0), Some(info.int_rets[0]));
        assert_eq!(info.ret_reg(RegClass::Int, 5), None);
    }
}
