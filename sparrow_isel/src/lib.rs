//! Fast-path instruction selection for the Sparrow backend.
//!
//! This crate lowers [`sparrow_ir`] functions to machine instructions one
//! IR instruction at a time, in program order, with no selection graph and
//! no lookahead beyond a handful of peephole folds. It trades code quality
//! for selection speed: anything it cannot lower cheaply is handed back to
//! the caller, which is expected to run a general selector over the
//! function instead.
//!
//! # Architecture
//!
//! - [`select`]: the engine. [`select_function`] drives one function;
//!   [`FastSelector`] holds the per-block state (value cache, emission
//!   cursor, register use counts) and the generic lowering palette.
//! - [`context`]: cross-block state — the value-to-register map with its
//!   fixup table, planted machine PHIs, and static alloca slots.
//! - [`target`]: the machine description ([`TargetIsa`]) and override
//!   points ([`TargetHooks`]), with [`target::x64`] as the reference
//!   target.
//! - [`call`]: call-site description and the generic call lowering walk.
//! - [`mach`]: the machine function produced by selection, all in virtual
//!   registers.
//! - [`cursor`]: the per-block emission cursor and its local value area.
//!
//! Failure is two-grained. A single instruction neither the generic
//! palette nor the target hook can select stops the function with
//! [`SelectError::UnsupportedInst`]; inside an attempt, partial emission
//! is rolled back so the machine function never holds half-selected
//! instructions.

#![deny(unsafe_op_in_unsafe_fn)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::cast_possible_truncation)]

mod args;
pub mod call;
pub mod config;
pub mod context;
pub mod cursor;
mod emit;
pub mod error;
pub mod mach;
mod phi;
pub mod select;
pub mod target;

pub use call::{ArgEntry, CallDescriptor, CalleeKind};
pub use config::{SelectStats, SelectorConfig};
pub use context::LowerCtx;
pub use error::{SelectError, SelectResult};
pub use mach::{
    FrameSlot, MachBlock, MachFunction, MachInst, MachOperand, MachReg, Opcode, PReg, RegClass,
    VReg,
};
pub use select::{select_function, FastSelector};
pub use target::{GenericOp, ImmForm, OpcodeEntry, TargetHooks, TargetIsa};
