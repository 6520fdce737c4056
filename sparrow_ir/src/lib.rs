//! Sparrow IR: the typed SSA program representation consumed by the
//! fast instruction selector.
//!
//! The crate is deliberately small. It defines:
//!
//! - [`types`]: scalar and aggregate types with C-style layout queries.
//! - [`value`]: SSA values and constants.
//! - [`inst`]: the instruction palette, attribute bits, and intrinsics.
//! - [`func`]: finished functions and their query surface.
//! - [`builder`]: the only way to construct a function.
//! - [`span`]: byte ranges tying IR back to source text.
//!
//! Functions are built once and frozen; every consumer works off the
//! read-only accessors on [`Function`]. Block 0 is the entry block,
//! instruction lists are in program order, and each block ends with
//! exactly one terminator.

#![deny(unsafe_op_in_unsafe_fn)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::cast_possible_truncation)]

pub mod builder;
pub mod func;
pub mod inst;
pub mod span;
pub mod types;
pub mod value;

pub use builder::FunctionBuilder;
pub use func::{BlockData, BlockId, Function, Param, Signature};
pub use inst::{
    ArgAttrs, BinOp, CallConv, CastOp, FloatCmp, InstData, InstId, InstKind, IntCmp, Intrinsic,
};
pub use span::Span;
pub use types::{Type, ValType};
pub use value::{ConstVal, ValueDef, ValueId};
