//! Target override points.
//!
//! Every method is an offer: the engine presents one unit of work and the
//! target either performs it completely (returning `true`/`Some`) or
//! declines, in which case the engine runs its generic routine or gives
//! the instruction up to the general selector. Declining is never an
//! error, and a declining hook must leave no partial emission behind (the
//! engine snapshots and rolls back around the calls that need it).
//!
//! Hooks run synchronously and never re-enter the engine; they receive the
//! live selector and may use its full emission and cache surface.

use sparrow_ir::{InstId, ValType, ValueId};

use crate::call::CallDescriptor;
use crate::mach::VReg;
use crate::select::FastSelector;

/// The fixed capability set a target may override.
///
/// The default for every method declines, so a target implements only what
/// it can improve on or what has no generic routine (loads, stores,
/// compares, conditional branches, returns).
pub trait TargetHooks {
    /// Select one instruction the generic palette could not.
    fn select_inst(&self, sel: &mut FastSelector<'_>, inst: InstId) -> bool {
        let _ = (sel, inst);
        false
    }

    /// Lower the function's formal parameters in one step.
    fn lower_arguments(&self, sel: &mut FastSelector<'_>) -> bool {
        let _ = sel;
        false
    }

    /// Lower one call in one step.
    fn lower_call(&self, sel: &mut FastSelector<'_>, desc: &CallDescriptor) -> bool {
        let _ = (sel, desc);
        false
    }

    /// Lower an intrinsic call the generic dispatch does not absorb.
    fn lower_intrinsic(&self, sel: &mut FastSelector<'_>, inst: InstId) -> bool {
        let _ = (sel, inst);
        false
    }

    /// Materialize a constant the generic rules do not cover (or cover
    /// worse than the target can).
    fn materialize_constant(
        &self,
        sel: &mut FastSelector<'_>,
        value: ValueId,
        ty: ValType,
    ) -> Option<VReg> {
        let _ = (sel, value, ty);
        None
    }

    /// Materialize the address of a static stack allocation.
    fn materialize_alloca(&self, sel: &mut FastSelector<'_>, inst: InstId) -> Option<VReg> {
        let _ = (sel, inst);
        None
    }

    /// Materialize a floating-point positive zero.
    fn materialize_float_zero(&self, sel: &mut FastSelector<'_>, ty: ValType) -> Option<VReg> {
        let _ = (sel, ty);
        None
    }

    /// Rewrite `user` with `load` fused in as a memory operand. The engine
    /// has already certified legality; on `true` it deletes the standalone
    /// load.
    fn fold_load(&self, sel: &mut FastSelector<'_>, user: InstId, load: InstId) -> bool {
        let _ = (sel, user, load);
        false
    }
}

/// A target that declines everything; used by tests exercising the generic
/// paths in isolation.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullHooks;

impl TargetHooks for NullHooks {}
