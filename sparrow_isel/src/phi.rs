//! PHI live-out resolution.
//!
//! Terminator selection calls [`FastSelector::handle_phi_nodes`] before
//! emitting any branch: for every PHI at the head of a successor block, the
//! value flowing out of the current block is put in a register *here*, on
//! the edge's source side, and recorded as a pending operand. The records
//! become machine PHI operands in
//! [`finalize_phis`](crate::context::finalize_phis) once every block is
//! final, so later re-registrations still land via the fixup table.
//!
//! Failure is atomic: if any successor PHI cannot be resolved (aggregate or
//! otherwise illegal type, or an incoming value with no register), every
//! record made by this call is dropped and the terminator reports failure.

use smallvec::SmallVec;
use sparrow_ir::inst::InstKind;
use sparrow_ir::BlockId;

use crate::context::PhiLiveOut;
use crate::select::FastSelector;

impl<'a> FastSelector<'a> {
    /// Resolve the PHIs of every successor of the current block. Call
    /// before emitting the terminator; false means the terminator must not
    /// be selected on the fast path.
    pub fn handle_phi_nodes(&mut self) -> bool {
        let mark = self.ctx.num_phi_live_outs();
        if self.record_successor_phis().is_some() {
            true
        } else {
            self.ctx.truncate_phi_live_outs(mark);
            false
        }
    }

    fn record_successor_phis(&mut self) -> Option<()> {
        let func = self.func;
        let pred = self.cur_block;
        // Both arms of a conditional branch may target the same block;
        // resolve each successor once.
        let mut seen: SmallVec<[BlockId; 2]> = SmallVec::new();
        for succ in func.block_successors(pred) {
            if seen.contains(&succ) {
                continue;
            }
            seen.push(succ);
            for &inst in func.block_insts(succ) {
                let InstKind::Phi { ref incoming } = func.inst(inst).kind else {
                    break;
                };
                let Some(result) = func.inst_result(inst) else {
                    continue;
                };
                if func.use_count(result) == 0 {
                    continue;
                }
                // No planted machine PHI means the type was not carryable.
                let phi_index = self.ctx.phi_index(inst)?;
                self.ctx.value_reg(result)?;
                let &(_, value) = incoming.iter().find(|&&(p, _)| p == pred)?;
                let reg = self.reg_for_value(value)?;
                self.ctx.record_phi_live_out(PhiLiveOut {
                    block: succ,
                    phi_index,
                    reg,
                    pred,
                });
            }
        }
        Some(())
    }
}

// =============================================================================
// Tests
// =============================================================================
