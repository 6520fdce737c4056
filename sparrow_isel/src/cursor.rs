//! Insertion-point bookkeeping for one machine block under construction.
//!
//! Selection emits into a block at a moving index, but materialized
//! constants and other block-local values are kept together in a prefix of
//! the block (the *local value area*) so the cache in
//! [`FastSelector`](crate::select::FastSelector) can hand the same register
//! to every later use in the block. The cursor tracks both positions and
//! keeps them consistent as insertions shift indices:
//!
//! - the *general point* `insert_at`, where ordinary emission inserts;
//! - the *area boundary* `local_end`, one past the local value area.
//!
//! Outside the area the general point never precedes the boundary. Entering
//! the area (a scoped, non-reentrant operation) parks the general point at
//! the boundary so emissions grow the area in place; leaving restores the
//! saved point shifted by the growth, since every area insertion happened at
//! or before it. Savepoints use the same arithmetic to delimit the exact
//! run of instructions a failed selection attempt emitted.

use sparrow_ir::Span;

/// Saved cursor state, taken before a speculative emission sequence or when
/// entering the local value area.
///
/// A snapshot records positions by area-insertion count rather than raw
/// index, so it stays meaningful after insertions shift the block.
#[derive(Debug, Clone, Copy)]
#[must_use = "a snapshot must be handed back to leave_local_area or rollback_start"]
pub struct CursorSnapshot {
    insert_at: usize,
    local_inserted: u32,
    span: Span,
}

/// The two insertion positions of the block under construction.
#[derive(Debug)]
pub struct EmissionCursor {
    insert_at: usize,
    local_end: usize,
    /// Instructions inserted into the area since the block started. This
    /// only grows; boundary collapses from flushes do not rewind it.
    local_inserted: u32,
    in_local_area: bool,
}

impl EmissionCursor {
    /// A cursor positioned at the start of an empty region.
    pub fn new() -> Self {
        EmissionCursor {
            insert_at: 0,
            local_end: 0,
            local_inserted: 0,
            in_local_area: false,
        }
    }

    /// Re-position for a new block whose first `block_start` instructions
    /// (PHI placeholders) are already present and must stay first.
    pub fn reset(&mut self, block_start: usize) {
        debug_assert!(!self.in_local_area, "block changed inside local area");
        self.insert_at = block_start;
        self.local_end = block_start;
        self.local_inserted = 0;
        self.in_local_area = false;
    }

    /// The index the next instruction is inserted at.
    #[inline]
    pub fn insert_index(&self) -> usize {
        self.insert_at
    }

    /// One past the local value area.
    #[inline]
    pub fn local_end(&self) -> usize {
        self.local_end
    }

    /// Whether the cursor is currently parked in the local value area.
    #[inline]
    pub fn in_local_area(&self) -> bool {
        self.in_local_area
    }

    /// Account for one instruction inserted at [`insert_index`].
    ///
    /// [`insert_index`]: Self::insert_index
    pub fn advance(&mut self) {
        self.insert_at += 1;
        if self.in_local_area {
            self.local_end += 1;
            self.local_inserted += 1;
        }
    }

    /// Park the cursor at the area boundary so emissions grow the area.
    ///
    /// `span` is the selector's current source tag, restored on leave; area
    /// emissions themselves carry no source tag.
    pub fn enter_local_area(&mut self, span: Span) -> CursorSnapshot {
        debug_assert!(!self.in_local_area, "local value area entered twice");
        let snap = CursorSnapshot {
            insert_at: self.insert_at,
            local_inserted: self.local_inserted,
            span,
        };
        self.insert_at = self.local_end;
        self.in_local_area = true;
        snap
    }

    /// Restore the general point from `snap`, shifted right by the area
    /// growth since it was taken, and hand back the saved source tag.
    pub fn leave_local_area(&mut self, snap: CursorSnapshot) -> Span {
        debug_assert!(self.in_local_area, "leave without a matching enter");
        self.in_local_area = false;
        let grown = (self.local_inserted - snap.local_inserted) as usize;
        self.insert_at = snap.insert_at + grown;
        debug_assert!(self.insert_at >= self.local_end);
        snap.span
    }

    /// Snapshot the general point before a speculative emission sequence.
    pub fn savepoint(&self, span: Span) -> CursorSnapshot {
        debug_assert!(!self.in_local_area, "savepoint inside local area");
        CursorSnapshot {
            insert_at: self.insert_at,
            local_inserted: self.local_inserted,
            span,
        }
    }

    /// Where the emissions recorded since `snap` begin.
    ///
    /// The result never reaches into the local value area, so cached
    /// materializations survive a rollback.
    pub fn rollback_start(&self, snap: &CursorSnapshot) -> usize {
        debug_assert!(!self.in_local_area, "rollback inside local area");
        let grown = (self.local_inserted - snap.local_inserted) as usize;
        (snap.insert_at + grown).max(self.local_end)
    }

    /// Re-derive the general point after `[start, insert_index)` was
    /// deleted.
    pub fn rolled_back(&mut self, start: usize) {
        debug_assert!(start >= self.local_end);
        debug_assert!(start <= self.insert_at);
        self.insert_at = start;
    }

    /// Collapse the area boundary forward to the general point, so values
    /// materialized from here on stay after everything already emitted.
    pub fn flush_area(&mut self) {
        debug_assert!(!self.in_local_area, "flush inside local area");
        debug_assert!(self.insert_at >= self.local_end);
        self.local_end = self.insert_at;
    }
}

impl Default for EmissionCursor {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn advance_n(c: &mut EmissionCursor, n: usize) {
        for _ in 0..n {
            c.advance();
        }
    }

    #[test]
    fn test_general_emission_moves_point() {
        let mut c = EmissionCursor::new();
        c.reset(2);
        assert_eq!(c.insert_index(), 2);
        advance_n(&mut c, 3);
        assert_eq!(c.insert_index(), 5);
        assert_eq!(c.local_end(), 2);
    }

    #[test]
    fn test_enter_leave_shifts_by_growth() {
        let mut c = EmissionCursor::new();
        c.reset(0);
        advance_n(&mut c, 4);

        let snap = c.enter_local_area(Span::dummy());
        assert_eq!(c.insert_index(), 0);
        advance_n(&mut c, 2);
        assert_eq!(c.local_end(), 2);

        c.leave_local_area(snap);
        // The four earlier instructions now sit at 2..6.
        assert_eq!(c.insert_index(), 6);
        assert!(!c.in_local_area());
    }

    #[test]
    fn test_leave_without_growth_restores_exactly() {
        let mut c = EmissionCursor::new();
        c.reset(1);
        advance_n(&mut c, 2);
        let snap = c.enter_local_area(Span::new(10, 20));
        let span = c.leave_local_area(snap);
        assert_eq!(c.insert_index(), 3);
        assert_eq!(span, Span::new(10, 20));
    }

    #[test]
    fn test_rollback_range_brackets_attempt() {
        let mut c = EmissionCursor::new();
        c.reset(0);
        advance_n(&mut c, 1);

        let save = c.savepoint(Span::dummy());
        // The attempt materializes one local value, then emits two
        // ordinary instructions.
        let snap = c.enter_local_area(Span::dummy());
        c.advance();
        c.leave_local_area(snap);
        advance_n(&mut c, 2);

        let start = c.rollback_start(&save);
        assert_eq!(start, 2);
        assert_eq!(c.insert_index(), 4);
        c.rolled_back(start);
        assert_eq!(c.insert_index(), 2);
        // The materialized value at index 0..1 is untouched.
        assert_eq!(c.local_end(), 1);
    }

    #[test]
    fn test_flush_moves_boundary_forward() {
        let mut c = EmissionCursor::new();
        c.reset(0);
        let snap = c.enter_local_area(Span::dummy());
        c.advance();
        c.leave_local_area(snap);
        advance_n(&mut c, 2);
        assert_eq!(c.local_end(), 1);

        c.flush_area();
        assert_eq!(c.local_end(), 3);

        // Materializations after the flush land after the flush point.
        let snap = c.enter_local_area(Span::dummy());
        assert_eq!(c.insert_index(), 3);
        c.advance();
        c.leave_local_area(snap);
        assert_eq!(c.insert_index(), 4);
    }

    #[test]
    fn test_rollback_never_reaches_into_area() {
        let mut c = EmissionCursor::new();
        c.reset(0);
        let save = c.savepoint(Span::dummy());
        // The attempt emits, then flushes (a call path), then materializes
        // one value and emits once more before failing.
        advance_n(&mut c, 2);
        c.flush_area();
        let snap = c.enter_local_area(Span::dummy());
        c.advance();
        c.leave_local_area(snap);
        c.advance();

        // Everything before the flushed boundary is committed; only the
        // post-flush ordinary emission is deleted, and the materialized
        // value at index 2 survives.
        let start = c.rollback_start(&save);
        assert_eq!(start, 3);
        assert_eq!(c.insert_index(), 4);
        c.rolled_back(start);
        assert_eq!(c.insert_index(), 3);
        assert_eq!(c.local_end(), 3);
    }

    #[test]
    fn test_reset_clears_block_state() {
        let mut c = EmissionCursor::new();
        c.reset(0);
        let snap = c.enter_local_area(Span::dummy());
        c.advance();
        c.leave_local_area(snap);
        c.reset(3);
        assert_eq!(c.insert_index(), 3);
        assert_eq!(c.local_end(), 3);
    }
}
