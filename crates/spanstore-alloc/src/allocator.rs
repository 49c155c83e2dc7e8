use std::collections::HashMap;

use spanstore_set::OrderedSet;
use tracing::{debug, error};

use crate::state::{AllocStats, Span, SpanState};

/// Tracks which byte ranges of a medium are free, in use, or changing state
/// within the current transaction.
///
/// The border equal to the high-water mark is always present and marks the
/// start of the unbounded free tail. Only free spans below the high-water
/// mark are kept in the size index.
#[derive(Debug, Clone)]
pub struct SpaceAllocator {
    borders: OrderedSet,
    states: HashMap<u64, SpanState>,
    /// Borders whose span is in a pending state.
    changed: OrderedSet,
    /// Distinct lengths of free spans.
    free_sizes: OrderedSet,
    /// Free span starts keyed by span length.
    free_by_size: HashMap<u64, OrderedSet>,
}

impl Default for SpaceAllocator {
    fn default() -> Self {
        Self::new()
    }
}

impl SpaceAllocator {
    /// An allocator over an empty address space.
    pub fn new() -> Self {
        let mut borders = OrderedSet::new();
        borders.insert(0);
        let mut states = HashMap::new();
        states.insert(0, SpanState::Free);
        Self {
            borders,
            states,
            changed: OrderedSet::new(),
            free_sizes: OrderedSet::new(),
            free_by_size: HashMap::new(),
        }
    }

    /// One past the last byte that is not part of the free tail.
    pub fn high_water_mark(&self) -> u64 {
        self.borders.max().unwrap_or(0)
    }

    /// Whether any span is waiting on a commit or rollback.
    pub fn has_pending(&self) -> bool {
        !self.changed.is_empty()
    }

    /// Start of a free region of at least `size` bytes.
    ///
    /// Picks the smallest free span length that fits, then the lowest span of
    /// that length. Falls back to the high-water mark. Nothing is reserved;
    /// follow up with [`SpaceAllocator::mark_used`].
    pub fn available(&self, size: u64) -> u64 {
        self.free_sizes
            .ceil(size)
            .and_then(|len| self.free_by_size.get(&len))
            .and_then(OrderedSet::min)
            .unwrap_or_else(|| self.high_water_mark())
    }

    /// Reserve `[loc, loc + len)` for the current transaction.
    ///
    /// The range must lie within a single free span or at or beyond the
    /// high-water mark.
    pub fn mark_used(&mut self, loc: u64, len: u64) {
        self.check_args("mark_used", loc, len);
        if loc < self.high_water_mark() {
            let (start, end) = self.span_bounds(loc);
            if self.state_of(start) != SpanState::Free || loc + len > end {
                self.violation(
                    "mark_used on a range that is not one free span",
                    loc,
                    len,
                );
            }
        }
        self.set_state(loc, len, SpanState::PendingUse);
    }

    /// Release `[loc, loc + len)`.
    ///
    /// Used bytes become PendingFree until the next commit; bytes reserved in
    /// this transaction go straight back to Free.
    pub fn mark_free(&mut self, loc: u64, len: u64) {
        self.check_args("mark_free", loc, len);
        if loc >= self.high_water_mark() {
            self.violation("mark_free beyond the high-water mark", loc, len);
        }
        let (start, end) = self.span_bounds(loc);
        let next = match self.state_of(start) {
            SpanState::Used => SpanState::PendingFree,
            SpanState::PendingUse => SpanState::Free,
            _ => self.violation("mark_free on a range that is not in use", loc, len),
        };
        if loc + len > end {
            self.violation("mark_free on a range spanning several spans", loc, len);
        }
        self.set_state(loc, len, next);
    }

    /// Make every pending change permanent.
    pub fn commit(&mut self) {
        let pending = self.changed.len();
        self.resolve(SpanState::PendingFree, SpanState::PendingUse);
        debug!(pending, hwm = self.high_water_mark(), "allocator committed");
    }

    /// Undo every pending change.
    pub fn rollback(&mut self) {
        let pending = self.changed.len();
        self.resolve(SpanState::PendingUse, SpanState::PendingFree);
        debug!(pending, hwm = self.high_water_mark(), "allocator rolled back");
    }

    /// The span containing `offset`, or `None` past the high-water mark.
    pub fn span_at(&self, offset: u64) -> Option<Span> {
        if offset >= self.high_water_mark() {
            return None;
        }
        let (start, end) = self.span_bounds(offset);
        Some(Span {
            start,
            len: end - start,
            state: self.state_of(start),
        })
    }

    /// Every span below the high-water mark, in address order.
    pub fn spans(&self) -> Vec<Span> {
        let borders = self.borders.values();
        borders
            .windows(2)
            .map(|w| Span {
                start: w[0],
                len: w[1] - w[0],
                state: self.state_of(w[0]),
            })
            .collect()
    }

    /// The lowest free span below the high-water mark.
    pub fn first_gap(&self) -> Option<Span> {
        let hwm = self.high_water_mark();
        let mut border = self.borders.min()?;
        while border < hwm {
            let end = self.borders.ceil(border + 1)?;
            if self.state_of(border) == SpanState::Free {
                return Some(Span {
                    start: border,
                    len: end - border,
                    state: SpanState::Free,
                });
            }
            border = end;
        }
        None
    }

    pub fn stats(&self) -> AllocStats {
        let mut stats = AllocStats {
            high_water_mark: self.high_water_mark(),
            size_classes: self.free_sizes.len(),
            ..AllocStats::default()
        };
        for span in self.spans() {
            stats.span_count += 1;
            let bucket = match span.state {
                SpanState::Free => &mut stats.free_bytes,
                SpanState::Used => &mut stats.used_bytes,
                SpanState::PendingUse => &mut stats.pending_use_bytes,
                SpanState::PendingFree => &mut stats.pending_free_bytes,
            };
            *bucket += span.len;
        }
        stats
    }

    // --- span bookkeeping ---

    fn check_args(&self, op: &str, loc: u64, len: u64) {
        if len == 0 || loc.checked_add(len).is_none() {
            self.violation(&format!("{op} called with an empty or overflowing range"), loc, len);
        }
    }

    /// Bounds `[start, end)` of the span containing `offset < hwm`.
    fn span_bounds(&self, offset: u64) -> (u64, u64) {
        let start = self.borders.floor(offset);
        let end = self.borders.ceil(offset + 1);
        match (start, end) {
            (Some(start), Some(end)) => (start, end),
            _ => self.violation("no span contains offset", offset, 0),
        }
    }

    fn state_of(&self, border: u64) -> SpanState {
        match self.states.get(&border) {
            Some(state) => *state,
            None => self.violation("border has no state", border, 0),
        }
    }

    /// Record the state of the span starting at `border`, keeping the
    /// changed set in step with the pending bit.
    fn put_state(&mut self, border: u64, state: SpanState) {
        self.states.insert(border, state);
        if state.is_pending() {
            self.changed.insert(border);
        } else {
            self.changed.remove(border);
        }
    }

    fn add_free(&mut self, start: u64, len: u64) {
        self.free_sizes.insert(len);
        self.free_by_size.entry(len).or_default().insert(start);
    }

    fn remove_free(&mut self, start: u64, len: u64) {
        if let Some(starts) = self.free_by_size.get_mut(&len) {
            starts.remove(start);
            if starts.is_empty() {
                self.free_by_size.remove(&len);
                self.free_sizes.remove(len);
            }
        }
    }

    /// Give `[loc, loc + len)` the state `state`, splitting the containing
    /// span as needed and coalescing afterwards.
    fn set_state(&mut self, loc: u64, len: u64, state: SpanState) {
        let end = loc + len;
        let hwm = self.high_water_mark();
        if loc >= hwm {
            if state == SpanState::Free {
                return;
            }
            // Grow: the old tail up to `end` becomes an ordinary free span.
            self.borders.insert(end);
            self.put_state(end, SpanState::Free);
            self.add_free(hwm, end - hwm);
        }

        let (start, stop) = self.span_bounds(loc);
        if end > stop {
            self.violation("set_state across a span border", loc, len);
        }
        let old = self.state_of(start);
        if old == state {
            return;
        }

        if old == SpanState::Free {
            self.remove_free(start, stop - start);
        }
        if start < loc {
            self.borders.insert(loc);
            if old == SpanState::Free {
                self.add_free(start, loc - start);
            }
        }
        if end < stop {
            self.borders.insert(end);
            self.put_state(end, old);
            if old == SpanState::Free {
                self.add_free(end, stop - end);
            }
        }
        self.put_state(loc, state);
        if state == SpanState::Free {
            self.add_free(loc, len);
        }

        self.check_border(loc);
        self.check_border(end);
    }

    /// Drop `border` if the spans on either side now share a state.
    fn check_border(&mut self, border: u64) {
        if !self.borders.contains(border) || Some(border) == self.borders.min() {
            return;
        }
        let hwm = self.high_water_mark();
        let before = match self.borders.floor(border - 1) {
            Some(before) => before,
            None => self.violation("border without a predecessor", border, 0),
        };
        let state = self.state_of(border);
        if self.state_of(before) != state {
            return;
        }

        self.borders.remove(border);
        self.states.remove(&border);
        self.changed.remove(border);

        if border == hwm {
            // A free span now runs into the tail; the high-water mark drops to `before`.
            self.remove_free(before, border - before);
            return;
        }
        if state == SpanState::Free {
            let after = match self.borders.ceil(border + 1) {
                Some(after) => after,
                None => self.violation("border without a successor", border, 0),
            };
            self.remove_free(border, after - border);
            self.remove_free(before, border - before);
            self.add_free(before, after - before);
        }
    }

    /// Settle every pending span: `to_free` becomes Free, `to_use` becomes Used.
    fn resolve(&mut self, to_free: SpanState, to_use: SpanState) {
        for border in self.changed.values() {
            // An earlier merge in this pass may have absorbed the border.
            if !self.borders.contains(border) {
                continue;
            }
            let end = match self.borders.ceil(border + 1) {
                Some(end) => end,
                None => self.violation("pending span without an end", border, 0),
            };
            let state = self.state_of(border);
            if state == to_free {
                self.put_state(border, SpanState::Free);
                self.add_free(border, end - border);
            } else if state == to_use {
                self.put_state(border, SpanState::Used);
            } else {
                self.violation("changed border is not pending", border, end - border);
            }
            self.check_border(border);
            self.check_border(end);
        }
        self.changed.clear();
    }

    fn violation(&self, what: &str, loc: u64, len: u64) -> ! {
        error!(
            loc,
            len,
            hwm = self.high_water_mark(),
            spans = ?self.spans(),
            "allocator invariant violated: {what}"
        );
        panic!("allocator invariant violated: {what} (loc {loc}, len {len})");
    }

    /// Panics unless spans tile `[0, hwm)`, neighbours differ, the changed
    /// set matches the pending spans and the size index matches the free
    /// spans.
    #[cfg(test)]
    pub(crate) fn check_invariants(&self) {
        let spans = self.spans();
        let total: u64 = spans.iter().map(|s| s.len).sum();
        assert_eq!(total, self.high_water_mark(), "spans do not tile the space");
        assert_eq!(self.borders.min(), Some(0));
        assert_eq!(self.states.len(), self.borders.len());
        assert_eq!(self.state_of(self.high_water_mark()), SpanState::Free);
        for pair in spans.windows(2) {
            assert_ne!(pair[0].state, pair[1].state, "adjacent spans share a state");
        }
        if let Some(last) = spans.last() {
            assert_ne!(last.state, SpanState::Free, "free span before the tail");
        }

        let pending: Vec<u64> = spans
            .iter()
            .filter(|s| s.state.is_pending())
            .map(|s| s.start)
            .collect();
        assert_eq!(self.changed.values(), pending);

        let mut indexed = 0;
        for span in spans.iter().filter(|s| s.state == SpanState::Free) {
            assert!(self.free_sizes.contains(span.len));
            assert!(self.free_by_size[&span.len].contains(span.start));
            indexed += 1;
        }
        let total_indexed: usize = self.free_by_size.values().map(OrderedSet::len).sum();
        assert_eq!(indexed, total_indexed, "stale entries in the size index");
        assert_eq!(self.free_sizes.len(), self.free_by_size.len());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn state_at(alloc: &SpaceAllocator, offset: u64) -> Option<SpanState> {
        alloc.span_at(offset).map(|s| s.state)
    }

    #[test]
    fn empty_allocator_grows_from_zero() {
        let alloc = SpaceAllocator::new();
        assert_eq!(alloc.high_water_mark(), 0);
        assert_eq!(alloc.available(100), 0);
        assert!(alloc.spans().is_empty());
        alloc.check_invariants();
    }

    #[test]
    fn use_extends_the_high_water_mark() {
        let mut alloc = SpaceAllocator::new();
        alloc.mark_used(0, 10);
        assert_eq!(alloc.high_water_mark(), 10);
        assert_eq!(state_at(&alloc, 0), Some(SpanState::PendingUse));
        assert_eq!(alloc.available(5), 10);
        alloc.check_invariants();
    }

    #[test]
    fn use_past_the_tail_leaves_a_free_gap() {
        let mut alloc = SpaceAllocator::new();
        alloc.mark_used(20, 5);
        alloc.commit();
        assert_eq!(alloc.high_water_mark(), 25);
        assert_eq!(state_at(&alloc, 0), Some(SpanState::Free));
        assert_eq!(alloc.available(20), 0);
        assert_eq!(alloc.available(21), 25);
        alloc.check_invariants();
    }

    #[test]
    fn commit_and_rollback_of_allocations() {
        let mut alloc = SpaceAllocator::new();
        alloc.mark_used(0, 8);
        alloc.commit();
        assert_eq!(state_at(&alloc, 0), Some(SpanState::Used));
        assert!(!alloc.has_pending());

        alloc.mark_used(8, 8);
        alloc.rollback();
        assert_eq!(alloc.high_water_mark(), 8);
        assert_eq!(state_at(&alloc, 8), None);
        alloc.check_invariants();
    }

    #[test]
    fn free_of_used_is_deferred() {
        let mut alloc = SpaceAllocator::new();
        alloc.mark_used(0, 30);
        alloc.commit();

        alloc.mark_free(10, 10);
        assert_eq!(state_at(&alloc, 10), Some(SpanState::PendingFree));
        assert_eq!(alloc.available(10), 30, "pending-free bytes are not reusable yet");

        alloc.rollback();
        assert_eq!(alloc.spans().len(), 1);
        assert_eq!(state_at(&alloc, 15), Some(SpanState::Used));

        alloc.mark_free(10, 10);
        alloc.commit();
        assert_eq!(state_at(&alloc, 15), Some(SpanState::Free));
        assert_eq!(alloc.available(10), 10);
        alloc.check_invariants();
    }

    #[test]
    fn free_of_pending_use_is_immediate() {
        let mut alloc = SpaceAllocator::new();
        alloc.mark_used(0, 10);
        alloc.mark_used(10, 10);
        alloc.mark_free(0, 10);
        assert_eq!(state_at(&alloc, 0), Some(SpanState::Free));
        assert_eq!(alloc.available(10), 0);
        alloc.check_invariants();
    }

    #[test]
    fn freeing_the_last_record_shrinks_the_high_water_mark() {
        let mut alloc = SpaceAllocator::new();
        alloc.mark_used(0, 10);
        alloc.mark_used(10, 10);
        alloc.commit();
        alloc.mark_free(10, 10);
        alloc.commit();
        assert_eq!(alloc.high_water_mark(), 10);
        alloc.check_invariants();
    }

    #[test]
    fn best_fit_by_size_class() {
        let mut alloc = SpaceAllocator::new();
        // [used 0..10][x 10..60][used 60..70][y 70..80][used 80..90]
        alloc.mark_used(0, 90);
        alloc.commit();
        alloc.mark_free(10, 50);
        alloc.mark_free(70, 10);
        alloc.commit();

        assert_eq!(alloc.available(8), 70, "smallest class that fits");
        assert_eq!(alloc.available(10), 70);
        assert_eq!(alloc.available(11), 10);
        assert_eq!(alloc.available(51), 90);
        alloc.check_invariants();
    }

    #[test]
    fn interior_use_splits_a_free_span() {
        let mut alloc = SpaceAllocator::new();
        alloc.mark_used(0, 100);
        alloc.commit();
        alloc.mark_free(0, 100);
        alloc.mark_used(100, 1);
        alloc.commit();
        assert_eq!(alloc.high_water_mark(), 101);

        alloc.mark_used(40, 20);
        let spans = alloc.spans();
        assert_eq!(
            spans.iter().map(|s| (s.start, s.state)).collect::<Vec<_>>(),
            vec![
                (0, SpanState::Free),
                (40, SpanState::PendingUse),
                (60, SpanState::Free),
                (100, SpanState::Used),
            ]
        );
        alloc.check_invariants();
        alloc.rollback();
        assert_eq!(alloc.spans().len(), 2);
        alloc.check_invariants();
    }

    #[test]
    fn first_gap_skips_occupied_spans() {
        let mut alloc = SpaceAllocator::new();
        alloc.mark_used(0, 30);
        alloc.commit();
        assert_eq!(alloc.first_gap(), None);
        alloc.mark_free(10, 5);
        alloc.commit();
        let gap = alloc.first_gap().unwrap();
        assert_eq!((gap.start, gap.len), (10, 5));
    }

    #[test]
    fn stats_sum_to_high_water_mark() {
        let mut alloc = SpaceAllocator::new();
        alloc.mark_used(0, 40);
        alloc.commit();
        alloc.mark_free(0, 10);
        alloc.mark_used(40, 5);
        let stats = alloc.stats();
        assert_eq!(stats.pending_free_bytes, 10);
        assert_eq!(stats.used_bytes, 30);
        assert_eq!(stats.pending_use_bytes, 5);
        assert_eq!(stats.free_bytes, 0);
        assert_eq!(stats.high_water_mark, 45);
        assert_eq!(stats.span_count, 3);
    }

    #[test]
    #[should_panic(expected = "not one free span")]
    fn double_use_panics() {
        let mut alloc = SpaceAllocator::new();
        alloc.mark_used(0, 10);
        alloc.mark_used(5, 2);
    }

    #[test]
    #[should_panic(expected = "not in use")]
    fn free_of_free_panics() {
        let mut alloc = SpaceAllocator::new();
        alloc.mark_used(0, 10);
        alloc.mark_used(10, 10);
        alloc.commit();
        alloc.mark_free(0, 10);
        alloc.commit();
        alloc.mark_free(0, 10);
    }

    #[test]
    #[should_panic(expected = "spanning several spans")]
    fn free_across_states_panics() {
        let mut alloc = SpaceAllocator::new();
        alloc.mark_used(0, 10);
        alloc.commit();
        alloc.mark_used(10, 10);
        alloc.mark_free(5, 10);
    }

    #[test]
    #[should_panic(expected = "empty or overflowing")]
    fn zero_length_panics() {
        SpaceAllocator::new().mark_used(0, 0);
    }

    #[derive(Debug, Clone)]
    enum Op {
        Alloc(u64),
        Free(usize),
        Commit,
        Rollback,
    }

    fn op() -> impl Strategy<Value = Op> {
        prop_oneof![
            4 => (1u64..40).prop_map(Op::Alloc),
            3 => any::<usize>().prop_map(Op::Free),
            1 => Just(Op::Commit),
            1 => Just(Op::Rollback),
        ]
    }

    proptest! {
        #[test]
        fn spans_conserve_bytes(ops in proptest::collection::vec(op(), 0..120)) {
            let mut alloc = SpaceAllocator::new();
            // (loc, len, state) of every range the caller believes it holds.
            let mut model: Vec<(u64, u64, SpanState)> = Vec::new();

            for op in ops {
                match op {
                    Op::Alloc(len) => {
                        let loc = alloc.available(len);
                        alloc.mark_used(loc, len);
                        model.push((loc, len, SpanState::PendingUse));
                    }
                    Op::Free(pick) => {
                        let live: Vec<usize> = (0..model.len())
                            .filter(|&i| model[i].2 != SpanState::PendingFree)
                            .collect();
                        if live.is_empty() {
                            continue;
                        }
                        let i = live[pick % live.len()];
                        let (loc, len, state) = model[i];
                        alloc.mark_free(loc, len);
                        if state == SpanState::Used {
                            model[i].2 = SpanState::PendingFree;
                        } else {
                            model.remove(i);
                        }
                    }
                    Op::Commit => {
                        alloc.commit();
                        model.retain(|m| m.2 != SpanState::PendingFree);
                        for m in &mut model {
                            m.2 = SpanState::Used;
                        }
                    }
                    Op::Rollback => {
                        alloc.rollback();
                        model.retain(|m| m.2 != SpanState::PendingUse);
                        for m in &mut model {
                            m.2 = SpanState::Used;
                        }
                    }
                }

                alloc.check_invariants();
                for &(loc, len, state) in &model {
                    let span = alloc.span_at(loc).unwrap();
                    prop_assert_eq!(span.state, state);
                    prop_assert!(span.end() >= loc + len);
                }
                let held: u64 = model.iter().map(|m| m.1).sum();
                let stats = alloc.stats();
                prop_assert_eq!(
                    stats.used_bytes + stats.pending_use_bytes + stats.pending_free_bytes,
                    held
                );
                prop_assert_eq!(stats.free_bytes + held, stats.high_water_mark);
            }
        }
    }
}
