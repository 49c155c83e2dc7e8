use crate::error::{SetError, SetResult};
use crate::set::{OrderedSet, NIL};

/// Fail-fast ascending cursor over an [`OrderedSet`].
///
/// A cursor does not borrow its set; the set is passed to each call. It
/// remembers the set's modification count when it was created and refuses
/// to continue once the set has been changed by anything other than
/// [`Cursor::remove`]. Handing it any other set, a clone included, fails
/// the same way.
#[derive(Debug, Clone)]
pub struct Cursor {
    curr: usize,
    prev: usize,
    instance: u64,
    expected: u64,
}

impl Cursor {
    pub(crate) fn new(first: usize, instance: u64, expected: u64) -> Self {
        Self {
            curr: first,
            prev: NIL,
            instance,
            expected,
        }
    }

    fn check(&self, set: &OrderedSet) -> SetResult<()> {
        if set.instance != self.instance || set.modifications != self.expected {
            return Err(SetError::ConcurrentModification);
        }
        Ok(())
    }

    /// Whether another element remains.
    pub fn has_next(&self, set: &OrderedSet) -> SetResult<bool> {
        self.check(set)?;
        Ok(self.curr != NIL)
    }

    /// Yield the next element in ascending order.
    pub fn next(&mut self, set: &OrderedSet) -> SetResult<u64> {
        self.check(set)?;
        if self.curr == NIL {
            return Err(SetError::NoSuchElement);
        }
        self.prev = self.curr;
        self.curr = set.successor(self.curr);
        Ok(set.nodes[self.prev].value)
    }

    /// Remove the element most recently yielded by [`Cursor::next`].
    ///
    /// The cursor stays valid afterwards.
    pub fn remove(&mut self, set: &mut OrderedSet) -> SetResult<()> {
        self.check(set)?;
        if self.prev == NIL {
            return Err(SetError::NothingToRemove);
        }
        // Deletion can move nodes around the arena; find `curr` again by value.
        let upcoming = (self.curr != NIL).then(|| set.nodes[self.curr].value);
        set.delete_node(self.prev);
        set.modifications += 1;
        self.curr = upcoming.map_or(NIL, |v| set.find(v));
        self.prev = NIL;
        self.expected = set.modifications;
        Ok(())
    }
}
