use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::cursor::Cursor;

/// Position of "no node" in the arena.
pub(crate) const NIL: usize = usize::MAX;

/// Source of set identities, so a cursor can tell its own set apart.
static NEXT_INSTANCE: AtomicU64 = AtomicU64::new(0);

fn next_instance() -> u64 {
    NEXT_INSTANCE.fetch_add(1, Ordering::Relaxed)
}

#[derive(Debug, Clone, Copy)]
pub(crate) struct Node {
    pub(crate) value: u64,
    parent: usize,
    left: usize,
    right: usize,
    red: bool,
}

/// An ordered set of `u64` values.
///
/// Lookups, inserts and removals are `O(log n)`. `min`, `max`, `floor` and
/// `ceil` answer nearest-value queries in the same bound. The nodes live in
/// a single `Vec` and the set never holds more slots than elements.
pub struct OrderedSet {
    pub(crate) nodes: Vec<Node>,
    root: usize,
    pub(crate) modifications: u64,
    /// Unique per set; clones get a fresh one.
    pub(crate) instance: u64,
}

impl Clone for OrderedSet {
    fn clone(&self) -> Self {
        Self {
            nodes: self.nodes.clone(),
            root: self.root,
            modifications: self.modifications,
            instance: next_instance(),
        }
    }
}

impl Default for OrderedSet {
    fn default() -> Self {
        Self::new()
    }
}

impl OrderedSet {
    pub fn new() -> Self {
        Self {
            nodes: Vec::new(),
            root: NIL,
            modifications: 0,
            instance: next_instance(),
        }
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            nodes: Vec::with_capacity(capacity),
            root: NIL,
            modifications: 0,
            instance: next_instance(),
        }
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Remove every element.
    pub fn clear(&mut self) {
        if !self.nodes.is_empty() {
            self.nodes.clear();
            self.root = NIL;
            self.modifications += 1;
        }
    }

    pub fn contains(&self, value: u64) -> bool {
        self.find(value) != NIL
    }

    /// Add `value`. Returns `false` if it was already present.
    pub fn insert(&mut self, value: u64) -> bool {
        if self.root == NIL {
            self.root = self.push(value, NIL);
            self.nodes[self.root].red = false;
            self.modifications += 1;
            return true;
        }

        let mut i = self.root;
        loop {
            let current = self.nodes[i].value;
            if value == current {
                return false;
            }
            if value < current {
                if self.nodes[i].left == NIL {
                    let n = self.push(value, i);
                    self.nodes[i].left = n;
                    self.fix_after_insert(n);
                    break;
                }
                i = self.nodes[i].left;
            } else {
                if self.nodes[i].right == NIL {
                    let n = self.push(value, i);
                    self.nodes[i].right = n;
                    self.fix_after_insert(n);
                    break;
                }
                i = self.nodes[i].right;
            }
        }
        self.modifications += 1;
        true
    }

    /// Remove `value`. Returns `false` if it was not present.
    pub fn remove(&mut self, value: u64) -> bool {
        let i = self.find(value);
        if i == NIL {
            return false;
        }
        self.delete_node(i);
        self.modifications += 1;
        true
    }

    /// Smallest element.
    pub fn min(&self) -> Option<u64> {
        match self.root {
            NIL => None,
            root => Some(self.nodes[self.leftmost(root)].value),
        }
    }

    /// Largest element.
    pub fn max(&self) -> Option<u64> {
        let mut i = self.root;
        if i == NIL {
            return None;
        }
        while self.nodes[i].right != NIL {
            i = self.nodes[i].right;
        }
        Some(self.nodes[i].value)
    }

    /// Greatest element `<= value`.
    pub fn floor(&self, value: u64) -> Option<u64> {
        let mut i = self.root;
        let mut best = None;
        while i != NIL {
            let current = self.nodes[i].value;
            if current == value {
                return Some(value);
            }
            if current > value {
                i = self.nodes[i].left;
            } else {
                best = Some(current);
                i = self.nodes[i].right;
            }
        }
        best
    }

    /// Least element `>= value`.
    pub fn ceil(&self, value: u64) -> Option<u64> {
        let mut i = self.root;
        let mut best = None;
        while i != NIL {
            let current = self.nodes[i].value;
            if current == value {
                return Some(value);
            }
            if current < value {
                i = self.nodes[i].right;
            } else {
                best = Some(current);
                i = self.nodes[i].left;
            }
        }
        best
    }

    /// Elements present in both sets.
    ///
    /// Walks the smaller set and looks each value up in the larger one.
    pub fn intersection(&self, other: &OrderedSet) -> OrderedSet {
        let (small, large) = if self.len() <= other.len() {
            (self, other)
        } else {
            (other, self)
        };
        let mut out = OrderedSet::new();
        for node in &small.nodes {
            if large.contains(node.value) {
                out.insert(node.value);
            }
        }
        out
    }

    /// All elements in ascending order.
    pub fn values(&self) -> Vec<u64> {
        self.iter().collect()
    }

    /// Borrowing ascending iterator.
    pub fn iter(&self) -> Iter<'_> {
        let next = match self.root {
            NIL => NIL,
            root => self.leftmost(root),
        };
        Iter { set: self, next }
    }

    /// Detached ascending cursor that can remove as it goes.
    pub fn cursor(&self) -> Cursor {
        let first = match self.root {
            NIL => NIL,
            root => self.leftmost(root),
        };
        Cursor::new(first, self.instance, self.modifications)
    }

    // --- arena plumbing ---

    fn push(&mut self, value: u64, parent: usize) -> usize {
        self.nodes.push(Node {
            value,
            parent,
            left: NIL,
            right: NIL,
            red: true,
        });
        self.nodes.len() - 1
    }

    pub(crate) fn find(&self, value: u64) -> usize {
        let mut i = self.root;
        while i != NIL {
            let current = self.nodes[i].value;
            if value == current {
                return i;
            }
            i = if value < current {
                self.nodes[i].left
            } else {
                self.nodes[i].right
            };
        }
        NIL
    }

    fn leftmost(&self, mut i: usize) -> usize {
        while self.nodes[i].left != NIL {
            i = self.nodes[i].left;
        }
        i
    }

    pub(crate) fn successor(&self, i: usize) -> usize {
        if i == NIL {
            return NIL;
        }
        if self.nodes[i].right != NIL {
            return self.leftmost(self.nodes[i].right);
        }
        let mut child = i;
        let mut p = self.nodes[i].parent;
        while p != NIL && child == self.nodes[p].right {
            child = p;
            p = self.nodes[p].parent;
        }
        p
    }

    fn parent_of(&self, i: usize) -> usize {
        if i == NIL {
            NIL
        } else {
            self.nodes[i].parent
        }
    }

    fn left_of(&self, i: usize) -> usize {
        if i == NIL {
            NIL
        } else {
            self.nodes[i].left
        }
    }

    fn right_of(&self, i: usize) -> usize {
        if i == NIL {
            NIL
        } else {
            self.nodes[i].right
        }
    }

    /// Missing nodes count as black.
    fn is_red(&self, i: usize) -> bool {
        i != NIL && self.nodes[i].red
    }

    fn set_red(&mut self, i: usize, red: bool) {
        if i != NIL {
            self.nodes[i].red = red;
        }
    }

    fn rotate_left(&mut self, p: usize) {
        if p == NIL {
            return;
        }
        let r = self.nodes[p].right;
        let rl = self.nodes[r].left;
        self.nodes[p].right = rl;
        if rl != NIL {
            self.nodes[rl].parent = p;
        }
        let pp = self.nodes[p].parent;
        self.nodes[r].parent = pp;
        if pp == NIL {
            self.root = r;
        } else if self.nodes[pp].left == p {
            self.nodes[pp].left = r;
        } else {
            self.nodes[pp].right = r;
        }
        self.nodes[r].left = p;
        self.nodes[p].parent = r;
    }

    fn rotate_right(&mut self, p: usize) {
        if p == NIL {
            return;
        }
        let l = self.nodes[p].left;
        let lr = self.nodes[l].right;
        self.nodes[p].left = lr;
        if lr != NIL {
            self.nodes[lr].parent = p;
        }
        let pp = self.nodes[p].parent;
        self.nodes[l].parent = pp;
        if pp == NIL {
            self.root = l;
        } else if self.nodes[pp].right == p {
            self.nodes[pp].right = l;
        } else {
            self.nodes[pp].left = l;
        }
        self.nodes[l].right = p;
        self.nodes[p].parent = l;
    }

    fn fix_after_insert(&mut self, mut x: usize) {
        self.nodes[x].red = true;
        while x != NIL && x != self.root && self.is_red(self.parent_of(x)) {
            let p = self.parent_of(x);
            let g = self.parent_of(p);
            if p == self.left_of(g) {
                let uncle = self.right_of(g);
                if self.is_red(uncle) {
                    self.set_red(p, false);
                    self.set_red(uncle, false);
                    self.set_red(g, true);
                    x = g;
                } else {
                    if x == self.right_of(p) {
                        x = p;
                        self.rotate_left(x);
                    }
                    let p = self.parent_of(x);
                    let g = self.parent_of(p);
                    self.set_red(p, false);
                    self.set_red(g, true);
                    self.rotate_right(g);
                }
            } else {
                let uncle = self.left_of(g);
                if self.is_red(uncle) {
                    self.set_red(p, false);
                    self.set_red(uncle, false);
                    self.set_red(g, true);
                    x = g;
                } else {
                    if x == self.left_of(p) {
                        x = p;
                        self.rotate_right(x);
                    }
                    let p = self.parent_of(x);
                    let g = self.parent_of(p);
                    self.set_red(p, false);
                    self.set_red(g, true);
                    self.rotate_left(g);
                }
            }
        }
        let root = self.root;
        self.set_red(root, false);
    }

    /// Unlink node `p`, rebalance, and compact the arena.
    ///
    /// Does not touch the modification counter.
    pub(crate) fn delete_node(&mut self, mut p: usize) {
        // Two children: take over the successor's value and delete it instead.
        if self.nodes[p].left != NIL && self.nodes[p].right != NIL {
            let s = self.successor(p);
            self.nodes[p].value = self.nodes[s].value;
            p = s;
        }

        let replacement = if self.nodes[p].left != NIL {
            self.nodes[p].left
        } else {
            self.nodes[p].right
        };

        if replacement != NIL {
            let pp = self.nodes[p].parent;
            self.nodes[replacement].parent = pp;
            if pp == NIL {
                self.root = replacement;
            } else if self.nodes[pp].left == p {
                self.nodes[pp].left = replacement;
            } else {
                self.nodes[pp].right = replacement;
            }
            self.nodes[p].left = NIL;
            self.nodes[p].right = NIL;
            self.nodes[p].parent = NIL;
            if !self.nodes[p].red {
                self.fix_after_delete(replacement);
            }
        } else if self.nodes[p].parent == NIL {
            self.root = NIL;
        } else {
            if !self.nodes[p].red {
                self.fix_after_delete(p);
            }
            let pp = self.nodes[p].parent;
            if pp != NIL {
                if self.nodes[pp].left == p {
                    self.nodes[pp].left = NIL;
                } else if self.nodes[pp].right == p {
                    self.nodes[pp].right = NIL;
                }
                self.nodes[p].parent = NIL;
            }
        }

        self.release(p);
    }

    fn fix_after_delete(&mut self, mut x: usize) {
        while x != self.root && !self.is_red(x) {
            let p = self.parent_of(x);
            if x == self.left_of(p) {
                let mut sib = self.right_of(p);
                if self.is_red(sib) {
                    self.set_red(sib, false);
                    self.set_red(p, true);
                    self.rotate_left(p);
                    sib = self.right_of(self.parent_of(x));
                }
                if !self.is_red(self.left_of(sib)) && !self.is_red(self.right_of(sib)) {
                    self.set_red(sib, true);
                    x = self.parent_of(x);
                } else {
                    if !self.is_red(self.right_of(sib)) {
                        let sl = self.left_of(sib);
                        self.set_red(sl, false);
                        self.set_red(sib, true);
                        self.rotate_right(sib);
                        sib = self.right_of(self.parent_of(x));
                    }
                    let px = self.parent_of(x);
                    let parent_red = self.is_red(px);
                    self.set_red(sib, parent_red);
                    self.set_red(px, false);
                    let sr = self.right_of(sib);
                    self.set_red(sr, false);
                    self.rotate_left(px);
                    x = self.root;
                }
            } else {
                let mut sib = self.left_of(p);
                if self.is_red(sib) {
                    self.set_red(sib, false);
                    self.set_red(p, true);
                    self.rotate_right(p);
                    sib = self.left_of(self.parent_of(x));
                }
                if !self.is_red(self.right_of(sib)) && !self.is_red(self.left_of(sib)) {
                    self.set_red(sib, true);
                    x = self.parent_of(x);
                } else {
                    if !self.is_red(self.left_of(sib)) {
                        let sr = self.right_of(sib);
                        self.set_red(sr, false);
                        self.set_red(sib, true);
                        self.rotate_left(sib);
                        sib = self.left_of(self.parent_of(x));
                    }
                    let px = self.parent_of(x);
                    let parent_red = self.is_red(px);
                    self.set_red(sib, parent_red);
                    self.set_red(px, false);
                    let sl = self.left_of(sib);
                    self.set_red(sl, false);
                    self.rotate_right(px);
                    x = self.root;
                }
            }
        }
        self.set_red(x, false);
    }

    /// Drop the detached slot `p`, moving the last node into it.
    fn release(&mut self, p: usize) {
        let last = self.nodes.len() - 1;
        if p != last {
            let moved = self.nodes[last];
            if moved.parent == NIL {
                self.root = p;
            } else if self.nodes[moved.parent].left == last {
                self.nodes[moved.parent].left = p;
            } else {
                self.nodes[moved.parent].right = p;
            }
            if moved.left != NIL {
                self.nodes[moved.left].parent = p;
            }
            if moved.right != NIL {
                self.nodes[moved.right].parent = p;
            }
            self.nodes[p] = moved;
        }
        self.nodes.pop();
    }

    /// Panics if any red-black or linkage invariant is broken.
    #[cfg(test)]
    pub(crate) fn check_invariants(&self) {
        fn walk(set: &OrderedSet, i: usize, lo: Option<u64>, hi: Option<u64>) -> (usize, usize) {
            if i == NIL {
                return (1, 0);
            }
            let node = set.nodes[i];
            if let Some(lo) = lo {
                assert!(node.value > lo, "order violated at {}", node.value);
            }
            if let Some(hi) = hi {
                assert!(node.value < hi, "order violated at {}", node.value);
            }
            for child in [node.left, node.right] {
                if child != NIL {
                    assert_eq!(set.nodes[child].parent, i, "broken parent link");
                    assert!(!(node.red && set.nodes[child].red), "red node with red child");
                }
            }
            let (lb, lc) = walk(set, node.left, lo, Some(node.value));
            let (rb, rc) = walk(set, node.right, Some(node.value), hi);
            assert_eq!(lb, rb, "black height differs under {}", node.value);
            (lb + usize::from(!node.red), lc + rc + 1)
        }

        if self.root != NIL {
            assert!(!self.nodes[self.root].red, "red root");
            assert_eq!(self.nodes[self.root].parent, NIL, "root has a parent");
        }
        let (_, count) = walk(self, self.root, None, None);
        assert_eq!(count, self.nodes.len(), "unreachable nodes in arena");
    }
}

impl fmt::Debug for OrderedSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.iter()).finish()
    }
}

impl PartialEq for OrderedSet {
    fn eq(&self, other: &Self) -> bool {
        self.len() == other.len() && self.iter().eq(other.iter())
    }
}

impl Eq for OrderedSet {}

impl FromIterator<u64> for OrderedSet {
    fn from_iter<I: IntoIterator<Item = u64>>(iter: I) -> Self {
        let mut set = OrderedSet::new();
        set.extend(iter);
        set
    }
}

impl Extend<u64> for OrderedSet {
    fn extend<I: IntoIterator<Item = u64>>(&mut self, iter: I) {
        for value in iter {
            self.insert(value);
        }
    }
}

impl<'a> IntoIterator for &'a OrderedSet {
    type Item = u64;
    type IntoIter = Iter<'a>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

/// Ascending iterator over an [`OrderedSet`].
pub struct Iter<'a> {
    set: &'a OrderedSet,
    next: usize,
}

impl Iterator for Iter<'_> {
    type Item = u64;

    fn next(&mut self) -> Option<u64> {
        if self.next == NIL {
            return None;
        }
        let value = self.set.nodes[self.next].value;
        self.next = self.set.successor(self.next);
        Some(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::collections::BTreeSet;

    #[test]
    fn empty_set_has_no_extremes() {
        let set = OrderedSet::new();
        assert!(set.is_empty());
        assert_eq!(set.min(), None);
        assert_eq!(set.max(), None);
        assert_eq!(set.floor(10), None);
        assert_eq!(set.ceil(10), None);
    }

    #[test]
    fn insert_reports_duplicates() {
        let mut set = OrderedSet::new();
        assert!(set.insert(7));
        assert!(!set.insert(7));
        assert_eq!(set.len(), 1);
    }

    #[test]
    fn remove_absent_is_noop() {
        let mut set: OrderedSet = [1, 2, 3].into_iter().collect();
        assert!(!set.remove(9));
        assert_eq!(set.len(), 3);
    }

    #[test]
    fn floor_and_ceil() {
        let set: OrderedSet = [10, 20, 30].into_iter().collect();
        assert_eq!(set.floor(25), Some(20));
        assert_eq!(set.ceil(25), Some(30));
        assert_eq!(set.floor(20), Some(20));
        assert_eq!(set.ceil(20), Some(20));
        assert_eq!(set.floor(5), None);
        assert_eq!(set.ceil(35), None);
    }

    #[test]
    fn values_come_out_sorted() {
        let set: OrderedSet = [5, 1, 9, 3, 7].into_iter().collect();
        assert_eq!(set.values(), vec![1, 3, 5, 7, 9]);
        assert_eq!(set.min(), Some(1));
        assert_eq!(set.max(), Some(9));
    }

    #[test]
    fn extremes_of_u64_are_storable() {
        let set: OrderedSet = [0, u64::MAX].into_iter().collect();
        assert_eq!(set.min(), Some(0));
        assert_eq!(set.max(), Some(u64::MAX));
        assert_eq!(set.floor(u64::MAX - 1), Some(0));
    }

    #[test]
    fn intersection_keeps_common_values() {
        let a: OrderedSet = [1, 2, 3, 4].into_iter().collect();
        let b: OrderedSet = [3, 4, 5].into_iter().collect();
        assert_eq!(a.intersection(&b).values(), vec![3, 4]);
        assert_eq!(b.intersection(&a).values(), vec![3, 4]);
        assert!(a.intersection(&OrderedSet::new()).is_empty());
    }

    #[test]
    fn clone_is_independent() {
        let mut a: OrderedSet = [1, 2, 3].into_iter().collect();
        let b = a.clone();
        a.remove(2);
        assert_eq!(b.values(), vec![1, 2, 3]);
        assert_eq!(a.values(), vec![1, 3]);
    }

    #[test]
    fn arena_stays_dense_under_churn() {
        let mut set = OrderedSet::new();
        for v in 0..200 {
            set.insert(v);
        }
        for v in (0..200).step_by(2) {
            assert!(set.remove(v));
            set.check_invariants();
        }
        assert_eq!(set.len(), 100);
        assert_eq!(set.nodes.len(), 100);
        assert_eq!(set.values(), (1..200).step_by(2).collect::<Vec<_>>());
    }

    #[test]
    fn remove_down_to_empty() {
        let mut set: OrderedSet = (0..32).collect();
        for v in (0..32).rev() {
            assert!(set.remove(v));
            set.check_invariants();
        }
        assert!(set.is_empty());
        assert_eq!(set.min(), None);
    }

    #[test]
    fn equality_ignores_insertion_order() {
        let a: OrderedSet = [3, 1, 2].into_iter().collect();
        let b: OrderedSet = [1, 2, 3].into_iter().collect();
        assert_eq!(a, b);
        assert_eq!(format!("{a:?}"), "{1, 2, 3}");
    }

    #[derive(Debug, Clone)]
    enum Op {
        Insert(u64),
        Remove(u64),
    }

    fn op() -> impl Strategy<Value = Op> {
        prop_oneof![
            (0u64..64).prop_map(Op::Insert),
            (0u64..64).prop_map(Op::Remove),
        ]
    }

    proptest! {
        #[test]
        fn behaves_like_btreeset(ops in proptest::collection::vec(op(), 0..200), key in 0u64..70) {
            let mut set = OrderedSet::new();
            let mut model = BTreeSet::new();
            for op in ops {
                match op {
                    Op::Insert(v) => prop_assert_eq!(set.insert(v), model.insert(v)),
                    Op::Remove(v) => prop_assert_eq!(set.remove(v), model.remove(&v)),
                }
            }
            set.check_invariants();
            prop_assert_eq!(set.len(), model.len());
            prop_assert_eq!(set.values(), model.iter().copied().collect::<Vec<_>>());
            prop_assert_eq!(set.min(), model.first().copied());
            prop_assert_eq!(set.max(), model.last().copied());
            prop_assert_eq!(set.floor(key), model.range(..=key).next_back().copied());
            prop_assert_eq!(set.ceil(key), model.range(key..).next().copied());
            prop_assert_eq!(set.contains(key), model.contains(&key));
        }
    }
}
