//! Ordered integer set for spanstore.
//!
//! [`OrderedSet`] is a red-black tree of `u64` values packed into a `Vec`.
//! Nodes refer to each other by position rather than by pointer, and a
//! removal swaps the freed slot with the last one before shrinking, so the
//! arena stays dense no matter how much churn the set sees.
//!
//! The allocator keeps span borders and free-span sizes in these sets; the
//! object store keeps record ids and locations in them.
//!
//! Two ways to walk a set:
//!
//! - [`Iter`] borrows the set and is the everyday choice.
//! - [`Cursor`] is detached from the set. It checks a modification counter
//!   on every call, fails with [`SetError::ConcurrentModification`] if the
//!   set changed underneath it, and can remove the element it last yielded.

pub mod cursor;
pub mod error;
pub mod set;

pub use cursor::Cursor;
pub use error::{SetError, SetResult};
pub use set::{Iter, OrderedSet};
