use thiserror::Error;

/// Errors reported by a [`crate::Cursor`].
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum SetError {
    /// The set was modified other than through this cursor.
    #[error("set was modified while a cursor was open")]
    ConcurrentModification,

    /// `next` was called with no elements left.
    #[error("no more elements")]
    NoSuchElement,

    /// `remove` was called before any `next`, or twice for one element.
    #[error("nothing to remove: no element yielded since the last removal")]
    NothingToRemove,
}

/// Convenience alias for cursor results.
pub type SetResult<T> = Result<T, SetError>;
