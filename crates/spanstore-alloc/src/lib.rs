//! Free-space allocator for spanstore.
//!
//! The address space `[0, high_water_mark)` is cut into spans by an ordered
//! set of borders. Each span carries a [`SpanState`]:
//!
//! ```text
//! Free --mark_used--> PendingUse --commit--> Used --mark_free--> PendingFree --commit--> Free
//!                     PendingUse --rollback/mark_free--> Free
//!                                               PendingFree --rollback--> Used
//! ```
//!
//! Adjacent spans never share a state; borders are coalesced after every
//! change. Free spans are indexed by exact length so [`SpaceAllocator::available`]
//! can pick the smallest size class that fits.
//!
//! Calling `mark_used` or `mark_free` on a range that is not wholly inside one
//! span of the required state is a bookkeeping bug and panics.

pub mod allocator;
pub mod state;

pub use allocator::SpaceAllocator;
pub use state::{AllocStats, Span, SpanState};
