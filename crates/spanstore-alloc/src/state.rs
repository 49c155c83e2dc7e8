use std::fmt;

use serde::{Deserialize, Serialize};

/// Allocation state of a span.
///
/// The low bit marks a state that is pending until the next commit or
/// rollback.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[repr(u8)]
pub enum SpanState {
    Free = 0x00,
    /// Used on the medium; becomes Free on commit, Used again on rollback.
    PendingFree = 0x01,
    Used = 0x02,
    /// Newly allocated; becomes Used on commit, Free again on rollback.
    PendingUse = 0x03,
}

impl SpanState {
    pub fn is_pending(self) -> bool {
        (self as u8) & 0x01 != 0
    }
}

impl fmt::Display for SpanState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SpanState::Free => "free",
            SpanState::PendingFree => "pending-free",
            SpanState::Used => "used",
            SpanState::PendingUse => "pending-use",
        };
        f.write_str(name)
    }
}

/// A maximal run of bytes sharing one state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Span {
    pub start: u64,
    pub len: u64,
    pub state: SpanState,
}

impl Span {
    /// One past the last byte.
    pub fn end(&self) -> u64 {
        self.start + self.len
    }

    pub fn contains(&self, offset: u64) -> bool {
        offset >= self.start && offset < self.end()
    }
}

/// Byte totals per state.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AllocStats {
    pub high_water_mark: u64,
    pub free_bytes: u64,
    pub used_bytes: u64,
    pub pending_use_bytes: u64,
    pub pending_free_bytes: u64,
    pub span_count: usize,
    /// Distinct free span lengths below the high-water mark.
    pub size_classes: usize,
}

impl AllocStats {
    /// Fraction of the address space that is free, in `[0, 1]`.
    pub fn fragmentation(&self) -> f64 {
        if self.high_water_mark == 0 {
            0.0
        } else {
            self.free_bytes as f64 / self.high_water_mark as f64
        }
    }
}
