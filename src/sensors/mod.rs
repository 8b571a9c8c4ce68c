//! Value sources and the refresh cadence they share.
//!
//! Every source owns a [`RefreshTimer`]; the publisher asks
//! `should_update()` each tick and only generates a fresh value once the
//! timer has run out.

pub mod dummy;

/// Tracks when a source last produced a value.
///
/// Due iff `now - last >= interval`. Only [`mark`](Self::mark) moves
/// `last`; reads never do.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RefreshTimer {
    last_ms: u64,
    interval_ms: u64,
}

impl RefreshTimer {
    /// Start the timer at `now_ms`, so the first value is due one full
    /// interval later.
    pub const fn new(now_ms: u64, interval_ms: u64) -> Self {
        Self {
            last_ms: now_ms,
            interval_ms,
        }
    }

    pub const fn is_due(&self, now_ms: u64) -> bool {
        // A clock that reads earlier than `last` (it never should) counts as
        // zero elapsed rather than wrapping into "very overdue".
        now_ms.saturating_sub(self.last_ms) >= self.interval_ms
    }

    pub fn mark(&mut self, now_ms: u64) {
        self.last_ms = now_ms;
    }

    pub const fn last_ms(&self) -> u64 {
        self.last_ms
    }

    pub const fn interval_ms(&self) -> u64 {
        self.interval_ms
    }
}
