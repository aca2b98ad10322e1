//! Per-thread acquisition ledger
//!
//! Entry points run synchronously on the calling thread, so a thread-local
//! count is exact for one operation and isolated between test threads.

use core::cell::Cell;
use libc::c_void;

use crate::logging::trace;

/// Resource categories tracked by the guard
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum ResourceKind {
    CText,
    DecodedArgument,
    EncodedText,
    OpenFile,
}

impl ResourceKind {
    const ALL: [ResourceKind; 4] = [
        ResourceKind::CText,
        ResourceKind::DecodedArgument,
        ResourceKind::EncodedText,
        ResourceKind::OpenFile,
    ];

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::CText => "c_text",
            Self::DecodedArgument => "decoded_argument",
            Self::EncodedText => "encoded_text",
            Self::OpenFile => "open_file",
        }
    }
}

/// Acquire/release totals at a point in time
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LedgerSnapshot {
    pub acquired: usize,
    pub released: usize,
}

impl LedgerSnapshot {
    /// Resources acquired and not yet released
    #[inline]
    pub fn live(&self) -> usize {
        self.acquired - self.released
    }
}

impl core::ops::Add for LedgerSnapshot {
    type Output = Self;

    fn add(self, rhs: Self) -> Self {
        Self {
            acquired: self.acquired + rhs.acquired,
            released: self.released + rhs.released,
        }
    }
}

thread_local! {
    static COUNTS: [Cell<LedgerSnapshot>; 4] = Default::default();
}

#[inline]
pub(super) fn acquire(kind: ResourceKind, ptr: *const c_void) {
    COUNTS.with(|counts| {
        let cell = &counts[kind as usize];
        let mut snap = cell.get();
        snap.acquired += 1;
        cell.set(snap);
    });
    trace!(event = "acquire", kind = kind.as_str(), address = ?ptr);
}

#[inline]
pub(super) fn release(kind: ResourceKind, ptr: *const c_void) {
    COUNTS.with(|counts| {
        let cell = &counts[kind as usize];
        let mut snap = cell.get();
        debug_assert!(snap.released < snap.acquired, "release without acquire");
        snap.released += 1;
        cell.set(snap);
    });
    trace!(event = "release", kind = kind.as_str(), address = ?ptr);
}

/// Totals across every resource kind on this thread
pub fn ledger() -> LedgerSnapshot {
    ResourceKind::ALL
        .into_iter()
        .map(ledger_for)
        .fold(LedgerSnapshot::default(), |acc, snap| acc + snap)
}

/// Totals for one resource kind on this thread
pub fn ledger_for(kind: ResourceKind) -> LedgerSnapshot {
    COUNTS.with(|counts| counts[kind as usize].get())
}
