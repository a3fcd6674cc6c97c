// Parse status state machine
//
// NotParsed -> Parsing -> {Done, Failed, Skipped, Timeout}. Terminal states
// never change. Every transition is a compare-and-swap so that exactly one
// caller observes (and reports) it.

use std::ops::BitOr;
use std::sync::atomic::{AtomicU8, Ordering};

#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ParsedStatus {
    NotParsed = 0,
    Parsing = 1,
    Done = 2,
    Failed = 3,
    Skipped = 4,
    Timeout = 5,
}

impl ParsedStatus {
    pub fn is_terminal(self) -> bool {
        !matches!(self, ParsedStatus::NotParsed | ParsedStatus::Parsing)
    }

    pub fn from_raw(raw: i32) -> Option<Self> {
        match raw {
            0 => Some(ParsedStatus::NotParsed),
            1 => Some(ParsedStatus::Parsing),
            2 => Some(ParsedStatus::Done),
            3 => Some(ParsedStatus::Failed),
            4 => Some(ParsedStatus::Skipped),
            5 => Some(ParsedStatus::Timeout),
            _ => None,
        }
    }
}

/// Parse request flags
#[repr(transparent)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ParseFlags(pub u32);

impl ParseFlags {
    /// Local files only
    pub const LOCAL: ParseFlags = ParseFlags(0);
    /// Also try network locations
    pub const NETWORK: ParseFlags = ParseFlags(1);

    pub fn contains(self, other: ParseFlags) -> bool {
        self.0 & other.0 == other.0
    }
}

impl BitOr for ParseFlags {
    type Output = ParseFlags;

    fn bitor(self, rhs: ParseFlags) -> ParseFlags {
        ParseFlags(self.0 | rhs.0)
    }
}

/// Atomic parse status
#[derive(Debug)]
pub struct ParseState(AtomicU8);

impl ParseState {
    pub fn new() -> Self {
        Self(AtomicU8::new(ParsedStatus::NotParsed as u8))
    }

    pub fn get(&self) -> ParsedStatus {
        ParsedStatus::from_raw(self.0.load(Ordering::Acquire) as i32)
            .unwrap_or(ParsedStatus::NotParsed)
    }

    /// `NotParsed -> Parsing`; false if a job is running or already finished
    pub fn begin(&self) -> bool {
        self.0
            .compare_exchange(
                ParsedStatus::NotParsed as u8,
                ParsedStatus::Parsing as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_ok()
    }

    /// `Parsing -> outcome`; false if another path already finished the job
    pub fn finish(&self, outcome: ParsedStatus) -> bool {
        debug_assert!(outcome.is_terminal());
        self.0
            .compare_exchange(
                ParsedStatus::Parsing as u8,
                outcome as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_ok()
    }
}

impl Default for ParseState {
    fn default() -> Self {
        Self::new()
    }
}
