//! HSM state machine
//!
//! Which tier holds the authoritative copy of an entry's data:
//!
//! ```text
//!            archive              release
//!   CACHED ───────────▶ DUPLICATED ───────────▶ RELEASED
//!     ▲                  │    ▲                    │
//!     └──── write ───────┘    └────── restore ─────┘
//! ```
//!
//! Transitions never skip DUPLICATED. The functions here are pure; the
//! tiered backend performs the data movement they ask for.

use std::fmt;
use std::str::FromStr;

use crate::error::{KvsnsError, Result};

/// HSM state of an entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CacheState {
    /// Fast tier authoritative, no archive copy
    Cached,

    /// Fast tier and archive both hold the current content
    Duplicated,

    /// Only the archive copy exists
    Released,
}

/// What an operation must do from the current state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    /// Already in the requested condition
    Noop,

    /// Move data, then enter the given state
    To(CacheState),
}

impl CacheState {
    pub fn as_str(&self) -> &'static str {
        match self {
            CacheState::Cached => "CACHED",
            CacheState::Duplicated => "DUPLICATED",
            CacheState::Released => "RELEASED",
        }
    }

    /// Is there a fast-tier copy to read from?
    pub fn has_fast_copy(&self) -> bool {
        !matches!(self, CacheState::Released)
    }

    /// Is there an archive copy?
    pub fn has_archive_copy(&self) -> bool {
        !matches!(self, CacheState::Cached)
    }

    /// `archive`: copy the fast tier into the archive
    pub fn archive(self) -> Result<Transition> {
        match self {
            CacheState::Cached => Ok(Transition::To(CacheState::Duplicated)),
            CacheState::Duplicated => Ok(Transition::Noop),
            CacheState::Released => Err(self.illegal("archive")),
        }
    }

    /// `release`: drop the fast-tier copy
    pub fn release(self) -> Result<Transition> {
        match self {
            CacheState::Duplicated => Ok(Transition::To(CacheState::Released)),
            CacheState::Released => Ok(Transition::Noop),
            CacheState::Cached => Err(self.illegal("release")),
        }
    }

    /// `restore`: pull the archive copy back into the fast tier
    pub fn restore(self) -> Result<Transition> {
        match self {
            CacheState::Released => Ok(Transition::To(CacheState::Duplicated)),
            CacheState::Cached | CacheState::Duplicated => Ok(Transition::Noop),
        }
    }

    /// State after a successful write; the fast tier must be present already
    pub fn after_write(self) -> CacheState {
        CacheState::Cached
    }

    fn illegal(self, op: &'static str) -> KvsnsError {
        KvsnsError::IllegalStateTransition { from: self, op }
    }
}

impl fmt::Display for CacheState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CacheState {
    type Err = KvsnsError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "CACHED" => Ok(CacheState::Cached),
            "DUPLICATED" => Ok(CacheState::Duplicated),
            "RELEASED" => Ok(CacheState::Released),
            other => Err(KvsnsError::Corrupted(format!("Unknown cache state {:?}", other))),
        }
    }
}
