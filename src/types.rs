//! Shared identifiers and time values

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

/// Logical inode number of a namespace entry
pub type EntryId = u64;

/// The root directory; it is its own parent
pub const ROOT_ID: EntryId = 2;

/// First id handed out by the allocator (0, 1 and 2 are reserved)
pub const FIRST_ALLOCATED_ID: EntryId = 3;

/// A point in time with nanosecond precision
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Timespec {
    pub sec: i64,
    pub nsec: u32,
}

impl Timespec {
    pub fn new(sec: i64, nsec: u32) -> Self {
        Self { sec, nsec }
    }

    /// Current wall-clock time (epoch if the clock is before 1970)
    pub fn now() -> Self {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| Self::new(d.as_secs() as i64, d.subsec_nanos()))
            .unwrap_or_default()
    }

    pub fn to_system_time(&self) -> SystemTime {
        if self.sec >= 0 {
            UNIX_EPOCH + Duration::new(self.sec as u64, self.nsec)
        } else {
            UNIX_EPOCH - Duration::from_secs(self.sec.unsigned_abs()) + Duration::from_nanos(self.nsec as u64)
        }
    }
}

impl From<SystemTime> for Timespec {
    fn from(time: SystemTime) -> Self {
        match time.duration_since(UNIX_EPOCH) {
            Ok(d) => Self::new(d.as_secs() as i64, d.subsec_nanos()),
            Err(e) => {
                let d = e.duration();
                // before the epoch: borrow a second for the nanoseconds
                if d.subsec_nanos() == 0 {
                    Self::new(-(d.as_secs() as i64), 0)
                } else {
                    Self::new(-(d.as_secs() as i64) - 1, 1_000_000_000 - d.subsec_nanos())
                }
            }
        }
    }
}
