//! Snapshot directory naming.
//!
//! Snapshots are named `snapshot-YYYYMMDD-HHMMSS-ffffff` (UTC, microseconds).
//! The fixed-width format makes lexical order equal chronological order, and
//! new names are always allocated strictly after the newest existing one.

use chrono::{NaiveDateTime, TimeDelta, Timelike, Utc};

/// Directory name prefix shared by every snapshot.
pub const SNAPSHOT_PREFIX: &str = "snapshot-";

const STAMP_FORMAT: &str = "%Y%m%d-%H%M%S";
const STAMP_LEN: usize = "YYYYMMDD-HHMMSS".len();

/// Timestamp identifying a snapshot directory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SnapshotStamp(NaiveDateTime);

impl SnapshotStamp {
    /// Stamp for the current time, truncated to microseconds.
    pub fn now() -> Self {
        Self::from_datetime(Utc::now().naive_utc())
    }

    pub fn from_datetime(dt: NaiveDateTime) -> Self {
        let micros = (dt.nanosecond() / 1_000).min(999_999);
        Self(dt.with_nanosecond(micros * 1_000).unwrap_or(dt))
    }

    /// Parse a directory name such as `snapshot-20260101-120000-000001`.
    pub fn from_dir_name(name: &str) -> Option<Self> {
        let rest = name.strip_prefix(SNAPSHOT_PREFIX)?;
        if rest.len() != STAMP_LEN + 7 || !rest.is_char_boundary(STAMP_LEN) {
            return None;
        }
        let (head, tail) = rest.split_at(STAMP_LEN);
        let micros = tail.strip_prefix('-')?;
        if !micros.bytes().all(|b| b.is_ascii_digit()) {
            return None;
        }

        let base = NaiveDateTime::parse_from_str(head, STAMP_FORMAT).ok()?;
        let micros: i64 = micros.parse().ok()?;
        Some(Self(base + TimeDelta::microseconds(micros)))
    }

    /// Directory name for this stamp.
    pub fn dir_name(&self) -> String {
        format!(
            "{}{}-{:06}",
            SNAPSHOT_PREFIX,
            self.0.format(STAMP_FORMAT),
            (self.0.nanosecond() / 1_000).min(999_999)
        )
    }

    /// The smallest stamp strictly after this one.
    pub fn successor(&self) -> Self {
        Self(self.0 + TimeDelta::microseconds(1))
    }

    /// Stamp for a new snapshot given the clock and the newest existing stamp.
    pub fn next_after(now: Self, newest: Option<Self>) -> Self {
        match newest {
            Some(newest) if now <= newest => newest.successor(),
            _ => now,
        }
    }
}

impl std::fmt::Display for SnapshotStamp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.dir_name())
    }
}
