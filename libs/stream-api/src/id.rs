use std::fmt;
use std::str::FromStr;

use crate::error::StoreError;

/// Log-assigned entry id: `<ms>-<seq>`.
///
/// The millisecond prefix grows monotonically within a topic, so ids order
/// entries and the gap between two prefixes measures lag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct EntryId {
    ms: u64,
    seq: u64,
}

impl EntryId {
    /// Position before every entry (`0-0`).
    pub const ZERO: EntryId = EntryId { ms: 0, seq: 0 };

    pub const fn new(ms: u64, seq: u64) -> Self {
        Self { ms, seq }
    }

    /// Smallest id strictly greater than `self` whose prefix is at least `now_ms`.
    pub fn successor(&self, now_ms: u64) -> EntryId {
        if now_ms > self.ms {
            EntryId::new(now_ms, 0)
        } else {
            EntryId::new(self.ms, self.seq + 1)
        }
    }

    /// Signed distance in milliseconds between two ids' prefixes.
    pub fn ms_gap(&self, earlier: &EntryId) -> i64 {
        self.ms as i64 - earlier.ms as i64
    }
}

impl fmt::Display for EntryId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.ms, self.seq)
    }
}

impl FromStr for EntryId {
    type Err = StoreError;

    /// Accepts `<ms>-<seq>` and the short form `<ms>`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || StoreError::InvalidEntryId(s.to_string());
        let (ms, seq) = match s.split_once('-') {
            Some((ms, seq)) => (ms, seq),
            None => (s, "0"),
        };
        let ms = ms.parse::<u64>().map_err(|_| invalid())?;
        let seq = seq.parse::<u64>().map_err(|_| invalid())?;
        Ok(EntryId { ms, seq })
    }
}
