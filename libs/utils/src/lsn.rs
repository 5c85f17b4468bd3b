//! A Postgres Log Sequence Number: a monotone 64-bit position in the
//! source write-ahead log, rendered as two uppercase hex halves
//! separated by `/`.

use std::fmt;
use std::str::FromStr;

/// A WAL position. `Lsn(0)` is the distinguished "unset" value used
/// throughout the apply engine wherever the spec calls for `InvalidLSN`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Lsn(u64);

impl Lsn {
    pub const INVALID: Lsn = Lsn(0);

    pub const fn from_u64(n: u64) -> Self {
        Lsn(n)
    }

    pub const fn as_u64(self) -> u64 {
        self.0
    }

    pub const fn is_valid(self) -> bool {
        self.0 != 0
    }

    /// The WAL segment number containing this LSN, given the cluster's
    /// segment size in bytes.
    pub const fn segment_number(self, wal_segment_size: u64) -> u64 {
        self.0 / wal_segment_size
    }
}

impl From<u64> for Lsn {
    fn from(n: u64) -> Self {
        Lsn(n)
    }
}

impl From<Lsn> for u64 {
    fn from(lsn: Lsn) -> Self {
        lsn.0
    }
}

impl fmt::Display for Lsn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:X}/{:X}", self.0 >> 32, self.0 & 0xffff_ffff)
    }
}

#[derive(Debug, thiserror::Error)]
#[error("invalid LSN literal {0:?}")]
pub struct LsnParseError(String);

impl FromStr for Lsn {
    type Err = LsnParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (hi, lo) = s.split_once('/').ok_or_else(|| LsnParseError(s.to_string()))?;
        let hi = u32::from_str_radix(hi, 16).map_err(|_| LsnParseError(s.to_string()))?;
        let lo = u32::from_str_radix(lo, 16).map_err(|_| LsnParseError(s.to_string()))?;
        Ok(Lsn(((hi as u64) << 32) | lo as u64))
    }
}

impl serde::Serialize for Lsn {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.collect_str(self)
    }
}

impl<'de> serde::Deserialize<'de> for Lsn {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}
