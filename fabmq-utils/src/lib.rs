//! Utilities shared by the fabmq crates
//!
//! ## Core Features:
//! - **Byte Size Handling**: Human-readable byte size parsing with [`Bytesize`]
//! - **Duration Conversion**: String-to-Duration parsing supporting multiple time units
//! - **Timestamp Utilities**: millisecond wall clock used for message expiry
//! - **Counter Implementation**: Thread-safe gauge with high-water mark ([`Counter`])
//!
//! ```
//! use fabmq_utils::{to_bytesize, to_duration};
//!
//! assert_eq!(to_bytesize("1M"), 1_048_576);
//! assert_eq!(to_duration("1m30s").as_secs(), 90);
//! assert_eq!(to_duration("97ms").as_millis(), 97);
//! ```

#![deny(unsafe_code)]

use std::fmt;
use std::time::Duration;

use serde::{de::Deserializer, ser::Serializer, Deserialize, Serialize};

mod counter;

pub use counter::Counter;

/// Broker instance identifier, stamped on cluster-wide messages as their origin
pub type NodeId = uuid::Uuid;

/// Timestamp representation in milliseconds since Unix epoch
pub type TimestampMillis = i64;

const BYTESIZE_K: usize = 1024;
const BYTESIZE_M: usize = 1048576;
const BYTESIZE_G: usize = 1073741824;

/// Human-readable byte size (`"512K"`, `"1M"`, `"2G512M"`).
#[derive(Clone, Copy, Default, PartialEq, Eq)]
pub struct Bytesize(pub usize);

impl Bytesize {
    /// Saturates at `u32::MAX`
    #[inline]
    pub fn as_u32(&self) -> u32 {
        u32::try_from(self.0).unwrap_or(u32::MAX)
    }

    #[inline]
    pub fn as_usize(&self) -> usize {
        self.0
    }

    pub fn string(&self) -> String {
        let mut v = self.0;
        let mut res = String::new();
        for (unit, size) in [('G', BYTESIZE_G), ('M', BYTESIZE_M), ('K', BYTESIZE_K)] {
            let n = v / size;
            if n > 0 {
                res.push_str(&format!("{}{}", n, unit));
                v %= size;
            }
        }
        if v > 0 || res.is_empty() {
            res.push_str(&format!("{}B", v));
        }
        res
    }
}

impl From<usize> for Bytesize {
    fn from(v: usize) -> Self {
        Bytesize(v)
    }
}

impl From<&str> for Bytesize {
    fn from(v: &str) -> Self {
        Bytesize(to_bytesize(v))
    }
}

impl fmt::Debug for Bytesize {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.string())
    }
}

impl Serialize for Bytesize {
    #[inline]
    fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&self.string())
    }
}

impl<'de> Deserialize<'de> for Bytesize {
    #[inline]
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let v = to_bytesize(&String::deserialize(deserializer)?);
        Ok(Bytesize(v))
    }
}

/// Parse human-readable byte size string, unknown fragments count as zero
#[inline]
pub fn to_bytesize(text: &str) -> usize {
    let text = text.to_uppercase().replace("GB", "G").replace("MB", "M").replace("KB", "K");
    text.split_inclusive(['G', 'M', 'K', 'B'])
        .map(|x| {
            let mut chars = x.chars();
            let u = match chars.nth_back(0) {
                None => return 0,
                Some(u) => u,
            };
            let v = match chars.as_str().parse::<usize>() {
                Err(_e) => return 0,
                Ok(v) => v,
            };
            match u {
                'B' => v,
                'K' => v * BYTESIZE_K,
                'M' => v * BYTESIZE_M,
                'G' => v * BYTESIZE_G,
                _ => 0,
            }
        })
        .sum()
}

/// Deserialize Duration from human-readable string format
#[inline]
pub fn deserialize_duration<'de, D>(deserializer: D) -> std::result::Result<Duration, D::Error>
where
    D: Deserializer<'de>,
{
    let v = String::deserialize(deserializer)?;
    Ok(to_duration(&v))
}

/// Convert human-readable duration string to Duration
///
/// Units: `ms`, `s`, `m`, `h`, `d`, `w`. A bare number is read as seconds.
#[inline]
pub fn to_duration(text: &str) -> Duration {
    let text = text.trim().to_lowercase();
    if let Ok(secs) = text.parse::<u64>() {
        return Duration::from_secs(secs);
    }
    let text = text.replace("ms", "Y");
    let ms: u64 = text
        .split_inclusive(['s', 'm', 'h', 'd', 'w', 'Y'])
        .map(|x| {
            let mut chars = x.chars();
            let u = match chars.nth_back(0) {
                None => return 0,
                Some(u) => u,
            };
            let v = match chars.as_str().parse::<u64>() {
                Err(_e) => return 0,
                Ok(v) => v,
            };
            match u {
                'Y' => v,
                's' => v * 1000,
                'm' => v * 60000,
                'h' => v * 3600000,
                'd' => v * 86400000,
                'w' => v * 604800000,
                _ => 0,
            }
        })
        .sum();
    Duration::from_millis(ms)
}

/// Get current timestamp in milliseconds
#[inline]
pub fn timestamp_millis() -> TimestampMillis {
    use std::time::{SystemTime, UNIX_EPOCH};
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|t| t.as_millis() as i64)
        .unwrap_or_else(|_| chrono::Local::now().timestamp_millis())
}

/// Format timestamp (milliseconds) as local time, `%Y-%m-%d %H:%M:%S%.3f`
#[inline]
pub fn format_timestamp_millis(t: TimestampMillis) -> String {
    use chrono::TimeZone;
    match chrono::Local.timestamp_millis_opt(t) {
        chrono::LocalResult::Single(dt) | chrono::LocalResult::Ambiguous(dt, _) => {
            dt.format("%Y-%m-%d %H:%M:%S%.3f").to_string()
        }
        chrono::LocalResult::None => String::new(),
    }
}
