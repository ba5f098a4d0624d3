use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A UTC timestamp wrapper around `chrono::DateTime<Utc>`.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UtcTime {
    inner: DateTime<Utc>,
}

impl UtcTime {
    /// Get the current UTC time.
    pub fn now() -> Self {
        Self { inner: Utc::now() }
    }

    /// Create from a chrono `DateTime<Utc>`.
    pub fn from_chrono(dt: DateTime<Utc>) -> Self {
        Self { inner: dt }
    }

    /// Access the inner `DateTime<Utc>`.
    pub fn as_chrono(&self) -> &DateTime<Utc> {
        &self.inner
    }

    /// Seconds since Unix epoch.
    pub fn timestamp(&self) -> i64 {
        self.inner.timestamp()
    }

    /// Milliseconds since Unix epoch.
    pub fn timestamp_millis(&self) -> i64 {
        self.inner.timestamp_millis()
    }

    /// Nanoseconds since Unix epoch. Saturates outside the representable range.
    pub fn timestamp_nanos(&self) -> i64 {
        self.inner.timestamp_nanos_opt().unwrap_or(i64::MAX)
    }

    /// Rebuild from nanoseconds since Unix epoch.
    pub fn from_timestamp_nanos(nanos: i64) -> Self {
        Self {
            inner: DateTime::<Utc>::from_timestamp_nanos(nanos),
        }
    }
}

impl fmt::Debug for UtcTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "UtcTime({})", self.inner.to_rfc3339())
    }
}

impl fmt::Display for UtcTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.inner.to_rfc3339())
    }
}

impl Default for UtcTime {
    fn default() -> Self {
        Self {
            inner: DateTime::<Utc>::default(),
        }
    }
}

impl From<DateTime<Utc>> for UtcTime {
    fn from(dt: DateTime<Utc>) -> Self {
        Self { inner: dt }
    }
}

impl From<UtcTime> for DateTime<Utc> {
    fn from(t: UtcTime) -> Self {
        t.inner
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_utc_time_now() {
        let t = UtcTime::now();
        assert!(t.timestamp() > 0);
    }

    #[test]
    fn test_utc_time_default_is_epoch() {
        assert_eq!(UtcTime::default().timestamp(), 0);
    }

    #[test]
    fn test_utc_time_nanos_roundtrip() {
        let t = UtcTime::now();
        let back = UtcTime::from_timestamp_nanos(t.timestamp_nanos());
        assert_eq!(t, back);
    }

    #[test]
    fn test_utc_time_serde() {
        let t = UtcTime::now();
        let json = serde_json::to_string(&t).unwrap();
        let parsed: UtcTime = serde_json::from_str(&json).unwrap();
        assert_eq!(t, parsed);
    }
}
