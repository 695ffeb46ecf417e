//! Date/time instants and signed durations.
//!
//! A [`VmTime`] is an absolute instant with its original offset preserved, so
//! round-tripping through the textual form keeps the location. A
//! [`VmDuration`] is a signed nanosecond count.

use std::{cmp::Ordering, fmt, str::FromStr};

use chrono::{DateTime, FixedOffset, SecondsFormat};

use crate::error::{RunResult, RuntimeError};

/// An absolute instant with location.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VmTime(DateTime<FixedOffset>);

impl VmTime {
    #[must_use]
    pub fn new(t: DateTime<FixedOffset>) -> Self {
        Self(t)
    }

    /// The Unix epoch in UTC; the default value of the date type.
    #[must_use]
    pub fn epoch() -> Self {
        let offset = FixedOffset::east_opt(0).expect("zero offset is valid");
        Self(chrono::DateTime::UNIX_EPOCH.with_timezone(&offset))
    }

    #[must_use]
    pub fn inner(&self) -> DateTime<FixedOffset> {
        self.0
    }

    /// Nanoseconds since the Unix epoch, saturating at the i64 range.
    #[must_use]
    pub fn unix_nanos(&self) -> i64 {
        self.0.timestamp_nanos_opt().unwrap_or(i64::MAX)
    }

    /// Offset from UTC in seconds.
    #[must_use]
    pub fn offset_seconds(&self) -> i32 {
        self.0.offset().local_minus_utc()
    }

    /// Rebuilds an instant from the binary-codec payload.
    pub fn from_parts(unix_nanos: i64, offset_seconds: i32) -> RunResult<Self> {
        let offset = FixedOffset::east_opt(offset_seconds).ok_or_else(RuntimeError::not_converted)?;
        let utc = DateTime::from_timestamp_nanos(unix_nanos);
        Ok(Self(utc.with_timezone(&offset)))
    }

    pub fn add_duration(&self, d: VmDuration) -> RunResult<Self> {
        self.0
            .checked_add_signed(chrono::Duration::nanoseconds(d.nanos()))
            .map(Self)
            .ok_or_else(RuntimeError::incorrect_operation)
    }

    pub fn sub_duration(&self, d: VmDuration) -> RunResult<Self> {
        self.add_duration(VmDuration::new(-d.nanos()))
    }

    #[must_use]
    pub fn sub_time(&self, other: &Self) -> VmDuration {
        let delta = self.0.signed_duration_since(other.0);
        VmDuration::new(delta.num_nanoseconds().unwrap_or(i64::MAX))
    }
}

impl PartialOrd for VmTime {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for VmTime {
    fn cmp(&self, other: &Self) -> Ordering {
        self.0.cmp(&other.0)
    }
}

impl fmt::Display for VmTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0.to_rfc3339_opts(SecondsFormat::AutoSi, true))
    }
}

impl FromStr for VmTime {
    type Err = RuntimeError;

    fn from_str(s: &str) -> RunResult<Self> {
        DateTime::parse_from_rfc3339(s.trim())
            .map(Self)
            .map_err(|_| RuntimeError::not_converted())
    }
}

/// A signed span of time in nanoseconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct VmDuration(i64);

impl VmDuration {
    #[must_use]
    pub fn new(nanos: i64) -> Self {
        Self(nanos)
    }

    #[must_use]
    pub fn nanos(self) -> i64 {
        self.0
    }

    pub fn add(self, other: Self) -> RunResult<Self> {
        self.0
            .checked_add(other.0)
            .map(Self)
            .ok_or_else(RuntimeError::incorrect_operation)
    }

    pub fn sub(self, other: Self) -> RunResult<Self> {
        self.0
            .checked_sub(other.0)
            .map(Self)
            .ok_or_else(RuntimeError::incorrect_operation)
    }

    #[must_use]
    pub fn neg(self) -> Self {
        Self(-self.0)
    }
}

impl fmt::Display for VmDuration {
    /// Renders the largest exact unit, `1h30m0s`-style.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut n = self.0;
        if n == 0 {
            return f.write_str("0s");
        }
        if n < 0 {
            f.write_str("-")?;
            n = -n;
        }
        let hours = n / 3_600_000_000_000;
        let minutes = (n / 60_000_000_000) % 60;
        let secs = (n % 60_000_000_000) as f64 / 1e9;
        if hours > 0 {
            write!(f, "{hours}h{minutes}m{secs}s")
        } else if minutes > 0 {
            write!(f, "{minutes}m{secs}s")
        } else {
            write!(f, "{secs}s")
        }
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    fn t(s: &str) -> VmTime {
        s.parse().unwrap()
    }

    #[test]
    fn parse_keeps_offset() {
        let v = t("2017-08-17T09:23:00+03:00");
        assert_eq!(v.offset_seconds(), 3 * 3600);
        assert_eq!(v.to_string(), "2017-08-17T09:23:00+03:00");
    }

    #[test]
    fn time_arithmetic() {
        let a = t("2020-01-01T00:00:00+00:00");
        let hour = VmDuration::new(3_600_000_000_000);
        let b = a.add_duration(hour).unwrap();
        assert_eq!(b.to_string(), "2020-01-01T01:00:00Z");
        assert_eq!(b.sub_time(&a), hour);
        assert_eq!(b.sub_duration(hour).unwrap(), a);
    }

    #[test]
    fn binary_parts_round_trip() {
        let v = t("2017-08-17T09:23:00+03:00");
        let back = VmTime::from_parts(v.unix_nanos(), v.offset_seconds()).unwrap();
        assert_eq!(v, back);
    }

    #[test]
    fn duration_display() {
        assert_eq!(VmDuration::new(90_000_000_000).to_string(), "1m30s");
        assert_eq!(VmDuration::new(-1_500_000_000).to_string(), "-1.5s");
    }
}
