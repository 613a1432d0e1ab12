/*!
 * perfstats_digest: Timestamps
 * ----------------------------
 * Copyright (C) 2025 Laurence Oberman <loberman@redhat.com>
 *
 * This program is free software: you can redistribute it and/or modify
 * it under the terms of the GNU General Public License as published by
 * the Free Software Foundation, either version 3 of the License, or
 * (at your option) any later version.
 *
 * This program is distributed in the hope that it will be useful,
 * but WITHOUT ANY WARRANTY; without even the implied warranty of
 * MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
 * GNU General Public License for more details.
 *
 * You should have received a copy of the GNU General Public License
 * along with this program.  If not, see <http://www.gnu.org/licenses/>.
 *
 * ----------------------------------------------------------------------
 *  Sampler timestamps.
 *
 *  mpstat and sar print a bare time of day, the collector stamps iostat,
 *  vmstat and the diskstats log with a full date. Both parse into one
 *  ordered type so tables can be sorted and keyed without caring which.
 */

use std::fmt;

use chrono::{NaiveDateTime, NaiveTime};
use serde::{Serialize, Serializer};

/// Fixed per-tool timestamp grammar.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimestampFormat {
    /// `HH:MM:SS` (mpstat, sar)
    TimeOfDay,
    /// `YYYY-MM-DD-HH:MM:SS` (collector stamped iostat / vmstat)
    DateTime,
    /// `YYYY-MM-DD-HH:MM:SS.fff` (high resolution diskstats log)
    DateTimeFraction,
}

impl TimestampFormat {
    pub fn pattern(self) -> &'static str {
        match self {
            TimestampFormat::TimeOfDay => "%H:%M:%S",
            TimestampFormat::DateTime => "%Y-%m-%d-%H:%M:%S",
            TimestampFormat::DateTimeFraction => "%Y-%m-%d-%H:%M:%S%.f",
        }
    }

    pub fn parse(self, token: &str) -> Option<Timestamp> {
        match self {
            TimestampFormat::TimeOfDay => NaiveTime::parse_from_str(token, self.pattern())
                .ok()
                .map(Timestamp::Time),
            TimestampFormat::DateTime | TimestampFormat::DateTimeFraction => {
                NaiveDateTime::parse_from_str(token, self.pattern())
                    .ok()
                    .map(Timestamp::DateTime)
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Timestamp {
    Time(NaiveTime),
    DateTime(NaiveDateTime),
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Timestamp::Time(t) => write!(f, "{}", t.format("%H:%M:%S")),
            Timestamp::DateTime(dt) => write!(f, "{}", dt.format("%Y-%m-%d %H:%M:%S%.3f")),
        }
    }
}

impl Serialize for Timestamp {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_time_of_day() {
        let ts = TimestampFormat::TimeOfDay.parse("13:05:09").unwrap();
        assert_eq!(ts.to_string(), "13:05:09");
        assert!(TimestampFormat::TimeOfDay.parse("Average:").is_none());
    }

    #[test]
    fn test_date_time_variants() {
        let a = TimestampFormat::DateTime.parse("2025-03-01-10:00:00").unwrap();
        let b = TimestampFormat::DateTimeFraction.parse("2025-03-01-10:00:00.050").unwrap();
        assert!(a < b);
        assert_eq!(b.to_string(), "2025-03-01 10:00:00.050");
        assert!(TimestampFormat::DateTime.parse("10:00:00").is_none());
    }
}
