/*!
 * perfstats_digest: Counter-Rate Deriver
 * --------------------------------------
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
 *  Turns the high resolution diskstats log into per-device rate series.
 *
 *  Log line, one per device per tick:
 *    Timestamp Major Minor Device Reads_Completed Reads_Merged
 *    Sectors_Read Time_Reading Writes_Completed Writes_Merged
 *    Sectors_Written Time_Writing IO_Currently IO_Time Weighted_IO_Time
 *    [Discards_Completed ... Time_Flushing]
 *
 *  Two resolutions are produced side by side:
 *    native     difference against the previous tick of the same device
 *    resampled  mean of the raw counters per fixed bucket, then the
 *               difference between adjacent buckets; a bucket that
 *               follows an empty one has no rate
 *
 *  Rates are per sampling step, not per second:
 *    IOPS     = dReads + dWrites
 *    MB       = (dSectors_Read + dSectors_Written) * 512 / 1024 / 1024
 *    latency  = dTime_in_class / dCompletions_in_class, 0 if none
 *    util %   = dIO_Time / elapsed_ms * 100
 *
 *  A counter that goes backwards (reset or wrap) contributes 0.
 */

use std::collections::HashMap;
use std::io::BufRead;

use chrono::{DateTime, NaiveDateTime};
use serde::Serialize;
use tracing::{debug, trace, warn};

use crate::error::{Result, RowError, SourceError};
use crate::lines::raw_lines;
use crate::timestamp::{Timestamp, TimestampFormat};

const SECTOR_BYTES: f64 = 512.0;
const MIN_FIELDS: usize = 15;

/// One device's cumulative counters at one tick.
#[derive(Debug, Clone)]
pub struct CounterSample {
    pub timestamp: NaiveDateTime,
    pub major: u32,
    pub minor: u32,
    /// Device name (e.g., sda, nvme0n1, dm-0)
    pub device: String,
    pub reads: u64,
    pub sectors_read: u64,
    /// Time spent reading (ms)
    pub read_time_ms: u64,
    pub writes: u64,
    pub sectors_written: u64,
    /// Time spent writing (ms)
    pub write_time_ms: u64,
    /// Time the device had I/O in flight (ms)
    pub io_time_ms: u64,
}

impl CounterSample {
    /// Parses one line of the high resolution log. Header lines and
    /// truncated lines come back as row errors.
    pub fn from_line(line: &str) -> std::result::Result<Self, RowError> {
        let cols: Vec<&str> = line.split_whitespace().collect();
        if cols.len() < MIN_FIELDS {
            return Err(RowError::TooShort { need: MIN_FIELDS, got: cols.len() });
        }
        let timestamp = match TimestampFormat::DateTimeFraction.parse(cols[0]) {
            Some(Timestamp::DateTime(ts)) => ts,
            _ => return Err(RowError::Timestamp(cols[0].to_string())),
        };
        Ok(Self {
            timestamp,
            major: number(cols[1])?,
            minor: number(cols[2])?,
            device: cols[3].to_string(),
            reads: number(cols[4])?,
            sectors_read: number(cols[6])?,
            read_time_ms: number(cols[7])?,
            writes: number(cols[8])?,
            sectors_written: number(cols[10])?,
            write_time_ms: number(cols[11])?,
            io_time_ms: number(cols[13])?,
        })
    }

    fn counters(&self) -> Counters {
        Counters {
            reads: self.reads as f64,
            sectors_read: self.sectors_read as f64,
            read_time_ms: self.read_time_ms as f64,
            writes: self.writes as f64,
            sectors_written: self.sectors_written as f64,
            write_time_ms: self.write_time_ms as f64,
            io_time_ms: self.io_time_ms as f64,
        }
    }
}

fn number<T: std::str::FromStr>(token: &str) -> std::result::Result<T, RowError> {
    token.parse().map_err(|_| RowError::Number(token.to_string()))
}

/// Counter values as floats so bucket means and raw ticks share one
/// differencing path.
#[derive(Debug, Clone, Copy, Default)]
struct Counters {
    reads: f64,
    sectors_read: f64,
    read_time_ms: f64,
    writes: f64,
    sectors_written: f64,
    write_time_ms: f64,
    io_time_ms: f64,
}

impl Counters {
    fn add(&mut self, other: &Counters) {
        self.reads += other.reads;
        self.sectors_read += other.sectors_read;
        self.read_time_ms += other.read_time_ms;
        self.writes += other.writes;
        self.sectors_written += other.sectors_written;
        self.write_time_ms += other.write_time_ms;
        self.io_time_ms += other.io_time_ms;
    }

    fn scaled(&self, factor: f64) -> Counters {
        Counters {
            reads: self.reads * factor,
            sectors_read: self.sectors_read * factor,
            read_time_ms: self.read_time_ms * factor,
            writes: self.writes * factor,
            sectors_written: self.sectors_written * factor,
            write_time_ms: self.write_time_ms * factor,
            io_time_ms: self.io_time_ms * factor,
        }
    }
}

// ==================== Rates ====================

#[derive(Debug, Clone, Serialize)]
pub struct RateSample {
    pub timestamp: Timestamp,
    pub reads: f64,
    pub writes: f64,
    pub iops: f64,
    pub mb: f64,
    pub read_latency_ms: f64,
    pub write_latency_ms: f64,
    pub util_pct: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Resolution {
    Native,
    Resampled,
}

#[derive(Debug, Clone, Serialize)]
pub struct DeviceRates {
    pub device: String,
    pub samples: usize,
    /// Native deltas clamped to zero because a counter went backwards.
    pub native_resets: usize,
    /// Same, between bucket means.
    pub resampled_resets: usize,
    pub native: Vec<RateSample>,
    pub resampled: Vec<RateSample>,
}

impl DeviceRates {
    pub fn series(&self, resolution: Resolution) -> &[RateSample] {
        match resolution {
            Resolution::Native => &self.native,
            Resolution::Resampled => &self.resampled,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct DiskRates {
    pub interval_ms: u64,
    pub skipped: usize,
    /// Devices in order of first appearance.
    pub devices: Vec<DeviceRates>,
}

impl DiskRates {
    pub fn device(&self, name: &str) -> Option<&DeviceRates> {
        self.devices.iter().find(|d| d.device == name)
    }
}

/// Clamped difference. Returns the delta and whether it had to be clamped.
fn delta(cur: f64, prev: f64) -> (f64, bool) {
    let d = cur - prev;
    if d < 0.0 { (0.0, true) } else { (d, false) }
}

fn per_op(time: f64, count: f64) -> f64 {
    if count > 0.0 { time / count } else { 0.0 }
}

/// Difference two counter snapshots. `resets` is bumped once per clamped
/// field.
fn rate(
    device: &str,
    timestamp: NaiveDateTime,
    prev: &Counters,
    cur: &Counters,
    elapsed_ms: f64,
    resets: &mut usize,
) -> RateSample {
    let mut d = |field: &'static str, c: f64, p: f64| {
        let (value, clamped) = delta(c, p);
        if clamped {
            *resets += 1;
            warn!(device, field, %timestamp, "counter went backwards, rate set to 0");
        }
        value
    };
    let reads = d("reads", cur.reads, prev.reads);
    let writes = d("writes", cur.writes, prev.writes);
    let sectors_read = d("sectors_read", cur.sectors_read, prev.sectors_read);
    let sectors_written = d("sectors_written", cur.sectors_written, prev.sectors_written);
    let read_time = d("read_time_ms", cur.read_time_ms, prev.read_time_ms);
    let write_time = d("write_time_ms", cur.write_time_ms, prev.write_time_ms);
    let io_time = d("io_time_ms", cur.io_time_ms, prev.io_time_ms);

    RateSample {
        timestamp: Timestamp::DateTime(timestamp),
        reads,
        writes,
        iops: reads + writes,
        mb: (sectors_read + sectors_written) * SECTOR_BYTES / 1024.0 / 1024.0,
        read_latency_ms: per_op(read_time, reads),
        write_latency_ms: per_op(write_time, writes),
        util_pct: if elapsed_ms > 0.0 { io_time / elapsed_ms * 100.0 } else { 0.0 },
    }
}

// ==================== Deriver ====================

struct Bucket {
    id: i64,
    sum: Counters,
    count: usize,
}

impl Bucket {
    fn mean(&self) -> Counters {
        self.sum.scaled(1.0 / self.count as f64)
    }
}

struct DeviceState {
    rates: DeviceRates,
    last: Option<(NaiveDateTime, Counters)>,
    bucket: Option<Bucket>,
    last_mean: Option<(i64, Counters)>,
}

impl DeviceState {
    fn new(device: &str) -> Self {
        DeviceState {
            rates: DeviceRates {
                device: device.to_string(),
                samples: 0,
                native_resets: 0,
                resampled_resets: 0,
                native: Vec::new(),
                resampled: Vec::new(),
            },
            last: None,
            bucket: None,
            last_mean: None,
        }
    }
}

/// Streaming deriver. Feed samples in time order, one device interleaved
/// with another is fine.
pub struct RateDeriver {
    interval_ms: i64,
    devices: Vec<DeviceState>,
    index: HashMap<String, usize>,
    skipped: usize,
}

impl RateDeriver {
    pub fn new(interval_ms: u64) -> Self {
        RateDeriver {
            interval_ms: i64::try_from(interval_ms.max(1)).unwrap_or(i64::MAX),
            devices: Vec::new(),
            index: HashMap::new(),
            skipped: 0,
        }
    }

    pub fn push(&mut self, sample: &CounterSample) {
        let slot = match self.index.get(&sample.device) {
            Some(&slot) => slot,
            None => {
                self.devices.push(DeviceState::new(&sample.device));
                self.index.insert(sample.device.clone(), self.devices.len() - 1);
                self.devices.len() - 1
            }
        };
        let interval_ms = self.interval_ms;
        let state = &mut self.devices[slot];
        let counters = sample.counters();
        state.rates.samples += 1;

        if let Some((last_ts, last)) = &state.last {
            let elapsed_ms = (sample.timestamp - *last_ts).num_milliseconds() as f64;
            let rs = rate(
                &sample.device,
                sample.timestamp,
                last,
                &counters,
                elapsed_ms,
                &mut state.rates.native_resets,
            );
            state.rates.native.push(rs);
        }
        state.last = Some((sample.timestamp, counters));

        let id = sample.timestamp.and_utc().timestamp_millis().div_euclid(interval_ms);
        match state.bucket.as_mut().filter(|b| b.id == id) {
            Some(bucket) => {
                bucket.sum.add(&counters);
                bucket.count += 1;
            }
            None => {
                close_bucket(state, interval_ms);
                state.bucket = Some(Bucket { id, sum: counters, count: 1 });
            }
        }
    }

    /// Count a line that could not be parsed.
    pub fn skip(&mut self) {
        self.skipped += 1;
    }

    pub fn finish(mut self) -> DiskRates {
        let interval_ms = self.interval_ms;
        for state in &mut self.devices {
            close_bucket(state, interval_ms);
        }
        DiskRates {
            interval_ms: interval_ms as u64,
            skipped: self.skipped,
            devices: self.devices.into_iter().map(|s| s.rates).collect(),
        }
    }
}

fn close_bucket(state: &mut DeviceState, interval_ms: i64) {
    let Some(bucket) = state.bucket.take() else {
        return;
    };
    let mean = bucket.mean();
    // only adjacent buckets are differenced; after a gap the series restarts
    if let Some((last_id, last_mean)) = &state.last_mean {
        if bucket.id - last_id == 1 {
            let rs = rate(
                &state.rates.device,
                bucket_start(bucket.id, interval_ms),
                last_mean,
                &mean,
                interval_ms as f64,
                &mut state.rates.resampled_resets,
            );
            state.rates.resampled.push(rs);
        } else {
            debug!(
                device = state.rates.device,
                missing = bucket.id - last_id - 1,
                "resampled series gap"
            );
        }
    }
    state.last_mean = Some((bucket.id, mean));
}

fn bucket_start(id: i64, interval_ms: i64) -> NaiveDateTime {
    DateTime::from_timestamp_millis(id * interval_ms)
        .map(|dt| dt.naive_utc())
        .unwrap_or_default()
}

/// Derive both resolutions from a whole high resolution log.
pub fn derive<R: BufRead>(reader: R, interval_ms: u64) -> Result<DiskRates> {
    let mut deriver = RateDeriver::new(interval_ms);
    let mut accepted = 0usize;
    for line in raw_lines(reader) {
        let line = line?;
        if line.text.trim().is_empty() {
            continue;
        }
        match CounterSample::from_line(&line.text) {
            Ok(sample) => {
                accepted += 1;
                deriver.push(&sample);
            }
            Err(e) => {
                trace!(line = line.number, error = %e, "skipping counter line");
                deriver.skip();
            }
        }
    }
    let rates = deriver.finish();
    if accepted == 0 {
        return Err(SourceError::NoRows { format: "diskstats", skipped: rates.skipped });
    }
    debug!(
        samples = accepted,
        devices = rates.devices.len(),
        skipped = rates.skipped,
        "derived counter rates"
    );
    Ok(rates)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn line(ts: &str, dev: &str, reads: u64, read_time: u64, writes: u64, io_time: u64) -> String {
        format!(
            "{ts} 8 0 {dev} {reads} 0 {} {read_time} {writes} 0 {} 0 0 {io_time} 0",
            reads * 8,
            writes * 8
        )
    }

    fn run(lines: &[String]) -> DiskRates {
        derive(lines.join("\n").as_bytes(), 1000).unwrap()
    }

    #[test]
    fn test_native_rates_example() {
        let rates = run(&[
            line("2025-03-01-10:00:00.000", "sda", 100, 0, 0, 0),
            line("2025-03-01-10:00:01.000", "sda", 150, 0, 0, 0),
            line("2025-03-01-10:00:02.000", "sda", 225, 0, 0, 0),
        ]);
        let sda = rates.device("sda").unwrap();
        assert_eq!(sda.samples, 3);
        let iops: Vec<f64> = sda.native.iter().map(|r| r.iops).collect();
        assert_eq!(iops, vec![50.0, 75.0]);
        assert_eq!(sda.native[0].timestamp.to_string(), "2025-03-01 10:00:01.000");
    }

    #[test]
    fn test_latency_throughput_util() {
        let rates = run(&[
            line("2025-03-01-10:00:00.000", "nvme0n1", 0, 0, 0, 0),
            line("2025-03-01-10:00:00.500", "nvme0n1", 10, 30, 0, 250),
        ]);
        let r = &rates.device("nvme0n1").unwrap().native[0];
        assert_eq!(r.read_latency_ms, 3.0);
        assert_eq!(r.write_latency_ms, 0.0);
        // 80 sectors of 512 bytes
        assert!((r.mb - 80.0 * 512.0 / 1024.0 / 1024.0).abs() < 1e-12);
        assert_eq!(r.util_pct, 50.0);
    }

    #[test]
    fn test_counter_reset_is_zero() {
        let rates = run(&[
            line("2025-03-01-10:00:00.000", "sdb", 100, 10, 5, 0),
            line("2025-03-01-10:00:01.000", "sdb", 40, 12, 9, 0),
        ]);
        let sdb = rates.device("sdb").unwrap();
        assert_eq!(sdb.native[0].reads, 0.0);
        assert_eq!(sdb.native[0].writes, 4.0);
        assert_eq!(sdb.native[0].read_latency_ms, 0.0);
        // reads and sectors_read, counted once per pass
        assert_eq!(sdb.native_resets, 2);
        assert_eq!(sdb.resampled_resets, 2);
    }

    #[test]
    fn test_resampled_bucket_means() {
        let rates = run(&[
            line("2025-03-01-10:00:00.000", "sda", 100, 0, 0, 0),
            line("2025-03-01-10:00:00.500", "sda", 200, 0, 0, 0),
            line("2025-03-01-10:00:01.000", "sda", 300, 0, 0, 0),
            line("2025-03-01-10:00:01.500", "sda", 500, 0, 0, 0),
        ]);
        let sda = rates.device("sda").unwrap();
        assert_eq!(sda.series(Resolution::Native).len(), 3);
        let resampled = sda.series(Resolution::Resampled);
        assert_eq!(resampled.len(), 1);
        assert_eq!(resampled[0].iops, 250.0);
        assert_eq!(resampled[0].timestamp.to_string(), "2025-03-01 10:00:01.000");
    }

    #[test]
    fn test_resampled_no_rate_across_empty_buckets() {
        let rates = run(&[
            line("2025-03-01-10:00:00.000", "sda", 0, 0, 0, 0),
            line("2025-03-01-10:00:01.000", "sda", 100, 0, 0, 0),
            line("2025-03-01-10:00:05.000", "sda", 500, 0, 0, 0),
            line("2025-03-01-10:00:06.000", "sda", 600, 0, 0, 0),
        ]);
        let sda = rates.device("sda").unwrap();
        assert_eq!(sda.native.len(), 3);
        let resampled: Vec<(String, f64)> = sda
            .resampled
            .iter()
            .map(|r| (r.timestamp.to_string(), r.iops))
            .collect();
        assert_eq!(
            resampled,
            vec![
                ("2025-03-01 10:00:01.000".to_string(), 100.0),
                ("2025-03-01 10:00:06.000".to_string(), 100.0),
            ]
        );
    }

    #[test]
    fn test_devices_interleaved_and_header_skipped() {
        let mut lines = vec!["Timestamp Major Minor Device Reads_Completed Reads_Merged \
            Sectors_Read Time_Reading Writes_Completed Writes_Merged Sectors_Written \
            Time_Writing IO_Currently IO_Time Weighted_IO_Time"
            .to_string()];
        lines.push(line("2025-03-01-10:00:00.000", "sda", 1, 0, 0, 0));
        lines.push(line("2025-03-01-10:00:00.000", "dm-0", 1, 0, 0, 0));
        lines.push(line("2025-03-01-10:00:01.000", "sda", 2, 0, 0, 0));
        lines.push("2025-03-01-10:00:01.000 8 0 sdc 1".to_string());
        let rates = run(&lines);
        assert_eq!(rates.skipped, 2);
        let names: Vec<&str> = rates.devices.iter().map(|d| d.device.as_str()).collect();
        assert_eq!(names, vec!["sda", "dm-0"]);
        assert!(rates.device("dm-0").unwrap().native.is_empty());
    }

    #[test]
    fn test_no_samples_is_file_level() {
        let err = derive("Timestamp Major Minor Device\n".as_bytes(), 1000).unwrap_err();
        assert!(matches!(err, SourceError::NoRows { skipped: 1, .. }));
    }

    #[test]
    fn test_from_line_short() {
        let err = CounterSample::from_line("2025-03-01-10:00:00.000 8 0 sda").unwrap_err();
        assert_eq!(err, RowError::TooShort { need: MIN_FIELDS, got: 4 });
    }
}
