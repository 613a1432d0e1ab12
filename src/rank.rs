/*!
 * perfstats_digest: Top-N Consumer Ranker
 * ---------------------------------------
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
 *  Ranks pidstat processes per metric by their time averaged value.
 *
 *  Samples are grouped by command name, never by PID: a service that
 *  restarts, or forks several workers under one name, is one consumer.
 *  Within one timestamp the highest value across those PIDs is kept.
 *  The average only counts timestamps where the command was seen; the
 *  emitted series is 0 filled against every timestamp in the file.
 */

use std::collections::{BTreeSet, HashMap};
use std::fmt::Write as _;
use std::io::BufRead;

use serde::Serialize;
use tracing::{debug, trace};

use crate::error::{Result, RowError, SourceError};
use crate::lines::raw_lines;

/// pidstat report flavour. Column positions are relative to the first
/// field after the time (one token, or two with an AM/PM suffix).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ProcessFormat {
    /// `pidstat -u`: UID PID %usr %system %guest %wait %CPU CPU Command
    Cpu,
    /// `pidstat -d`: UID PID kB_rd/s kB_wr/s kB_ccwr/s iodelay Command
    Io,
    /// `pidstat -r`: UID PID minflt/s majflt/s VSZ RSS %MEM Command
    Memory,
}

impl ProcessFormat {
    pub fn name(self) -> &'static str {
        match self {
            ProcessFormat::Cpu => "cpu",
            ProcessFormat::Io => "io",
            ProcessFormat::Memory => "memory",
        }
    }

    /// (metric label, column offset)
    pub fn metrics(self) -> &'static [(&'static str, usize)] {
        match self {
            ProcessFormat::Cpu => &[("%usr", 2), ("%system", 3), ("%wait", 5), ("%CPU", 6)],
            ProcessFormat::Io => &[("kB_rd/s", 2), ("kB_wr/s", 3), ("iodelay", 5)],
            ProcessFormat::Memory => &[("%MEM", 6), ("RSS", 5), ("VSZ", 4)],
        }
    }

    fn command_offset(self) -> usize {
        match self {
            ProcessFormat::Cpu => 8,
            ProcessFormat::Io => 6,
            ProcessFormat::Memory => 7,
        }
    }
}

/// One pidstat data line.
#[derive(Debug, Clone, PartialEq)]
pub struct ProcessSample {
    /// Native time text, `HH:MM:SS` or `HH:MM:SS PM`
    pub timestamp: String,
    pub pid: String,
    pub command: String,
    /// Values in `ProcessFormat::metrics` order
    pub values: Vec<f64>,
}

impl ProcessSample {
    /// `Ok(None)` for lines that are not samples at all (banner, blank,
    /// column header, `Average:` summary).
    pub fn from_line(format: ProcessFormat, line: &str) -> std::result::Result<Option<Self>, RowError> {
        if line.trim().is_empty() || line.contains("Linux") || line.contains("UID") {
            return Ok(None);
        }
        let cols: Vec<&str> = line.split_whitespace().collect();
        if cols[0].split(':').count() != 3 {
            return Ok(None);
        }
        let (timestamp, offset) = match cols.get(1) {
            Some(&m) if m == "AM" || m == "PM" => (format!("{} {}", cols[0], m), 2),
            _ => (cols[0].to_string(), 1),
        };
        let command_at = offset + format.command_offset();
        if cols.len() <= command_at {
            return Err(RowError::TooShort { need: command_at + 1, got: cols.len() });
        }
        let values = format
            .metrics()
            .iter()
            .map(|&(_, at)| {
                let token = cols[offset + at];
                token.parse::<f64>().map_err(|_| RowError::Number(token.to_string()))
            })
            .collect::<std::result::Result<Vec<f64>, RowError>>()?;
        Ok(Some(ProcessSample {
            timestamp,
            pid: cols[offset + 1].to_string(),
            command: cols[command_at..].join(" "),
            values,
        }))
    }
}

// ==================== Output ====================

#[derive(Debug, Clone, Serialize)]
pub struct RankedCommand {
    pub command: String,
    pub pids: Vec<String>,
    /// Mean over observed timestamps, rounded to 2 decimals
    pub average: f64,
    /// Timestamps the command was observed at, zero readings included
    pub samples: usize,
    /// Aligned with `Ranking::timestamps`
    pub values: Vec<f64>,
}

#[derive(Debug, Clone, Serialize)]
pub struct MetricRanking {
    pub metric: String,
    pub top: Vec<RankedCommand>,
}

impl MetricRanking {
    /// Fixed width table in the same shape as the disk top-N reports.
    pub fn to_text(&self, title: &str) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "{title}\nMetric: {} (average)\n", self.metric);
        let _ = writeln!(out, "{:<5} {:<24} {:>12} {:>8}  {}", "Rank", "Command", "Average", "Samples", "PIDs");
        let _ = writeln!(out, "{}", "-".repeat(5 + 1 + 24 + 1 + 12 + 1 + 8 + 2 + 4));
        for (idx, cmd) in self.top.iter().enumerate() {
            let _ = writeln!(
                out,
                "{:<5} {:<24} {:>12.2} {:>8}  {}",
                idx + 1,
                cmd.command,
                cmd.average,
                cmd.samples,
                cmd.pids.join(",")
            );
        }
        out
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Ranking {
    pub format: ProcessFormat,
    pub top_n: usize,
    pub commands: usize,
    pub skipped: usize,
    /// Every timestamp in the file, sorted
    pub timestamps: Vec<String>,
    pub metrics: Vec<MetricRanking>,
}

impl Ranking {
    pub fn metric(&self, name: &str) -> Option<&MetricRanking> {
        self.metrics.iter().find(|m| m.metric == name)
    }
}

// ==================== Ranker ====================

struct ProcessSeries {
    command: String,
    pids: BTreeSet<String>,
    /// per metric: timestamp -> max value
    peaks: Vec<HashMap<String, f64>>,
}

pub struct ConsumerRanker {
    format: ProcessFormat,
    series: Vec<ProcessSeries>,
    index: HashMap<String, usize>,
    timestamps: BTreeSet<String>,
    skipped: usize,
}

impl ConsumerRanker {
    pub fn new(format: ProcessFormat) -> Self {
        ConsumerRanker {
            format,
            series: Vec::new(),
            index: HashMap::new(),
            timestamps: BTreeSet::new(),
            skipped: 0,
        }
    }

    pub fn push(&mut self, sample: ProcessSample) {
        let metrics = self.format.metrics().len();
        let slot = match self.index.get(&sample.command) {
            Some(&slot) => slot,
            None => {
                self.series.push(ProcessSeries {
                    command: sample.command.clone(),
                    pids: BTreeSet::new(),
                    peaks: vec![HashMap::new(); metrics],
                });
                self.index.insert(sample.command.clone(), self.series.len() - 1);
                self.series.len() - 1
            }
        };
        let series = &mut self.series[slot];
        series.pids.insert(sample.pid);
        for (peaks, value) in series.peaks.iter_mut().zip(&sample.values) {
            peaks
                .entry(sample.timestamp.clone())
                .and_modify(|v| *v = v.max(*value))
                .or_insert(*value);
        }
        self.timestamps.insert(sample.timestamp);
    }

    pub fn skip(&mut self) {
        self.skipped += 1;
    }

    pub fn is_empty(&self) -> bool {
        self.series.is_empty()
    }

    pub fn finish(self, top_n: usize) -> Ranking {
        let timestamps: Vec<String> = self.timestamps.into_iter().collect();
        let metrics = self
            .format
            .metrics()
            .iter()
            .enumerate()
            .map(|(m, &(label, _))| rank_metric(label, m, &self.series, &timestamps, top_n))
            .collect();
        Ranking {
            format: self.format,
            top_n,
            commands: self.series.len(),
            skipped: self.skipped,
            timestamps,
            metrics,
        }
    }
}

fn rank_metric(
    label: &str,
    metric: usize,
    series: &[ProcessSeries],
    timestamps: &[String],
    top_n: usize,
) -> MetricRanking {
    let mut scored: Vec<(&ProcessSeries, f64)> = series
        .iter()
        .filter_map(|s| {
            let peaks = &s.peaks[metric];
            (!peaks.is_empty()).then(|| (s, peaks.values().sum::<f64>() / peaks.len() as f64))
        })
        .collect();
    // stable: equal averages keep first-seen order
    scored.sort_by(|a, b| b.1.total_cmp(&a.1));
    let top = scored
        .into_iter()
        .take(top_n)
        .map(|(s, avg)| RankedCommand {
            command: s.command.clone(),
            pids: s.pids.iter().cloned().collect(),
            average: round2(avg),
            samples: s.peaks[metric].len(),
            values: timestamps
                .iter()
                .map(|ts| s.peaks[metric].get(ts).copied().unwrap_or(0.0))
                .collect(),
        })
        .collect();
    MetricRanking { metric: label.to_string(), top }
}

fn round2(v: f64) -> f64 {
    (v * 100.0).round() / 100.0
}

/// Rank a whole pidstat report.
pub fn rank<R: BufRead>(format: ProcessFormat, reader: R, top_n: usize) -> Result<Ranking> {
    let mut ranker = ConsumerRanker::new(format);
    let mut samples = 0usize;
    for line in raw_lines(reader) {
        let line = line?;
        match ProcessSample::from_line(format, &line.text) {
            Ok(Some(sample)) => {
                samples += 1;
                ranker.push(sample);
            }
            Ok(None) => {}
            Err(e) => {
                trace!(line = line.number, error = %e, "skipping process line");
                ranker.skip();
            }
        }
    }
    if ranker.is_empty() {
        return Err(SourceError::NoRows { format: format.name(), skipped: ranker.skipped });
    }
    let ranking = ranker.finish(top_n);
    debug!(
        samples,
        commands = ranking.commands,
        timestamps = ranking.timestamps.len(),
        skipped = ranking.skipped,
        "ranked processes"
    );
    Ok(ranking)
}
