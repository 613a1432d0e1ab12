/*!
 * perfstats_digest: Line Classifier
 * ---------------------------------
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
 *  Separates the data lines of a whitespace-columned sampler log
 *  (mpstat, iostat, vmstat, sar -n DEV) from its noise: kernel banner
 *  lines, per-sample repeated column headers, Average summaries and
 *  AM/PM locale tokens. Exactly one header line is kept per file.
 */

use std::io::BufRead;

use serde::Serialize;
use tracing::{debug, trace};

use crate::error::{Result, SourceError};
use crate::lines::{RawLine, raw_lines};
use crate::timestamp::TimestampFormat;

/// Label given to the first column of every normalised header.
pub const TIMESTAMP_COLUMN: &str = "Timestamp";

/// Block device name fragments accepted in iostat output
/// (SCSI/SATA, device-mapper, NVMe).
const DEVICE_FRAGMENTS: [&str; 3] = ["sd", "dm-", "nvme"];

fn is_device_line(text: &str) -> bool {
    DEVICE_FRAGMENTS.iter().any(|frag| text.contains(frag))
}

// ==================== Formats ====================

/// Whitespace-columned sampler formats handled by the classifier and the
/// tabular extractor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TabularFormat {
    /// mpstat -P ALL
    Cpu,
    /// iostat -x, one row per device per sample
    Disk,
    /// vmstat
    Memory,
    /// sar -n DEV
    Network,
}

impl TabularFormat {
    pub fn name(self) -> &'static str {
        match self {
            TabularFormat::Cpu => "cpu",
            TabularFormat::Disk => "disk",
            TabularFormat::Memory => "memory",
            TabularFormat::Network => "network",
        }
    }

    pub fn timestamp_format(self) -> TimestampFormat {
        match self {
            TabularFormat::Cpu | TabularFormat::Network => TimestampFormat::TimeOfDay,
            TabularFormat::Disk | TabularFormat::Memory => TimestampFormat::DateTime,
        }
    }

    /// Whether column 1 is a secondary key (CPU id, device, interface).
    pub fn has_key(self) -> bool {
        !matches!(self, TabularFormat::Memory)
    }
}

// ==================== Classifier ====================

#[derive(Debug, Clone, PartialEq)]
pub enum LineClass {
    Header(Vec<String>),
    Data(String),
    Noise,
}

/// Header plus the surviving data lines of one file.
#[derive(Debug, Clone)]
pub struct Classified {
    pub format: TabularFormat,
    pub header: Vec<String>,
    pub lines: Vec<RawLine>,
    pub dropped: usize,
}

/// Per-file classification state. Feed lines in order with
/// [`LineClassifier::classify`].
pub struct LineClassifier {
    format: TabularFormat,
    header: Option<Vec<String>>,
}

impl LineClassifier {
    pub fn new(format: TabularFormat) -> Self {
        LineClassifier { format, header: None }
    }

    pub fn header(&self) -> Option<&[String]> {
        self.header.as_deref()
    }

    pub fn classify(&mut self, text: &str) -> LineClass {
        match self.format {
            TabularFormat::Cpu => self.classify_cpu(text),
            TabularFormat::Disk => self.classify_disk(text),
            TabularFormat::Memory => self.classify_memory(text),
            TabularFormat::Network => self.classify_network(text),
        }
    }

    fn classify_cpu(&mut self, text: &str) -> LineClass {
        if text.trim().is_empty() || text.contains("Linux") || text.contains("Average") {
            return LineClass::Noise;
        }
        let cleaned = strip_meridiem(text);
        let tokens = tokenize(&cleaned);
        match &self.header {
            None => self.set_header(relabel_first(tokens)),
            Some(header) if is_repeated_header(header, &tokens) => LineClass::Noise,
            Some(_) => LineClass::Data(cleaned),
        }
    }

    fn classify_disk(&mut self, text: &str) -> LineClass {
        if text.contains("Device") {
            if self.header.is_some() {
                return LineClass::Noise;
            }
            return self.set_header(anchor_header(tokenize(text), |t| t.starts_with("Device")));
        }
        if is_device_line(text) {
            LineClass::Data(text.trim().to_string())
        } else {
            LineClass::Noise
        }
    }

    fn classify_memory(&mut self, text: &str) -> LineClass {
        if self.header.is_none() && text.contains("swpd") {
            return self.set_header(anchor_header(tokenize(text), |t| t == "r"));
        }
        if text.trim().is_empty()
            || text.contains("procs")
            || text.contains("swpd")
            || text.contains("Linux")
        {
            return LineClass::Noise;
        }
        LineClass::Data(text.trim().to_string())
    }

    fn classify_network(&mut self, text: &str) -> LineClass {
        if text.contains("IFACE") {
            if self.header.is_some() {
                return LineClass::Noise;
            }
            let tokens = tokenize(&strip_meridiem(text));
            return self.set_header(relabel_first(tokens));
        }
        if text.trim().is_empty() || text.contains("Linux") {
            return LineClass::Noise;
        }
        LineClass::Data(strip_meridiem(text))
    }

    fn set_header(&mut self, tokens: Vec<String>) -> LineClass {
        let header = unique_columns(tokens);
        self.header = Some(header.clone());
        LineClass::Header(header)
    }
}

/// Classify a whole stream, line by line.
/// Fails with `NoHeader` when the file ends before a header was seen.
pub fn classify<R: BufRead>(format: TabularFormat, reader: R) -> Result<Classified> {
    let mut classifier = LineClassifier::new(format);
    let mut lines = Vec::new();
    let mut dropped = 0usize;

    for line in raw_lines(reader) {
        let line = line?;
        match classifier.classify(&line.text) {
            LineClass::Data(text) => lines.push(RawLine { number: line.number, text }),
            LineClass::Header(header) => {
                debug!(line = line.number, columns = header.len(), "{} header", format.name());
            }
            LineClass::Noise => {
                trace!(line = line.number, "noise: {}", line.text);
                dropped += 1;
            }
        }
    }

    let header = classifier
        .header
        .take()
        .ok_or(SourceError::NoHeader { format: format.name() })?;
    Ok(Classified { format, header, lines, dropped })
}

// ==================== Helpers ====================

/// Remove AM/PM markers textually. Downstream parsing assumes a 24h clock.
pub fn strip_meridiem(text: &str) -> String {
    text.replace("AM", "").replace("PM", "").trim().to_string()
}

fn tokenize(text: &str) -> Vec<String> {
    text.split_whitespace().map(str::to_string).collect()
}

fn relabel_first(mut tokens: Vec<String>) -> Vec<String> {
    if let Some(first) = tokens.first_mut() {
        *first = TIMESTAMP_COLUMN.to_string();
    }
    tokens
}

/// Build a header that starts at the first tool column and is preceded by
/// the collector's timestamp column, whether or not the collector also
/// stamped the header line itself.
fn anchor_header<F: Fn(&str) -> bool>(tokens: Vec<String>, is_anchor: F) -> Vec<String> {
    let start = tokens.iter().position(|t| is_anchor(t)).unwrap_or(0);
    let mut header = Vec::with_capacity(tokens.len() - start + 1);
    header.push(TIMESTAMP_COLUMN.to_string());
    header.extend(tokens.into_iter().skip(start));
    header
}

/// A line whose labels after the time column match the header.
fn is_repeated_header(header: &[String], tokens: &[String]) -> bool {
    tokens.len() == header.len() && tokens.len() > 1 && tokens[1..] == header[1..]
}

/// Column names must be unique within a row: later duplicates get `.1`, `.2`, ...
fn unique_columns(tokens: Vec<String>) -> Vec<String> {
    let mut out: Vec<String> = Vec::with_capacity(tokens.len());
    for token in tokens {
        if !out.contains(&token) {
            out.push(token);
            continue;
        }
        let mut n = 1;
        while out.contains(&format!("{token}.{n}")) {
            n += 1;
        }
        out.push(format!("{token}.{n}"));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    const MPSTAT: &str = "\
Linux 5.4.0-150-generic (db01) \t03/01/2025 \t_x86_64_\t(2 CPU)

10:00:01 AM  CPU    %usr   %nice    %sys %iowait
10:00:02 AM  all    2.00    0.00    1.00    0.50
10:00:02 AM    0    3.00    0.00    1.00    1.00

10:00:02 AM  CPU    %usr   %nice    %sys %iowait
10:00:03 AM  all    4.00    0.00    2.00    0.00
Average:     all    3.00    0.00    1.50    0.25
";

    #[test]
    fn test_cpu_filters_banner_average_and_repeats() {
        let c = classify(TabularFormat::Cpu, MPSTAT.as_bytes()).unwrap();
        assert_eq!(c.header, vec!["Timestamp", "CPU", "%usr", "%nice", "%sys", "%iowait"]);
        let texts: Vec<&str> = c.lines.iter().map(|l| l.text.as_str()).collect();
        assert_eq!(texts.len(), 3);
        assert!(texts.iter().all(|t| !t.contains("AM") && !t.contains("Linux")));
        assert!(texts[0].starts_with("10:00:02"));
        assert_eq!(c.lines[0].number, 4);
    }

    #[test]
    fn test_banner_always_excluded() {
        let banner = "Linux 5.4 (host) 03/01/2025 _x86_64_ (2 CPU)";
        for format in [TabularFormat::Cpu, TabularFormat::Memory, TabularFormat::Network] {
            let mut c = LineClassifier::new(format);
            // give the classifier a header first so the banner is judged as data
            match format {
                TabularFormat::Cpu => { c.classify("10:00:01 CPU %usr"); }
                TabularFormat::Memory => { c.classify(" r  b   swpd   free"); }
                _ => { c.classify("10:00:01 IFACE rxpck/s"); }
            }
            assert_eq!(c.classify(banner), LineClass::Noise, "{format:?}");
        }
    }

    #[test]
    fn test_disk_header_and_device_filter() {
        let input = "\
Linux 5.14 (web) 03/01/2025 _x86_64_ (4 CPU)
2025-03-01-10:00:00 Device r/s w/s %util
2025-03-01-10:00:00 sda 1.00 2.00 3.00
2025-03-01-10:00:00 loop0 0.00 0.00 0.00
2025-03-01-10:00:00 nvme0n1 5.00 6.00 7.00
2025-03-01-10:00:01 Device r/s w/s %util
2025-03-01-10:00:01 dm-0 1.00 1.00 1.00
";
        let c = classify(TabularFormat::Disk, input.as_bytes()).unwrap();
        assert_eq!(c.header, vec!["Timestamp", "Device", "r/s", "w/s", "%util"]);
        let devices: Vec<&str> =
            c.lines.iter().map(|l| l.text.split_whitespace().nth(1).unwrap()).collect();
        assert_eq!(devices, vec!["sda", "nvme0n1", "dm-0"]);
    }

    #[test]
    fn test_device_fragments() {
        assert!(is_device_line("2025-03-01-10:00:00 sdb 1.00"));
        assert!(is_device_line("2025-03-01-10:00:00 dm-3 1.00"));
        assert!(is_device_line("2025-03-01-10:00:00 nvme1n1 1.00"));
        assert!(!is_device_line("2025-03-01-10:00:00 loop0 1.00"));
        assert!(!is_device_line("2025-03-01-10:00:00 dm3 1.00"));
    }

    #[test]
    fn test_memory_header_gets_timestamp_column() {
        let input = "\
procs -----------memory---------- ---swap--
 r  b   swpd   free   buff  cache
2025-03-01-10:00:00 1  0      0 812344  20480 402112
procs -----------memory---------- ---swap--
 r  b   swpd   free   buff  cache
2025-03-01-10:00:01 0  0      0 812000  20480 402200
";
        let c = classify(TabularFormat::Memory, input.as_bytes()).unwrap();
        assert_eq!(c.header, vec!["Timestamp", "r", "b", "swpd", "free", "buff", "cache"]);
        assert_eq!(c.lines.len(), 2);
        assert_eq!(c.dropped, 3);
    }

    #[test]
    fn test_network_header_relabel_and_meridiem() {
        let input = "\
Linux 5.14 (web) 03/01/2025 _x86_64_ (4 CPU)

01:00:01 PM     IFACE   rxpck/s   txpck/s
01:00:02 PM        lo      1.00      1.00
01:00:02 PM      eth0     10.00     20.00
";
        let c = classify(TabularFormat::Network, input.as_bytes()).unwrap();
        assert_eq!(c.header, vec!["Timestamp", "IFACE", "rxpck/s", "txpck/s"]);
        assert_eq!(c.lines.len(), 2);
        assert!(c.lines[1].text.starts_with("01:00:02 "));
        assert!(!c.lines[1].text.contains("PM"));
    }

    #[test]
    fn test_missing_header_is_fatal() {
        let err = classify(TabularFormat::Disk, "2025-03-01-10:00:00 sda 1 2\n".as_bytes())
            .unwrap_err();
        assert!(matches!(err, SourceError::NoHeader { format: "disk" }));
    }

    #[test]
    fn test_duplicate_columns_are_suffixed() {
        let cols = unique_columns(vec!["a".into(), "b".into(), "a".into(), "a".into()]);
        assert_eq!(cols, vec!["a", "b", "a.1", "a.2"]);
    }
}
