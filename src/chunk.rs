/*!
 * perfstats_digest: Timestamp Chunker
 * -----------------------------------
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
 *  Splits per-process snapshot logs (pidstat, top, iotop) into raw text
 *  blocks, one per sample timestamp, for drill-down display.
 *
 *  Layouts:
 *  - LeadingTimestamp: pidstat, every data line starts with HH:MM:SS
 *  - HeaderBeforeData: iotop -b -t, 8 char clock prefix opens a block
 *  - MarkerAfterData:  legacy iotop, a date line followed by a
 *                      "Total DISK READ" marker opens a block
 *  - PrefixToken:      top -b, "top - HH:MM:SS up ..." opens a block
 *
 *  A key that shows up again later replaces the earlier block.
 */

use std::collections::{BTreeMap, HashMap};
use std::io::BufRead;

use serde::Serialize;
use tracing::debug;

use crate::classify::TIMESTAMP_COLUMN;
use crate::error::{Result, SourceError};
use crate::lines::raw_lines;

const IOTOP_MARKER: &str = "Total DISK READ";
const TOP_PREFIX: &str = "top - ";
const WEEKDAYS: [&str; 7] = ["Mon", "Tue", "Wed", "Thu", "Fri", "Sat", "Sun"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ChunkLayout {
    LeadingTimestamp,
    HeaderBeforeData,
    MarkerAfterData,
    PrefixToken,
}

/// Snapshot tools whose output is chunked.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChunkFormat {
    Pidstat,
    Top,
    Iotop,
}

impl ChunkFormat {
    pub fn name(self) -> &'static str {
        match self {
            ChunkFormat::Pidstat => "pidstat",
            ChunkFormat::Top => "top",
            ChunkFormat::Iotop => "iotop",
        }
    }

    /// iotop switched layouts between releases: old batch output opens
    /// each sample with a full date line.
    pub fn layout_for(self, first_line: &str) -> ChunkLayout {
        match self {
            ChunkFormat::Pidstat => ChunkLayout::LeadingTimestamp,
            ChunkFormat::Top => ChunkLayout::PrefixToken,
            ChunkFormat::Iotop => {
                if WEEKDAYS.iter().any(|d| first_line.starts_with(d)) {
                    ChunkLayout::MarkerAfterData
                } else {
                    ChunkLayout::HeaderBeforeData
                }
            }
        }
    }
}

// ==================== Output ====================

#[derive(Debug, Clone)]
pub struct ChunkSet {
    pub layout: ChunkLayout,
    /// pidstat column header, first label rewritten to `Timestamp`
    pub header: Option<String>,
    chunks: HashMap<String, String>,
}

impl ChunkSet {
    pub fn len(&self) -> usize {
        self.chunks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.chunks.get(key).map(String::as_str)
    }

    /// Keys in presentation order. Lexicographic order is chronological
    /// because every key has the same fixed clock shape.
    pub fn sorted_keys(&self) -> Vec<&str> {
        let mut keys: Vec<&str> = self.chunks.keys().map(String::as_str).collect();
        keys.sort_unstable();
        keys
    }

    /// key -> escaped text, ordered by key.
    pub fn escaped(&self) -> BTreeMap<&str, String> {
        self.chunks.iter().map(|(k, v)| (k.as_str(), escape(v))).collect()
    }

    /// Object literal ready to embed in a report script.
    pub fn to_js_object(&self) -> String {
        let mut out = String::from("{\n");
        for key in self.sorted_keys() {
            let text = self.chunks.get(key).map(String::as_str).unwrap_or_default();
            out.push_str(&format!("    \"{}\": \"{}\",\n", escape(key), escape(text)));
        }
        out.push('}');
        out
    }
}

// ==================== Chunker ====================

pub struct Chunker {
    layout: ChunkLayout,
    header: Option<String>,
    current_key: Option<String>,
    buf: String,
    /// MarkerAfterData only: line held back until we know whether it is a key.
    prev_line: Option<String>,
    chunks: HashMap<String, String>,
}

impl Chunker {
    pub fn new(layout: ChunkLayout) -> Self {
        Chunker {
            layout,
            header: None,
            current_key: None,
            buf: String::new(),
            prev_line: None,
            chunks: HashMap::new(),
        }
    }

    pub fn push(&mut self, line: &str) {
        match self.layout {
            ChunkLayout::LeadingTimestamp => self.push_leading_timestamp(line),
            ChunkLayout::HeaderBeforeData => self.push_header_before_data(line),
            ChunkLayout::MarkerAfterData => self.push_marker_after_data(line),
            ChunkLayout::PrefixToken => self.push_prefix_token(line),
        }
    }

    fn push_leading_timestamp(&mut self, line: &str) {
        if line.contains("Linux") || line.trim().is_empty() {
            return;
        }
        if line.contains("UID") {
            if self.header.is_none() {
                let mut cols: Vec<&str> = line.split_whitespace().collect();
                if let Some(first) = cols.first_mut() {
                    *first = TIMESTAMP_COLUMN;
                }
                self.header = Some(cols.join(" "));
            }
            return;
        }
        match line.split_whitespace().next() {
            Some(first) if first.split(':').count() == 3 => self.open(first, line),
            _ => self.append(line),
        }
    }

    fn push_header_before_data(&mut self, line: &str) {
        match clock_prefix(line) {
            Some(key) => {
                if self.current_key.as_deref() != Some(key) {
                    self.seal();
                    self.current_key = Some(key.to_string());
                }
                self.append(line);
            }
            None => self.append(line),
        }
    }

    fn push_marker_after_data(&mut self, line: &str) {
        if line.contains(IOTOP_MARKER) {
            if let Some(prev) = self.prev_line.take() {
                self.seal();
                self.current_key = Some(prev.trim().to_string());
                self.prev_line = Some(line.to_string());
                return;
            }
        }
        if let Some(prev) = self.prev_line.replace(line.to_string()) {
            self.append(&prev);
        }
    }

    fn push_prefix_token(&mut self, line: &str) {
        if line.starts_with(TOP_PREFIX) {
            if let Some(key) = line.split(' ').nth(2).filter(|k| !k.is_empty()) {
                self.open(key, line);
                return;
            }
        }
        self.append(line);
    }

    /// Start a new block at a key line, or continue the current one when
    /// the key did not change.
    fn open(&mut self, key: &str, line: &str) {
        if self.current_key.as_deref() != Some(key) {
            self.seal();
            self.current_key = Some(key.to_string());
        }
        self.append(line);
    }

    /// Lines before the first key belong to no block.
    fn append(&mut self, line: &str) {
        if self.current_key.is_some() {
            self.buf.push_str(line);
            self.buf.push('\n');
        }
    }

    fn seal(&mut self) {
        if let Some(key) = self.current_key.take() {
            self.chunks.insert(key, self.buf.trim().to_string());
        }
        self.buf.clear();
    }

    pub fn finish(mut self) -> ChunkSet {
        if let Some(prev) = self.prev_line.take() {
            self.append(&prev);
        }
        self.seal();
        ChunkSet { layout: self.layout, header: self.header, chunks: self.chunks }
    }
}

/// `HH:MM:SS` prefix of a header-before-data key line: at least nine
/// characters after trimming and eight leading digits/colons.
fn clock_prefix(line: &str) -> Option<&str> {
    if line.trim().len() < 9 {
        return None;
    }
    let prefix = line.get(..8)?;
    let valid = prefix.bytes().all(|b| b.is_ascii_digit() || b == b':')
        && prefix.bytes().any(|b| b.is_ascii_digit());
    valid.then_some(prefix)
}

/// Chunk a whole snapshot log. The iotop layout is decided from its
/// first line. A log that yields no keyed snapshot is a file level error.
pub fn chunk<R: BufRead>(format: ChunkFormat, reader: R) -> Result<ChunkSet> {
    let mut chunker: Option<Chunker> = None;
    let mut lines = 0usize;
    for line in raw_lines(reader) {
        let line = line?;
        lines += 1;
        let chunker =
            chunker.get_or_insert_with(|| Chunker::new(format.layout_for(&line.text)));
        chunker.push(&line.text);
    }
    let layout = format.layout_for("");
    let set = chunker.unwrap_or_else(|| Chunker::new(layout)).finish();
    debug!(lines, chunks = set.len(), layout = ?set.layout, "chunked");
    if set.is_empty() {
        return Err(SourceError::NoRows { format: format.name(), skipped: lines });
    }
    Ok(set)
}

// ==================== Escaping ====================

/// Escape for embedding in a double-quoted script string literal.
/// Backslash first so later escapes are not doubled.
pub fn escape(text: &str) -> String {
    text.replace('\\', "\\\\")
        .replace('"', "\\\"")
        .replace('\n', "\\n")
        .replace('\t', "\\t")
}

/// Inverse of [`escape`].
pub fn unescape(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut chars = text.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('n') => out.push('\n'),
            Some('t') => out.push('\t'),
            Some(other) => out.push(other),
            None => out.push('\\'),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run(format: ChunkFormat, input: &str) -> ChunkSet {
        chunk(format, input.as_bytes()).unwrap()
    }

    const PIDSTAT: &str = "\
Linux 5.14.0 (web) 03/01/2025 _x86_64_ (4 CPU)

10:00:01 AM   UID       PID    %usr %system  %guest   %wait    %CPU   CPU  Command
10:00:02 AM     0        10   40.00    1.00    0.00    0.00   41.00     1  worker
10:00:02 AM     0        20   55.00    2.00    0.00    0.00   57.00     2  worker

10:00:02 AM   UID       PID    %usr %system  %guest   %wait    %CPU   CPU  Command
10:00:03 AM     0        10   10.00    1.00    0.00    0.00   11.00     1  worker
";

    #[test]
    fn test_pidstat_chunks() {
        let set = run(ChunkFormat::Pidstat, PIDSTAT);
        assert_eq!(set.layout, ChunkLayout::LeadingTimestamp);
        assert_eq!(set.sorted_keys(), vec!["10:00:02", "10:00:03"]);
        let first = set.get("10:00:02").unwrap();
        assert_eq!(first.lines().count(), 2);
        assert!(first.ends_with("worker"));
        assert!(set.header.as_deref().unwrap().starts_with("Timestamp AM UID"));
    }

    const TOP: &str = "\
top - 13:36:32 up 1 day,  2:03,  1 user,  load average: 0.10, 0.20, 0.30
Tasks: 200 total,   1 running

    PID USER      PR  NI    VIRT    RES    SHR S  %CPU  %MEM     TIME+ COMMAND
      1 root      20   0  170000  13000   8000 S   0.0   0.1   0:05.00 systemd

top - 13:36:35 up 1 day,  2:03,  1 user,  load average: 0.11, 0.20, 0.30
Tasks: 201 total,   2 running
";

    #[test]
    fn test_top_prefix_token() {
        let set = run(ChunkFormat::Top, TOP);
        assert_eq!(set.sorted_keys(), vec!["13:36:32", "13:36:35"]);
        let first = set.get("13:36:32").unwrap();
        assert!(first.starts_with("top - 13:36:32"));
        assert!(first.ends_with("systemd"));
        assert_eq!(set.get("13:36:35").unwrap().lines().count(), 2);
    }

    #[test]
    fn test_iotop_header_before_data() {
        let input = "\
noise before any sample
10:00:01 Total DISK READ:       0.00 B/s | Total DISK WRITE:       4.00 K/s
10:00:01 Actual DISK READ:      0.00 B/s | Actual DISK WRITE:      0.00 B/s
10:00:01   TID  PRIO  USER     DISK READ  DISK WRITE  SWAPIN      IO    COMMAND
10:00:02 Total DISK READ:       1.00 B/s | Total DISK WRITE:       0.00 K/s
short
";
        let set = run(ChunkFormat::Iotop, input);
        assert_eq!(set.layout, ChunkLayout::HeaderBeforeData);
        assert_eq!(set.sorted_keys(), vec!["10:00:01", "10:00:02"]);
        let first = set.get("10:00:01").unwrap();
        assert_eq!(first.lines().count(), 3);
        assert!(!first.contains("noise"));
        assert_eq!(set.get("10:00:02").unwrap().lines().last(), Some("short"));
    }

    #[test]
    fn test_iotop_marker_after_data() {
        let input = "\
Mon Mar  3 10:00:01 2025
Total DISK READ:       0.00 B/s | Total DISK WRITE:       4.00 K/s
  TID  PRIO  USER     DISK READ  DISK WRITE  SWAPIN      IO    COMMAND
  512 be/4 root        0.00 B/s    4.00 K/s  0.00 %  0.01 % [jbd2/sda1-8]
Mon Mar  3 10:00:02 2025
Total DISK READ:       2.00 B/s | Total DISK WRITE:       0.00 K/s
  TID  PRIO  USER     DISK READ  DISK WRITE  SWAPIN      IO    COMMAND
";
        let set = run(ChunkFormat::Iotop, input);
        assert_eq!(set.layout, ChunkLayout::MarkerAfterData);
        assert_eq!(set.len(), 2);
        let first = set.get("Mon Mar  3 10:00:01 2025").unwrap();
        assert!(first.starts_with("Total DISK READ"));
        assert!(first.ends_with("[jbd2/sda1-8]"));
        assert!(!first.contains("10:00:02"));
        let last = set.get("Mon Mar  3 10:00:02 2025").unwrap();
        assert_eq!(last.lines().count(), 2);
        assert!(last.trim_end().ends_with("COMMAND"));
    }

    #[test]
    fn test_recurring_key_last_write_wins() {
        let input = "10:00:01 a\n10:00:02 b\n10:00:01 c\n";
        let set = run(ChunkFormat::Iotop, input);
        assert_eq!(set.len(), 2);
        assert_eq!(set.get("10:00:01"), Some("10:00:01 c"));
    }

    #[test]
    fn test_escape_round_trip() {
        let text = "a \"quoted\"\tpath C:\\tmp\nnext line \\n literal";
        let escaped = escape(text);
        assert!(!escaped.contains('\n'));
        assert!(!escaped.contains('\t'));
        assert_eq!(unescape(&escaped), text);
    }

    #[test]
    fn test_js_object_is_sorted() {
        let set = run(ChunkFormat::Top, TOP);
        let js = set.to_js_object();
        let a = js.find("\"13:36:32\"").unwrap();
        let b = js.find("\"13:36:35\"").unwrap();
        assert!(a < b);
        assert!(js.starts_with("{\n") && js.ends_with('}'));
        for (key, escaped) in set.escaped() {
            assert_eq!(unescape(&escaped), set.get(key).unwrap());
        }
    }

    #[test]
    fn test_empty_input() {
        let err = chunk(ChunkFormat::Pidstat, "".as_bytes()).unwrap_err();
        assert!(matches!(err, SourceError::NoRows { format: "pidstat", skipped: 0 }));
    }

    #[test]
    fn test_no_keyed_lines_is_file_level() {
        let banner = "Linux 5.14.0 (web) 03/01/2025 _x86_64_ (4 CPU)\n\n";
        let err = chunk(ChunkFormat::Pidstat, banner.as_bytes()).unwrap_err();
        assert!(matches!(err, SourceError::NoRows { format: "pidstat", skipped: 2 }));

        let garbage = "not a top snapshot\nneither is this\n";
        let err = chunk(ChunkFormat::Top, garbage.as_bytes()).unwrap_err();
        assert!(matches!(err, SourceError::NoRows { format: "top", .. }));
    }
}
