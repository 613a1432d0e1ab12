/*!
 * perfstats_digest: Tabular Extractor
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
 *  Turns classified sampler lines into a table: one shared column
 *  schema per file, one row per (timestamp, key). Cells are kept as
 *  text and only parsed when a consumer asks for a number, because
 *  mpstat mixes the literal key "all" with numeric CPU ids.
 *
 *  Rows with the wrong token count or a bad timestamp are skipped and
 *  counted. A repeated (timestamp, key) replaces the earlier row.
 */

use std::collections::HashMap;
use std::io::BufRead;

use serde::Serialize;
use tracing::{debug, trace};

use crate::classify::{Classified, LineClass, LineClassifier, TabularFormat};
use crate::error::{Result, RowError, SourceError};
use crate::lines::{RawLine, raw_lines};
use crate::timestamp::Timestamp;

// ==================== Rows ====================

/// Typed view of one cell.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Value {
    Integer(i64),
    Float(f64),
    Text(String),
}

impl Value {
    pub fn infer(token: &str) -> Value {
        if let Ok(i) = token.parse::<i64>() {
            Value::Integer(i)
        } else if let Ok(f) = token.parse::<f64>() {
            Value::Float(f)
        } else {
            Value::Text(token.to_string())
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Integer(i) => Some(*i as f64),
            Value::Float(f) => Some(*f),
            Value::Text(_) => None,
        }
    }
}

/// One accepted sample line. `cells` is as wide as the table schema,
/// cell 0 being the raw timestamp token.
#[derive(Debug, Clone, PartialEq)]
pub struct Row {
    pub line: usize,
    pub timestamp: Timestamp,
    pub key: Option<String>,
    pub cells: Vec<String>,
}

impl Row {
    pub fn cell(&self, idx: usize) -> Option<&str> {
        self.cells.get(idx).map(String::as_str)
    }

    pub fn value(&self, idx: usize) -> Option<Value> {
        self.cell(idx).map(Value::infer)
    }

    pub fn float(&self, idx: usize) -> Option<f64> {
        self.cell(idx)?.parse().ok()
    }
}

// ==================== Table ====================

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Point {
    pub timestamp: Timestamp,
    pub value: f64,
}

/// All metric series of one key (device, CPU, interface).
#[derive(Debug, Clone, Serialize)]
pub struct KeyView {
    pub key: Option<String>,
    pub metrics: Vec<NamedSeries>,
}

/// One metric across every key.
#[derive(Debug, Clone, Serialize)]
pub struct MetricView {
    pub metric: String,
    pub series: Vec<NamedSeries>,
}

#[derive(Debug, Clone, Serialize)]
pub struct NamedSeries {
    pub name: Option<String>,
    pub points: Vec<Point>,
}

#[derive(Debug, Clone)]
pub struct Table {
    pub format: TabularFormat,
    pub schema: Vec<String>,
    pub rows: Vec<Row>,
    pub skipped: usize,
}

impl Table {
    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.schema.iter().position(|c| c == name)
    }

    /// Index of the first numeric column (after timestamp and key).
    fn first_metric(&self) -> usize {
        if self.format.has_key() { 2 } else { 1 }
    }

    pub fn metric_columns(&self) -> &[String] {
        self.schema.get(self.first_metric()..).unwrap_or(&[])
    }

    /// Distinct keys. mpstat order is `all` then CPU ids ascending,
    /// every other format keeps first appearance.
    pub fn keys(&self) -> Vec<&str> {
        let mut keys: Vec<&str> = Vec::new();
        for key in self.rows.iter().filter_map(|r| r.key.as_deref()) {
            if !keys.contains(&key) {
                keys.push(key);
            }
        }
        if self.format == TabularFormat::Cpu {
            keys.sort_by_key(|k| match *k {
                "all" => (0, 0),
                id => id.parse::<u32>().map_or((2, 0), |n| (1, n)),
            });
        }
        keys
    }

    /// Numeric series of `column` for one key; cells that do not parse
    /// as numbers are left out.
    pub fn series(&self, column: usize, key: Option<&str>) -> Vec<Point> {
        self.rows
            .iter()
            .filter(|r| key.is_none() || r.key.as_deref() == key)
            .filter_map(|r| r.float(column).map(|value| Point { timestamp: r.timestamp, value }))
            .collect()
    }

    fn key_slots(&self) -> Vec<Option<&str>> {
        if self.format.has_key() {
            self.keys().into_iter().map(Some).collect()
        } else {
            vec![None]
        }
    }

    /// Per-key view: key -> metric -> series.
    pub fn pivot_by_key(&self) -> Vec<KeyView> {
        let first = self.first_metric();
        self.key_slots()
            .into_iter()
            .map(|key| KeyView {
                key: key.map(str::to_string),
                metrics: self
                    .metric_columns()
                    .iter()
                    .enumerate()
                    .map(|(i, name)| NamedSeries {
                        name: Some(name.clone()),
                        points: self.series(first + i, key),
                    })
                    .collect(),
            })
            .collect()
    }

    /// Per-metric view: metric -> key -> series.
    pub fn pivot_by_metric(&self) -> Vec<MetricView> {
        let first = self.first_metric();
        let slots = self.key_slots();
        self.metric_columns()
            .iter()
            .enumerate()
            .map(|(i, metric)| MetricView {
                metric: metric.clone(),
                series: slots
                    .iter()
                    .map(|key| NamedSeries {
                        name: key.map(str::to_string),
                        points: self.series(first + i, *key),
                    })
                    .collect(),
            })
            .collect()
    }
}

// ==================== Extractor ====================

pub struct TabularExtractor {
    format: TabularFormat,
    schema: Vec<String>,
    rows: Vec<Row>,
    index: HashMap<(Timestamp, Option<String>), usize>,
    skipped: usize,
}

impl TabularExtractor {
    pub fn new(format: TabularFormat, schema: Vec<String>) -> Self {
        TabularExtractor { format, schema, rows: Vec::new(), index: HashMap::new(), skipped: 0 }
    }

    pub fn push(&mut self, line: &RawLine) -> std::result::Result<(), RowError> {
        let result = self.parse(line);
        match result {
            Ok(row) => {
                let slot = (row.timestamp, row.key.clone());
                match self.index.get(&slot) {
                    Some(&at) => self.rows[at] = row,
                    None => {
                        self.index.insert(slot, self.rows.len());
                        self.rows.push(row);
                    }
                }
                Ok(())
            }
            Err(e) => {
                trace!(line = line.number, "skipping {} row: {e}", self.format.name());
                self.skipped += 1;
                Err(e)
            }
        }
    }

    fn parse(&self, line: &RawLine) -> std::result::Result<Row, RowError> {
        let cells: Vec<String> = line.text.split_whitespace().map(str::to_string).collect();
        if cells.len() != self.schema.len() {
            return Err(RowError::TokenCount { expected: self.schema.len(), got: cells.len() });
        }
        let timestamp = self
            .format
            .timestamp_format()
            .parse(&cells[0])
            .ok_or_else(|| RowError::Timestamp(cells[0].clone()))?;
        let key = if self.format.has_key() { cells.get(1).cloned() } else { None };
        Ok(Row { line: line.number, timestamp, key, cells })
    }

    pub fn finish(self) -> Result<Table> {
        if self.rows.is_empty() {
            return Err(SourceError::NoRows { format: self.format.name(), skipped: self.skipped });
        }
        debug!(
            rows = self.rows.len(),
            skipped = self.skipped,
            "{} table extracted",
            self.format.name()
        );
        Ok(Table { format: self.format, schema: self.schema, rows: self.rows, skipped: self.skipped })
    }
}

/// Classify and extract in one pass over a reader. Data lines seen
/// before the header have no schema and are dropped.
pub fn read_table<R: BufRead>(format: TabularFormat, reader: R) -> Result<Table> {
    let mut classifier = LineClassifier::new(format);
    let mut extractor: Option<TabularExtractor> = None;
    let mut orphans = 0usize;

    for line in raw_lines(reader) {
        let line = line?;
        match classifier.classify(&line.text) {
            LineClass::Header(header) => {
                debug!(line = line.number, columns = header.len(), "{} header", format.name());
                extractor = Some(TabularExtractor::new(format, header));
            }
            LineClass::Data(text) => match extractor.as_mut() {
                Some(extractor) => {
                    let _ = extractor.push(&RawLine { number: line.number, text });
                }
                None => orphans += 1,
            },
            LineClass::Noise => {}
        }
    }
    if orphans > 0 {
        debug!(orphans, "{} data lines before header dropped", format.name());
    }
    extractor.ok_or(SourceError::NoHeader { format: format.name() })?.finish()
}

/// Build the table for one classified file.
pub fn extract(classified: Classified) -> Result<Table> {
    let mut extractor = TabularExtractor::new(classified.format, classified.header);
    for line in &classified.lines {
        // row-level failures are counted inside the extractor
        let _ = extractor.push(line);
    }
    extractor.finish()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classify::classify;

    const MPSTAT: &str = "\
Linux 5.4.0 (db01) 03/01/2025 _x86_64_ (2 CPU)

10:00:01 AM  CPU    %usr   %sys
10:00:02 AM    1    3.00   1.00
10:00:02 AM  all    2.00   1.00
10:00:02 AM    0    1.00   1.00
10:00:03 AM  all    4.00   2.00
10:00:03 AM  all    9.00   9.00 extra
10:00:03 AM    0    5.00   0.50
10:00:03 AM    1    3.00   3.50
";

    fn cpu_table() -> Table {
        extract(classify(TabularFormat::Cpu, MPSTAT.as_bytes()).unwrap()).unwrap()
    }

    #[test]
    fn test_rows_match_schema_width() {
        let table = cpu_table();
        assert_eq!(table.schema.len(), 4);
        assert_eq!(table.rows.len(), 6);
        assert_eq!(table.skipped, 1);
        assert!(table.rows.iter().all(|r| r.cells.len() == table.schema.len()));
    }

    #[test]
    fn test_cpu_key_order_and_series() {
        let table = cpu_table();
        assert_eq!(table.keys(), vec!["all", "0", "1"]);
        let usr = table.column_index("%usr").unwrap();
        let all: Vec<f64> = table.series(usr, Some("all")).iter().map(|p| p.value).collect();
        assert_eq!(all, vec![2.0, 4.0]);
        assert_eq!(table.rows[1].value(1), Some(Value::Text("all".into())));
        assert_eq!(table.rows[0].value(1), Some(Value::Integer(1)));
    }

    #[test]
    fn test_last_write_wins_on_repeated_key() {
        let table = extract(
            classify(
                TabularFormat::Cpu,
                "10:00:01 CPU %usr\n10:00:02 all 1.0\n10:00:02 all 7.5\n".as_bytes(),
            )
            .unwrap(),
        )
        .unwrap();
        assert_eq!(table.rows.len(), 1);
        assert_eq!(table.rows[0].float(2), Some(7.5));
        assert_eq!(table.rows[0].line, 3);
    }

    #[test]
    fn test_bad_timestamp_is_row_level() {
        let input = "\
 r  b   swpd   free
2025-03-01-10:00:00 1 0 0 100
garbage 1 0 0 100
2025-03-01-10:00:01 1 0 0 90
";
        let table = extract(classify(TabularFormat::Memory, input.as_bytes()).unwrap()).unwrap();
        assert_eq!(table.rows.len(), 2);
        assert_eq!(table.skipped, 1);
        assert!(table.rows.iter().all(|r| r.key.is_none()));
        let free = table.column_index("free").unwrap();
        assert_eq!(table.series(free, None).len(), 2);
    }

    #[test]
    fn test_all_rows_rejected_is_file_level() {
        let err = extract(
            classify(TabularFormat::Network, "10:00:00 IFACE rxpck/s\nAverage: eth0 1.0\n".as_bytes())
                .unwrap(),
        )
        .unwrap_err();
        assert!(matches!(err, SourceError::NoRows { format: "network", skipped: 1 }));
    }

    #[test]
    fn test_streaming_matches_two_pass() {
        let streamed = read_table(TabularFormat::Cpu, MPSTAT.as_bytes()).unwrap();
        let two_pass = cpu_table();
        assert_eq!(streamed.schema, two_pass.schema);
        assert_eq!(streamed.rows, two_pass.rows);
        assert_eq!(streamed.skipped, two_pass.skipped);

        let err = read_table(TabularFormat::Disk, "sda 1 2 3\n".as_bytes()).unwrap_err();
        assert!(matches!(err, SourceError::NoHeader { format: "disk" }));
    }

    #[test]
    fn test_pivots() {
        let table = cpu_table();
        let by_key = table.pivot_by_key();
        assert_eq!(by_key.len(), 3);
        assert_eq!(by_key[0].key.as_deref(), Some("all"));
        assert_eq!(by_key[0].metrics.len(), 2);

        let by_metric = table.pivot_by_metric();
        assert_eq!(by_metric.len(), 2);
        assert_eq!(by_metric[1].metric, "%sys");
        let cpu1 = &by_metric[1].series[2];
        assert_eq!(cpu1.name.as_deref(), Some("1"));
        assert_eq!(cpu1.points.iter().map(|p| p.value).collect::<Vec<_>>(), vec![1.0, 3.5]);
    }
}
