/*!
 * perfstats_digest: Output Writer
 * -------------------------------
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
 *  Writes the structured results of a run into one output directory:
 *  - <source>.csv            tables, one row per sample
 *  - <source>.json           disk pivots, rates, chunks, rankings
 *  - <source>.js             chunk object literal (escaped text)
 *  - topN_<source>_<m>.txt   fixed width ranking tables
 *  - summary.json            status of every source
 *
 *  Nothing here depends on hash map order or wall clock time, so the
 *  same input always gives the same bytes.
 */

use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::{self, BufWriter, Write};
use std::path::Path;

use serde::Serialize;
use tracing::info;

use crate::chunk::{ChunkLayout, ChunkSet};
use crate::extract::Table;
use crate::pipeline::{Source, SourceOutput, SourceResult};
use crate::rank::Ranking;

pub const SUMMARY_FILE: &str = "summary.json";

// ==================== Summary ====================

#[derive(Debug, Serialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum Status {
    Ok { count: usize, skipped: usize },
    Unavailable { reason: String },
}

#[derive(Debug, Serialize)]
pub struct SummaryEntry {
    pub source: Source,
    pub file: String,
    #[serde(flatten)]
    pub status: Status,
    pub outputs: Vec<String>,
}

/// Per source status, in run order.
pub fn summarize(results: &[SourceResult], written: &[Vec<String>]) -> Vec<SummaryEntry> {
    results
        .iter()
        .zip(written)
        .map(|(r, outputs)| SummaryEntry {
            source: r.source,
            file: r
                .path
                .file_name()
                .map(|f| f.to_string_lossy().into_owned())
                .unwrap_or_default(),
            status: match &r.output {
                Ok(out) => Status::Ok { count: out.count(), skipped: out.skipped() },
                Err(e) => Status::Unavailable { reason: e.to_string() },
            },
            outputs: outputs.clone(),
        })
        .collect()
}

// ==================== Writers ====================

#[derive(Serialize)]
struct ChunkExport<'a> {
    layout: ChunkLayout,
    header: Option<&'a str>,
    keys: Vec<&'a str>,
    chunks: BTreeMap<&'a str, &'a str>,
}

fn write_json<T: Serialize>(path: &Path, value: &T) -> io::Result<()> {
    let mut out = BufWriter::new(File::create(path)?);
    serde_json::to_writer_pretty(&mut out, value)?;
    writeln!(out)?;
    out.flush()
}

fn write_csv(path: &Path, table: &Table) -> io::Result<()> {
    let mut wtr = csv::Writer::from_path(path)?;
    wtr.write_record(&table.schema)?;
    for row in &table.rows {
        wtr.write_record(&row.cells)?;
    }
    wtr.flush()
}

fn write_chunks(dir: &Path, name: &str, set: &ChunkSet) -> io::Result<Vec<String>> {
    let keys = set.sorted_keys();
    let export = ChunkExport {
        layout: set.layout,
        header: set.header.as_deref(),
        chunks: keys.iter().map(|k| (*k, set.get(k).unwrap_or_default())).collect(),
        keys,
    };
    let json = format!("{name}.json");
    write_json(&dir.join(&json), &export)?;

    let js = format!("{name}.js");
    let mut f = File::create(dir.join(&js))?;
    writeln!(f, "const {name}_chunks = {};", set.to_js_object())?;
    Ok(vec![json, js])
}

/// `%CPU` -> `CPU`, `kB_rd/s` -> `kB_rd_s`
fn file_safe(metric: &str) -> String {
    let mapped: String = metric
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '_' { c } else { '_' })
        .collect();
    mapped.trim_matches('_').to_string()
}

fn write_ranking(dir: &Path, name: &str, ranking: &Ranking) -> io::Result<Vec<String>> {
    let json = format!("{name}.json");
    write_json(&dir.join(&json), ranking)?;
    let mut files = vec![json];
    for metric in &ranking.metrics {
        let fname = format!("top{}_{}_{}.txt", ranking.top_n, name, file_safe(&metric.metric));
        fs::write(dir.join(&fname), metric.to_text(&fname))?;
        files.push(fname);
    }
    Ok(files)
}

/// Write one source's output files, returning their names.
pub fn write_source(dir: &Path, result: &SourceResult) -> io::Result<Vec<String>> {
    let name = result.source.name();
    let Ok(output) = &result.output else {
        return Ok(Vec::new());
    };
    let files = match output {
        SourceOutput::Table(table) => {
            let csv = format!("{name}.csv");
            write_csv(&dir.join(&csv), table)?;
            let mut files = vec![csv];
            let json = format!("{name}.json");
            match result.source {
                Source::DiskPerDevice => write_json(&dir.join(&json), &table.pivot_by_key())?,
                Source::DiskPerMetric => write_json(&dir.join(&json), &table.pivot_by_metric())?,
                _ => return Ok(files),
            }
            files.push(json);
            files
        }
        SourceOutput::Rates(rates) => {
            let json = format!("{name}.json");
            write_json(&dir.join(&json), rates)?;
            vec![json]
        }
        SourceOutput::Chunks(set) => write_chunks(dir, name, set)?,
        SourceOutput::Ranking(ranking) => write_ranking(dir, name, ranking)?,
    };
    Ok(files)
}

/// Write every result plus `summary.json` into `dir` (created if needed).
pub fn write_all(dir: &Path, results: &[SourceResult]) -> io::Result<Vec<SummaryEntry>> {
    fs::create_dir_all(dir)?;
    let mut written = Vec::with_capacity(results.len());
    for result in results {
        let files = write_source(dir, result)?;
        if !files.is_empty() {
            info!(source = result.source.name(), files = files.len(), "written");
        }
        written.push(files);
    }
    let summary = summarize(results, &written);
    write_json(&dir.join(SUMMARY_FILE), &summary)?;
    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_file_safe_metric_names() {
        assert_eq!(file_safe("%CPU"), "CPU");
        assert_eq!(file_safe("kB_rd/s"), "kB_rd_s");
        assert_eq!(file_safe("%MEM"), "MEM");
    }

    #[test]
    fn test_summary_status_shape() {
        let entry = SummaryEntry {
            source: Source::Network,
            file: "sarnetwork.txt".into(),
            status: Status::Unavailable { reason: "input file not found".into() },
            outputs: Vec::new(),
        };
        let json = serde_json::to_value(&entry).unwrap();
        assert_eq!(json["status"], "unavailable");
        assert_eq!(json["source"], "network");
        assert_eq!(json["reason"], "input file not found");
    }
}
