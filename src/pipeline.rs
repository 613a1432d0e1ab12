/*!
 * perfstats_digest: Source Pipelines
 * ----------------------------------
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
 *  Every output section is one `Source`. Each source opens its own
 *  input file and runs its own pipeline on a worker pool; a failure is
 *  recorded against that source only and the run carries on.
 */

use std::fs::File;
use std::io::{BufReader, ErrorKind};
use std::path::PathBuf;

use rayon::iter::{IntoParallelRefIterator, ParallelIterator};
use serde::Serialize;
use tracing::{info, info_span, warn};

use crate::chunk::{self, ChunkFormat, ChunkSet};
use crate::classify::TabularFormat;
use crate::config::DigestConfig;
use crate::counters::{self, DiskRates};
use crate::error::{Result, SourceError};
use crate::extract::{self, Table};
use crate::rank::{self, ProcessFormat, Ranking};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Source {
    Cpu,
    DiskPerDevice,
    DiskPerMetric,
    DiskHighRes,
    Memory,
    Network,
    PidstatCpu,
    PidstatIo,
    PidstatMemory,
    Top,
    Iotop,
    TopCpu,
    TopIo,
    TopMemory,
}

/// What a source's pipeline does with its file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Table(TabularFormat),
    Rates,
    Chunks(ChunkFormat),
    Ranking(ProcessFormat),
}

impl Source {
    pub const ALL: [Source; 14] = [
        Source::Cpu,
        Source::DiskPerDevice,
        Source::DiskPerMetric,
        Source::DiskHighRes,
        Source::Memory,
        Source::Network,
        Source::PidstatCpu,
        Source::PidstatIo,
        Source::PidstatMemory,
        Source::Top,
        Source::Iotop,
        Source::TopCpu,
        Source::TopIo,
        Source::TopMemory,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Source::Cpu => "cpu",
            Source::DiskPerDevice => "disk_per_device",
            Source::DiskPerMetric => "disk_per_metric",
            Source::DiskHighRes => "disk_highres",
            Source::Memory => "memory",
            Source::Network => "network",
            Source::PidstatCpu => "pidstat_cpu",
            Source::PidstatIo => "pidstat_io",
            Source::PidstatMemory => "pidstat_memory",
            Source::Top => "top",
            Source::Iotop => "iotop",
            Source::TopCpu => "top_cpu",
            Source::TopIo => "top_io",
            Source::TopMemory => "top_memory",
        }
    }

    pub fn file_name(self, config: &DigestConfig) -> &str {
        let files = &config.files;
        match self {
            Source::Cpu => &files.mpstat,
            Source::DiskPerDevice | Source::DiskPerMetric => &files.iostat,
            Source::DiskHighRes => &files.diskstats,
            Source::Memory => &files.vmstat,
            Source::Network => &files.sar_network,
            Source::PidstatCpu | Source::TopCpu => &files.pidstat,
            Source::PidstatIo | Source::TopIo => &files.pidstat_io,
            Source::PidstatMemory | Source::TopMemory => &files.pidstat_memory,
            Source::Top => &files.top,
            Source::Iotop => &files.iotop,
        }
    }

    /// The collector only writes these when the host supports them.
    pub fn optional(self) -> bool {
        matches!(self, Source::DiskHighRes | Source::Network)
    }

    pub fn stage(self) -> Stage {
        match self {
            Source::Cpu => Stage::Table(TabularFormat::Cpu),
            Source::DiskPerDevice | Source::DiskPerMetric => Stage::Table(TabularFormat::Disk),
            Source::Memory => Stage::Table(TabularFormat::Memory),
            Source::Network => Stage::Table(TabularFormat::Network),
            Source::DiskHighRes => Stage::Rates,
            Source::PidstatCpu | Source::PidstatIo | Source::PidstatMemory => {
                Stage::Chunks(ChunkFormat::Pidstat)
            }
            Source::Top => Stage::Chunks(ChunkFormat::Top),
            Source::Iotop => Stage::Chunks(ChunkFormat::Iotop),
            Source::TopCpu => Stage::Ranking(ProcessFormat::Cpu),
            Source::TopIo => Stage::Ranking(ProcessFormat::Io),
            Source::TopMemory => Stage::Ranking(ProcessFormat::Memory),
        }
    }
}

#[derive(Debug, Clone)]
pub enum SourceOutput {
    Table(Table),
    Rates(DiskRates),
    Chunks(ChunkSet),
    Ranking(Ranking),
}

impl SourceOutput {
    /// Headline count for logs and the run summary.
    pub fn count(&self) -> usize {
        match self {
            SourceOutput::Table(t) => t.rows.len(),
            SourceOutput::Rates(r) => r.devices.len(),
            SourceOutput::Chunks(c) => c.len(),
            SourceOutput::Ranking(r) => r.commands,
        }
    }

    pub fn skipped(&self) -> usize {
        match self {
            SourceOutput::Table(t) => t.skipped,
            SourceOutput::Rates(r) => r.skipped,
            SourceOutput::Chunks(_) => 0,
            SourceOutput::Ranking(r) => r.skipped,
        }
    }
}

#[derive(Debug)]
pub struct SourceResult {
    pub source: Source,
    pub path: PathBuf,
    pub output: Result<SourceOutput>,
}

/// Open an input, turning the usual failures into file level errors.
pub fn open_input(path: PathBuf) -> Result<BufReader<File>> {
    let meta = match std::fs::metadata(&path) {
        Ok(meta) => meta,
        Err(e) if e.kind() == ErrorKind::NotFound => return Err(SourceError::Missing(path)),
        Err(source) => return Err(SourceError::Unreadable { path, source }),
    };
    if meta.len() == 0 {
        return Err(SourceError::Empty(path));
    }
    match File::open(&path) {
        Ok(file) => Ok(BufReader::new(file)),
        Err(source) => Err(SourceError::Unreadable { path, source }),
    }
}

/// Run one source start to finish.
pub fn run_source(source: Source, config: &DigestConfig) -> SourceResult {
    let path = config.path_of(source.file_name(config));
    let span = info_span!("source", name = source.name());
    let _enter = span.enter();

    info!(path = %path.display(), "processing");
    let output = open_input(path.clone()).and_then(|reader| match source.stage() {
        Stage::Table(format) => extract::read_table(format, reader).map(SourceOutput::Table),
        Stage::Rates => counters::derive(reader, config.resample_ms).map(SourceOutput::Rates),
        Stage::Chunks(format) => chunk::chunk(format, reader).map(SourceOutput::Chunks),
        Stage::Ranking(format) => {
            rank::rank(format, reader, config.top_n).map(SourceOutput::Ranking)
        }
    });

    match &output {
        Ok(out) => info!(count = out.count(), skipped = out.skipped(), "done"),
        Err(SourceError::Missing(_)) if source.optional() => {
            info!("optional input not present, section unavailable")
        }
        Err(e) => warn!("section unavailable: {e}"),
    }
    SourceResult { source, path, output }
}

/// Run every source on a pool of `config.jobs` workers. Results come back
/// in `Source::ALL` order whatever order they finish in.
pub fn run_all(config: &DigestConfig) -> Vec<SourceResult> {
    run_sources(&Source::ALL, config)
}

pub fn run_sources(sources: &[Source], config: &DigestConfig) -> Vec<SourceResult> {
    let work = || -> Vec<SourceResult> {
        sources.par_iter().map(|&source| run_source(source, config)).collect()
    };
    match rayon::ThreadPoolBuilder::new().num_threads(config.jobs.max(1)).build() {
        Ok(pool) => pool.install(work),
        Err(e) => {
            warn!("cannot build worker pool, using the global pool: {e}");
            work()
        }
    }
}
