/*!
 * perfstats_digest: Run Configuration
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
 *  Run configuration, passed by reference into every source pipeline.
 */

use std::path::{Path, PathBuf};

pub const DEFAULT_TOP_N: usize = 10;
pub const DEFAULT_RESAMPLE_MS: u64 = 1000;

/// Input file name per sampler, as written by the collector script.
#[derive(Debug, Clone)]
pub struct SourceFiles {
    pub mpstat: String,
    pub iostat: String,
    pub diskstats: String,
    pub vmstat: String,
    pub sar_network: String,
    pub pidstat: String,
    pub pidstat_io: String,
    pub pidstat_memory: String,
    pub top: String,
    pub iotop: String,
}

impl Default for SourceFiles {
    fn default() -> Self {
        SourceFiles {
            mpstat: "mpstat.txt".into(),
            iostat: "iostat-data.out".into(),
            diskstats: "diskstats_log.txt".into(),
            vmstat: "vmstat-data.out".into(),
            sar_network: "sarnetwork.txt".into(),
            pidstat: "pidstat.txt".into(),
            pidstat_io: "pidstat-io.txt".into(),
            pidstat_memory: "pidstat-memory.txt".into(),
            top: "top.txt".into(),
            iotop: "iotop.txt".into(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct DigestConfig {
    pub input_dir: PathBuf,
    pub files: SourceFiles,
    /// Commands kept per ranked metric
    pub top_n: usize,
    /// Bucket width for the resampled disk rates
    pub resample_ms: u64,
    /// Worker threads, one source file per task
    pub jobs: usize,
}

impl Default for DigestConfig {
    fn default() -> Self {
        DigestConfig {
            input_dir: PathBuf::from("."),
            files: SourceFiles::default(),
            top_n: DEFAULT_TOP_N,
            resample_ms: DEFAULT_RESAMPLE_MS,
            jobs: default_jobs(),
        }
    }
}

impl DigestConfig {
    pub fn new(input_dir: impl Into<PathBuf>) -> Self {
        DigestConfig { input_dir: input_dir.into(), ..Default::default() }
    }

    pub fn path_of(&self, file_name: &str) -> PathBuf {
        self.input_dir.join(file_name)
    }

    pub fn input_dir(&self) -> &Path {
        &self.input_dir
    }
}

pub fn default_jobs() -> usize {
    std::thread::available_parallelism().map(|n| n.get()).unwrap_or(1)
}
