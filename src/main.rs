// perfstats_digest - Linux sampler output digester (Main Entry)
// Copyright (C) 2025 Laurence Oberman
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License
// along with this program.  If not, see <https://www.gnu.org/licenses/>.

/*!
    # main.rs

    Command line frontend:
      perfstats_digest <INPUT_DIR> [-o DIR] [-n TOP] [-j JOBS]
                       [--resample-ms MS] [-v|-d|-q]

    Reads the collector's output files from INPUT_DIR, writes tables,
    chunks, rate series and rankings to the output directory and prints
    one status line per section.
*/

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;

use perfstats_digest::config::{DEFAULT_RESAMPLE_MS, DEFAULT_TOP_N, default_jobs};
use perfstats_digest::export::{self, Status};
use perfstats_digest::logging::{self, LogLevel, LogLevelOpt};
use perfstats_digest::{DigestConfig, run_all};

#[derive(Parser, Debug)]
#[command(version, about = "Digest Linux sampler logs into tables, chunks, rates and rankings")]
struct Cli {
    /// Directory holding mpstat.txt, iostat-data.out, pidstat.txt, ...
    input_dir: PathBuf,

    /// Output directory [default: <INPUT_DIR>/digest]
    #[clap(short, long)]
    output: Option<PathBuf>,

    /// Commands kept per ranked metric
    #[clap(short = 'n', long, default_value_t = DEFAULT_TOP_N)]
    top: usize,

    /// Worker threads [default: available cores]
    #[clap(short, long)]
    jobs: Option<usize>,

    /// Bucket width of the resampled disk rates, in milliseconds
    #[clap(long, default_value_t = DEFAULT_RESAMPLE_MS)]
    resample_ms: u64,

    #[clap(flatten)]
    log: LogLevelOpt,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let level = LogLevel::try_from(cli.log)?;
    logging::init(level);

    let output = cli.output.clone().unwrap_or_else(|| cli.input_dir.join("digest"));
    let config = DigestConfig {
        top_n: cli.top,
        resample_ms: cli.resample_ms,
        jobs: cli.jobs.unwrap_or_else(default_jobs),
        ..DigestConfig::new(cli.input_dir)
    };

    let results = run_all(&config);
    let summary = export::write_all(&output, &results)
        .with_context(|| format!("writing results to {}", output.display()))?;

    for entry in summary {
        match entry.status {
            Status::Ok { count, skipped } => println!(
                "{:<18} {:<12} {:>8} items {:>6} skipped",
                entry.source.name(),
                "ok",
                count,
                skipped
            ),
            Status::Unavailable { reason } => {
                println!("{:<18} {:<12} {}", entry.source.name(), "unavailable", reason)
            }
        }
    }
    if level != LogLevel::Quiet {
        println!("Digest complete. See {}/ for results.", output.display());
    }
    Ok(())
}
