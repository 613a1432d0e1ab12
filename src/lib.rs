/*!
 * perfstats_digest: Library Root
 * ------------------------------
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
 *  Parses the text logs of a collector run (mpstat, iostat, vmstat,
 *  sar, the high resolution diskstats log, pidstat, top, iotop) into
 *  tables, timestamp chunks, disk rate series and top-N process rankings.
 *
 *  Every input file is handled by its own pipeline, see [`pipeline`].
 */

pub mod chunk;
pub mod classify;
pub mod config;
pub mod counters;
pub mod error;
pub mod export;
pub mod extract;
pub mod lines;
pub mod logging;
pub mod pipeline;
pub mod rank;
pub mod timestamp;

pub use config::DigestConfig;
pub use error::{RowError, SourceError};
pub use pipeline::{Source, SourceOutput, SourceResult, run_all, run_source};
