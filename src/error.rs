/*!
 * perfstats_digest: Error Types
 * -----------------------------
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
 *  Error types.
 *
 *  `SourceError` aborts one source's pipeline and nothing else.
 *  `RowError` never leaves a parser: the row is skipped and counted.
 */

use std::path::PathBuf;

use thiserror::Error;

pub type Result<T> = std::result::Result<T, SourceError>;

#[derive(Error, Debug)]
pub enum SourceError {
    #[error("input file not found: {0}")]
    Missing(PathBuf),

    #[error("cannot read input file {path}: {source}")]
    Unreadable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("input file is empty: {0}")]
    Empty(PathBuf),

    #[error("no {format} header line found")]
    NoHeader { format: &'static str },

    #[error("every {format} row was rejected ({skipped} skipped)")]
    NoRows { format: &'static str, skipped: usize },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum RowError {
    #[error("expected {expected} tokens, got {got}")]
    TokenCount { expected: usize, got: usize },

    #[error("unparsable timestamp {0:?}")]
    Timestamp(String),

    #[error("unparsable number {0:?}")]
    Number(String),

    #[error("line has {got} fields, need at least {need}")]
    TooShort { need: usize, got: usize },
}
