/*!
 * perfstats_digest: Logging
 * -------------------------
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
 *  Log level selection and subscriber setup.
 */

use anyhow::{Result, bail};
use clap::Args;
use tracing::Level;

#[derive(Debug, Clone, Copy, Args)]
pub struct LogLevelOpt {
    /// Show what is being done
    #[clap(short, long)]
    verbose: bool,

    /// Show information that helps debug this program (implies
    /// `--verbose`)
    #[clap(short, long)]
    debug: bool,

    /// Only report errors. Conflicts with `--verbose` and `--debug`.
    #[clap(short, long)]
    quiet: bool,
}

impl TryFrom<LogLevelOpt> for LogLevel {
    type Error = anyhow::Error;

    fn try_from(value: LogLevelOpt) -> Result<Self> {
        match value {
            LogLevelOpt { verbose: false, debug: false, quiet: false } => Ok(LogLevel::Warn),
            LogLevelOpt { verbose: true, debug: false, quiet: false } => Ok(LogLevel::Info),
            LogLevelOpt { verbose: _, debug: true, quiet: false } => Ok(LogLevel::Debug),
            LogLevelOpt { verbose: false, debug: false, quiet: true } => Ok(LogLevel::Quiet),
            LogLevelOpt { quiet: true, .. } => {
                bail!("option `--quiet` conflicts with the options `--verbose` and `--debug`")
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogLevel {
    /// Errors only
    Quiet,
    /// Unavailable sources and counter resets
    #[default]
    Warn,
    /// Per source progress and counts
    Info,
    /// Skipped rows and internal detail
    Debug,
}

impl LogLevel {
    pub fn level(self) -> Level {
        match self {
            LogLevel::Quiet => Level::ERROR,
            LogLevel::Warn => Level::WARN,
            LogLevel::Info => Level::INFO,
            LogLevel::Debug => Level::DEBUG,
        }
    }
}

/// Install the global fmt subscriber. Logs go to stderr so stdout stays
/// clean for the run summary.
pub fn init(level: LogLevel) {
    tracing_subscriber::fmt()
        .with_max_level(level.level())
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

#[cfg(test)]
mod tests {
    use super::*;

    fn opt(verbose: bool, debug: bool, quiet: bool) -> LogLevelOpt {
        LogLevelOpt { verbose, debug, quiet }
    }

    #[test]
    fn test_flag_combinations() {
        assert_eq!(LogLevel::try_from(opt(false, false, false)).unwrap(), LogLevel::Warn);
        assert_eq!(LogLevel::try_from(opt(true, false, false)).unwrap(), LogLevel::Info);
        assert_eq!(LogLevel::try_from(opt(true, true, false)).unwrap(), LogLevel::Debug);
        assert_eq!(LogLevel::try_from(opt(false, false, true)).unwrap(), LogLevel::Quiet);
        assert!(LogLevel::try_from(opt(true, false, true)).is_err());
        assert_eq!(LogLevel::Quiet.level(), Level::ERROR);
    }
}
