//! Rank-aware stderr logger.
//!
//! A distributed run executes every rank on its own thread inside one
//! process, named with [`rank_thread_name`]. Each line carries that name, so
//! the output of a three-rank run reads
//!
//! ```text
//! [  0.042s DEBUG rank-2] rank 2/3: 1 input(s), op codes [0]
//! [  0.051s  INFO rank-0] step 1 (code=0) max time: 0.003 s
//! [  0.052s  INFO main] saved out/output_mpi3.ppm
//! ```
//!
//! Lines from threads without a name (threaded column bands) are tagged `-`.
//! Install once with [`init_with_level`]; [`level_from_env`] reads
//! [`LOG_ENV`].

use std::fmt;
use std::io::Write;
use std::str::FromStr;
use std::sync::OnceLock;
use std::time::Instant;

use log::{Level, LevelFilter, Log, Metadata, Record};

#[cfg(feature = "tracing")]
use tracing_subscriber::fmt::format::FmtSpan;
#[cfg(feature = "tracing")]
use tracing_subscriber::util::SubscriberInitExt;
#[cfg(feature = "tracing")]
use tracing_subscriber::{fmt as tracing_fmt, EnvFilter};

/// Environment variable consulted by [`level_from_env`].
pub const LOG_ENV: &str = "CONVBAND_LOG";

const RANK_PREFIX: &str = "rank-";

/// Thread name given to `rank` when a group runs in-process.
pub fn rank_thread_name(rank: usize) -> String {
    format!("{RANK_PREFIX}{rank}")
}

/// Rank encoded in a thread name produced by [`rank_thread_name`].
pub fn rank_of_thread(name: &str) -> Option<usize> {
    name.strip_prefix(RANK_PREFIX)?.parse().ok()
}

fn format_line(elapsed: f64, level: Level, thread: Option<&str>, args: fmt::Arguments<'_>) -> String {
    format!("[{elapsed:7.3}s {level:>5} {}] {args}", thread.unwrap_or("-"))
}

struct StderrLogger {
    level: LevelFilter,
    started: Instant,
}

impl Log for StderrLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= self.level
    }

    fn log(&self, record: &Record) {
        if !self.enabled(record.metadata()) {
            return;
        }

        let line = format_line(
            self.started.elapsed().as_secs_f64(),
            record.level(),
            std::thread::current().name(),
            *record.args(),
        );
        // one write per line keeps ranks from interleaving mid-line
        let _ = writeln!(std::io::stderr().lock(), "{line}");
    }

    fn flush(&self) {
        let _ = std::io::stderr().flush();
    }
}

static LOGGER: OnceLock<StderrLogger> = OnceLock::new();

/// Install the stderr logger with the provided level filter.
///
/// Calling this more than once is a no-op after the first successful
/// initialization.
pub fn init_with_level(level: LevelFilter) -> Result<(), log::SetLoggerError> {
    if LOGGER.get().is_none() {
        let logger = LOGGER.get_or_init(|| StderrLogger {
            level,
            started: Instant::now(),
        });
        log::set_logger(logger)?;
        log::set_max_level(level);
    }
    Ok(())
}

/// Level named by `CONVBAND_LOG` (`error`..`trace`, `off`), else `default`.
pub fn level_from_env(default: LevelFilter) -> LevelFilter {
    std::env::var(LOG_ENV)
        .ok()
        .and_then(|raw| parse_level(&raw))
        .unwrap_or(default)
}

fn parse_level(raw: &str) -> Option<LevelFilter> {
    LevelFilter::from_str(raw.trim()).ok()
}

/// Install a global `tracing` subscriber filtered by `RUST_LOG` (default `info`).
///
/// `log` records are not bridged here; binaries that want them install
/// `tracing_log::LogTracer` as well.
#[cfg(feature = "tracing")]
pub fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    if json {
        let _ = tracing_fmt()
            .with_env_filter(filter)
            .with_span_events(FmtSpan::CLOSE)
            .with_thread_names(true)
            .json()
            .flatten_event(true)
            .finish()
            .try_init();
    } else {
        let _ = tracing_fmt()
            .with_env_filter(filter)
            .with_span_events(FmtSpan::CLOSE)
            .with_thread_names(true)
            .with_timer(tracing_fmt::time::Uptime::default())
            .finish()
            .try_init();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rank_names_round_trip_through_thread_tags() {
        assert_eq!(rank_thread_name(3), "rank-3");
        assert_eq!(rank_of_thread("rank-3"), Some(3));
        assert_eq!(rank_of_thread("main"), None);
        assert_eq!(rank_of_thread("rank-x"), None);
    }

    #[test]
    fn lines_carry_the_emitting_rank() {
        let line = format_line(0.0421, Level::Info, Some("rank-1"), format_args!("step 1"));
        assert_eq!(line, "[  0.042s  INFO rank-1] step 1");
        let unnamed = format_line(1.5, Level::Debug, None, format_args!("band"));
        assert_eq!(unnamed, "[  1.500s DEBUG -] band");
    }

    #[test]
    fn level_names_are_trimmed_and_case_insensitive() {
        assert_eq!(parse_level(" Debug\n"), Some(LevelFilter::Debug));
        assert_eq!(parse_level("off"), Some(LevelFilter::Off));
        assert_eq!(parse_level("loud"), None);
    }
}
