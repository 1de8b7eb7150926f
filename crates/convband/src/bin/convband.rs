use clap::{Parser, ValueEnum};
use convband::core::{init_with_level, level_from_env};
use convband::{run, ColumnClamp, RunConfig};
use log::{error, LevelFilter};
use std::path::PathBuf;
use std::process::ExitCode;

#[cfg(feature = "tracing")]
use convband::core::init_tracing;

#[derive(Clone, Copy, Debug, ValueEnum)]
enum Clamp {
    Global,
    BandAnchored,
}

impl From<Clamp> for ColumnClamp {
    fn from(value: Clamp) -> Self {
        match value {
            Clamp::Global => ColumnClamp::Global,
            Clamp::BandAnchored => ColumnClamp::BandAnchored,
        }
    }
}

#[derive(Parser, Debug)]
#[command(
    name = "convband",
    version,
    about = "Apply a chain of convolution kernels to PPM/PGM images",
    after_help = "MODE: sequential | parallel | distributed | distributed:<n> | mpi:<n> | custom:<n> | <n>\n\
                  Omitted mode runs threaded on every available core."
)]
struct Cli {
    /// Input PPM/PGM file, or a directory of them
    #[arg(required_unless_present = "config")]
    input: Option<PathBuf>,
    /// Directory receiving `output_*` files
    #[arg(required_unless_present = "config")]
    output_dir: Option<PathBuf>,
    /// Operation names separated by ',' or '+', e.g. "blur,edge"
    #[arg(required_unless_present = "config")]
    ops: Option<String>,
    /// Execution mode
    mode: Option<String>,

    /// Read the whole run from a JSON file instead of positional arguments
    #[arg(long, conflicts_with_all = ["input", "output_dir", "ops", "mode"])]
    config: Option<PathBuf>,
    /// Left-edge clamp used by threaded column bands
    #[arg(long, value_enum)]
    clamp: Option<Clamp>,
    /// Log level (error, warn, info, debug, trace); CONVBAND_LOG overrides the default
    #[arg(long)]
    log_level: Option<LevelFilter>,
    /// Write the run summary as JSON to this path
    #[arg(long)]
    json_summary: Option<PathBuf>,

    /// Emit `tracing` spans instead of plain log lines
    #[cfg(feature = "tracing")]
    #[arg(long)]
    tracing: bool,
    /// Format `tracing` output as JSON
    #[cfg(feature = "tracing")]
    #[arg(long, requires = "tracing")]
    json_logs: bool,
}

impl Cli {
    fn run_config(&self) -> Result<RunConfig, convband::ConfigError> {
        let mut cfg = match (&self.config, &self.input, &self.output_dir, &self.ops) {
            (Some(path), ..) => RunConfig::load_json(path)?,
            (None, Some(input), Some(output_dir), Some(ops)) => {
                RunConfig::new(input, output_dir, ops, self.mode.as_deref())
            }
            _ => return Err(convband::ConfigError::NoOperations),
        };
        if let Some(clamp) = self.clamp {
            cfg.column_clamp = clamp.into();
        }
        Ok(cfg)
    }
}

fn init_logging(cli: &Cli) {
    #[cfg(feature = "tracing")]
    if cli.tracing {
        init_tracing(cli.json_logs);
        let _ = tracing_log::LogTracer::init();
        return;
    }
    let level = cli
        .log_level
        .unwrap_or_else(|| level_from_env(LevelFilter::Info));
    let _ = init_with_level(level);
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(&cli);

    let result = cli
        .run_config()
        .map_err(convband::RunError::from)
        .and_then(|cfg| run(&cfg));
    let summary = match result {
        Ok(summary) => summary,
        Err(e) => {
            error!("{e}");
            eprintln!("convband: {e}");
            return ExitCode::FAILURE;
        }
    };

    for path in summary.written() {
        println!("{}", path.display());
    }
    for skipped in summary.skipped() {
        match &skipped.error {
            Some(failure) => eprintln!("skipped {}: {failure}", skipped.input.display()),
            None => eprintln!("skipped {}: unknown error", skipped.input.display()),
        }
    }
    if let Some(path) = &cli.json_summary {
        if let Err(e) = summary.write_json(path) {
            eprintln!("convband: cannot write summary: {e}");
            return ExitCode::FAILURE;
        }
    }
    ExitCode::SUCCESS
}
