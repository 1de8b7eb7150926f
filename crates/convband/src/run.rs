//! Strategy dispatch: configuration in, processed files and a summary out.

use crate::codec::{read_image, write_image, CodecError};
use crate::config::{ConfigError, RunConfig};
use crate::inputs::InputSet;
use convband_core::{run_chain, ExecutionContext, Image, KernelRegistry, Strategy};
use convband_distributed::{
    run_in_process, DistributedError, FileOutcome, GroupReport, IoError, MemoryIo, RootIo,
};
use log::{error, info};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Instant;

#[cfg(feature = "tracing")]
use tracing::instrument;

#[derive(thiserror::Error, Debug)]
pub enum RunError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Codec(#[from] CodecError),
    #[error(transparent)]
    Distributed(#[from] DistributedError),
    #[error("cannot list inputs in {}: {source}", .path.display())]
    Enumerate {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("{failed} of {total} output(s) could not be written; first failure: {first}")]
    Export {
        failed: usize,
        total: usize,
        first: String,
    },
}

/// Which stage rejected an input.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// The input could not be decoded; it was skipped.
    Decode,
    /// The result could not be written; the run fails once every input is done.
    Export,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileFailure {
    pub kind: FailureKind,
    pub message: String,
}

impl FileFailure {
    fn new(kind: FailureKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}

impl std::fmt::Display for FileFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.kind {
            FailureKind::Decode => f.write_str(&self.message),
            FailureKind::Export => write!(f, "export failed: {}", self.message),
        }
    }
}

/// Per-input record of a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileSummary {
    pub input: PathBuf,
    #[serde(default)]
    pub output: Option<PathBuf>,
    /// Wall-clock seconds for decode, chain and export.
    #[serde(default)]
    pub seconds: Option<f64>,
    /// Slowest rank per chained step; distributed runs only.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub step_max_seconds: Vec<f64>,
    #[serde(default)]
    pub error: Option<FileFailure>,
}

impl FileSummary {
    fn pending(input: PathBuf) -> Self {
        Self {
            input,
            output: None,
            seconds: None,
            step_max_seconds: Vec::new(),
            error: None,
        }
    }
}

/// What a run did, serializable for `--json-summary`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunSummary {
    pub context: ExecutionContext,
    pub ops: Vec<String>,
    pub files: Vec<FileSummary>,
    pub total_seconds: f64,
}

impl RunSummary {
    pub fn written(&self) -> impl Iterator<Item = &Path> {
        self.files.iter().filter_map(|f| f.output.as_deref())
    }

    pub fn skipped(&self) -> impl Iterator<Item = &FileSummary> {
        self.files.iter().filter(|f| f.output.is_none())
    }

    /// Write the summary as pretty JSON.
    pub fn write_json(&self, path: impl AsRef<Path>) -> Result<(), ConfigError> {
        fs::write(path, serde_json::to_string_pretty(self)?)?;
        Ok(())
    }
}

/// Apply `ops` to `image` under `ctx`, fully in memory.
///
/// Distributed contexts spin up an in-process rank group for this one image.
pub fn process_image(
    image: &Image,
    ops: &[String],
    registry: &KernelRegistry,
    ctx: &ExecutionContext,
) -> Result<Image, DistributedError> {
    match ctx.strategy {
        Strategy::Sequential | Strategy::Threaded => Ok(run_chain(
            image,
            &registry.resolve_all(ops),
            ctx.workers,
            ctx.column_clamp,
        )),
        Strategy::Distributed => {
            let mut io = MemoryIo::new([image.clone()]);
            run_in_process(ctx.workers, registry, ops, &mut io)?;
            io.into_exported()
                .remove(&0)
                .ok_or(DistributedError::RootAborted)
        }
    }
}

/// Run a whole configured invocation.
#[cfg_attr(feature = "tracing", instrument(level = "info", skip_all, fields(input = %cfg.input.display())))]
pub fn run(cfg: &RunConfig) -> Result<RunSummary, RunError> {
    let ops = cfg.operations()?;
    let ctx = cfg.context()?;
    let registry = cfg.registry()?;
    if !cfg.input.exists() {
        return Err(ConfigError::InputMissing(cfg.input.clone()).into());
    }
    fs::create_dir_all(&cfg.output_dir).map_err(|source| ConfigError::OutputDir {
        path: cfg.output_dir.clone(),
        source,
    })?;
    info!(
        "running {} over {} with {} ({} worker(s))",
        ops.join("+"),
        cfg.input.display(),
        ctx.tag(),
        ctx.workers
    );

    let started = Instant::now();
    let files = match ctx.strategy {
        Strategy::Sequential | Strategy::Threaded => run_local(cfg, &ctx, &registry, &ops)?,
        Strategy::Distributed => run_group(cfg, &ctx, &registry, &ops)?,
    };
    let total_seconds = started.elapsed().as_secs_f64();
    info!("total elapsed: {total_seconds:.3} s");

    let summary = RunSummary {
        context: ctx,
        ops,
        files,
        total_seconds,
    };
    export_failures(&summary)?;
    Ok(summary)
}

fn discover(input: &Path) -> Result<InputSet, RunError> {
    InputSet::discover(input).map_err(|source| RunError::Enumerate {
        path: input.to_path_buf(),
        source,
    })
}

fn run_local(
    cfg: &RunConfig,
    ctx: &ExecutionContext,
    registry: &KernelRegistry,
    ops: &[String],
) -> Result<Vec<FileSummary>, RunError> {
    let inputs = discover(&cfg.input)?;
    let chain = registry.resolve_all(ops);
    let mut files = Vec::with_capacity(inputs.len());
    for (index, path) in inputs.paths().iter().enumerate() {
        let mut file = FileSummary::pending(path.clone());
        let started = Instant::now();
        let image = match read_image(path) {
            Ok(image) => image,
            Err(e) => {
                error!("{}: {e}; skipping", path.display());
                file.error = Some(FileFailure::new(FailureKind::Decode, e.to_string()));
                files.push(file);
                continue;
            }
        };
        let out = run_chain(&image, &chain, ctx.workers, ctx.column_clamp);
        let target = inputs.output_path(index, &cfg.output_dir, ctx);
        match write_image(&target, &out) {
            Ok(()) => {
                let seconds = started.elapsed().as_secs_f64();
                info!("saved {} ({seconds:.3} s)", target.display());
                file.output = Some(target);
                file.seconds = Some(seconds);
            }
            Err(e) => {
                error!("{}: {e}", target.display());
                file.error = Some(FileFailure::new(FailureKind::Export, e.to_string()));
            }
        }
        files.push(file);
    }
    Ok(files)
}

/// Root-side file I/O for a distributed run.
struct FsRootIo<'a> {
    input: &'a Path,
    output_dir: &'a Path,
    ctx: ExecutionContext,
    inputs: Option<InputSet>,
    written: Vec<Option<PathBuf>>,
}

impl<'a> FsRootIo<'a> {
    fn new(cfg: &'a RunConfig, ctx: ExecutionContext) -> Self {
        Self {
            input: &cfg.input,
            output_dir: &cfg.output_dir,
            ctx,
            inputs: None,
            written: Vec::new(),
        }
    }

    fn path(&self, index: usize) -> Result<&Path, IoError> {
        self.inputs
            .as_ref()
            .and_then(|set| set.paths().get(index))
            .map(PathBuf::as_path)
            .ok_or_else(|| format!("input {index} was never enumerated").into())
    }
}

impl RootIo for FsRootIo<'_> {
    fn enumerate(&mut self) -> Result<usize, IoError> {
        let set = InputSet::discover(self.input)?;
        let n = set.len();
        self.written = vec![None; n];
        self.inputs = Some(set);
        Ok(n)
    }

    fn load(&mut self, index: usize) -> Result<Image, IoError> {
        Ok(read_image(self.path(index)?)?)
    }

    fn export(&mut self, index: usize, image: &Image) -> Result<(), IoError> {
        let target = self
            .inputs
            .as_ref()
            .map(|set| set.output_path(index, self.output_dir, &self.ctx))
            .ok_or("inputs were never enumerated")?;
        write_image(&target, image)?;
        info!("saved {}", target.display());
        if let Some(slot) = self.written.get_mut(index) {
            *slot = Some(target);
        }
        Ok(())
    }
}

fn run_group(
    cfg: &RunConfig,
    ctx: &ExecutionContext,
    registry: &KernelRegistry,
    ops: &[String],
) -> Result<Vec<FileSummary>, RunError> {
    let mut io = FsRootIo::new(cfg, *ctx);
    let report = run_in_process(ctx.workers, registry, ops, &mut io)?;
    Ok(summarize_group(&report, io))
}

fn summarize_group(report: &GroupReport, io: FsRootIo<'_>) -> Vec<FileSummary> {
    let paths = io.inputs.as_ref().map(InputSet::paths).unwrap_or_default();
    report
        .files
        .iter()
        .map(|f| {
            let input = paths.get(f.index).cloned().unwrap_or_default();
            let mut file = FileSummary::pending(input);
            file.step_max_seconds = f.step_max_seconds.clone();
            match &f.outcome {
                FileOutcome::Exported | FileOutcome::Computed => {
                    file.output = io.written.get(f.index).cloned().flatten();
                    file.seconds = Some(f.step_max_seconds.iter().sum());
                }
                FileOutcome::DecodeFailed(msg) => {
                    file.error = Some(FileFailure::new(FailureKind::Decode, msg.as_str()));
                }
                FileOutcome::ExportFailed(msg) => {
                    file.error = Some(FileFailure::new(FailureKind::Export, msg.as_str()));
                }
            }
            file
        })
        .collect()
}

fn export_failures(summary: &RunSummary) -> Result<(), RunError> {
    let mut failures = summary
        .files
        .iter()
        .filter_map(|f| f.error.as_ref())
        .filter(|e| e.kind == FailureKind::Export);
    let Some(first) = failures.next() else {
        return Ok(());
    };
    Err(RunError::Export {
        failed: 1 + failures.count(),
        total: summary.files.len(),
        first: first.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use std::num::NonZeroUsize;

    fn nz(n: usize) -> NonZeroUsize {
        NonZeroUsize::new(n).expect("non-zero")
    }

    fn ramp(width: usize, height: usize, channels: usize) -> Image {
        let data = (0..width * height * channels)
            .map(|i| (i % 17) as f32 / 16.0)
            .collect();
        Image::new(width, height, channels, 255, data).expect("image")
    }

    #[test]
    fn process_image_agrees_across_strategies() {
        let reg = KernelRegistry::builtin();
        let ops: Vec<String> = ["blur", "edge", "mirror"].map(String::from).into();
        let img = ramp(9, 7, 3);
        let seq = process_image(&img, &ops, &reg, &ExecutionContext::sequential()).expect("seq");
        for ctx in [
            ExecutionContext::threaded(nz(3)),
            ExecutionContext::threaded(nz(12)),
            ExecutionContext::distributed(nz(2)),
            ExecutionContext::distributed(nz(4)),
        ] {
            let out = process_image(&img, &ops, &reg, &ctx).expect("process");
            for (a, b) in seq.data().iter().zip(out.data()) {
                assert_abs_diff_eq!(*a, *b, epsilon = 1e-5);
            }
        }
    }

    #[test]
    fn export_failures_become_an_error() {
        let mut ok = FileSummary::pending("a.ppm".into());
        ok.output = Some("out/output_a.ppm".into());
        let mut skipped = FileSummary::pending("b.ppm".into());
        // a decode message that happens to mention export is still a decode failure
        skipped.error = Some(FileFailure::new(FailureKind::Decode, "export failed: not a PNM file"));
        let mut failed = FileSummary::pending("c.ppm".into());
        failed.error = Some(FileFailure::new(FailureKind::Export, "disk full"));
        let summary = RunSummary {
            context: ExecutionContext::sequential(),
            ops: vec!["blur".into()],
            files: vec![ok, skipped, failed],
            total_seconds: 0.0,
        };
        assert_eq!(summary.written().count(), 1);
        assert_eq!(summary.skipped().count(), 2);
        match export_failures(&summary) {
            Err(RunError::Export {
                failed,
                total,
                first,
            }) => {
                assert_eq!((failed, total), (1, 3));
                assert_eq!(first, "export failed: disk full");
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn missing_input_is_reported_before_any_work() {
        let dir = tempfile::tempdir().expect("tempdir");
        let cfg = RunConfig::new(dir.path().join("absent.ppm"), dir.path().join("out"), "blur", None);
        assert!(matches!(
            run(&cfg),
            Err(RunError::Config(ConfigError::InputMissing(_)))
        ));
        assert!(!dir.path().join("out").exists());
    }
}
