//! JSON run configuration and command-line token parsing.

use convband_core::{ColumnClamp, ExecutionContext, Kernel, KernelError, KernelRegistry};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::num::NonZeroUsize;
use std::path::{Path, PathBuf};

#[derive(thiserror::Error, Debug)]
pub enum ConfigError {
    #[error("invalid execution mode {0:?}; expected sequential, parallel, distributed, distributed:<n>, mpi:<n>, custom:<n> or a positive integer")]
    Mode(String),
    #[error("no operations given; expected names separated by ',' or '+'")]
    NoOperations,
    #[error("input {} does not exist", .0.display())]
    InputMissing(PathBuf),
    #[error("cannot create output directory {}: {source}", .path.display())]
    OutputDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid kernel {name:?}: {source}")]
    Kernel {
        name: String,
        #[source]
        source: KernelError,
    },
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

/// Everything one invocation needs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunConfig {
    /// A PPM/PGM file or a directory of them.
    pub input: PathBuf,
    pub output_dir: PathBuf,
    /// Operation names in chain order. Each entry may itself hold several
    /// names separated by `,` or `+`.
    pub ops: Vec<String>,
    /// Execution mode token; threaded over all cores when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mode: Option<String>,
    #[serde(default)]
    pub column_clamp: ColumnClamp,
    /// Extra named kernels, each a row-major odd square coefficient list.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub kernels: BTreeMap<String, Kernel>,
}

impl RunConfig {
    pub fn new(
        input: impl Into<PathBuf>,
        output_dir: impl Into<PathBuf>,
        ops: &str,
        mode: Option<&str>,
    ) -> Self {
        Self {
            input: input.into(),
            output_dir: output_dir.into(),
            ops: vec![ops.to_string()],
            mode: mode.map(str::to_string),
            column_clamp: ColumnClamp::Global,
            kernels: BTreeMap::new(),
        }
    }

    /// Load a JSON config from disk.
    pub fn load_json(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let raw = fs::read_to_string(path)?;
        Ok(serde_json::from_str(&raw)?)
    }

    /// Write this config to disk as pretty JSON.
    pub fn write_json(&self, path: impl AsRef<Path>) -> Result<(), ConfigError> {
        let json = serde_json::to_string_pretty(self)?;
        fs::write(path, json)?;
        Ok(())
    }

    /// Flattened, trimmed operation names; never empty.
    pub fn operations(&self) -> Result<Vec<String>, ConfigError> {
        let names: Vec<String> = self
            .ops
            .iter()
            .flat_map(|entry| split_ops(entry))
            .collect();
        if names.is_empty() {
            return Err(ConfigError::NoOperations);
        }
        Ok(names)
    }

    /// Execution context for the configured mode on this machine.
    pub fn context(&self) -> Result<ExecutionContext, ConfigError> {
        let ctx = parse_mode(self.mode.as_deref(), available_cpus())?;
        Ok(ctx.with_column_clamp(self.column_clamp))
    }

    /// Built-in kernels plus the configured extras.
    pub fn registry(&self) -> Result<KernelRegistry, ConfigError> {
        self.kernels
            .iter()
            .try_fold(KernelRegistry::builtin(), |reg, (name, kernel)| {
                reg.with_kernel(name, kernel.clone())
                    .map_err(|source| ConfigError::Kernel {
                        name: name.clone(),
                        source,
                    })
            })
    }
}

/// Split an operation list on `,` or `+`, trimming and dropping empty names.
pub fn split_ops(list: &str) -> Vec<String> {
    list.split([',', '+'])
        .map(str::trim)
        .filter(|name| !name.is_empty())
        .map(str::to_string)
        .collect()
}

/// Number of logical CPUs, at least one.
pub fn available_cpus() -> NonZeroUsize {
    std::thread::available_parallelism().unwrap_or(NonZeroUsize::MIN)
}

/// Parse a mode token. `None` means threaded over `cpus` workers.
pub fn parse_mode(token: Option<&str>, cpus: NonZeroUsize) -> Result<ExecutionContext, ConfigError> {
    let at_least_two = cpus.max(NonZeroUsize::MIN.saturating_add(1));
    let Some(raw) = token else {
        return Ok(ExecutionContext::threaded(cpus));
    };
    let token = raw.trim().to_ascii_lowercase();
    let count = |digits: &str| {
        digits
            .trim()
            .parse::<NonZeroUsize>()
            .map_err(|_| ConfigError::Mode(raw.to_string()))
    };
    match token.as_str() {
        "sequential" | "seq" => Ok(ExecutionContext::sequential()),
        "parallel" => Ok(ExecutionContext::threaded(at_least_two)),
        "distributed" | "mpi" => Ok(ExecutionContext::distributed(at_least_two)),
        _ => {
            if let Some(n) = token
                .strip_prefix("distributed:")
                .or_else(|| token.strip_prefix("mpi:"))
            {
                Ok(ExecutionContext::distributed(count(n)?))
            } else if let Some(n) = token.strip_prefix("custom:") {
                Ok(ExecutionContext::threaded(count(n)?))
            } else {
                Ok(ExecutionContext::threaded(count(token.as_str())?))
            }
        }
    }
}
