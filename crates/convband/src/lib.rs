//! High-level facade for the `convband-*` workspace.
//!
//! This crate provides:
//! - re-exports of the engine (`convband::core`) and the rank-group
//!   coordinator (`convband::distributed`),
//! - JSON run configuration and mode-token parsing,
//! - (feature `image`) binary PGM/PPM I/O and the [`run`] driver that
//!   decodes, chains, and exports under any execution strategy,
//! - (feature `cli`) the `convband` binary.
//!
//! ## Quickstart
//!
//! ```no_run
//! use convband::{run, RunConfig};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let cfg = RunConfig::new("images/", "out/", "blur,edge", Some("distributed:3"));
//! let summary = run(&cfg)?;
//! for path in summary.written() {
//!     println!("{}", path.display());
//! }
//! # Ok(())
//! # }
//! ```
//!
//! ## Execution modes
//! - `sequential`: one thread.
//! - `parallel`, `custom:<n>`, `<n>`: column bands on scoped threads.
//! - `distributed`, `distributed:<n>`, `mpi:<n>`: row bands over an
//!   in-process rank group, rank 0 owning all file I/O.

pub use convband_core as core;
pub use convband_distributed as distributed;

pub use convband_core::{
    ColumnClamp, ExecutionContext, Image, ImageError, Kernel, KernelError, KernelRegistry,
    Strategy,
};

pub mod config;
pub use config::{parse_mode, split_ops, ConfigError, RunConfig};

#[cfg(feature = "image")]
pub mod codec;
#[cfg(feature = "image")]
pub mod inputs;
#[cfg(feature = "image")]
mod run;

#[cfg(feature = "image")]
pub use codec::{read_image, write_image, CodecError};
#[cfg(feature = "image")]
pub use inputs::InputSet;
#[cfg(feature = "image")]
pub use run::{process_image, run, FailureKind, FileFailure, FileSummary, RunError, RunSummary};
