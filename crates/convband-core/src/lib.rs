//! Partition-and-compute engine for chained convolution transforms.
//!
//! This crate holds everything that runs inside one process:
//! - the [`Image`] record and the [`KernelRegistry`],
//! - the per-pixel convolution / mirror engine,
//! - column and row partitioning,
//! - the sequential and thread-parallel executors.
//!
//! It knows nothing about file formats or inter-process communication; the
//! distributed coordinator lives in `convband-distributed`.

mod chain;
mod context;
mod convolve;
mod image;
mod kernel;
mod logger;
mod partition;
mod threaded;

pub use chain::run_chain;
pub use context::{ExecutionContext, Strategy};
pub use convolve::{apply_at, apply_sequential, fill_rows, mirror_at, value_at};
pub use image::{Image, ImageError};
pub use kernel::{
    Kernel, KernelError, KernelRegistry, Operation, FIRST_KERNEL_CODE, IDENTITY_CODE, MIRROR_CODE,
};
pub use partition::{column_bands, row_bands, RowPartition, WorkBand};
pub use threaded::{apply_threaded, ColumnClamp};

#[cfg(feature = "tracing")]
pub use logger::init_tracing;

pub use logger::{init_with_level, level_from_env, rank_of_thread, rank_thread_name, LOG_ENV};
