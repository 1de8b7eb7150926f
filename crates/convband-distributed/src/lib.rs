//! Distributed row-band execution of convolution chains.
//!
//! A fixed group of ranks processes every input together. Rank 0 (the root)
//! owns all I/O: it enumerates and decodes inputs, broadcasts each image to
//! the group, assembles the row bands every rank computes, handles leftover
//! rows itself, and exports the final result. Ranks share state only through
//! the collectives of a [`Communicator`], passed in explicitly.
//!
//! [`LocalGroup`] provides an in-process communicator (one thread per rank),
//! and [`run_in_process`] wires a whole group around a [`RootIo`].
//!
//! ```no_run
//! use convband_core::{Image, KernelRegistry};
//! use convband_distributed::{run_in_process, MemoryIo};
//! use std::num::NonZeroUsize;
//!
//! let image = Image::new(2, 2, 1, 255, vec![0.1, 0.2, 0.3, 0.4]).unwrap();
//! let mut io = MemoryIo::new([image]);
//! let ops = vec!["blur".to_string()];
//! let report = run_in_process(
//!     NonZeroUsize::new(3).unwrap(),
//!     &KernelRegistry::builtin(),
//!     &ops,
//!     &mut io,
//! )
//! .unwrap();
//! assert_eq!(report.files.len(), 1);
//! ```

mod comm;
mod coordinator;
mod error;
mod local;
mod memory;

pub use comm::{Communicator, ROOT};
pub use coordinator::{
    run_in_process, Coordinator, FileOutcome, FileReport, GroupReport, IoError, RootIo, RootJob,
};
pub use error::{CommError, DistributedError};
pub use local::{run_local_group, solo, LocalComm, LocalGroup};
pub use memory::MemoryIo;
