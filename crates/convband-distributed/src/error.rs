use convband_core::ImageError;

/// Failures of a single collective call.
///
/// Every variant is observed by all participants of the collective, so the
/// whole group leaves the protocol together.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum CommError {
    #[error("collective buffer mismatch on rank {rank} (expected {expected} values, got {got})")]
    CollectiveMismatch {
        rank: usize,
        expected: usize,
        got: usize,
    },
    #[error("root rank {root} is outside a group of {size}")]
    InvalidRoot { root: usize, size: usize },
    #[error("collective payload on rank {rank} has the wrong element type")]
    PayloadKind { rank: usize },
    #[error("a group member panicked while holding the exchange lock")]
    Poisoned,
}

/// Errors returned by the distributed coordinator.
#[derive(thiserror::Error, Debug)]
pub enum DistributedError {
    #[error(transparent)]
    Comm(#[from] CommError),
    #[error("rank {0} is the root but was started without a root job")]
    MissingRootJob(usize),
    #[error("root could not enumerate inputs: {0}")]
    Enumerate(String),
    #[error("root aborted the run before any input was processed")]
    RootAborted,
    #[error("broadcast header is not a valid image: {0}")]
    Image(#[from] ImageError),
    #[error("failed to spawn a rank thread: {0}")]
    Spawn(#[from] std::io::Error),
}
