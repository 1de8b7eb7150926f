use crate::ColumnClamp;
use serde::{Deserialize, Serialize};
use std::num::NonZeroUsize;

/// How an operation chain is executed.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Strategy {
    Sequential,
    Threaded,
    Distributed,
}

/// Validated execution settings for one invocation. Owns no image state.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionContext {
    pub strategy: Strategy,
    /// Thread count (threaded) or group size (distributed).
    pub workers: NonZeroUsize,
    #[serde(default)]
    pub column_clamp: ColumnClamp,
}

impl Default for ExecutionContext {
    fn default() -> Self {
        Self::sequential()
    }
}

impl ExecutionContext {
    pub fn sequential() -> Self {
        Self {
            strategy: Strategy::Sequential,
            workers: NonZeroUsize::MIN,
            column_clamp: ColumnClamp::Global,
        }
    }

    /// Thread-parallel execution; a single thread is sequential.
    pub fn threaded(workers: NonZeroUsize) -> Self {
        if workers.get() == 1 {
            return Self::sequential();
        }
        Self {
            strategy: Strategy::Threaded,
            workers,
            column_clamp: ColumnClamp::Global,
        }
    }

    pub fn distributed(group_size: NonZeroUsize) -> Self {
        Self {
            strategy: Strategy::Distributed,
            workers: group_size,
            column_clamp: ColumnClamp::Global,
        }
    }

    pub fn with_column_clamp(mut self, clamp: ColumnClamp) -> Self {
        self.column_clamp = clamp;
        self
    }

    /// Short label used in output names and logs: `seq`, `threads4`, `mpi3`.
    pub fn tag(&self) -> String {
        match self.strategy {
            Strategy::Sequential => "seq".to_string(),
            Strategy::Threaded => format!("threads{}", self.workers),
            Strategy::Distributed => format!("mpi{}", self.workers),
        }
    }
}
