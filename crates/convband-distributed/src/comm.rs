//! Minimal group-communication interface used by the coordinator.

use crate::CommError;

/// Rank that loads inputs, assembles results and exports.
pub const ROOT: usize = 0;

/// Blocking collectives over a fixed group of ranks.
///
/// Every method is a collective: all ranks of the group must call it, in the
/// same order, with the same `root`. There is no timeout; a rank that never
/// arrives stalls the others. Buffer-size disagreements are fatal and are
/// reported to every rank.
pub trait Communicator {
    /// This participant's rank in `0..size()`.
    fn rank(&self) -> usize;

    /// Number of participants.
    fn size(&self) -> usize;

    /// Replicate `buf` from `root` into every rank's `buf`.
    fn broadcast_i32(&self, buf: &mut [i32], root: usize) -> Result<(), CommError>;

    /// Replicate `buf` from `root` into every rank's `buf`.
    fn broadcast_f32(&self, buf: &mut [f32], root: usize) -> Result<(), CommError>;

    /// Concatenate every rank's equal-sized `send` chunk, in rank order, into
    /// `recv` on `root`. `recv` must hold `size() * send.len()` values on the
    /// root and is ignored elsewhere.
    fn gather_f32(&self, send: &[f32], recv: &mut [f32], root: usize) -> Result<(), CommError>;

    /// Maximum of `value` over all ranks, returned on every rank.
    fn allreduce_max_f64(&self, value: f64) -> Result<f64, CommError>;

    /// Final barrier; no collective may follow.
    fn finalize(&self) -> Result<(), CommError>;

    fn is_root(&self) -> bool {
        self.rank() == ROOT
    }
}
