//! In-process communicator: one thread per rank, exchanging through a shared
//! slot table guarded by a barrier.
//!
//! Each collective is two barrier phases. In the first, every rank posts its
//! contribution (and the size of the buffer it expects); in the second, every
//! rank reads the same table, so all of them reach the same verdict on size
//! mismatches.

use crate::comm::{Communicator, ROOT};
use crate::CommError;
use convband_core::rank_thread_name;
use std::num::NonZeroUsize;
use std::sync::{Arc, Barrier, Mutex};
use std::thread;

enum Payload {
    Empty,
    Ints(Vec<i32>),
    Floats(Vec<f32>),
    Scalar(f64),
}

struct Post {
    payload: Payload,
    /// Length of the buffer this rank contributes or reads into.
    capacity: usize,
    /// Receive length announced by a gather root; zero elsewhere.
    recv: usize,
}

impl Post {
    fn empty() -> Self {
        Self {
            payload: Payload::Empty,
            capacity: 0,
            recv: 0,
        }
    }
}

struct Exchange {
    size: usize,
    barrier: Barrier,
    slots: Mutex<Vec<Post>>,
}

trait Element: Copy {
    fn wrap(values: Vec<Self>) -> Payload;
    fn view(payload: &Payload) -> Option<&[Self]>;
}

impl Element for i32 {
    fn wrap(values: Vec<Self>) -> Payload {
        Payload::Ints(values)
    }

    fn view(payload: &Payload) -> Option<&[Self]> {
        match payload {
            Payload::Ints(v) => Some(v),
            _ => None,
        }
    }
}

impl Element for f32 {
    fn wrap(values: Vec<Self>) -> Payload {
        Payload::Floats(values)
    }

    fn view(payload: &Payload) -> Option<&[Self]> {
        match payload {
            Payload::Floats(v) => Some(v),
            _ => None,
        }
    }
}

/// Factory for a group of connected [`LocalComm`] endpoints.
pub struct LocalGroup;

impl LocalGroup {
    /// Create `size` endpoints; endpoint `r` has rank `r`.
    #[allow(clippy::new_ret_no_self)]
    pub fn new(size: NonZeroUsize) -> Vec<LocalComm> {
        let size = size.get();
        let shared = Arc::new(Exchange {
            size,
            barrier: Barrier::new(size),
            slots: Mutex::new((0..size).map(|_| Post::empty()).collect()),
        });
        (0..size)
            .map(|rank| LocalComm {
                rank,
                shared: Arc::clone(&shared),
            })
            .collect()
    }
}

/// One rank's endpoint of an in-process group.
pub struct LocalComm {
    rank: usize,
    shared: Arc<Exchange>,
}

impl LocalComm {
    fn check_root(&self, root: usize) -> Result<(), CommError> {
        if root >= self.shared.size {
            return Err(CommError::InvalidRoot {
                root,
                size: self.shared.size,
            });
        }
        Ok(())
    }

    /// Post, wait, read, wait. Both barriers are always reached.
    fn exchange<R>(
        &self,
        post: Post,
        read: impl FnOnce(&[Post]) -> Result<R, CommError>,
    ) -> Result<R, CommError> {
        let posted = self
            .shared
            .slots
            .lock()
            .map(|mut slots| slots[self.rank] = post)
            .map_err(|_| CommError::Poisoned);
        self.shared.barrier.wait();
        let result = posted.and_then(|()| {
            let slots = self.shared.slots.lock().map_err(|_| CommError::Poisoned)?;
            read(&slots)
        });
        self.shared.barrier.wait();
        result
    }

    fn broadcast<T: Element>(&self, buf: &mut [T], root: usize) -> Result<(), CommError> {
        self.check_root(root)?;
        let payload = if self.rank == root {
            T::wrap(buf.to_vec())
        } else {
            Payload::Empty
        };
        let post = Post {
            payload,
            capacity: buf.len(),
            recv: 0,
        };
        let rank = self.rank;
        self.exchange(post, |slots| {
            let expected = slots[root].capacity;
            check_capacities(slots, expected)?;
            if rank != root {
                let src = T::view(&slots[root].payload).ok_or(CommError::PayloadKind { rank: root })?;
                buf.copy_from_slice(src);
            }
            Ok(())
        })
    }
}

/// Every rank must have posted a buffer of `expected` values.
fn check_capacities(slots: &[Post], expected: usize) -> Result<(), CommError> {
    match slots.iter().position(|p| p.capacity != expected) {
        Some(rank) => Err(CommError::CollectiveMismatch {
            rank,
            expected,
            got: slots[rank].capacity,
        }),
        None => Ok(()),
    }
}

impl Communicator for LocalComm {
    fn rank(&self) -> usize {
        self.rank
    }

    fn size(&self) -> usize {
        self.shared.size
    }

    fn broadcast_i32(&self, buf: &mut [i32], root: usize) -> Result<(), CommError> {
        self.broadcast(buf, root)
    }

    fn broadcast_f32(&self, buf: &mut [f32], root: usize) -> Result<(), CommError> {
        self.broadcast(buf, root)
    }

    fn gather_f32(&self, send: &[f32], recv: &mut [f32], root: usize) -> Result<(), CommError> {
        self.check_root(root)?;
        let rank = self.rank;
        let size = self.shared.size;
        let post = Post {
            payload: Payload::Floats(send.to_vec()),
            capacity: send.len(),
            recv: if rank == root { recv.len() } else { 0 },
        };
        self.exchange(post, |slots| {
            let chunk = slots[root].capacity;
            check_capacities(slots, chunk)?;
            if slots[root].recv != size * chunk {
                return Err(CommError::CollectiveMismatch {
                    rank: root,
                    expected: size * chunk,
                    got: slots[root].recv,
                });
            }
            if rank == root && chunk > 0 {
                for (src_rank, (slot, dst)) in
                    slots.iter().zip(recv.chunks_exact_mut(chunk)).enumerate()
                {
                    let src = f32::view(&slot.payload)
                        .ok_or(CommError::PayloadKind { rank: src_rank })?;
                    dst.copy_from_slice(src);
                }
            }
            Ok(())
        })
    }

    fn allreduce_max_f64(&self, value: f64) -> Result<f64, CommError> {
        let post = Post {
            payload: Payload::Scalar(value),
            capacity: 1,
            recv: 0,
        };
        self.exchange(post, |slots| {
            slots
                .iter()
                .enumerate()
                .try_fold(f64::NEG_INFINITY, |acc, (rank, slot)| match slot.payload {
                    Payload::Scalar(v) => Ok(acc.max(v)),
                    _ => Err(CommError::PayloadKind { rank }),
                })
        })
    }

    fn finalize(&self) -> Result<(), CommError> {
        self.exchange(Post::empty(), |_| Ok(()))
    }
}

/// Run `body` once per rank of a fresh [`LocalGroup`], each on a thread named
/// `rank-<r>`, and collect the results in rank order.
///
/// A panicking rank is re-raised on the caller after the scope joins.
pub fn run_local_group<R, F>(size: NonZeroUsize, body: F) -> std::io::Result<Vec<R>>
where
    R: Send,
    F: Fn(LocalComm) -> R + Sync,
{
    let comms = LocalGroup::new(size);
    thread::scope(|s| {
        let body = &body;
        let handles = comms
            .into_iter()
            .map(|comm| {
                thread::Builder::new()
                    .name(rank_thread_name(comm.rank))
                    .spawn_scoped(s, move || body(comm))
            })
            .collect::<std::io::Result<Vec<_>>>()?;
        Ok(handles
            .into_iter()
            .map(|h| h.join().unwrap_or_else(|panic| std::panic::resume_unwind(panic)))
            .collect())
    })
}

/// Endpoint for a group of one; every collective is local.
pub fn solo() -> LocalComm {
    let mut group = LocalGroup::new(NonZeroUsize::MIN);
    group.remove(ROOT)
}
