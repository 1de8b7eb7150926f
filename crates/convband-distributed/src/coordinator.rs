//! Row-band coordinator for a distributed group.
//!
//! Per invocation:
//!
//! ```text
//! enumerate (root) -> bcast file count -> bcast op codes
//!   for each file:
//!     bcast header -> bcast pixels
//!     for each op:
//!       compute own rows -> gather at root -> root computes leftover rows
//!       -> root assembles -> bcast next image -> allreduce max step time
//!     export (root)
//! finalize
//! ```
//!
//! Every rank holds a full replica of the current image between steps. Only
//! the explicit collectives of [`Communicator`] carry state between ranks.

use crate::comm::{Communicator, ROOT};
use crate::local::run_local_group;
use crate::DistributedError;
use convband_core::{fill_rows, row_bands, Image, KernelRegistry, WorkBand};
use log::{debug, error, info, warn};
use serde::{Deserialize, Serialize};
use std::num::NonZeroUsize;
use std::sync::Mutex;
use std::time::Instant;

#[cfg(feature = "tracing")]
use tracing::instrument;

/// Boxed error returned by root-side I/O.
pub type IoError = Box<dyn std::error::Error + Send + Sync>;

/// Root-only input enumeration, decoding and export.
pub trait RootIo {
    /// Resolve the inputs and return how many there are.
    fn enumerate(&mut self) -> Result<usize, IoError>;
    /// Decode input `index`.
    fn load(&mut self, index: usize) -> Result<Image, IoError>;
    /// Persist the final image of input `index`.
    fn export(&mut self, index: usize, image: &Image) -> Result<(), IoError>;
}

/// What the root rank brings to a run.
pub struct RootJob<'a> {
    /// Operation names, in chain order; encoded to codes on the root.
    pub ops: &'a [String],
    pub io: &'a mut (dyn RootIo + Send),
}

/// Per-input result of a run, as seen by one rank.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", content = "detail", rename_all = "snake_case")]
pub enum FileOutcome {
    /// Root wrote the result.
    Exported,
    /// Non-root rank took part in the computation.
    Computed,
    /// Root could not decode the input; every rank skipped it.
    DecodeFailed(String),
    /// Root computed the result but could not write it.
    ExportFailed(String),
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FileReport {
    pub index: usize,
    /// `{width, height, channels, depth}` as broadcast by the root.
    pub header: Option<[usize; 4]>,
    /// Slowest rank's wall-clock seconds for each chained step.
    pub step_max_seconds: Vec<f64>,
    pub outcome: FileOutcome,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct GroupReport {
    pub rank: usize,
    pub size: usize,
    pub op_codes: Vec<i32>,
    pub files: Vec<FileReport>,
    pub total_seconds: f64,
}

impl GroupReport {
    pub fn failures(&self) -> impl Iterator<Item = &FileReport> {
        self.files.iter().filter(|f| {
            matches!(
                f.outcome,
                FileOutcome::DecodeFailed(_) | FileOutcome::ExportFailed(_)
            )
        })
    }
}

const ABORT: i32 = -1;

/// Drives the collective protocol for one rank.
pub struct Coordinator<'a, C: Communicator> {
    comm: &'a C,
    registry: &'a KernelRegistry,
}

impl<'a, C: Communicator> Coordinator<'a, C> {
    /// Every rank must be built with an identical registry.
    pub fn new(comm: &'a C, registry: &'a KernelRegistry) -> Self {
        Self { comm, registry }
    }

    /// Run the whole protocol. The root must pass a job; other ranks pass `None`.
    #[cfg_attr(
        feature = "tracing",
        instrument(level = "info", skip_all, fields(rank = self.comm.rank(), size = self.comm.size()))
    )]
    pub fn run(&self, job: Option<RootJob<'_>>) -> Result<GroupReport, DistributedError> {
        let rank = self.comm.rank();
        let size = self.comm.size();
        let mut job = match (self.comm.is_root(), job) {
            (true, None) => {
                // the other ranks already wait on the file count
                let mut count = [ABORT];
                self.comm.broadcast_i32(&mut count, ROOT)?;
                self.comm.finalize()?;
                return Err(DistributedError::MissingRootJob(rank));
            }
            (false, Some(_)) => {
                warn!("rank {rank} ignores a root job; only rank {ROOT} performs I/O");
                None
            }
            (_, job) => job,
        };
        let started = Instant::now();

        let file_count = match self.broadcast_file_count(job.as_mut())? {
            Ok(n) => n,
            Err(err) => {
                self.comm.finalize()?;
                return Err(err);
            }
        };
        let op_codes = self.broadcast_op_codes(job.as_ref())?;
        debug!("rank {rank}/{size}: {file_count} input(s), op codes {op_codes:?}");

        let mut files = Vec::with_capacity(file_count);
        for index in 0..file_count {
            files.push(self.process_file(index, &op_codes, job.as_mut())?);
        }

        self.comm.finalize()?;
        let total_seconds = started.elapsed().as_secs_f64();
        if self.comm.is_root() {
            info!("distributed total elapsed: {total_seconds:.3} s over {size} rank(s)");
        }
        Ok(GroupReport {
            rank,
            size,
            op_codes,
            files,
            total_seconds,
        })
    }

    /// Inner `Err` means the root failed to enumerate and the group aborts.
    fn broadcast_file_count(
        &self,
        job: Option<&mut RootJob<'_>>,
    ) -> Result<Result<usize, DistributedError>, DistributedError> {
        let mut count = [0i32];
        let mut failure = None;
        if let Some(job) = job {
            let enumerated = job.io.enumerate().map_err(|e| e.to_string()).and_then(|n| {
                i32::try_from(n).map_err(|_| format!("{n} inputs exceed the protocol limit"))
            });
            match enumerated {
                Ok(n) => count[0] = n,
                Err(msg) => {
                    error!("input enumeration failed: {msg}");
                    count[0] = ABORT;
                    failure = Some(msg);
                }
            }
        }
        self.comm.broadcast_i32(&mut count, ROOT)?;
        Ok(match usize::try_from(count[0]) {
            Ok(n) => Ok(n),
            Err(_) => Err(failure
                .map(DistributedError::Enumerate)
                .unwrap_or(DistributedError::RootAborted)),
        })
    }

    fn broadcast_op_codes(&self, job: Option<&RootJob<'_>>) -> Result<Vec<i32>, DistributedError> {
        let mut codes: Vec<i32> = job
            .map(|job| job.ops.iter().map(|name| self.registry.op_code(name)).collect())
            .unwrap_or_default();
        let mut len = [i32::try_from(codes.len()).unwrap_or(i32::MAX)];
        self.comm.broadcast_i32(&mut len, ROOT)?;
        if !self.comm.is_root() {
            codes = vec![0; usize::try_from(len[0]).unwrap_or(0)];
        }
        self.comm.broadcast_i32(&mut codes, ROOT)?;
        Ok(codes)
    }

    fn process_file(
        &self,
        index: usize,
        op_codes: &[i32],
        mut job: Option<&mut RootJob<'_>>,
    ) -> Result<FileReport, DistributedError> {
        let mut header = [0i32; 4];
        let mut loaded = None;
        let mut decode_failure = None;
        if let Some(job) = job.as_deref_mut() {
            match job.io.load(index).map_err(|e| e.to_string()).and_then(|img| {
                encode_header(&img).map(|h| (img, h))
            }) {
                Ok((img, h)) => {
                    header = h;
                    loaded = Some(img);
                }
                Err(msg) => {
                    error!("input {index}: {msg}; skipping");
                    header = [ABORT; 4];
                    decode_failure = Some(msg);
                }
            }
        }
        self.comm.broadcast_i32(&mut header, ROOT)?;
        if header[0] == ABORT {
            let msg = decode_failure.unwrap_or_else(|| "root failed to decode input".to_string());
            return Ok(FileReport {
                index,
                header: None,
                step_max_seconds: Vec::new(),
                outcome: FileOutcome::DecodeFailed(msg),
            });
        }

        let [w, h, c, d] = header.map(|v| usize::try_from(v).unwrap_or(0));
        let mut current = match loaded {
            Some(img) => img,
            None => Image::blank(w, h, c, u32::try_from(d).unwrap_or(0))?,
        };
        self.comm.broadcast_f32(current.data_mut(), ROOT)?;

        let mut step_max_seconds = Vec::with_capacity(op_codes.len());
        for (step, &code) in op_codes.iter().enumerate() {
            let started = Instant::now();
            current = self.apply_step(&current, code)?;
            let slowest = self
                .comm
                .allreduce_max_f64(started.elapsed().as_secs_f64())?;
            if self.comm.is_root() {
                info!("step {} (code={code}) max time: {slowest:.3} s", step + 1);
            }
            step_max_seconds.push(slowest);
        }

        let outcome = match job {
            Some(job) => match job.io.export(index, &current) {
                Ok(()) => FileOutcome::Exported,
                Err(e) => {
                    error!("input {index}: export failed: {e}");
                    FileOutcome::ExportFailed(e.to_string())
                }
            },
            None => FileOutcome::Computed,
        };
        Ok(FileReport {
            index,
            header: Some([w, h, c, d]),
            step_max_seconds,
            outcome,
        })
    }

    /// One chained operation: local band, gather, leftover, assemble, broadcast.
    fn apply_step(&self, current: &Image, code: i32) -> Result<Image, DistributedError> {
        let op = self.registry.operation(code);
        let size = NonZeroUsize::new(self.comm.size()).unwrap_or(NonZeroUsize::MIN);
        let partition = row_bands(current.height(), size);
        let row_len = current.row_len();
        let band = partition.bands[self.comm.rank()];
        let chunk_len = partition.per_rank * row_len;

        let mut chunk = vec![0.0; chunk_len];
        fill_rows(current, op, band, &mut chunk);

        let is_root = self.comm.is_root();
        let mut gathered = if is_root {
            vec![0.0; size.get() * chunk_len]
        } else {
            Vec::new()
        };
        self.comm.gather_f32(&chunk, &mut gathered, ROOT)?;

        let mut next = vec![0.0; current.data().len()];
        if is_root {
            for (band, part) in partition.bands.iter().zip(gathered.chunks_exact(chunk_len.max(1))) {
                next[rows(*band, row_len)].copy_from_slice(part);
            }
            let leftover = partition.leftover;
            if !leftover.is_empty() {
                debug!("root computes leftover rows {:?}", leftover.range());
                fill_rows(current, op, leftover, &mut next[rows(leftover, row_len)]);
            }
        }
        self.comm.broadcast_f32(&mut next, ROOT)?;
        Ok(current.with_data(next)?)
    }
}

fn rows(band: WorkBand, row_len: usize) -> std::ops::Range<usize> {
    band.lo * row_len..band.hi * row_len
}

fn encode_header(img: &Image) -> Result<[i32; 4], String> {
    let mut out = [0i32; 4];
    for (slot, v) in out.iter_mut().zip(img.header()) {
        *slot = i32::try_from(v).map_err(|_| format!("image header value {v} is too large"))?;
    }
    Ok(out)
}

/// Run a full group of `size` ranks on scoped threads, rank 0 driving `io`.
///
/// Returns the root's report. A failure on any rank fails the whole run.
pub fn run_in_process(
    size: NonZeroUsize,
    registry: &KernelRegistry,
    ops: &[String],
    io: &mut (dyn RootIo + Send),
) -> Result<GroupReport, DistributedError> {
    let root_io = Mutex::new(Some(io));
    let results = run_local_group(size, |comm| {
        let job = if comm.is_root() {
            root_io
                .lock()
                .ok()
                .and_then(|mut slot| slot.take())
                .map(|io| RootJob { ops, io })
        } else {
            None
        };
        Coordinator::new(&comm, registry).run(job)
    })?;

    let mut root_report = None;
    for (rank, result) in results.into_iter().enumerate() {
        let report = result?;
        if rank == ROOT {
            root_report = Some(report);
        }
    }
    root_report.ok_or(DistributedError::MissingRootJob(ROOT))
}
