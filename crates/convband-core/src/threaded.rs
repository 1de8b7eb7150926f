//! Shared-memory executor over column bands.
//!
//! The output buffer is carved into disjoint `&mut` row segments, one list per
//! column band, before any worker starts. Workers borrow the input image
//! immutably; the scope join is the only synchronisation.

use crate::convolve::{apply_sequential, convolve_clamped, mirror_at};
use crate::partition::column_bands;
use crate::{Image, Operation, WorkBand};
use log::debug;
use serde::{Deserialize, Serialize};
use std::num::NonZeroUsize;

#[cfg(feature = "tracing")]
use tracing::instrument;

/// Left-edge clamp used by thread workers when a tap falls left of the image.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ColumnClamp {
    /// Clamp to column 0. Output matches the sequential executor.
    #[default]
    Global,
    /// Clamp to the worker's own band start (legacy worker behaviour).
    ///
    /// Differs from [`ColumnClamp::Global`] only when a kernel radius exceeds
    /// a band's start column; the right edge still clamps to `width - 1`.
    BandAnchored,
}

/// Apply `op` with `workers` threads, one per column band.
///
/// `workers == 1` runs on the calling thread without spawning.
#[cfg_attr(
    feature = "tracing",
    instrument(level = "debug", skip(image, op), fields(w = image.width(), h = image.height()))
)]
pub fn apply_threaded(
    image: &Image,
    op: Operation<'_>,
    workers: NonZeroUsize,
    clamp: ColumnClamp,
) -> Image {
    if workers.get() == 1 {
        return apply_sequential(image, op);
    }

    let bands = column_bands(image.width(), workers);
    let channels = image.channels();
    let mut data = vec![0.0; image.data().len()];

    let mut strips: Vec<Vec<&mut [f32]>> = bands
        .iter()
        .map(|_| Vec::with_capacity(image.height()))
        .collect();
    for row in data.chunks_exact_mut(image.row_len()) {
        let mut rest = row;
        for (band, strip) in bands.iter().zip(strips.iter_mut()) {
            let (head, tail) = std::mem::take(&mut rest).split_at_mut(band.len() * channels);
            strip.push(head);
            rest = tail;
        }
    }

    std::thread::scope(|s| {
        for (band, strip) in bands.iter().copied().zip(strips) {
            s.spawn(move || fill_column_band(image, op, band, strip, clamp));
        }
    });
    debug!(
        "threaded op over {} column bands ({}x{}x{})",
        bands.len(),
        image.width(),
        image.height(),
        channels
    );

    image.derive(data)
}

/// Worker body: every row and channel of `band`, writing into `strip[row]`.
fn fill_column_band(
    image: &Image,
    op: Operation<'_>,
    band: WorkBand,
    strip: Vec<&mut [f32]>,
    clamp: ColumnClamp,
) {
    let channels = image.channels();
    let left_edge = match clamp {
        ColumnClamp::Global => 0,
        ColumnClamp::BandAnchored => band.lo,
    };

    for (row, segment) in strip.into_iter().enumerate() {
        for (local, px) in segment.chunks_exact_mut(channels).enumerate() {
            let col = band.lo + local;
            for (channel, slot) in px.iter_mut().enumerate() {
                *slot = match op {
                    Operation::Mirror => mirror_at(image, row, col, channel),
                    Operation::Convolve(kernel) => {
                        convolve_clamped(image, row, col, channel, kernel, left_edge)
                    }
                };
            }
        }
    }
}
