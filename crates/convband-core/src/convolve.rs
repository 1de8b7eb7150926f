//! Per-pixel convolution and mirror kernels.
//!
//! Every executor funnels through [`apply_at`] / [`mirror_at`] with the same
//! tap order, so sequential, threaded and distributed runs accumulate floats
//! identically.

use crate::{Image, Kernel, Operation, WorkBand};

#[cfg(feature = "tracing")]
use tracing::instrument;

/// One output sample of a boundary-clamped convolution.
///
/// Neighbourhood coordinates outside the image reuse the nearest edge pixel.
/// The result is not clamped to `[0,1]`; quantisation belongs to the exporter.
#[inline]
pub fn apply_at(image: &Image, row: usize, col: usize, channel: usize, kernel: &Kernel) -> f32 {
    convolve_clamped(image, row, col, channel, kernel, 0)
}

/// One output sample of a horizontal flip.
#[inline]
pub fn mirror_at(image: &Image, row: usize, col: usize, channel: usize) -> f32 {
    image.sample(row, image.width() - 1 - col, channel)
}

/// Dispatch one output sample for `op`.
#[inline]
pub fn value_at(image: &Image, op: Operation<'_>, row: usize, col: usize, channel: usize) -> f32 {
    match op {
        Operation::Mirror => mirror_at(image, row, col, channel),
        Operation::Convolve(kernel) => apply_at(image, row, col, channel, kernel),
    }
}

/// Convolution where columns left of the image clamp to `left_edge`.
///
/// `left_edge == 0` is ordinary border replication. Rows and the right edge
/// always clamp against the full image.
pub(crate) fn convolve_clamped(
    image: &Image,
    row: usize,
    col: usize,
    channel: usize,
    kernel: &Kernel,
    left_edge: usize,
) -> f32 {
    let k = kernel.size();
    let radius = kernel.radius() as isize;
    let max_row = image.height() as isize - 1;
    let max_col = image.width() as isize - 1;

    let mut sum = 0.0f32;
    for ii in 0..k {
        let src_row = (row as isize - radius + ii as isize).clamp(0, max_row) as usize;
        for jj in 0..k {
            let shifted = col as isize - radius + jj as isize;
            let src_col = if shifted < 0 {
                left_edge
            } else {
                shifted.min(max_col) as usize
            };
            sum += image.sample(src_row, src_col, channel) * kernel.tap(ii, jj);
        }
    }
    sum
}

/// Compute every sample of the rows in `rows` into `out`.
///
/// `out` holds exactly `rows.len()` image rows, starting at `rows.lo`.
pub fn fill_rows(image: &Image, op: Operation<'_>, rows: WorkBand, out: &mut [f32]) {
    let row_len = image.row_len();
    debug_assert_eq!(out.len(), rows.len() * row_len);
    let channels = image.channels();

    for (row, out_row) in rows.range().zip(out.chunks_exact_mut(row_len)) {
        for (col, px) in out_row.chunks_exact_mut(channels).enumerate() {
            for (channel, slot) in px.iter_mut().enumerate() {
                *slot = value_at(image, op, row, col, channel);
            }
        }
    }
}

/// Apply `op` to the whole image on the calling thread.
#[cfg_attr(
    feature = "tracing",
    instrument(level = "debug", skip(image, op), fields(w = image.width(), h = image.height()))
)]
pub fn apply_sequential(image: &Image, op: Operation<'_>) -> Image {
    let mut data = vec![0.0; image.data().len()];
    fill_rows(image, op, WorkBand::new(0, image.height()), &mut data);
    image.derive(data)
}
