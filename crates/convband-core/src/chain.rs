//! Chained operations on the calling process.

use crate::threaded::apply_threaded;
use crate::{ColumnClamp, Image, Operation};
use log::debug;
use std::num::NonZeroUsize;
use std::time::Instant;

#[cfg(feature = "tracing")]
use tracing::instrument;

/// Apply `ops` in order; each step reads the previous step's output.
///
/// Every step allocates a fresh buffer, so no image is written while another
/// step reads it. An empty chain returns a copy of the input.
#[cfg_attr(
    feature = "tracing",
    instrument(level = "info", skip(input, ops), fields(steps = ops.len(), workers = workers.get()))
)]
pub fn run_chain(
    input: &Image,
    ops: &[Operation<'_>],
    workers: NonZeroUsize,
    clamp: ColumnClamp,
) -> Image {
    let mut current = input.clone();
    for (step, op) in ops.iter().enumerate() {
        let started = Instant::now();
        current = apply_threaded(&current, *op, workers, clamp);
        debug!(
            "step {} ({:?}) took {:.3} s",
            step + 1,
            op_label(op),
            started.elapsed().as_secs_f64()
        );
    }
    current
}

fn op_label(op: &Operation<'_>) -> String {
    match op {
        Operation::Mirror => "mirror".to_string(),
        Operation::Convolve(kernel) => format!("{0}x{0} kernel", kernel.size()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::convolve::apply_sequential;
    use crate::KernelRegistry;

    fn sample_image() -> Image {
        let data = (0..6 * 5 * 3)
            .map(|v| ((v * 13) % 17) as f32 / 16.0)
            .collect();
        Image::new(6, 5, 3, 255, data).expect("valid image")
    }

    #[test]
    fn blur_then_edge_composes_single_steps() {
        let reg = KernelRegistry::builtin();
        let img = sample_image();
        let ops = reg.resolve_all(&["blur", "edge"]);
        let chained = run_chain(&img, &ops, NonZeroUsize::MIN, ColumnClamp::Global);

        let blurred = apply_sequential(&img, reg.resolve("blur"));
        let manual = apply_sequential(&blurred, reg.resolve("edge"));
        assert_eq!(chained, manual);
    }

    #[test]
    fn unknown_names_pass_through() {
        let reg = KernelRegistry::builtin();
        let img = sample_image();
        let ops = reg.resolve_all(&["no-such-filter", "IDENTITY"]);
        let out = run_chain(&img, &ops, NonZeroUsize::new(3).expect("3"), ColumnClamp::Global);
        assert_eq!(out, img);
    }

    #[test]
    fn empty_chain_copies_input() {
        let img = sample_image();
        assert_eq!(run_chain(&img, &[], NonZeroUsize::MIN, ColumnClamp::Global), img);
    }
}
