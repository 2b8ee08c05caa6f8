use convnet_device::CommandQueue;
use rand::{rngs::StdRng, Rng, SeedableRng};
use rayon::prelude::*;

// decorrelates the per-example streams derived from one seed
const EXAMPLE_STREAM: u64 = 0x9E37_79B9_7F4A_7C15;

/// Draws a fresh dropout mask: unit kept with probability `keep_probability`.
///
/// Every example draws from its own generator, seeded from `seed` and the
/// example index, so the mask depends only on the seed and not on how the
/// work is scheduled.
///
/// # Arguments
///
/// * `queue` - The command queue to dispatch on.
/// * `mask` - Destination of shape `[B, n_units]`.
/// * `n_units` - Units per example.
/// * `keep_probability` - Probability of keeping a unit.
/// * `seed` - Seed supplied by the caller for this forward pass.
pub fn generate_dropout_mask(
    queue: &CommandQueue,
    mask: &mut [bool],
    n_units: usize,
    keep_probability: f32,
    seed: u64,
) {
    queue.enqueue("generate_dropout_mask", || {
        mask.par_chunks_exact_mut(n_units)
            .enumerate()
            .for_each(|(example, example_mask)| {
                let stream = seed ^ (example as u64 + 1).wrapping_mul(EXAMPLE_STREAM);
                let mut rng = StdRng::seed_from_u64(stream);
                example_mask
                    .iter_mut()
                    .for_each(|keep| *keep = rng.random::<f32>() < keep_probability);
            });
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use convnet_device::{DeviceError, ExecutionStrategy};

    #[test]
    fn test_same_seed_same_mask() -> Result<(), DeviceError> {
        let serial = CommandQueue::new(ExecutionStrategy::Serial)?;
        let parallel = CommandQueue::new(ExecutionStrategy::Fixed(4))?;

        let mut first = vec![false; 4 * 100];
        let mut second = vec![false; 4 * 100];
        generate_dropout_mask(&serial, &mut first, 100, 0.5, 7);
        generate_dropout_mask(&parallel, &mut second, 100, 0.5, 7);
        serial.finish()?;
        parallel.finish()?;
        assert_eq!(first, second);

        let mut other = vec![false; 4 * 100];
        generate_dropout_mask(&serial, &mut other, 100, 0.5, 8);
        serial.finish()?;
        assert_ne!(first, other);
        Ok(())
    }

    #[test]
    fn test_keep_rate() -> Result<(), DeviceError> {
        let queue = CommandQueue::new(ExecutionStrategy::ParallelElements)?;
        let mut mask = vec![false; 8 * 2500];
        generate_dropout_mask(&queue, &mut mask, 2500, 0.8, 1234);
        queue.finish()?;

        let kept = mask.iter().filter(|&&keep| keep).count() as f32 / mask.len() as f32;
        assert!((kept - 0.8).abs() < 0.02, "kept fraction {kept}");
        Ok(())
    }

    #[test]
    fn test_examples_draw_different_masks() -> Result<(), DeviceError> {
        let queue = CommandQueue::new(ExecutionStrategy::Serial)?;
        let mut mask = vec![false; 2 * 64];
        generate_dropout_mask(&queue, &mut mask, 64, 0.5, 99);
        queue.finish()?;
        assert_ne!(&mask[..64], &mask[64..]);
        Ok(())
    }
}
