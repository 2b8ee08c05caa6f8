use convnet_device::CommandQueue;
use rayon::prelude::*;

/// Copies every example into its zero-filled slot of the padded buffer.
///
/// Each padded slot is wiped before the scatter so no values from a previous
/// mini-batch survive in the border.
///
/// # Arguments
///
/// * `queue` - The command queue to dispatch on.
/// * `table` - Padding lookup table, one padded index per unpadded unit.
/// * `src` - Unpadded mini-batch of shape `[B, unpadded_units]`.
/// * `dst` - Padded mini-batch of shape `[B, padded_units]`.
/// * `unpadded_units` - Units of one unpadded example.
/// * `padded_units` - Units of one padded example.
pub fn zero_pad(
    queue: &CommandQueue,
    table: &[i32],
    src: &[f32],
    dst: &mut [f32],
    unpadded_units: usize,
    padded_units: usize,
) {
    assert_eq!(table.len(), unpadded_units, "Padding table size mismatch");
    assert_eq!(
        src.len() / unpadded_units,
        dst.len() / padded_units,
        "Mini-batch size mismatch"
    );

    queue.enqueue("zero_pad", || {
        src.par_chunks_exact(unpadded_units)
            .zip(dst.par_chunks_exact_mut(padded_units))
            .for_each(|(src_example, dst_example)| {
                dst_example.fill(0.0);
                for (&value, &index) in src_example.iter().zip(table) {
                    dst_example[index as usize] = value;
                }
            });
    });
}

/// Gathers the core of every padded example back into the unpadded buffer.
///
/// This is the adjoint of [`zero_pad`]; border cells are dropped.
///
/// # Arguments
///
/// * `queue` - The command queue to dispatch on.
/// * `table` - Padding lookup table, one padded index per unpadded unit.
/// * `src` - Padded mini-batch of shape `[B, padded_units]`.
/// * `dst` - Unpadded mini-batch of shape `[B, unpadded_units]`.
/// * `unpadded_units` - Units of one unpadded example.
/// * `padded_units` - Units of one padded example.
pub fn zero_unpad(
    queue: &CommandQueue,
    table: &[i32],
    src: &[f32],
    dst: &mut [f32],
    unpadded_units: usize,
    padded_units: usize,
) {
    assert_eq!(table.len(), unpadded_units, "Padding table size mismatch");
    assert_eq!(
        src.len() / padded_units,
        dst.len() / unpadded_units,
        "Mini-batch size mismatch"
    );

    queue.enqueue("zero_unpad", || {
        dst.par_chunks_exact_mut(unpadded_units)
            .zip(src.par_chunks_exact(padded_units))
            .for_each(|(dst_example, src_example)| {
                dst_example
                    .iter_mut()
                    .zip(table)
                    .for_each(|(value, &index)| *value = src_example[index as usize]);
            });
    });
}
