use std::sync::atomic::Ordering;

use convnet_device::{CommandQueue, DeviceBuffer, DeviceError};
use rayon::prelude::*;

use crate::{geometry::LayerGeometry, lookup::LookupTables};

#[inline]
fn masked(delta: f32, mask: Option<&[bool]>, index: usize) -> f32 {
    match mask {
        Some(mask) if !mask[index] => 0.0,
        _ => delta,
    }
}

/// Forward convolution: `output[f, r] = sum_k weights[f, k] * input[table[k, r]] + bias[f]`.
///
/// The receptive-field table is consulted while the kernel runs; no unrolled
/// matrix is materialized. Each output unit is one work-item that accumulates
/// its dot product in a fixed order, so the result is bit-reproducible for a
/// given input and mask. Units dropped by `mask` are written as zero.
///
/// # Arguments
///
/// * `queue` - The command queue to dispatch on.
/// * `geometry` - Layer geometry.
/// * `tables` - Lookup tables of the geometry.
/// * `input` - Mini-batch input of shape `[B, padded_input_units]`.
/// * `weights` - Weight matrix of shape `[n_filters, receptive_field_size]`.
/// * `biases` - Biases of shape `[n_filters]`.
/// * `mask` - Optional dropout mask of shape `[B, output_units]`.
/// * `output` - Mini-batch output of shape `[B, output_units]`.
#[allow(clippy::too_many_arguments)]
pub fn convolve_forward(
    queue: &CommandQueue,
    geometry: &LayerGeometry,
    tables: &LookupTables,
    input: &[f32],
    weights: &[f32],
    biases: &[f32],
    mask: Option<&[bool]>,
    output: &mut [f32],
) {
    let in_units = geometry.padded_input_units();
    let out_units = geometry.output_units();
    let field_size = geometry.receptive_field_size();
    let n_fields = geometry.n_receptive_fields();
    let table = tables.receptive_field();

    assert_eq!(weights.len(), geometry.n_weights(), "Weight size mismatch");
    assert_eq!(biases.len(), geometry.n_filters(), "Bias size mismatch");
    assert_eq!(input.len() / in_units, output.len() / out_units, "Mini-batch size mismatch");
    if let Some(mask) = mask {
        assert_eq!(mask.len(), output.len(), "Dropout mask size mismatch");
    }

    queue.enqueue("convolve_forward", || {
        output
            .par_chunks_exact_mut(out_units)
            .zip(input.par_chunks_exact(in_units))
            .enumerate()
            .for_each(|(example, (out_example, in_example))| {
                out_example
                    .par_iter_mut()
                    .enumerate()
                    .for_each(|(unit, out)| {
                        if let Some(mask) = mask {
                            if !mask[example * out_units + unit] {
                                *out = 0.0;
                                return;
                            }
                        }
                        let (filter, field) = (unit / n_fields, unit % n_fields);
                        let filter_weights = &weights[filter * field_size..(filter + 1) * field_size];
                        let sum = filter_weights
                            .iter()
                            .enumerate()
                            .map(|(k, &w)| w * in_example[table[k * n_fields + field] as usize])
                            .sum::<f32>();
                        *out = sum + biases[filter];
                    });
            });
    });
}

/// Backward convolution: gradient of the loss with respect to the layer input.
///
/// Every output unit scatters `weights[f, k] * delta[f, r]` into the input
/// position `table[k, r]`. Overlapping receptive fields hit the same position,
/// so contributions are accumulated with atomic adds. The destination is
/// zero-wiped, and the wipe is finished, before any contribution lands.
///
/// # Arguments
///
/// * `queue` - The command queue to dispatch on.
/// * `geometry` - Layer geometry.
/// * `tables` - Lookup tables of the geometry.
/// * `weights` - Weight matrix of shape `[n_filters, receptive_field_size]`.
/// * `output_delta` - Output deltas of shape `[B, output_units]`.
/// * `mask` - Dropout mask of the matching forward pass, if any.
/// * `input_gradient` - Destination of shape `[B, padded_input_units]`.
///
/// # Errors
///
/// Returns an error if the barrier after the wipe fails.
pub fn convolve_backward(
    queue: &CommandQueue,
    geometry: &LayerGeometry,
    tables: &LookupTables,
    weights: &[f32],
    output_delta: &[f32],
    mask: Option<&[bool]>,
    input_gradient: &mut DeviceBuffer<f32>,
) -> Result<(), DeviceError> {
    let in_units = geometry.padded_input_units();
    let out_units = geometry.output_units();
    let field_size = geometry.receptive_field_size();
    let n_fields = geometry.n_receptive_fields();
    let table = tables.receptive_field();

    assert_eq!(weights.len(), geometry.n_weights(), "Weight size mismatch");
    assert_eq!(
        output_delta.len() / out_units,
        input_gradient.len() / in_units,
        "Mini-batch size mismatch"
    );

    let gradient = input_gradient.as_mut_slice();
    queue.enqueue("wipe_input_gradient", || {
        gradient.par_iter_mut().for_each(|x| *x = 0.0);
    });
    queue.finish()?;

    let cells = input_gradient.as_atomic();
    queue.enqueue("convolve_backward", || {
        output_delta
            .par_chunks_exact(out_units)
            .enumerate()
            .for_each(|(example, delta_example)| {
                let cells_example = &cells[example * in_units..(example + 1) * in_units];
                delta_example
                    .par_iter()
                    .enumerate()
                    .for_each(|(unit, &delta)| {
                        let delta = masked(delta, mask, example * out_units + unit);
                        if delta == 0.0 {
                            return;
                        }
                        let (filter, field) = (unit / n_fields, unit % n_fields);
                        let filter_weights = &weights[filter * field_size..(filter + 1) * field_size];
                        for (k, &w) in filter_weights.iter().enumerate() {
                            let index = table[k * n_fields + field] as usize;
                            cells_example[index].fetch_add(w * delta, Ordering::Relaxed);
                        }
                    });
            });
    });
    Ok(())
}

/// Gradients of the loss with respect to weights and biases, summed over the mini-batch.
///
/// `weight_gradients[f, k] = sum_b sum_r delta[b, f, r] * input[b, table[k, r]]` and
/// `bias_gradients[f] = sum_b sum_r delta[b, f, r]`, with deltas masked by the
/// forward dropout mask. Each gradient element is owned by one work-item.
///
/// # Arguments
///
/// * `queue` - The command queue to dispatch on.
/// * `geometry` - Layer geometry.
/// * `tables` - Lookup tables of the geometry.
/// * `input` - Mini-batch input of the forward pass, shape `[B, padded_input_units]`.
/// * `output_delta` - Output deltas of shape `[B, output_units]`.
/// * `mask` - Dropout mask of the matching forward pass, if any.
/// * `weight_gradients` - Destination of shape `[n_filters, receptive_field_size]`.
/// * `bias_gradients` - Destination of shape `[n_filters]`.
#[allow(clippy::too_many_arguments)]
pub fn parameter_gradients(
    queue: &CommandQueue,
    geometry: &LayerGeometry,
    tables: &LookupTables,
    input: &[f32],
    output_delta: &[f32],
    mask: Option<&[bool]>,
    weight_gradients: &mut [f32],
    bias_gradients: &mut [f32],
) {
    let in_units = geometry.padded_input_units();
    let out_units = geometry.output_units();
    let field_size = geometry.receptive_field_size();
    let n_fields = geometry.n_receptive_fields();
    let table = tables.receptive_field();
    let batch = output_delta.len() / out_units;

    assert_eq!(weight_gradients.len(), geometry.n_weights(), "Weight size mismatch");
    assert_eq!(bias_gradients.len(), geometry.n_filters(), "Bias size mismatch");
    assert_eq!(input.len() / in_units, batch, "Mini-batch size mismatch");

    queue.enqueue("weight_gradients", || {
        weight_gradients
            .par_iter_mut()
            .enumerate()
            .for_each(|(index, gradient)| {
                let (filter, k) = (index / field_size, index % field_size);
                let offsets = &table[k * n_fields..(k + 1) * n_fields];
                let mut sum = 0.0f32;
                for example in 0..batch {
                    let in_example = &input[example * in_units..(example + 1) * in_units];
                    let base = example * out_units + filter * n_fields;
                    for (field, &offset) in offsets.iter().enumerate() {
                        let delta = masked(output_delta[base + field], mask, base + field);
                        sum += delta * in_example[offset as usize];
                    }
                }
                *gradient = sum;
            });
    });

    queue.enqueue("bias_gradients", || {
        bias_gradients
            .par_iter_mut()
            .enumerate()
            .for_each(|(filter, gradient)| {
                let mut sum = 0.0f32;
                for example in 0..batch {
                    let base = example * out_units + filter * n_fields;
                    for field in 0..n_fields {
                        sum += masked(output_delta[base + field], mask, base + field);
                    }
                }
                *gradient = sum;
            });
    });
}
