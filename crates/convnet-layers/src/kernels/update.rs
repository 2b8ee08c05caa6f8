use convnet_device::CommandQueue;
use rayon::prelude::*;

/// Momentum update: `speed = momentum * speed - learning_rate * (gradient + weight_decay * parameter)`.
///
/// # Arguments
///
/// * `queue` - The command queue to dispatch on.
/// * `speeds` - Momentum accumulators, updated in place.
/// * `gradients` - Gradients summed over the mini-batch.
/// * `parameters` - Current parameter values, used by the decay term.
/// * `learning_rate` - Step size.
/// * `momentum` - Momentum coefficient.
/// * `weight_decay` - L2 decay coefficient; pass `0.0` for biases.
pub fn update_speeds(
    queue: &CommandQueue,
    speeds: &mut [f32],
    gradients: &[f32],
    parameters: &[f32],
    learning_rate: f32,
    momentum: f32,
    weight_decay: f32,
) {
    assert_eq!(speeds.len(), gradients.len(), "Gradient size mismatch");
    assert_eq!(speeds.len(), parameters.len(), "Parameter size mismatch");

    queue.enqueue("update_speeds", || {
        speeds
            .par_iter_mut()
            .zip(gradients.par_iter().zip(parameters.par_iter()))
            .for_each(|(speed, (&gradient, &parameter))| {
                *speed = momentum * *speed - learning_rate * (gradient + weight_decay * parameter);
            });
    });
}

/// Applies the speeds: `parameter += speed`.
pub fn update_parameters(queue: &CommandQueue, parameters: &mut [f32], speeds: &[f32]) {
    assert_eq!(parameters.len(), speeds.len(), "Speed size mismatch");

    queue.enqueue("update_parameters", || {
        parameters
            .par_iter_mut()
            .zip(speeds.par_iter())
            .for_each(|(parameter, &speed)| *parameter += speed);
    });
}

/// Rescales every filter whose L2 norm exceeds `max_norm` back onto the norm ball.
///
/// `w = w * min(1, max_norm / |w|)`, one work-item per filter. Filters under
/// the limit are left untouched. An infinite `max_norm` dispatches nothing.
///
/// # Arguments
///
/// * `queue` - The command queue to dispatch on.
/// * `weights` - Weight matrix of shape `[n_filters, receptive_field_size]`.
/// * `receptive_field_size` - Length of one filter row.
/// * `max_norm` - Largest allowed filter norm.
pub fn constrain_weight_norm(queue: &CommandQueue, weights: &mut [f32], receptive_field_size: usize, max_norm: f32) {
    if max_norm.is_infinite() {
        return;
    }

    queue.enqueue("constrain_weight_norm", || {
        weights
            .par_chunks_exact_mut(receptive_field_size)
            .for_each(|filter| {
                let norm = filter.iter().map(|w| w * w).sum::<f32>().sqrt();
                if norm > max_norm {
                    let scale = max_norm / norm;
                    filter.iter_mut().for_each(|w| *w *= scale);
                }
            });
    });
}
