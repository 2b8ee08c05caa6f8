//! Device kernels of the convolutional layer.
//!
//! Every function enqueues one or more kernels on the given [`convnet_device::CommandQueue`].
//! Callers must [`convnet_device::CommandQueue::finish`] before reading the results.

mod convolution;
mod dropout;
mod padding;
mod update;

pub use convolution::{convolve_backward, convolve_forward, parameter_gradients};
pub use dropout::generate_dropout_mask;
pub use padding::{zero_pad, zero_unpad};
pub use update::{constrain_weight_norm, update_parameters, update_speeds};
