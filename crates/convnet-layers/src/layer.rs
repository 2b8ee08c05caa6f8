use convnet_device::NeuronsHandle;

use crate::error::LayerError;

/// The view a downstream layer has of its upstream neighbour.
pub trait Layer {
    /// Output volume as `(depth, height, width)`.
    ///
    /// # Errors
    ///
    /// Returns [`LayerError::NotConnected`] if the shape is not known yet.
    fn output_shape(&self) -> Result<(usize, usize, usize), LayerError>;

    /// Handle to the output neurons; the caller becomes the writer of their deltas.
    ///
    /// # Errors
    ///
    /// Returns [`LayerError::NotConnected`] if the neurons are not allocated yet.
    fn output_neurons(&self) -> Result<NeuronsHandle, LayerError>;
}

/// Whether a forward pass is part of training.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ForwardMode {
    /// Plain evaluation, no dropout.
    Inference,
    /// Training pass; a fresh dropout mask is drawn when `dropout_parameter < 1`.
    Training {
        /// Keep probability of each output unit.
        dropout_parameter: f32,
        /// Seed of the dropout mask for this pass.
        seed: u64,
    },
}
