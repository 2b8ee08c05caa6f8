use convnet_device::{CommandQueue, Neurons, NeuronsHandle};

use crate::{error::LayerError, layer::Layer};

/// Source of mini-batches at the bottom of the network.
///
/// Holds the input volume of every example of the mini-batch and receives the
/// input gradient written back by the first convolutional layer.
#[derive(Debug)]
pub struct InputLayer {
    queue: CommandQueue,
    shape: (usize, usize, usize),
    neurons: NeuronsHandle,
}

impl InputLayer {
    /// Allocates the input neurons for volumes of `(depth, height, width)`.
    ///
    /// # Errors
    ///
    /// Returns an error if a dimension is zero or the buffers cannot be allocated.
    pub fn new(
        queue: &CommandQueue,
        depth: usize,
        height: usize,
        width: usize,
        mini_batch_size: usize,
    ) -> Result<Self, LayerError> {
        for (name, value) in [
            ("depth", depth),
            ("height", height),
            ("width", width),
            ("mini_batch_size", mini_batch_size),
        ] {
            if value == 0 {
                return Err(LayerError::ZeroDimension(name));
            }
        }
        let n_units = depth
            .checked_mul(height)
            .and_then(|units| units.checked_mul(width))
            .ok_or(LayerError::SizeOverflow("input_units"))?;
        let neurons = Neurons::new(queue, n_units, mini_batch_size)?;
        Ok(Self {
            queue: queue.clone(),
            shape: (depth, height, width),
            neurons: NeuronsHandle::new(neurons),
        })
    }

    /// Number of examples per mini-batch.
    pub fn mini_batch_size(&self) -> Result<usize, LayerError> {
        Ok(self.neurons.read()?.mini_batch_size())
    }

    /// Uploads one mini-batch, example-major.
    ///
    /// # Errors
    ///
    /// Returns [`LayerError::BatchLength`] if `batch` does not hold exactly one mini-batch.
    pub fn feed(&self, batch: &[f32]) -> Result<(), LayerError> {
        let mut neurons = self.neurons.write()?;
        let expected = neurons.activations.len();
        if batch.len() != expected {
            return Err(LayerError::BatchLength {
                expected,
                actual: batch.len(),
            });
        }
        self.queue.write_buffer(&mut neurons.activations, batch)?;
        Ok(())
    }

    /// Downloads the gradient of the loss with respect to the last fed mini-batch.
    ///
    /// # Errors
    ///
    /// Returns an error if the transfer fails.
    pub fn input_gradient(&self) -> Result<Vec<f32>, LayerError> {
        let neurons = self.neurons.read()?;
        let mut gradient = vec![0.0; neurons.deltas.len()];
        self.queue.read_buffer(&neurons.deltas, &mut gradient)?;
        Ok(gradient)
    }
}

impl Layer for InputLayer {
    fn output_shape(&self) -> Result<(usize, usize, usize), LayerError> {
        Ok(self.shape)
    }

    fn output_neurons(&self) -> Result<NeuronsHandle, LayerError> {
        Ok(self.neurons.clone())
    }
}
