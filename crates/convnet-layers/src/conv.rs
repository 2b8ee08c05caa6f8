use convnet_device::{CommandQueue, DeviceBuffer, Neurons, NeuronsHandle};
use rand::Rng;

use crate::{
    config::{ConvLayerConfig, HyperParameters},
    error::LayerError,
    geometry::LayerGeometry,
    kernels,
    layer::{ForwardMode, Layer},
    lookup::LookupTables,
    parameters::{Initialization, ParameterStore},
    snapshot::ParameterSnapshot,
};

/// Everything that exists once the layer knows its input volume.
#[derive(Debug)]
struct Connection {
    geometry: LayerGeometry,
    tables: LookupTables,
    input: NeuronsHandle,
    output: NeuronsHandle,
    /// Padded copy of the input; `None` without zero padding.
    padded_input: Option<DeviceBuffer<f32>>,
    /// Padded input gradient; `None` without zero padding.
    padded_gradient: Option<DeviceBuffer<f32>>,
    dropout_mask: DeviceBuffer<bool>,
    /// The mask of the last forward pass must be applied to the deltas.
    mask_active: bool,
    has_forward: bool,
}

impl Connection {
    fn mask(&self) -> Option<&[bool]> {
        self.mask_active.then(|| self.dropout_mask.as_slice())
    }
}

/// A convolutional layer running on a [`CommandQueue`].
///
/// Lifecycle: [`ConvolutionalLayer::new`], [`ConvolutionalLayer::connect_to`] an
/// upstream [`Layer`], [`ConvolutionalLayer::initialize_parameters`], then for
/// each mini-batch [`ConvolutionalLayer::feed_forward`] and, when training,
/// [`ConvolutionalLayer::back_propagate`], [`ConvolutionalLayer::update_speeds`]
/// and [`ConvolutionalLayer::update_parameters`].
///
/// Every phase ends with a `finish` barrier on the queue, so each phase reads
/// fully written outputs of the previous one.
#[derive(Debug)]
pub struct ConvolutionalLayer {
    config: ConvLayerConfig,
    queue: CommandQueue,
    connection: Option<Connection>,
    parameters: Option<ParameterStore>,
}

impl ConvolutionalLayer {
    /// Creates an unconnected layer.
    pub fn new(config: ConvLayerConfig, queue: &CommandQueue) -> Self {
        Self {
            config,
            queue: queue.clone(),
            connection: None,
            parameters: None,
        }
    }

    /// Static configuration of the layer.
    pub fn config(&self) -> &ConvLayerConfig {
        &self.config
    }

    /// Geometry of the layer once connected.
    pub fn geometry(&self) -> Option<&LayerGeometry> {
        self.connection.as_ref().map(|c| &c.geometry)
    }

    /// Lookup tables of the layer once connected.
    pub fn lookup_tables(&self) -> Option<&LookupTables> {
        self.connection.as_ref().map(|c| &c.tables)
    }

    /// Parameter store once initialized.
    pub fn parameter_store(&self) -> Option<&ParameterStore> {
        self.parameters.as_ref()
    }

    /// Connects the layer to its upstream neighbour.
    ///
    /// Validates the geometry, builds the lookup tables and allocates the output
    /// neurons and scratch buffers. Configuration errors are reported before any
    /// buffer is allocated.
    ///
    /// # Errors
    ///
    /// Returns an error for an impossible geometry or if allocation fails.
    pub fn connect_to(&mut self, upstream: &dyn Layer) -> Result<(), LayerError> {
        let geometry = LayerGeometry::from_config(&self.config, upstream.output_shape()?)?;
        let tables = LookupTables::build(&geometry)?;
        let input = upstream.output_neurons()?;
        let mini_batch_size = input.read()?.mini_batch_size();

        let output = Neurons::new(&self.queue, geometry.output_units(), mini_batch_size)?;
        let (padded_input, padded_gradient) = if geometry.is_padded() {
            let len = mini_batch_size
                .checked_mul(geometry.padded_input_units())
                .ok_or(LayerError::SizeOverflow("padded_input"))?;
            (
                Some(self.queue.create_buffer(len)?),
                Some(self.queue.create_buffer(len)?),
            )
        } else {
            (None, None)
        };
        let dropout_mask = self.queue.create_buffer(output.activations.len())?;

        log::debug!(
            "connected conv layer: {}x{}x{} -> {}x{}x{}, filter {} stride {} padding {}, mini-batch {}",
            geometry.input_depth(),
            geometry.input_height(),
            geometry.input_width(),
            geometry.output_depth(),
            geometry.output_height(),
            geometry.output_width(),
            geometry.filter_size(),
            geometry.stride_length(),
            geometry.zero_padding(),
            mini_batch_size
        );

        self.connection = Some(Connection {
            geometry,
            tables,
            input,
            output: NeuronsHandle::new(output),
            padded_input,
            padded_gradient,
            dropout_mask,
            mask_active: false,
            has_forward: false,
        });
        self.parameters = None;
        Ok(())
    }

    /// Initializes weights, biases, gradients and speeds.
    ///
    /// # Errors
    ///
    /// Returns [`LayerError::NotConnected`] before [`ConvolutionalLayer::connect_to`],
    /// or an error from [`ParameterStore::new`].
    pub fn initialize_parameters<R: Rng + ?Sized>(
        &mut self,
        init: Initialization,
        rng: &mut R,
    ) -> Result<(), LayerError> {
        let connection = self.connection.as_ref().ok_or(LayerError::NotConnected)?;
        self.parameters = Some(ParameterStore::new(&self.queue, &connection.geometry, init, rng)?);
        Ok(())
    }

    fn parts(&mut self) -> Result<(&mut Connection, &mut ParameterStore), LayerError> {
        let connection = self.connection.as_mut().ok_or(LayerError::NotConnected)?;
        let parameters = self.parameters.as_mut().ok_or(LayerError::NotInitialized)?;
        Ok((connection, parameters))
    }

    /// Runs the forward pass: pad, draw the dropout mask, convolve.
    ///
    /// # Errors
    ///
    /// Returns an error if the layer is not connected and initialized, if the
    /// dropout parameter is outside `(0, 1]`, or on device failure.
    pub fn feed_forward(&mut self, mode: ForwardMode) -> Result<(), LayerError> {
        if let ForwardMode::Training {
            dropout_parameter, ..
        } = mode
        {
            // NaN fails the comparison
            if !(dropout_parameter > 0.0 && dropout_parameter <= 1.0) {
                return Err(LayerError::InvalidHyperParameter {
                    name: "dropout_parameter",
                    value: dropout_parameter,
                });
            }
        }

        let queue = self.queue.clone();
        let (connection, parameters) = self.parts()?;
        let geometry = connection.geometry;

        let input = connection.input.read()?;
        let mut output = connection.output.write()?;

        let source: &[f32] = match connection.padded_input.as_mut() {
            Some(padded) => {
                kernels::zero_pad(
                    &queue,
                    connection.tables.padding(),
                    input.activations.as_slice(),
                    padded.as_mut_slice(),
                    geometry.input_units(),
                    geometry.padded_input_units(),
                );
                queue.finish()?;
                padded.as_slice()
            }
            None => input.activations.as_slice(),
        };

        connection.mask_active = match mode {
            ForwardMode::Training {
                dropout_parameter,
                seed,
            } if dropout_parameter < 1.0 => {
                kernels::generate_dropout_mask(
                    &queue,
                    connection.dropout_mask.as_mut_slice(),
                    geometry.output_units(),
                    dropout_parameter,
                    seed,
                );
                queue.finish()?;
                true
            }
            _ => false,
        };
        let mask = connection.mask_active.then(|| connection.dropout_mask.as_slice());

        kernels::convolve_forward(
            &queue,
            &geometry,
            &connection.tables,
            source,
            parameters.weights.as_slice(),
            parameters.biases.as_slice(),
            mask,
            output.activations.as_mut_slice(),
        );
        queue.finish()?;

        connection.has_forward = true;
        Ok(())
    }

    /// Runs the backward pass: gradient of the loss with respect to the input.
    ///
    /// Reads the deltas the downstream layer wrote into the output neurons and
    /// overwrites the deltas of the input neurons.
    ///
    /// # Errors
    ///
    /// Returns an error if no forward pass preceded it, or on device failure.
    pub fn back_propagate(&mut self) -> Result<(), LayerError> {
        let queue = self.queue.clone();
        let (connection, parameters) = self.parts()?;
        if !connection.has_forward {
            return Err(LayerError::NoForwardPass);
        }
        let geometry = connection.geometry;
        let mask = connection
            .mask_active
            .then(|| connection.dropout_mask.as_slice());

        let output = connection.output.read()?;
        let mut input = connection.input.write()?;

        match connection.padded_gradient.as_mut() {
            Some(padded_gradient) => {
                kernels::convolve_backward(
                    &queue,
                    &geometry,
                    &connection.tables,
                    parameters.weights.as_slice(),
                    output.deltas.as_slice(),
                    mask,
                    padded_gradient,
                )?;
                queue.finish()?;
                kernels::zero_unpad(
                    &queue,
                    connection.tables.padding(),
                    padded_gradient.as_slice(),
                    input.deltas.as_mut_slice(),
                    geometry.input_units(),
                    geometry.padded_input_units(),
                );
                queue.finish()?;
            }
            None => {
                kernels::convolve_backward(
                    &queue,
                    &geometry,
                    &connection.tables,
                    parameters.weights.as_slice(),
                    output.deltas.as_slice(),
                    mask,
                    &mut input.deltas,
                )?;
                queue.finish()?;
            }
        }
        Ok(())
    }

    /// Computes the weight and bias gradients of the last mini-batch.
    ///
    /// Gradients are summed over the examples of the mini-batch.
    ///
    /// # Errors
    ///
    /// Returns an error if no forward pass preceded it, or on device failure.
    pub fn compute_parameter_gradients(&mut self) -> Result<(), LayerError> {
        let queue = self.queue.clone();
        let (connection, parameters) = self.parts()?;
        if !connection.has_forward {
            return Err(LayerError::NoForwardPass);
        }
        let mask = connection.mask();

        let input = connection.input.read()?;
        let output = connection.output.read()?;
        let source = match connection.padded_input.as_ref() {
            Some(padded) => padded.as_slice(),
            None => input.activations.as_slice(),
        };

        kernels::parameter_gradients(
            &queue,
            &connection.geometry,
            &connection.tables,
            source,
            output.deltas.as_slice(),
            mask,
            parameters.weight_gradients.as_mut_slice(),
            parameters.bias_gradients.as_mut_slice(),
        );
        queue.finish()?;
        Ok(())
    }

    /// Computes the gradients and folds them into the momentum speeds.
    ///
    /// `speed = momentum * speed - learning_rate * (gradient + weight_decay * weight)`;
    /// biases are not decayed.
    ///
    /// # Errors
    ///
    /// Returns an error for invalid hyper-parameters, if no forward pass preceded
    /// it, or on device failure.
    pub fn update_speeds(&mut self, hyper: &HyperParameters) -> Result<(), LayerError> {
        hyper.validate()?;
        self.compute_parameter_gradients()?;

        let queue = self.queue.clone();
        let (_, parameters) = self.parts()?;
        kernels::update_speeds(
            &queue,
            parameters.weight_speeds.as_mut_slice(),
            parameters.weight_gradients.as_slice(),
            parameters.weights.as_slice(),
            hyper.learning_rate,
            hyper.momentum,
            hyper.weight_decay,
        );
        kernels::update_speeds(
            &queue,
            parameters.bias_speeds.as_mut_slice(),
            parameters.bias_gradients.as_slice(),
            parameters.biases.as_slice(),
            hyper.learning_rate,
            hyper.momentum,
            0.0,
        );
        queue.finish()?;
        Ok(())
    }

    /// Applies the speeds to the parameters, then enforces the max-norm constraint.
    ///
    /// With an infinite `weight_max_norm` the constraint is skipped entirely.
    ///
    /// # Errors
    ///
    /// Returns an error for invalid hyper-parameters, if the layer is not
    /// initialized, or on device failure.
    pub fn update_parameters(&mut self, hyper: &HyperParameters) -> Result<(), LayerError> {
        hyper.validate()?;
        let queue = self.queue.clone();
        let (_, parameters) = self.parts()?;

        kernels::update_parameters(
            &queue,
            parameters.weights.as_mut_slice(),
            parameters.weight_speeds.as_slice(),
        );
        kernels::update_parameters(
            &queue,
            parameters.biases.as_mut_slice(),
            parameters.bias_speeds.as_slice(),
        );
        queue.finish()?;

        if hyper.weight_max_norm.is_finite() {
            let receptive_field_size = parameters.receptive_field_size();
            kernels::constrain_weight_norm(
                &queue,
                parameters.weights.as_mut_slice(),
                receptive_field_size,
                hyper.weight_max_norm,
            );
            queue.finish()?;
        }
        Ok(())
    }

    /// Flattened parameters for gradient checking, weights followed by biases.
    ///
    /// # Errors
    ///
    /// Returns [`LayerError::NotInitialized`] before initialization.
    pub fn parameters(&mut self) -> Result<Vec<f64>, LayerError> {
        self.store_mut()?.parameters()
    }

    /// Overwrites the parameters from a flattened vector, weights followed by biases.
    ///
    /// # Errors
    ///
    /// Returns an error before initialization or for a vector of the wrong length.
    pub fn set_parameters(&mut self, parameters: &[f64]) -> Result<(), LayerError> {
        self.store_mut()?.set_parameters(parameters)
    }

    /// Flattened gradients of the last [`ConvolutionalLayer::compute_parameter_gradients`].
    ///
    /// # Errors
    ///
    /// Returns [`LayerError::NotInitialized`] before initialization.
    pub fn parameter_gradients(&self) -> Result<Vec<f64>, LayerError> {
        self.parameters
            .as_ref()
            .ok_or(LayerError::NotInitialized)?
            .parameter_gradients()
    }

    /// Captures weights and biases for persistence.
    ///
    /// # Errors
    ///
    /// Returns an error if the layer is not connected and initialized.
    pub fn snapshot(&mut self) -> Result<ParameterSnapshot, LayerError> {
        let (connection, parameters) = self.parts()?;
        parameters.download()?;
        Ok(ParameterSnapshot {
            input_depth: connection.geometry.input_depth(),
            filter_size: connection.geometry.filter_size(),
            n_filters: connection.geometry.n_filters(),
            weights: parameters.host_weights().to_vec(),
            biases: parameters.host_biases().to_vec(),
        })
    }

    /// Restores weights and biases from a snapshot; gradients and speeds are cleared.
    ///
    /// # Errors
    ///
    /// Returns [`LayerError::SnapshotMismatch`] if the snapshot does not fit the geometry.
    pub fn restore(&mut self, snapshot: &ParameterSnapshot) -> Result<(), LayerError> {
        let (connection, parameters) = self.parts()?;
        snapshot.check_geometry(&connection.geometry)?;
        parameters.load(&snapshot.weights, &snapshot.biases)
    }

    /// Downloads the activations of the last forward pass.
    ///
    /// # Errors
    ///
    /// Returns [`LayerError::NotConnected`] before connection.
    pub fn read_output(&self) -> Result<Vec<f32>, LayerError> {
        let connection = self.connection.as_ref().ok_or(LayerError::NotConnected)?;
        let output = connection.output.read()?;
        let mut host = vec![0.0; output.activations.len()];
        self.queue.read_buffer(&output.activations, &mut host)?;
        Ok(host)
    }

    /// Uploads output deltas, standing in for a downstream layer.
    ///
    /// # Errors
    ///
    /// Returns [`LayerError::BatchLength`] if `deltas` does not match the output neurons.
    pub fn write_output_delta(&self, deltas: &[f32]) -> Result<(), LayerError> {
        let connection = self.connection.as_ref().ok_or(LayerError::NotConnected)?;
        let mut output = connection.output.write()?;
        let expected = output.deltas.len();
        if deltas.len() != expected {
            return Err(LayerError::BatchLength {
                expected,
                actual: deltas.len(),
            });
        }
        self.queue.write_buffer(&mut output.deltas, deltas)?;
        Ok(())
    }

    fn store_mut(&mut self) -> Result<&mut ParameterStore, LayerError> {
        self.parameters.as_mut().ok_or(LayerError::NotInitialized)
    }
}

impl Layer for ConvolutionalLayer {
    fn output_shape(&self) -> Result<(usize, usize, usize), LayerError> {
        let geometry = self.geometry().ok_or(LayerError::NotConnected)?;
        Ok((
            geometry.output_depth(),
            geometry.output_height(),
            geometry.output_width(),
        ))
    }

    fn output_neurons(&self) -> Result<NeuronsHandle, LayerError> {
        self.connection
            .as_ref()
            .map(|c| c.output.clone())
            .ok_or(LayerError::NotConnected)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::input::InputLayer;
    use convnet_device::ExecutionStrategy;
    use rand::{rngs::StdRng, SeedableRng};

    fn setup(
        config: ConvLayerConfig,
        shape: (usize, usize, usize),
        batch: usize,
    ) -> Result<(CommandQueue, InputLayer, ConvolutionalLayer), LayerError> {
        let queue = CommandQueue::new(ExecutionStrategy::Serial)?;
        let input = InputLayer::new(&queue, shape.0, shape.1, shape.2, batch)?;
        let mut layer = ConvolutionalLayer::new(config, &queue);
        layer.connect_to(&input)?;
        Ok((queue, input, layer))
    }

    #[test]
    fn test_misuse_is_reported() -> Result<(), LayerError> {
        let queue = CommandQueue::new(ExecutionStrategy::Serial)?;
        let mut layer = ConvolutionalLayer::new(ConvLayerConfig::new(2, 1), &queue);
        let mut rng = StdRng::seed_from_u64(0);

        assert_eq!(layer.feed_forward(ForwardMode::Inference), Err(LayerError::NotConnected));
        assert_eq!(
            layer.initialize_parameters(Initialization::Random, &mut rng),
            Err(LayerError::NotConnected)
        );
        assert_eq!(layer.output_shape(), Err(LayerError::NotConnected));

        let input = InputLayer::new(&queue, 1, 3, 3, 1)?;
        layer.connect_to(&input)?;
        assert_eq!(layer.feed_forward(ForwardMode::Inference), Err(LayerError::NotInitialized));

        layer.initialize_parameters(Initialization::Random, &mut rng)?;
        assert_eq!(layer.back_propagate(), Err(LayerError::NoForwardPass));
        assert_eq!(layer.output_shape()?, (1, 2, 2));
        Ok(())
    }

    #[test]
    fn test_impossible_geometry_fails_at_connection() -> Result<(), LayerError> {
        let queue = CommandQueue::new(ExecutionStrategy::Serial)?;
        let input = InputLayer::new(&queue, 1, 3, 3, 1)?;
        let mut layer = ConvolutionalLayer::new(ConvLayerConfig::new(4, 1), &queue);
        assert!(matches!(
            layer.connect_to(&input),
            Err(LayerError::FilterTooLarge { .. })
        ));
        assert!(layer.geometry().is_none());
        Ok(())
    }

    #[test]
    fn test_forward_with_padding() -> Result<(), LayerError> {
        let (_, input, mut layer) = setup(ConvLayerConfig::new(3, 1).with_padding(1), (1, 3, 3), 1)?;
        let init = Initialization::Load {
            weights: vec![1.0; 9],
            biases: vec![0.5],
        };
        layer.initialize_parameters(init, &mut StdRng::seed_from_u64(0))?;

        input.feed(&(1..=9).map(|x| x as f32).collect::<Vec<_>>())?;
        layer.feed_forward(ForwardMode::Inference)?;

        // box sums of the 3x3 neighbourhood, zeros outside the input
        #[rustfmt::skip]
        let expected = vec![
            12.5, 21.5, 16.5,
            27.5, 45.5, 33.5,
            24.5, 39.5, 28.5,
        ];
        assert_eq!(layer.read_output()?, expected);
        Ok(())
    }

    #[test]
    fn test_backward_with_padding_unpads() -> Result<(), LayerError> {
        let (_, input, mut layer) = setup(ConvLayerConfig::new(3, 1).with_padding(1), (1, 3, 3), 1)?;
        let init = Initialization::Load {
            weights: (1..=9).map(|x| x as f32).collect(),
            biases: vec![0.0],
        };
        layer.initialize_parameters(init, &mut StdRng::seed_from_u64(0))?;

        input.feed(&[0.0; 9])?;
        layer.feed_forward(ForwardMode::Inference)?;
        // only output (0, 0) has a delta: its window is centred on input (0, 0)
        let mut delta = vec![0.0; 9];
        delta[0] = 1.0;
        layer.write_output_delta(&delta)?;
        layer.back_propagate()?;

        // input (y, x) sits at filter offset (y + 1, x + 1) of that window
        assert_eq!(
            input.input_gradient()?,
            vec![5.0, 6.0, 0.0, 8.0, 9.0, 0.0, 0.0, 0.0, 0.0]
        );
        Ok(())
    }

    #[test]
    fn test_snapshot_restore() -> Result<(), Box<dyn std::error::Error>> {
        let (_, _input, mut layer) = setup(ConvLayerConfig::new(2, 2), (1, 3, 3), 1)?;
        layer.initialize_parameters(Initialization::Random, &mut StdRng::seed_from_u64(3))?;
        let snapshot = layer.snapshot()?;
        let bytes = snapshot.to_bytes()?;

        layer.set_parameters(&[0.0; 10])?;
        layer.restore(&ParameterSnapshot::from_bytes(&bytes)?)?;
        let restored: Vec<f32> = layer.parameters()?.iter().map(|&x| x as f32).collect();
        let expected: Vec<f32> = snapshot.weights.iter().chain(&snapshot.biases).copied().collect();
        assert_eq!(restored, expected);
        Ok(())
    }
}
