use convnet_device::{CommandQueue, DeviceBuffer};
use rand::Rng;

use crate::{error::LayerError, geometry::LayerGeometry};

/// Initial value of every bias.
pub const INITIAL_BIAS: f32 = 0.001;

/// How the parameters of a layer are initialized.
#[derive(Debug, Clone, PartialEq)]
pub enum Initialization {
    /// Gaussian weights with standard deviation `sqrt(2 / (filter_size^2 * input_depth))`
    /// and constant biases of [`INITIAL_BIAS`].
    Random,
    /// Upload values produced elsewhere, e.g. by a previous training run.
    Load {
        /// Weight matrix of shape `[n_filters, receptive_field_size]`, row-major.
        weights: Vec<f32>,
        /// Biases of shape `[n_filters]`.
        biases: Vec<f32>,
    },
}

/// Draws one sample of a zero-mean Gaussian with the Box–Muller transform.
pub fn sample_gaussian<R: Rng + ?Sized>(rng: &mut R, std_dev: f64) -> f64 {
    // shift to (0, 1] so the logarithm stays finite
    let u1 = 1.0 - rng.random::<f64>();
    let u2 = rng.random::<f64>();
    std_dev * (-2.0 * u1.ln()).sqrt() * (2.0 * std::f64::consts::PI * u2).cos()
}

/// Weights, biases, their gradients and momentum speeds.
///
/// The device buffers are authoritative during training. The host mirrors of
/// weights and biases are only synchronized on [`ParameterStore::upload`] and
/// [`ParameterStore::download`].
#[derive(Debug)]
pub struct ParameterStore {
    queue: CommandQueue,
    n_filters: usize,
    receptive_field_size: usize,
    pub(crate) weights: DeviceBuffer<f32>,
    pub(crate) biases: DeviceBuffer<f32>,
    pub(crate) weight_gradients: DeviceBuffer<f32>,
    pub(crate) bias_gradients: DeviceBuffer<f32>,
    pub(crate) weight_speeds: DeviceBuffer<f32>,
    pub(crate) bias_speeds: DeviceBuffer<f32>,
    host_weights: Vec<f32>,
    host_biases: Vec<f32>,
}

impl ParameterStore {
    /// Allocates and initializes the parameters of a layer.
    ///
    /// # Arguments
    ///
    /// * `queue` - The command queue owning the device buffers.
    /// * `geometry` - Layer geometry.
    /// * `init` - Initialization mode.
    /// * `rng` - Generator used by [`Initialization::Random`].
    ///
    /// # Errors
    ///
    /// Returns an error if loaded parameters have the wrong length or a buffer
    /// cannot be allocated.
    pub fn new<R: Rng + ?Sized>(
        queue: &CommandQueue,
        geometry: &LayerGeometry,
        init: Initialization,
        rng: &mut R,
    ) -> Result<Self, LayerError> {
        let n_weights = geometry.n_weights();
        let n_filters = geometry.n_filters();

        let (host_weights, host_biases) = match init {
            Initialization::Random => {
                let fan_in = geometry.receptive_field_size() as f64;
                let std_dev = (2.0 / fan_in).sqrt();
                let weights = (0..n_weights)
                    .map(|_| sample_gaussian(rng, std_dev) as f32)
                    .collect();
                log::debug!("sampled {n_weights} weights with std {std_dev:.4}");
                (weights, vec![INITIAL_BIAS; n_filters])
            }
            Initialization::Load { weights, biases } => {
                check_length(n_weights, weights.len())?;
                check_length(n_filters, biases.len())?;
                (weights, biases)
            }
        };

        let mut store = Self {
            queue: queue.clone(),
            n_filters,
            receptive_field_size: geometry.receptive_field_size(),
            weights: queue.create_buffer(n_weights)?,
            biases: queue.create_buffer(n_filters)?,
            weight_gradients: queue.create_buffer(n_weights)?,
            bias_gradients: queue.create_buffer(n_filters)?,
            weight_speeds: queue.create_buffer(n_weights)?,
            bias_speeds: queue.create_buffer(n_filters)?,
            host_weights,
            host_biases,
        };
        store.upload()?;
        Ok(store)
    }

    /// Replaces the parameters and clears gradients and speeds.
    ///
    /// # Errors
    ///
    /// Returns [`LayerError::ParameterLength`] if a vector has the wrong length.
    pub fn load(&mut self, weights: &[f32], biases: &[f32]) -> Result<(), LayerError> {
        check_length(self.host_weights.len(), weights.len())?;
        check_length(self.host_biases.len(), biases.len())?;
        self.host_weights.copy_from_slice(weights);
        self.host_biases.copy_from_slice(biases);
        self.upload()?;
        self.weight_gradients.fill(0.0);
        self.bias_gradients.fill(0.0);
        self.weight_speeds.fill(0.0);
        self.bias_speeds.fill(0.0);
        Ok(())
    }

    /// Copies the host mirrors to the device.
    ///
    /// # Errors
    ///
    /// Returns an error if the transfer fails.
    pub fn upload(&mut self) -> Result<(), LayerError> {
        self.queue.write_buffer(&mut self.weights, &self.host_weights)?;
        self.queue.write_buffer(&mut self.biases, &self.host_biases)?;
        Ok(())
    }

    /// Copies the device parameters to the host mirrors.
    ///
    /// # Errors
    ///
    /// Returns an error if the transfer fails.
    pub fn download(&mut self) -> Result<(), LayerError> {
        self.queue.read_buffer(&self.weights, &mut self.host_weights)?;
        self.queue.read_buffer(&self.biases, &mut self.host_biases)?;
        Ok(())
    }

    /// Host mirror of the weights, as of the last synchronization.
    pub fn host_weights(&self) -> &[f32] {
        &self.host_weights
    }

    /// Host mirror of the biases, as of the last synchronization.
    pub fn host_biases(&self) -> &[f32] {
        &self.host_biases
    }

    /// Number of filters.
    pub fn n_filters(&self) -> usize {
        self.n_filters
    }

    /// Length of one filter row.
    pub fn receptive_field_size(&self) -> usize {
        self.receptive_field_size
    }

    /// L2 norm of every filter on the device.
    pub fn filter_norms(&self) -> Vec<f32> {
        self.weights
            .as_slice()
            .chunks_exact(self.receptive_field_size)
            .map(|filter| filter.iter().map(|w| w * w).sum::<f32>().sqrt())
            .collect()
    }

    /// Flattened parameters, weights followed by biases.
    ///
    /// # Errors
    ///
    /// Returns an error if the device to host transfer fails.
    pub fn parameters(&mut self) -> Result<Vec<f64>, LayerError> {
        self.download()?;
        Ok(flatten(&self.host_weights, &self.host_biases))
    }

    /// Overwrites the parameters from a flattened vector, weights followed by biases.
    ///
    /// # Errors
    ///
    /// Returns [`LayerError::ParameterLength`] if the vector has the wrong length.
    pub fn set_parameters(&mut self, parameters: &[f64]) -> Result<(), LayerError> {
        let n_weights = self.host_weights.len();
        check_length(n_weights + self.n_filters, parameters.len())?;
        let (weights, biases) = parameters.split_at(n_weights);
        self.host_weights
            .iter_mut()
            .zip(weights)
            .for_each(|(dst, &src)| *dst = src as f32);
        self.host_biases
            .iter_mut()
            .zip(biases)
            .for_each(|(dst, &src)| *dst = src as f32);
        self.upload()
    }

    /// Flattened gradients of the last gradient computation, weights followed by biases.
    ///
    /// # Errors
    ///
    /// Returns an error if the device to host transfer fails.
    pub fn parameter_gradients(&self) -> Result<Vec<f64>, LayerError> {
        let mut weights = vec![0.0; self.weight_gradients.len()];
        let mut biases = vec![0.0; self.bias_gradients.len()];
        self.queue.read_buffer(&self.weight_gradients, &mut weights)?;
        self.queue.read_buffer(&self.bias_gradients, &mut biases)?;
        Ok(flatten(&weights, &biases))
    }
}

fn check_length(expected: usize, actual: usize) -> Result<(), LayerError> {
    if expected != actual {
        return Err(LayerError::ParameterLength { expected, actual });
    }
    Ok(())
}

fn flatten(weights: &[f32], biases: &[f32]) -> Vec<f64> {
    weights.iter().chain(biases).map(|&x| x as f64).collect()
}
