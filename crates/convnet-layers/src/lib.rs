#![deny(missing_docs)]
#![doc = env!("CARGO_PKG_DESCRIPTION")]
//!
//! # Convolutional Layers
//!
//! A convolutional layer that runs forward inference and gradient
//! back-propagation on a [`convnet_device::CommandQueue`] for a whole mini-batch
//! at once.
//!
//! ## Key Features
//!
//! - **Lookup tables**: the convolution becomes a dense matrix product driven by
//!   precomputed zero-padding and receptive-field index tables
//! - **Race-free backward pass**: overlapping receptive fields accumulate input
//!   gradients with atomic adds
//! - **Training**: dropout masks, momentum speeds, weight decay and max-norm
//!   constraints
//!
//! ## Example: one training step
//!
//! ```rust
//! use convnet_device::{CommandQueue, ExecutionStrategy};
//! use convnet_layers::{
//!     ConvLayerConfig, ConvolutionalLayer, ForwardMode, HyperParameters, Initialization,
//!     InputLayer,
//! };
//! use rand::{rngs::StdRng, SeedableRng};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let queue = CommandQueue::new(ExecutionStrategy::ParallelElements)?;
//! let input = InputLayer::new(&queue, 1, 8, 8, 4)?;
//!
//! let mut conv = ConvolutionalLayer::new(ConvLayerConfig::new(3, 6).with_padding(1), &queue);
//! conv.connect_to(&input)?;
//! conv.initialize_parameters(Initialization::Random, &mut StdRng::seed_from_u64(0))?;
//!
//! input.feed(&vec![0.5; 4 * 64])?;
//! conv.feed_forward(ForwardMode::Training { dropout_parameter: 0.5, seed: 1 })?;
//!
//! // the downstream layer would write these
//! conv.write_output_delta(&vec![0.1; 4 * 6 * 64])?;
//! conv.back_propagate()?;
//!
//! let hyper = HyperParameters::default();
//! conv.update_speeds(&hyper)?;
//! conv.update_parameters(&hyper)?;
//! # Ok(())
//! # }
//! ```

/// Layer and training configuration.
pub mod config;

/// The convolutional layer.
pub mod conv;

/// Error types for layer operations.
pub mod error;

/// Layer geometry and its validation.
pub mod geometry;

/// The input layer feeding mini-batches.
pub mod input;

/// Device kernels of the convolution pipeline.
pub mod kernels;

/// Traits shared by layers.
pub mod layer;

/// Padding and receptive-field lookup tables.
pub mod lookup;

/// Parameter storage and initialization.
pub mod parameters;

/// Persisted layer parameters.
pub mod snapshot;

pub use crate::config::{ConvLayerConfig, HyperParameters};
pub use crate::conv::ConvolutionalLayer;
pub use crate::error::LayerError;
pub use crate::geometry::LayerGeometry;
pub use crate::input::InputLayer;
pub use crate::layer::{ForwardMode, Layer};
pub use crate::lookup::LookupTables;
pub use crate::parameters::{Initialization, ParameterStore};
pub use crate::snapshot::ParameterSnapshot;
