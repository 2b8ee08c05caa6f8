#![deny(missing_docs)]
#![doc = env!("CARGO_PKG_DESCRIPTION")]
//!
//! # Overview
//!
//! `convnet-device` models the compute device the convolutional layers run on:
//! an in-order [`CommandQueue`] that dispatches data-parallel kernels, exclusively
//! owned [`DeviceBuffer`]s with explicit host transfers, and the [`Neurons`]
//! activation/delta buffers that adjacent layers share through a [`NeuronsHandle`].
//!
//! # Quick Start
//!
//! ```rust
//! use convnet_device::{CommandQueue, ExecutionStrategy};
//! use rayon::prelude::*;
//!
//! let queue = CommandQueue::new(ExecutionStrategy::Serial).unwrap();
//! let mut buffer = queue.create_buffer::<f32>(4).unwrap();
//! queue.write_buffer(&mut buffer, &[1.0, 2.0, 3.0, 4.0]).unwrap();
//!
//! let data = buffer.as_mut_slice();
//! queue.enqueue("square", || data.par_iter_mut().for_each(|x| *x *= *x));
//! queue.finish().unwrap();
//!
//! let mut host = vec![0.0; 4];
//! queue.read_buffer(&buffer, &mut host).unwrap();
//! assert_eq!(host, vec![1.0, 4.0, 9.0, 16.0]);
//! ```

/// Device buffers and the atomic float used by scatter-add kernels.
pub mod buffer;

/// Error types for device operations.
pub mod error;

/// Neuron buffers shared between adjacent layers.
pub mod neurons;

/// Scheduling strategies for kernel work-items.
pub mod parallel;

/// In-order command queue.
pub mod queue;

pub use crate::buffer::{AtomicF32, DeviceBuffer};
pub use crate::error::DeviceError;
pub use crate::neurons::{Neurons, NeuronsHandle};
pub use crate::parallel::ExecutionStrategy;
pub use crate::queue::CommandQueue;
