use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::{buffer::DeviceBuffer, error::DeviceError, queue::CommandQueue};

/// Activation and delta buffers for a mini-batch of examples.
///
/// Both buffers are example-major: unit `u` of example `e` lives at
/// `e * n_units + u`.
#[derive(Debug)]
pub struct Neurons {
    n_units: usize,
    mini_batch_size: usize,
    /// Activations written by the producing layer during the forward pass.
    pub activations: DeviceBuffer<f32>,
    /// Error signals written by the consuming layer during back-propagation.
    pub deltas: DeviceBuffer<f32>,
}

impl Neurons {
    /// Allocates zeroed activation and delta buffers.
    ///
    /// # Errors
    ///
    /// Returns [`DeviceError::LengthOverflow`] if the buffer length does not fit in
    /// `usize`, or an error if either device buffer cannot be allocated.
    pub fn new(queue: &CommandQueue, n_units: usize, mini_batch_size: usize) -> Result<Self, DeviceError> {
        let len = n_units
            .checked_mul(mini_batch_size)
            .ok_or(DeviceError::LengthOverflow {
                n_units,
                mini_batch_size,
            })?;
        Ok(Self {
            n_units,
            mini_batch_size,
            activations: queue.create_buffer(len)?,
            deltas: queue.create_buffer(len)?,
        })
    }

    /// Returns the number of units per example.
    #[inline]
    pub fn n_units(&self) -> usize {
        self.n_units
    }

    /// Returns the number of examples in the mini-batch.
    #[inline]
    pub fn mini_batch_size(&self) -> usize {
        self.mini_batch_size
    }
}

/// A shared handle to the [`Neurons`] between two adjacent layers.
///
/// The producing layer creates the neurons and is the only writer of the
/// activations. At connection time the consuming layer receives a clone of the
/// handle and becomes the only writer of the deltas. Layers run strictly in
/// sequence, so the lock is never contended.
#[derive(Debug, Clone)]
pub struct NeuronsHandle(Arc<RwLock<Neurons>>);

impl NeuronsHandle {
    /// Wraps freshly allocated neurons in a shared handle.
    pub fn new(neurons: Neurons) -> Self {
        Self(Arc::new(RwLock::new(neurons)))
    }

    /// Borrows the neurons for reading.
    ///
    /// # Errors
    ///
    /// Returns [`DeviceError::Poisoned`] if a writer panicked while holding the lock.
    pub fn read(&self) -> Result<RwLockReadGuard<'_, Neurons>, DeviceError> {
        self.0.read().map_err(|_| DeviceError::Poisoned)
    }

    /// Borrows the neurons for writing.
    ///
    /// # Errors
    ///
    /// Returns [`DeviceError::Poisoned`] if a writer panicked while holding the lock.
    pub fn write(&self) -> Result<RwLockWriteGuard<'_, Neurons>, DeviceError> {
        self.0.write().map_err(|_| DeviceError::Poisoned)
    }

    /// Returns true if both handles refer to the same neurons.
    pub fn ptr_eq(&self, other: &NeuronsHandle) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ExecutionStrategy;

    #[test]
    fn test_neurons_shape() -> Result<(), DeviceError> {
        let queue = CommandQueue::new(ExecutionStrategy::Serial)?;
        let neurons = Neurons::new(&queue, 12, 3)?;
        assert_eq!(neurons.n_units(), 12);
        assert_eq!(neurons.mini_batch_size(), 3);
        assert_eq!(neurons.activations.len(), 36);
        assert_eq!(neurons.deltas.len(), 36);
        Ok(())
    }

    #[test]
    fn test_neurons_length_overflow() -> Result<(), DeviceError> {
        let queue = CommandQueue::new(ExecutionStrategy::Serial)?;
        let res = Neurons::new(&queue, usize::MAX / 2, 3);
        assert_eq!(
            res.err(),
            Some(DeviceError::LengthOverflow {
                n_units: usize::MAX / 2,
                mini_batch_size: 3
            })
        );
        Ok(())
    }

    #[test]
    fn test_handle_shares_buffers() -> Result<(), DeviceError> {
        let queue = CommandQueue::new(ExecutionStrategy::Serial)?;
        let producer = NeuronsHandle::new(Neurons::new(&queue, 2, 1)?);
        let consumer = producer.clone();
        assert!(producer.ptr_eq(&consumer));

        queue.write_buffer(&mut producer.write()?.activations, &[1.0, 2.0])?;
        assert_eq!(consumer.read()?.activations.as_slice(), &[1.0, 2.0]);
        Ok(())
    }
}
