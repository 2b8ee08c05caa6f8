use std::sync::{
    atomic::{AtomicU64, AtomicUsize, Ordering},
    Arc,
};

use crate::{buffer::DeviceBuffer, error::DeviceError, parallel::ExecutionStrategy};

struct QueueImpl {
    strategy: ExecutionStrategy,
    pool: Option<rayon::ThreadPool>,
    /// Kernels enqueued since the last barrier.
    pending: AtomicUsize,
    /// Kernels enqueued over the queue lifetime.
    dispatched: AtomicU64,
}

/// An in-order command queue on the compute device.
///
/// Kernels are dispatched in program order. A kernel is a closure whose body
/// partitions its work into independent work-items with Rayon parallel
/// iterators; the grid runs on the pool selected by the [`ExecutionStrategy`].
///
/// Callers separate dependent phases with [`CommandQueue::finish`]: once it
/// returns, every kernel enqueued before it has completed and its output is
/// visible to the next phase.
///
/// On this host backend [`CommandQueue::enqueue`] runs the whole work-item grid
/// before returning, so the ordering already holds when `finish` is reached;
/// `finish` only drains the pending-kernel counter. Layers still call it at every
/// phase boundary, where an asynchronous backend would have to block.
///
/// Cloning is cheap and yields a handle to the same queue.
#[derive(Clone)]
pub struct CommandQueue {
    inner: Arc<QueueImpl>,
}

impl std::fmt::Debug for CommandQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CommandQueue")
            .field("strategy", &self.inner.strategy)
            .field("pending", &self.inner.pending.load(Ordering::Relaxed))
            .field("dispatched", &self.inner.dispatched.load(Ordering::Relaxed))
            .finish()
    }
}

impl CommandQueue {
    /// Creates a new command queue.
    ///
    /// # Arguments
    ///
    /// * `strategy` - How the work-items of each dispatch are scheduled.
    ///
    /// # Errors
    ///
    /// Returns an error if the private worker pool cannot be built.
    pub fn new(strategy: ExecutionStrategy) -> Result<Self, DeviceError> {
        let pool = strategy.build_pool()?;
        log::debug!("created command queue with {strategy:?}");
        Ok(Self {
            inner: Arc::new(QueueImpl {
                strategy,
                pool,
                pending: AtomicUsize::new(0),
                dispatched: AtomicU64::new(0),
            }),
        })
    }

    /// Returns the execution strategy of the queue.
    pub fn strategy(&self) -> ExecutionStrategy {
        self.inner.strategy
    }

    /// Returns the number of kernels dispatched over the queue lifetime.
    pub fn dispatched(&self) -> u64 {
        self.inner.dispatched.load(Ordering::Relaxed)
    }

    /// Dispatches a kernel and returns once its work-items have completed.
    ///
    /// # Arguments
    ///
    /// * `name` - Kernel name, used for tracing.
    /// * `kernel` - The kernel body.
    pub fn enqueue<F>(&self, name: &'static str, kernel: F)
    where
        F: FnOnce() + Send,
    {
        log::trace!("enqueue kernel `{name}`");
        match &self.inner.pool {
            Some(pool) => pool.install(kernel),
            None => kernel(),
        }
        self.inner.pending.fetch_add(1, Ordering::AcqRel);
        self.inner.dispatched.fetch_add(1, Ordering::Relaxed);
    }

    /// Blocks until every previously enqueued kernel has completed.
    ///
    /// # Errors
    ///
    /// Reserved for device failures; a failed device operation is fatal for the run.
    /// The host backend never fails here.
    pub fn finish(&self) -> Result<(), DeviceError> {
        let drained = self.inner.pending.swap(0, Ordering::AcqRel);
        log::trace!("finish: drained {drained} kernel(s)");
        Ok(())
    }

    /// Allocates a zero-filled device buffer.
    ///
    /// # Errors
    ///
    /// Returns [`DeviceError::AllocationFailed`] if the memory cannot be reserved.
    pub fn create_buffer<T: Copy + Default>(&self, len: usize) -> Result<DeviceBuffer<T>, DeviceError> {
        DeviceBuffer::zeros(len)
    }

    /// Copies a host slice into a device buffer.
    ///
    /// # Errors
    ///
    /// Returns [`DeviceError::SizeMismatch`] if the lengths differ.
    pub fn write_buffer<T: Copy>(&self, dst: &mut DeviceBuffer<T>, src: &[T]) -> Result<(), DeviceError> {
        if dst.len() != src.len() {
            return Err(DeviceError::SizeMismatch {
                expected: dst.len(),
                actual: src.len(),
            });
        }
        dst.as_mut_slice().copy_from_slice(src);
        Ok(())
    }

    /// Copies a device buffer into a host slice.
    ///
    /// # Errors
    ///
    /// Returns [`DeviceError::SizeMismatch`] if the lengths differ.
    pub fn read_buffer<T: Copy>(&self, src: &DeviceBuffer<T>, dst: &mut [T]) -> Result<(), DeviceError> {
        if dst.len() != src.len() {
            return Err(DeviceError::SizeMismatch {
                expected: src.len(),
                actual: dst.len(),
            });
        }
        dst.copy_from_slice(src.as_slice());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rayon::prelude::*;

    #[test]
    fn test_enqueue_then_finish() -> Result<(), DeviceError> {
        let queue = CommandQueue::new(ExecutionStrategy::Fixed(2))?;
        let mut buffer = queue.create_buffer::<f32>(6)?;
        queue.write_buffer(&mut buffer, &[1.0, 2.0, 3.0, 4.0, 5.0, 6.0])?;

        let data = buffer.as_mut_slice();
        queue.enqueue("double", || {
            data.par_iter_mut().for_each(|x| *x *= 2.0);
        });
        queue.finish()?;

        let mut host = vec![0.0; 6];
        queue.read_buffer(&buffer, &mut host)?;
        assert_eq!(host, vec![2.0, 4.0, 6.0, 8.0, 10.0, 12.0]);
        assert_eq!(queue.dispatched(), 1);
        Ok(())
    }

    #[test]
    fn test_dispatch_order_is_program_order() -> Result<(), DeviceError> {
        let queue = CommandQueue::new(ExecutionStrategy::Serial)?;
        let mut buffer = queue.create_buffer::<f32>(3)?;

        let data = buffer.as_mut_slice();
        queue.enqueue("fill", || data.par_iter_mut().for_each(|x| *x = 1.0));
        queue.enqueue("add", || data.par_iter_mut().for_each(|x| *x += 2.0));
        queue.finish()?;

        assert_eq!(buffer.as_slice(), &[3.0, 3.0, 3.0]);
        Ok(())
    }

    #[test]
    fn test_kernel_completes_before_enqueue_returns() -> Result<(), DeviceError> {
        let queue = CommandQueue::new(ExecutionStrategy::Fixed(2))?;
        let mut buffer = queue.create_buffer::<f32>(4)?;

        let data = buffer.as_mut_slice();
        queue.enqueue("fill", || data.par_iter_mut().for_each(|x| *x = 1.0));
        // no barrier yet
        assert_eq!(buffer.as_slice(), &[1.0; 4]);
        assert_eq!(queue.dispatched(), 1);
        queue.finish()?;
        Ok(())
    }

    #[test]
    fn test_transfer_size_mismatch() -> Result<(), DeviceError> {
        let queue = CommandQueue::new(ExecutionStrategy::Serial)?;
        let mut buffer = queue.create_buffer::<f32>(4)?;
        let res = queue.write_buffer(&mut buffer, &[1.0, 2.0]);
        assert_eq!(
            res,
            Err(DeviceError::SizeMismatch {
                expected: 4,
                actual: 2
            })
        );

        let mut host = vec![0.0; 5];
        assert!(queue.read_buffer(&buffer, &mut host).is_err());
        Ok(())
    }
}
