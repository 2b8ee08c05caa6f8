use std::sync::atomic::{AtomicU32, Ordering};

use crate::error::DeviceError;

/// A fixed-length array resident on the compute device.
///
/// The buffer is exclusively owned by whoever allocated it. Kernels borrow it
/// for the duration of a dispatch; the host reaches its contents only through
/// [`crate::CommandQueue::write_buffer`] and [`crate::CommandQueue::read_buffer`].
#[derive(Debug)]
pub struct DeviceBuffer<T> {
    data: Vec<T>,
}

impl<T: Copy + Default> DeviceBuffer<T> {
    /// Allocates a zero-filled buffer of `len` elements.
    ///
    /// # Errors
    ///
    /// Returns [`DeviceError::AllocationFailed`] if the memory cannot be reserved.
    pub(crate) fn zeros(len: usize) -> Result<Self, DeviceError> {
        let mut data = Vec::new();
        data.try_reserve_exact(len)
            .map_err(|_| DeviceError::AllocationFailed { len })?;
        data.resize(len, T::default());
        Ok(Self { data })
    }

    /// Sets every element to `value`.
    pub fn fill(&mut self, value: T) {
        self.data.fill(value);
    }
}

impl<T> DeviceBuffer<T> {
    /// Returns the number of elements in the buffer.
    #[inline]
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Returns true if the buffer holds no elements.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Returns the buffer contents for a kernel to read.
    #[inline]
    pub fn as_slice(&self) -> &[T] {
        &self.data
    }

    /// Returns the buffer contents for a kernel to write.
    #[inline]
    pub fn as_mut_slice(&mut self) -> &mut [T] {
        &mut self.data
    }
}

impl DeviceBuffer<f32> {
    /// Reinterprets the buffer as atomics for scatter-add kernels.
    ///
    /// Work-items that target the same destination index accumulate through
    /// [`AtomicF32::fetch_add`]. The exclusive borrow guarantees no plain access
    /// overlaps the atomic view.
    pub fn as_atomic(&mut self) -> &[AtomicF32] {
        let slice = self.data.as_mut_slice();
        // SAFETY: `AtomicF32` is `repr(transparent)` over `AtomicU32`, which has the same
        // size and alignment as `f32`. The mutable borrow is held for the returned lifetime.
        unsafe { std::slice::from_raw_parts(slice.as_mut_ptr() as *const AtomicF32, slice.len()) }
    }
}

/// A 32-bit float with an atomic add, the host equivalent of a device `atomicAdd`.
#[repr(transparent)]
#[derive(Debug, Default)]
pub struct AtomicF32(AtomicU32);

impl AtomicF32 {
    /// Creates a new atomic holding `value`.
    pub fn new(value: f32) -> Self {
        Self(AtomicU32::new(value.to_bits()))
    }

    /// Loads the current value.
    pub fn load(&self, order: Ordering) -> f32 {
        f32::from_bits(self.0.load(order))
    }

    /// Adds `value` to the current value, returning the previous value.
    pub fn fetch_add(&self, value: f32, order: Ordering) -> f32 {
        let mut current = self.0.load(Ordering::Relaxed);
        loop {
            let next = (f32::from_bits(current) + value).to_bits();
            match self
                .0
                .compare_exchange_weak(current, next, order, Ordering::Relaxed)
            {
                Ok(previous) => return f32::from_bits(previous),
                Err(actual) => current = actual,
            }
        }
    }
}
