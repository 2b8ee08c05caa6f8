use thiserror::Error;

/// An error type for device operations.
///
/// Every device error is fatal for the run: there is no retry or partial
/// failure semantics anywhere in the compute pipeline.
#[derive(Error, Debug, PartialEq)]
pub enum DeviceError {
    /// A device buffer could not be allocated.
    #[error("Failed to allocate a device buffer of {len} elements")]
    AllocationFailed {
        /// Number of elements requested
        len: usize,
    },

    /// The requested buffer length does not fit in `usize`.
    #[error("Buffer of {n_units} units x {mini_batch_size} examples overflows usize")]
    LengthOverflow {
        /// Units per example
        n_units: usize,
        /// Examples per mini-batch
        mini_batch_size: usize,
    },

    /// A host/device transfer was issued with mismatched lengths.
    #[error("Size mismatch: device buffer holds {expected} elements, host slice holds {actual}")]
    SizeMismatch {
        /// Length of the device buffer
        expected: usize,
        /// Length of the host slice
        actual: usize,
    },

    /// The requested thread count is invalid.
    #[error("thread count must be > 0, got {0}")]
    InvalidThreadCount(usize),

    /// The worker pool backing the command queue failed to build.
    #[error("failed to build the device thread pool: {0}")]
    PoolBuildError(String),

    /// A shared neuron buffer was left poisoned by a panicking writer.
    #[error("shared neuron buffer is poisoned")]
    Poisoned,
}
