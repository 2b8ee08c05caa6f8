use convnet_device::DeviceError;
use thiserror::Error;

/// An error type for convolutional layer operations.
#[derive(Error, Debug, PartialEq)]
pub enum LayerError {
    /// A geometry dimension that must be positive is zero.
    #[error("Invalid geometry: {0} must be greater than zero")]
    ZeroDimension(&'static str),

    /// The filter does not fit inside the input.
    #[error("Filter size {filter_size} exceeds the input spatial size {height}x{width}")]
    FilterTooLarge {
        /// Side of the square filter
        filter_size: usize,
        /// Input height
        height: usize,
        /// Input width
        width: usize,
    },

    /// A buffer size does not fit in `usize`.
    #[error("Size of {0} overflows usize")]
    SizeOverflow(&'static str),

    /// The geometry yields no output units.
    #[error("Geometry produces a non-positive output dimension")]
    EmptyOutput,

    /// An index does not fit the `i32` lookup table entries.
    #[error("Lookup table index {0} does not fit in i32")]
    TableOverflow(usize),

    /// A parameter vector has the wrong length for the layer geometry.
    #[error("Parameter length mismatch: expected {expected}, got {actual}")]
    ParameterLength {
        /// Length required by the geometry
        expected: usize,
        /// Length supplied
        actual: usize,
    },

    /// Input data does not match the mini-batch shape.
    #[error("Mini-batch length mismatch: expected {expected}, got {actual}")]
    BatchLength {
        /// Length required by the neurons
        expected: usize,
        /// Length supplied
        actual: usize,
    },

    /// A hyper-parameter is outside its valid range.
    #[error("Invalid hyper-parameter `{name}`: {value}")]
    InvalidHyperParameter {
        /// Name of the offending field
        name: &'static str,
        /// Offending value
        value: f32,
    },

    /// A snapshot does not match the layer geometry.
    #[error("Snapshot geometry {snapshot:?} does not match layer geometry {layer:?}")]
    SnapshotMismatch {
        /// `(input_depth, filter_size, n_filters)` stored in the snapshot
        snapshot: (usize, usize, usize),
        /// `(input_depth, filter_size, n_filters)` of the layer
        layer: (usize, usize, usize),
    },

    /// A snapshot could not be encoded or decoded.
    #[error("Snapshot serialization failed: {0}")]
    Serialization(String),

    /// The layer was used before [`crate::ConvolutionalLayer::connect_to`].
    #[error("Layer is not connected to an upstream layer")]
    NotConnected,

    /// The layer was used before its parameters were initialized.
    #[error("Layer parameters are not initialized")]
    NotInitialized,

    /// Back-propagation was requested without a preceding forward pass.
    #[error("Back-propagation requires a preceding forward pass")]
    NoForwardPass,

    /// Device error
    #[error(transparent)]
    DeviceError(#[from] DeviceError),
}
