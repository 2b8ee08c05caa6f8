use crate::{error::LayerError, geometry::LayerGeometry};

/// Persisted parameters of a convolutional layer.
///
/// Only weights and biases are stored; gradients and speeds start from zero
/// after a restore.
#[derive(Debug, Clone, PartialEq, bincode::Encode, bincode::Decode)]
pub struct ParameterSnapshot {
    /// Channels of the input volume the filters were trained on.
    pub input_depth: usize,
    /// Side of the square filters.
    pub filter_size: usize,
    /// Number of filters.
    pub n_filters: usize,
    /// Weight matrix of shape `[n_filters, receptive_field_size]`, row-major.
    pub weights: Vec<f32>,
    /// Biases of shape `[n_filters]`.
    pub biases: Vec<f32>,
}

impl ParameterSnapshot {
    /// Encodes the snapshot into an opaque byte blob.
    ///
    /// # Errors
    ///
    /// Returns [`LayerError::Serialization`] if encoding fails.
    pub fn to_bytes(&self) -> Result<Vec<u8>, LayerError> {
        bincode::encode_to_vec(self, bincode::config::standard())
            .map_err(|e| LayerError::Serialization(e.to_string()))
    }

    /// Decodes a snapshot produced by [`ParameterSnapshot::to_bytes`].
    ///
    /// # Errors
    ///
    /// Returns [`LayerError::Serialization`] if the blob is malformed.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, LayerError> {
        let (snapshot, _) = bincode::decode_from_slice(bytes, bincode::config::standard())
            .map_err(|e| LayerError::Serialization(e.to_string()))?;
        Ok(snapshot)
    }

    /// Checks that the snapshot fits `geometry`.
    ///
    /// # Errors
    ///
    /// Returns [`LayerError::SnapshotMismatch`] if the filter shapes differ.
    pub fn check_geometry(&self, geometry: &LayerGeometry) -> Result<(), LayerError> {
        let snapshot = (self.input_depth, self.filter_size, self.n_filters);
        let layer = (geometry.input_depth(), geometry.filter_size(), geometry.n_filters());
        if snapshot != layer {
            return Err(LayerError::SnapshotMismatch { snapshot, layer });
        }
        Ok(())
    }
}
