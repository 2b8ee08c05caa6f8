use serde::{Deserialize, Serialize};

use crate::error::LayerError;

/// Static configuration of a convolutional layer.
///
/// The input volume is not part of the configuration; it is taken from the
/// upstream layer at connection time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConvLayerConfig {
    /// Side of the square filters.
    pub filter_size: usize,
    /// Number of filters, i.e. the output depth.
    pub n_filters: usize,
    /// Step between consecutive receptive fields.
    #[serde(default = "default_stride_length")]
    pub stride_length: usize,
    /// Zeros added on every side of the input.
    #[serde(default)]
    pub zero_padding: usize,
}

fn default_stride_length() -> usize {
    1
}

impl ConvLayerConfig {
    /// Creates a stride-1 configuration without padding.
    pub fn new(filter_size: usize, n_filters: usize) -> Self {
        Self {
            filter_size,
            n_filters,
            stride_length: 1,
            zero_padding: 0,
        }
    }

    /// Sets the stride length.
    pub fn with_stride(mut self, stride_length: usize) -> Self {
        self.stride_length = stride_length;
        self
    }

    /// Sets the zero padding.
    pub fn with_padding(mut self, zero_padding: usize) -> Self {
        self.zero_padding = zero_padding;
        self
    }
}

/// Per-call training configuration supplied by the trainer.
///
/// `weight_max_norm` is infinite when omitted, which disables the max-norm
/// constraint.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HyperParameters {
    /// Step size applied to the summed mini-batch gradient.
    pub learning_rate: f32,
    /// Momentum coefficient of the speed update.
    pub momentum: f32,
    /// L2 weight decay coefficient (weights only).
    pub weight_decay: f32,
    /// Maximum L2 norm of each filter.
    pub weight_max_norm: f32,
    /// Keep probability of the dropout mask; `1.0` disables dropout.
    pub dropout_parameter: f32,
}

impl Default for HyperParameters {
    fn default() -> Self {
        Self {
            learning_rate: 0.01,
            momentum: 0.9,
            weight_decay: 0.0005,
            weight_max_norm: f32::INFINITY,
            dropout_parameter: 1.0,
        }
    }
}

impl HyperParameters {
    /// Checks every field against its valid range.
    ///
    /// # Errors
    ///
    /// Returns [`LayerError::InvalidHyperParameter`] naming the first offending field.
    pub fn validate(&self) -> Result<(), LayerError> {
        let invalid = |name, value| Err(LayerError::InvalidHyperParameter { name, value });

        if !(self.learning_rate.is_finite() && self.learning_rate >= 0.0) {
            return invalid("learning_rate", self.learning_rate);
        }
        if !(0.0..1.0).contains(&self.momentum) {
            return invalid("momentum", self.momentum);
        }
        if !(self.weight_decay.is_finite() && self.weight_decay >= 0.0) {
            return invalid("weight_decay", self.weight_decay);
        }
        // NaN fails the comparison
        if !(self.weight_max_norm > 0.0) {
            return invalid("weight_max_norm", self.weight_max_norm);
        }
        if !(self.dropout_parameter > 0.0 && self.dropout_parameter <= 1.0) {
            return invalid("dropout_parameter", self.dropout_parameter);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() -> Result<(), LayerError> {
        let hyper = HyperParameters::default();
        hyper.validate()?;
        assert!(hyper.weight_max_norm.is_infinite());
        Ok(())
    }

    #[test]
    fn test_invalid_fields() {
        let cases = [
            HyperParameters {
                learning_rate: -0.1,
                ..Default::default()
            },
            HyperParameters {
                momentum: 1.0,
                ..Default::default()
            },
            HyperParameters {
                weight_decay: f32::NAN,
                ..Default::default()
            },
            HyperParameters {
                weight_max_norm: 0.0,
                ..Default::default()
            },
            HyperParameters {
                dropout_parameter: 0.0,
                ..Default::default()
            },
        ];
        for hyper in cases {
            assert!(hyper.validate().is_err(), "{hyper:?} should be rejected");
        }
    }

    #[test]
    fn test_deserialize_partial_json() -> Result<(), Box<dyn std::error::Error>> {
        let hyper: HyperParameters =
            serde_json::from_str(r#"{ "learning_rate": 0.05, "dropout_parameter": 0.5 }"#)?;
        assert_eq!(hyper.learning_rate, 0.05);
        assert_eq!(hyper.dropout_parameter, 0.5);
        assert_eq!(hyper.momentum, 0.9);
        assert!(hyper.weight_max_norm.is_infinite());

        let config: ConvLayerConfig = serde_json::from_str(r#"{ "filter_size": 5, "n_filters": 32 }"#)?;
        assert_eq!(config, ConvLayerConfig::new(5, 32));
        Ok(())
    }
}
