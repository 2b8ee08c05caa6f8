use crate::{config::ConvLayerConfig, error::LayerError};

/// Input, filter and output dimensions of a convolutional layer.
///
/// Volumes are laid out depth-major: element `(c, y, x)` of a volume with
/// height `h` and width `w` lives at `c * h * w + y * w + x`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LayerGeometry {
    input_depth: usize,
    input_height: usize,
    input_width: usize,
    filter_size: usize,
    n_filters: usize,
    stride_length: usize,
    zero_padding: usize,
    output_height: usize,
    output_width: usize,
}

/// Number of outputs along one axis.
///
/// Warns when the stride does not tile the padded input exactly; the excess
/// input is cropped.
fn output_size(
    axis: &'static str,
    input: usize,
    filter: usize,
    stride: usize,
    padding: usize,
) -> Result<usize, LayerError> {
    let padded = padding
        .checked_mul(2)
        .and_then(|border| border.checked_add(input))
        .ok_or(LayerError::SizeOverflow(axis))?;
    let span = padded.checked_sub(filter).ok_or(LayerError::EmptyOutput)?;
    if span % stride != 0 {
        log::warn!(
            "{axis}: (input {input} - filter {filter} + 2 * padding {padding}) is not a multiple \
             of stride {stride}; the last {} input row(s)/column(s) are cropped",
            span % stride
        );
    }
    Ok(span / stride + 1)
}

fn checked_product(name: &'static str, factors: &[usize]) -> Result<usize, LayerError> {
    factors
        .iter()
        .try_fold(1usize, |acc, &x| acc.checked_mul(x))
        .ok_or(LayerError::SizeOverflow(name))
}

impl LayerGeometry {
    /// Validates a layer configuration and derives its output dimensions.
    ///
    /// # Arguments
    ///
    /// * `input_depth` - Channels of the input volume.
    /// * `input_height` - Rows of the input volume.
    /// * `input_width` - Columns of the input volume.
    /// * `filter_size` - Side of the square filters.
    /// * `n_filters` - Number of filters.
    /// * `stride_length` - Step between receptive fields.
    /// * `zero_padding` - Zeros added on every side of the input.
    ///
    /// # Errors
    ///
    /// Returns an error for zero dimensions, a filter larger than the input, or a
    /// geometry without output units.
    pub fn new(
        input_depth: usize,
        input_height: usize,
        input_width: usize,
        filter_size: usize,
        n_filters: usize,
        stride_length: usize,
        zero_padding: usize,
    ) -> Result<Self, LayerError> {
        for (name, value) in [
            ("input_depth", input_depth),
            ("input_height", input_height),
            ("input_width", input_width),
            ("filter_size", filter_size),
            ("n_filters", n_filters),
            ("stride_length", stride_length),
        ] {
            if value == 0 {
                return Err(LayerError::ZeroDimension(name));
            }
        }

        if filter_size > input_height.min(input_width) {
            return Err(LayerError::FilterTooLarge {
                filter_size,
                height: input_height,
                width: input_width,
            });
        }

        let output_height = output_size("height", input_height, filter_size, stride_length, zero_padding)?;
        let output_width = output_size("width", input_width, filter_size, stride_length, zero_padding)?;
        if output_height == 0 || output_width == 0 {
            return Err(LayerError::EmptyOutput);
        }

        // every derived size is bounded by one of these products
        checked_product(
            "padded_input_units",
            &[input_depth, input_height + 2 * zero_padding, input_width + 2 * zero_padding],
        )?;
        checked_product("output_units", &[n_filters, output_height, output_width])?;
        checked_product("n_weights", &[n_filters, input_depth, filter_size, filter_size])?
            .checked_add(n_filters)
            .ok_or(LayerError::SizeOverflow("n_parameters"))?;

        Ok(Self {
            input_depth,
            input_height,
            input_width,
            filter_size,
            n_filters,
            stride_length,
            zero_padding,
            output_height,
            output_width,
        })
    }

    /// Builds the geometry of `config` applied to an input volume `(depth, height, width)`.
    ///
    /// # Errors
    ///
    /// See [`LayerGeometry::new`].
    pub fn from_config(config: &ConvLayerConfig, input: (usize, usize, usize)) -> Result<Self, LayerError> {
        let (depth, height, width) = input;
        Self::new(
            depth,
            height,
            width,
            config.filter_size,
            config.n_filters,
            config.stride_length,
            config.zero_padding,
        )
    }

    /// Channels of the input volume.
    pub fn input_depth(&self) -> usize {
        self.input_depth
    }

    /// Rows of the input volume.
    pub fn input_height(&self) -> usize {
        self.input_height
    }

    /// Columns of the input volume.
    pub fn input_width(&self) -> usize {
        self.input_width
    }

    /// Side of the square filters.
    pub fn filter_size(&self) -> usize {
        self.filter_size
    }

    /// Number of filters.
    pub fn n_filters(&self) -> usize {
        self.n_filters
    }

    /// Step between receptive fields.
    pub fn stride_length(&self) -> usize {
        self.stride_length
    }

    /// Zeros added on every side of the input.
    pub fn zero_padding(&self) -> usize {
        self.zero_padding
    }

    /// Channels of the output volume, one per filter.
    pub fn output_depth(&self) -> usize {
        self.n_filters
    }

    /// Rows of the output volume.
    pub fn output_height(&self) -> usize {
        self.output_height
    }

    /// Columns of the output volume.
    pub fn output_width(&self) -> usize {
        self.output_width
    }

    /// Rows of the zero-padded input.
    pub fn padded_height(&self) -> usize {
        self.input_height + 2 * self.zero_padding
    }

    /// Columns of the zero-padded input.
    pub fn padded_width(&self) -> usize {
        self.input_width + 2 * self.zero_padding
    }

    /// Inputs seen by one filter application: `input_depth * filter_size^2`.
    pub fn receptive_field_size(&self) -> usize {
        self.input_depth * self.filter_size * self.filter_size
    }

    /// Filter applications per example: `output_height * output_width`.
    pub fn n_receptive_fields(&self) -> usize {
        self.output_height * self.output_width
    }

    /// Units of one unpadded input example.
    pub fn input_units(&self) -> usize {
        self.input_depth * self.input_height * self.input_width
    }

    /// Units of one padded input example.
    pub fn padded_input_units(&self) -> usize {
        self.input_depth * self.padded_height() * self.padded_width()
    }

    /// Units of one output example.
    pub fn output_units(&self) -> usize {
        self.n_filters * self.n_receptive_fields()
    }

    /// Elements of the `n_filters x receptive_field_size` weight matrix.
    pub fn n_weights(&self) -> usize {
        self.n_filters * self.receptive_field_size()
    }

    /// Weights followed by biases.
    pub fn n_parameters(&self) -> usize {
        self.n_weights() + self.n_filters
    }

    /// True when the input goes through the padding kernels.
    pub fn is_padded(&self) -> bool {
        self.zero_padding > 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_derived_sizes() -> Result<(), LayerError> {
        let geometry = LayerGeometry::new(3, 32, 32, 5, 16, 1, 2)?;
        assert_eq!(geometry.output_depth(), 16);
        assert_eq!(geometry.output_height(), 32);
        assert_eq!(geometry.output_width(), 32);
        assert_eq!(geometry.padded_height(), 36);
        assert_eq!(geometry.receptive_field_size(), 3 * 5 * 5);
        assert_eq!(geometry.n_receptive_fields(), 32 * 32);
        assert_eq!(geometry.n_parameters(), 16 * 75 + 16);
        assert!(geometry.is_padded());
        Ok(())
    }

    #[test]
    fn test_stride_crops_excess_input() -> Result<(), LayerError> {
        // (7 - 3) / 3 is not an integer: floor to 1, plus one
        let geometry = LayerGeometry::new(1, 7, 7, 3, 1, 3, 0)?;
        assert_eq!(geometry.output_height(), 2);
        assert_eq!(geometry.output_width(), 2);
        Ok(())
    }

    #[test]
    fn test_non_square_input() -> Result<(), LayerError> {
        let geometry = LayerGeometry::new(2, 4, 6, 3, 1, 1, 0)?;
        assert_eq!((geometry.output_height(), geometry.output_width()), (2, 4));
        Ok(())
    }

    #[test]
    fn test_invalid_geometries() {
        assert_eq!(
            LayerGeometry::new(1, 4, 4, 5, 1, 1, 0),
            Err(LayerError::FilterTooLarge {
                filter_size: 5,
                height: 4,
                width: 4
            })
        );
        assert_eq!(
            LayerGeometry::new(1, 4, 4, 3, 1, 0, 0),
            Err(LayerError::ZeroDimension("stride_length"))
        );
        assert_eq!(
            LayerGeometry::new(0, 4, 4, 3, 1, 1, 0),
            Err(LayerError::ZeroDimension("input_depth"))
        );
        assert_eq!(
            LayerGeometry::new(1, 4, 4, 3, 0, 1, 0),
            Err(LayerError::ZeroDimension("n_filters"))
        );
    }

    #[test]
    fn test_oversized_geometry_is_rejected() {
        assert_eq!(
            LayerGeometry::new(1, 4, 4, 3, 1, 1, usize::MAX / 2),
            Err(LayerError::SizeOverflow("height"))
        );
        assert_eq!(
            LayerGeometry::new(usize::MAX / 2, 4, 4, 3, 1, 1, 0),
            Err(LayerError::SizeOverflow("padded_input_units"))
        );
        assert_eq!(
            LayerGeometry::new(1, 4, 4, 3, usize::MAX / 2, 1, 0),
            Err(LayerError::SizeOverflow("output_units"))
        );
    }

    #[test]
    fn test_from_config() -> Result<(), LayerError> {
        let config = ConvLayerConfig::new(3, 4).with_padding(1);
        let geometry = LayerGeometry::from_config(&config, (2, 5, 5))?;
        assert_eq!(geometry, LayerGeometry::new(2, 5, 5, 3, 4, 1, 1)?);
        Ok(())
    }
}
