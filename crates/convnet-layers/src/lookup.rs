use crate::{error::LayerError, geometry::LayerGeometry};

/// Precomputed index tables that turn the convolution into a dense product.
///
/// Both tables are built once per layer geometry and are read-only afterwards.
/// They are shared by every example of the mini-batch and by the forward and
/// backward passes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LookupTables {
    padding: Vec<i32>,
    receptive_field: Vec<i32>,
    n_receptive_fields: usize,
}

fn to_index(value: usize) -> Result<i32, LayerError> {
    i32::try_from(value).map_err(|_| LayerError::TableOverflow(value))
}

impl LookupTables {
    /// Builds the padding and receptive-field tables for `geometry`.
    ///
    /// # Errors
    ///
    /// Returns [`LayerError::TableOverflow`] if an index does not fit in `i32`.
    pub fn build(geometry: &LayerGeometry) -> Result<Self, LayerError> {
        let padding = Self::build_padding(geometry)?;
        let receptive_field = Self::build_receptive_field(geometry)?;
        log::debug!(
            "built lookup tables: {} padding entries, {} receptive-field entries",
            padding.len(),
            receptive_field.len()
        );
        Ok(Self {
            padding,
            receptive_field,
            n_receptive_fields: geometry.n_receptive_fields(),
        })
    }

    // unpadded (c, y, x) -> padded (c, y + p, x + p)
    fn build_padding(geometry: &LayerGeometry) -> Result<Vec<i32>, LayerError> {
        let p = geometry.zero_padding();
        let (padded_h, padded_w) = (geometry.padded_height(), geometry.padded_width());

        let mut table = Vec::with_capacity(geometry.input_units());
        for c in 0..geometry.input_depth() {
            for y in 0..geometry.input_height() {
                for x in 0..geometry.input_width() {
                    table.push(to_index(c * padded_h * padded_w + (y + p) * padded_w + x + p)?);
                }
            }
        }
        Ok(table)
    }

    fn build_receptive_field(geometry: &LayerGeometry) -> Result<Vec<i32>, LayerError> {
        let f = geometry.filter_size();
        let s = geometry.stride_length();
        let (padded_h, padded_w) = (geometry.padded_height(), geometry.padded_width());
        let (out_h, out_w) = (geometry.output_height(), geometry.output_width());

        let mut table = Vec::with_capacity(geometry.receptive_field_size() * geometry.n_receptive_fields());
        // row k = (c, i, j) offset inside the filter, column r = (oy, ox) receptive field
        for c in 0..geometry.input_depth() {
            for i in 0..f {
                for j in 0..f {
                    for oy in 0..out_h {
                        for ox in 0..out_w {
                            let y = oy * s + i;
                            let x = ox * s + j;
                            table.push(to_index(c * padded_h * padded_w + y * padded_w + x)?);
                        }
                    }
                }
            }
        }
        Ok(table)
    }

    /// Destination index inside the padded example of every unpadded input unit.
    pub fn padding(&self) -> &[i32] {
        &self.padding
    }

    /// Receptive-field table: entry `k * n_receptive_fields + r` is the index, inside
    /// the (padded) example, of filter offset `k` in receptive field `r`.
    pub fn receptive_field(&self) -> &[i32] {
        &self.receptive_field
    }

    /// Number of receptive fields per example, the row stride of
    /// [`LookupTables::receptive_field`].
    pub fn n_receptive_fields(&self) -> usize {
        self.n_receptive_fields
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_table_sizes_and_bounds() -> Result<(), LayerError> {
        for (geometry, cropped) in [
            (LayerGeometry::new(3, 8, 8, 3, 4, 1, 1)?, false),
            (LayerGeometry::new(2, 7, 7, 3, 2, 2, 0)?, false),
            (LayerGeometry::new(1, 7, 5, 2, 1, 2, 2)?, true),
        ] {
            let tables = LookupTables::build(&geometry)?;
            assert_eq!(
                tables.receptive_field().len(),
                geometry.receptive_field_size() * geometry.n_receptive_fields()
            );
            assert_eq!(tables.padding().len(), geometry.input_units());

            let padded_units = geometry.padded_input_units() as i32;
            assert!(tables
                .receptive_field()
                .iter()
                .all(|&i| (0..padded_units).contains(&i)));

            let unique: HashSet<_> = tables.padding().iter().collect();
            assert_eq!(unique.len(), geometry.input_units(), "cropped: {cropped}");
        }
        Ok(())
    }

    #[test]
    fn test_receptive_field_entries() -> Result<(), LayerError> {
        // 1x3x3 input, 2x2 filter, stride 1: four receptive fields
        let geometry = LayerGeometry::new(1, 3, 3, 2, 1, 1, 0)?;
        let tables = LookupTables::build(&geometry)?;
        #[rustfmt::skip]
        let expected = [
            0, 1, 3, 4, // k = (0, 0)
            1, 2, 4, 5, // k = (0, 1)
            3, 4, 6, 7, // k = (1, 0)
            4, 5, 7, 8, // k = (1, 1)
        ];
        assert_eq!(tables.receptive_field(), &expected);
        assert_eq!(tables.padding(), &[0, 1, 2, 3, 4, 5, 6, 7, 8]);
        Ok(())
    }

    #[test]
    fn test_padding_entries() -> Result<(), LayerError> {
        // 1x2x2 input padded by 1 into a 4x4 plane
        let geometry = LayerGeometry::new(1, 2, 2, 2, 1, 1, 1)?;
        let tables = LookupTables::build(&geometry)?;
        assert_eq!(tables.padding(), &[5, 6, 9, 10]);
        assert_eq!(tables.n_receptive_fields(), 9);
        Ok(())
    }
}
