use crate::dims::Dims4;
use crate::error::Result;
use crate::geometry::LoweringGeometry;
use crate::layout::{LayoutType, LoweringType};

/// Parameters fixed for the lifetime of a connector.
///
/// # Examples
/// ```
/// use patchwork_core::{ConnectorConfig, Dims4};
///
/// let config = ConnectorConfig::new(3).with_padding(1).with_stride(1);
/// let geom = config.geometry(Dims4::new(28, 28, 1, 16)).unwrap();
/// assert_eq!((geom.out_r, geom.out_c), (28, 28));
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnectorConfig {
    pub kernel_size: usize,
    pub padding: usize,
    pub stride: usize,
    pub lowering: LoweringType,
    pub input_layout: LayoutType,
    pub output_layout: LayoutType,
    /// Depth of the cubes passed to `remap_output`; sizes the remap scratch
    /// buffer. `None` disables remapping.
    pub remap_depth: Option<usize>,
}

impl ConnectorConfig {
    /// Kernel of `kernel_size`, no padding, stride 1, type 1 lowering, CRDB in and out.
    pub fn new(kernel_size: usize) -> Self {
        ConnectorConfig {
            kernel_size,
            padding: 0,
            stride: 1,
            lowering: LoweringType::Type1,
            input_layout: LayoutType::Crdb,
            output_layout: LayoutType::Crdb,
            remap_depth: None,
        }
    }

    pub fn with_padding(mut self, padding: usize) -> Self {
        self.padding = padding;
        self
    }

    pub fn with_stride(mut self, stride: usize) -> Self {
        self.stride = stride;
        self
    }

    pub fn with_lowering(mut self, lowering: LoweringType) -> Self {
        self.lowering = lowering;
        self
    }

    pub fn with_layouts(mut self, input: LayoutType, output: LayoutType) -> Self {
        self.input_layout = input;
        self.output_layout = output;
        self
    }

    pub fn with_remap_depth(mut self, depth: usize) -> Self {
        self.remap_depth = Some(depth);
        self
    }

    /// Validate against an input shape and derive the lowering geometry.
    pub fn geometry(&self, input: Dims4) -> Result<LoweringGeometry> {
        LoweringGeometry::new(input, self.kernel_size, self.padding, self.stride)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;

    #[test]
    fn test_defaults() {
        let c = ConnectorConfig::new(5);
        assert_eq!(c.padding, 0);
        assert_eq!(c.stride, 1);
        assert_eq!(c.lowering, LoweringType::Type1);
        assert_eq!(c.remap_depth, None);
    }

    #[test]
    fn test_geometry_rejects_bad_stride() {
        let c = ConnectorConfig::new(3).with_stride(2);
        let err = c.geometry(Dims4::new(6, 6, 1, 1)).unwrap_err();
        assert!(matches!(err, Error::Configuration { .. }));
    }

    #[test]
    fn test_geometry_rejects_empty_input() {
        let c = ConnectorConfig::new(1);
        assert!(c.geometry(Dims4::new(4, 4, 0, 1)).is_err());
    }
}
