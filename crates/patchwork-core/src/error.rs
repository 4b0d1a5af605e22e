use crate::dims::Dims4;
use crate::dtype::DType;
use crate::layout::{LayoutType, LoweringType};

/// All errors that can occur within patchwork.
///
/// Configuration and shape errors are programming bugs rather than transient
/// conditions: they are detected before any element is written and are never
/// retried.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Kernel size, stride and padding do not produce a valid output extent.
    #[error("invalid lowering configuration: {reason}")]
    Configuration { reason: String },

    /// A cube handed to the connector does not match the dims fixed at construction.
    #[error("shape mismatch for {what}: expected {expected}, got {got}")]
    ShapeMismatch {
        what: &'static str,
        expected: Dims4,
        got: Dims4,
    },

    /// No specialised implementation exists for this combination.
    #[error(
        "no lowering implementation for dtype {dtype}, layout {input_layout} -> {output_layout}, \
         {lowering} on backend {backend}"
    )]
    UnimplementedCombination {
        dtype: DType,
        input_layout: LayoutType,
        output_layout: LayoutType,
        lowering: LoweringType,
        backend: String,
    },

    /// A cube carries a different layout tag than the connector was built for.
    #[error("layout mismatch for {what}: expected {expected}, got {got}")]
    LayoutMismatch {
        what: &'static str,
        expected: LayoutType,
        got: LayoutType,
    },

    /// DType mismatch between two buffers of one operation.
    #[error("dtype mismatch: expected {expected}, got {got}")]
    DTypeMismatch { expected: DType, got: DType },

    /// A buffer holds fewer elements than the operation needs.
    #[error("buffer too small for {what}: need {needed} elements, have {len}")]
    BufferTooSmall {
        what: &'static str,
        needed: usize,
        len: usize,
    },

    /// Failure reported by the execution backend (allocation, launch, BLAS).
    #[error("driver error: {0}")]
    Driver(String),

    /// Generic message for cases not covered above.
    #[error("{0}")]
    Msg(String),
}

impl Error {
    /// Create an error from any string message.
    pub fn msg(s: impl Into<String>) -> Self {
        Error::Msg(s.into())
    }

    pub fn driver(s: impl Into<String>) -> Self {
        Error::Driver(s.into())
    }

    pub fn configuration(reason: impl Into<String>) -> Self {
        Error::Configuration {
            reason: reason.into(),
        }
    }
}

/// Convenience Result type used throughout patchwork.
pub type Result<T> = std::result::Result<T, Error>;

/// Macro for early return with a formatted error message.
/// Usage: `bail!("something went wrong: {}", detail)`
#[macro_export]
macro_rules! bail {
    ($($arg:tt)*) => {
        return Err($crate::Error::Msg(format!($($arg)*)))
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_shape_mismatch_message_names_dims() {
        let err = Error::ShapeMismatch {
            what: "input cube",
            expected: Dims4::new(4, 4, 1, 2),
            got: Dims4::new(4, 5, 1, 2),
        };
        let msg = err.to_string();
        assert!(msg.contains("input cube"));
        assert!(msg.contains("R=4, C=4, D=1, B=2"));
        assert!(msg.contains("R=4, C=5, D=1, B=2"));
    }

    #[test]
    fn test_bail_macro() {
        fn fails() -> Result<()> {
            bail!("stride {} is not allowed", 0);
        }
        let err = fails().unwrap_err();
        assert_eq!(err.to_string(), "stride 0 is not allowed");
    }
}
