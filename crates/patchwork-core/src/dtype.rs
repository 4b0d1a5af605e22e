use std::fmt;

// DType: Element types a cube can hold
//
//   F16 : 16-bit IEEE half float, storage-only on the CPU path
//   BF16: 16-bit brain float, storage-only on the CPU path
//   F32 : 32-bit float, the type every backend lowers natively
//   F64 : 64-bit float, for reference checks
//
// The lowering kernels only move and add elements, so they are generic over
// any type implementing WithDType. Whether a backend can lower a dtype is a
// separate question answered by `DeviceDriver::supports`.

/// Enum of all supported element data types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DType {
    F16,
    BF16,
    F32,
    F64,
}

impl DType {
    /// Size of one element in bytes.
    pub fn size_in_bytes(&self) -> usize {
        match self {
            DType::F16 => 2,
            DType::BF16 => 2,
            DType::F32 => 4,
            DType::F64 => 8,
        }
    }

    /// Whether this is a half-precision type (F16 or BF16).
    pub fn is_half(&self) -> bool {
        matches!(self, DType::F16 | DType::BF16)
    }
}

impl fmt::Display for DType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            DType::F16 => "f16",
            DType::BF16 => "bf16",
            DType::F32 => "f32",
            DType::F64 => "f64",
        };
        write!(f, "{}", s)
    }
}

/// Trait implemented by Rust types that can be stored in a cube.
///
/// Provides the mapping between the concrete Rust type and the DType enum,
/// plus conversions to/from f64 for drivers that compute in double precision.
/// `Zero` supplies the value padding cells are written with.
pub trait WithDType:
    Copy + Send + Sync + 'static + num_traits::Zero + num_traits::One + std::fmt::Debug
{
    /// The corresponding DType enum variant.
    const DTYPE: DType;

    /// Convert this value to f64.
    fn to_f64(self) -> f64;

    /// Create a value of this type from f64.
    fn from_f64(v: f64) -> Self;
}

impl WithDType for f32 {
    const DTYPE: DType = DType::F32;
    fn to_f64(self) -> f64 {
        self as f64
    }
    fn from_f64(v: f64) -> Self {
        v as f32
    }
}

impl WithDType for f64 {
    const DTYPE: DType = DType::F64;
    fn to_f64(self) -> f64 {
        self
    }
    fn from_f64(v: f64) -> Self {
        v
    }
}

impl WithDType for half::f16 {
    const DTYPE: DType = DType::F16;
    fn to_f64(self) -> f64 {
        self.to_f32() as f64
    }
    fn from_f64(v: f64) -> Self {
        half::f16::from_f64(v)
    }
}

impl WithDType for half::bf16 {
    const DTYPE: DType = DType::BF16;
    fn to_f64(self) -> f64 {
        self.to_f32() as f64
    }
    fn from_f64(v: f64) -> Self {
        half::bf16::from_f64(v)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sizes() {
        assert_eq!(DType::F16.size_in_bytes(), 2);
        assert_eq!(DType::F32.size_in_bytes(), 4);
        assert_eq!(DType::F64.size_in_bytes(), 8);
        assert!(DType::BF16.is_half());
        assert!(!DType::F32.is_half());
    }

    #[test]
    fn test_with_dtype_roundtrip() {
        assert_eq!(<f32 as WithDType>::from_f64(2.5).to_f64(), 2.5);
        assert_eq!(half::f16::from_f64(1.5).to_f64(), 1.5);
        assert_eq!(<half::bf16 as num_traits::Zero>::zero().to_f64(), 0.0);
        assert_eq!(<f64 as WithDType>::DTYPE, DType::F64);
    }
}
