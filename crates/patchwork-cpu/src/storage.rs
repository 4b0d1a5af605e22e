use half::{bf16, f16};

use patchwork_core::{DType, DriverStorage, WithDType};

/// Host buffer: one contiguous `Vec` per dtype.
#[derive(Debug, Clone, PartialEq)]
pub enum CpuStorage {
    F16(Vec<f16>),
    BF16(Vec<bf16>),
    F32(Vec<f32>),
    F64(Vec<f64>),
}

impl CpuStorage {
    /// `n` zeros of `dtype`.
    pub fn zeros(n: usize, dtype: DType) -> Self {
        match dtype {
            DType::F16 => CpuStorage::F16(vec![f16::ZERO; n]),
            DType::BF16 => CpuStorage::BF16(vec![bf16::ZERO; n]),
            DType::F32 => CpuStorage::F32(vec![0.0; n]),
            DType::F64 => CpuStorage::F64(vec![0.0; n]),
        }
    }

    /// Convert host values into a buffer of `dtype`.
    pub fn from_f64(data: &[f64], dtype: DType) -> Self {
        fn convert<T: WithDType>(data: &[f64]) -> Vec<T> {
            data.iter().map(|&v| T::from_f64(v)).collect()
        }
        match dtype {
            DType::F16 => CpuStorage::F16(convert(data)),
            DType::BF16 => CpuStorage::BF16(convert(data)),
            DType::F32 => CpuStorage::F32(convert(data)),
            DType::F64 => CpuStorage::F64(convert(data)),
        }
    }

    pub fn to_f64_vec(&self) -> Vec<f64> {
        fn convert<T: WithDType>(data: &[T]) -> Vec<f64> {
            data.iter().map(|v| v.to_f64()).collect()
        }
        match self {
            CpuStorage::F16(v) => convert(v),
            CpuStorage::BF16(v) => convert(v),
            CpuStorage::F32(v) => convert(v),
            CpuStorage::F64(v) => convert(v),
        }
    }

    /// Borrow as `&[f32]` if this buffer holds F32.
    pub fn as_f32(&self) -> Option<&[f32]> {
        match self {
            CpuStorage::F32(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<&[f64]> {
        match self {
            CpuStorage::F64(v) => Some(v),
            _ => None,
        }
    }
}

impl DriverStorage for CpuStorage {
    fn dtype(&self) -> DType {
        match self {
            CpuStorage::F16(_) => DType::F16,
            CpuStorage::BF16(_) => DType::BF16,
            CpuStorage::F32(_) => DType::F32,
            CpuStorage::F64(_) => DType::F64,
        }
    }

    fn len(&self) -> usize {
        match self {
            CpuStorage::F16(v) => v.len(),
            CpuStorage::BF16(v) => v.len(),
            CpuStorage::F32(v) => v.len(),
            CpuStorage::F64(v) => v.len(),
        }
    }
}

impl From<Vec<f32>> for CpuStorage {
    fn from(v: Vec<f32>) -> Self {
        CpuStorage::F32(v)
    }
}

impl From<Vec<f64>> for CpuStorage {
    fn from(v: Vec<f64>) -> Self {
        CpuStorage::F64(v)
    }
}

/// Run `$body` with `$a`/`$b` bound to the inner `Vec`s of two storages of
/// the same dtype; returns `DTypeMismatch` from the enclosing fn otherwise.
macro_rules! with_same_dtype {
    ($lhs:expr, $rhs:expr, |$a:ident, $b:ident| $body:expr) => {
        match ($lhs, $rhs) {
            (CpuStorage::F16($a), CpuStorage::F16($b)) => $body,
            (CpuStorage::BF16($a), CpuStorage::BF16($b)) => $body,
            (CpuStorage::F32($a), CpuStorage::F32($b)) => $body,
            (CpuStorage::F64($a), CpuStorage::F64($b)) => $body,
            (lhs, rhs) => {
                return Err(patchwork_core::Error::DTypeMismatch {
                    expected: patchwork_core::DriverStorage::dtype(&*lhs),
                    got: patchwork_core::DriverStorage::dtype(&*rhs),
                })
            }
        }
    };
}

/// Run `$body` with `$a` bound to the inner `Vec` of one storage.
macro_rules! with_dtype {
    ($storage:expr, |$a:ident| $body:expr) => {
        match $storage {
            CpuStorage::F16($a) => $body,
            CpuStorage::BF16($a) => $body,
            CpuStorage::F32($a) => $body,
            CpuStorage::F64($a) => $body,
        }
    };
}

pub(crate) use with_dtype;
pub(crate) use with_same_dtype;
