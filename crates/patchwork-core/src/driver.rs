use std::fmt;

use crate::dims::Dims4;
use crate::dtype::DType;
use crate::error::{Error, Result};
use crate::geometry::LoweringGeometry;

// DeviceDriver: the only way patchwork touches a device
//
// A driver owns all computation and data movement *inside* one device:
// memory set/copy, elementwise apply, BLAS-style accumulate and multiply,
// random fills, and the three lowering primitives. Connectors and cubes are
// purely logical; every element they move goes through a driver.
//
// Cross-device transfers are not a driver's job. Host access is limited to
// `from_f64_slice` / `to_f64_vec`, used for initialization and inspection.
//
// Elementwise functions are described by the ApplyOp enum rather than by
// closures, so a GPU driver can run the same request as a kernel.

/// A buffer living on one driver's device.
pub trait DriverStorage: Clone + Send + Sync + fmt::Debug + 'static {
    /// The data type of the elements in this storage.
    fn dtype(&self) -> DType;

    /// Total number of elements in this storage.
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Elementwise function applied in place by [`DeviceDriver::apply`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ApplyOp {
    /// x = value
    Constant(f64),
    /// x = alpha * x
    Scale(f64),
    /// x ~ U[low, high)
    Uniform { low: f64, high: f64 },
    /// x ~ Bernoulli(p), stored as 0 or 1
    Bernoulli { p: f64 },
    /// x ~ N(mean, std_dev^2)
    Gaussian { mean: f64, std_dev: f64 },
}

impl ApplyOp {
    /// Reject parameters the random distributions cannot be built from.
    pub fn validate(&self) -> Result<()> {
        match *self {
            ApplyOp::Uniform { low, high } if !(low < high) || !(high - low).is_finite() => {
                Err(Error::msg(format!("uniform range [{low}, {high}) is empty or unbounded")))
            }
            ApplyOp::Bernoulli { p } if !(0.0..=1.0).contains(&p) => {
                Err(Error::msg(format!("bernoulli probability {p} outside [0, 1]")))
            }
            ApplyOp::Gaussian { std_dev, .. } if !(std_dev >= 0.0) || !std_dev.is_finite() => {
                Err(Error::msg(format!("gaussian std dev {std_dev} is invalid")))
            }
            _ => Ok(()),
        }
    }

    pub fn is_random(&self) -> bool {
        matches!(
            self,
            ApplyOp::Uniform { .. } | ApplyOp::Bernoulli { .. } | ApplyOp::Gaussian { .. }
        )
    }
}

/// Execution backend used by connectors and cubes.
///
/// All operations are synchronous from the caller's point of view: when a
/// method returns, its writes are visible to the next call on the same driver.
pub trait DeviceDriver: Clone + Send + Sync + fmt::Debug + 'static {
    /// The storage type for this driver.
    type Storage: DriverStorage;

    /// A human-readable name for this device (e.g., "cpu", "cuda:0").
    fn name(&self) -> String;

    /// Whether the lowering primitives are implemented for `dtype`.
    fn supports(&self, dtype: DType) -> bool;

    //  Allocation and host transfer

    /// Allocate `n` zeroed elements.
    fn zeros(&self, n: usize, dtype: DType) -> Result<Self::Storage>;

    /// Create storage from host values, converting to `dtype`.
    fn from_f64_slice(&self, data: &[f64], dtype: DType) -> Result<Self::Storage>;

    /// Copy storage back to the host (for inspection and tests).
    fn to_f64_vec(&self, src: &Self::Storage) -> Result<Vec<f64>>;

    //  Memory manipulation

    /// Copy all of `src` into the front of `dst`.
    fn memcpy(&self, dst: &mut Self::Storage, src: &Self::Storage) -> Result<()>;

    /// Set every element of `dst` to `value`.
    fn memset(&self, dst: &mut Self::Storage, value: f64) -> Result<()>;

    //  Elementwise and BLAS-style math

    /// Apply `op` in place to the first `n` elements of `dst`.
    fn apply(&self, dst: &mut Self::Storage, n: usize, op: ApplyOp) -> Result<()>;

    /// y = alpha * x + y
    fn axpy(&self, alpha: f64, x: &Self::Storage, y: &mut Self::Storage) -> Result<()>;

    /// y = alpha * x + beta * y
    fn axpby(&self, alpha: f64, x: &Self::Storage, beta: f64, y: &mut Self::Storage)
        -> Result<()>;

    /// Row-major GEMM: c = alpha * a[m x k] * b[k x n] + beta * c[m x n].
    #[allow(clippy::too_many_arguments)]
    fn gemm(
        &self,
        a: &Self::Storage,
        b: &Self::Storage,
        c: &mut Self::Storage,
        m: usize,
        n: usize,
        k: usize,
        alpha: f64,
        beta: f64,
    ) -> Result<()>;

    /// Limit the worker threads the driver may use. Drivers without a host
    /// thread pool ignore this.
    fn set_num_threads(&mut self, n_threads: usize) -> Result<()>;

    //  Lowering primitives

    /// Zero `output` and scatter `input` (a CRDB cube of `geom.input`) into it.
    fn lower_cube(
        &self,
        geom: &LoweringGeometry,
        input: &Self::Storage,
        output: &mut Self::Storage,
    ) -> Result<()>;

    /// Accumulate the lowered gradient `grad` into `input` (not zeroed here).
    fn inverse_lower_cube(
        &self,
        geom: &LoweringGeometry,
        grad: &Self::Storage,
        input: &mut Self::Storage,
    ) -> Result<()>;

    /// Regroup `src` (depth-of-batch map order) into CRDB order in `dst`.
    fn remap_cube(&self, dims: Dims4, src: &Self::Storage, dst: &mut Self::Storage)
        -> Result<()>;

    //  Random generators

    fn rand_uniform(&self, low: f64, high: f64) -> ApplyOp {
        ApplyOp::Uniform { low, high }
    }

    fn rand_bernoulli(&self, p: f64) -> ApplyOp {
        ApplyOp::Bernoulli { p }
    }

    fn rand_gaussian(&self, mean: f64, std_dev: f64) -> ApplyOp {
        ApplyOp::Gaussian { mean, std_dev }
    }

    //  Initializers built on the primitives above

    /// Xavier uniform: U(-s, s) with s = sqrt(3 / fan_in), fan_in = n / n_batch.
    fn xavier_initialize(&self, arr: &mut Self::Storage, n_elements: usize, n_batch: usize)
        -> Result<()> {
        if n_batch == 0 || n_elements < n_batch {
            return Err(Error::msg(format!(
                "xavier init needs n_batch in 1..={n_elements}, got {n_batch}"
            )));
        }
        let fan_in = (n_elements / n_batch) as f64;
        let scale = (3.0 / fan_in).sqrt();
        let op = self.rand_uniform(-scale, scale);
        self.apply(arr, n_elements, op)
    }

    fn bernoulli_initialize(&self, arr: &mut Self::Storage, n_elements: usize, p: f64)
        -> Result<()> {
        let op = self.rand_bernoulli(p);
        self.apply(arr, n_elements, op)
    }

    fn gaussian_initialize(
        &self,
        arr: &mut Self::Storage,
        n_elements: usize,
        mean: f64,
        std_dev: f64,
    ) -> Result<()> {
        let op = self.rand_gaussian(mean, std_dev);
        self.apply(arr, n_elements, op)
    }

    fn constant_initialize(&self, arr: &mut Self::Storage, value: f64, n_elements: usize)
        -> Result<()> {
        self.apply(arr, n_elements, ApplyOp::Constant(value))
    }

    /// x = x - y (one plain gradient step with the rate folded into y).
    fn apply_grad(&self, x: &mut Self::Storage, y: &Self::Storage) -> Result<()> {
        self.axpy(-1.0, y, x)
    }
}

/// Fail with [`Error::BufferTooSmall`] unless `storage` holds `needed` elements.
pub fn ensure_len<S: DriverStorage>(what: &'static str, storage: &S, needed: usize) -> Result<()> {
    if storage.len() < needed {
        return Err(Error::BufferTooSmall {
            what,
            needed,
            len: storage.len(),
        });
    }
    Ok(())
}

/// Fail with [`Error::DTypeMismatch`] unless both buffers share a dtype.
pub fn ensure_same_dtype<S: DriverStorage>(lhs: &S, rhs: &S) -> Result<()> {
    if lhs.dtype() != rhs.dtype() {
        return Err(Error::DTypeMismatch {
            expected: lhs.dtype(),
            got: rhs.dtype(),
        });
    }
    Ok(())
}
