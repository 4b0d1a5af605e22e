// CPU Driver: host implementation of patchwork's DeviceDriver
//
// Buffers are plain Vecs (CpuStorage, one variant per dtype). The lowering
// primitives call the shared kernels in patchwork_core::kernels; with a
// thread pool configured, they are partitioned so each rayon worker owns a
// disjoint part of the destination:
//
//   lower_cube         : one depth slab (K*K lowered rows) per task
//   inverse_lower_cube : one (d, b) feature map of the input per task
//   gemm               : one band of rows of C per task
//
// No task ever writes a cell another task reads or writes, so there are no
// atomics and no locks on the data path. Summation order inside a feature
// map differs from the sequential kernel; results agree up to rounding.
//
// Random fills share one seeded StdRng behind a Mutex, so a driver built
// with `with_seed` produces a reproducible stream.
//
// USAGE:
//   let driver = CpuDriver::new().with_threads(4)?;
//   let mut conn = Connector::new(driver, (28, 28, 3, 16), DType::F32, config)?;

pub mod ops;
pub mod storage;

use std::fmt;
use std::sync::{Arc, Mutex};

use rand::rngs::StdRng;
use rand::SeedableRng;
use rand_distr::{Bernoulli, Distribution, Normal, Uniform};
use rayon::prelude::*;
use rayon::ThreadPool;
use tracing::debug;

use patchwork_core::driver::{ensure_len, ensure_same_dtype};
use patchwork_core::kernels;
use patchwork_core::{
    ApplyOp, DType, DeviceDriver, Dims4, DriverStorage, Error, LoweringGeometry, Result,
};

pub use storage::CpuStorage;
use storage::{with_dtype, with_same_dtype};

/// Host driver. Clonable; clones share the thread pool and the RNG.
#[derive(Clone)]
pub struct CpuDriver {
    pool: Option<Arc<ThreadPool>>,
    rng: Arc<Mutex<StdRng>>,
}

impl CpuDriver {
    /// Sequential driver seeded from the OS.
    pub fn new() -> Self {
        CpuDriver {
            pool: None,
            rng: Arc::new(Mutex::new(StdRng::from_entropy())),
        }
    }

    /// Use a dedicated rayon pool of `n_threads` workers (1 means sequential).
    pub fn with_threads(mut self, n_threads: usize) -> Result<Self> {
        self.set_num_threads(n_threads)?;
        Ok(self)
    }

    /// Reseed the random stream.
    pub fn with_seed(self, seed: u64) -> Self {
        CpuDriver {
            rng: Arc::new(Mutex::new(StdRng::seed_from_u64(seed))),
            ..self
        }
    }

    /// Worker count, 1 when running sequentially.
    pub fn num_threads(&self) -> usize {
        self.pool.as_ref().map_or(1, |p| p.current_num_threads())
    }

    /// Run `f` inside the pool when there is one.
    fn install<R: Send>(&self, f: impl FnOnce() -> R + Send) -> Option<R> {
        self.pool.as_ref().map(|pool| pool.install(f))
    }

    fn sample(&self, n: usize, op: ApplyOp) -> Result<Vec<f64>> {
        let mut rng = self
            .rng
            .lock()
            .map_err(|_| Error::driver("cpu rng mutex poisoned"))?;
        let rng = &mut *rng;
        let values = match op {
            ApplyOp::Uniform { low, high } => {
                let dist = Uniform::new(low, high);
                (0..n).map(|_| dist.sample(rng)).collect()
            }
            ApplyOp::Bernoulli { p } => {
                let dist = Bernoulli::new(p).map_err(|e| Error::msg(format!("bernoulli: {e}")))?;
                (0..n).map(|_| if dist.sample(rng) { 1.0 } else { 0.0 }).collect()
            }
            ApplyOp::Gaussian { mean, std_dev } => {
                let dist = Normal::new(mean, std_dev)
                    .map_err(|e| Error::msg(format!("gaussian: {e}")))?;
                (0..n).map(|_| dist.sample(rng)).collect()
            }
            ApplyOp::Constant(_) | ApplyOp::Scale(_) => {
                return Err(Error::msg(format!("{op:?} is not a random distribution")))
            }
        };
        Ok(values)
    }
}

impl Default for CpuDriver {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for CpuDriver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "CpuDriver(threads={})", self.num_threads())
    }
}

impl DeviceDriver for CpuDriver {
    type Storage = CpuStorage;

    fn name(&self) -> String {
        "cpu".to_string()
    }

    fn supports(&self, _dtype: DType) -> bool {
        true
    }

    fn zeros(&self, n: usize, dtype: DType) -> Result<CpuStorage> {
        Ok(CpuStorage::zeros(n, dtype))
    }

    fn from_f64_slice(&self, data: &[f64], dtype: DType) -> Result<CpuStorage> {
        Ok(CpuStorage::from_f64(data, dtype))
    }

    fn to_f64_vec(&self, src: &CpuStorage) -> Result<Vec<f64>> {
        Ok(src.to_f64_vec())
    }

    fn memcpy(&self, dst: &mut CpuStorage, src: &CpuStorage) -> Result<()> {
        ensure_len("memcpy destination", dst, src.len())?;
        with_same_dtype!(dst, src, |d, s| d[..s.len()].copy_from_slice(s));
        Ok(())
    }

    fn memset(&self, dst: &mut CpuStorage, value: f64) -> Result<()> {
        with_dtype!(dst, |d| ops::fill(value, d));
        Ok(())
    }

    fn apply(&self, dst: &mut CpuStorage, n: usize, op: ApplyOp) -> Result<()> {
        op.validate()?;
        ensure_len("apply destination", dst, n)?;
        match op {
            ApplyOp::Constant(v) => with_dtype!(dst, |d| ops::fill(v, &mut d[..n])),
            ApplyOp::Scale(alpha) => with_dtype!(dst, |d| ops::scale(alpha, &mut d[..n])),
            _ => {
                let values = self.sample(n, op)?;
                with_dtype!(dst, |d| ops::store(&values, &mut d[..n]))
            }
        }
        Ok(())
    }

    fn axpy(&self, alpha: f64, x: &CpuStorage, y: &mut CpuStorage) -> Result<()> {
        ensure_len("axpy y", y, x.len())?;
        with_same_dtype!(y, x, |y, x| ops::axpy(alpha, x, y));
        Ok(())
    }

    fn axpby(&self, alpha: f64, x: &CpuStorage, beta: f64, y: &mut CpuStorage) -> Result<()> {
        ensure_len("axpby y", y, x.len())?;
        with_same_dtype!(y, x, |y, x| ops::axpby(alpha, x, beta, y));
        Ok(())
    }

    fn gemm(
        &self,
        a: &CpuStorage,
        b: &CpuStorage,
        c: &mut CpuStorage,
        m: usize,
        n: usize,
        k: usize,
        alpha: f64,
        beta: f64,
    ) -> Result<()> {
        ensure_same_dtype(a, b)?;
        ensure_len("gemm a", a, m * k)?;
        ensure_len("gemm b", b, k * n)?;
        ensure_len("gemm c", c, m * n)?;
        if m == 0 || n == 0 {
            return Ok(());
        }
        // a and b share a dtype, so matching c against a covers all three
        match (c, a, b) {
            (CpuStorage::F16(c), CpuStorage::F16(a), CpuStorage::F16(b)) => {
                self.gemm_typed(a, b, &mut c[..m * n], n, k, alpha, beta)
            }
            (CpuStorage::BF16(c), CpuStorage::BF16(a), CpuStorage::BF16(b)) => {
                self.gemm_typed(a, b, &mut c[..m * n], n, k, alpha, beta)
            }
            (CpuStorage::F32(c), CpuStorage::F32(a), CpuStorage::F32(b)) => {
                self.gemm_typed(a, b, &mut c[..m * n], n, k, alpha, beta)
            }
            (CpuStorage::F64(c), CpuStorage::F64(a), CpuStorage::F64(b)) => {
                self.gemm_typed(a, b, &mut c[..m * n], n, k, alpha, beta)
            }
            (c, a, _) => {
                return Err(Error::DTypeMismatch {
                    expected: a.dtype(),
                    got: c.dtype(),
                })
            }
        }
        Ok(())
    }

    fn set_num_threads(&mut self, n_threads: usize) -> Result<()> {
        if n_threads <= 1 {
            self.pool = None;
            return Ok(());
        }
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(n_threads)
            .thread_name(|i| format!("patchwork-cpu-{i}"))
            .build()
            .map_err(|e| Error::driver(format!("thread pool with {n_threads} workers: {e}")))?;
        debug!(n_threads, "cpu driver thread pool");
        self.pool = Some(Arc::new(pool));
        Ok(())
    }

    fn lower_cube(
        &self,
        geom: &LoweringGeometry,
        input: &CpuStorage,
        output: &mut CpuStorage,
    ) -> Result<()> {
        let n_in = geom.input.elem_count();
        let n_out = geom.lowered_dims().elem_count();
        ensure_len("lowering input", input, n_in)?;
        ensure_len("lowered matrix", output, n_out)?;
        with_same_dtype!(output, input, |out, inp| {
            let (inp, out) = (&inp[..n_in], &mut out[..n_out]);
            let slab_len = geom.kernel_area() * geom.lowered_cols();
            let parallel = self.install(|| {
                out.par_chunks_mut(slab_len)
                    .enumerate()
                    .for_each(|(d, slab)| kernels::lower_depth(geom, d, inp, slab))
            });
            if parallel.is_none() {
                kernels::lower(geom, inp, out);
            }
        });
        Ok(())
    }

    fn inverse_lower_cube(
        &self,
        geom: &LoweringGeometry,
        grad: &CpuStorage,
        input: &mut CpuStorage,
    ) -> Result<()> {
        let n_in = geom.input.elem_count();
        let n_grad = geom.lowered_dims().elem_count();
        ensure_len("lowered gradient", grad, n_grad)?;
        ensure_len("input gradient", input, n_in)?;
        with_same_dtype!(input, grad, |inp, g| {
            let (g, inp) = (&g[..n_grad], &mut inp[..n_in]);
            let depth = geom.input.d;
            let parallel = self.install(|| {
                inp.par_chunks_mut(geom.input.map_len())
                    .enumerate()
                    .for_each(|(m, map)| kernels::inverse_lower_map(geom, m % depth, m / depth, g, map))
            });
            if parallel.is_none() {
                kernels::inverse_lower(geom, g, inp);
            }
        });
        Ok(())
    }

    fn remap_cube(&self, dims: Dims4, src: &CpuStorage, dst: &mut CpuStorage) -> Result<()> {
        let n = dims.elem_count();
        ensure_len("remap source", src, n)?;
        ensure_len("remap destination", dst, n)?;
        with_same_dtype!(dst, src, |d, s| kernels::remap(dims, &s[..n], &mut d[..n]));
        Ok(())
    }
}

impl CpuDriver {
    #[allow(clippy::too_many_arguments)]
    fn gemm_typed<T: patchwork_core::WithDType>(
        &self,
        a: &[T],
        b: &[T],
        c: &mut [T],
        n: usize,
        k: usize,
        alpha: f64,
        beta: f64,
    ) {
        let parallel = self.install(|| {
            c.par_chunks_mut(n)
                .enumerate()
                .for_each(|(i, row)| ops::gemm_rows(a, b, row, i, n, k, alpha, beta))
        });
        if parallel.is_none() {
            ops::gemm_rows(a, b, c, 0, n, k, alpha, beta);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_debug_shows_threads() {
        let d = CpuDriver::new();
        assert_eq!(format!("{d:?}"), "CpuDriver(threads=1)");
    }

    #[test]
    fn test_set_num_threads_one_is_sequential() {
        let mut d = CpuDriver::new().with_threads(3).unwrap();
        assert_eq!(d.num_threads(), 3);
        d.set_num_threads(1).unwrap();
        assert_eq!(d.num_threads(), 1);
    }

    #[test]
    fn test_sample_rejects_non_random_op() {
        let d = CpuDriver::new();
        assert!(d.sample(3, ApplyOp::Scale(1.0)).is_err());
    }
}
