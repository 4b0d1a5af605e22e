// CUDA Driver: GPU implementation of patchwork's DeviceDriver using cudarc
//
// ARCHITECTURE:
// - CudaDriver wraps cudarc's device handle + cuBLAS handle + a host RNG
// - CudaStorage is an enum over CudaSlice<T> for F32 and F64; the lowering
//   kernels are not instantiated for half types, so `supports` is false there
//   and a connector asking for them fails at construction
// - Kernels are compiled once per driver via NVRTC (see kernels.rs)
// - GEMM goes through cuBLAS with the usual row-major trick:
//   C^T = B^T * A^T in column-major terms
// - Random numbers are drawn on the host and uploaded
//
// All launches go to the device's default stream, so calls on one driver are
// ordered. The lowering primitives synchronize before returning so that the
// connector's timing reports cover the kernel itself.
//
// USAGE:
//   let driver = CudaDriver::new(0)?;
//   let mut conn = Connector::new(driver, (28, 28, 3, 16), DType::F32, config)?;

mod kernels;

use std::fmt;
use std::sync::{Arc, Mutex};

use cudarc::cublas::sys::cublasOperation_t;
use cudarc::cublas::CudaBlas;
use cudarc::driver::{
    CudaSlice, DevicePtr, DevicePtrMut, DeviceRepr, DeviceSlice, LaunchAsync, LaunchConfig,
    ValidAsZeroBits,
};
use cudarc::nvrtc::{compile_ptx_with_opts, CompileOptions};
use rand::rngs::StdRng;
use rand::SeedableRng;
use rand_distr::{Bernoulli, Distribution, Normal, Uniform};
use tracing::debug;

use patchwork_core::driver::{ensure_len, ensure_same_dtype};
use patchwork_core::{
    ApplyOp, DType, DeviceDriver, Dims4, DriverStorage, Error, LoweringGeometry, Result,
    WithDType,
};

// CudaDriver: device handle, cuBLAS handle and compiled kernels

/// A CUDA device handle. Clonable (uses Arc internally); clones share the
/// device, the cuBLAS handle and the RNG.
#[derive(Clone)]
pub struct CudaDriver {
    dev: Arc<cudarc::driver::CudaDevice>,
    blas: Arc<CudaBlas>,
    rng: Arc<Mutex<StdRng>>,
    ordinal: usize,
}

impl CudaDriver {
    /// Open GPU `ordinal` and compile the patchwork kernels for it.
    pub fn new(ordinal: usize) -> Result<Self> {
        let dev = cudarc::driver::CudaDevice::new(ordinal)
            .map_err(|e| Error::driver(format!("CUDA device creation failed: {e}")))?;

        let blas = CudaBlas::new(dev.clone())
            .map_err(|e| Error::driver(format!("cuBLAS init failed: {e}")))?;

        // Target the device's own SASS so PTX versions never have to match.
        let major = dev
            .attribute(cudarc::driver::sys::CUdevice_attribute_enum::CU_DEVICE_ATTRIBUTE_COMPUTE_CAPABILITY_MAJOR)
            .unwrap_or(8);
        let minor = dev
            .attribute(cudarc::driver::sys::CUdevice_attribute_enum::CU_DEVICE_ATTRIBUTE_COMPUTE_CAPABILITY_MINOR)
            .unwrap_or(0);
        let arch: &'static str = Box::leak(format!("sm_{major}{minor}").into_boxed_str());
        let opts = CompileOptions {
            arch: Some(arch),
            ..Default::default()
        };
        let ptx = compile_ptx_with_opts(kernels::KERNEL_SOURCE, opts)
            .map_err(|e| Error::driver(format!("NVRTC compilation failed: {e}")))?;
        dev.load_ptx(ptx, kernels::MODULE_NAME, kernels::KERNEL_NAMES)
            .map_err(|e| Error::driver(format!("PTX load failed: {e}")))?;
        debug!(ordinal, arch, "cuda driver ready");

        Ok(CudaDriver {
            dev,
            blas: Arc::new(blas),
            rng: Arc::new(Mutex::new(StdRng::from_entropy())),
            ordinal,
        })
    }

    /// Reseed the host RNG used for random fills.
    pub fn with_seed(self, seed: u64) -> Self {
        CudaDriver {
            rng: Arc::new(Mutex::new(StdRng::seed_from_u64(seed))),
            ..self
        }
    }

    pub fn ordinal(&self) -> usize {
        self.ordinal
    }

    /// Get the underlying cudarc device handle.
    pub fn device(&self) -> &Arc<cudarc::driver::CudaDevice> {
        &self.dev
    }

    /// Block until every launched kernel has finished.
    pub fn synchronize(&self) -> Result<()> {
        self.dev
            .synchronize()
            .map_err(|e| Error::driver(format!("synchronize: {e}")))
    }

    fn get_func(&self, name: &str) -> Result<cudarc::driver::CudaFunction> {
        self.dev
            .get_func(kernels::MODULE_NAME, name)
            .ok_or_else(|| Error::driver(format!("CUDA kernel '{name}' not found")))
    }

    // ── Typed helpers ─────────────────────────────────────────────────────

    fn alloc<T: CudaElem>(&self, n: usize) -> Result<CudaSlice<T>> {
        self.dev
            .alloc_zeros::<T>(n)
            .map_err(|e| Error::driver(format!("alloc {} x {n}: {e}", T::DTYPE)))
    }

    fn upload<T: CudaElem>(&self, host: Vec<T>) -> Result<CudaSlice<T>> {
        self.dev
            .htod_copy(host)
            .map_err(|e| Error::driver(format!("htod {}: {e}", T::DTYPE)))
    }

    fn download<T: CudaElem>(&self, src: &CudaSlice<T>) -> Result<Vec<f64>> {
        let host = self
            .dev
            .dtoh_sync_copy(src)
            .map_err(|e| Error::driver(format!("dtoh {}: {e}", T::DTYPE)))?;
        Ok(host.into_iter().map(WithDType::to_f64).collect())
    }

    fn copy_prefix<T: CudaElem>(&self, dst: &mut CudaSlice<T>, src: &CudaSlice<T>) -> Result<()> {
        let mut front = dst.slice_mut(0..src.len());
        self.dev
            .dtod_copy(src, &mut front)
            .map_err(|e| Error::driver(format!("dtod {}: {e}", T::DTYPE)))
    }

    fn fill<T: CudaElem>(&self, out: &mut CudaSlice<T>, value: f64, n: usize) -> Result<()> {
        let func = self.get_func(&format!("fill_{}", T::SUFFIX))?;
        unsafe { func.launch(launch_cfg(n), (&mut *out, T::from_f64(value), n as u32)) }
            .map_err(|e| Error::driver(format!("fill: {e}")))
    }

    fn scale<T: CudaElem>(&self, x: &mut CudaSlice<T>, alpha: f64, n: usize) -> Result<()> {
        let func = self.get_func(&format!("scale_{}", T::SUFFIX))?;
        unsafe { func.launch(launch_cfg(n), (&mut *x, T::from_f64(alpha), n as u32)) }
            .map_err(|e| Error::driver(format!("scale: {e}")))
    }

    fn axpby_typed<T: CudaElem>(
        &self,
        alpha: f64,
        x: &CudaSlice<T>,
        beta: f64,
        y: &mut CudaSlice<T>,
    ) -> Result<()> {
        let n = x.len();
        let func = self.get_func(&format!("axpby_{}", T::SUFFIX))?;
        let params = (x, &mut *y, T::from_f64(alpha), T::from_f64(beta), n as u32);
        unsafe { func.launch(launch_cfg(n), params) }
            .map_err(|e| Error::driver(format!("axpby: {e}")))
    }

    fn random<T: CudaElem>(&self, dst: &mut CudaSlice<T>, n: usize, op: ApplyOp) -> Result<()> {
        let host: Vec<T> = self.sample(n, op)?.into_iter().map(T::from_f64).collect();
        let tmp = self.upload(host)?;
        self.copy_prefix(dst, &tmp)
    }

    fn sample(&self, n: usize, op: ApplyOp) -> Result<Vec<f64>> {
        let mut rng = self
            .rng
            .lock()
            .map_err(|_| Error::driver("cuda rng mutex poisoned"))?;
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

    fn lower_typed<T: CudaElem>(
        &self,
        geom: &LoweringGeometry,
        input: &CudaSlice<T>,
        output: &mut CudaSlice<T>,
    ) -> Result<()> {
        let n = geom.lowered_dims().elem_count();
        let func = self.get_func(&format!("lower_{}", T::SUFFIX))?;
        let [ir, ic, id, ib] = geometry_args(geom);
        let params = (
            input,
            &mut *output,
            ir,
            ic,
            id,
            ib,
            geom.kernel_size as i32,
            geom.padding as i32,
            geom.stride as i32,
            geom.out_r as i32,
            geom.out_c as i32,
        );
        unsafe { func.launch(launch_cfg(n), params) }
            .map_err(|e| Error::driver(format!("lower: {e}")))?;
        self.synchronize()
    }

    fn inverse_lower_typed<T: CudaElem>(
        &self,
        geom: &LoweringGeometry,
        grad: &CudaSlice<T>,
        input: &mut CudaSlice<T>,
    ) -> Result<()> {
        let n = geom.input.elem_count();
        let func = self.get_func(&format!("inverse_lower_{}", T::SUFFIX))?;
        let [ir, ic, id, ib] = geometry_args(geom);
        let params = (
            grad,
            &mut *input,
            ir,
            ic,
            id,
            ib,
            geom.kernel_size as i32,
            geom.padding as i32,
            geom.stride as i32,
            geom.out_r as i32,
            geom.out_c as i32,
        );
        unsafe { func.launch(launch_cfg(n), params) }
            .map_err(|e| Error::driver(format!("inverse_lower: {e}")))?;
        self.synchronize()
    }

    fn remap_typed<T: CudaElem>(
        &self,
        dims: Dims4,
        src: &CudaSlice<T>,
        dst: &mut CudaSlice<T>,
    ) -> Result<()> {
        let n = dims.elem_count();
        let func = self.get_func(&format!("remap_{}", T::SUFFIX))?;
        let params = (
            src,
            &mut *dst,
            dims.map_len() as u32,
            dims.d as u32,
            dims.b as u32,
            n as u32,
        );
        unsafe { func.launch(launch_cfg(n), params) }
            .map_err(|e| Error::driver(format!("remap: {e}")))?;
        self.synchronize()
    }
}

impl fmt::Debug for CudaDriver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "CudaDriver(cuda:{})", self.ordinal)
    }
}

// Safety: cudarc's device is thread-safe (CUDA runtime is thread-safe)
unsafe impl Send for CudaDriver {}
unsafe impl Sync for CudaDriver {}

// CudaStorage: device memory for each supported dtype

/// GPU-side storage. Each variant wraps a cudarc CudaSlice for its dtype.
pub enum CudaStorage {
    F32(CudaSlice<f32>),
    F64(CudaSlice<f64>),
}

impl Clone for CudaStorage {
    fn clone(&self) -> Self {
        match self {
            CudaStorage::F32(s) => CudaStorage::F32(s.clone()),
            CudaStorage::F64(s) => CudaStorage::F64(s.clone()),
        }
    }
}

impl fmt::Debug for CudaStorage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CudaStorage::F32(s) => write!(f, "CudaStorage::F32(len={})", s.len()),
            CudaStorage::F64(s) => write!(f, "CudaStorage::F64(len={})", s.len()),
        }
    }
}

unsafe impl Send for CudaStorage {}
unsafe impl Sync for CudaStorage {}

impl DriverStorage for CudaStorage {
    fn dtype(&self) -> DType {
        match self {
            CudaStorage::F32(_) => DType::F32,
            CudaStorage::F64(_) => DType::F64,
        }
    }

    fn len(&self) -> usize {
        match self {
            CudaStorage::F32(s) => s.len(),
            CudaStorage::F64(s) => s.len(),
        }
    }
}

// Helpers

/// Element types with device kernels.
trait CudaElem: WithDType + DeviceRepr + ValidAsZeroBits + Unpin {
    const SUFFIX: &'static str;
}

impl CudaElem for f32 {
    const SUFFIX: &'static str = "f32";
}

impl CudaElem for f64 {
    const SUFFIX: &'static str = "f64";
}

/// Standard CUDA launch configuration for N elements.
fn launch_cfg(n: usize) -> LaunchConfig {
    const BLOCK: u32 = 256;
    let grid = (n as u32).div_ceil(BLOCK);
    LaunchConfig {
        block_dim: (BLOCK, 1, 1),
        grid_dim: (grid.max(1), 1, 1),
        shared_mem_bytes: 0,
    }
}

fn geometry_args(geom: &LoweringGeometry) -> [i32; 4] {
    let Dims4 { r, c, d, b } = geom.input;
    [r as i32, c as i32, d as i32, b as i32]
}

fn mismatch(expected: &CudaStorage, got: &CudaStorage) -> Error {
    Error::DTypeMismatch {
        expected: expected.dtype(),
        got: got.dtype(),
    }
}

fn half_unsupported(dtype: DType) -> Error {
    Error::driver(format!("cuda driver has no {dtype} storage"))
}

// DeviceDriver implementation

impl DeviceDriver for CudaDriver {
    type Storage = CudaStorage;

    fn name(&self) -> String {
        format!("cuda:{}", self.ordinal)
    }

    fn supports(&self, dtype: DType) -> bool {
        matches!(dtype, DType::F32 | DType::F64)
    }

    fn zeros(&self, n: usize, dtype: DType) -> Result<CudaStorage> {
        match dtype {
            DType::F32 => Ok(CudaStorage::F32(self.alloc(n)?)),
            DType::F64 => Ok(CudaStorage::F64(self.alloc(n)?)),
            other => Err(half_unsupported(other)),
        }
    }

    fn from_f64_slice(&self, data: &[f64], dtype: DType) -> Result<CudaStorage> {
        match dtype {
            DType::F32 => {
                let host: Vec<f32> = data.iter().map(|&v| v as f32).collect();
                Ok(CudaStorage::F32(self.upload(host)?))
            }
            DType::F64 => Ok(CudaStorage::F64(self.upload(data.to_vec())?)),
            other => Err(half_unsupported(other)),
        }
    }

    fn to_f64_vec(&self, src: &CudaStorage) -> Result<Vec<f64>> {
        match src {
            CudaStorage::F32(s) => self.download(s),
            CudaStorage::F64(s) => self.download(s),
        }
    }

    fn memcpy(&self, dst: &mut CudaStorage, src: &CudaStorage) -> Result<()> {
        ensure_len("memcpy destination", dst, src.len())?;
        match (dst, src) {
            (CudaStorage::F32(d), CudaStorage::F32(s)) => self.copy_prefix(d, s),
            (CudaStorage::F64(d), CudaStorage::F64(s)) => self.copy_prefix(d, s),
            (d, s) => Err(mismatch(d, s)),
        }
    }

    fn memset(&self, dst: &mut CudaStorage, value: f64) -> Result<()> {
        match dst {
            CudaStorage::F32(d) => {
                let n = d.len();
                self.fill(d, value, n)
            }
            CudaStorage::F64(d) => {
                let n = d.len();
                self.fill(d, value, n)
            }
        }
    }

    fn apply(&self, dst: &mut CudaStorage, n: usize, op: ApplyOp) -> Result<()> {
        op.validate()?;
        ensure_len("apply destination", dst, n)?;
        if n == 0 {
            return Ok(());
        }
        match (dst, op) {
            (CudaStorage::F32(d), ApplyOp::Constant(v)) => self.fill(d, v, n),
            (CudaStorage::F64(d), ApplyOp::Constant(v)) => self.fill(d, v, n),
            (CudaStorage::F32(d), ApplyOp::Scale(a)) => self.scale(d, a, n),
            (CudaStorage::F64(d), ApplyOp::Scale(a)) => self.scale(d, a, n),
            (CudaStorage::F32(d), op) => self.random(d, n, op),
            (CudaStorage::F64(d), op) => self.random(d, n, op),
        }
    }

    fn axpy(&self, alpha: f64, x: &CudaStorage, y: &mut CudaStorage) -> Result<()> {
        self.axpby(alpha, x, 1.0, y)
    }

    fn axpby(&self, alpha: f64, x: &CudaStorage, beta: f64, y: &mut CudaStorage) -> Result<()> {
        ensure_len("axpby y", y, x.len())?;
        match (y, x) {
            (CudaStorage::F32(y), CudaStorage::F32(x)) => self.axpby_typed(alpha, x, beta, y),
            (CudaStorage::F64(y), CudaStorage::F64(x)) => self.axpby_typed(alpha, x, beta, y),
            (y, x) => Err(mismatch(y, x)),
        }
    }

    fn gemm(
        &self,
        a: &CudaStorage,
        b: &CudaStorage,
        c: &mut CudaStorage,
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
        let (op_n, blas) = (cublasOperation_t::CUBLAS_OP_N, *self.blas.handle());
        match (c, a, b) {
            (CudaStorage::F32(c), CudaStorage::F32(a), CudaStorage::F32(b)) => unsafe {
                cudarc::cublas::result::sgemm(
                    blas,
                    op_n,
                    op_n,
                    n as i32,
                    m as i32,
                    k as i32,
                    (&(alpha as f32)) as *const f32,
                    *b.device_ptr() as *const f32,
                    n as i32,
                    *a.device_ptr() as *const f32,
                    k as i32,
                    (&(beta as f32)) as *const f32,
                    *c.device_ptr_mut() as *mut f32,
                    n as i32,
                )
            }
            .map_err(|e| Error::driver(format!("cuBLAS sgemm: {e}"))),
            (CudaStorage::F64(c), CudaStorage::F64(a), CudaStorage::F64(b)) => unsafe {
                cudarc::cublas::result::dgemm(
                    blas,
                    op_n,
                    op_n,
                    n as i32,
                    m as i32,
                    k as i32,
                    (&alpha) as *const f64,
                    *b.device_ptr() as *const f64,
                    n as i32,
                    *a.device_ptr() as *const f64,
                    k as i32,
                    (&beta) as *const f64,
                    *c.device_ptr_mut() as *mut f64,
                    n as i32,
                )
            }
            .map_err(|e| Error::driver(format!("cuBLAS dgemm: {e}"))),
            (c, a, _) => Err(mismatch(a, c)),
        }
    }

    fn set_num_threads(&mut self, _n_threads: usize) -> Result<()> {
        Ok(())
    }

    fn lower_cube(
        &self,
        geom: &LoweringGeometry,
        input: &CudaStorage,
        output: &mut CudaStorage,
    ) -> Result<()> {
        ensure_len("lowering input", input, geom.input.elem_count())?;
        ensure_len("lowered matrix", output, geom.lowered_dims().elem_count())?;
        match (output, input) {
            (CudaStorage::F32(o), CudaStorage::F32(i)) => self.lower_typed(geom, i, o),
            (CudaStorage::F64(o), CudaStorage::F64(i)) => self.lower_typed(geom, i, o),
            (o, i) => Err(mismatch(o, i)),
        }
    }

    fn inverse_lower_cube(
        &self,
        geom: &LoweringGeometry,
        grad: &CudaStorage,
        input: &mut CudaStorage,
    ) -> Result<()> {
        ensure_len("lowered gradient", grad, geom.lowered_dims().elem_count())?;
        ensure_len("input gradient", input, geom.input.elem_count())?;
        match (input, grad) {
            (CudaStorage::F32(i), CudaStorage::F32(g)) => self.inverse_lower_typed(geom, g, i),
            (CudaStorage::F64(i), CudaStorage::F64(g)) => self.inverse_lower_typed(geom, g, i),
            (i, g) => Err(mismatch(i, g)),
        }
    }

    fn remap_cube(&self, dims: Dims4, src: &CudaStorage, dst: &mut CudaStorage) -> Result<()> {
        ensure_len("remap source", src, dims.elem_count())?;
        ensure_len("remap destination", dst, dims.elem_count())?;
        match (dst, src) {
            (CudaStorage::F32(d), CudaStorage::F32(s)) => self.remap_typed(dims, s, d),
            (CudaStorage::F64(d), CudaStorage::F64(s)) => self.remap_typed(dims, s, d),
            (d, s) => Err(mismatch(d, s)),
        }
    }
}
