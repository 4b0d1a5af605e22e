//! # Patchwork
//!
//! Convolution lowering for matrix-multiply based CNN layers.
//!
//! This is the top-level facade crate that re-exports everything you need.
//!
//! ## Usage
//!
//! ```rust
//! use patchwork::prelude::*;
//!
//! let driver = CpuDriver::new();
//! let config = ConnectorConfig::new(2).with_stride(2);
//! let mut conn = Connector::new(driver.clone(), (4, 4, 1, 1), DType::F32, config)?;
//! let data: Vec<f64> = (1..=16).map(f64::from).collect();
//! let input = CpuCube::from_f64_slice(&data, (4, 4, 1, 1), DType::F32, &driver)?;
//! let lowered = conn.lower(&input)?;
//! assert_eq!(lowered.dims(), Dims4::matrix(4, 4));
//! # Ok::<(), patchwork::Error>(())
//! ```
//!
//! ## Architecture
//!
//! | Crate | Purpose |
//! |-------|----------|
//! | `patchwork-core` | Geometry, kernels, DeviceDriver trait, LogicalCube, Connector, Report |
//! | `patchwork-cpu` | CPU driver with rayon-partitioned lowering |
//! | `patchwork-cuda` | CUDA driver (feature-gated) |
//!
//! ## Modules
//!
//! - [`conv`]: convolution forward pass built on lower + GEMM + remap

/// Re-export core types.
pub use patchwork_core::{
    bail, kernels, ApplyOp, Connector, ConnectorConfig, DType, DeviceDriver, Dims4,
    DriverStorage, Error, LayoutType, LogicalCube, LoweringGeometry, LoweringType, Report, Result,
    WithDType,
};

/// Re-export CPU driver.
pub use patchwork_cpu::{CpuDriver, CpuStorage};

/// Re-export CUDA driver (requires `cuda` feature + NVIDIA CUDA Toolkit).
#[cfg(feature = "cuda")]
pub use patchwork_cuda::{CudaDriver, CudaStorage};

/// Convolution through lowering.
pub mod conv;

/// A cube on the host.
pub type CpuCube = LogicalCube<CpuDriver>;
/// A connector on the host.
pub type CpuConnector = Connector<CpuDriver>;

#[cfg(feature = "cuda")]
pub type CudaCube = LogicalCube<CudaDriver>;
#[cfg(feature = "cuda")]
pub type CudaConnector = Connector<CudaDriver>;

/// Prelude: import this for the most common types.
pub mod prelude {
    pub use crate::conv::LoweredConv2d;
    pub use crate::{
        ApplyOp, Connector, ConnectorConfig, CpuConnector, CpuCube, CpuDriver, DType,
        DeviceDriver, Dims4, LayoutType, LogicalCube, LoweringType, Report,
    };
    #[cfg(feature = "cuda")]
    pub use crate::{CudaConnector, CudaCube, CudaDriver};
}
