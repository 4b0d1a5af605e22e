//! # patchwork-core
//!
//! Lowering primitives for computing convolution as a matrix multiply.
//!
//! This crate provides:
//! - [`LoweringGeometry`]: index mapping between a cube and its lowered matrix
//! - [`kernels`]: forward lowering, accumulating inverse lowering, remapping
//! - [`DeviceDriver`] trait: abstraction over CPU/GPU execution
//! - [`LogicalCube`] / [`Dims4`] / [`LayoutType`]: 4D buffers and their layout
//! - [`Connector`]: lowering bound to one configuration, with [`Report`]s
// - DType: element types a cube can hold
// - Geometry + kernels: pure functions over slices, shared by every driver
// - Driver: memory, BLAS-style math, random fills, lowering entry points
// - Connector: validation at construction, then lower / inverse_lower / remap

pub mod config;
pub mod connector;
pub mod cube;
pub mod dims;
pub mod driver;
pub mod dtype;
pub mod error;
pub mod geometry;
pub mod kernels;
pub mod layout;
pub mod report;

pub use config::ConnectorConfig;
pub use connector::Connector;
pub use cube::LogicalCube;
pub use dims::Dims4;
pub use driver::{ApplyOp, DeviceDriver, DriverStorage};
pub use dtype::{DType, WithDType};
pub use error::{Error, Result};
pub use geometry::{LoweredTargets, LoweringGeometry, WindowSpan};
pub use layout::{LayoutType, LoweringType};
pub use report::Report;
