use crate::dims::Dims4;
use crate::driver::{DeviceDriver, DriverStorage};
use crate::dtype::DType;
use crate::error::{Error, Result};
use crate::layout::LayoutType;

// LogicalCube: a 4D buffer on some driver's device
//
// A cube pairs driver storage with its extents and layout tag. It carries no
// device handle: operations that touch the data take the driver explicitly,
// so a cube can be handed between connectors built on the same driver.
//
// A lowered matrix is a cube of dims (K*K*D, outR*outC*B, 1, 1).

/// Dimensioned storage with a fixed layout convention.
#[derive(Debug, Clone)]
pub struct LogicalCube<D: DeviceDriver> {
    dims: Dims4,
    layout: LayoutType,
    storage: D::Storage,
}

impl<D: DeviceDriver> LogicalCube<D> {
    /// Allocate a zero-filled CRDB cube.
    pub fn zeros(dims: impl Into<Dims4>, dtype: DType, driver: &D) -> Result<Self> {
        let dims = dims.into();
        let storage = driver.zeros(dims.elem_count(), dtype)?;
        Ok(LogicalCube {
            dims,
            layout: LayoutType::Crdb,
            storage,
        })
    }

    /// Create a CRDB cube from host values listed in storage order.
    pub fn from_f64_slice(
        data: &[f64],
        dims: impl Into<Dims4>,
        dtype: DType,
        driver: &D,
    ) -> Result<Self> {
        let dims = dims.into();
        if data.len() != dims.elem_count() {
            return Err(Error::msg(format!(
                "cube {dims} needs {} elements, got {}",
                dims.elem_count(),
                data.len()
            )));
        }
        let storage = driver.from_f64_slice(data, dtype)?;
        Ok(LogicalCube {
            dims,
            layout: LayoutType::Crdb,
            storage,
        })
    }

    /// Wrap existing storage. It must hold exactly `dims.elem_count()` elements.
    pub fn from_storage(storage: D::Storage, dims: impl Into<Dims4>, layout: LayoutType) -> Result<Self> {
        let dims = dims.into();
        if storage.len() != dims.elem_count() {
            return Err(Error::msg(format!(
                "storage of {} elements cannot back cube {dims}",
                storage.len()
            )));
        }
        Ok(LogicalCube {
            dims,
            layout,
            storage,
        })
    }

    pub fn dims(&self) -> Dims4 {
        self.dims
    }

    pub fn layout(&self) -> LayoutType {
        self.layout
    }

    pub fn dtype(&self) -> DType {
        self.storage.dtype()
    }

    pub fn elem_count(&self) -> usize {
        self.dims.elem_count()
    }

    pub fn size_in_bytes(&self) -> usize {
        self.elem_count() * self.dtype().size_in_bytes()
    }

    pub fn storage(&self) -> &D::Storage {
        &self.storage
    }

    pub fn storage_mut(&mut self) -> &mut D::Storage {
        &mut self.storage
    }

    pub fn into_storage(self) -> D::Storage {
        self.storage
    }

    /// Relabel the layout. The data is not moved.
    pub fn with_layout(mut self, layout: LayoutType) -> Self {
        self.layout = layout;
        self
    }

    /// Reinterpret the same storage under other dims with equal element count.
    pub fn reshape(self, dims: impl Into<Dims4>) -> Result<Self> {
        let dims = dims.into();
        if dims.elem_count() != self.dims.elem_count() {
            return Err(Error::ShapeMismatch {
                what: "reshape",
                expected: self.dims,
                got: dims,
            });
        }
        Ok(LogicalCube { dims, ..self })
    }

    /// Set every element to zero.
    pub fn zero_fill(&mut self, driver: &D) -> Result<()> {
        driver.memset(&mut self.storage, 0.0)
    }

    /// Copy the cube to the host in storage order.
    pub fn to_f64_vec(&self, driver: &D) -> Result<Vec<f64>> {
        let mut data = driver.to_f64_vec(&self.storage)?;
        data.truncate(self.elem_count());
        Ok(data)
    }

    /// Read one element through the layout convention (host round-trip).
    pub fn get(&self, driver: &D, r: usize, c: usize, d: usize, b: usize) -> Result<f64> {
        let dims = self.dims;
        if r >= dims.r || c >= dims.c || d >= dims.d || b >= dims.b {
            return Err(Error::msg(format!(
                "index ({r}, {c}, {d}, {b}) out of bounds for cube {dims}"
            )));
        }
        let data = self.to_f64_vec(driver)?;
        Ok(data[self.layout.index(&dims, r, c, d, b)])
    }

    /// Fail with [`Error::ShapeMismatch`] unless the cube has `expected` dims.
    pub fn check_dims(&self, what: &'static str, expected: Dims4) -> Result<()> {
        if self.dims != expected {
            return Err(Error::ShapeMismatch {
                what,
                expected,
                got: self.dims,
            });
        }
        Ok(())
    }
}
