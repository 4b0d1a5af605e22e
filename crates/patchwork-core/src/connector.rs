// Connector: lowering bound to one fixed configuration
//
// A connector is built once per (input dims, dtype, kernel, padding, stride,
// layouts, strategy) and then reused for every forward and backward pass:
//
//   let mut conn = Connector::new(driver, dims, DType::F32, config)?;
//   let lowered = conn.lower(&input)?;               // before the GEMM
//   let grad_in = conn.inverse_lower(&grad_lowered)?; // during backward
//
// Construction does all validation: geometry (exact output extents), the
// (strategy, layout, dtype, backend) combination, and scratch allocation.
// After that the only failures a call can see are shape/dtype mismatches of
// the cubes handed in, checked before any element is written.
//
// Transforms take `&mut self`: the remap scratch and the reports are owned
// by the connector, so one connector serves one caller at a time.

use tracing::{debug, trace};

use crate::config::ConnectorConfig;
use crate::cube::LogicalCube;
use crate::dims::Dims4;
use crate::driver::DeviceDriver;
use crate::dtype::DType;
use crate::error::{Error, Result};
use crate::geometry::LoweringGeometry;
use crate::layout::{LayoutType, LoweringType};
use crate::report::Report;

type TransformFn<D> = fn(
    &D,
    &LoweringGeometry,
    &<D as DeviceDriver>::Storage,
    &mut <D as DeviceDriver>::Storage,
) -> Result<()>;

/// The pair of driver entry points selected for a configuration.
struct LoweringKernel<D: DeviceDriver> {
    lower: TransformFn<D>,
    inverse: TransformFn<D>,
}

impl<D: DeviceDriver> LoweringKernel<D> {
    /// Resolve the strategy and layout tags to an implementation.
    fn select(driver: &D, dtype: DType, config: &ConnectorConfig) -> Result<Self> {
        let unimplemented = || Error::UnimplementedCombination {
            dtype,
            input_layout: config.input_layout,
            output_layout: config.output_layout,
            lowering: config.lowering,
            backend: driver.name(),
        };
        if !driver.supports(dtype) {
            return Err(unimplemented());
        }
        match (config.lowering, config.input_layout, config.output_layout) {
            (LoweringType::Type1, LayoutType::Crdb, LayoutType::Crdb) => Ok(LoweringKernel {
                lower: D::lower_cube,
                inverse: D::inverse_lower_cube,
            }),
            _ => Err(unimplemented()),
        }
    }
}

/// Stateful lowering / inverse-lowering engine for one configuration.
pub struct Connector<D: DeviceDriver> {
    driver: D,
    config: ConnectorConfig,
    geometry: LoweringGeometry,
    dtype: DType,
    kernel: LoweringKernel<D>,
    remap_scratch: Option<LogicalCube<D>>,

    report_constructor: Report,
    report_last_lowering: Report,
    report_history: Report,
    report_last_inverse_lowering: Report,
    report_inverse_history: Report,
}

impl<D: DeviceDriver> Connector<D> {
    /// Validate the configuration for an input of `input` dims and allocate
    /// scratch buffers.
    pub fn new(driver: D, input: impl Into<Dims4>, dtype: DType, config: ConnectorConfig) -> Result<Self> {
        let mut report_constructor = Report::new();
        report_constructor.start();

        let input = input.into();
        let geometry = config.geometry(input)?;
        let kernel = LoweringKernel::select(&driver, dtype, &config)?;

        let remap_scratch = match config.remap_depth {
            Some(0) => {
                return Err(Error::configuration("remap depth must be positive"));
            }
            Some(depth) => {
                let dims = Dims4::new(geometry.out_r, geometry.out_c, depth, input.b);
                Some(LogicalCube::zeros(dims, dtype, &driver)?)
            }
            None => None,
        };
        let scratch_bytes = remap_scratch.as_ref().map_or(0, |s| s.size_in_bytes()) as u64;
        report_constructor.end(0, scratch_bytes, 0);

        debug!(
            backend = %driver.name(),
            %dtype,
            input = %input,
            lowered = %geometry.lowered_dims(),
            kernel_size = config.kernel_size,
            padding = config.padding,
            stride = config.stride,
            "connector constructed"
        );

        Ok(Connector {
            driver,
            config,
            geometry,
            dtype,
            kernel,
            remap_scratch,
            report_constructor,
            report_last_lowering: Report::new(),
            report_history: Report::new(),
            report_last_inverse_lowering: Report::new(),
            report_inverse_history: Report::new(),
        })
    }

    /// Build from an example input cube and output (lowered) cube.
    ///
    /// The cubes only supply dims, dtype and layout tags; nothing is lowered.
    pub fn from_cubes(
        driver: D,
        input: &LogicalCube<D>,
        output: &LogicalCube<D>,
        config: ConnectorConfig,
    ) -> Result<Self> {
        if input.dtype() != output.dtype() {
            return Err(Error::DTypeMismatch {
                expected: input.dtype(),
                got: output.dtype(),
            });
        }
        let config = config.with_layouts(input.layout(), output.layout());
        let connector = Self::new(driver, input.dims(), input.dtype(), config)?;
        output.check_dims("lowered matrix", connector.output_dims())?;
        Ok(connector)
    }

    pub fn driver(&self) -> &D {
        &self.driver
    }

    pub fn config(&self) -> &ConnectorConfig {
        &self.config
    }

    pub fn geometry(&self) -> &LoweringGeometry {
        &self.geometry
    }

    pub fn dtype(&self) -> DType {
        self.dtype
    }

    /// Dims (iR, iC, iD, iB) of the input cube.
    pub fn input_dims(&self) -> Dims4 {
        self.geometry.input
    }

    /// Dims (oR, oC, oD, oB) of the lowered matrix.
    pub fn output_dims(&self) -> Dims4 {
        self.geometry.lowered_dims()
    }

    //  Forward

    /// Lower `input` into a freshly allocated matrix.
    pub fn lower(&mut self, input: &LogicalCube<D>) -> Result<LogicalCube<D>> {
        let mut output = LogicalCube::zeros(self.output_dims(), self.dtype, &self.driver)?
            .with_layout(self.config.output_layout);
        self.lower_into(input, &mut output)?;
        Ok(output)
    }

    /// Lower `input` into the caller-owned `output`, overwriting it.
    pub fn lower_into(&mut self, input: &LogicalCube<D>, output: &mut LogicalCube<D>) -> Result<()> {
        self.check_cube("input cube", input, self.input_dims(), self.config.input_layout)?;
        self.check_cube("lowered matrix", output, self.output_dims(), self.config.output_layout)?;

        self.report_last_lowering.start();
        (self.kernel.lower)(&self.driver, &self.geometry, input.storage(), output.storage_mut())?;
        self.report_last_lowering
            .end(input.size_in_bytes() as u64, output.size_in_bytes() as u64, 0);
        self.report_history.aggregate(&self.report_last_lowering);

        trace!(elapsed = ?self.report_last_lowering.elapsed, "lower");
        Ok(())
    }

    //  Backward

    /// Inverse-lower `grad` into a freshly allocated input-shaped cube.
    pub fn inverse_lower(&mut self, grad: &LogicalCube<D>) -> Result<LogicalCube<D>> {
        let mut input_grad = LogicalCube::zeros(self.input_dims(), self.dtype, &self.driver)?
            .with_layout(self.config.input_layout);
        self.inverse_lower_into(grad, &mut input_grad)?;
        Ok(input_grad)
    }

    /// Inverse-lower `grad` into the caller-owned `input_grad`.
    ///
    /// `input_grad` is zeroed first, then every in-bounds lowered cell is
    /// added to the input cell it was read from.
    pub fn inverse_lower_into(
        &mut self,
        grad: &LogicalCube<D>,
        input_grad: &mut LogicalCube<D>,
    ) -> Result<()> {
        self.check_cube("lowered gradient", grad, self.output_dims(), self.config.output_layout)?;
        self.check_cube("input gradient", input_grad, self.input_dims(), self.config.input_layout)?;

        self.report_last_inverse_lowering.start();
        input_grad.zero_fill(&self.driver)?;
        (self.kernel.inverse)(&self.driver, &self.geometry, grad.storage(), input_grad.storage_mut())?;
        self.report_last_inverse_lowering.end(
            grad.size_in_bytes() as u64,
            input_grad.size_in_bytes() as u64,
            self.geometry.contributions() as u64,
        );
        self.report_inverse_history
            .aggregate(&self.report_last_inverse_lowering);

        trace!(elapsed = ?self.report_last_inverse_lowering.elapsed, "inverse_lower");
        Ok(())
    }

    //  Remap

    /// Regroup a GEMM result whose maps are ordered depth-of-batch into CRDB,
    /// in place. `cube` must have dims (outR, outC, remap_depth, iB).
    pub fn remap_output(&mut self, cube: &mut LogicalCube<D>) -> Result<()> {
        let scratch = self.remap_scratch.as_mut().ok_or_else(|| {
            Error::configuration("remap_output needs a remap depth in the connector config")
        })?;
        cube.check_dims("remap cube", scratch.dims())?;
        if cube.dtype() != self.dtype {
            return Err(Error::DTypeMismatch {
                expected: self.dtype,
                got: cube.dtype(),
            });
        }
        self.driver.memcpy(scratch.storage_mut(), cube.storage())?;
        self.driver
            .remap_cube(scratch.dims(), scratch.storage(), cube.storage_mut())?;
        trace!(dims = %scratch.dims(), "remap_output");
        Ok(())
    }

    //  Reports

    pub fn report_constructor(&self) -> &Report {
        &self.report_constructor
    }

    pub fn report_last_lowering(&self) -> &Report {
        &self.report_last_lowering
    }

    pub fn report_history(&self) -> &Report {
        &self.report_history
    }

    pub fn report_last_inverse_lowering(&self) -> &Report {
        &self.report_last_inverse_lowering
    }

    pub fn report_inverse_history(&self) -> &Report {
        &self.report_inverse_history
    }

    fn check_cube(
        &self,
        what: &'static str,
        cube: &LogicalCube<D>,
        dims: Dims4,
        layout: LayoutType,
    ) -> Result<()> {
        cube.check_dims(what, dims)?;
        if cube.layout() != layout {
            return Err(Error::LayoutMismatch {
                what,
                expected: layout,
                got: cube.layout(),
            });
        }
        if cube.dtype() != self.dtype {
            return Err(Error::DTypeMismatch {
                expected: self.dtype,
                got: cube.dtype(),
            });
        }
        Ok(())
    }
}
