// LoweredConv2d: 2D convolution as lower + GEMM + remap
//
// For an input cube (R, C, D, B) and O filters of size K x K x D:
//
//   lowered = lower(input)                      (K*K*D, outR*outC*B)
//   product = weights x lowered                 (O, outR*outC*B)
//   output  = remap(product as (outR, outC, O, B))
//
// Row o of the product holds, for each batch element b in turn, the outR*outC
// responses of filter o. Read as a CRDB cube that is map index o*B + b, i.e.
// depth-of-batch order, which `remap_output` regroups to CRDB.
//
// WEIGHT SHAPE:
//   weights: (O, K*K*D) row-major; column d*K*K + kr*K + kc is tap (kr, kc)
//   of input depth d, matching the lowered row order.

use tracing::debug;

use patchwork_core::{
    Connector, ConnectorConfig, DType, DeviceDriver, Dims4, LogicalCube, LoweringGeometry, Result,
};

/// Convolution layer driven by a lowering connector.
///
/// # Examples
/// ```
/// use patchwork::prelude::*;
///
/// let driver = CpuDriver::new().with_seed(0);
/// let config = ConnectorConfig::new(3).with_padding(1);
/// let mut conv = LoweredConv2d::new(driver.clone(), (8, 8, 3, 2), 16, DType::F32, config)?;
/// let x = CpuCube::zeros((8, 8, 3, 2), DType::F32, &driver)?;
/// let y = conv.forward(&x)?;
/// assert_eq!(y.dims(), Dims4::new(8, 8, 16, 2));
/// # Ok::<(), patchwork::Error>(())
/// ```
pub struct LoweredConv2d<D: DeviceDriver> {
    connector: Connector<D>,
    weights: LogicalCube<D>,
    out_channels: usize,
}

impl<D: DeviceDriver> LoweredConv2d<D> {
    /// Build the connector for `input` dims and Xavier-initialize
    /// `out_channels` filters. Any remap depth in `config` is replaced by
    /// `out_channels`.
    pub fn new(
        driver: D,
        input: impl Into<Dims4>,
        out_channels: usize,
        dtype: DType,
        config: ConnectorConfig,
    ) -> Result<Self> {
        let config = config.with_remap_depth(out_channels);
        let connector = Connector::new(driver, input, dtype, config)?;
        let taps = connector.output_dims().r;
        let mut weights =
            LogicalCube::zeros(Dims4::matrix(out_channels, taps), dtype, connector.driver())?;
        connector
            .driver()
            .xavier_initialize(weights.storage_mut(), out_channels * taps, out_channels)?;
        debug!(out_channels, taps, "conv weights initialized");
        Ok(LoweredConv2d {
            connector,
            weights,
            out_channels,
        })
    }

    /// Replace the filters. `weights` must be (out_channels, K*K*D).
    pub fn set_weights(&mut self, weights: LogicalCube<D>) -> Result<()> {
        weights.check_dims("conv weights", self.weights.dims())?;
        self.weights = weights;
        Ok(())
    }

    pub fn weights(&self) -> &LogicalCube<D> {
        &self.weights
    }

    pub fn connector(&self) -> &Connector<D> {
        &self.connector
    }

    pub fn geometry(&self) -> &LoweringGeometry {
        self.connector.geometry()
    }

    /// Dims (outR, outC, O, B) of the forward output.
    pub fn output_dims(&self) -> Dims4 {
        let g = self.geometry();
        Dims4::new(g.out_r, g.out_c, self.out_channels, g.input.b)
    }

    pub fn forward(&mut self, input: &LogicalCube<D>) -> Result<LogicalCube<D>> {
        let lowered = self.connector.lower(input)?;
        let Dims4 { r: taps, c: cols, .. } = lowered.dims();
        let driver = self.connector.driver();

        let mut product =
            LogicalCube::zeros(Dims4::matrix(self.out_channels, cols), self.weights.dtype(), driver)?;
        driver.gemm(
            self.weights.storage(),
            lowered.storage(),
            product.storage_mut(),
            self.out_channels,
            cols,
            taps,
            1.0,
            0.0,
        )?;

        let mut output = product.reshape(self.output_dims())?;
        self.connector.remap_output(&mut output)?;
        Ok(output)
    }
}
