use std::fmt;

use crate::dims::Dims4;

// Layout and lowering-strategy tags
//
// A cube's four extents can be linearized in more than one order. The tag
// names the order by listing dimensions from fastest- to slowest-varying:
//
//   Crdb: column, row, depth, batch. Row-major feature maps, maps grouped by
//          depth, depth groups grouped by batch. Every lowering kernel
//          assumes this order.
//   Bdrc: batch, depth, column, row. Batch is innermost; used by bridges
//          that vectorize across the batch.
//
// LoweringType names the patch-extraction strategy. Type1 materializes the
// full (K*K*D) x (outR*outC*B) matrix; Type2/Type3 trade memory for extra
// GEMM passes and have no implementation here.
//
// Both tags are resolved once, when a connector is built.

/// Memory order of a cube.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum LayoutType {
    #[default]
    Crdb,
    Bdrc,
}

impl LayoutType {
    /// Flat storage index of `(r, c, d, b)` under this layout.
    #[inline]
    pub fn index(&self, dims: &Dims4, r: usize, c: usize, d: usize, b: usize) -> usize {
        match self {
            LayoutType::Crdb => c + r * dims.c + d * dims.r * dims.c + b * dims.r * dims.c * dims.d,
            LayoutType::Bdrc => b + d * dims.b + c * dims.b * dims.d + r * dims.b * dims.d * dims.c,
        }
    }
}

impl fmt::Display for LayoutType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            LayoutType::Crdb => "CRDB",
            LayoutType::Bdrc => "BDRC",
        };
        write!(f, "{}", s)
    }
}

/// Patch-extraction strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum LoweringType {
    /// One column per window, one row per (depth, kernel row, kernel col).
    #[default]
    Type1,
    Type2,
    Type3,
}

impl fmt::Display for LoweringType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            LoweringType::Type1 => "lowering type 1",
            LoweringType::Type2 => "lowering type 2",
            LoweringType::Type3 => "lowering type 3",
        };
        write!(f, "{}", s)
    }
}
