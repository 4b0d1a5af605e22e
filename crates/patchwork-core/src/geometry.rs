// Geometry: Index mapping between a cube and its lowered matrix
//
// For a square kernel K, stride S and padding P over an input of
// (iR, iC, iD, iB), windows are placed at top-left offsets
//
//   wr = i*S - P,  i in 0..outR,   outR = (iR + 2P - K) / S + 1
//   wc = j*S - P,  j in 0..outC,   outC = (iC + 2P - K) / S + 1
//
// in input coordinates, so padded windows start at negative offsets.
//
// The lowered matrix is row-major with
//
//   row = d*K*K + kr*K + kc              (kr, kc offset inside the window)
//   col = b*outR*outC + i*outC + j       (which window)
//
// Forward mapping: one input cell feeds every window that covers it. Instead
// of scanning the K x K neighbourhood and testing each candidate, we compute
// the first stride-aligned window start with `next_multiple` /
// `next_largest_multiple` and the last one with a min-clamp, then step by S.
// Only windows the cell actually participates in are visited.
//
// Inverse mapping: lowered cell (row, col) reads input cell
// (i*S + kr - P, j*S + kc - P, d, b), or nothing if that lies in the padding.

use crate::dims::Dims4;
use crate::error::{Error, Result};

/// Round `x` up to the next multiple of `s`.
///
/// Positive remainders round up; non-positive `x` rounds toward zero, which
/// for a negative `x` is also upward.
#[inline]
pub fn next_multiple(x: isize, s: isize) -> isize {
    let m = x % s;
    if x > 0 && m > 0 {
        x + s - m
    } else {
        x - m
    }
}

/// Smallest `x + j*s` with `j >= 0` that is `>= p`.
#[inline]
pub fn next_largest_multiple(x: isize, p: isize, s: isize) -> isize {
    if x >= p {
        return x;
    }
    let q = (p - x) / s;
    let y = x + q * s;
    if y < p {
        y + s
    } else {
        y
    }
}

/// Output extent of one spatial axis: `(extent + 2*padding - kernel) / stride + 1`.
///
/// The division must be exact; a fractional window count means the kernel
/// does not tile the padded input and is rejected.
pub fn output_extent(
    axis: &str,
    extent: usize,
    kernel_size: usize,
    padding: usize,
    stride: usize,
) -> Result<usize> {
    if kernel_size == 0 {
        return Err(Error::configuration("kernel size must be positive"));
    }
    if stride == 0 {
        return Err(Error::configuration("stride must be positive"));
    }
    let padded = padding
        .checked_mul(2)
        .and_then(|p| extent.checked_add(p))
        .ok_or_else(|| {
            Error::configuration(format!("padded input {axis} {extent} + 2*{padding} overflows"))
        })?;
    if padded < kernel_size {
        return Err(Error::configuration(format!(
            "kernel size {kernel_size} exceeds padded input {axis} {extent} + 2*{padding}"
        )));
    }
    let span = padded - kernel_size;
    if span % stride != 0 {
        return Err(Error::configuration(format!(
            "non-integer output {axis}: ({extent} + 2*{padding} - {kernel_size}) / {stride} = {span}/{stride}"
        )));
    }
    Ok(span / stride + 1)
}

/// Stride-aligned window starts covering one input coordinate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowSpan {
    /// First window start (input coordinates, may be negative in the padding).
    pub begin: isize,
    /// Exclusive bound on window starts.
    pub end: isize,
    /// Window index of `begin`, i.e. `(begin + P) / S`.
    pub first_index: usize,
}

impl WindowSpan {
    pub fn is_empty(&self) -> bool {
        self.begin >= self.end
    }
}

/// Geometry of one lowering configuration.
///
/// Plain value: built once by the connector and passed by reference to the
/// kernels and drivers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoweringGeometry {
    pub kernel_size: usize,
    pub padding: usize,
    pub stride: usize,
    /// Extents of the (unlowered) input cube.
    pub input: Dims4,
    pub out_r: usize,
    pub out_c: usize,
}

impl LoweringGeometry {
    /// Validate the configuration and derive the output spatial extents.
    pub fn new(input: Dims4, kernel_size: usize, padding: usize, stride: usize) -> Result<Self> {
        if input.elem_count() == 0 {
            return Err(Error::configuration(format!(
                "input cube {input} has an empty dimension"
            )));
        }
        let out_r = output_extent("rows", input.r, kernel_size, padding, stride)?;
        let out_c = output_extent("columns", input.c, kernel_size, padding, stride)?;
        Ok(LoweringGeometry {
            kernel_size,
            padding,
            stride,
            input,
            out_r,
            out_c,
        })
    }

    /// K*K: lowered rows contributed by one depth slice.
    #[inline]
    pub fn kernel_area(&self) -> usize {
        self.kernel_size * self.kernel_size
    }

    /// Number of windows per batch element.
    #[inline]
    pub fn windows_per_image(&self) -> usize {
        self.out_r * self.out_c
    }

    #[inline]
    pub fn lowered_rows(&self) -> usize {
        self.kernel_area() * self.input.d
    }

    #[inline]
    pub fn lowered_cols(&self) -> usize {
        self.windows_per_image() * self.input.b
    }

    /// Dims of the lowered matrix: (K*K*iD, outR*outC*iB, 1, 1).
    pub fn lowered_dims(&self) -> Dims4 {
        Dims4::matrix(self.lowered_rows(), self.lowered_cols())
    }

    /// Window starts along one axis that cover `coord`.
    ///
    /// `extent` is the input extent of that axis (iR or iC).
    pub fn window_span(&self, coord: usize, extent: usize) -> WindowSpan {
        let k = self.kernel_size as isize;
        let p = self.padding as isize;
        let s = self.stride as isize;
        let x = coord as isize;

        let begin = next_multiple(x - k + 1 + p, s) - p;
        let begin = next_largest_multiple(begin, -p, s);
        let end = x.min(extent as isize - k + p) + 1;
        // begin >= -P, so begin + P is a non-negative multiple of S
        let first_index = ((begin + p) / s) as usize;
        WindowSpan {
            begin,
            end,
            first_index,
        }
    }

    /// Every lowered (row, col) that input cell `(r, c, d, b)` is copied to.
    pub fn lowered_targets(&self, r: usize, c: usize, d: usize, b: usize) -> LoweredTargets {
        let rows = self.window_span(r, self.input.r);
        let cols = self.window_span(c, self.input.c);
        LoweredTargets {
            r: r as isize,
            c: c as isize,
            k: self.kernel_size as isize,
            s: self.stride as isize,
            out_c: self.out_c,
            row_base: d * self.kernel_area(),
            col_base: b * self.windows_per_image(),
            rows,
            cols,
            wr: rows.begin,
            i: rows.first_index,
            wc: cols.begin,
            j: cols.first_index,
        }
    }

    /// Input cell `(r, c, d, b)` that lowered cell `(row, col)` reads, or
    /// `None` when the cell lies in the padding.
    pub fn inverse_source(&self, row: usize, col: usize) -> Option<(usize, usize, usize, usize)> {
        let k2 = self.kernel_area();
        let windows = self.windows_per_image();
        if row >= self.lowered_rows() || col >= self.lowered_cols() {
            return None;
        }
        let d = row / k2;
        let kr = (row % k2) / self.kernel_size;
        let kc = row % self.kernel_size;
        let b = col / windows;
        let i = (col % windows) / self.out_c;
        let j = col % self.out_c;

        let ir = (i * self.stride + kr) as isize - self.padding as isize;
        let ic = (j * self.stride + kc) as isize - self.padding as isize;
        if ir < 0 || ir >= self.input.r as isize || ic < 0 || ic >= self.input.c as isize {
            return None;
        }
        Some((ir as usize, ic as usize, d, b))
    }

    /// Number of in-bounds (input cell, window) pairs over the whole cube,
    /// i.e. the additions one inverse lowering performs.
    pub fn contributions(&self) -> usize {
        let rows: usize = (0..self.input.r)
            .map(|r| self.span_len(self.window_span(r, self.input.r)))
            .sum();
        let cols: usize = (0..self.input.c)
            .map(|c| self.span_len(self.window_span(c, self.input.c)))
            .sum();
        rows * cols * self.input.d * self.input.b
    }

    fn span_len(&self, span: WindowSpan) -> usize {
        if span.is_empty() {
            0
        } else {
            ((span.end - span.begin - 1) / self.stride as isize + 1) as usize
        }
    }

    /// How many windows cover input position `(r, c)`.
    pub fn coverage(&self, r: usize, c: usize) -> usize {
        self.span_len(self.window_span(r, self.input.r))
            * self.span_len(self.window_span(c, self.input.c))
    }
}

/// Iterator over the lowered cells fed by one input cell.
///
/// Yields `(row, col)` pairs, window rows outer and window columns inner.
#[derive(Debug, Clone)]
pub struct LoweredTargets {
    r: isize,
    c: isize,
    k: isize,
    s: isize,
    out_c: usize,
    row_base: usize,
    col_base: usize,
    rows: WindowSpan,
    cols: WindowSpan,
    wr: isize,
    i: usize,
    wc: isize,
    j: usize,
}

impl Iterator for LoweredTargets {
    type Item = (usize, usize);

    #[inline]
    fn next(&mut self) -> Option<(usize, usize)> {
        loop {
            if self.wr >= self.rows.end {
                return None;
            }
            if self.wc < self.cols.end {
                let dr = (self.r - self.wr) as usize;
                let dc = (self.c - self.wc) as usize;
                let row = self.row_base + dr * self.k as usize + dc;
                let col = self.col_base + self.i * self.out_c + self.j;
                self.wc += self.s;
                self.j += 1;
                return Some((row, col));
            }
            self.wr += self.s;
            self.i += 1;
            self.wc = self.cols.begin;
            self.j = self.cols.first_index;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_next_multiple() {
        assert_eq!(next_multiple(5, 2), 6);
        assert_eq!(next_multiple(6, 2), 6);
        assert_eq!(next_multiple(0, 3), 0);
        assert_eq!(next_multiple(-1, 2), 0);
        assert_eq!(next_multiple(-4, 3), -3);
    }

    #[test]
    fn test_next_largest_multiple() {
        assert_eq!(next_largest_multiple(3, 1, 2), 3);
        assert_eq!(next_largest_multiple(-5, -2, 2), -1);
        assert_eq!(next_largest_multiple(-4, -2, 2), -2);
        assert_eq!(next_largest_multiple(-7, 0, 3), 2);
    }

    #[test]
    fn test_output_extent() {
        assert_eq!(output_extent("rows", 4, 2, 0, 2).unwrap(), 2);
        assert_eq!(output_extent("rows", 2, 2, 1, 1).unwrap(), 3);
        assert_eq!(output_extent("rows", 5, 3, 1, 1).unwrap(), 5);
    }

    #[test]
    fn test_output_extent_rejects_fractional() {
        let err = output_extent("rows", 5, 2, 0, 2).unwrap_err();
        assert!(matches!(err, Error::Configuration { .. }));
        assert!(err.to_string().contains("non-integer output rows"));
    }

    #[test]
    fn test_output_extent_rejects_oversized_kernel() {
        assert!(output_extent("columns", 2, 5, 1, 1).is_err());
        assert!(output_extent("columns", 2, 0, 0, 1).is_err());
        assert!(output_extent("columns", 2, 1, 0, 0).is_err());
    }

    #[test]
    fn test_huge_padding_is_a_configuration_error() {
        let err = LoweringGeometry::new(Dims4::new(4, 4, 1, 1), 2, usize::MAX / 2, 1).unwrap_err();
        assert!(matches!(err, Error::Configuration { .. }));
        assert!(err.to_string().contains("overflows"));
    }

    #[test]
    fn test_lowered_dims() {
        let g = LoweringGeometry::new(Dims4::new(5, 7, 3, 2), 3, 1, 1).unwrap();
        assert_eq!((g.out_r, g.out_c), (5, 7));
        assert_eq!(g.lowered_dims(), Dims4::matrix(27, 70));
    }

    #[test]
    fn test_window_span_with_padding() {
        let g = LoweringGeometry::new(Dims4::new(2, 2, 1, 1), 2, 1, 1).unwrap();
        let span = g.window_span(0, 2);
        assert_eq!(span.begin, -1);
        assert_eq!(span.end, 1);
        assert_eq!(span.first_index, 0);
        let span = g.window_span(1, 2);
        assert_eq!((span.begin, span.end, span.first_index), (0, 2, 1));
    }

    #[test]
    fn test_window_span_stride_skips_misaligned_starts() {
        // K=3, S=2, P=1 on 5 rows: window starts -1, 1, 3
        let g = LoweringGeometry::new(Dims4::new(5, 5, 1, 1), 3, 1, 2).unwrap();
        let span = g.window_span(2, 5);
        assert_eq!((span.begin, span.end, span.first_index), (1, 3, 1));
        let span = g.window_span(0, 5);
        assert_eq!((span.begin, span.end, span.first_index), (-1, 1, 0));
        let span = g.window_span(4, 5);
        assert_eq!((span.begin, span.end, span.first_index), (3, 4, 2));
    }

    #[test]
    fn test_targets_match_inverse_source() {
        let g = LoweringGeometry::new(Dims4::new(5, 5, 2, 2), 3, 1, 2).unwrap();
        for d in 0..2 {
            for b in 0..2 {
                for r in 0..5 {
                    for c in 0..5 {
                        let targets: Vec<_> = g.lowered_targets(r, c, d, b).collect();
                        assert_eq!(targets.len(), g.coverage(r, c));
                        for (row, col) in targets {
                            assert_eq!(g.inverse_source(row, col), Some((r, c, d, b)));
                        }
                    }
                }
            }
        }
    }

    #[test]
    fn test_inverse_source_padding() {
        let g = LoweringGeometry::new(Dims4::new(2, 2, 1, 1), 2, 1, 1).unwrap();
        // window (0, 0) starts at (-1, -1): only kernel offset (1, 1) is inside
        assert_eq!(g.inverse_source(0, 0), None);
        assert_eq!(g.inverse_source(1, 0), None);
        assert_eq!(g.inverse_source(2, 0), None);
        assert_eq!(g.inverse_source(3, 0), Some((0, 0, 0, 0)));
        assert_eq!(g.inverse_source(4, 0), None);
    }

    #[test]
    fn test_coverage_overlap() {
        // K=3, S=1, P=0 on 4x4: centre cells are covered by 4 windows
        let g = LoweringGeometry::new(Dims4::new(4, 4, 1, 1), 3, 0, 1).unwrap();
        assert_eq!(g.coverage(0, 0), 1);
        assert_eq!(g.coverage(1, 1), 4);
        assert_eq!(g.coverage(0, 1), 2);
        assert_eq!(g.coverage(3, 3), 1);
        // every lowered cell is in bounds without padding
        assert_eq!(g.contributions(), g.lowered_dims().elem_count());
    }

    #[test]
    fn test_contributions_exclude_padding() {
        let g = LoweringGeometry::new(Dims4::new(2, 2, 1, 1), 2, 1, 1).unwrap();
        // 9 windows of 4 cells, each input cell is covered 4 times
        assert_eq!(g.contributions(), 16);
        assert_eq!(g.lowered_dims().elem_count(), 36);
    }
}
