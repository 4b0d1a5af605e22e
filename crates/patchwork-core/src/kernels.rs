// Lowering kernels: element movement between a CRDB cube and its lowered matrix
//
// All kernels work on flat slices in CRDB order (see `layout.rs`) and trust
// that the caller validated lengths against the geometry; drivers check
// buffer sizes before calling in.
//
// Each kernel is split into a per-partition function plus a sequential
// driver loop over partitions, so a parallel backend can hand partitions to
// workers without changing the arithmetic:
//
//   lower_depth         : one depth slice; owns lowered rows d*K*K..(d+1)*K*K
//   inverse_lower_map   : one (d, b) feature map; owns R*C input cells
//
// Every lowered cell is written by exactly one input cell, and every input
// cell in `inverse_lower_map` has exactly one writer, so partitions never race.

use crate::dims::Dims4;
use crate::dtype::WithDType;
use crate::geometry::LoweringGeometry;

/// Forward lowering: scatter every input element into the windows covering it.
///
/// `output` is zero-filled first so padding cells read exactly 0.
pub fn lower<T: WithDType>(geom: &LoweringGeometry, input: &[T], output: &mut [T]) {
    let slab_len = geom.kernel_area() * geom.lowered_cols();
    debug_assert_eq!(input.len(), geom.input.elem_count());
    debug_assert_eq!(output.len(), slab_len * geom.input.d);
    for (d, slab) in output.chunks_mut(slab_len).enumerate() {
        lower_depth(geom, d, input, slab);
    }
}

/// Lower depth slice `d` of `input` into `slab`, the K*K lowered rows it owns.
pub fn lower_depth<T: WithDType>(geom: &LoweringGeometry, d: usize, input: &[T], slab: &mut [T]) {
    let Dims4 { r: ir, c: ic, d: id, .. } = geom.input;
    let n_cols = geom.lowered_cols();
    let row_base = d * geom.kernel_area();
    slab.fill(T::zero());

    for b in 0..geom.input.b {
        let map = &input[(b * id + d) * ir * ic..][..ir * ic];
        for r in 0..ir {
            for c in 0..ic {
                let value = map[r * ic + c];
                for (row, col) in geom.lowered_targets(r, c, d, b) {
                    slab[(row - row_base) * n_cols + col] = value;
                }
            }
        }
    }
}

/// Inverse lowering: accumulate a lowered gradient back into cube layout.
///
/// `input` must be zero-initialized by the caller; contributions are added,
/// never stored, because overlapping windows hit the same input cell.
///
/// Traversal is depth, kernel row, kernel column, batch, window row, window
/// column, which reads `grad` strictly sequentially. A window row that lies
/// entirely in the padding is skipped in one step of `out_c` cells.
pub fn inverse_lower<T: WithDType>(geom: &LoweringGeometry, grad: &[T], input: &mut [T]) {
    let Dims4 {
        r: ir,
        c: ic,
        d: id,
        b: ib,
    } = geom.input;
    let k = geom.kernel_size;
    let s = geom.stride;
    let p = geom.padding as isize;
    debug_assert_eq!(grad.len(), geom.lowered_dims().elem_count());
    debug_assert_eq!(input.len(), geom.input.elem_count());

    let mut out_index = 0usize;
    for d in 0..id {
        for kr in 0..k {
            for kc in 0..k {
                for b in 0..ib {
                    let map_offset = (b * id + d) * ir * ic;
                    for i in 0..geom.out_r {
                        let row = (i * s + kr) as isize - p;
                        if row < 0 || row >= ir as isize {
                            out_index += geom.out_c;
                            continue;
                        }
                        let row_offset = map_offset + row as usize * ic;
                        for j in 0..geom.out_c {
                            let col = (j * s + kc) as isize - p;
                            if col >= 0 && col < ic as isize {
                                let dst = &mut input[row_offset + col as usize];
                                *dst = *dst + grad[out_index];
                            }
                            out_index += 1;
                        }
                    }
                }
            }
        }
    }
}

/// Accumulate every contribution to feature map `(d, b)` into `map`.
///
/// `map` is the R*C slice of the input cube at depth `d`, batch `b`. The
/// caller owns the whole map, so parallel callers may run one map per worker.
pub fn inverse_lower_map<T: WithDType>(
    geom: &LoweringGeometry,
    d: usize,
    b: usize,
    grad: &[T],
    map: &mut [T],
) {
    let Dims4 { r: ir, c: ic, .. } = geom.input;
    let k = geom.kernel_size;
    let s = geom.stride;
    let p = geom.padding as isize;
    let n_cols = geom.lowered_cols();
    let col_base = b * geom.windows_per_image();

    for kr in 0..k {
        for kc in 0..k {
            let row = d * geom.kernel_area() + kr * k + kc;
            let grad_row = &grad[row * n_cols + col_base..][..geom.windows_per_image()];
            for i in 0..geom.out_r {
                let r = (i * s + kr) as isize - p;
                if r < 0 || r >= ir as isize {
                    continue;
                }
                let dst_row = &mut map[r as usize * ic..][..ic];
                for j in 0..geom.out_c {
                    let c = (j * s + kc) as isize - p;
                    if c >= 0 && c < ic as isize {
                        let dst = &mut dst_row[c as usize];
                        *dst = *dst + grad_row[i * geom.out_c + j];
                    }
                }
            }
        }
    }
}

/// Inverse lowering partitioned by feature map; same result as [`inverse_lower`]
/// up to floating point summation order.
pub fn inverse_lower_by_map<T: WithDType>(geom: &LoweringGeometry, grad: &[T], input: &mut [T]) {
    let id = geom.input.d;
    for (m, map) in input.chunks_mut(geom.input.map_len()).enumerate() {
        inverse_lower_map(geom, m % id, m / id, grad, map);
    }
}

/// Regroup a buffer whose feature maps are ordered depth-of-batch into CRDB.
///
/// `src` is read as a CRDB cube of `dims`, but its flat map index
/// `id + ib*D` really enumerates (depth, batch) pairs with batch fastest:
/// `real_depth = (id + ib*D) / B`, `real_batch = (id + ib*D) % B`. Every
/// destination is written exactly once.
pub fn remap<T: WithDType>(dims: Dims4, src: &[T], dst: &mut [T]) {
    let Dims4 { r, c, d, b } = dims;
    let map_len = r * c;
    debug_assert_eq!(src.len(), dims.elem_count());
    debug_assert_eq!(dst.len(), dims.elem_count());

    for ib in 0..b {
        for id in 0..d {
            let flat = id + ib * d;
            let real_d = flat / b;
            let real_b = flat % b;
            let from = &src[flat * map_len..][..map_len];
            let to = &mut dst[(real_d + real_b * d) * map_len..][..map_len];
            to.copy_from_slice(from);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn geometry(dims: (usize, usize, usize, usize), k: usize, p: usize, s: usize) -> LoweringGeometry {
        LoweringGeometry::new(Dims4::from(dims), k, p, s).unwrap()
    }

    /// Direct gather-form lowering used as a reference.
    fn reference_lower(geom: &LoweringGeometry, input: &[f64]) -> Vec<f64> {
        let dims = geom.lowered_dims();
        let mut out = vec![0.0; dims.elem_count()];
        for row in 0..dims.r {
            for col in 0..dims.c {
                if let Some((r, c, d, b)) = geom.inverse_source(row, col) {
                    let i = c + r * geom.input.c + (d + b * geom.input.d) * geom.input.map_len();
                    out[row * dims.c + col] = input[i];
                }
            }
        }
        out
    }

    #[test]
    fn test_lower_non_overlapping_patches() {
        let g = geometry((4, 4, 1, 1), 2, 0, 2);
        let input: Vec<f32> = (1..=16).map(|v| v as f32).collect();
        let mut out = vec![-1.0f32; 16];
        lower(&g, &input, &mut out);
        // column-wise patches [1,2,5,6] [3,4,7,8] [9,10,13,14] [11,12,15,16]
        assert_eq!(
            out,
            vec![
                1.0, 3.0, 9.0, 11.0, //
                2.0, 4.0, 10.0, 12.0, //
                5.0, 7.0, 13.0, 15.0, //
                6.0, 8.0, 14.0, 16.0,
            ]
        );
    }

    #[test]
    fn test_lower_matches_reference() {
        for &(dims, k, p, s) in &[
            ((5, 5, 2, 3), 3, 1, 2),
            ((6, 4, 1, 2), 2, 0, 2),
            ((4, 4, 3, 1), 3, 2, 1),
            ((3, 5, 2, 2), 1, 0, 1),
        ] {
            let g = geometry(dims, k, p, s);
            let input: Vec<f64> = (0..g.input.elem_count()).map(|v| v as f64 + 1.0).collect();
            let mut out = vec![7.0; g.lowered_dims().elem_count()];
            lower(&g, &input, &mut out);
            assert_eq!(out, reference_lower(&g, &input), "dims {dims:?} k {k} p {p} s {s}");
        }
    }

    #[test]
    fn test_inverse_lower_counts_overlap() {
        let g = geometry((4, 4, 1, 1), 3, 0, 1);
        let grad = vec![1.0f64; g.lowered_dims().elem_count()];
        let mut input = vec![0.0f64; 16];
        inverse_lower(&g, &grad, &mut input);
        for r in 0..4 {
            for c in 0..4 {
                assert_eq!(input[r * 4 + c], g.coverage(r, c) as f64);
            }
        }
    }

    #[test]
    fn test_inverse_lower_skips_padding_rows() {
        // P=2 with K=2: the first and last window rows lie fully in the padding
        let g = geometry((2, 2, 1, 2), 2, 2, 2);
        assert_eq!((g.out_r, g.out_c), (3, 3));
        let n = g.lowered_dims().elem_count();
        let grad: Vec<f64> = (0..n).map(|v| v as f64).collect();
        let mut seq = vec![0.0; g.input.elem_count()];
        let mut by_map = vec![0.0; g.input.elem_count()];
        inverse_lower(&g, &grad, &mut seq);
        inverse_lower_by_map(&g, &grad, &mut by_map);
        assert_eq!(seq, by_map);

        let mut expected = vec![0.0; g.input.elem_count()];
        for row in 0..g.lowered_rows() {
            for col in 0..g.lowered_cols() {
                if let Some((r, c, d, b)) = g.inverse_source(row, col) {
                    expected[c + r * 2 + (d + b) * 4] += grad[row * g.lowered_cols() + col];
                }
            }
        }
        assert_eq!(seq, expected);
    }

    #[test]
    fn test_inverse_accumulates_into_existing_values() {
        let g = geometry((2, 2, 1, 1), 2, 0, 1);
        let grad = vec![1.0f32; 4];
        let mut input = vec![10.0f32; 4];
        inverse_lower(&g, &grad, &mut input);
        assert_eq!(input, vec![11.0; 4]);
    }

    #[test]
    fn test_remap_regroups_depth_and_batch() {
        // 1x1 maps make the permutation visible directly
        let dims = Dims4::new(1, 1, 3, 2);
        let src = vec![0.0f32, 1.0, 2.0, 3.0, 4.0, 5.0];
        let mut dst = vec![0.0f32; 6];
        remap(dims, &src, &mut dst);
        // flat = id + ib*3 enumerates (depth, batch) with batch fastest
        // flat 0 -> (d0,b0), 1 -> (d0,b1), 2 -> (d1,b0), 3 -> (d1,b1), 4 -> (d2,b0), 5 -> (d2,b1)
        assert_eq!(dst, vec![0.0, 2.0, 4.0, 1.0, 3.0, 5.0]);
    }

    #[test]
    fn test_remap_moves_whole_maps() {
        let dims = Dims4::new(2, 2, 2, 2);
        let src: Vec<f64> = (0..16).map(|v| v as f64).collect();
        let mut dst = vec![0.0; 16];
        remap(dims, &src, &mut dst);
        // source map 1 is (d0, b1) -> destination map index 0 + 1*2 = 2
        assert_eq!(&dst[8..12], &src[4..8]);
        assert_eq!(&dst[0..4], &src[0..4]);
        assert_eq!(&dst[12..16], &src[12..16]);
    }
}
