//! Property tests for the lowering kernels.
//!
//! Configurations are generated from the output side (outR, outC, K, S, P)
//! so that every generated case tiles its input exactly.

use patchwork_core::kernels::{inverse_lower, inverse_lower_by_map, lower};
use patchwork_core::{Dims4, LoweringGeometry};
use proptest::prelude::*;

// ── Strategies ──────────────────────────────────────────────────────────────

/// A valid geometry: input extents are derived so (i + 2P - K) / S is exact.
fn arb_geometry() -> impl Strategy<Value = LoweringGeometry> {
    (1usize..=4, 1usize..=4, 1usize..=4, 1usize..=3, 0usize..=2, 1usize..=3, 1usize..=3)
        .prop_filter_map("input extent must be positive", |(out_r, out_c, k, s, p, d, b)| {
            let ir = ((out_r - 1) * s + k).checked_sub(2 * p)?;
            let ic = ((out_c - 1) * s + k).checked_sub(2 * p)?;
            if ir == 0 || ic == 0 {
                return None;
            }
            LoweringGeometry::new(Dims4::new(ir, ic, d, b), k, p, s).ok()
        })
}

fn crdb(geom: &LoweringGeometry, r: usize, c: usize, d: usize, b: usize) -> usize {
    c + r * geom.input.c + (d + b * geom.input.d) * geom.input.map_len()
}

// ── Property tests ───────────────────────────────────────────────────────────

proptest! {
    /// The lowered matrix is (K*K*D) x (outR*outC*B).
    #[test]
    fn lowered_shape_matches_formula(geom in arb_geometry()) {
        let Dims4 { r, c, d, b } = geom.input;
        let k = geom.kernel_size;
        let out_r = (r + 2 * geom.padding - k) / geom.stride + 1;
        let out_c = (c + 2 * geom.padding - k) / geom.stride + 1;
        prop_assert_eq!(geom.lowered_dims(), Dims4::matrix(k * k * d, out_r * out_c * b));
    }

    /// Every lowered cell holds exactly the input cell it maps back to, or 0.
    #[test]
    fn lower_agrees_with_inverse_source(geom in arb_geometry()) {
        let input: Vec<f64> = (0..geom.input.elem_count()).map(|v| v as f64 + 1.0).collect();
        let dims = geom.lowered_dims();
        let mut lowered = vec![f64::NAN; dims.elem_count()];
        lower(&geom, &input, &mut lowered);
        for row in 0..dims.r {
            for col in 0..dims.c {
                let got = lowered[row * dims.c + col];
                match geom.inverse_source(row, col) {
                    Some((r, c, d, b)) => prop_assert_eq!(got, input[crdb(&geom, r, c, d, b)]),
                    None => prop_assert_eq!(got, 0.0),
                }
            }
        }
    }

    /// An all-ones gradient accumulates to each cell's window coverage.
    #[test]
    fn inverse_of_ones_counts_coverage(geom in arb_geometry()) {
        let grad = vec![1.0f64; geom.lowered_dims().elem_count()];
        let mut input = vec![0.0f64; geom.input.elem_count()];
        inverse_lower(&geom, &grad, &mut input);
        let Dims4 { r: ir, c: ic, d: id, b: ib } = geom.input;
        for b in 0..ib {
            for d in 0..id {
                for r in 0..ir {
                    for c in 0..ic {
                        prop_assert_eq!(input[crdb(&geom, r, c, d, b)], geom.coverage(r, c) as f64);
                    }
                }
            }
        }
    }

    /// Sequential and per-map inverse lowering agree.
    #[test]
    fn inverse_partitioning_is_equivalent(geom in arb_geometry(), seed in 0u64..1000) {
        let n = geom.lowered_dims().elem_count();
        let grad: Vec<f64> = (0..n).map(|v| ((v as u64 * 31 + seed) % 17) as f64).collect();
        let mut seq = vec![0.0; geom.input.elem_count()];
        let mut by_map = vec![0.0; geom.input.elem_count()];
        inverse_lower(&geom, &grad, &mut seq);
        inverse_lower_by_map(&geom, &grad, &mut by_map);
        prop_assert_eq!(seq, by_map);
    }

    /// lower then inverse_lower, divided by coverage, reproduces the input.
    #[test]
    fn reconstruction_divides_out_coverage(geom in arb_geometry()) {
        let input: Vec<f64> = (0..geom.input.elem_count()).map(|v| (v % 7) as f64 - 3.0).collect();
        let mut lowered = vec![0.0; geom.lowered_dims().elem_count()];
        lower(&geom, &input, &mut lowered);
        let mut back = vec![0.0; input.len()];
        inverse_lower(&geom, &lowered, &mut back);
        let Dims4 { r: ir, c: ic, d: id, b: ib } = geom.input;
        for b in 0..ib {
            for d in 0..id {
                for r in 0..ir {
                    for c in 0..ic {
                        let i = crdb(&geom, r, c, d, b);
                        let n = geom.coverage(r, c);
                        if n == 0 {
                            prop_assert_eq!(back[i], 0.0);
                        } else {
                            prop_assert!((back[i] / n as f64 - input[i]).abs() < 1e-12);
                        }
                    }
                }
            }
        }
    }
}

// ── Fixed scenarios ─────────────────────────────────────────────────────────

#[test]
fn one_hot_round_trip_without_overlap() {
    // stride >= kernel: every input cell is read by at most one window
    let geom = LoweringGeometry::new(Dims4::new(6, 6, 2, 2), 2, 0, 3).unwrap_err();
    assert!(geom.to_string().contains("non-integer"));

    let geom = LoweringGeometry::new(Dims4::new(9, 9, 2, 2), 2, 1, 3).unwrap();
    let n = geom.input.elem_count();
    for hot in [0, 10, 95, n - 1] {
        let mut input = vec![0.0f32; n];
        input[hot] = 5.0;
        let mut lowered = vec![0.0f32; geom.lowered_dims().elem_count()];
        lower(&geom, &input, &mut lowered);
        let mut back = vec![0.0f32; n];
        inverse_lower(&geom, &lowered, &mut back);
        for (i, v) in back.iter().enumerate() {
            let map = i / geom.input.map_len();
            let rc = i % geom.input.map_len();
            let (r, c) = (rc / geom.input.c, rc % geom.input.c);
            let expected = if i == hot && geom.coverage(r, c) == 1 { 5.0 } else { 0.0 };
            assert_eq!(*v, expected, "cell {i} (map {map}, r {r}, c {c})");
        }
    }
}

#[test]
fn padded_corner_windows_hold_one_valid_cell() {
    let geom = LoweringGeometry::new(Dims4::new(2, 2, 1, 1), 2, 1, 1).unwrap();
    assert_eq!((geom.out_r, geom.out_c), (3, 3));
    let input = [1.0f64, 2.0, 3.0, 4.0];
    let mut lowered = vec![f64::NAN; 36];
    lower(&geom, &input, &mut lowered);
    let column = |col: usize| -> Vec<f64> { (0..4).map(|row| lowered[row * 9 + col]).collect() };

    // corner windows: (0,0) (0,2) (2,0) (2,2)
    assert_eq!(column(0), vec![0.0, 0.0, 0.0, 1.0]);
    assert_eq!(column(2), vec![0.0, 0.0, 2.0, 0.0]);
    assert_eq!(column(6), vec![0.0, 3.0, 0.0, 0.0]);
    assert_eq!(column(8), vec![4.0, 0.0, 0.0, 0.0]);
    // centre window sees the whole input
    assert_eq!(column(4), vec![1.0, 2.0, 3.0, 4.0]);
    for col in [0, 2, 6, 8] {
        assert_eq!(column(col).iter().filter(|v| **v != 0.0).count(), 1);
    }
}
