// CUDA driver tests: every GPU result is checked against the CPU driver
//
// Run with: `cargo test -p patchwork-cuda` on a machine with a CUDA device.
//
// All tests create a CudaDriver(0).

#[cfg(test)]
mod tests {
    use patchwork_core::kernels;
    use patchwork_core::{
        ApplyOp, Connector, ConnectorConfig, DType, DeviceDriver, Dims4, DriverStorage, Error,
        LogicalCube, LoweringGeometry,
    };
    use patchwork_cuda::CudaDriver;

    fn gpu() -> CudaDriver {
        CudaDriver::new(0).expect("CUDA device 0 not available, skip CUDA tests")
    }

    fn approx(a: f64, b: f64, tol: f64) -> bool {
        (a - b).abs() < tol
    }

    fn assert_approx_vec(actual: &[f64], expected: &[f64], tol: f64) {
        assert_eq!(
            actual.len(),
            expected.len(),
            "length mismatch: {} vs {}",
            actual.len(),
            expected.len()
        );
        for (i, (a, e)) in actual.iter().zip(expected.iter()).enumerate() {
            assert!(approx(*a, *e, tol), "index {i}: {a} != {e} (tol={tol})");
        }
    }

    fn ramp(n: usize) -> Vec<f64> {
        (0..n).map(|v| ((v * 7) % 11) as f64 - 5.0).collect()
    }

    // ─────────────────────────────────────────────────────────────────────
    // Memory and math
    // ─────────────────────────────────────────────────────────────────────

    #[test]
    fn test_roundtrip_and_memset() {
        let d = gpu();
        let mut s = d.from_f64_slice(&[1.0, 2.0, 3.0], DType::F32).unwrap();
        assert_eq!(d.to_f64_vec(&s).unwrap(), vec![1.0, 2.0, 3.0]);
        d.memset(&mut s, -2.0).unwrap();
        assert_eq!(d.to_f64_vec(&s).unwrap(), vec![-2.0; 3]);
    }

    #[test]
    fn test_half_storage_unsupported() {
        let d = gpu();
        assert!(!d.supports(DType::F16));
        assert!(matches!(d.zeros(4, DType::BF16), Err(Error::Driver(_))));
    }

    #[test]
    fn test_memcpy_prefix() {
        let d = gpu();
        let src = d.from_f64_slice(&[5.0, 6.0], DType::F64).unwrap();
        let mut dst = d.zeros(4, DType::F64).unwrap();
        d.memcpy(&mut dst, &src).unwrap();
        assert_eq!(d.to_f64_vec(&dst).unwrap(), vec![5.0, 6.0, 0.0, 0.0]);
    }

    #[test]
    fn test_apply_scale_prefix_and_axpby() {
        let d = gpu();
        let x = d.from_f64_slice(&[1.0, 2.0, 3.0, 4.0], DType::F32).unwrap();
        let mut y = d.from_f64_slice(&[1.0; 4], DType::F32).unwrap();
        d.apply(&mut y, 2, ApplyOp::Scale(3.0)).unwrap();
        assert_eq!(d.to_f64_vec(&y).unwrap(), vec![3.0, 3.0, 1.0, 1.0]);
        d.axpby(2.0, &x, -1.0, &mut y).unwrap();
        assert_eq!(d.to_f64_vec(&y).unwrap(), vec![-1.0, 1.0, 5.0, 7.0]);
        d.apply_grad(&mut y, &x).unwrap();
        assert_eq!(d.to_f64_vec(&y).unwrap(), vec![-2.0, -1.0, 2.0, 3.0]);
    }

    #[test]
    fn test_gemm_row_major() {
        let d = gpu();
        for dtype in [DType::F32, DType::F64] {
            let a = d.from_f64_slice(&[1.0, 2.0, 3.0, 4.0, 5.0, 6.0], dtype).unwrap();
            let b = d.from_f64_slice(&[7.0, 8.0, 9.0, 10.0, 11.0, 12.0], dtype).unwrap();
            let mut c = d.from_f64_slice(&[1.0; 4], dtype).unwrap();
            d.gemm(&a, &b, &mut c, 2, 2, 3, 1.0, 1.0).unwrap();
            assert_approx_vec(&d.to_f64_vec(&c).unwrap(), &[59.0, 65.0, 140.0, 155.0], 1e-4);
        }
    }

    #[test]
    fn test_bernoulli_on_device() {
        let d = gpu().with_seed(5);
        let mut m = d.zeros(512, DType::F32).unwrap();
        d.bernoulli_initialize(&mut m, 512, 0.5).unwrap();
        let v = d.to_f64_vec(&m).unwrap();
        assert!(v.iter().all(|x| *x == 0.0 || *x == 1.0));
        assert!(v.iter().any(|x| *x == 1.0));
    }

    // ─────────────────────────────────────────────────────────────────────
    // Lowering primitives vs host kernels
    // ─────────────────────────────────────────────────────────────────────

    fn check_against_host(dims: Dims4, k: usize, p: usize, s: usize) {
        let d = gpu();
        let geom = LoweringGeometry::new(dims, k, p, s).unwrap();
        let data = ramp(dims.elem_count());

        let mut host_lowered = vec![0.0; geom.lowered_dims().elem_count()];
        kernels::lower(&geom, &data, &mut host_lowered);
        let mut host_back = vec![0.0; dims.elem_count()];
        kernels::inverse_lower(&geom, &host_lowered, &mut host_back);

        let input = d.from_f64_slice(&data, DType::F64).unwrap();
        let mut lowered = d.zeros(host_lowered.len(), DType::F64).unwrap();
        d.memset(&mut lowered, f64::NAN).unwrap();
        d.lower_cube(&geom, &input, &mut lowered).unwrap();
        assert_eq!(d.to_f64_vec(&lowered).unwrap(), host_lowered);

        let mut back = d.zeros(dims.elem_count(), DType::F64).unwrap();
        d.inverse_lower_cube(&geom, &lowered, &mut back).unwrap();
        assert_approx_vec(&d.to_f64_vec(&back).unwrap(), &host_back, 1e-9);
    }

    #[test]
    fn test_lower_non_overlapping() {
        check_against_host(Dims4::new(4, 4, 1, 1), 2, 0, 2);
    }

    #[test]
    fn test_lower_overlapping_padded_batched() {
        check_against_host(Dims4::new(5, 5, 3, 2), 3, 1, 1);
    }

    #[test]
    fn test_lower_padding_wider_than_stride() {
        check_against_host(Dims4::new(2, 2, 1, 2), 2, 2, 2);
    }

    #[test]
    fn test_remap_matches_host() {
        let d = gpu();
        let dims = Dims4::new(2, 3, 3, 2);
        let data = ramp(dims.elem_count());
        let mut expected = vec![0.0; data.len()];
        kernels::remap(dims, &data, &mut expected);

        let src = d.from_f64_slice(&data, DType::F32).unwrap();
        let mut dst = d.zeros(data.len(), DType::F32).unwrap();
        d.remap_cube(dims, &src, &mut dst).unwrap();
        assert_eq!(d.to_f64_vec(&dst).unwrap(), expected);
    }

    // ─────────────────────────────────────────────────────────────────────
    // Connector on the GPU
    // ─────────────────────────────────────────────────────────────────────

    #[test]
    fn test_connector_rejects_half_on_cuda() {
        let d = gpu();
        let err = Connector::new(d, (4, 4, 1, 1), DType::F16, ConnectorConfig::new(2)).unwrap_err();
        assert!(matches!(err, Error::UnimplementedCombination { .. }));
    }

    #[test]
    fn test_connector_lower_and_inverse() {
        let d = gpu();
        let config = ConnectorConfig::new(3).with_padding(1);
        let mut conn = Connector::new(d.clone(), (4, 4, 2, 2), DType::F32, config).unwrap();
        let input = LogicalCube::from_f64_slice(&ramp(64), (4, 4, 2, 2), DType::F32, &d).unwrap();
        let lowered = conn.lower(&input).unwrap();
        assert_eq!(lowered.dims(), Dims4::matrix(18, 32));
        let grad = conn.inverse_lower(&lowered).unwrap();
        assert_eq!(grad.storage().len(), 64);
        assert_eq!(conn.report_history().n_calls, 1);
    }
}
