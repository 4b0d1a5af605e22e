//! Lowering throughput on the CPU driver, sequential vs threaded.
//!
//! Run with: `cargo run --release -p demo-bench-lowering`
//! Set `RUST_LOG=patchwork_core=debug` to see connector construction.

use std::time::Instant;

use patchwork::prelude::*;
use patchwork::Result;

struct Case {
    name: &'static str,
    input: (usize, usize, usize, usize),
    kernel: usize,
    padding: usize,
    stride: usize,
    iters: u32,
}

const CASES: &[Case] = &[
    Case { name: "mnist 28x28x1 b64, k5", input: (28, 28, 1, 64), kernel: 5, padding: 2, stride: 1, iters: 20 },
    Case { name: "cifar 32x32x3 b32, k3", input: (32, 32, 3, 32), kernel: 3, padding: 1, stride: 1, iters: 20 },
    Case { name: "deep 16x16x64 b8, k3", input: (16, 16, 64, 8), kernel: 3, padding: 1, stride: 1, iters: 10 },
    Case { name: "strided 64x64x16 b4, k4 s2", input: (64, 64, 16, 4), kernel: 4, padding: 1, stride: 2, iters: 10 },
];

fn bench<F: FnMut() -> Result<()>>(name: &str, iters: u32, mut f: F) -> Result<()> {
    // Warmup
    for _ in 0..2 {
        f()?;
    }
    let start = Instant::now();
    for _ in 0..iters {
        f()?;
    }
    let elapsed = start.elapsed();
    let per_iter = elapsed / iters;
    println!("  {name:<40} {per_iter:>10.2?}  ({iters} iters, {elapsed:.2?} total)");
    Ok(())
}

fn run_case(case: &Case, driver: &CpuDriver) -> Result<()> {
    let config = ConnectorConfig::new(case.kernel)
        .with_padding(case.padding)
        .with_stride(case.stride);
    let mut conn = Connector::new(driver.clone(), case.input, DType::F32, config)?;

    let mut input = CpuCube::zeros(case.input, DType::F32, driver)?;
    let n = input.elem_count();
    driver.gaussian_initialize(input.storage_mut(), n, 0.0, 1.0)?;
    let mut lowered = CpuCube::zeros(conn.output_dims(), DType::F32, driver)?;
    let mut grad = CpuCube::zeros(case.input, DType::F32, driver)?;

    let tag = format!("{} [{} thr]", case.name, driver.num_threads());
    bench(&format!("lower {tag}"), case.iters, || conn.lower_into(&input, &mut lowered))?;
    bench(&format!("inverse {tag}"), case.iters, || {
        conn.inverse_lower_into(&lowered, &mut grad)
    })?;
    println!("    lower   {}", conn.report_history());
    println!("    inverse {}", conn.report_inverse_history());
    Ok(())
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    println!("=== Patchwork Lowering Benchmark ===\n");
    let threads = std::thread::available_parallelism().map_or(4, |n| n.get());
    let drivers = [CpuDriver::new(), CpuDriver::new().with_threads(threads)?];

    for case in CASES {
        println!(" {} ", case.name);
        for driver in &drivers {
            run_case(case, driver)?;
        }
        println!();
    }
    Ok(())
}
