//! Benchmark: forward + backward of a two-layer MLP, and raw gemm throughput.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::time::Instant;
use tensa_core::{Backend, CpuF32, NoGradGuard, SimdCapability, Tensor};

type T = Tensor<CpuF32>;

fn random(rng: &mut StdRng, shape: &[usize], scale: f32) -> T {
    let n: usize = shape.iter().product();
    let values = (0..n).map(|_| rng.gen_range(-scale..scale)).collect();
    T::from_vec(values, shape).unwrap()
}

fn bench_step(x: &T, w1: &T, b1: &T, w2: &T, iters: usize) -> (f64, f64) {
    let mut forward = 0.0;
    let mut backward = 0.0;
    for _ in 0..iters {
        let start = Instant::now();
        let h = (&x.matmul(w1).unwrap() + b1).relu();
        let loss = h.matmul(w2).unwrap().square().mean();
        forward += start.elapsed().as_secs_f64();

        for p in [w1, b1, w2] {
            p.zero_grad();
        }
        let start = Instant::now();
        loss.backward().unwrap();
        backward += start.elapsed().as_secs_f64();

        let _guard = NoGradGuard::new();
        for p in [w1, b1, w2] {
            if let Some(g) = p.gradient() {
                CpuF32::axpy(-1e-3, g, p.values());
            }
        }
    }
    (forward / iters as f64, backward / iters as f64)
}

fn bench_chain(len: usize) -> f64 {
    let x = T::ones(&[16]).with_grad();
    let start = Instant::now();
    let mut h = x.clone();
    for _ in 0..len {
        h = h.tanh();
    }
    h.sum().backward().unwrap();
    start.elapsed().as_secs_f64()
}

fn gflops(m: usize, n: usize, k: usize, secs: f64) -> f64 {
    (2.0 * m as f64 * n as f64 * k as f64) / secs / 1e9
}

fn main() {
    let simd = SimdCapability::detect();
    println!("=== tensa backward benchmark ===");
    println!("SIMD: {}\n", simd.best_tier());

    let mut rng = StdRng::seed_from_u64(0);
    let sizes: &[(usize, usize, usize)] = &[(32, 64, 32), (64, 256, 64), (128, 512, 128)];

    println!(
        "{:<16} {:>12} {:>12} {:>10}",
        "batch/hid/out", "fwd (ms)", "bwd (ms)", "GFLOPS"
    );
    for &(batch, hidden, out) in sizes {
        let features = hidden / 2;
        let x = random(&mut rng, &[batch, features], 1.0);
        let w1 = random(&mut rng, &[features, hidden], 0.1).with_grad();
        let b1 = T::zeros(&[hidden]).with_grad();
        let w2 = random(&mut rng, &[hidden, out], 0.1).with_grad();

        // warm-up
        bench_step(&x, &w1, &b1, &w2, 2);
        let iters = 10;
        let (fwd, bwd) = bench_step(&x, &w1, &b1, &w2, iters);
        // backward does two gemms per forward gemm
        let flops = gflops(batch, hidden, features, 1.0) + gflops(batch, out, hidden, 1.0);
        println!(
            "{:<16} {:>12.3} {:>12.3} {:>10.2}",
            format!("{}/{}/{}", batch, hidden, out),
            fwd * 1e3,
            bwd * 1e3,
            3.0 * flops / (fwd + bwd),
        );
    }

    println!();
    for len in [1_000, 10_000, 50_000] {
        println!("tanh chain of {:>6}: {:>10.3} ms", len, bench_chain(len) * 1e3);
    }
}
