//! Convolution latency benchmark: repeated timed requests on one session.
//!
//! Each request is timed from the execute command until the receive channel
//! drains, and every sample is appended to the configured timing log
//! (`diagnostics.timing_log`, `execution_time.txt` by default).
//!
//! Usage:
//!   cargo run --bin bench_convolve
//!   cargo run --bin bench_convolve -- --side 480 --iterations 200
//!   cargo run --bin bench_convolve -- --simulate --side 64

use anyhow::Result;
use convolver_driver::{Image, Session, SessionConfig, SimulatedAccelerator};
use std::time::Duration;
use tracing_subscriber::EnvFilter;

const DEFAULT_SIDE: usize = 480;
const DEFAULT_ITERATIONS: usize = 100;
const WARMUP: usize = 5;

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("warn".parse()?))
        .init();

    let args: Vec<String> = std::env::args().collect();
    let side = parse_arg(&args, "--side", DEFAULT_SIDE);
    let iterations = parse_arg(&args, "--iterations", DEFAULT_ITERATIONS).max(1);
    let simulate = args.iter().any(|a| a == "--simulate");

    let config = SessionConfig::resolve(None)?;
    let timing_log = config.diagnostics.timing_log.clone();

    println!("Convolution latency benchmark");
    println!("=============================");
    println!("Image side    : {side}");
    println!("Iterations    : {iterations}");
    println!("Backend       : {}", if simulate { "simulated" } else { "hardware" });
    println!("Timing log    : {}", timing_log.display());
    println!();

    let mut session = if simulate {
        let sim = SimulatedAccelerator::new(config.network());
        Session::simulated(&sim, config)
    } else {
        Session::open(config)?
    };
    session.setup()?;

    let image = Image::zeros(side)?;

    // Warmup
    for _ in 0..WARMUP {
        session.convolve(&image)?;
    }

    let mut samples = Vec::with_capacity(iterations);
    let mut dim = 0;
    for _ in 0..iterations {
        let out = session.convolve_timed(&image)?;
        dim = out.dim;
        samples.push(out.elapsed.unwrap_or_default());
    }

    print_latency(&samples, dim);
    Ok(())
}

fn print_latency(samples: &[Duration], dim: usize) {
    let mut sorted = samples.to_vec();
    sorted.sort_unstable();
    let total: Duration = sorted.iter().sum();
    #[allow(clippy::cast_possible_truncation)]
    let mean = total / sorted.len() as u32;
    let p99 = sorted[(sorted.len() * 99 / 100).min(sorted.len() - 1)];

    println!("Output        : {dim}x{dim}");
    println!("Min           : {:>10.1} µs", micros(sorted[0]));
    println!("Mean          : {:>10.1} µs", micros(mean));
    println!("p99           : {:>10.1} µs", micros(p99));
    println!("Max           : {:>10.1} µs", micros(sorted[sorted.len() - 1]));
    println!(
        "Throughput    : {:>10.1} images/s",
        sorted.len() as f64 / total.as_secs_f64().max(f64::EPSILON)
    );
}

fn micros(d: Duration) -> f64 {
    d.as_secs_f64() * 1e6
}

fn parse_arg(args: &[String], flag: &str, default: usize) -> usize {
    args.windows(2)
        .find(|w| w[0] == flag)
        .and_then(|w| w[1].parse().ok())
        .unwrap_or(default)
}
