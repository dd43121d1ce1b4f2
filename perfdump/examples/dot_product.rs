//! Computes a dot product per step and records counters around each step.
//!
//! `PDUMP_EVENTS=PAPI_TOT_CYC,PAPI_TOT_INS cargo run --example dot_product`
//! then `cargo run -p pdview -- perf-dump.pdump`.

use std::error::Error;

use perfdump::{Config, PerfDump, PerfEventBackend, SingleProcess};

const MAX_STEP: usize = 10;
const VEC_SIZE: usize = 1000;

/// A small linear congruential generator, good enough to fill vectors.
struct Lcg(u64);

impl Lcg {
    fn next(&mut self) -> f64 {
        self.0 = self
            .0
            .wrapping_mul(6364136223846793005)
            .wrapping_add(1442695040888963407);
        (self.0 >> 33) as f64
    }
}

fn init_vector(vec: &mut [f64], rng: &mut Lcg) {
    for x in vec.iter_mut() {
        *x = rng.next();
    }
}

fn dot(a: &[f64], b: &[f64]) -> f64 {
    a.iter().zip(b).map(|(x, y)| x * y).sum()
}

fn main() -> Result<(), Box<dyn Error>> {
    let mut perf_dump = PerfDump::init(Config::from_env()?, PerfEventBackend::new(), SingleProcess)?;

    let mut rng = Lcg(23578);
    let mut a = vec![0.0; VEC_SIZE];
    let mut b = vec![0.0; VEC_SIZE];

    for step in 0..MAX_STEP {
        perf_dump.start_step()?;

        init_vector(&mut a, &mut rng);
        init_vector(&mut b, &mut rng);
        let d = dot(&a, &b);

        perf_dump.end_step()?;

        println!("{}:\t{}", step, d);
    }

    perf_dump.finalize()?;

    if let Some(path) = perf_dump.dump_path() {
        println!("counters written to {}", path.display());
    }
    Ok(())
}
