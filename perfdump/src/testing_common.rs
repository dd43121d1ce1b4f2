//! Helpers for exercising the capture pipeline without hardware counters or
//! an MPI launcher.

use std::io;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;

use crate::backend::{BackendEventSet, CounterBackend, EventCode};
use crate::group::ThreadGroup;

/// A counter backend with a fixed catalogue of counter names and a fixed
/// number of hardware slots.
///
/// Counts are deterministic: the `run`-th start/stop cycle of a set reads
/// [`value_for(name, run)`](SimulatedBackend::value_for) for every counter.
#[derive(Clone, Debug)]
pub struct SimulatedBackend {
    catalogue: Arc<Vec<String>>,
    slots: usize,
    seed: i64,
    live_sets: Arc<AtomicUsize>,
}

impl SimulatedBackend {
    pub fn new(catalogue: &[&str], slots: usize) -> Self {
        SimulatedBackend {
            catalogue: Arc::new(catalogue.iter().map(|s| s.to_string()).collect()),
            slots,
            seed: 0,
            live_sets: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Give this backend its own value series, e.g. one per simulated rank.
    pub fn with_seed(self, seed: i64) -> Self {
        SimulatedBackend { seed, ..self }
    }

    /// What a counter reads after the `run`-th counting cycle (1-based).
    pub fn value_for(&self, name: &str, run: i64) -> i64 {
        let code = self
            .name_to_code(name)
            .unwrap_or_else(|| panic!("{:?} is not in the catalogue", name));
        simulated_value(self.seed, code, run)
    }

    /// Number of event sets created and not yet released.
    pub fn live_sets(&self) -> usize {
        self.live_sets.load(Ordering::SeqCst)
    }
}

fn simulated_value(seed: i64, code: EventCode, run: i64) -> i64 {
    seed * 1_000_000 + (code.0 as i64 + 1) * 1_000 + run
}

impl CounterBackend for SimulatedBackend {
    type EventSet = SimulatedEventSet;

    fn num_counters(&self) -> usize {
        self.slots
    }

    fn name_to_code(&self, name: &str) -> Option<EventCode> {
        self.catalogue
            .iter()
            .position(|n| n == name)
            .map(|idx| EventCode(idx as u64))
    }

    fn create_event_set(&self) -> io::Result<SimulatedEventSet> {
        self.live_sets.fetch_add(1, Ordering::SeqCst);
        Ok(SimulatedEventSet {
            codes: Vec::new(),
            slots: self.slots,
            seed: self.seed,
            runs: 0,
            running: false,
            live_sets: self.live_sets.clone(),
        })
    }
}

pub struct SimulatedEventSet {
    codes: Vec<EventCode>,
    slots: usize,
    seed: i64,
    runs: i64,
    running: bool,
    live_sets: Arc<AtomicUsize>,
}

fn busy(msg: &str) -> io::Error {
    io::Error::new(io::ErrorKind::Other, msg.to_string())
}

impl BackendEventSet for SimulatedEventSet {
    fn add(&mut self, code: EventCode) -> io::Result<()> {
        if self.running {
            return Err(busy("event set is counting"));
        }
        if self.codes.contains(&code) {
            return Err(busy("conflicting counter"));
        }
        if self.codes.len() == self.slots {
            return Err(busy("no free hardware counter"));
        }
        self.codes.push(code);
        Ok(())
    }

    fn remove(&mut self, code: EventCode) -> io::Result<()> {
        if self.running {
            return Err(busy("event set is counting"));
        }
        let idx = self
            .codes
            .iter()
            .position(|c| *c == code)
            .ok_or_else(|| busy("counter is not in the event set"))?;
        self.codes.remove(idx);
        Ok(())
    }

    fn start(&mut self) -> io::Result<()> {
        if self.running {
            return Err(busy("event set is already counting"));
        }
        self.running = true;
        self.runs += 1;
        Ok(())
    }

    fn stop(&mut self, values: &mut [i64]) -> io::Result<()> {
        if !self.running {
            return Err(busy("event set is not counting"));
        }
        self.running = false;
        for (value, code) in values.iter_mut().zip(&self.codes) {
            *value = simulated_value(self.seed, *code, self.runs);
        }
        Ok(())
    }
}

impl Drop for SimulatedEventSet {
    fn drop(&mut self) {
        self.live_sets.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Run `f` once per rank of a `size`-process [`ThreadGroup`], each on its
/// own thread, and collect the results in rank order.
pub fn run_group<T, F>(size: usize, f: F) -> Vec<T>
where
    T: Send,
    F: Fn(ThreadGroup) -> T + Sync,
{
    let f = &f;
    thread::scope(|scope| {
        let handles: Vec<_> = ThreadGroup::new(size)
            .into_iter()
            .map(|group| scope.spawn(move || f(group)))
            .collect();

        handles
            .into_iter()
            .map(|handle| handle.join().expect("rank panicked"))
            .collect()
    })
}
