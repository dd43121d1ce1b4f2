//! The seam between the capture logic and whatever actually owns the
//! hardware counters.
//!
//! A [`CounterBackend`] resolves counter names and hands out event sets; a
//! [`BackendEventSet`] counts a group of counters together. Dropping an event
//! set must release it back to the backend (cleanup, then destroy), whether
//! or not it is still counting.

use std::fmt;
use std::io;

use crate::error::Error;

/// Opaque, backend-specific code for a counter.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct EventCode(pub u64);

impl fmt::Display for EventCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#x}", self.0)
    }
}

/// A counter that has been resolved once and never changes afterwards.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CounterSpec {
    pub name: String,
    pub code: EventCode,
}

pub trait CounterBackend {
    type EventSet: BackendEventSet;

    /// Per-process library initialization. Called once by the orchestrator
    /// before any event set is created.
    fn init(&self) -> Result<(), Error> {
        Ok(())
    }

    /// How many counters the platform can count simultaneously.
    fn num_counters(&self) -> usize;

    fn name_to_code(&self, name: &str) -> Option<EventCode>;

    fn create_event_set(&self) -> io::Result<Self::EventSet>;
}

pub trait BackendEventSet {
    fn add(&mut self, code: EventCode) -> io::Result<()>;

    fn remove(&mut self, code: EventCode) -> io::Result<()>;

    /// Start all counters of the set at once.
    fn start(&mut self) -> io::Result<()>;

    /// Stop all counters and read them, in the order they were added, into
    /// `values` (which has exactly one slot per counter).
    fn stop(&mut self, values: &mut [i64]) -> io::Result<()>;
}

/// Resolve a human-readable counter name through `backend`.
///
/// An unknown name is always an error. Only capacity limits are allowed to
/// drop a requested counter silently, and those are handled by the caller.
pub fn resolve<B>(backend: &B, name: &str) -> Result<CounterSpec, Error>
where
    B: CounterBackend + ?Sized,
{
    let unknown = || Error::UnknownCounter {
        name: name.to_string(),
    };

    if name.is_empty() {
        return Err(unknown());
    }

    let code = backend.name_to_code(name).ok_or_else(unknown)?;

    Ok(CounterSpec {
        name: name.to_string(),
        code,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing_common::SimulatedBackend;

    #[test]
    fn resolves_known_names() {
        let backend = SimulatedBackend::new(&["C1", "C2"], 4);
        let spec = resolve(&backend, "C2").unwrap();
        assert_eq!(spec.name, "C2");
        assert_eq!(spec.code, backend.name_to_code("C2").unwrap());
    }

    #[test]
    fn unknown_and_empty_names_fail() {
        let backend = SimulatedBackend::new(&["C1"], 4);
        match resolve(&backend, "NOPE") {
            Err(Error::UnknownCounter { name }) => assert_eq!(name, "NOPE"),
            other => panic!("unexpected result: {:?}", other),
        }
        assert!(resolve(&backend, "").is_err());
    }
}
