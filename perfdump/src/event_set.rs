use smallvec::SmallVec;

use crate::backend::{self, BackendEventSet, CounterBackend, CounterSpec};
use crate::error::Error;

/// A set of counters that are started, stopped and read together.
///
/// Counters keep their insertion order, which is also the order of
/// [`values`](EventCollector::values) and of the datasets in the dump file.
/// Dropping the collector releases the backend event set.
pub struct EventCollector<B: CounterBackend> {
    // NOTE declared before `backend` so it is released first.
    set: B::EventSet,
    backend: B,
    specs: Vec<CounterSpec>,
    values: SmallVec<[i64; 8]>,
    ignored: Vec<String>,
}

impl<B: CounterBackend> EventCollector<B> {
    /// Create an empty event set on `backend`.
    pub fn new(backend: B) -> Result<Self, Error> {
        let set = backend
            .create_event_set()
            .map_err(|source| Error::Backend {
                op: "create event set",
                source,
            })?;

        Ok(EventCollector {
            set,
            backend,
            specs: Vec::new(),
            values: SmallVec::new(),
            ignored: Vec::new(),
        })
    }

    /// Resolve `name` and add it to the set.
    pub fn add(&mut self, name: &str) -> Result<(), Error> {
        let spec = backend::resolve(&self.backend, name)?;

        if self.specs.iter().any(|s| s.name == spec.name) {
            return Err(Error::BackendRegistration {
                name: spec.name,
                source: std::io::Error::new(
                    std::io::ErrorKind::AlreadyExists,
                    "counter is already in the event set",
                ),
            });
        }

        if let Err(source) = self.set.add(spec.code) {
            return Err(Error::BackendRegistration {
                name: spec.name,
                source,
            });
        }

        self.specs.push(spec);
        self.values.push(0);
        Ok(())
    }

    pub fn remove(&mut self, name: &str) -> Result<(), Error> {
        let idx = self
            .specs
            .iter()
            .position(|s| s.name == name)
            .ok_or_else(|| Error::UnknownCounter {
                name: name.to_string(),
            })?;

        self.set
            .remove(self.specs[idx].code)
            .map_err(|source| Error::Backend {
                op: "remove counter",
                source,
            })?;

        self.specs.remove(idx);
        self.values.remove(idx);
        Ok(())
    }

    /// Add the requested counters in order until `capacity` is reached; the
    /// rest are recorded as ignored without being resolved.
    ///
    /// Over-subscription is resolved first-come-first-served, there is no
    /// multiplexing.
    pub fn add_from_configuration<S: AsRef<str>>(
        &mut self,
        names: &[S],
        capacity: usize,
    ) -> Result<(), Error> {
        let split = names.len().min(capacity);
        let (kept, dropped) = names.split_at(split);

        for name in kept {
            self.add(name.as_ref())?;
        }

        self.ignored
            .extend(dropped.iter().map(|name| name.as_ref().to_string()));

        if !dropped.is_empty() {
            debug!(
                "EventCollector: {} counter(s) over capacity {}: {:?}",
                dropped.len(),
                capacity,
                self.ignored
            );
        }
        Ok(())
    }

    pub fn start(&mut self) -> Result<(), Error> {
        self.set.start().map_err(|source| Error::Backend {
            op: "start counters",
            source,
        })
    }

    /// Stop counting and read every counter into [`values`](Self::values).
    pub fn stop(&mut self) -> Result<(), Error> {
        let EventCollector {
            ref mut set,
            ref mut values,
            ..
        } = *self;

        set.stop(values).map_err(|source| Error::Backend {
            op: "stop counters",
            source,
        })
    }

    /// Like [`stop`](Self::stop), but reads into a buffer supplied by the
    /// caller, which must have one slot per counter.
    pub fn stop_into(&mut self, values: &mut [i64]) -> Result<(), Error> {
        if values.len() != self.specs.len() {
            return Err(Error::Backend {
                op: "stop counters",
                source: std::io::Error::new(
                    std::io::ErrorKind::InvalidInput,
                    format!(
                        "buffer has {} slots for {} counters",
                        values.len(),
                        self.specs.len()
                    ),
                ),
            });
        }

        self.set.stop(values).map_err(|source| Error::Backend {
            op: "stop counters",
            source,
        })
    }

    pub fn size(&self) -> usize {
        self.specs.len()
    }

    pub fn specs(&self) -> &[CounterSpec] {
        &self.specs
    }

    pub fn event_names(&self) -> Vec<String> {
        self.specs.iter().map(|s| s.name.clone()).collect()
    }

    /// Requested counters that did not fit on this platform.
    pub fn ignored_events(&self) -> &[String] {
        &self.ignored
    }

    /// Counts from the last [`stop`](Self::stop).
    pub fn values(&self) -> &[i64] {
        &self.values
    }
}
