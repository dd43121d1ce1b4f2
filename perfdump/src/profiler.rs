use std::path::Path;

use crate::backend::CounterBackend;
use crate::config::Config;
use crate::error::Error;
use crate::event_set::EventCollector;
use crate::group::ProcessGroup;
use crate::step_gate::{should_persist, DumpSelector};
use crate::timeseries::TimeSeriesStore;

/// The profiling-control level that means "end the current step and begin
/// the next one".
pub const PCONTROL_STEP_BOUNDARY: i32 = 2;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum State {
    /// Between steps.
    Ready,
    /// Counters are running.
    Sampling,
    Finalized,
}

impl State {
    fn describe(self) -> &'static str {
        match self {
            State::Ready => "between steps",
            State::Sampling => "a step is running",
            State::Finalized => "finalized",
        }
    }
}

/// Captures hardware counters for every step of one process of a parallel
/// application.
///
/// Every process of `group` owns one `PerfDump` and drives it through the
/// same sequence of [`start_step`](PerfDump::start_step) and
/// [`end_step`](PerfDump::end_step) calls. Persisting a step is collective,
/// so a process that skips an `end_step` stalls the others.
pub struct PerfDump<B: CounterBackend, G: ProcessGroup> {
    events: Option<EventCollector<B>>,
    event_names: Vec<String>,
    ignored_events: Vec<String>,
    store: TimeSeriesStore,
    selector: DumpSelector,
    time_chunk: u64,
    step: u64,
    state: State,
    group: G,
}

impl<B: CounterBackend, G: ProcessGroup> PerfDump<B, G> {
    /// Set up the counters named by `config`. Nothing is written until the
    /// first persisted step ends.
    pub fn init(config: Config, backend: B, group: G) -> Result<Self, Error> {
        backend.init()?;

        let capacity = config
            .max_counters
            .unwrap_or_else(|| backend.num_counters());

        let mut events = EventCollector::new(backend)?;
        events.add_from_configuration(&config.events[..], capacity)?;

        let perf_dump = PerfDump {
            event_names: events.event_names(),
            ignored_events: events.ignored_events().to_vec(),
            events: Some(events),
            store: TimeSeriesStore::new(config.dump_dir),
            selector: config.dump_steps,
            time_chunk: config.time_chunk,
            step: 0,
            state: State::Ready,
            group,
        };

        if perf_dump.group.rank() == 0 {
            perf_dump.report(capacity);
        }

        Ok(perf_dump)
    }

    fn report(&self, capacity: usize) {
        info!(
            "perf-dump started on {} process(es) with {} of at most {} counters: {}",
            self.group.size(),
            self.event_names.len(),
            capacity,
            self.event_names.join(", ")
        );
        if !self.ignored_events.is_empty() {
            info!(
                "  ignored (not enough hardware counters): {}",
                self.ignored_events.join(", ")
            );
        }
        info!("  dump steps: {}", self.selector);
        info!("  time chunk: {}", self.time_chunk);
    }

    fn expect_state(&self, op: &'static str, expected: State) -> Result<(), Error> {
        if self.state != expected {
            return Err(Error::InvalidState {
                op,
                state: self.state.describe(),
            });
        }
        Ok(())
    }

    fn collector(&mut self, op: &'static str) -> Result<&mut EventCollector<B>, Error> {
        let state = self.state.describe();
        self.events
            .as_mut()
            .ok_or(Error::InvalidState { op, state })
    }

    pub fn start_step(&mut self) -> Result<(), Error> {
        self.expect_state("start step", State::Ready)?;
        self.collector("start step")?.start()?;
        self.state = State::Sampling;
        Ok(())
    }

    /// Stop the counters and, if this step is selected, persist their values.
    /// Collective when the step is persisted.
    pub fn end_step(&mut self) -> Result<(), Error> {
        self.expect_state("end step", State::Sampling)?;
        self.collector("end step")?.stop()?;
        self.state = State::Ready;

        let step = self.step;
        self.step += 1;

        if should_persist(step, &self.selector) && !self.event_names.is_empty() {
            self.persist(step)?;
        }
        Ok(())
    }

    fn persist(&mut self, step: u64) -> Result<(), Error> {
        let PerfDump {
            ref events,
            ref event_names,
            ref mut store,
            ref group,
            time_chunk,
            ..
        } = *self;

        let values = events.as_ref().map(|e| e.values()).unwrap_or(&[]);

        store.ensure_ready(group, event_names, group.size(), time_chunk)?;
        for (name, value) in event_names.iter().zip(values) {
            store.append_step(group, name, *value)?;
        }
        let slots = store.step_extent();
        store.release(group)?;

        debug!("PerfDump: persisted step {} (T = {:?})", step, slots);
        Ok(())
    }

    /// Handle a profiling-control request.
    ///
    /// [`PCONTROL_STEP_BOUNDARY`] ends the running step, if any, and starts
    /// the next one. Other levels are ignored.
    pub fn control(&mut self, level: i32) -> Result<(), Error> {
        if level != PCONTROL_STEP_BOUNDARY {
            debug!("PerfDump: ignoring profiling control level {}", level);
            return Ok(());
        }

        match self.state {
            State::Sampling => {
                self.end_step()?;
                self.start_step()
            }
            State::Ready => self.start_step(),
            State::Finalized => Err(Error::InvalidState {
                op: "profiling control",
                state: self.state.describe(),
            }),
        }
    }

    /// Release the counters. A step that is still running is stopped and
    /// discarded. Calling this again does nothing.
    pub fn finalize(&mut self) -> Result<(), Error> {
        if self.state == State::Finalized {
            return Ok(());
        }

        let stopped = match (self.state, self.events.as_mut()) {
            (State::Sampling, Some(events)) => {
                debug!("PerfDump: discarding unfinished step {}", self.step);
                events.stop()
            }
            _ => Ok(()),
        };

        self.events = None;
        self.state = State::Finalized;

        let released = self.store.release(&self.group);
        stopped.and(released)
    }

    /// Number of completed steps.
    pub fn step(&self) -> u64 {
        self.step
    }

    pub fn state(&self) -> State {
        self.state
    }

    pub fn event_names(&self) -> &[String] {
        &self.event_names
    }

    pub fn ignored_events(&self) -> &[String] {
        &self.ignored_events
    }

    /// Counts read at the end of the last step.
    pub fn values(&self) -> &[i64] {
        self.events.as_ref().map(|e| e.values()).unwrap_or(&[])
    }

    pub fn selector(&self) -> &DumpSelector {
        &self.selector
    }

    /// The dump file, once the first persisted step has created it.
    pub fn dump_path(&self) -> Option<&Path> {
        self.store.path()
    }

    pub fn group(&self) -> &G {
        &self.group
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::group::SingleProcess;
    use crate::testing_common::SimulatedBackend;

    fn perf_dump(
        events: &[&str],
        dir: &Path,
    ) -> (SimulatedBackend, PerfDump<SimulatedBackend, SingleProcess>) {
        let backend = SimulatedBackend::new(&["C1", "C2", "C3"], 4);
        let config = Config {
            events: events.iter().map(|s| s.to_string()).collect(),
            dump_dir: dir.to_path_buf(),
            ..Config::default()
        };
        let perf_dump = PerfDump::init(config, backend.clone(), SingleProcess).unwrap();
        (backend, perf_dump)
    }

    #[test]
    fn lifecycle_order_is_enforced() {
        let dir = tempfile::tempdir().unwrap();
        let (_, mut pd) = perf_dump(&["C1"], dir.path());

        assert!(matches!(pd.end_step(), Err(Error::InvalidState { .. })));
        pd.start_step().unwrap();
        assert!(matches!(pd.start_step(), Err(Error::InvalidState { .. })));
        pd.end_step().unwrap();
        assert_eq!(pd.step(), 1);

        pd.finalize().unwrap();
        assert!(matches!(pd.start_step(), Err(Error::InvalidState { .. })));
        assert!(pd.control(PCONTROL_STEP_BOUNDARY).is_err());
    }

    #[test]
    fn control_marks_step_boundaries() {
        let dir = tempfile::tempdir().unwrap();
        let (backend, mut pd) = perf_dump(&["C1", "C2"], dir.path());

        pd.control(1).unwrap();
        assert_eq!(pd.state(), State::Ready);

        pd.control(PCONTROL_STEP_BOUNDARY).unwrap();
        assert_eq!(pd.state(), State::Sampling);
        pd.control(PCONTROL_STEP_BOUNDARY).unwrap();
        pd.control(PCONTROL_STEP_BOUNDARY).unwrap();
        assert_eq!(pd.step(), 2);
        assert_eq!(pd.values()[1], backend.value_for("C2", 2));

        // The third step is still running and gets dropped.
        pd.finalize().unwrap();
        assert_eq!(pd.step(), 2);
        assert_eq!(backend.live_sets(), 0);

        let dump = crate::reader::DumpFile::open(pd.dump_path().unwrap()).unwrap();
        assert_eq!(dump.num_steps(), 2);
    }

    #[test]
    fn no_counters_no_file() {
        let dir = tempfile::tempdir().unwrap();
        let (_, mut pd) = perf_dump(&[], dir.path());

        pd.start_step().unwrap();
        pd.end_step().unwrap();
        assert_eq!(pd.step(), 1);
        assert!(pd.values().is_empty());
        assert!(pd.dump_path().is_none());
    }

    #[test]
    fn capacity_override_wins() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config {
            events: vec!["C1".to_string(), "C2".to_string()],
            dump_dir: dir.path().to_path_buf(),
            max_counters: Some(1),
            ..Config::default()
        };
        let pd = PerfDump::init(config, SimulatedBackend::new(&["C1", "C2"], 4), SingleProcess)
            .unwrap();
        assert_eq!(pd.event_names(), &["C1".to_string()]);
        assert_eq!(pd.ignored_events(), &["C2".to_string()]);
    }
}
