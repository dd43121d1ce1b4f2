//! Step-granular hardware counter capture for parallel applications.
//!
//! Every process of a parallel job samples the same set of hardware counters
//! around each step of its main loop. The samples of selected steps end up in
//! one file shared by the whole job, with one `[processes, steps]` time series
//! per counter:
//!
//! ```no_run
//! use perfdump::{Config, PerfDump, PerfEventBackend, SingleProcess};
//!
//! # fn main() -> Result<(), perfdump::Error> {
//! let mut perf_dump = PerfDump::init(Config::from_env()?, PerfEventBackend::new(), SingleProcess)?;
//! for _ in 0..10 {
//!     perf_dump.start_step()?;
//!     // ... one step of the computation ...
//!     perf_dump.end_step()?;
//! }
//! perf_dump.finalize()?;
//! # Ok(())
//! # }
//! ```
//!
//! Applications written in C or Fortran use the entry points of [`ffi`]
//! instead.

#[macro_use]
extern crate log;

pub mod backend;
pub mod columnar;
pub mod config;
pub mod counters;
mod error;
pub mod event_set;
pub mod ffi;
pub mod file_header;
pub mod group;
mod profiler;
pub mod reader;
pub mod step_gate;
pub mod timeseries;

pub mod testing_common;

pub use crate::backend::{BackendEventSet, CounterBackend, CounterSpec, EventCode};
pub use crate::config::Config;
pub use crate::counters::PerfEventBackend;
pub use crate::error::Error;
pub use crate::event_set::EventCollector;
#[cfg(feature = "mpi")]
pub use crate::group::MpiGroup;
pub use crate::group::{ProcessGroup, SingleProcess, ThreadGroup};
pub use crate::profiler::{PerfDump, State, PCONTROL_STEP_BOUNDARY};
pub use crate::reader::{DatasetDump, DumpFile};
pub use crate::step_gate::{should_persist, DumpSelector};
pub use crate::timeseries::{dump_file_path, TimeSeriesStore};
