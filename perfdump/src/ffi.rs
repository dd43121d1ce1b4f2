//! C entry points, see `include/perf_dump.h`.
//!
//! One capture per process lives in a global. Any error is fatal here: it is
//! reported as one line on stderr and the whole process group is aborted,
//! since the other processes would otherwise wait forever in the next
//! collective.

use std::os::raw::c_int;

use parking_lot::Mutex;

use crate::config::Config;
use crate::counters::PerfEventBackend;
use crate::error::Error;
use crate::group::ProcessGroup;
use crate::profiler::{PerfDump, State};

#[cfg(feature = "mpi")]
type DefaultGroup = crate::group::MpiGroup;
#[cfg(not(feature = "mpi"))]
type DefaultGroup = crate::group::SingleProcess;

const ABORT_CODE: i32 = 1;

static PERF_DUMP: Mutex<Option<PerfDump<PerfEventBackend, DefaultGroup>>> =
    parking_lot::const_mutex(None);

#[cfg(feature = "mpi")]
fn default_group() -> DefaultGroup {
    match crate::group::MpiGroup::world() {
        Some(group) => group,
        None => {
            eprintln!("perf-dump: MPI must be initialized before perf-dump is used");
            std::process::exit(ABORT_CODE)
        }
    }
}

#[cfg(not(feature = "mpi"))]
fn default_group() -> DefaultGroup {
    crate::group::SingleProcess
}

/// Every process reads the same configuration, so rank 0 speaks for the
/// group. Other failures can differ between processes.
fn reports<G: ProcessGroup + ?Sized>(group: &G, err: &Error) -> bool {
    match err {
        Error::Config { .. } => group.rank() == 0,
        _ => true,
    }
}

fn fatal<G: ProcessGroup>(group: &G, err: &Error) -> ! {
    if reports(group, err) {
        eprintln!(
            "perf-dump: rank {}: {} failed with code {}: {}",
            group.rank(),
            err.operation(),
            err.code(),
            err
        );
    }
    group.abort(ABORT_CODE)
}

fn with_perf_dump<F>(op: &'static str, f: F)
where
    F: FnOnce(&mut PerfDump<PerfEventBackend, DefaultGroup>) -> Result<(), Error>,
{
    let mut perf_dump = PERF_DUMP.lock();
    let result = match perf_dump.as_mut() {
        Some(pd) => f(pd).map_err(|err| (err, *pd.group())),
        None => Err((
            Error::InvalidState {
                op,
                state: "perf-dump is not initialized",
            },
            default_group(),
        )),
    };

    if let Err((err, group)) = result {
        drop(perf_dump);
        fatal(&group, &err)
    }
}

/// Read the configuration from the environment and set up the counters.
#[no_mangle]
pub extern "C" fn pdump_init() {
    let mut perf_dump = PERF_DUMP.lock();
    if let Some(pd) = perf_dump.as_ref() {
        if pd.state() != State::Finalized {
            debug!("pdump_init: already initialized");
            return;
        }
    }

    let group = default_group();
    let result = Config::from_env()
        .and_then(|config| PerfDump::init(config, PerfEventBackend::new(), group));

    match result {
        Ok(pd) => *perf_dump = Some(pd),
        Err(err) => {
            drop(perf_dump);
            fatal(&group, &err)
        }
    }
}

#[no_mangle]
pub extern "C" fn pdump_start_step() {
    with_perf_dump("start step", |pd| pd.start_step());
}

#[no_mangle]
pub extern "C" fn pdump_end_step() {
    with_perf_dump("end step", |pd| pd.end_step());
}

/// Does nothing if `pdump_init` was never called.
#[no_mangle]
pub extern "C" fn pdump_finalize() {
    if PERF_DUMP.lock().is_some() {
        with_perf_dump("finalize", |pd| pd.finalize());
    }
}

/// Forward the level of an `MPI_Pcontrol` call. Level 2 ends the running
/// step and starts the next one; every other level is ignored.
#[no_mangle]
pub extern "C" fn pdump_pcontrol(level: c_int) -> c_int {
    if PERF_DUMP.lock().is_none() {
        debug!("pdump_pcontrol({}) before pdump_init, ignored", level);
        return 0;
    }
    with_perf_dump("profiling control", |pd| pd.control(level));
    0
}

macro_rules! legacy_entry_points {
    ($($canonical:ident => $($alias:ident),+;)*) => {
        $($(
            #[no_mangle]
            #[allow(non_snake_case)]
            pub extern "C" fn $alias() {
                $canonical()
            }
        )+)*
    };
}

// Spellings used by Fortran compilers.
legacy_entry_points! {
    pdump_init => PDUMP_INIT, pdump_init_, pdump_init__;
    pdump_start_step => PDUMP_START_STEP, pdump_start_step_, pdump_start_step__;
    pdump_end_step => PDUMP_END_STEP, pdump_end_step_, pdump_end_step__;
    pdump_finalize => PDUMP_FINALIZE, pdump_finalize_, pdump_finalize__;
}
