//! The process group that a capture runs in.
//!
//! Everything collective in this crate is built from two primitives: a
//! barrier and a logical-AND reduction of a local success flag. The reduction
//! is what keeps a group from splitting when one process fails halfway
//! through a collective: either every process goes on, or every process
//! sees the failure.

use std::sync::Arc;

use parking_lot::{Condvar, Mutex};

pub trait ProcessGroup {
    fn rank(&self) -> usize;

    fn size(&self) -> usize;

    /// Collective. Returns `true` iff every process passed `true`.
    fn all_ok(&self, ok: bool) -> bool;

    /// Collective.
    fn barrier(&self) {
        self.all_ok(true);
    }

    /// Terminate the whole group with `code`.
    fn abort(&self, code: i32) -> !;
}

/// A group of one, for applications that are not launched in parallel.
#[derive(Clone, Copy, Debug, Default)]
pub struct SingleProcess;

impl ProcessGroup for SingleProcess {
    fn rank(&self) -> usize {
        0
    }

    fn size(&self) -> usize {
        1
    }

    fn all_ok(&self, ok: bool) -> bool {
        ok
    }

    fn abort(&self, code: i32) -> ! {
        std::process::exit(code)
    }
}

struct RoundState {
    arrived: usize,
    generation: u64,
    acc: bool,
    result: bool,
}

struct Rendezvous {
    state: Mutex<RoundState>,
    round_done: Condvar,
}

/// Threads of one process standing in for the ranks of a parallel job.
pub struct ThreadGroup {
    rank: usize,
    size: usize,
    shared: Arc<Rendezvous>,
}

impl ThreadGroup {
    /// One handle per rank; hand each to its own thread.
    pub fn new(size: usize) -> Vec<ThreadGroup> {
        assert!(size > 0, "a process group needs at least one member");

        let shared = Arc::new(Rendezvous {
            state: Mutex::new(RoundState {
                arrived: 0,
                generation: 0,
                acc: true,
                result: true,
            }),
            round_done: Condvar::new(),
        });

        (0..size)
            .map(|rank| ThreadGroup {
                rank,
                size,
                shared: shared.clone(),
            })
            .collect()
    }
}

impl ProcessGroup for ThreadGroup {
    fn rank(&self) -> usize {
        self.rank
    }

    fn size(&self) -> usize {
        self.size
    }

    fn all_ok(&self, ok: bool) -> bool {
        let mut state = self.shared.state.lock();
        state.acc &= ok;
        state.arrived += 1;

        if state.arrived == self.size {
            state.result = state.acc;
            state.acc = true;
            state.arrived = 0;
            state.generation = state.generation.wrapping_add(1);
            self.shared.round_done.notify_all();
            return state.result;
        }

        // `result` cannot be overwritten before we read it: the next round
        // only completes once this thread has arrived there too.
        let generation = state.generation;
        while state.generation == generation {
            self.shared.round_done.wait(&mut state);
        }
        state.result
    }

    fn abort(&self, code: i32) -> ! {
        panic!("rank {} aborted the thread group with code {}", self.rank, code)
    }
}

#[cfg(feature = "mpi")]
pub use self::mpi_group::MpiGroup;

#[cfg(feature = "mpi")]
mod mpi_group {
    use mpi::collective::SystemOperation;
    use mpi::topology::SimpleCommunicator;
    use mpi::traits::*;

    use super::ProcessGroup;

    /// `MPI_COMM_WORLD` of an application that has already initialized MPI.
    #[derive(Clone, Copy, Debug)]
    pub struct MpiGroup {
        rank: usize,
        size: usize,
    }

    impl MpiGroup {
        /// `None` if MPI has not been initialized (or was already finalized).
        pub fn world() -> Option<MpiGroup> {
            if !mpi::environment::is_initialized() || mpi::environment::is_finalized() {
                return None;
            }

            let world = SimpleCommunicator::world();
            Some(MpiGroup {
                rank: world.rank() as usize,
                size: world.size() as usize,
            })
        }
    }

    impl ProcessGroup for MpiGroup {
        fn rank(&self) -> usize {
            self.rank
        }

        fn size(&self) -> usize {
            self.size
        }

        fn all_ok(&self, ok: bool) -> bool {
            let local = ok as i32;
            let mut global = 0i32;
            SimpleCommunicator::world().all_reduce_into(
                &local,
                &mut global,
                SystemOperation::min(),
            );
            global == 1
        }

        fn barrier(&self) {
            SimpleCommunicator::world().barrier();
        }

        fn abort(&self, code: i32) -> ! {
            SimpleCommunicator::world().abort(code)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing_common::run_group;

    #[test]
    fn single_process_is_rank_zero_of_one() {
        let group = SingleProcess;
        assert_eq!((group.rank(), group.size()), (0, 1));
        assert!(group.all_ok(true));
        assert!(!group.all_ok(false));
    }

    #[test]
    fn all_ok_is_a_logical_and() {
        let results = run_group(4, |group| {
            let first = group.all_ok(true);
            let second = group.all_ok(group.rank() != 2);
            let third = group.all_ok(true);
            (group.rank(), first, second, third)
        });

        for (rank, (r, first, second, third)) in results.into_iter().enumerate() {
            assert_eq!(r, rank);
            assert!(first);
            assert!(!second);
            assert!(third);
        }
    }

    #[test]
    fn many_rounds_stay_in_lockstep() {
        let results = run_group(3, |group| {
            (0..200)
                .filter(|round| group.all_ok(round % (group.rank() + 2) != 0))
                .count()
        });
        assert!(results.iter().all(|n| *n == results[0]));
    }
}
