//! Hardware performance counters backed by Linux `perf_event_open`.
//!
//! # Available counters
//!
//! Name (for [`by_name()`])                       | perf event                      | Notes
//! ---------------------------------------------- | ------------------------------- | -----
//! `PAPI_TOT_CYC`, `cycles`, `cpu-cycles`         | `PERF_COUNT_HW_CPU_CYCLES`      |
//! `PAPI_TOT_INS`, `instructions`                 | `PERF_COUNT_HW_INSTRUCTIONS`    |
//! `PAPI_L3_TCA`, `cache-references`              | `PERF_COUNT_HW_CACHE_REFERENCES`|
//! `PAPI_L3_TCM`, `cache-misses`                  | `PERF_COUNT_HW_CACHE_MISSES`    | last-level cache
//! `PAPI_BR_INS`, `branches`, `branch-instructions` | `PERF_COUNT_HW_BRANCH_INSTRUCTIONS` |
//! `PAPI_BR_MSP`, `branch-misses`                 | `PERF_COUNT_HW_BRANCH_MISSES`   |
//! `bus-cycles`                                   | `PERF_COUNT_HW_BUS_CYCLES`      |
//! `PAPI_REF_CYC`, `ref-cycles`                   | `PERF_COUNT_HW_REF_CPU_CYCLES`  |
//! `PAPI_L1_TCM`, `PAPI_L1_DCM`, `L1-dcache-load-misses` | L1D read misses          | `PAPI_L1_TCM` is the default event
//! `PAPI_L1_ICM`, `L1-icache-load-misses`         | L1I read misses                 |
//! `LLC-load-misses`                              | LL read misses                  |
//! `PAPI_TLB_DM`, `dTLB-load-misses`              | DTLB read misses                |
//! `PAPI_TLB_IM`, `iTLB-load-misses`              | ITLB read misses                |
//! `task-clock`, `page-faults`, `context-switches`, `cpu-migrations` | software events |
//! `rNNNN`                                        | raw hex event (`PERF_TYPE_RAW`) |
//!
//! *Note: perf has no combined "all L1 misses" event, so `PAPI_L1_TCM` counts L1
//! data cache read misses, the dominant term for most numerical codes.*
//!
//! All events are created for the calling thread only, count userspace only
//! (kernel and hypervisor excluded), and are grouped so that a whole event
//! set starts, stops and is read at once.
//!
//! The platform does not report how many programmable counters it has, so
//! [`PerfEventBackend`] assumes [`DEFAULT_NUM_COUNTERS`]. Anything beyond
//! what the PMU can schedule together makes `perf_event_open` fail when the
//! counter is added, which surfaces as a registration error.

use std::io;

use crate::backend::{BackendEventSet, CounterBackend, EventCode};
use crate::error::Error;

// HACK this is semantically `warn!` but uses `error!` so it shows up even
// under the most restrictive default filters.
macro_rules! really_warn {
    ($msg:literal $($rest:tt)*) => {
        error!(concat!("[WARNING] ", $msg) $($rest)*)
    }
}

/// Simultaneous counters assumed when nothing else is known (the usual number
/// of general-purpose counters per hardware thread on x86_64).
pub const DEFAULT_NUM_COUNTERS: usize = 4;

// `perf_type_id` values, fixed by the kernel ABI.
const PERF_TYPE_HARDWARE: u32 = 0;
const PERF_TYPE_SOFTWARE: u32 = 1;
const PERF_TYPE_HW_CACHE: u32 = 3;
const PERF_TYPE_RAW: u32 = 4;

const CACHE_L1D: u64 = 0;
const CACHE_L1I: u64 = 1;
const CACHE_LL: u64 = 2;
const CACHE_DTLB: u64 = 3;
const CACHE_ITLB: u64 = 4;

const fn read_miss(cache: u64) -> u64 {
    // cache id | (PERF_COUNT_HW_CACHE_OP_READ << 8) | (PERF_COUNT_HW_CACHE_RESULT_MISS << 16)
    cache | (0 << 8) | (1 << 16)
}

/// The event type lives in the top byte of an [`EventCode`], the event
/// config in the rest.
const CONFIG_BITS: u32 = 56;

const NAMED_COUNTERS: &[(&str, u32, u64)] = &[
    ("PAPI_TOT_CYC", PERF_TYPE_HARDWARE, 0),
    ("cycles", PERF_TYPE_HARDWARE, 0),
    ("cpu-cycles", PERF_TYPE_HARDWARE, 0),
    ("PAPI_TOT_INS", PERF_TYPE_HARDWARE, 1),
    ("instructions", PERF_TYPE_HARDWARE, 1),
    ("PAPI_L3_TCA", PERF_TYPE_HARDWARE, 2),
    ("cache-references", PERF_TYPE_HARDWARE, 2),
    ("PAPI_L3_TCM", PERF_TYPE_HARDWARE, 3),
    ("cache-misses", PERF_TYPE_HARDWARE, 3),
    ("PAPI_BR_INS", PERF_TYPE_HARDWARE, 4),
    ("branches", PERF_TYPE_HARDWARE, 4),
    ("branch-instructions", PERF_TYPE_HARDWARE, 4),
    ("PAPI_BR_MSP", PERF_TYPE_HARDWARE, 5),
    ("branch-misses", PERF_TYPE_HARDWARE, 5),
    ("bus-cycles", PERF_TYPE_HARDWARE, 6),
    ("PAPI_REF_CYC", PERF_TYPE_HARDWARE, 9),
    ("ref-cycles", PERF_TYPE_HARDWARE, 9),
    ("PAPI_L1_TCM", PERF_TYPE_HW_CACHE, read_miss(CACHE_L1D)),
    ("PAPI_L1_DCM", PERF_TYPE_HW_CACHE, read_miss(CACHE_L1D)),
    ("L1-dcache-load-misses", PERF_TYPE_HW_CACHE, read_miss(CACHE_L1D)),
    ("PAPI_L1_ICM", PERF_TYPE_HW_CACHE, read_miss(CACHE_L1I)),
    ("L1-icache-load-misses", PERF_TYPE_HW_CACHE, read_miss(CACHE_L1I)),
    ("LLC-load-misses", PERF_TYPE_HW_CACHE, read_miss(CACHE_LL)),
    ("PAPI_TLB_DM", PERF_TYPE_HW_CACHE, read_miss(CACHE_DTLB)),
    ("dTLB-load-misses", PERF_TYPE_HW_CACHE, read_miss(CACHE_DTLB)),
    ("PAPI_TLB_IM", PERF_TYPE_HW_CACHE, read_miss(CACHE_ITLB)),
    ("iTLB-load-misses", PERF_TYPE_HW_CACHE, read_miss(CACHE_ITLB)),
    ("task-clock", PERF_TYPE_SOFTWARE, 1),
    ("page-faults", PERF_TYPE_SOFTWARE, 2),
    ("context-switches", PERF_TYPE_SOFTWARE, 3),
    ("cpu-migrations", PERF_TYPE_SOFTWARE, 4),
];

/// Map a counter name (see the table in the module docs) to its code.
pub fn by_name(name: &str) -> Option<EventCode> {
    if let Some(&(_, type_, config)) = NAMED_COUNTERS.iter().find(|(n, ..)| *n == name) {
        return Some(encode(type_, config));
    }

    let hex = name.strip_prefix('r')?;
    if hex.is_empty() {
        return None;
    }
    u64::from_str_radix(hex, 16)
        .ok()
        .filter(|config| config >> CONFIG_BITS == 0)
        .map(|config| encode(PERF_TYPE_RAW, config))
}

fn encode(type_: u32, config: u64) -> EventCode {
    EventCode((type_ as u64) << CONFIG_BITS | config)
}

fn decode(code: EventCode) -> (u32, u64) {
    (
        (code.0 >> CONFIG_BITS) as u32,
        code.0 & ((1 << CONFIG_BITS) - 1),
    )
}

/// Counter backend for the calling thread, on top of `perf_event_open`.
///
/// Can be constructed anywhere; on targets other than Linux
/// [`init`](CounterBackend::init) fails.
#[derive(Debug, Clone)]
pub struct PerfEventBackend {
    num_counters: usize,
}

impl Default for PerfEventBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl PerfEventBackend {
    pub fn new() -> Self {
        PerfEventBackend {
            num_counters: DEFAULT_NUM_COUNTERS,
        }
    }

    /// Override the number of counters the platform is assumed to support.
    pub fn with_num_counters(self, num_counters: usize) -> Self {
        PerfEventBackend { num_counters }
    }
}

impl CounterBackend for PerfEventBackend {
    type EventSet = PerfEventSet;

    fn init(&self) -> Result<(), Error> {
        hw::check_access().map_err(|source| Error::Backend {
            op: "initialize counter backend",
            source,
        })
    }

    fn num_counters(&self) -> usize {
        self.num_counters
    }

    fn name_to_code(&self, name: &str) -> Option<EventCode> {
        by_name(name)
    }

    fn create_event_set(&self) -> io::Result<PerfEventSet> {
        Ok(PerfEventSet {
            codes: Vec::new(),
            group: None,
            running: false,
        })
    }
}

fn open_group(codes: &[EventCode]) -> io::Result<Option<hw::Group>> {
    let (leader, members) = match codes.split_first() {
        Some(split) => split,
        None => return Ok(None),
    };

    let mut group = hw::Group::new(*leader)?;
    for code in members {
        group.add(*code)?;
    }
    Ok(Some(group))
}

/// A perf event group. The first counter added becomes the group leader.
pub struct PerfEventSet {
    codes: Vec<EventCode>,
    group: Option<hw::Group>,
    running: bool,
}

impl PerfEventSet {
    fn check_idle(&self) -> io::Result<()> {
        if self.running {
            return Err(io::Error::new(
                io::ErrorKind::Other,
                "event set is counting",
            ));
        }
        Ok(())
    }
}

impl BackendEventSet for PerfEventSet {
    fn add(&mut self, code: EventCode) -> io::Result<()> {
        self.check_idle()?;

        match self.group {
            Some(ref mut group) => group.add(code)?,
            None => self.group = Some(hw::Group::new(code)?),
        }
        self.codes.push(code);
        Ok(())
    }

    fn remove(&mut self, code: EventCode) -> io::Result<()> {
        self.check_idle()?;

        let idx = self.codes.iter().position(|c| *c == code).ok_or_else(|| {
            io::Error::new(io::ErrorKind::NotFound, "counter is not in the event set")
        })?;

        // perf can't detach a single member from a group, so rebuild it. The
        // old group stays in place until every member of the new one opened.
        let mut codes = self.codes.clone();
        codes.remove(idx);
        self.group = open_group(&codes)?;
        self.codes = codes;
        Ok(())
    }

    fn start(&mut self) -> io::Result<()> {
        if self.running {
            return Err(io::Error::new(
                io::ErrorKind::Other,
                "event set is already counting",
            ));
        }
        if let Some(ref group) = self.group {
            group.enable()?;
        }
        self.running = true;
        Ok(())
    }

    fn stop(&mut self, values: &mut [i64]) -> io::Result<()> {
        if !self.running {
            return Err(io::Error::new(
                io::ErrorKind::Other,
                "event set is not counting",
            ));
        }
        self.running = false;
        match self.group {
            Some(ref group) => group.disable_and_read(values),
            None => Ok(()),
        }
    }
}

/// Linux implementation based on `perf_event_open` groups.
#[cfg(target_os = "linux")]
mod hw {
    use perf_event_open_sys::{bindings::*, ioctls, perf_event_open};
    use std::fs;
    use std::io::{self, Read};
    use std::mem;
    use std::os::unix::io::{AsRawFd, FromRawFd};

    use crate::backend::EventCode;

    pub(super) struct Group {
        leader: fs::File,
        members: Vec<fs::File>,
    }

    impl Group {
        pub(super) fn new(code: EventCode) -> io::Result<Self> {
            let leader = open_event(code, None)?;
            Ok(Group {
                leader,
                members: Vec::new(),
            })
        }

        pub(super) fn add(&mut self, code: EventCode) -> io::Result<()> {
            let member = open_event(code, Some(&self.leader))?;
            self.members.push(member);
            Ok(())
        }

        pub(super) fn enable(&self) -> io::Result<()> {
            let fd = self.leader.as_raw_fd();
            check(unsafe { ioctls::RESET(fd, PERF_IOC_FLAG_GROUP) })?;
            check(unsafe { ioctls::ENABLE(fd, PERF_IOC_FLAG_GROUP) })
        }

        pub(super) fn disable_and_read(&self, values: &mut [i64]) -> io::Result<()> {
            check(unsafe { ioctls::DISABLE(self.leader.as_raw_fd(), PERF_IOC_FLAG_GROUP) })?;

            // With `PERF_FORMAT_GROUP` the leader reads as
            // `{ u64 nr; u64 values[nr]; }`.
            let expected = 1 + self.members.len();
            let mut buf = vec![0u8; 8 * (1 + expected)];
            let read = (&self.leader).read(&mut buf)?;

            let words: Vec<u64> = buf[..read]
                .chunks_exact(8)
                .map(|w| {
                    let mut bytes = [0u8; 8];
                    bytes.copy_from_slice(w);
                    u64::from_ne_bytes(bytes)
                })
                .collect();

            match words.split_first() {
                Some((&nr, counts)) if nr as usize == expected && counts.len() == expected => {
                    for (value, count) in values.iter_mut().zip(counts) {
                        *value = *count as i64;
                    }
                    Ok(())
                }
                _ => Err(io::Error::new(
                    io::ErrorKind::InvalidData,
                    format!(
                        "perf group read returned {} bytes for {} counters",
                        read, expected
                    ),
                )),
            }
        }
    }

    fn open_event(code: EventCode, leader: Option<&fs::File>) -> io::Result<fs::File> {
        let (type_, config) = super::decode(code);

        let mut attrs = perf_event_attr {
            size: mem::size_of::<perf_event_attr>() as u32,
            type_,
            config,
            read_format: PERF_FORMAT_GROUP as u64,
            ..perf_event_attr::default()
        };

        // Only the leader starts disabled; members follow the leader's state.
        attrs.set_disabled(if leader.is_none() { 1 } else { 0 });
        attrs.set_exclude_kernel(1);
        attrs.set_exclude_hv(1);

        // NOTE `pid = 0` with `cpu = -1` means "the calling thread, on any CPU".
        let pid = 0;
        let cpu = -1;
        let group_fd = leader.map_or(-1, |l| l.as_raw_fd());

        let fd = unsafe {
            perf_event_open(&mut attrs, pid, cpu, group_fd, PERF_FLAG_FD_CLOEXEC.into())
        };
        if fd < 0 {
            return Err(io::Error::last_os_error());
        }

        Ok(unsafe { fs::File::from_raw_fd(fd) })
    }

    fn check(ret: i32) -> io::Result<()> {
        if ret < 0 {
            Err(io::Error::last_os_error())
        } else {
            Ok(())
        }
    }

    pub(super) fn check_access() -> io::Result<()> {
        let paranoid = fs::read_to_string("/proc/sys/kernel/perf_event_paranoid").map_err(|e| {
            io::Error::new(
                e.kind(),
                format!("perf events are not available on this kernel: {}", e),
            )
        })?;

        let level: i32 = paranoid.trim().parse().unwrap_or(2);
        info!("PerfEventBackend::init: perf_event_paranoid={}", level);

        if level > 2 {
            really_warn!(
                "perf_event_paranoid is {}, counters will most likely be unavailable; \
                 lower it to 2 or below (see `man 2 perf_event_open`)",
                level
            );
        }
        Ok(())
    }
}

#[cfg(not(target_os = "linux"))]
mod hw {
    use std::io;

    use crate::backend::EventCode;

    pub(super) enum Group {}

    impl Group {
        pub(super) fn new(_: EventCode) -> io::Result<Self> {
            Err(unsupported())
        }

        pub(super) fn add(&mut self, _: EventCode) -> io::Result<()> {
            match *self {}
        }

        pub(super) fn enable(&self) -> io::Result<()> {
            match *self {}
        }

        pub(super) fn disable_and_read(&self, _: &mut [i64]) -> io::Result<()> {
            match *self {}
        }
    }

    fn unsupported() -> io::Error {
        io::Error::new(io::ErrorKind::Other, "only supported OS is Linux")
    }

    pub(super) fn check_access() -> io::Result<()> {
        // HACK mark `really_warn!` (and transitively `log` macros) as used.
        if false {
            really_warn!("unsupported");
        }
        Err(unsupported())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn presets_and_perf_names_agree() {
        assert_eq!(by_name("PAPI_TOT_INS"), by_name("instructions"));
        assert_eq!(by_name("PAPI_L1_TCM"), by_name("L1-dcache-load-misses"));
        assert_eq!(by_name("PAPI_BR_MSP"), by_name("branch-misses"));
        assert_ne!(by_name("PAPI_L1_DCM"), by_name("PAPI_L1_ICM"));
    }

    #[test]
    fn codes_carry_type_and_config() {
        assert_eq!(decode(by_name("cycles").unwrap()), (PERF_TYPE_HARDWARE, 0));
        assert_eq!(
            decode(by_name("PAPI_TLB_DM").unwrap()),
            (PERF_TYPE_HW_CACHE, 0x1_00_03)
        );
        assert_eq!(decode(by_name("r0420").unwrap()), (PERF_TYPE_RAW, 0x0420));
    }

    #[test]
    fn rejects_unknown_names() {
        assert_eq!(by_name("PAPI_NOT_A_COUNTER"), None);
        assert_eq!(by_name("r"), None);
        assert_eq!(by_name("rxyz"), None);
        assert_eq!(by_name("rffffffffffffffff"), None);
        assert_eq!(by_name(""), None);
    }

    #[test]
    fn event_set_lifecycle_is_checked_before_touching_hardware() {
        let backend = PerfEventBackend::new().with_num_counters(2);
        assert_eq!(backend.num_counters(), 2);

        let mut set = backend.create_event_set().unwrap();
        // An empty set never opens a perf group.
        set.start().unwrap();
        assert!(set.start().is_err());
        set.stop(&mut []).unwrap();
        assert!(set.stop(&mut []).is_err());
        assert!(set.remove(by_name("cycles").unwrap()).is_err());
    }

    #[test]
    fn failed_rebuild_keeps_the_event_set() {
        // No PMU has this type, so opening it fails on every platform.
        let bogus = |config| encode(0xff, config);
        let mut set = PerfEventSet {
            codes: vec![bogus(1), bogus(2), bogus(3)],
            group: None,
            running: false,
        };

        assert!(set.remove(bogus(2)).is_err());
        assert_eq!(set.codes, vec![bogus(1), bogus(2), bogus(3)]);

        let mut single = PerfEventSet {
            codes: vec![bogus(1)],
            group: None,
            running: false,
        };
        single.remove(bogus(1)).unwrap();
        assert!(single.codes.is_empty());
        assert!(single.group.is_none());
    }

    // Needs a kernel that lets unprivileged users open counters.
    #[cfg(target_os = "linux")]
    #[test]
    #[ignore]
    fn counts_instructions() {
        let backend = PerfEventBackend::new();
        backend.init().unwrap();

        let mut set = backend.create_event_set().unwrap();
        set.add(by_name("instructions").unwrap()).unwrap();
        set.add(by_name("cycles").unwrap()).unwrap();

        let mut values = [0i64; 2];
        set.start().unwrap();
        let mut sum = 0u64;
        for i in 0..10_000u64 {
            sum = sum.wrapping_add(i * i);
        }
        assert!(sum > 0);
        set.stop(&mut values).unwrap();

        assert!(values[0] > 0, "instructions: {}", values[0]);
        assert!(values[1] > 0, "cycles: {}", values[1]);
    }
}
