//! Run configuration, read once from the environment at startup.
//!
//! Variable             | Meaning                                        | Default
//! -------------------- | ---------------------------------------------- | -------
//! `PDUMP_EVENTS`       | counter names, separated by `,` and/or spaces  | `PAPI_L1_TCM`
//! `PDUMP_DUMP_DIR`     | directory of the dump file                     | working directory
//! `PDUMP_DUMP_STEPS`   | steps to persist (first step is 0)             | every step
//! `PDUMP_TIME_CHUNK`   | chunk extent of the step axis, 1 to 2^32       | 32
//! `PDUMP_MAX_COUNTERS` | simultaneous counters the platform supports    | backend's value

use std::env;
use std::path::PathBuf;
use std::str::FromStr;

use crate::error::Error;
use crate::step_gate::DumpSelector;

pub const EVENTS_VAR: &str = "PDUMP_EVENTS";
pub const DUMP_DIR_VAR: &str = "PDUMP_DUMP_DIR";
pub const DUMP_STEPS_VAR: &str = "PDUMP_DUMP_STEPS";
pub const TIME_CHUNK_VAR: &str = "PDUMP_TIME_CHUNK";
pub const MAX_COUNTERS_VAR: &str = "PDUMP_MAX_COUNTERS";

pub const DEFAULT_EVENTS: &str = "PAPI_L1_TCM";
pub const DEFAULT_TIME_CHUNK: u64 = 32;
/// Larger chunk extents are refused: the first chunk is allocated as soon as
/// the dump file is created.
pub const MAX_TIME_CHUNK: u64 = 1 << 32;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Config {
    /// Counters to monitor, in column order.
    pub events: Vec<String>,
    pub dump_dir: PathBuf,
    pub dump_steps: DumpSelector,
    pub time_chunk: u64,
    /// Overrides the counter backend's own capacity.
    pub max_counters: Option<usize>,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            events: split_list(DEFAULT_EVENTS).map(String::from).collect(),
            dump_dir: PathBuf::new(),
            dump_steps: DumpSelector::all(),
            time_chunk: DEFAULT_TIME_CHUNK,
            max_counters: None,
        }
    }
}

impl Config {
    pub fn from_env() -> Result<Config, Error> {
        Config::from_lookup(|var| env::var(var).ok())
    }

    /// Like [`from_env`](Self::from_env) but with variables coming from
    /// `lookup`.
    pub fn from_lookup<F>(lookup: F) -> Result<Config, Error>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Config::default();

        // Set but empty means no counters at all.
        if let Some(events) = lookup(EVENTS_VAR) {
            config.events = split_list(&events).map(String::from).collect();
        }

        if let Some(dir) = lookup(DUMP_DIR_VAR) {
            config.dump_dir = PathBuf::from(dir);
        }

        if let Some(steps) = lookup(DUMP_STEPS_VAR) {
            config.dump_steps = DumpSelector::only(
                split_list(&steps)
                    .map(|step| parse_int::<u64>(DUMP_STEPS_VAR, step))
                    .collect::<Result<Vec<_>, _>>()?,
            );
        }

        if let Some(chunk) = lookup(TIME_CHUNK_VAR) {
            let chunk = parse_int::<u64>(TIME_CHUNK_VAR, &chunk)?;
            let reason = if chunk == 0 {
                Some("must be at least 1".to_string())
            } else if chunk > MAX_TIME_CHUNK {
                Some(format!("must be at most {}", MAX_TIME_CHUNK))
            } else {
                None
            };
            if let Some(reason) = reason {
                return Err(Error::Config {
                    var: TIME_CHUNK_VAR,
                    value: chunk.to_string(),
                    reason,
                });
            }
            config.time_chunk = chunk;
        }

        if let Some(max) = lookup(MAX_COUNTERS_VAR) {
            config.max_counters = Some(parse_int::<usize>(MAX_COUNTERS_VAR, &max)?);
        }

        Ok(config)
    }
}

fn split_list(list: &str) -> impl Iterator<Item = &str> {
    list.split(|c: char| c == ',' || c.is_whitespace())
        .filter(|item| !item.is_empty())
}

fn parse_int<T>(var: &'static str, value: &str) -> Result<T, Error>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    value.trim().parse::<T>().map_err(|e| Error::Config {
        var,
        value: value.to_string(),
        reason: e.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config(vars: &[(&str, &str)]) -> Result<Config, Error> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_lookup(|var| vars.get(var).cloned())
    }

    #[test]
    fn defaults() {
        let config = config(&[]).unwrap();
        assert_eq!(config.events, vec!["PAPI_L1_TCM"]);
        assert_eq!(config.dump_dir, PathBuf::new());
        assert!(config.dump_steps.is_all());
        assert_eq!(config.time_chunk, 32);
        assert_eq!(config.max_counters, None);
        assert_eq!(config, Config::default());
    }

    #[test]
    fn lists_split_on_commas_and_spaces() {
        let config = config(&[
            (EVENTS_VAR, "PAPI_TOT_CYC, PAPI_TOT_INS,,PAPI_L1_DCM  r01c4"),
            (DUMP_STEPS_VAR, " 0,2 , 10"),
            (DUMP_DIR_VAR, "/scratch/run"),
            (TIME_CHUNK_VAR, "8"),
            (MAX_COUNTERS_VAR, "6"),
        ])
        .unwrap();

        assert_eq!(
            config.events,
            vec!["PAPI_TOT_CYC", "PAPI_TOT_INS", "PAPI_L1_DCM", "r01c4"]
        );
        assert_eq!(config.dump_steps, DumpSelector::only(vec![0, 2, 10]));
        assert_eq!(config.dump_dir, PathBuf::from("/scratch/run"));
        assert_eq!(config.time_chunk, 8);
        assert_eq!(config.max_counters, Some(6));
    }

    #[test]
    fn empty_event_list_means_no_counters() {
        assert!(config(&[(EVENTS_VAR, " ")]).unwrap().events.is_empty());
    }

    #[test]
    fn malformed_integers_are_errors() {
        for (var, value) in [
            (DUMP_STEPS_VAR, "1,two,3"),
            (DUMP_STEPS_VAR, "-1"),
            (DUMP_STEPS_VAR, "4x"),
            (TIME_CHUNK_VAR, "0"),
            (TIME_CHUNK_VAR, "lots"),
            (MAX_COUNTERS_VAR, "-2"),
        ]
        .iter()
        {
            match config(&[(*var, *value)]) {
                Err(Error::Config { var: v, .. }) => assert_eq!(v, *var),
                other => panic!("{}={:?} gave {:?}", var, value, other),
            }
        }
    }

    #[test]
    fn oversized_chunk_extent_is_rejected() {
        match config(&[(TIME_CHUNK_VAR, "2305843009213693952")]) {
            Err(Error::Config { var, value, reason }) => {
                assert_eq!(var, TIME_CHUNK_VAR);
                assert_eq!(value, "2305843009213693952");
                assert!(reason.contains("at most"), "{}", reason);
            }
            other => panic!("unexpected result: {:?}", other),
        }

        let largest = MAX_TIME_CHUNK.to_string();
        assert_eq!(
            config(&[(TIME_CHUNK_VAR, largest.as_str())]).unwrap().time_chunk,
            MAX_TIME_CHUNK
        );
        assert!(config(&[(TIME_CHUNK_VAR, "4294967297")]).is_err());
    }
}
