use std::io;
use std::path::{Path, PathBuf};

use rustc_hash::FxHashSet;

use crate::columnar::ColumnarFile;
use crate::error::Error;
use crate::file_header::FILE_EXTENSION;
use crate::group::ProcessGroup;

pub const DUMP_FILE_STEM: &str = "perf-dump";

/// `<dir>/perf-dump.pdump`. An empty `dir` means the working directory.
pub fn dump_file_path(dir: &Path) -> PathBuf {
    dir.join(format!("{}.{}", DUMP_FILE_STEM, FILE_EXTENSION))
}

/// One growing `[processes, T]` time series per counter, in a single file
/// shared by the whole group.
///
/// The file is created by the first [`ensure_ready`](Self::ensure_ready) and
/// re-opened by every later one. Each persisted step takes one slot on the
/// step axis, so after N persisted steps T == N.
pub struct TimeSeriesStore {
    dir: PathBuf,
    path: Option<PathBuf>,
    file: Option<ColumnarFile>,
    // Slot 0 of a file we just created has not been handed out yet.
    fresh: bool,
    slot: Option<u64>,
    written: FxHashSet<usize>,
}

impl TimeSeriesStore {
    pub fn new<P: Into<PathBuf>>(dir: P) -> TimeSeriesStore {
        TimeSeriesStore {
            dir: dir.into(),
            path: None,
            file: None,
            fresh: false,
            slot: None,
            written: FxHashSet::default(),
        }
    }

    /// The dump file, once it has been created.
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Length of the step axis while the file is open.
    pub fn step_extent(&self) -> Option<u64> {
        self.file.as_ref().map(|f| f.step_extent())
    }

    pub fn is_open(&self) -> bool {
        self.file.is_some()
    }

    /// Collective. Make sure the dump file is open with one dataset per name.
    ///
    /// Does nothing if the file is already open. The first call creates the
    /// file, replacing any file of the same name; later calls re-open the
    /// file created by the first one.
    pub fn ensure_ready<G>(
        &mut self,
        group: &G,
        event_names: &[String],
        process_count: usize,
        chunk_extent: u64,
    ) -> Result<(), Error>
    where
        G: ProcessGroup + ?Sized,
    {
        if self.file.is_some() {
            return Ok(());
        }

        let path = self
            .path
            .clone()
            .unwrap_or_else(|| dump_file_path(&self.dir));

        if process_count != group.size() {
            return Err(Error::storage(
                "prepare dump file",
                path,
                io::Error::new(
                    io::ErrorKind::InvalidInput,
                    format!(
                        "{} processes requested in a group of {}",
                        process_count,
                        group.size()
                    ),
                ),
            ));
        }

        let file = if self.path.is_none() {
            let file = ColumnarFile::create(group, &path, event_names, chunk_extent)?;
            self.fresh = true;
            self.path = Some(path);
            file
        } else {
            ColumnarFile::open(group, &path, event_names)?
        };

        debug!(
            "TimeSeriesStore: opened {} with T = {}",
            file.path().display(),
            file.step_extent()
        );

        self.file = Some(file);
        self.slot = None;
        self.written.clear();
        Ok(())
    }

    /// Collective. Write this process's `value` for `event_name` at the
    /// current persisted step.
    ///
    /// The first call of a step grows every dataset by one slot; writing the
    /// same dataset a second time starts the next step.
    pub fn append_step<G>(&mut self, group: &G, event_name: &str, value: i64) -> Result<(), Error>
    where
        G: ProcessGroup + ?Sized,
    {
        let file = self.file.as_mut().ok_or(Error::InvalidState {
            op: "append step",
            state: "the dump file is not open",
        })?;

        let dataset = file.dataset_index(event_name).ok_or_else(|| {
            Error::storage(
                "append step",
                file.path(),
                io::Error::new(
                    io::ErrorKind::NotFound,
                    format!("no dataset named {:?}", event_name),
                ),
            )
        })?;

        let slot = match self.slot {
            Some(slot) if !self.written.contains(&dataset) => slot,
            _ => {
                let slot = if self.fresh {
                    self.fresh = false;
                    0
                } else {
                    file.extend(group)?
                };
                self.written.clear();
                self.slot = Some(slot);
                slot
            }
        };

        file.write_cell(group, dataset, slot, value)?;
        self.written.insert(dataset);
        Ok(())
    }

    /// Collective. Close the file; data written so far is durable afterwards.
    pub fn release<G>(&mut self, group: &G) -> Result<(), Error>
    where
        G: ProcessGroup + ?Sized,
    {
        self.slot = None;
        self.written.clear();
        match self.file.take() {
            Some(file) => file.close(group),
            None => Ok(()),
        }
    }
}
