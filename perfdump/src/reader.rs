use std::convert::TryInto;
use std::fs::File;
use std::io;
use std::path::{Path, PathBuf};

use memmap2::Mmap;
use serde::Serialize;

use crate::error::Error;
use crate::file_header::FileHeader;

/// Read-only view of a dump file, for post-processing.
pub struct DumpFile {
    mmap: Mmap,
    header: FileHeader,
    path: PathBuf,
}

/// A whole dataset, one row per process.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct DatasetDump {
    pub name: String,
    pub num_processes: usize,
    pub num_steps: u64,
    pub values: Vec<Vec<i64>>,
}

impl DumpFile {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<DumpFile, Error> {
        let path = path.as_ref();
        let storage = |source| Error::storage("read dump file", path, source);

        let file = File::open(path).map_err(storage)?;
        let mmap = unsafe { Mmap::map(&file) }.map_err(storage)?;
        let header = FileHeader::read(&mmap[..]).map_err(storage)?;

        let file_len = header.file_len().map_err(storage)?;
        if (mmap.len() as u64) < file_len {
            return Err(storage(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                format!(
                    "file is {} bytes long, its header needs {}",
                    mmap.len(),
                    file_len
                ),
            )));
        }

        Ok(DumpFile {
            mmap,
            header,
            path: path.to_path_buf(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn datasets(&self) -> &[String] {
        &self.header.datasets
    }

    pub fn num_processes(&self) -> usize {
        self.header.num_processes as usize
    }

    pub fn num_steps(&self) -> u64 {
        self.header.step_extent
    }

    pub fn chunk_extent(&self) -> u64 {
        self.header.chunk_extent
    }

    fn dataset_index(&self, name: &str) -> Option<usize> {
        self.header.datasets.iter().position(|n| n == name)
    }

    fn cell(&self, dataset: usize, rank: usize, step: u64) -> i64 {
        let at = self.header.cell_offset(dataset, rank as u64, step) as usize;
        i64::from_le_bytes(self.mmap[at..at + 8].try_into().unwrap())
    }

    /// Cell `[rank, step]` of `dataset`, `None` if out of range.
    pub fn get(&self, dataset: &str, rank: usize, step: u64) -> Option<i64> {
        let idx = self.dataset_index(dataset)?;
        if rank >= self.num_processes() || step >= self.num_steps() {
            return None;
        }
        Some(self.cell(idx, rank, step))
    }

    /// Everything one process recorded for `dataset`, in step order.
    pub fn row(&self, dataset: &str, rank: usize) -> Option<Vec<i64>> {
        let idx = self.dataset_index(dataset)?;
        if rank >= self.num_processes() {
            return None;
        }
        Some(
            (0..self.num_steps())
                .map(|step| self.cell(idx, rank, step))
                .collect(),
        )
    }

    /// What every process recorded for `dataset` at one persisted step.
    pub fn column(&self, dataset: &str, step: u64) -> Option<Vec<i64>> {
        let idx = self.dataset_index(dataset)?;
        if step >= self.num_steps() {
            return None;
        }
        Some(
            (0..self.num_processes())
                .map(|rank| self.cell(idx, rank, step))
                .collect(),
        )
    }

    pub fn dataset(&self, name: &str) -> Option<DatasetDump> {
        let values = (0..self.num_processes())
            .map(|rank| self.row(name, rank))
            .collect::<Option<Vec<_>>>()?;

        Some(DatasetDump {
            name: name.to_string(),
            num_processes: self.num_processes(),
            num_steps: self.num_steps(),
            values,
        })
    }
}
