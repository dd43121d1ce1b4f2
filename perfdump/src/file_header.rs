//! All dump files start with a fixed 40 byte header followed by the dataset
//! names:
//!
//! ```text
//! 0   magic "PDMP"          4   format version (u32)
//! 8   number of processes   16  chunk extent
//! 24  step extent T         32  number of datasets
//! 40  names, each as (u32 length, utf-8 bytes), zero-padded to 8 bytes
//! ```
//!
//! All integers are little-endian and the counts are u64. The data section
//! follows. Chunk `k` covers steps `[k * chunk, (k + 1) * chunk)` and stores,
//! for every dataset in order, a `[processes, chunk]` block of i64.

use std::convert::TryInto;
use std::io::{self, Read};

pub const FILE_MAGIC: &[u8; 4] = b"PDMP";
pub const CURRENT_FILE_FORMAT_VERSION: u32 = 1;
pub const FILE_EXTENSION: &str = "pdump";

/// Where T lives, so that it can be updated without rewriting the header.
pub const STEP_EXTENT_OFFSET: u64 = 24;

const FIXED_HEADER_SIZE: usize = 40;
const CELL_SIZE: u64 = std::mem::size_of::<i64>() as u64;

// Sanity limits for reading headers of files we did not write.
const MAX_DATASETS: u64 = 1 << 16;
const MAX_NAME_LEN: u32 = 1 << 12;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FileHeader {
    pub num_processes: u64,
    pub chunk_extent: u64,
    pub step_extent: u64,
    pub datasets: Vec<String>,
}

impl FileHeader {
    pub fn data_start(&self) -> u64 {
        let names: usize = self.datasets.iter().map(|n| 4 + n.len()).sum();
        align8((FIXED_HEADER_SIZE + names) as u64)
    }

    /// Size of one chunk of the data section, all datasets included, or
    /// `None` if it does not fit in a `u64`.
    pub fn chunk_bytes(&self) -> Option<u64> {
        (self.datasets.len() as u64).checked_mul(self.block_bytes()?)
    }

    /// Size of the run of one dataset inside a chunk.
    fn block_bytes(&self) -> Option<u64> {
        self.num_processes
            .checked_mul(self.chunk_extent)?
            .checked_mul(CELL_SIZE)
    }

    pub fn num_chunks(&self) -> u64 {
        self.step_extent / self.chunk_extent + u64::from(self.step_extent % self.chunk_extent != 0)
    }

    /// The length a file with this header must have.
    ///
    /// Fails for a layout that cannot be addressed with 64-bit offsets. Every
    /// cell offset of a header that passes is below this length.
    pub fn file_len(&self) -> io::Result<u64> {
        if self.chunk_extent == 0 {
            return Err(invalid("chunk extent must be at least 1".to_string()));
        }

        self.chunk_bytes()
            .and_then(|chunk| chunk.checked_mul(self.num_chunks()))
            .and_then(|data| data.checked_add(self.data_start()))
            .ok_or_else(|| {
                invalid(format!(
                    "{} steps of {} datasets over {} processes with chunk extent {} \
                     do not fit in a file",
                    self.step_extent,
                    self.datasets.len(),
                    self.num_processes,
                    self.chunk_extent
                ))
            })
    }

    /// Byte offset of cell `[rank, step]` of dataset number `dataset`.
    ///
    /// `file_len` must have succeeded for this header and `step` must be
    /// below `step_extent`.
    pub fn cell_offset(&self, dataset: usize, rank: u64, step: u64) -> u64 {
        debug_assert!((dataset as u64) < self.datasets.len() as u64);
        debug_assert!(rank < self.num_processes);
        debug_assert!(step < self.step_extent);

        let chunk = step / self.chunk_extent;
        let block = self.num_processes * self.chunk_extent * CELL_SIZE;

        self.data_start()
            + chunk * block * self.datasets.len() as u64
            + dataset as u64 * block
            + (rank * self.chunk_extent + step % self.chunk_extent) * CELL_SIZE
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(self.data_start() as usize);

        bytes.extend_from_slice(FILE_MAGIC);
        bytes.extend_from_slice(&CURRENT_FILE_FORMAT_VERSION.to_le_bytes());
        bytes.extend_from_slice(&self.num_processes.to_le_bytes());
        bytes.extend_from_slice(&self.chunk_extent.to_le_bytes());
        bytes.extend_from_slice(&self.step_extent.to_le_bytes());
        bytes.extend_from_slice(&(self.datasets.len() as u64).to_le_bytes());

        for name in &self.datasets {
            bytes.extend_from_slice(&(name.len() as u32).to_le_bytes());
            bytes.extend_from_slice(name.as_bytes());
        }

        bytes.resize(self.data_start() as usize, 0);
        bytes
    }

    pub fn read<R: Read>(mut reader: R) -> io::Result<FileHeader> {
        let mut fixed = [0u8; FIXED_HEADER_SIZE];
        reader.read_exact(&mut fixed)?;

        if &fixed[0..4] != FILE_MAGIC {
            return Err(invalid(format!(
                "expected file magic `{:?}` but found `{:?}`",
                FILE_MAGIC,
                &fixed[0..4]
            )));
        }

        let version = u32::from_le_bytes(fixed[4..8].try_into().unwrap());
        if version != CURRENT_FILE_FORMAT_VERSION {
            return Err(invalid(format!(
                "file format version {} is not supported, expected {}",
                version, CURRENT_FILE_FORMAT_VERSION
            )));
        }

        let field = |at: usize| u64::from_le_bytes(fixed[at..at + 8].try_into().unwrap());
        let num_processes = field(8);
        let chunk_extent = field(16);
        let step_extent = field(24);
        let dataset_count = field(32);

        if num_processes == 0 || chunk_extent == 0 {
            return Err(invalid(format!(
                "invalid layout: {} processes, chunk extent {}",
                num_processes, chunk_extent
            )));
        }

        if dataset_count > MAX_DATASETS {
            return Err(invalid(format!("implausible dataset count {}", dataset_count)));
        }

        let mut datasets = Vec::with_capacity(dataset_count as usize);
        for _ in 0..dataset_count {
            let mut len = [0u8; 4];
            reader.read_exact(&mut len)?;
            let len = u32::from_le_bytes(len);
            if len > MAX_NAME_LEN {
                return Err(invalid(format!("implausible dataset name length {}", len)));
            }

            let mut name = vec![0u8; len as usize];
            reader.read_exact(&mut name)?;
            let name = String::from_utf8(name)
                .map_err(|_| invalid("dataset name is not valid utf-8".to_string()))?;
            datasets.push(name);
        }

        let header = FileHeader {
            num_processes,
            chunk_extent,
            step_extent,
            datasets,
        };
        header.file_len()?;
        Ok(header)
    }
}

fn align8(n: u64) -> u64 {
    (n + 7) & !7
}

fn invalid(msg: String) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidData, msg)
}
