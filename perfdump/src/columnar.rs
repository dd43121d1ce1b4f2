use std::fs::{File, OpenOptions};
use std::io::{self, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use rustc_hash::FxHashMap;

use crate::error::{peer_failure, Error};
use crate::file_header::{FileHeader, STEP_EXTENT_OFFSET};
use crate::group::ProcessGroup;

/// A dump file shared by every process of a group.
///
/// Every method taking a group is collective: all processes must call it, in
/// the same order, with the same arguments (apart from the values they
/// write). Each process holds its own handle and only ever writes its own
/// row; rank 0 alone changes the header and the file length.
#[derive(Debug)]
pub struct ColumnarFile {
    file: File,
    path: PathBuf,
    header: FileHeader,
    rank: u64,
    index: FxHashMap<String, usize>,
}

/// Turn a local outcome into the group's outcome.
fn agree<G, T>(group: &G, op: &'static str, path: &Path, local: io::Result<T>) -> Result<T, Error>
where
    G: ProcessGroup + ?Sized,
{
    let everyone_ok = group.all_ok(local.is_ok());
    match local {
        Err(source) => Err(Error::storage(op, path, source)),
        Ok(_) if !everyone_ok => Err(Error::storage(op, path, peer_failure())),
        Ok(value) => Ok(value),
    }
}

fn open_rw(path: &Path) -> io::Result<File> {
    OpenOptions::new().read(true).write(true).open(path)
}

impl ColumnarFile {
    /// Create (or truncate) the file at `path` with one `[P, 1]` dataset per
    /// name, P being the size of `group`.
    pub fn create<G>(
        group: &G,
        path: &Path,
        names: &[String],
        chunk_extent: u64,
    ) -> Result<ColumnarFile, Error>
    where
        G: ProcessGroup + ?Sized,
    {
        let header = FileHeader {
            num_processes: group.size() as u64,
            chunk_extent,
            step_extent: 1,
            datasets: names.to_vec(),
        };

        let created = if group.rank() == 0 {
            let local = if chunk_extent == 0 {
                Err(io::Error::new(
                    io::ErrorKind::InvalidInput,
                    "chunk extent must be at least 1",
                ))
            } else {
                create_file(path, &header).map(Some)
            };
            agree(group, "create dump file", path, local)?
        } else {
            agree(group, "create dump file", path, Ok(None))?
        };

        let file = match created {
            Some(file) => agree(group, "open dump file", path, Ok(file))?,
            None => agree(group, "open dump file", path, open_rw(path))?,
        };

        Ok(ColumnarFile::new(file, path, header, group.rank()))
    }

    /// Open an existing file. Its datasets must be exactly `names` and it
    /// must have been written by a group of the same size.
    pub fn open<G>(group: &G, path: &Path, names: &[String]) -> Result<ColumnarFile, Error>
    where
        G: ProcessGroup + ?Sized,
    {
        let local = open_rw(path).and_then(|mut file| {
            let header = FileHeader::read(&mut file)?;

            if header.num_processes != group.size() as u64 {
                return Err(io::Error::new(
                    io::ErrorKind::InvalidData,
                    format!(
                        "file was written by {} processes, this group has {}",
                        header.num_processes,
                        group.size()
                    ),
                ));
            }

            if header.datasets != names {
                return Err(io::Error::new(
                    io::ErrorKind::InvalidData,
                    format!(
                        "file holds datasets {:?}, expected {:?}",
                        header.datasets, names
                    ),
                ));
            }

            Ok((file, header))
        });

        let (file, header) = agree(group, "open dump file", path, local)?;
        Ok(ColumnarFile::new(file, path, header, group.rank()))
    }

    fn new(file: File, path: &Path, header: FileHeader, rank: usize) -> ColumnarFile {
        let index = header
            .datasets
            .iter()
            .enumerate()
            .map(|(idx, name)| (name.clone(), idx))
            .collect();

        ColumnarFile {
            file,
            path: path.to_path_buf(),
            header,
            rank: rank as u64,
            index,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Current length T of the step axis.
    pub fn step_extent(&self) -> u64 {
        self.header.step_extent
    }

    pub fn chunk_extent(&self) -> u64 {
        self.header.chunk_extent
    }

    pub fn num_processes(&self) -> u64 {
        self.header.num_processes
    }

    pub fn datasets(&self) -> &[String] {
        &self.header.datasets
    }

    pub fn dataset_index(&self, name: &str) -> Option<usize> {
        self.index.get(name).copied()
    }

    /// Grow the step axis of every dataset by one and return the index of the
    /// new slot.
    pub fn extend<G>(&mut self, group: &G) -> Result<u64, Error>
    where
        G: ProcessGroup + ?Sized,
    {
        let grown = FileHeader {
            step_extent: self.header.step_extent.wrapping_add(1),
            ..self.header.clone()
        };

        // Every process checks the new layout, so none of them goes on with
        // offsets rank 0 refused to allocate.
        let local = if grown.step_extent == 0 {
            Err(io::Error::new(io::ErrorKind::InvalidInput, "step axis is full"))
        } else {
            grown.file_len()
        };
        let local = match local {
            Ok(len) if group.rank() == 0 => grow_file(&mut self.file, &self.header, &grown, len),
            other => other.map(|_| ()),
        };

        // Nobody writes into the new slot before rank 0 has allocated it.
        agree(group, "extend datasets", &self.path, local)?;
        self.header = grown;
        Ok(self.header.step_extent - 1)
    }

    /// Write this process's cell `[rank, step]` of dataset number `dataset`.
    pub fn write_cell<G>(
        &mut self,
        group: &G,
        dataset: usize,
        step: u64,
        value: i64,
    ) -> Result<(), Error>
    where
        G: ProcessGroup + ?Sized,
    {
        let local = if dataset >= self.header.datasets.len() || step >= self.header.step_extent {
            Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!(
                    "cell [{}, {}] of dataset {} is outside of the {} datasets of extent {}",
                    self.rank,
                    step,
                    dataset,
                    self.header.datasets.len(),
                    self.header.step_extent
                ),
            ))
        } else {
            let offset = self.header.cell_offset(dataset, self.rank, step);
            write_at(&mut self.file, offset, &value.to_le_bytes())
        };

        agree(group, "write sample", &self.path, local)
    }

    /// Flush this process's writes and wait for the rest of the group.
    pub fn close<G>(self, group: &G) -> Result<(), Error>
    where
        G: ProcessGroup + ?Sized,
    {
        let local = self.file.sync_data();
        agree(group, "close dump file", &self.path, local)
    }
}

fn create_file(path: &Path, header: &FileHeader) -> io::Result<File> {
    let len = header.file_len()?;
    let mut file = OpenOptions::new()
        .read(true)
        .write(true)
        .create(true)
        .truncate(true)
        .open(path)?;

    file.write_all(&header.encode())?;
    file.set_len(len)?;
    file.sync_data()?;
    Ok(file)
}

fn grow_file(file: &mut File, old: &FileHeader, new: &FileHeader, len: u64) -> io::Result<()> {
    if new.num_chunks() > old.num_chunks() {
        file.set_len(len)?;
    }
    write_at(file, STEP_EXTENT_OFFSET, &new.step_extent.to_le_bytes())?;
    file.sync_data()
}

fn write_at(file: &mut File, offset: u64, bytes: &[u8]) -> io::Result<()> {
    file.seek(SeekFrom::Start(offset))?;
    file.write_all(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::group::SingleProcess;
    use crate::reader::DumpFile;
    use crate::testing_common::run_group;

    fn names(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn file_grows_one_chunk_at_a_time() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("grow.pdump");
        let group = SingleProcess;

        let mut file = ColumnarFile::create(&group, &path, &names(&["C1"]), 2).unwrap();
        let one_chunk = std::fs::metadata(&path).unwrap().len();

        assert_eq!(file.extend(&group).unwrap(), 1);
        assert_eq!(std::fs::metadata(&path).unwrap().len(), one_chunk);

        assert_eq!(file.extend(&group).unwrap(), 2);
        assert_eq!(std::fs::metadata(&path).unwrap().len(), one_chunk + 16);
        assert_eq!(file.step_extent(), 3);
        file.close(&group).unwrap();
    }

    #[test]
    fn cells_land_where_the_reader_looks() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cells.pdump");
        let group = SingleProcess;

        let mut file = ColumnarFile::create(&group, &path, &names(&["C1", "C2"]), 2).unwrap();
        file.write_cell(&group, 1, 0, -5).unwrap();
        for step in 1..5 {
            let slot = file.extend(&group).unwrap();
            file.write_cell(&group, 0, slot, step as i64 * 10).unwrap();
        }
        assert!(file.write_cell(&group, 0, 5, 0).is_err());
        assert!(file.write_cell(&group, 2, 0, 0).is_err());
        file.close(&group).unwrap();

        let dump = DumpFile::open(&path).unwrap();
        assert_eq!(dump.num_steps(), 5);
        assert_eq!(dump.row("C1", 0).unwrap(), vec![0, 10, 20, 30, 40]);
        assert_eq!(dump.row("C2", 0).unwrap(), vec![-5, 0, 0, 0, 0]);
    }

    #[test]
    fn open_validates_layout() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("layout.pdump");
        let group = SingleProcess;

        ColumnarFile::create(&group, &path, &names(&["C1"]), 4)
            .unwrap()
            .close(&group)
            .unwrap();

        let reopened = ColumnarFile::open(&group, &path, &names(&["C1"])).unwrap();
        assert_eq!(reopened.step_extent(), 1);
        assert_eq!(reopened.chunk_extent(), 4);
        assert_eq!(reopened.dataset_index("C1"), Some(0));

        match ColumnarFile::open(&group, &path, &names(&["C1", "C2"])) {
            Err(Error::Storage { op, .. }) => assert_eq!(op, "open dump file"),
            other => panic!("unexpected result: {:?}", other.map(|_| ())),
        }

        assert!(ColumnarFile::open(&group, &dir.path().join("missing"), &names(&["C1"])).is_err());
    }

    #[test]
    fn unaddressable_layouts_are_storage_errors() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("huge.pdump");

        let results = run_group(2, |group| {
            ColumnarFile::create(&group, &path, &names(&["C1", "C2"]), 1 << 61).map(|_| ())
        });
        for result in results {
            match result {
                Err(Error::Storage { op, .. }) => assert_eq!(op, "create dump file"),
                other => panic!("unexpected result: {:?}", other),
            }
        }

        assert!(!path.exists());
    }
}
