use perfdump::columnar::ColumnarFile;
use perfdump::testing_common::run_group;
use perfdump::{DumpFile, Error, ProcessGroup, SingleProcess, TimeSeriesStore};

fn names(names: &[&str]) -> Vec<String> {
    names.iter().map(|s| s.to_string()).collect()
}

#[test]
fn ensure_ready_keeps_existing_data() {
    let dir = tempfile::tempdir().unwrap();
    let group = SingleProcess;
    let events = names(&["C1", "C2"]);
    let mut store = TimeSeriesStore::new(dir.path());

    store.ensure_ready(&group, &events, 1, 4).unwrap();
    store.append_step(&group, "C1", 11).unwrap();
    store.append_step(&group, "C2", 12).unwrap();

    store.ensure_ready(&group, &events, 1, 4).unwrap();
    assert_eq!(store.step_extent(), Some(1));
    store.release(&group).unwrap();

    // Re-opening must neither truncate nor reset T.
    store.ensure_ready(&group, &events, 1, 4).unwrap();
    assert_eq!(store.step_extent(), Some(1));
    store.append_step(&group, "C1", 21).unwrap();
    store.append_step(&group, "C2", 22).unwrap();
    assert_eq!(store.step_extent(), Some(2));
    store.release(&group).unwrap();

    let dump = DumpFile::open(store.path().unwrap()).unwrap();
    assert_eq!(dump.row("C1", 0).unwrap(), vec![11, 21]);
    assert_eq!(dump.row("C2", 0).unwrap(), vec![12, 22]);
}

#[test]
fn values_survive_chunk_boundaries() {
    let dir = tempfile::tempdir().unwrap();
    let events = names(&["C1", "C2"]);

    let path = run_group(2, |group| {
        let mut store = TimeSeriesStore::new(dir.path());
        for step in 0..5i64 {
            let value = 100 * group.rank() as i64 + step;
            store
                .ensure_ready(&group, &events, group.size(), 2)
                .unwrap();
            store.append_step(&group, "C1", value).unwrap();
            store.append_step(&group, "C2", -value).unwrap();
            store.release(&group).unwrap();
        }
        store.path().unwrap().to_path_buf()
    })
    .remove(0);

    let dump = DumpFile::open(&path).unwrap();
    assert_eq!(dump.num_steps(), 5);
    assert_eq!(dump.row("C1", 0).unwrap(), vec![0, 1, 2, 3, 4]);
    assert_eq!(dump.row("C1", 1).unwrap(), vec![100, 101, 102, 103, 104]);
    assert_eq!(dump.row("C2", 1).unwrap(), vec![-100, -101, -102, -103, -104]);
}

#[test]
fn reopening_with_another_process_count_fails() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("perf-dump.pdump");
    let events = names(&["C1"]);

    run_group(2, |group| {
        ColumnarFile::create(&group, &path, &events, 4)
            .unwrap()
            .close(&group)
            .unwrap();
    });

    match ColumnarFile::open(&SingleProcess, &path, &events) {
        Err(Error::Storage { source, .. }) => {
            assert!(source.to_string().contains("2 processes"), "{}", source)
        }
        other => panic!("unexpected result: {:?}", other.map(|_| ())),
    }
}

#[test]
fn a_failure_on_one_process_fails_everywhere() {
    let dir = tempfile::tempdir().unwrap();
    let events = names(&["C1"]);

    let errors = run_group(3, |group| {
        // Only rank 0 creates the file, and its directory does not exist.
        let dump_dir = if group.rank() == 0 {
            dir.path().join("missing")
        } else {
            dir.path().to_path_buf()
        };
        let mut store = TimeSeriesStore::new(dump_dir);
        store
            .ensure_ready(&group, &events, group.size(), 4)
            .unwrap_err()
    });

    for (rank, err) in errors.iter().enumerate() {
        match err {
            Error::Storage { op, source, .. } => {
                assert_eq!(*op, "create dump file");
                assert_eq!(
                    source.to_string().contains("another process"),
                    rank != 0,
                    "rank {}: {}",
                    rank,
                    source
                );
            }
            other => panic!("rank {}: unexpected error {}", rank, other),
        }
    }
}
