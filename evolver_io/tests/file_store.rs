use std::fs;

use evolver_io::{FileLogStore, IoError};
use evolver_traits::{Channel, LogStore};
use rstest::rstest;

fn rec(fields: &[&str]) -> Vec<String> {
    fields.iter().map(|s| s.to_string()).collect()
}

#[test]
fn streams_are_created_with_headers() {
    let dir = tempfile::tempdir().unwrap();
    let store = FileLogStore::new(dir.path());
    assert_eq!(store.create_streams(3).unwrap(), Channel::ALL.len());
    assert_eq!(store.create_streams(3).unwrap(), 0);

    let path = dir.path().join("OD").join("vial3_OD.txt");
    assert_eq!(store.path_for(3, Channel::Od), path);
    assert_eq!(fs::read_to_string(path).unwrap(), "time,od\n");
    assert_eq!(store.len(3, Channel::StepLog).unwrap(), 0);
    assert!(store.tail(3, Channel::StepLog, 5).unwrap().is_empty());
}

#[test]
fn missing_streams_read_as_empty() {
    let dir = tempfile::tempdir().unwrap();
    let store = FileLogStore::new(dir.path());
    assert!(store.tail(0, Channel::Od, 10).unwrap().is_empty());
    assert_eq!(store.len(0, Channel::Od).unwrap(), 0);
    assert_eq!(store.last(0, Channel::Od).unwrap(), None);
}

#[test]
fn appended_records_come_back_in_order() {
    let dir = tempfile::tempdir().unwrap();
    let mut store = FileLogStore::new(dir.path());
    store
        .append(0, Channel::StepLog, &rec(&["0", "0", "0", "0", ""]))
        .unwrap();
    store
        .append(0, Channel::StepLog, &rec(&["7.5", "7.5", "25", "24.8", "INCREASE: high growth rate | "]))
        .unwrap();

    let all = store.tail(0, Channel::StepLog, 10).unwrap();
    assert_eq!(all.len(), 2);
    assert_eq!(all[0], rec(&["0", "0", "0", "0", ""]));
    assert_eq!(all[1][4], "INCREASE: high growth rate | ");
    assert_eq!(store.len(0, Channel::StepLog).unwrap(), 2);
}

#[rstest]
#[case(1)]
#[case(6)]
#[case(500)]
#[case(5000)]
fn tail_spans_read_blocks(#[case] n: usize) {
    let dir = tempfile::tempdir().unwrap();
    let mut store = FileLogStore::new(dir.path());
    for i in 0..3000 {
        let t = f64::from(i) / 60.0;
        store
            .append(1, Channel::Od, &[t.to_string(), "0.123456789".to_string()])
            .unwrap();
    }
    let tail = store.tail(1, Channel::Od, n).unwrap();
    assert_eq!(tail.len(), n.min(3000));
    assert_eq!(tail.last().unwrap()[0], (2999.0f64 / 60.0).to_string());
    if n >= 3000 {
        assert_eq!(tail[0][0], "0");
    }
    assert_eq!(store.len(1, Channel::Od).unwrap(), 3000);
}

#[test]
fn headerless_files_written_elsewhere_are_read() {
    let dir = tempfile::tempdir().unwrap();
    let store = FileLogStore::new(dir.path());
    let path = store.path_for(2, Channel::Od);
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    fs::write(&path, "0.1,0.5\r\n0.2,0.6\n\n").unwrap();

    let tail = store.tail(2, Channel::Od, 5).unwrap();
    assert_eq!(tail, vec![rec(&["0.1", "0.5"]), rec(&["0.2", "0.6"])]);
    assert_eq!(store.len(2, Channel::Od).unwrap(), 2);
}

#[test]
fn corrupt_rows_are_parse_errors() {
    let dir = tempfile::tempdir().unwrap();
    let store = FileLogStore::new(dir.path());
    let path = store.path_for(0, Channel::Od);
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    fs::write(&path, "time,od\n0.1,0.5\noops,0.6\n").unwrap();

    let err = store.read_tail(0, Channel::Od, 1).unwrap_err();
    assert!(matches!(err, IoError::Parse { .. }));
    assert!(err.to_string().contains("vial0_OD.txt"));
}

#[test]
fn line_breaks_inside_fields_are_refused() {
    let dir = tempfile::tempdir().unwrap();
    let mut store = FileLogStore::new(dir.path());
    assert!(store.append(0, Channel::StepLog, &rec(&["1", "a\nb"])).is_err());
    assert_eq!(store.len(0, Channel::StepLog).unwrap(), 0);
}
