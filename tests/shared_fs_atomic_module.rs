use roundtable::shared::fs_atomic::{atomic_write_file, atomic_write_json, canonicalize_existing};
use std::fs;
use tempfile::tempdir;

#[test]
fn atomic_write_creates_parents_and_replaces_content() {
    let dir = tempdir().expect("tempdir");
    let path = dir.path().join("nested/deep/state.json");

    atomic_write_file(&path, b"first").expect("first write");
    assert_eq!(fs::read(&path).expect("read first"), b"first");

    atomic_write_file(&path, b"second").expect("second write");
    assert_eq!(fs::read(&path).expect("read second"), b"second");

    let entries: Vec<_> = fs::read_dir(path.parent().expect("parent"))
        .expect("read dir")
        .map(|entry| entry.expect("entry").file_name())
        .collect();
    assert_eq!(entries.len(), 1, "no temp files left behind: {entries:?}");
}

#[test]
fn atomic_write_json_is_bytewise_deterministic() {
    let dir = tempdir().expect("tempdir");
    let first = dir.path().join("a.json");
    let second = dir.path().join("b.json");
    let value = serde_json::json!({"zeta": 1, "alpha": [1, 2, 3], "nested": {"k": "v"}});

    atomic_write_json(&first, &value).expect("write a");
    atomic_write_json(&second, &value).expect("write b");
    assert_eq!(
        fs::read(&first).expect("read a"),
        fs::read(&second).expect("read b")
    );

    let parsed: serde_json::Value =
        serde_json::from_slice(&fs::read(&first).expect("reread")).expect("parse");
    assert_eq!(parsed, value);
}

#[test]
fn canonicalize_existing_resolves_relative_components() {
    let dir = tempdir().expect("tempdir");
    let nested = dir.path().join("inner");
    fs::create_dir_all(&nested).expect("mkdir");
    let canonical = canonicalize_existing(&nested).expect("canonicalize");
    assert!(canonical.is_absolute());
}
