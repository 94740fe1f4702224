use super::{create, file_of, reopen, wo};
use crate::{DbError, DbSingle, Options};
use anyhow::Result;
use tempfile::tempdir;

#[test]
fn create_writes_all_sidecars() -> Result<()> {
    let dir = tempdir()?;
    let db = create(dir.path());
    db.close()?;

    for ext in ["lock", "data", "index", "keeper"] {
        assert!(file_of(dir.path(), ext).exists(), "missing .{ext}");
    }
    Ok(())
}

#[test]
fn open_missing_db_is_not_found() {
    let dir = tempdir().unwrap();
    let err = DbSingle::open(dir.path().join("absent"), Options::default()).unwrap_err();
    assert!(matches!(err, DbError::NotFound(_)), "got {err}");
}

#[test]
fn error_if_exists_rejects_existing_db() {
    let dir = tempdir().unwrap();
    create(dir.path()).close().unwrap();

    let err = DbSingle::open(
        dir.path().join("db"),
        Options {
            create_if_missing: true,
            error_if_exists: true,
        },
    )
    .unwrap_err();
    assert!(matches!(err, DbError::InvalidArgument(_)), "got {err}");
}

#[test]
fn second_open_is_locked_out() {
    let dir = tempdir().unwrap();
    let held = create(dir.path());

    let err = DbSingle::open(dir.path().join("db"), Options::default()).unwrap_err();
    assert!(matches!(err, DbError::Io(_)), "got {err}");
    drop(held);

    // released lock lets a reopen through
    reopen(dir.path());
}

#[test]
fn existing_dir_without_data_file_is_not_found() {
    let dir = tempdir().unwrap();
    std::fs::create_dir_all(dir.path().join("db")).unwrap();

    let err = DbSingle::open(dir.path().join("db"), Options::default()).unwrap_err();
    assert!(matches!(err, DbError::NotFound(_)), "got {err}");
}

#[test]
fn empty_key_is_invalid() {
    let dir = tempdir().unwrap();
    let db = create(dir.path());
    let err = db.put(&wo(), b"", b"v").unwrap_err();
    assert!(matches!(err, DbError::InvalidArgument(_)), "got {err}");
}
