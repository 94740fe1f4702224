mod open_tests;
mod recovery_tests;

use crate::{DbSingle, Options, ReadOptions, WriteOptions};
use std::path::{Path, PathBuf};

pub(crate) fn create(dir: &Path) -> DbSingle {
    DbSingle::open(
        dir.join("db"),
        Options {
            create_if_missing: true,
            ..Options::default()
        },
    )
    .unwrap()
}

pub(crate) fn reopen(dir: &Path) -> DbSingle {
    DbSingle::open(dir.join("db"), Options::default()).unwrap()
}

pub(crate) fn wo() -> WriteOptions {
    WriteOptions::default()
}

pub(crate) fn ro() -> ReadOptions {
    ReadOptions::default()
}

pub(crate) fn ro_at(seq: u64) -> ReadOptions {
    ReadOptions {
        sequence_number: Some(seq),
    }
}

/// Path of one of the database's files, e.g. `file_of(dir, "data")`.
pub(crate) fn file_of(dir: &Path, ext: &str) -> PathBuf {
    dir.join("db").join(format!("db.{ext}"))
}
