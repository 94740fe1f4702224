mod iter_tests;

use crate::{Index, SeqGenerator};
use datalog::LogWriter;
use envio::{AppendableFile, RandomAccessFile};
use std::sync::Arc;
use tempfile::TempDir;

/// An index wired to a real data file, the way the engine wires one.
pub(crate) struct Fixture {
    _dir: TempDir,
    pub(crate) writer: LogWriter,
    pub(crate) index: Index,
}

impl Fixture {
    pub(crate) fn new() -> Self {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("db.data");
        let writer = LogWriter::new(AppendableFile::open(&path).unwrap());
        let data_file = Arc::new(RandomAccessFile::open(&path).unwrap());
        let index = Index::new(SeqGenerator::new(), data_file);
        Self {
            _dir: dir,
            writer,
            index,
        }
    }

    pub(crate) fn put(&mut self, key: &[u8], value: &[u8]) -> u64 {
        let pos = self.writer.calc_write_pos();
        self.writer
            .add_record(&LogWriter::make_record(key, value))
            .unwrap();
        self.index.insert(key, pos)
    }

    pub(crate) fn del(&mut self, key: &[u8]) -> u64 {
        self.writer
            .add_del_record(&LogWriter::make_record(key, b""))
            .unwrap();
        self.index.remove(key)
    }

    pub(crate) fn get(&self, key: &[u8]) -> Option<Vec<u8>> {
        self.index.find(key, u64::MAX).unwrap()
    }
}
