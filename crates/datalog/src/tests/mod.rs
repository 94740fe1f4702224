
use crate::LogWriter;
use envio::{AppendableFile, RandomAccessFile};
use std::path::Path;

pub(crate) fn writer_at(path: &Path) -> LogWriter {
    LogWriter::new(AppendableFile::open(path).unwrap())
}

pub(crate) fn reader_at(path: &Path) -> RandomAccessFile {
    RandomAccessFile::open(path).unwrap()
}
