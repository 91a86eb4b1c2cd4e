//! A file of fixed-length rows addressed by `slot * row_len`.

use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::Path;

use crate::error::{Result, StoreError};

/// Headerless fixed-stride row file. All I/O is synchronous; the handle
/// closes when the value drops, so LRU eviction and error paths release
/// the descriptor without extra bookkeeping.
#[derive(Debug)]
pub struct RowFile {
    file: File,
}

impl RowFile {
    pub fn open(path: &Path, create: bool) -> Result<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(create)
            .open(path)?;
        Ok(Self { file })
    }

    pub fn len(&self) -> Result<u64> {
        Ok(self.file.metadata()?.len())
    }

    /// Reads the `row_len` bytes of row `slot`. A row lying (partly) past
    /// the end of the file reads as `None`; only genuine I/O failures are
    /// errors. Distinguishing the two matters: for the index file an
    /// unwritten row simply means the resource is absent.
    pub fn read_row(&mut self, slot: u64, row_len: usize) -> Result<Option<Vec<u8>>> {
        let offset = slot
            .checked_mul(row_len as u64)
            .ok_or_else(|| StoreError::InvalidArgument(format!("row offset overflow: {slot}")))?;
        if offset + row_len as u64 > self.len()? {
            return Ok(None);
        }
        self.file.seek(SeekFrom::Start(offset))?;
        let mut row = vec![0u8; row_len];
        self.file.read_exact(&mut row)?;
        Ok(Some(row))
    }

    /// Writes `row` at slot `slot`. Writing past the current end of the
    /// file leaves a zero-filled gap, which reads back as absent rows.
    pub fn write_row(&mut self, slot: u64, row: &[u8]) -> Result<()> {
        let offset = slot
            .checked_mul(row.len() as u64)
            .ok_or_else(|| StoreError::InvalidArgument(format!("row offset overflow: {slot}")))?;
        self.file.seek(SeekFrom::Start(offset))?;
        self.file.write_all(row)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn read_past_end_is_absent_not_error() {
        let dir = tempdir().expect("temp dir");
        let mut file = RowFile::open(&dir.path().join("rows"), true).expect("open");
        assert_eq!(file.read_row(0, 4).expect("read"), None);
        file.write_row(2, &[1, 2, 3, 4]).expect("write");
        assert_eq!(file.read_row(3, 4).expect("read"), None);
        assert_eq!(file.read_row(2, 4).expect("read"), Some(vec![1, 2, 3, 4]));
    }

    #[test]
    fn gap_rows_read_as_zeros() {
        let dir = tempdir().expect("temp dir");
        let mut file = RowFile::open(&dir.path().join("rows"), true).expect("open");
        file.write_row(3, &[9, 9]).expect("write");
        assert_eq!(file.read_row(0, 2).expect("read"), Some(vec![0, 0]));
        assert_eq!(file.read_row(2, 2).expect("read"), Some(vec![0, 0]));
        assert_eq!(file.read_row(3, 2).expect("read"), Some(vec![9, 9]));
    }

    #[test]
    fn overwrite_in_place() {
        let dir = tempdir().expect("temp dir");
        let mut file = RowFile::open(&dir.path().join("rows"), true).expect("open");
        file.write_row(0, &[1, 1]).expect("write");
        file.write_row(1, &[2, 2]).expect("write");
        file.write_row(0, &[7, 7]).expect("overwrite");
        assert_eq!(file.read_row(0, 2).expect("read"), Some(vec![7, 7]));
        assert_eq!(file.read_row(1, 2).expect("read"), Some(vec![2, 2]));
    }

    #[test]
    fn open_missing_without_create_fails() {
        let dir = tempdir().expect("temp dir");
        assert!(RowFile::open(&dir.path().join("missing"), false).is_err());
    }
}
