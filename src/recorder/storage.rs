//! Storage driver seam
//!
//! The engine only sees [`Storage`] and [`StorageFile`]; [`FsStorage`] maps
//! them onto the local filesystem. Tests substitute wrappers that inject
//! write failures.

use std::fs::{File, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::Path;

use tracing::{debug, warn};

/// How a file is opened
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpenMode {
    /// Read/write, created if missing, truncated to zero length
    Create,
    /// Read only
    Read,
}

/// An open file on the storage device
pub trait StorageFile: Send {
    fn write_all(&mut self, buf: &[u8]) -> io::Result<()>;

    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize>;

    /// Seek to an absolute offset
    fn seek(&mut self, pos: u64) -> io::Result<()>;

    /// Seek to the end; returns the file length
    fn seek_end(&mut self) -> io::Result<u64>;

    /// Make written data durable
    fn sync(&mut self) -> io::Result<()>;
}

/// The storage device
pub trait Storage: Send {
    fn open(&mut self, path: &Path, mode: OpenMode) -> io::Result<Box<dyn StorageFile>>;

    fn remove(&mut self, path: &Path) -> io::Result<()>;

    /// Recover the device after a failed write
    fn reinitialize(&mut self);
}

impl StorageFile for File {
    fn write_all(&mut self, buf: &[u8]) -> io::Result<()> {
        Write::write_all(self, buf)
    }

    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        Read::read(self, buf)
    }

    fn seek(&mut self, pos: u64) -> io::Result<()> {
        Seek::seek(self, SeekFrom::Start(pos)).map(|_| ())
    }

    fn seek_end(&mut self) -> io::Result<u64> {
        Seek::seek(self, SeekFrom::End(0))
    }

    fn sync(&mut self) -> io::Result<()> {
        self.sync_data()
    }
}

/// Local filesystem storage
#[derive(Debug, Default)]
pub struct FsStorage {
    reinit_count: u32,
}

impl FsStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// How many times the device was reinitialized
    pub fn reinit_count(&self) -> u32 {
        self.reinit_count
    }
}

impl Storage for FsStorage {
    fn open(&mut self, path: &Path, mode: OpenMode) -> io::Result<Box<dyn StorageFile>> {
        let file = match mode {
            OpenMode::Create => {
                if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                    std::fs::create_dir_all(parent)?;
                }
                OpenOptions::new()
                    .read(true)
                    .write(true)
                    .create(true)
                    .truncate(true)
                    .open(path)?
            }
            OpenMode::Read => File::open(path)?,
        };
        debug!(path = %path.display(), ?mode, "Opened file");
        Ok(Box::new(file))
    }

    fn remove(&mut self, path: &Path) -> io::Result<()> {
        std::fs::remove_file(path)
    }

    fn reinitialize(&mut self) {
        self.reinit_count += 1;
        warn!(count = self.reinit_count, "Reinitializing storage");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_create_truncates() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("a.dlog");
        std::fs::write(&path, b"old contents").unwrap();

        let mut storage = FsStorage::new();
        let mut file = storage.open(&path, OpenMode::Create).unwrap();
        assert_eq!(file.seek_end().unwrap(), 0);
        file.write_all(b"new").unwrap();
        file.sync().unwrap();
        drop(file);

        assert_eq!(std::fs::read(&path).unwrap(), b"new");
    }

    #[test]
    fn test_create_makes_parent_dirs() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested/deeper/b.dlog");
        let mut storage = FsStorage::new();
        storage.open(&path, OpenMode::Create).unwrap();
        assert!(path.exists());
    }

    #[test]
    fn test_seek_and_overwrite() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("c.dlog");
        let mut storage = FsStorage::new();
        let mut file = storage.open(&path, OpenMode::Create).unwrap();
        file.write_all(&[0u8; 8]).unwrap();
        file.seek(2).unwrap();
        file.write_all(&[7, 7]).unwrap();
        drop(file);

        assert_eq!(std::fs::read(&path).unwrap(), vec![0, 0, 7, 7, 0, 0, 0, 0]);
    }

    #[test]
    fn test_read_and_remove() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("d.bin");
        std::fs::write(&path, b"xyz").unwrap();

        let mut storage = FsStorage::new();
        let mut file = storage.open(&path, OpenMode::Read).unwrap();
        let mut buf = [0u8; 8];
        assert_eq!(file.read(&mut buf).unwrap(), 3);
        drop(file);

        storage.remove(&path).unwrap();
        assert!(!path.exists());
        assert!(storage.open(&path, OpenMode::Read).is_err());
    }

    #[test]
    fn test_reinitialize_counts() {
        let mut storage = FsStorage::new();
        storage.reinitialize();
        storage.reinitialize();
        assert_eq!(storage.reinit_count(), 2);
    }
}
