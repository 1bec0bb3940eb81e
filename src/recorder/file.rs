//! Destination file with patchable header fields
//!
//! Sample bytes are appended; the forward-referenced header fields are
//! rewritten in place once their final values are known.

use std::io;
use std::path::{Path, PathBuf};

use super::format::{HeaderLayout, HeaderPatch};
use super::storage::{OpenMode, Storage, StorageFile};

/// Bytes moved per read/write when copying between files
pub const COPY_CHUNK_SIZE: usize = 1024;

pub struct DlogFile {
    path: PathBuf,
    file: Box<dyn StorageFile>,
    layout: Option<HeaderLayout>,
    length: u64,
    at_end: bool,
}

impl DlogFile {
    /// Create (or truncate) the destination
    pub fn create(storage: &mut dyn Storage, path: &Path) -> io::Result<Self> {
        let file = storage.open(path, OpenMode::Create)?;
        Ok(Self {
            path: path.to_path_buf(),
            file,
            layout: None,
            length: 0,
            at_end: true,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Bytes appended so far
    pub fn len(&self) -> u64 {
        self.length
    }

    pub fn is_empty(&self) -> bool {
        self.length == 0
    }

    /// Record where the header's patchable fields live
    pub fn set_layout(&mut self, layout: HeaderLayout) {
        self.layout = Some(layout);
    }

    pub fn layout(&self) -> Option<&HeaderLayout> {
        self.layout.as_ref()
    }

    pub fn append(&mut self, bytes: &[u8]) -> io::Result<()> {
        if !self.at_end {
            self.file.seek(self.length)?;
            self.at_end = true;
        }
        self.file.write_all(bytes)?;
        self.length += bytes.len() as u64;
        Ok(())
    }

    pub fn sync(&mut self) -> io::Result<()> {
        self.file.sync()
    }

    /// Overwrite one header field with its final value
    pub fn patch(&mut self, patch: HeaderPatch) -> io::Result<()> {
        let layout = self
            .layout
            .ok_or_else(|| io::Error::other("header was never written"))?;
        self.file.seek(layout.offset(patch.field()) as u64)?;
        self.at_end = false;
        self.file.write_all(&patch.to_bytes())
    }

    /// Append the whole content of `src` in fixed-size chunks
    pub fn append_from(&mut self, src: &mut dyn StorageFile) -> io::Result<u64> {
        let mut buf = [0u8; COPY_CHUNK_SIZE];
        let mut copied = 0u64;
        loop {
            let n = src.read(&mut buf)?;
            if n == 0 {
                return Ok(copied);
            }
            self.append(&buf[..n])?;
            copied += n as u64;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::recorder::format::DlogHeader;
    use crate::recorder::storage::FsStorage;
    use tempfile::tempdir;

    #[test]
    fn test_append_after_patch_resumes_at_end() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("p.dlog");
        let mut storage = FsStorage::new();

        let (header, layout) = DlogHeader::default().encode();
        let mut file = DlogFile::create(&mut storage, &path).unwrap();
        file.set_layout(layout);
        file.append(&header).unwrap();
        file.patch(HeaderPatch::DataSize(42)).unwrap();
        file.append(&[1, 2, 3]).unwrap();
        file.sync().unwrap();
        drop(file);

        let bytes = std::fs::read(&path).unwrap();
        assert_eq!(bytes.len(), header.len() + 3);
        assert_eq!(&bytes[header.len()..], &[1, 2, 3]);
        let decoded = DlogHeader::decode(&bytes).unwrap();
        assert_eq!(decoded.data_size, 42);
    }

    #[test]
    fn test_patch_without_layout_fails() {
        let dir = tempdir().unwrap();
        let mut storage = FsStorage::new();
        let mut file = DlogFile::create(&mut storage, &dir.path().join("q.dlog")).unwrap();
        assert!(file.patch(HeaderPatch::DataSize(1)).is_err());
    }

    #[test]
    fn test_append_from_copies_everything() {
        let dir = tempdir().unwrap();
        let src_path = dir.path().join("src.bin");
        let data: Vec<u8> = (0..3000u32).map(|i| i as u8).collect();
        std::fs::write(&src_path, &data).unwrap();

        let mut storage = FsStorage::new();
        let mut dst = DlogFile::create(&mut storage, &dir.path().join("dst.bin")).unwrap();
        let mut src = storage.open(&src_path, OpenMode::Read).unwrap();
        assert_eq!(dst.append_from(src.as_mut()).unwrap(), 3000);
        assert_eq!(dst.len(), 3000);
    }
}
