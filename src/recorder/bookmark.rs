//! Bookmark side channel
//!
//! During a recording, bookmarks go to two side files next to the
//! destination: `<dest>.bookmarks-index` (8-byte records of sample position
//! and text offset) and `<dest>.bookmarks-text` (raw text). At finalization
//! both are appended to the destination and deleted. After an error abort
//! they stay on disk.

use std::collections::VecDeque;
use std::io;
use std::path::{Path, PathBuf};

use serde::Serialize;
use tracing::{debug, info};

use super::file::DlogFile;
use super::format::{truncate_utf8, HeaderPatch, MAX_BOOKMARK_TEXT_LEN};
use super::storage::{OpenMode, Storage, StorageFile};

/// A text marker attached to a sample row
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Bookmark {
    /// Row the bookmark refers to
    pub position: u32,
    /// Offset of the text within the text blob
    pub text_offset: u32,
    pub text: String,
}

/// Index and text side-file paths for a destination
pub fn side_file_paths(dest: &Path) -> (PathBuf, PathBuf) {
    let with_suffix = |suffix: &str| {
        let mut name = dest.as_os_str().to_os_string();
        name.push(suffix);
        PathBuf::from(name)
    };
    (
        with_suffix(".bookmarks-index"),
        with_suffix(".bookmarks-text"),
    )
}

struct SideFiles {
    index: Box<dyn StorageFile>,
    text: Box<dyn StorageFile>,
}

/// Records the bookmarks of one session
pub struct BookmarkRecorder {
    index_path: PathBuf,
    text_path: PathBuf,
    files: Option<SideFiles>,
    count: u32,
    text_len: u32,
    last_position: u32,
    live: VecDeque<Bookmark>,
    live_max: usize,
}

impl BookmarkRecorder {
    pub fn new(dest: &Path, live_max: usize) -> Self {
        let (index_path, text_path) = side_file_paths(dest);
        Self {
            index_path,
            text_path,
            files: None,
            count: 0,
            text_len: 0,
            last_position: 0,
            live: VecDeque::new(),
            live_max,
        }
    }

    /// Bookmarks recorded this session
    pub fn count(&self) -> u32 {
        self.count
    }

    /// Most recent bookmarks, oldest first
    pub fn live(&self) -> impl Iterator<Item = &Bookmark> {
        self.live.iter()
    }

    /// Append one bookmark.
    ///
    /// Text beyond the maximum length is dropped. Positions never go
    /// backwards; an earlier position is clamped to the previous one.
    pub fn add(&mut self, storage: &mut dyn Storage, position: u32, text: &str) -> io::Result<()> {
        if self.files.is_none() {
            let index = storage.open(&self.index_path, OpenMode::Create)?;
            let text = storage.open(&self.text_path, OpenMode::Create)?;
            self.files = Some(SideFiles { index, text });
            debug!(index = %self.index_path.display(), "Created bookmark side files");
        }
        let Some(files) = self.files.as_mut() else {
            return Ok(());
        };

        let position = position.max(self.last_position);
        let text = truncate_utf8(text, MAX_BOOKMARK_TEXT_LEN);

        let mut record = [0u8; 8];
        record[..4].copy_from_slice(&position.to_le_bytes());
        record[4..].copy_from_slice(&self.text_len.to_le_bytes());
        files.index.write_all(&record)?;
        files.index.sync()?;
        files.text.write_all(text.as_bytes())?;

        let bookmark = Bookmark {
            position,
            text_offset: self.text_len,
            text: text.to_string(),
        };
        self.text_len += text.len() as u32;
        self.last_position = position;
        self.count += 1;

        if self.live_max > 0 {
            if self.live.len() == self.live_max {
                self.live.pop_front();
            }
            self.live.push_back(bookmark);
        }
        Ok(())
    }

    /// Append index, terminator and text to `dest` and delete the side files.
    ///
    /// `dest` must already hold every sample row. Nothing is deleted when a
    /// copy step fails.
    pub fn merge(&mut self, storage: &mut dyn Storage, dest: &mut DlogFile) -> io::Result<()> {
        let Some(mut files) = self.files.take() else {
            return Ok(());
        };
        files.text.sync()?;
        drop(files);

        dest.patch(HeaderPatch::BookmarksSize(self.count))?;

        let mut index = storage.open(&self.index_path, OpenMode::Read)?;
        dest.append_from(index.as_mut())?;

        let mut terminator = [0u8; 8];
        terminator[4..].copy_from_slice(&self.text_len.to_le_bytes());
        dest.append(&terminator)?;

        let mut text = storage.open(&self.text_path, OpenMode::Read)?;
        dest.append_from(text.as_mut())?;
        dest.sync()?;
        drop(index);
        drop(text);

        storage.remove(&self.index_path)?;
        storage.remove(&self.text_path)?;

        info!(
            path = %dest.path().display(),
            bookmarks = self.count,
            text_bytes = self.text_len,
            "Bookmarks merged"
        );
        Ok(())
    }
}
