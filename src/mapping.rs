//! Read-only memory mappings of files on disk
//!
//! Regular file contents are mapped rather than read while an archive is being
//! built, and a finished archive is mapped back in to be hashed and parsed
//! without copying it. The mapping is released when the [`MappedFile`] drops.

use crate::error::{Result, SpkError};
use memmap2::{Mmap, MmapOptions};
use std::fs::File;
use std::ops::Deref;
use std::path::Path;

/// Private, read-only view of a regular file's contents
#[derive(Debug)]
pub struct MappedFile {
    map: Option<Mmap>,
}

impl MappedFile {
    /// Map an already-open file.
    ///
    /// `path` is only used for error reporting. Zero-length files produce an
    /// empty view, since a zero-length mapping is not allowed.
    pub fn new(file: &File, path: &Path) -> Result<Self> {
        let metadata = file.metadata()?;
        if !metadata.is_file() {
            return Err(SpkError::NotRegularFile(path.to_path_buf()));
        }

        if metadata.len() == 0 {
            return Ok(Self::empty());
        }

        // SAFETY: the mapping is private and read-only. Files mapped here are
        // either package inputs we only read, or unlinked temp files nothing
        // else can reach.
        let map = unsafe { MmapOptions::new().map_copy_read_only(file)? };
        Ok(Self { map: Some(map) })
    }

    /// Open `path` read-only and map it.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let file = File::open(path)?;
        Self::new(&file, path)
    }

    /// An empty view that maps nothing
    pub fn empty() -> Self {
        Self { map: None }
    }

    pub fn as_bytes(&self) -> &[u8] {
        self.map.as_deref().unwrap_or(&[])
    }
}

impl Deref for MappedFile {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        self.as_bytes()
    }
}

impl AsRef<[u8]> for MappedFile {
    fn as_ref(&self) -> &[u8] {
        self.as_bytes()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::{tempdir, NamedTempFile};

    #[test]
    fn test_map_regular_file() {
        let mut temp_file = NamedTempFile::new().unwrap();
        temp_file.write_all(b"Hello, World!").unwrap();
        temp_file.flush().unwrap();

        let mapping = MappedFile::open(temp_file.path()).unwrap();
        assert_eq!(&mapping[..], b"Hello, World!");
        assert_eq!(mapping.len(), 13);
    }

    #[test]
    fn test_map_empty_file() {
        let temp_file = NamedTempFile::new().unwrap();

        let mapping = MappedFile::open(temp_file.path()).unwrap();
        assert!(mapping.is_empty());
        assert_eq!(mapping.as_bytes(), b"");
    }

    #[test]
    fn test_map_directory_fails() {
        let dir = tempdir().unwrap();

        let result = MappedFile::open(dir.path());
        assert!(matches!(result, Err(SpkError::NotRegularFile(_))));
    }
}
