use crate::archive::format::{validate_name, Archive, EntryKind};
use crate::error::{Result, SpkError};
use std::collections::HashSet;
use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::os::unix::fs::{symlink, OpenOptionsExt};
use std::path::Path;
use tracing::debug;

const REGULAR_MODE: u32 = 0o666;
const EXECUTABLE_MODE: u32 = 0o777;

/// Counts of what an unpack wrote to disk
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct UnpackStats {
    pub files: usize,
    pub symlinks: usize,
    pub directories: usize,
    pub bytes: u64,
}

/// Materialize an archive as a new directory at `dest`.
///
/// `dest` must not exist yet. Every entry name is checked before anything is
/// written for it: names must be valid path components, unique within their
/// directory, and must not collide with anything already on disk. Nothing is
/// ever overwritten.
///
/// Unpacking is not transactional. If an entry is rejected, whatever was
/// written before it stays on disk.
pub fn unpack_archive<P: AsRef<Path>>(archive: &Archive<'_>, dest: P) -> Result<UnpackStats> {
    let dest = dest.as_ref();
    let mut stats = UnpackStats::default();

    fs::create_dir(dest).map_err(|e| already_exists(e, dest))?;
    stats.directories += 1;

    unpack_level(archive, dest, &mut stats)?;

    debug!(
        "Unpacked {} files, {} symlinks, {} directories ({} bytes) into {}",
        stats.files,
        stats.symlinks,
        stats.directories,
        stats.bytes,
        dest.display()
    );
    Ok(stats)
}

fn unpack_level(archive: &Archive<'_>, dir: &Path, stats: &mut UnpackStats) -> Result<()> {
    let mut seen = HashSet::with_capacity(archive.len());

    for entry in archive.iter() {
        validate_name(&entry.name)?;

        if !seen.insert(entry.name.as_str()) {
            return Err(SpkError::DuplicateName(entry.name.clone()));
        }

        let path = dir.join(&entry.name);

        // symlink_metadata so that dangling links count as existing
        if fs::symlink_metadata(&path).is_ok() {
            return Err(SpkError::AlreadyExists(path));
        }

        match &entry.kind {
            EntryKind::Regular(content) => {
                write_new_file(&path, content, REGULAR_MODE)?;
                stats.files += 1;
                stats.bytes += content.len() as u64;
            }
            EntryKind::Executable(content) => {
                write_new_file(&path, content, EXECUTABLE_MODE)?;
                stats.files += 1;
                stats.bytes += content.len() as u64;
            }
            EntryKind::Symlink(target) => {
                symlink(target, &path).map_err(|e| already_exists(e, &path))?;
                stats.symlinks += 1;
            }
            EntryKind::Directory(sub) => {
                fs::create_dir(&path).map_err(|e| already_exists(e, &path))?;
                stats.directories += 1;
                unpack_level(sub, &path, stats)?;
            }
        }
    }

    Ok(())
}

/// Create a file that must not already exist and fill it
fn write_new_file(path: &Path, content: &[u8], mode: u32) -> Result<()> {
    let mut file = OpenOptions::new()
        .write(true)
        .create_new(true)
        .mode(mode)
        .open(path)
        .map_err(|e| already_exists(e, path))?;
    file.write_all(content)?;
    Ok(())
}

fn already_exists(err: io::Error, path: &Path) -> SpkError {
    if err.kind() == io::ErrorKind::AlreadyExists {
        SpkError::AlreadyExists(path.to_path_buf())
    } else {
        SpkError::Io(err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::archive::format::Entry;
    use std::os::unix::fs::PermissionsExt;
    use tempfile::tempdir;

    #[test]
    fn test_unpack_all_kinds() {
        let dir = tempdir().unwrap();
        let dest = dir.path().join("out");

        let archive = Archive::new()
            .with_entry(Entry::regular("a.txt", b"alpha".to_vec()))
            .with_entry(Entry::executable("run", b"#!/bin/sh\n".to_vec()))
            .with_entry(Entry::symlink("link", "a.txt"))
            .with_entry(Entry::directory(
                "sub",
                Archive::new().with_entry(Entry::regular("b.txt", b"beta".to_vec())),
            ));

        let stats = unpack_archive(&archive, &dest).unwrap();
        assert_eq!(
            stats,
            UnpackStats {
                files: 3,
                symlinks: 1,
                directories: 2,
                bytes: 19,
            }
        );

        assert_eq!(fs::read(dest.join("a.txt")).unwrap(), b"alpha");
        assert_eq!(fs::read(dest.join("sub/b.txt")).unwrap(), b"beta");
        assert_eq!(fs::read_link(dest.join("link")).unwrap(), Path::new("a.txt"));

        let exec_mode = fs::metadata(dest.join("run")).unwrap().permissions().mode();
        assert_ne!(exec_mode & 0o100, 0);
        let plain_mode = fs::metadata(dest.join("a.txt")).unwrap().permissions().mode();
        assert_eq!(plain_mode & 0o111, 0);
    }

    #[test]
    fn test_existing_destination_is_rejected() {
        let dir = tempdir().unwrap();
        let archive = Archive::new().with_entry(Entry::regular("a", b"x".to_vec()));

        let result = unpack_archive(&archive, dir.path());
        assert!(matches!(result, Err(SpkError::AlreadyExists(_))));
        assert!(!dir.path().join("a").exists());
    }

    #[test]
    fn test_duplicate_names_at_same_level() {
        let dir = tempdir().unwrap();
        let archive = Archive::new()
            .with_entry(Entry::regular("a", b"first".to_vec()))
            .with_entry(Entry::regular("a", b"second".to_vec()));

        let result = unpack_archive(&archive, dir.path().join("out"));
        assert!(matches!(result, Err(SpkError::DuplicateName(name)) if name == "a"));

        // Not transactional: the first entry stays behind
        assert_eq!(fs::read(dir.path().join("out/a")).unwrap(), b"first");
    }

    #[test]
    fn test_same_name_at_different_levels() {
        let dir = tempdir().unwrap();
        let archive = Archive::new()
            .with_entry(Entry::regular("a", b"top".to_vec()))
            .with_entry(Entry::directory(
                "d",
                Archive::new().with_entry(Entry::regular("a", b"nested".to_vec())),
            ));

        unpack_archive(&archive, dir.path().join("out")).unwrap();
        assert_eq!(fs::read(dir.path().join("out/a")).unwrap(), b"top");
        assert_eq!(fs::read(dir.path().join("out/d/a")).unwrap(), b"nested");
    }

    #[test]
    fn test_invalid_names_write_nothing() {
        for bad in ["../evil", "a/b", "..", ".", "", "x\0y"] {
            let dir = tempdir().unwrap();
            let dest = dir.path().join("out");
            let archive = Archive::new().with_entry(Entry::regular(bad, b"evil".to_vec()));

            let result = unpack_archive(&archive, &dest);
            assert!(
                matches!(result, Err(SpkError::InvalidName(_))),
                "{:?} gave {:?}",
                bad,
                result
            );
            assert!(!dir.path().join("evil").exists());
            assert_eq!(fs::read_dir(&dest).unwrap().count(), 0);
        }
    }

    #[test]
    fn test_symlink_name_then_directory_collides() {
        let dir = tempdir().unwrap();
        let archive = Archive::new()
            .with_entry(Entry::symlink("d", "/tmp"))
            .with_entry(Entry::directory(
                "d",
                Archive::new().with_entry(Entry::regular("x", b"x".to_vec())),
            ));

        let result = unpack_archive(&archive, dir.path().join("out"));
        assert!(matches!(result, Err(SpkError::DuplicateName(_))));
    }
}
