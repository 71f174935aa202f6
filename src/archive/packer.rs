use crate::archive::format::{Archive, Entry};
use crate::error::{Result, SpkError};
use crate::mapping::MappedFile;
use std::fs::{self, File};
use std::os::unix::fs::PermissionsExt;
use std::path::Path;
use tracing::{debug, warn};

/// Owner-execute permission bit
const OWNER_EXECUTE: u32 = 0o100;

/// Build an archive from a directory on disk.
///
/// Entries appear in the order the filesystem lists them. Regular file
/// contents are mapped, not read, so they stay in the page cache until the
/// archive is serialized and dropped. Devices, sockets and FIFOs are skipped
/// with a warning.
pub fn pack_directory<P: AsRef<Path>>(dir: P) -> Result<Archive<'static>> {
    let dir = dir.as_ref();
    let mut archive = Archive::new();

    for dir_entry in fs::read_dir(dir)? {
        let dir_entry = dir_entry?;
        let path = dir_entry.path();
        let name = dir_entry
            .file_name()
            .into_string()
            .map_err(|_| SpkError::NonUtf8Path(path.clone()))?;

        if let Some(entry) = pack_file(&path, name)? {
            archive.push(entry);
        }
    }

    debug!("Packed {} entries from {}", archive.len(), dir.display());
    Ok(archive)
}

/// Build a single entry from a path, without following symlinks
fn pack_file(path: &Path, name: String) -> Result<Option<Entry<'static>>> {
    let metadata = fs::symlink_metadata(path)?;
    let file_type = metadata.file_type();

    let entry = if file_type.is_file() {
        let file = File::open(path)?;
        let mapping = MappedFile::new(&file, path)?;

        if metadata.permissions().mode() & OWNER_EXECUTE != 0 {
            Entry::executable(name, mapping)
        } else {
            Entry::regular(name, mapping)
        }
    } else if file_type.is_symlink() {
        let target = fs::read_link(path)?;
        if target.as_os_str().len() as u64 != metadata.len() {
            return Err(SpkError::LinkChanged(path.to_path_buf()));
        }

        let target = target
            .into_os_string()
            .into_string()
            .map_err(|_| SpkError::NonUtf8Path(path.to_path_buf()))?;
        Entry::symlink(name, target)
    } else if file_type.is_dir() {
        Entry::directory(name, pack_directory(path)?)
    } else {
        warn!("Cannot pack irregular file: {}", path.display());
        return Ok(None);
    };

    Ok(Some(entry))
}
