//! Pack, verify and unpack `.spk` package files
//!
//! # Package layout
//!
//! ```text
//! [MAGIC_NUMBER: 8 bytes, uncompressed]
//! [compressed stream:
//!     [signature record: public key, signature || content hash]
//!     [serialized archive]]
//! ```
//!
//! # Usage
//!
//! ```no_run
//! use spk_rs::{pack, unpack, KeyPair, PackageOptions};
//! # use spk_rs::Result;
//!
//! # fn main() -> Result<()> {
//! let key = KeyPair::generate();
//! let options = PackageOptions::default();
//!
//! let app_id = pack("myapp", &key, "myapp.spk", &options)?;
//! let unpacked = unpack("myapp.spk", "myapp-copy", &options)?;
//! assert_eq!(unpacked.app_id, app_id);
//! # Ok(())
//! # }
//! ```

use crate::appid::AppId;
use crate::archive::{pack_directory, unpack_archive, Archive, UnpackStats, MAGIC_NUMBER};
use crate::error::{Result, SpkError};
use crate::keys::{KeyPair, PUBLIC_KEY_BYTES};
use crate::mapping::MappedFile;
use crate::signature::{content_hash, ContentHash, PackageSignature};
use crate::transport::{Compression, Compressor, Decompressor};
use serde::Deserialize;
use std::ffi::{OsStr, OsString};
use std::fs::{self, File};
use std::io::{self, BufWriter, Read, Write};
use std::os::unix::ffi::OsStrExt;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// File extension of package files
pub const PACKAGE_EXTENSION: &str = "spk";

/// Chunk size used when draining the decompressed archive to disk
const COPY_BUFFER_SIZE: usize = 8192;

/// Placeholder name for unlinked temp files in error messages
const TEMP_FILE_NAME: &str = "(temp file)";

/// Settings shared by the pack and unpack pipelines
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PackageOptions {
    /// How the package stream is compressed
    pub compression: Compression,

    /// Directory for intermediate temp files. Defaults to the directory of
    /// the package being written or read.
    pub temp_dir: Option<PathBuf>,
}

impl PackageOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_compression(mut self, compression: Compression) -> Self {
        self.compression = compression;
        self
    }

    pub fn with_temp_dir<P: Into<PathBuf>>(mut self, dir: P) -> Self {
        self.temp_dir = Some(dir.into());
        self
    }

    /// Parse options from TOML
    ///
    /// ```
    /// use spk_rs::{Compression, PackageOptions};
    ///
    /// let options = PackageOptions::from_toml_str(r#"
    ///     [compression]
    ///     method = "external"
    ///     program = "xz"
    /// "#).unwrap();
    /// assert_eq!(options.compression, Compression::xz());
    /// ```
    pub fn from_toml_str(s: &str) -> Result<Self> {
        Ok(toml::from_str(s)?)
    }

    pub fn from_toml_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        Self::from_toml_str(&fs::read_to_string(path)?)
    }

    /// Open an anonymous temp file, already unlinked, next to `near`
    fn temp_file_near(&self, near: &Path) -> Result<File> {
        let dir = match &self.temp_dir {
            Some(dir) => dir.as_path(),
            None => match near.parent() {
                Some(parent) if !parent.as_os_str().is_empty() => parent,
                _ => Path::new("."),
            },
        };
        Ok(tempfile::tempfile_in(dir)?)
    }
}

/// Pack `source_dir` into a signed package at `output`.
///
/// The archive is serialized to an unlinked temp file first, so the output is
/// only opened once signing has succeeded. Returns the app ID of `key`.
pub fn pack<P: AsRef<Path>, Q: AsRef<Path>>(
    source_dir: P,
    key: &KeyPair,
    output: Q,
    options: &PackageOptions,
) -> Result<AppId> {
    let source_dir = source_dir.as_ref();
    let output = output.as_ref();

    let mut temp = options.temp_file_near(output)?;

    {
        let archive = pack_directory(source_dir)?;
        let mut writer = BufWriter::new(&mut temp);
        let written = archive.write_to(&mut writer)?;
        writer.flush()?;
        debug!(
            "Serialized {} entries ({} bytes) from {}",
            archive.entry_count(),
            written,
            source_dir.display()
        );
        // Dropping the archive here releases every file mapping.
    }

    let archive_bytes = MappedFile::new(&temp, Path::new(TEMP_FILE_NAME))?;
    let signature = PackageSignature::sign(key, &archive_bytes);

    let mut final_file = File::create(output)?;
    final_file.write_all(&MAGIC_NUMBER)?;

    let mut compressor = options.compression.compressor(final_file)?;
    if let Err(err) = write_stream(&mut compressor, &signature, &archive_bytes) {
        return Err(compressor.fail(err));
    }
    compressor.finish()?;

    let app_id = signature.app_id();
    info!("Packed {} as {}", output.display(), app_id);
    Ok(app_id)
}

/// A package whose signature and content hash have been checked
#[derive(Debug)]
pub struct VerifiedPackage {
    public_key: [u8; PUBLIC_KEY_BYTES],
    archive_bytes: MappedFile,
}

impl VerifiedPackage {
    pub fn public_key(&self) -> &[u8; PUBLIC_KEY_BYTES] {
        &self.public_key
    }

    pub fn app_id(&self) -> AppId {
        AppId::from_public_key(self.public_key)
    }

    /// The verified serialized archive
    pub fn archive_bytes(&self) -> &[u8] {
        &self.archive_bytes
    }

    /// Parse the archive, borrowing file contents from the mapped bytes
    pub fn archive(&self) -> Result<Archive<'_>> {
        Archive::parse(&self.archive_bytes)
    }
}

/// Check a package's magic number, signature and content hash.
///
/// Steps, each terminal on failure:
/// 1. read the uncompressed magic number ([`SpkError::BadMagic`]); nothing
///    is decompressed if it does not match
/// 2. start decompressing the rest of the file
/// 3. read the signature record ([`SpkError::MalformedSignature`])
/// 4. open the signature with its embedded key ([`SpkError::InvalidSignature`])
/// 5. copy the remaining archive bytes into an unlinked temp file
/// 6. hash the copy and compare with the signed hash ([`SpkError::ContentMismatch`])
pub fn verify<P: AsRef<Path>>(spk: P, options: &PackageOptions) -> Result<VerifiedPackage> {
    let spk = spk.as_ref();
    let mut temp = options.temp_file_near(spk)?;

    let mut input = File::open(spk)?;
    let mut magic = [0u8; MAGIC_NUMBER.len()];
    input.read_exact(&mut magic).map_err(|e| match e.kind() {
        io::ErrorKind::UnexpectedEof => SpkError::BadMagic,
        _ => SpkError::Io(e),
    })?;
    if magic != MAGIC_NUMBER {
        return Err(SpkError::BadMagic);
    }

    let mut decompressor = options.compression.decompressor(input)?;
    let (signature, expected_hash, copied) = match read_stream(&mut decompressor, &mut temp) {
        Ok(read) => read,
        Err(err) => return Err(decompressor.fail(err)),
    };
    decompressor.finish()?;
    debug!("Decompressed {} archive bytes from {}", copied, spk.display());

    let archive_bytes = MappedFile::new(&temp, Path::new(TEMP_FILE_NAME))?;
    drop(temp);

    let actual_hash = content_hash(&archive_bytes);
    if actual_hash != expected_hash {
        return Err(SpkError::ContentMismatch {
            expected: hex::encode(expected_hash),
            actual: hex::encode(actual_hash),
        });
    }

    Ok(VerifiedPackage {
        public_key: signature.public_key,
        archive_bytes,
    })
}

/// Result of a successful unpack
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Unpacked {
    pub app_id: AppId,
    pub stats: UnpackStats,
}

/// Verify `spk` and unpack it into a new directory at `dest`.
///
/// `dest` must not exist. If unpacking fails partway, entries already written
/// under `dest` are left in place.
pub fn unpack<P: AsRef<Path>, Q: AsRef<Path>>(
    spk: P,
    dest: Q,
    options: &PackageOptions,
) -> Result<Unpacked> {
    let spk = spk.as_ref();
    let dest = dest.as_ref();

    if fs::symlink_metadata(dest).is_ok() {
        return Err(SpkError::AlreadyExists(dest.to_path_buf()));
    }

    let verified = verify(spk, options)?;
    let archive = verified.archive()?;
    let stats = unpack_archive(&archive, dest)?;

    let app_id = verified.app_id();
    info!("Unpacked {} into {} as {}", spk.display(), dest.display(), app_id);
    Ok(Unpacked { app_id, stats })
}

/// Default package path for a directory: the directory name plus `.spk`
pub fn default_package_path<P: AsRef<Path>>(dir: P) -> PathBuf {
    let dir = dir.as_ref().components().as_path();
    let mut name = OsString::from(dir.as_os_str());
    name.push(".");
    name.push(PACKAGE_EXTENSION);
    PathBuf::from(name)
}

/// Default unpack directory for a package: its path without `.spk`.
///
/// Returns `None` when the path does not end in `.spk`.
pub fn default_unpack_dir<P: AsRef<Path>>(spk: P) -> Option<PathBuf> {
    let bytes = spk.as_ref().as_os_str().as_bytes();
    let stem = bytes.strip_suffix(b".spk")?;
    if stem.is_empty() || stem.ends_with(b"/") {
        return None;
    }
    Some(PathBuf::from(OsStr::from_bytes(stem)))
}

/// Write the signature record and the archive into the compression stream
fn write_stream(
    compressor: &mut Compressor,
    signature: &PackageSignature,
    archive_bytes: &[u8],
) -> Result<()> {
    let mut writer = BufWriter::new(compressor);
    signature.write_to(&mut writer)?;
    writer.write_all(archive_bytes)?;
    writer.flush()?;
    Ok(())
}

/// Steps 3 to 5 of [`verify`]: read and open the signature, then copy the
/// archive into `temp`. Returns the signature, the signed hash and the
/// number of archive bytes copied.
fn read_stream(
    decompressor: &mut Decompressor,
    temp: &mut File,
) -> Result<(PackageSignature, ContentHash, u64)> {
    let signature = PackageSignature::read_from(decompressor).map_err(decompression_error)?;
    let expected_hash = signature.open()?;
    debug!("Signature opened for {}", signature.app_id());

    let copied = drain_into(decompressor, temp)?;
    Ok((signature, expected_hash, copied))
}

/// Copy the rest of a decompression stream into `out` in fixed-size chunks
fn drain_into<W: Write>(decompressor: &mut Decompressor, out: &mut W) -> Result<u64> {
    let mut buffer = [0u8; COPY_BUFFER_SIZE];
    let mut total = 0u64;

    loop {
        let n = match decompressor.read(&mut buffer) {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(SpkError::DecompressionFailed(e.to_string())),
        };
        out.write_all(&buffer[..n])?;
        total += n as u64;
    }

    out.flush()?;
    Ok(total)
}

/// Read errors from the decompressor mean the stream itself is corrupt
fn decompression_error(err: SpkError) -> SpkError {
    match err {
        SpkError::Io(e) => SpkError::DecompressionFailed(e.to_string()),
        other => other,
    }
}
