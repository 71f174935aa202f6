//! spk-rs: signed package archives
//!
//! A package bundles a directory tree into a single `.spk` file signed with an
//! Ed25519 key, so that recipients can check it came from the holder of that
//! key before unpacking it back into an identical tree:
//! - Archive model with regular files, executables, symlinks and directories
//! - Zero-copy packing and parsing through memory mappings
//! - SHA-512 content hash signed with Ed25519, public key embedded
//! - zstd or external-program (`xz`) compression of the package stream
//! - Safe unpacking: name validation, per-directory duplicate checks, no overwrites
//! - Base32 app IDs as human-readable key fingerprints
//!
//! # Example
//!
//! ```no_run
//! use spk_rs::{pack, unpack, KeyPair, PackageOptions};
//!
//! let key = KeyPair::generate();
//! key.write_to_file("app.key")?;
//!
//! let options = PackageOptions::default();
//! let app_id = pack("app", &key, "app.spk", &options)?;
//! println!("packed {}", app_id);
//!
//! let unpacked = unpack("app.spk", "app-unpacked", &options)?;
//! assert_eq!(unpacked.app_id, app_id);
//! # Ok::<(), spk_rs::error::SpkError>(())
//! ```

// Core modules
pub mod appid;
pub mod archive;
pub mod error;
pub mod keys;
pub mod mapping;
pub mod package;
pub mod signature;
pub mod transport;

// Re-export commonly used types
pub use appid::AppId;
pub use archive::{
    pack_directory, unpack_archive, Archive, Content, Entry, EntryKind, UnpackStats,
    MAGIC_NUMBER,
};
pub use error::{Result, SpkError};
pub use keys::KeyPair;
pub use mapping::MappedFile;
pub use package::{
    default_package_path, default_unpack_dir, pack, unpack, verify, PackageOptions, Unpacked,
    VerifiedPackage,
};
pub use signature::{content_hash, PackageSignature};
pub use transport::Compression;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_library_basics() {
        // Ensure core types are accessible
        let _compression = Compression::default();
        let _archive = Archive::new();
        assert_eq!(MAGIC_NUMBER.len(), 8);
    }
}
