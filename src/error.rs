use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Result type for spk operations
pub type Result<T> = std::result::Result<T, SpkError>;

/// Unified error type for all spk operations
#[derive(Debug, Error)]
pub enum SpkError {
    // Identifier codec errors
    #[error("Invalid base32 character: {0:?}")]
    InvalidEncoding(char),

    #[error("Base32 decode failed: extra bits at end")]
    TrailingBits,

    // Package format errors
    #[error("Does not appear to be an .spk (bad magic number)")]
    BadMagic,

    #[error("Invalid signature format: {0}")]
    MalformedSignature(String),

    #[error("Malformed archive: {0}")]
    MalformedArchive(String),

    #[error("Unknown file type in archive: {0}")]
    UnknownEntryKind(u32),

    #[error("Decompression failed: {0}")]
    DecompressionFailed(String),

    #[error("Invalid key file: {0}")]
    InvalidKeyFile(String),

    // Unpack errors
    #[error("Archive contained invalid file name: {0:?}")]
    InvalidName(String),

    #[error("Archive contained duplicate file name: {0:?}")]
    DuplicateName(String),

    #[error("Already exists: {}", .0.display())]
    AlreadyExists(PathBuf),

    // Cryptographic errors
    #[error("Invalid signature")]
    InvalidSignature,

    #[error("Signature didn't match package contents (expected {expected}, got {actual})")]
    ContentMismatch { expected: String, actual: String },

    // Filesystem errors
    #[error("Not a regular file: {}", .0.display())]
    NotRegularFile(PathBuf),

    #[error("Link changed between stat() and readlink(): {}", .0.display())]
    LinkChanged(PathBuf),

    #[error("Path is not valid UTF-8: {}", .0.display())]
    NonUtf8Path(PathBuf),

    // Subprocess errors
    #[error("Failed to launch {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: io::Error,
    },

    #[error("Child process {program} failed with exit code {code}")]
    ChildFailed { program: String, code: i32 },

    #[error("Child process {program} crashed with signal {signal}")]
    ChildCrashed { program: String, signal: i32 },

    // I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    // Configuration errors
    #[error("Invalid configuration: {0}")]
    Config(String),
}

impl SpkError {
    /// Whether this error describes a malformed or hostile input rather than a
    /// failing environment.
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            SpkError::InvalidEncoding(_)
                | SpkError::TrailingBits
                | SpkError::BadMagic
                | SpkError::MalformedSignature(_)
                | SpkError::MalformedArchive(_)
                | SpkError::UnknownEntryKind(_)
                | SpkError::DecompressionFailed(_)
                | SpkError::InvalidKeyFile(_)
                | SpkError::InvalidName(_)
                | SpkError::DuplicateName(_)
                | SpkError::AlreadyExists(_)
        )
    }

    /// Whether this error means the package was not signed by the key it claims,
    /// or its content does not match what was signed.
    pub fn is_cryptographic(&self) -> bool {
        matches!(
            self,
            SpkError::InvalidSignature | SpkError::ContentMismatch { .. }
        )
    }
}

impl From<toml::de::Error> for SpkError {
    fn from(err: toml::de::Error) -> Self {
        SpkError::Config(err.to_string())
    }
}

impl From<ed25519_dalek::SignatureError> for SpkError {
    fn from(_: ed25519_dalek::SignatureError) -> Self {
        SpkError::InvalidSignature
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_classification() {
        assert!(SpkError::BadMagic.is_validation());
        assert!(SpkError::DuplicateName("a".into()).is_validation());
        assert!(!SpkError::BadMagic.is_cryptographic());

        assert!(SpkError::InvalidSignature.is_cryptographic());
        assert!(!SpkError::InvalidSignature.is_validation());

        let io = SpkError::from(io::Error::new(io::ErrorKind::Other, "boom"));
        assert!(!io.is_validation());
        assert!(!io.is_cryptographic());
    }
}
