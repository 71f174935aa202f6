//! Signing keys and key files
//!
//! A key file holds one Ed25519 key pair as a small word-aligned record:
//!
//! ```text
//! [KEY_FILE_MAGIC: 8 bytes]
//! [public key length: u64][public key: 32 bytes]
//! [private key length: u64][private key: 64 bytes (seed || public key)]
//! ```
//!
//! Anyone holding the key file can publish packages under its app ID, so the
//! file is created readable by its owner only.

use crate::appid::AppId;
use crate::archive::{read_bytes_from, write_bytes};
use crate::error::{Result, SpkError};
use ed25519_dalek::{SigningKey, KEYPAIR_LENGTH, PUBLIC_KEY_LENGTH};
use rand::rngs::OsRng;
use std::fmt;
use std::fs::{File, OpenOptions};
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::os::unix::fs::OpenOptionsExt;
use std::path::Path;

/// Magic number at the start of every key file
pub const KEY_FILE_MAGIC: [u8; 8] = [0x8F, b's', b'p', b'k', b'k', b'e', b'y', 0x01];

/// Size of a public key in bytes
pub const PUBLIC_KEY_BYTES: usize = PUBLIC_KEY_LENGTH;

/// Size of a private key in bytes
pub const PRIVATE_KEY_BYTES: usize = KEYPAIR_LENGTH;

/// An Ed25519 key pair used to sign packages
pub struct KeyPair {
    signing_key: SigningKey,
}

impl KeyPair {
    /// Generate a fresh key pair from the OS random number generator
    pub fn generate() -> Self {
        Self {
            signing_key: SigningKey::generate(&mut OsRng),
        }
    }

    /// Rebuild a key pair from its raw halves, checking that they belong together.
    pub fn from_bytes(public_key: &[u8], private_key: &[u8]) -> Result<Self> {
        let public_key: [u8; PUBLIC_KEY_BYTES] = public_key.try_into().map_err(|_| {
            SpkError::InvalidKeyFile(format!(
                "public key is {} bytes, expected {}",
                public_key.len(),
                PUBLIC_KEY_BYTES
            ))
        })?;
        let private_key: [u8; PRIVATE_KEY_BYTES] = private_key.try_into().map_err(|_| {
            SpkError::InvalidKeyFile(format!(
                "private key is {} bytes, expected {}",
                private_key.len(),
                PRIVATE_KEY_BYTES
            ))
        })?;

        let signing_key = SigningKey::from_keypair_bytes(&private_key).map_err(|_| {
            SpkError::InvalidKeyFile("private key does not contain its public key".to_string())
        })?;

        if signing_key.verifying_key().to_bytes() != public_key {
            return Err(SpkError::InvalidKeyFile(
                "public key does not match private key".to_string(),
            ));
        }

        Ok(Self { signing_key })
    }

    pub fn public_key(&self) -> [u8; PUBLIC_KEY_BYTES] {
        self.signing_key.verifying_key().to_bytes()
    }

    /// Private key in the 64-byte `seed || public key` form
    pub fn private_key(&self) -> [u8; PRIVATE_KEY_BYTES] {
        self.signing_key.to_keypair_bytes()
    }

    pub fn signing_key(&self) -> &SigningKey {
        &self.signing_key
    }

    pub fn app_id(&self) -> AppId {
        AppId::from_public_key(self.public_key())
    }

    /// Write the key file record
    pub fn write_to<W: Write>(&self, writer: &mut W) -> Result<()> {
        writer.write_all(&KEY_FILE_MAGIC)?;
        write_bytes(writer, &self.public_key())?;
        write_bytes(writer, &self.private_key())?;
        Ok(())
    }

    /// Read a key file record
    pub fn read_from<R: Read>(reader: &mut R) -> Result<Self> {
        let mut magic = [0u8; 8];
        reader.read_exact(&mut magic).map_err(|e| match e.kind() {
            io::ErrorKind::UnexpectedEof => SpkError::InvalidKeyFile("file too short".to_string()),
            _ => SpkError::Io(e),
        })?;
        if magic != KEY_FILE_MAGIC {
            return Err(SpkError::InvalidKeyFile("bad magic number".to_string()));
        }

        let public_key = read_bytes_from(reader, PUBLIC_KEY_BYTES, SpkError::InvalidKeyFile)?;
        let private_key = read_bytes_from(reader, PRIVATE_KEY_BYTES, SpkError::InvalidKeyFile)?;

        Self::from_bytes(&public_key, &private_key)
    }

    /// Create a new key file at `path`. Existing files are never overwritten.
    pub fn write_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();
        let file = OpenOptions::new()
            .write(true)
            .create_new(true)
            .mode(0o600)
            .open(path)
            .map_err(|e| match e.kind() {
                io::ErrorKind::AlreadyExists => SpkError::AlreadyExists(path.to_path_buf()),
                _ => SpkError::Io(e),
            })?;

        let mut writer = BufWriter::new(file);
        self.write_to(&mut writer)?;
        writer.flush()?;
        Ok(())
    }

    pub fn read_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let mut reader = BufReader::new(File::open(path)?);
        Self::read_from(&mut reader)
    }
}

impl fmt::Debug for KeyPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyPair")
            .field("app_id", &self.app_id().to_string())
            .finish_non_exhaustive()
    }
}
