//! Package signatures
//!
//! A package is signed over the SHA-512 hash of its entire serialized archive.
//! The signed blob carries the hash itself after the Ed25519 signature, so
//! opening the signature recovers the hash the signer attested to:
//!
//! ```text
//! signed_hash = ed25519_signature(hash) [64 bytes] || hash [64 bytes]
//! ```
//!
//! The signature record also carries the signer's public key, so a package
//! verifies without any external key lookup.

use crate::appid::AppId;
use crate::archive::{read_bytes_from, write_bytes};
use crate::error::{Result, SpkError};
use crate::keys::{KeyPair, PUBLIC_KEY_BYTES};
use ed25519_dalek::{Signature, Signer, VerifyingKey, SIGNATURE_LENGTH};
use sha2::{Digest, Sha512};
use std::io::{Read, Write};

/// Size of the content hash in bytes
pub const HASH_BYTES: usize = 64;

/// Size of the signed blob: signature followed by the hash it covers
pub const SIGNED_HASH_BYTES: usize = SIGNATURE_LENGTH + HASH_BYTES;

/// Upper bound on any field of a signature record, so a corrupt length
/// cannot trigger a huge allocation before the exact size checks run
const MAX_FIELD_BYTES: usize = 4096;

/// Hash of a serialized archive
pub type ContentHash = [u8; HASH_BYTES];

/// Compute the content hash of serialized archive bytes
pub fn content_hash(data: &[u8]) -> ContentHash {
    let mut hash = [0u8; HASH_BYTES];
    hash.copy_from_slice(&Sha512::digest(data));
    hash
}

/// Signature record written at the start of a package's compressed stream
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PackageSignature {
    pub public_key: [u8; PUBLIC_KEY_BYTES],
    pub signed_hash: Vec<u8>,
}

impl PackageSignature {
    /// Hash serialized archive bytes and sign the hash
    pub fn sign(key: &KeyPair, archive_bytes: &[u8]) -> Self {
        Self::sign_hash(key, &content_hash(archive_bytes))
    }

    /// Sign an already computed content hash
    pub fn sign_hash(key: &KeyPair, hash: &ContentHash) -> Self {
        // Ed25519 signing with a well-formed key cannot fail.
        let signature = key.signing_key().sign(hash);

        let mut signed_hash = Vec::with_capacity(SIGNED_HASH_BYTES);
        signed_hash.extend_from_slice(&signature.to_bytes());
        signed_hash.extend_from_slice(hash);

        Self {
            public_key: key.public_key(),
            signed_hash,
        }
    }

    /// Verify the signature against the embedded public key and return the
    /// content hash it covers.
    pub fn open(&self) -> Result<ContentHash> {
        if self.signed_hash.len() < SIGNATURE_LENGTH {
            return Err(SpkError::InvalidSignature);
        }
        let (signature_bytes, message) = self.signed_hash.split_at(SIGNATURE_LENGTH);

        let verifying_key =
            VerifyingKey::from_bytes(&self.public_key).map_err(|_| SpkError::InvalidSignature)?;

        let mut signature_array = [0u8; SIGNATURE_LENGTH];
        signature_array.copy_from_slice(signature_bytes);
        let signature = Signature::from_bytes(&signature_array);

        verifying_key.verify_strict(message, &signature)?;

        message.try_into().map_err(|_| {
            SpkError::MalformedSignature(format!(
                "signed hash is {} bytes, expected {}",
                message.len(),
                HASH_BYTES
            ))
        })
    }

    pub fn app_id(&self) -> AppId {
        AppId::from_public_key(self.public_key)
    }

    /// Write the signature record, returning the byte count
    pub fn write_to<W: Write>(&self, writer: &mut W) -> Result<u64> {
        let written = write_bytes(writer, &self.public_key)? + write_bytes(writer, &self.signed_hash)?;
        Ok(written)
    }

    /// Read a signature record, checking field sizes
    pub fn read_from<R: Read>(reader: &mut R) -> Result<Self> {
        let public_key = read_bytes_from(reader, MAX_FIELD_BYTES, SpkError::MalformedSignature)?;
        let public_key: [u8; PUBLIC_KEY_BYTES] = public_key.as_slice().try_into().map_err(|_| {
            SpkError::MalformedSignature(format!(
                "invalid public key: {} bytes, expected {}",
                public_key.len(),
                PUBLIC_KEY_BYTES
            ))
        })?;

        let signed_hash = read_bytes_from(reader, MAX_FIELD_BYTES, SpkError::MalformedSignature)?;
        if signed_hash.len() != SIGNED_HASH_BYTES {
            return Err(SpkError::MalformedSignature(format!(
                "signature is {} bytes, expected {}",
                signed_hash.len(),
                SIGNED_HASH_BYTES
            )));
        }

        Ok(Self {
            public_key,
            signed_hash,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sign_and_open() {
        let key = KeyPair::generate();
        let data = b"serialized archive bytes";

        let signature = PackageSignature::sign(&key, data);
        assert_eq!(signature.public_key, key.public_key());
        assert_eq!(signature.signed_hash.len(), SIGNED_HASH_BYTES);

        let hash = signature.open().unwrap();
        assert_eq!(hash, content_hash(data));
    }

    #[test]
    fn test_record_roundtrip() {
        let key = KeyPair::generate();
        let signature = PackageSignature::sign(&key, b"data");

        let mut buf = Vec::new();
        let written = signature.write_to(&mut buf).unwrap();
        assert_eq!(written, buf.len() as u64);

        let parsed = PackageSignature::read_from(&mut &buf[..]).unwrap();
        assert_eq!(parsed, signature);
    }

    #[test]
    fn test_tampered_hash_fails_to_open() {
        let key = KeyPair::generate();
        let mut signature = PackageSignature::sign(&key, b"data");

        let last = signature.signed_hash.len() - 1;
        signature.signed_hash[last] ^= 0x01;

        assert!(matches!(signature.open(), Err(SpkError::InvalidSignature)));
    }

    #[test]
    fn test_wrong_public_key_fails_to_open() {
        let key = KeyPair::generate();
        let other = KeyPair::generate();
        let mut signature = PackageSignature::sign(&key, b"data");
        signature.public_key = other.public_key();

        assert!(matches!(signature.open(), Err(SpkError::InvalidSignature)));
    }

    #[test]
    fn test_short_signed_hash_is_malformed() {
        let key = KeyPair::generate();
        let mut signature = PackageSignature::sign(&key, b"data");
        signature.signed_hash.truncate(SIGNATURE_LENGTH + 10);

        let mut buf = Vec::new();
        signature.write_to(&mut buf).unwrap();

        assert!(matches!(
            PackageSignature::read_from(&mut &buf[..]),
            Err(SpkError::MalformedSignature(_))
        ));
    }

    #[test]
    fn test_wrong_key_size_is_malformed() {
        let mut buf = Vec::new();
        write_bytes(&mut buf, &[0u8; 16]).unwrap();
        write_bytes(&mut buf, &[0u8; SIGNED_HASH_BYTES]).unwrap();

        assert!(matches!(
            PackageSignature::read_from(&mut &buf[..]),
            Err(SpkError::MalformedSignature(_))
        ));
    }

    #[test]
    fn test_hash_length_checked_after_open() {
        // A valid signature over a message that is not a 64-byte hash
        let key = KeyPair::generate();
        let message = [7u8; 32];
        let signature = key.signing_key().sign(&message);

        let mut signed_hash = signature.to_bytes().to_vec();
        signed_hash.extend_from_slice(&message);
        let package_signature = PackageSignature {
            public_key: key.public_key(),
            signed_hash,
        };

        assert!(matches!(
            package_signature.open(),
            Err(SpkError::MalformedSignature(_))
        ));
    }
}
