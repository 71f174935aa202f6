//! Key file tests

use spk_rs::appid;
use spk_rs::keys::KEY_FILE_MAGIC;
use spk_rs::{AppId, KeyPair, SpkError};
use std::fs;
use std::os::unix::fs::PermissionsExt;
use tempfile::tempdir;

#[test]
fn test_key_file_roundtrip() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("app.key");

    let key = KeyPair::generate();
    key.write_to_file(&path).unwrap();

    let loaded = KeyPair::read_from_file(&path).unwrap();
    assert_eq!(loaded.public_key(), key.public_key());
    assert_eq!(loaded.private_key(), key.private_key());
    assert_eq!(loaded.app_id(), key.app_id());

    let bytes = fs::read(&path).unwrap();
    assert_eq!(&bytes[..8], &KEY_FILE_MAGIC);
}

#[test]
fn test_key_file_is_private() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("app.key");
    KeyPair::generate().write_to_file(&path).unwrap();

    let mode = fs::metadata(&path).unwrap().permissions().mode();
    assert_eq!(mode & 0o077, 0, "key file readable by others: {:o}", mode);
}

#[test]
fn test_key_file_never_overwritten() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("app.key");

    let first = KeyPair::generate();
    first.write_to_file(&path).unwrap();

    let second = KeyPair::generate();
    assert!(matches!(
        second.write_to_file(&path),
        Err(SpkError::AlreadyExists(_))
    ));

    assert_eq!(
        KeyPair::read_from_file(&path).unwrap().app_id(),
        first.app_id()
    );
}

#[test]
fn test_corrupt_key_files() {
    let dir = tempdir().unwrap();
    let key = KeyPair::generate();
    let good_path = dir.path().join("good.key");
    key.write_to_file(&good_path).unwrap();
    let good = fs::read(&good_path).unwrap();

    let path = dir.path().join("bad.key");

    // Truncated
    fs::write(&path, &good[..good.len() - 1]).unwrap();
    assert!(matches!(
        KeyPair::read_from_file(&path),
        Err(SpkError::InvalidKeyFile(_))
    ));

    // Wrong magic
    let mut bytes = good.clone();
    bytes[1] = b'x';
    fs::write(&path, &bytes).unwrap();
    assert!(matches!(
        KeyPair::read_from_file(&path),
        Err(SpkError::InvalidKeyFile(_))
    ));

    // Public key that doesn't belong to the private key
    let mut bytes = good.clone();
    bytes[8 + 8] ^= 0xFF;
    fs::write(&path, &bytes).unwrap();
    assert!(matches!(
        KeyPair::read_from_file(&path),
        Err(SpkError::InvalidKeyFile(_))
    ));

    // Not a key file at all
    fs::write(&path, b"").unwrap();
    assert!(KeyPair::read_from_file(&path).unwrap_err().is_validation());
}

#[test]
fn test_app_id_is_encoded_public_key() {
    let key = KeyPair::generate();
    let id = key.app_id().to_string();

    assert_eq!(id.len(), 52);
    assert_eq!(appid::decode(&id).unwrap(), key.public_key().to_vec());
    assert_eq!(AppId::from_public_key(key.public_key()), key.app_id());

    // Users may retype IDs in upper case
    assert_eq!(
        appid::decode(&id.to_uppercase()).unwrap(),
        key.public_key().to_vec()
    );
}
