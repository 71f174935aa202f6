#![no_main]

use libfuzzer_sys::fuzz_target;
use spk_rs::{verify, PackageOptions, MAGIC_NUMBER};
use std::io::Write;
use tempfile::NamedTempFile;

fuzz_target!(|data: &[u8]| {
    // Put the magic number in front so the decompressor actually runs
    let mut temp_file = match NamedTempFile::new() {
        Ok(f) => f,
        Err(_) => return,
    };
    if temp_file.write_all(&MAGIC_NUMBER).is_err() || temp_file.write_all(data).is_err() {
        return;
    }
    if temp_file.flush().is_err() {
        return;
    }

    // Random bytes will not carry a valid signature, but nothing may panic
    if let Ok(verified) = verify(temp_file.path(), &PackageOptions::default()) {
        let _ = verified.archive();
    }
});
