#![no_main]

use libfuzzer_sys::fuzz_target;
use spk_rs::{Archive, EntryKind};

fn walk(archive: &Archive<'_>) -> u64 {
    let mut bytes = 0;
    for entry in archive.iter() {
        let _ = spk_rs::archive::validate_name(&entry.name);
        bytes += match &entry.kind {
            EntryKind::Regular(content) | EntryKind::Executable(content) => content.len() as u64,
            EntryKind::Symlink(target) => target.len() as u64,
            EntryKind::Directory(sub) => walk(sub),
        };
    }
    bytes
}

fuzz_target!(|data: &[u8]| {
    // Parsing arbitrary bytes must never panic
    let archive = match Archive::parse(data) {
        Ok(archive) => archive,
        Err(_) => return,
    };

    let _ = archive.entry_count();
    let _ = walk(&archive);

    // Every accepted archive has exactly one encoding
    let bytes = archive.to_bytes().expect("serialize parsed archive");
    assert_eq!(bytes, data);
});
