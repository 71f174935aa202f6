//! Generate seed corpus for fuzzing

use spk_rs::{Archive, Entry};
use std::fs;

fn write_seed(corpus_dir: &str, name: &str, archive: &Archive<'_>) -> Result<(), Box<dyn std::error::Error>> {
    let path = format!("{}/{}", corpus_dir, name);
    fs::write(&path, archive.to_bytes()?)?;
    println!("✓ Generated: {}", path);
    Ok(())
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let corpus_dir = "fuzz/corpus/fuzz_archive_parse";
    fs::create_dir_all(corpus_dir)?;

    println!("Generating seed corpus...");

    write_seed(corpus_dir, "seed_empty.bin", &Archive::new())?;

    write_seed(
        corpus_dir,
        "seed_single_small.bin",
        &Archive::new().with_entry(Entry::regular("test.txt", b"Hello, World!".to_vec())),
    )?;

    write_seed(
        corpus_dir,
        "seed_all_kinds.bin",
        &Archive::new()
            .with_entry(Entry::regular("file1.txt", b"First file".to_vec()))
            .with_entry(Entry::executable("run.sh", b"#!/bin/sh\n".to_vec()))
            .with_entry(Entry::symlink("link", "file1.txt"))
            .with_entry(Entry::directory(
                "dir",
                Archive::new().with_entry(Entry::regular("file3.txt", b"Third file".to_vec())),
            )),
    )?;

    let binary_data: Vec<u8> = (0..=255).collect();
    write_seed(
        corpus_dir,
        "seed_binary.bin",
        &Archive::new().with_entry(Entry::regular("binary.bin", binary_data)),
    )?;

    write_seed(
        corpus_dir,
        "seed_zero_length.bin",
        &Archive::new().with_entry(Entry::regular("empty.txt", Vec::new())),
    )?;

    let mut nested = Archive::new().with_entry(Entry::regular("leaf", b"deep".to_vec()));
    for depth in 0..8 {
        nested = Archive::new().with_entry(Entry::directory(format!("d{}", depth), nested));
    }
    write_seed(corpus_dir, "seed_nested.bin", &nested)?;

    println!("\nGenerated 6 seed files in {}", corpus_dir);
    Ok(())
}
