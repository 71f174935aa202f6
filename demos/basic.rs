/// Basic example: generate a key, pack a directory, verify and unpack it
///
/// Run with: cargo run --example basic
use spk_rs::{pack, unpack, verify, KeyPair, PackageOptions};
use std::error::Error;
use std::fs;
use std::path::Path;

fn main() -> Result<(), Box<dyn Error>> {
    println!("=== spk-rs Basic Example ===\n");

    let work = tempfile::tempdir()?;
    let source = work.path().join("hello-app");
    let spk = work.path().join("hello-app.spk");
    let key_path = work.path().join("hello-app.key");

    println!("1. Creating app directory...");
    create_app(&source)?;

    println!("\n2. Generating key...");
    let key = KeyPair::generate();
    key.write_to_file(&key_path)?;
    println!("   ✓ App ID: {}", key.app_id());

    println!("\n3. Packing...");
    let options = PackageOptions::default();
    pack(&source, &key, &spk, &options)?;
    println!(
        "   ✓ Package created: {} ({} bytes)",
        spk.display(),
        fs::metadata(&spk)?.len()
    );

    println!("\n4. Verifying...");
    let verified = verify(&spk, &options)?;
    println!("   Signed by: {}", verified.app_id());
    for entry in verified.archive()?.iter() {
        println!("     - {}", entry.name);
    }

    println!("\n5. Unpacking...");
    let dest = work.path().join("hello-app-unpacked");
    let unpacked = unpack(&spk, &dest, &options)?;
    println!(
        "   ✓ {} files, {} symlinks, {} directories",
        unpacked.stats.files, unpacked.stats.symlinks, unpacked.stats.directories
    );
    println!(
        "   launcher: {}",
        fs::read_to_string(dest.join("bin/launch"))?.trim()
    );

    println!("\n✓ Example complete!");
    Ok(())
}

fn create_app(root: &Path) -> Result<(), Box<dyn Error>> {
    use std::os::unix::fs::{symlink, PermissionsExt};

    fs::create_dir_all(root.join("bin"))?;
    fs::write(root.join("readme.txt"), b"This is a readme file for the basic example.")?;
    fs::write(root.join("bin/launch"), b"#!/bin/sh\nexec echo hello\n")?;
    fs::set_permissions(root.join("bin/launch"), fs::Permissions::from_mode(0o755))?;
    symlink("bin/launch", root.join("start"))?;

    println!("   ✓ Created {}", root.display());
    Ok(())
}
