/// Example: print the verified contents of a package as a tree
///
/// Run with: cargo run --example inspect -- <package.spk>
use spk_rs::{verify, Archive, EntryKind, PackageOptions};
use std::error::Error;

fn main() -> Result<(), Box<dyn Error>> {
    let path = std::env::args()
        .nth(1)
        .ok_or("usage: inspect <package.spk>")?;

    let verified = verify(&path, &PackageOptions::default())?;
    let archive = verified.archive()?;

    println!("{} ({})", path, verified.app_id());
    println!(
        "{} entries, {} archive bytes\n",
        archive.entry_count(),
        verified.archive_bytes().len()
    );
    print_tree(&archive, 1);

    Ok(())
}

fn print_tree(archive: &Archive<'_>, depth: usize) {
    let indent = "  ".repeat(depth);
    for entry in archive.iter() {
        match &entry.kind {
            EntryKind::Regular(content) => {
                println!("{}{} ({} bytes)", indent, entry.name, content.len())
            }
            EntryKind::Executable(content) => {
                println!("{}{}* ({} bytes)", indent, entry.name, content.len())
            }
            EntryKind::Symlink(target) => println!("{}{} -> {}", indent, entry.name, target),
            EntryKind::Directory(sub) => {
                println!("{}{}/", indent, entry.name);
                print_tree(sub, depth + 1);
            }
        }
    }
}
