mod format;
mod packer;
mod unpacker;

pub use format::{
    validate_name, Archive, Content, Entry, EntryKind, MAGIC_NUMBER, MAX_NESTING_DEPTH, WORD_SIZE,
};
pub(crate) use format::{read_bytes_from, write_bytes};
pub use packer::pack_directory;
pub use unpacker::{unpack_archive, UnpackStats};
