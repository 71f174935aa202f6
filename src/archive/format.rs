use crate::error::{Result, SpkError};
use crate::mapping::MappedFile;
use std::fmt;
use std::io::{self, Read, Write};
use std::ops::Deref;

/// Magic number: 0x8F 's' 'p' 'k' 0x0D 0x0A 0x1A 0x0A
/// Written uncompressed at the start of every package file
pub const MAGIC_NUMBER: [u8; 8] = [0x8F, b's', b'p', b'k', 0x0D, 0x0A, 0x1A, 0x0A];

/// Serialization word size in bytes. Every record is a whole number of words.
pub const WORD_SIZE: usize = 8;

/// Maximum directory nesting accepted when parsing an archive
pub const MAX_NESTING_DEPTH: usize = 64;

const KIND_REGULAR: u32 = 0;
const KIND_EXECUTABLE: u32 = 1;
const KIND_SYMLINK: u32 = 2;
const KIND_DIRECTORY: u32 = 3;

/// File contents held by an archive entry
///
/// Packing keeps contents mapped until the archive is serialized; parsing
/// borrows contents straight out of the verified archive bytes.
pub enum Content<'a> {
    Mapped(MappedFile),
    Borrowed(&'a [u8]),
    Owned(Vec<u8>),
}

impl Deref for Content<'_> {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        match self {
            Content::Mapped(mapping) => mapping.as_bytes(),
            Content::Borrowed(bytes) => bytes,
            Content::Owned(bytes) => bytes,
        }
    }
}

impl fmt::Debug for Content<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let source = match self {
            Content::Mapped(_) => "Mapped",
            Content::Borrowed(_) => "Borrowed",
            Content::Owned(_) => "Owned",
        };
        write!(f, "{}({} bytes)", source, self.len())
    }
}

impl PartialEq for Content<'_> {
    fn eq(&self, other: &Self) -> bool {
        self[..] == other[..]
    }
}

impl Eq for Content<'_> {}

impl From<MappedFile> for Content<'_> {
    fn from(mapping: MappedFile) -> Self {
        Content::Mapped(mapping)
    }
}

impl<'a> From<&'a [u8]> for Content<'a> {
    fn from(bytes: &'a [u8]) -> Self {
        Content::Borrowed(bytes)
    }
}

impl From<Vec<u8>> for Content<'_> {
    fn from(bytes: Vec<u8>) -> Self {
        Content::Owned(bytes)
    }
}

/// What an entry is
#[derive(Debug, PartialEq, Eq)]
pub enum EntryKind<'a> {
    /// File contents, no special permissions
    Regular(Content<'a>),
    /// File contents, executable by the owner
    Executable(Content<'a>),
    /// Symbolic link target
    Symlink(String),
    /// Nested directory
    Directory(Archive<'a>),
}

impl EntryKind<'_> {
    fn tag(&self) -> u32 {
        match self {
            EntryKind::Regular(_) => KIND_REGULAR,
            EntryKind::Executable(_) => KIND_EXECUTABLE,
            EntryKind::Symlink(_) => KIND_SYMLINK,
            EntryKind::Directory(_) => KIND_DIRECTORY,
        }
    }
}

/// One named node of an archive
#[derive(Debug, PartialEq, Eq)]
pub struct Entry<'a> {
    pub name: String,
    pub kind: EntryKind<'a>,
}

impl<'a> Entry<'a> {
    pub fn regular(name: impl Into<String>, content: impl Into<Content<'a>>) -> Self {
        Self {
            name: name.into(),
            kind: EntryKind::Regular(content.into()),
        }
    }

    pub fn executable(name: impl Into<String>, content: impl Into<Content<'a>>) -> Self {
        Self {
            name: name.into(),
            kind: EntryKind::Executable(content.into()),
        }
    }

    pub fn symlink(name: impl Into<String>, target: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: EntryKind::Symlink(target.into()),
        }
    }

    pub fn directory(name: impl Into<String>, archive: Archive<'a>) -> Self {
        Self {
            name: name.into(),
            kind: EntryKind::Directory(archive),
        }
    }
}

/// Ordered list of entries making up one directory level of a package
#[derive(Debug, Default, PartialEq, Eq)]
pub struct Archive<'a> {
    pub entries: Vec<Entry<'a>>,
}

impl<'a> Archive<'a> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, entry: Entry<'a>) {
        self.entries.push(entry);
    }

    pub fn with_entry(mut self, entry: Entry<'a>) -> Self {
        self.entries.push(entry);
        self
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Entry<'a>> {
        self.entries.iter()
    }

    /// Number of entries at this level
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Number of entries at this level and every level below it
    pub fn entry_count(&self) -> usize {
        self.entries
            .iter()
            .map(|entry| match &entry.kind {
                EntryKind::Directory(dir) => 1 + dir.entry_count(),
                _ => 1,
            })
            .sum()
    }

    /// Serialize the archive in its canonical form, returning the byte count.
    ///
    /// Layout, in little-endian words:
    /// - entry count
    /// - per entry: `kind | name_len << 32`, the name padded to a word boundary,
    ///   then either a length-prefixed byte string (regular, executable,
    ///   symlink) or a nested archive (directory)
    pub fn write_to<W: Write>(&self, writer: &mut W) -> Result<u64> {
        let mut written = write_word(writer, self.entries.len() as u64)?;

        for entry in &self.entries {
            let name = entry.name.as_bytes();
            let name_len = u32::try_from(name.len()).map_err(|_| {
                SpkError::MalformedArchive(format!("name too long: {} bytes", name.len()))
            })?;

            written += write_word(
                writer,
                u64::from(entry.kind.tag()) | (u64::from(name_len) << 32),
            )?;
            written += write_padded(writer, name)?;

            written += match &entry.kind {
                EntryKind::Regular(content) | EntryKind::Executable(content) => {
                    write_bytes(writer, content)?
                }
                EntryKind::Symlink(target) => write_bytes(writer, target.as_bytes())?,
                EntryKind::Directory(dir) => dir.write_to(writer)?,
            };
        }

        Ok(written)
    }

    /// Serialize into a fresh buffer
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        let mut buf = Vec::new();
        self.write_to(&mut buf)?;
        Ok(buf)
    }

    /// Parse an archive without copying file contents out of `bytes`.
    pub fn parse(bytes: &'a [u8]) -> Result<Self> {
        if bytes.len() % WORD_SIZE != 0 {
            return Err(SpkError::MalformedArchive(format!(
                "length {} is not a whole number of words",
                bytes.len()
            )));
        }

        let mut cursor = WordCursor { bytes, pos: 0 };
        let archive = Self::parse_level(&mut cursor, 0)?;

        if cursor.remaining() != 0 {
            return Err(SpkError::MalformedArchive(format!(
                "{} trailing bytes after archive",
                cursor.remaining()
            )));
        }

        Ok(archive)
    }

    fn parse_level(cursor: &mut WordCursor<'a>, depth: usize) -> Result<Self> {
        let count = cursor.read_word()?;

        // Every entry takes at least a header word and a payload word
        if count > (cursor.remaining() / (2 * WORD_SIZE)) as u64 {
            return Err(SpkError::MalformedArchive(format!(
                "entry count {} exceeds archive size",
                count
            )));
        }

        let mut entries = Vec::with_capacity(count as usize);

        for _ in 0..count {
            let header = cursor.read_word()?;
            let tag = header as u32;
            let name_len = (header >> 32) as usize;

            let name = std::str::from_utf8(cursor.read_padded(name_len)?)
                .map_err(|e| SpkError::MalformedArchive(format!("invalid UTF-8 in name: {}", e)))?
                .to_string();

            let kind = match tag {
                KIND_REGULAR => EntryKind::Regular(Content::Borrowed(cursor.read_bytes()?)),
                KIND_EXECUTABLE => EntryKind::Executable(Content::Borrowed(cursor.read_bytes()?)),
                KIND_SYMLINK => {
                    let target = std::str::from_utf8(cursor.read_bytes()?).map_err(|e| {
                        SpkError::MalformedArchive(format!("invalid UTF-8 in symlink target: {}", e))
                    })?;
                    EntryKind::Symlink(target.to_string())
                }
                KIND_DIRECTORY => {
                    if depth + 1 >= MAX_NESTING_DEPTH {
                        return Err(SpkError::MalformedArchive(format!(
                            "directories nested deeper than {}",
                            MAX_NESTING_DEPTH
                        )));
                    }
                    EntryKind::Directory(Self::parse_level(cursor, depth + 1)?)
                }
                other => return Err(SpkError::UnknownEntryKind(other)),
            };

            entries.push(Entry { name, kind });
        }

        Ok(Self { entries })
    }
}

/// Check a single path component against the archive naming rules.
///
/// Names must be non-empty, must not be `.` or `..`, and must not contain `/`
/// or NUL.
pub fn validate_name(name: &str) -> Result<()> {
    if name.is_empty() || name == "." || name == ".." || name.contains(['/', '\0']) {
        return Err(SpkError::InvalidName(name.to_string()));
    }
    Ok(())
}

/// Bounds-checked reader over word-aligned archive bytes
struct WordCursor<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> WordCursor<'a> {
    fn remaining(&self) -> usize {
        self.bytes.len() - self.pos
    }

    fn read_word(&mut self) -> Result<u64> {
        let word = self.read_padded(WORD_SIZE)?;
        let mut buf = [0u8; WORD_SIZE];
        buf.copy_from_slice(word);
        Ok(u64::from_le_bytes(buf))
    }

    /// Read `len` bytes and skip the padding up to the next word boundary.
    /// The padding must be zero.
    fn read_padded(&mut self, len: usize) -> Result<&'a [u8]> {
        if len > self.remaining() || padded_len(len) > self.remaining() {
            return Err(SpkError::MalformedArchive(format!(
                "unexpected end of archive: need {} bytes at offset {}, have {}",
                len,
                self.pos,
                self.remaining()
            )));
        }

        let end = self.pos + len;
        let padded_end = self.pos + padded_len(len);
        check_padding(&self.bytes[end..padded_end], end, SpkError::MalformedArchive)?;

        let data = &self.bytes[self.pos..end];
        self.pos = padded_end;
        Ok(data)
    }

    /// Read a length-prefixed byte string
    fn read_bytes(&mut self) -> Result<&'a [u8]> {
        let len = self.read_word()?;
        let len = usize::try_from(len)
            .map_err(|_| SpkError::MalformedArchive(format!("length {} out of range", len)))?;
        self.read_padded(len)
    }
}

/// Round up to a whole number of words
pub(crate) fn padded_len(len: usize) -> usize {
    len.div_ceil(WORD_SIZE) * WORD_SIZE
}

pub(crate) fn write_word<W: Write>(writer: &mut W, word: u64) -> io::Result<u64> {
    writer.write_all(&word.to_le_bytes())?;
    Ok(WORD_SIZE as u64)
}

/// Write bytes followed by zero padding up to the next word boundary
pub(crate) fn write_padded<W: Write>(writer: &mut W, bytes: &[u8]) -> io::Result<u64> {
    writer.write_all(bytes)?;
    let padding = padded_len(bytes.len()) - bytes.len();
    writer.write_all(&[0u8; WORD_SIZE][..padding])?;
    Ok((bytes.len() + padding) as u64)
}

/// Write a length word followed by the padded bytes
pub(crate) fn write_bytes<W: Write>(writer: &mut W, bytes: &[u8]) -> io::Result<u64> {
    Ok(write_word(writer, bytes.len() as u64)? + write_padded(writer, bytes)?)
}

/// Read a length-prefixed byte string from a stream.
///
/// Lengths above `max_len` and truncated input are reported through
/// `malformed`, so each record type can surface its own error.
pub(crate) fn read_bytes_from<R: Read>(
    reader: &mut R,
    max_len: usize,
    malformed: fn(String) -> SpkError,
) -> Result<Vec<u8>> {
    let mut word = [0u8; WORD_SIZE];
    read_exact_or(reader, &mut word, malformed)?;
    let len = u64::from_le_bytes(word);

    if len > max_len as u64 {
        return Err(malformed(format!(
            "field length {} exceeds maximum {}",
            len, max_len
        )));
    }

    let len = len as usize;
    let mut data = vec![0u8; padded_len(len)];
    read_exact_or(reader, &mut data, malformed)?;
    check_padding(&data[len..], len, malformed)?;
    data.truncate(len);
    Ok(data)
}

fn check_padding(padding: &[u8], offset: usize, malformed: fn(String) -> SpkError) -> Result<()> {
    match padding.iter().position(|&b| b != 0) {
        Some(i) => Err(malformed(format!(
            "non-zero padding byte at offset {}",
            offset + i
        ))),
        None => Ok(()),
    }
}

fn read_exact_or<R: Read>(
    reader: &mut R,
    buf: &mut [u8],
    malformed: fn(String) -> SpkError,
) -> Result<()> {
    reader.read_exact(buf).map_err(|e| match e.kind() {
        io::ErrorKind::UnexpectedEof => malformed("truncated record".to_string()),
        _ => SpkError::Io(e),
    })
}
