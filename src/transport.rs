//! Compression transport
//!
//! Everything after the magic number of a package is one compressed stream.
//! The stream is produced and consumed either in process with zstd, or by an
//! external compressor such as `xz` running as a child process connected to
//! us by a pipe:
//!
//! ```text
//! pack:   us --pipe--> [program -zc] --> package file
//! unpack: package file --> [program -dc] --pipe--> us
//! ```
//!
//! A child's exit status is only checked after its pipe has been closed, and
//! a non-zero exit or death by signal fails the whole operation.
//!
//! zstd frames are written with fixed parameters, so every package starts its
//! stream with the same frame header. The decoder does not interpret every
//! header bit and the frame checksum only covers content, so anything other
//! than that exact header is rejected before decoding.

use crate::error::{Result, SpkError};
use serde::Deserialize;
use std::fs::File;
use std::io::{self, BufReader, Read, Seek, SeekFrom, Write};
use std::os::unix::process::ExitStatusExt;
use std::process::{Child, ChildStdin, ChildStdout, Command, ExitStatus, Stdio};
use tracing::{debug, warn};

/// Default zstd level for the in-process compressor
pub const DEFAULT_ZSTD_LEVEL: i32 = 12;

/// zstd window size as a power of two, fixed for every level
pub const ZSTD_WINDOW_LOG: u32 = 23;

/// The frame header our encoder settings produce: magic number, a descriptor
/// with only the checksum flag set, then the window descriptor. No content
/// size, no dictionary ID.
pub const ZSTD_FRAME_HEADER: [u8; 6] = [
    0x28,
    0xB5,
    0x2F,
    0xFD,
    0x04,
    ((ZSTD_WINDOW_LOG - 10) << 3) as u8,
];

/// How the package stream is compressed
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "method", rename_all = "lowercase")]
pub enum Compression {
    /// In-process zstd
    Zstd {
        #[serde(default = "default_zstd_level")]
        level: i32,
    },
    /// External program run as `<program> -zc` / `<program> -dc`
    External { program: String },
}

fn default_zstd_level() -> i32 {
    DEFAULT_ZSTD_LEVEL
}

impl Default for Compression {
    fn default() -> Self {
        Compression::Zstd {
            level: DEFAULT_ZSTD_LEVEL,
        }
    }
}

impl Compression {
    /// Shorthand for the `xz` external compressor
    pub fn xz() -> Self {
        Compression::External {
            program: "xz".to_string(),
        }
    }

    /// Start compressing into `output`, which is written from its current
    /// position onward.
    pub fn compressor(&self, output: File) -> Result<Compressor> {
        match self {
            Compression::Zstd { level } => {
                let mut encoder = zstd::stream::write::Encoder::new(output, *level)?;
                encoder.include_checksum(true)?;
                encoder.include_contentsize(false)?;
                encoder.include_dictid(false)?;
                encoder.window_log(ZSTD_WINDOW_LOG)?;
                Ok(Compressor::Zstd(encoder))
            }
            Compression::External { program } => {
                let child = ChildProcess::spawn(program, "-zc", output, Direction::Output)?;
                Ok(Compressor::Child(child))
            }
        }
    }

    /// Start decompressing `input` from its current position onward.
    ///
    /// For zstd the frame header is checked here, before any decoding.
    pub fn decompressor(&self, mut input: File) -> Result<Decompressor> {
        match self {
            Compression::Zstd { .. } => {
                check_zstd_header(&mut input)?;
                let decoder = zstd::stream::read::Decoder::new(input)?.single_frame();
                Ok(Decompressor::Zstd(decoder))
            }
            Compression::External { program } => {
                let child = ChildProcess::spawn(program, "-dc", input, Direction::Input)?;
                Ok(Decompressor::Child(child))
            }
        }
    }
}

/// Writable end of a compression stream
pub enum Compressor {
    Zstd(zstd::stream::write::Encoder<'static, File>),
    Child(ChildProcess),
}

impl Compressor {
    /// Flush the stream to the output file and, for a child process, wait for
    /// it and check how it exited.
    pub fn finish(self) -> Result<()> {
        match self {
            Compressor::Zstd(encoder) => {
                let mut file = encoder.finish()?;
                file.flush()?;
                Ok(())
            }
            Compressor::Child(child) => child.wait(),
        }
    }

    /// Give up after `err`. If a child compressor has failed, its exit status
    /// is the real cause and is returned instead.
    pub fn fail(self, err: SpkError) -> SpkError {
        match self {
            Compressor::Zstd(_) => err,
            // A write error means the child closed its stdin, so waiting
            // for it cannot block on us.
            Compressor::Child(child) => child.fail(err),
        }
    }
}

impl Write for Compressor {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self {
            Compressor::Zstd(encoder) => encoder.write(buf),
            Compressor::Child(child) => child.write(buf),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match self {
            Compressor::Zstd(encoder) => encoder.flush(),
            Compressor::Child(child) => child.flush(),
        }
    }
}

/// Readable end of a decompression stream
pub enum Decompressor {
    Zstd(zstd::stream::read::Decoder<'static, BufReader<File>>),
    Child(ChildProcess),
}

impl Decompressor {
    /// Close the stream and, for a child process, wait for it and check how
    /// it exited. Call this only after reading to end of stream.
    ///
    /// zstd input must end with the frame.
    pub fn finish(self) -> Result<()> {
        match self {
            Decompressor::Zstd(decoder) => {
                let mut rest = decoder.finish();
                let mut byte = [0u8; 1];
                if rest.read(&mut byte)? != 0 {
                    return Err(SpkError::DecompressionFailed(
                        "trailing data after compressed stream".to_string(),
                    ));
                }
                Ok(())
            }
            Decompressor::Child(child) => child.wait(),
        }
    }

    /// Give up after `err`. If a child decompressor already ended its output
    /// and failed, its exit status is the real cause and is returned instead.
    pub fn fail(self, err: SpkError) -> SpkError {
        match self {
            Decompressor::Zstd(_) => err,
            // Still producing output: the child is healthy and `err` stands.
            // Dropping it closes the pipe and reaps it.
            Decompressor::Child(child) if !child.reached_eof => err,
            Decompressor::Child(child) => child.fail(err),
        }
    }
}

/// Read and compare the zstd frame header, leaving `input` where it started
fn check_zstd_header(input: &mut File) -> Result<()> {
    let mut header = [0u8; ZSTD_FRAME_HEADER.len()];
    input.read_exact(&mut header).map_err(|e| match e.kind() {
        io::ErrorKind::UnexpectedEof => {
            SpkError::DecompressionFailed("compressed stream too short".to_string())
        }
        _ => SpkError::Io(e),
    })?;

    if header != ZSTD_FRAME_HEADER {
        return Err(SpkError::DecompressionFailed(format!(
            "unexpected zstd frame header {}",
            hex::encode(header)
        )));
    }

    input.seek(SeekFrom::Current(-(header.len() as i64)))?;
    Ok(())
}

impl Read for Decompressor {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self {
            Decompressor::Zstd(decoder) => decoder.read(buf),
            Decompressor::Child(child) => child.read(buf),
        }
    }
}

/// Which way bytes flow through the child
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// We write to the child's stdin; its stdout goes to the wrapped file
    Output,
    /// The child reads the wrapped file on stdin; we read its stdout
    Input,
}

enum Pipe {
    Stdin(ChildStdin),
    Stdout(ChildStdout),
}

/// A child process wrapping a file, with one pipe end held by us
///
/// Dropping the process without calling [`ChildProcess::wait`] still closes
/// the pipe and reaps the child, but can only log a failure.
pub struct ChildProcess {
    program: String,
    child: Child,
    pipe: Option<Pipe>,
    reached_eof: bool,
}

impl ChildProcess {
    /// Run `program flag`, connecting `wrapped` to the side of the child
    /// that `direction` does not give to us.
    pub fn spawn(program: &str, flag: &str, wrapped: File, direction: Direction) -> Result<Self> {
        let mut command = Command::new(program);
        command.arg(flag).stderr(Stdio::inherit());

        match direction {
            Direction::Output => {
                command.stdin(Stdio::piped()).stdout(Stdio::from(wrapped));
            }
            Direction::Input => {
                command.stdin(Stdio::from(wrapped)).stdout(Stdio::piped());
            }
        }

        let mut child = command.spawn().map_err(|source| SpkError::Spawn {
            program: program.to_string(),
            source,
        })?;
        // The Command still holds our copy of the wrapped descriptor
        drop(command);

        let pipe = match direction {
            Direction::Output => child.stdin.take().map(Pipe::Stdin),
            Direction::Input => child.stdout.take().map(Pipe::Stdout),
        };

        debug!("Spawned {} {} (pid {})", program, flag, child.id());

        Ok(Self {
            program: program.to_string(),
            child,
            pipe,
            reached_eof: false,
        })
    }

    /// Close our end of the pipe, wait for the child and check its status.
    pub fn wait(mut self) -> Result<()> {
        self.pipe = None;
        let status = self.child.wait()?;
        debug!("{} exited with {}", self.program, status);
        check_status(&self.program, status)
    }

    /// Wait for the child after `err` and prefer its failure status, if any.
    fn fail(self, err: SpkError) -> SpkError {
        match self.wait() {
            Err(status @ (SpkError::ChildFailed { .. } | SpkError::ChildCrashed { .. })) => status,
            Err(wait_err) => {
                warn!("{}", wait_err);
                err
            }
            Ok(()) => err,
        }
    }

    fn closed_pipe() -> io::Error {
        io::Error::new(io::ErrorKind::BrokenPipe, "child process pipe is closed")
    }
}

impl Write for ChildProcess {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match &mut self.pipe {
            Some(Pipe::Stdin(stdin)) => stdin.write(buf),
            _ => Err(Self::closed_pipe()),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match &mut self.pipe {
            Some(Pipe::Stdin(stdin)) => stdin.flush(),
            _ => Ok(()),
        }
    }
}

impl Read for ChildProcess {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match &mut self.pipe {
            Some(Pipe::Stdout(stdout)) => {
                let n = stdout.read(buf)?;
                if n == 0 && !buf.is_empty() {
                    self.reached_eof = true;
                }
                Ok(n)
            }
            _ => Err(Self::closed_pipe()),
        }
    }
}

impl Drop for ChildProcess {
    fn drop(&mut self) {
        // Close the pipe first, in case the child is waiting on it.
        if self.pipe.take().is_none() {
            return;
        }
        match self.child.wait() {
            Ok(status) => {
                if let Err(e) = check_status(&self.program, status) {
                    warn!("{}", e);
                }
            }
            Err(e) => warn!("Failed to wait for {}: {}", self.program, e),
        }
    }
}

fn check_status(program: &str, status: ExitStatus) -> Result<()> {
    if status.success() {
        return Ok(());
    }

    if let Some(code) = status.code() {
        Err(SpkError::ChildFailed {
            program: program.to_string(),
            code,
        })
    } else if let Some(signal) = status.signal() {
        Err(SpkError::ChildCrashed {
            program: program.to_string(),
            signal,
        })
    } else {
        Err(SpkError::ChildFailed {
            program: program.to_string(),
            code: -1,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{Seek, SeekFrom};

    fn roundtrip(compression: &Compression, data: &[u8]) -> Vec<u8> {
        let mut file = tempfile::tempfile().unwrap();

        let mut compressor = compression.compressor(file.try_clone().unwrap()).unwrap();
        compressor.write_all(data).unwrap();
        compressor.finish().unwrap();

        file.seek(SeekFrom::Start(0)).unwrap();
        let mut decompressor = compression.decompressor(file).unwrap();
        let mut output = Vec::new();
        decompressor.read_to_end(&mut output).unwrap();
        decompressor.finish().unwrap();
        output
    }

    #[test]
    fn test_zstd_transport() {
        let data = b"compress me ".repeat(1000);
        assert_eq!(roundtrip(&Compression::default(), &data), data);
    }

    fn zstd_stream(data: &[u8]) -> Vec<u8> {
        let mut file = tempfile::tempfile().unwrap();
        let mut compressor = Compression::default()
            .compressor(file.try_clone().unwrap())
            .unwrap();
        compressor.write_all(data).unwrap();
        compressor.finish().unwrap();

        let mut bytes = Vec::new();
        file.seek(SeekFrom::Start(0)).unwrap();
        file.read_to_end(&mut bytes).unwrap();
        bytes
    }

    fn decompress(bytes: &[u8]) -> Result<Vec<u8>> {
        let mut file = tempfile::tempfile().unwrap();
        file.write_all(bytes).unwrap();
        file.seek(SeekFrom::Start(0)).unwrap();

        let mut decompressor = Compression::default().decompressor(file)?;
        let mut output = Vec::new();
        decompressor.read_to_end(&mut output)?;
        decompressor.finish()?;
        Ok(output)
    }

    #[test]
    fn test_zstd_frame_header_is_fixed() {
        for level in [1, DEFAULT_ZSTD_LEVEL, 19] {
            let compression = Compression::Zstd { level };
            let mut file = tempfile::tempfile().unwrap();
            let mut compressor = compression.compressor(file.try_clone().unwrap()).unwrap();
            compressor.write_all(b"tiny").unwrap();
            compressor.finish().unwrap();

            let mut header = [0u8; 6];
            file.seek(SeekFrom::Start(0)).unwrap();
            file.read_exact(&mut header).unwrap();
            assert_eq!(header, ZSTD_FRAME_HEADER, "level {}", level);
        }

        let bytes = zstd_stream(&vec![7u8; 100_000]);
        assert_eq!(&bytes[..6], &ZSTD_FRAME_HEADER);
    }

    #[test]
    fn test_zstd_header_bits_are_checked() {
        let data = b"header bits".to_vec();
        let bytes = zstd_stream(&data);
        assert_eq!(decompress(&bytes).unwrap(), data);

        for i in 0..ZSTD_FRAME_HEADER.len() {
            for bit in 0..8 {
                let mut tampered = bytes.clone();
                tampered[i] ^= 1 << bit;
                assert!(
                    matches!(decompress(&tampered), Err(SpkError::DecompressionFailed(_))),
                    "flip of bit {} in header byte {} was accepted",
                    bit,
                    i
                );
            }
        }
    }

    #[test]
    fn test_zstd_stream_must_end_with_frame() {
        let data = b"one frame only".to_vec();
        let mut bytes = zstd_stream(&data);
        bytes.push(0);
        assert!(matches!(
            decompress(&bytes),
            Err(SpkError::DecompressionFailed(_))
        ));

        // A second frame is trailing data too
        let mut doubled = zstd_stream(&data);
        doubled.extend(zstd_stream(&data));
        assert!(matches!(
            decompress(&doubled),
            Err(SpkError::DecompressionFailed(_))
        ));

        assert!(matches!(
            decompress(&bytes[..4]),
            Err(SpkError::DecompressionFailed(_))
        ));
    }

    #[test]
    fn test_external_passthrough_transport() {
        // `cat` would read the flag as a file name, so drop it in a wrapper
        let dir = tempfile::tempdir().unwrap();
        let script = dir.path().join("passthrough");
        std::fs::write(&script, "#!/bin/sh\nexec cat\n").unwrap();
        std::fs::set_permissions(
            &script,
            std::os::unix::fs::PermissionsExt::from_mode(0o755),
        )
        .unwrap();

        let compression = Compression::External {
            program: script.to_string_lossy().into_owned(),
        };
        let data = b"through a pipe and back".to_vec();
        assert_eq!(roundtrip(&compression, &data), data);
    }

    #[test]
    fn test_missing_program_fails_to_spawn() {
        let compression = Compression::External {
            program: "/nonexistent/compressor".to_string(),
        };
        let file = tempfile::tempfile().unwrap();
        assert!(matches!(
            compression.compressor(file),
            Err(SpkError::Spawn { .. })
        ));
    }

    #[test]
    fn test_child_failure_is_reported() {
        let file = tempfile::tempfile().unwrap();
        let child = ChildProcess::spawn("false", "-dc", file, Direction::Input).unwrap();
        assert!(matches!(
            child.wait(),
            Err(SpkError::ChildFailed { code: 1, .. })
        ));
    }

    #[test]
    fn test_child_signal_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let script = dir.path().join("crash");
        std::fs::write(&script, "#!/bin/sh\nkill -9 $$\n").unwrap();
        std::fs::set_permissions(
            &script,
            std::os::unix::fs::PermissionsExt::from_mode(0o755),
        )
        .unwrap();

        let file = tempfile::tempfile().unwrap();
        let child = ChildProcess::spawn(script.to_str().unwrap(), "-dc", file, Direction::Input)
            .unwrap();
        assert!(matches!(
            child.wait(),
            Err(SpkError::ChildCrashed { signal: 9, .. })
        ));
    }

    #[test]
    fn test_compression_from_toml() {
        let zstd: Compression = toml::from_str("method = \"zstd\"\nlevel = 3").unwrap();
        assert_eq!(zstd, Compression::Zstd { level: 3 });

        let default_level: Compression = toml::from_str("method = \"zstd\"").unwrap();
        assert_eq!(default_level, Compression::default());

        let xz: Compression = toml::from_str("method = \"external\"\nprogram = \"xz\"").unwrap();
        assert_eq!(xz, Compression::xz());
    }
}
