//! Reusable digest verification jobs.

use gosthash2012::{Digest, State, OUTBYTES_256, OUTBYTES_512};
use std::fs::File;
use std::io;
use std::io::prelude::*;
use std::path::Path;

/// Size of the read buffer file hashing is driven with.
pub const READ_BUF_SIZE: usize = 8 * 1024;

/// The slot state alphabet. A slot cycles INIT -> SUBMITTED -> TAKEN and
/// ends in one of the completion codes, which all carry `COMPLETE_MASK`.
pub mod result {
    pub const INIT: u32 = 0x0000;
    pub const SUBMITTED: u32 = 0x0001;
    pub const TAKEN: u32 = 0x0002;

    pub const COMPLETE_MASK: u32 = 0xFF00;
    pub const MATCH: u32 = 0xFF00;
    pub const MISMATCH: u32 = 0xFF01;
    pub const READ_ERROR: u32 = 0xFF02;
}

/// One verification job: a hash context, the expected digest parsed from a
/// manifest row, and the owned filename buffer. The buffer is lazily
/// allocated by the parser and reused across assignments of its slot.
pub struct Task {
    ctx: State,
    expected: [u8; OUTBYTES_512],
    digest_size: usize,
    filename: Vec<u8>,
}

impl Task {
    pub fn new() -> Task {
        Task {
            ctx: State::new256(),
            expected: [0; OUTBYTES_512],
            digest_size: OUTBYTES_256,
            filename: Vec::new(),
        }
    }

    /// Expected digest width in bytes, 32 or 64.
    pub fn digest_size(&self) -> usize {
        self.digest_size
    }

    pub fn set_digest_size(&mut self, size: usize) {
        debug_assert!(size == OUTBYTES_256 || size == OUTBYTES_512);
        self.digest_size = size;
    }

    /// Decode 64 hex characters into the expected digest starting at byte
    /// `shift`. Mixed case is accepted; anything else is an error.
    pub fn set_expected(&mut self, shift: usize, hex64: &[u8]) -> Result<(), hex::FromHexError> {
        hex::decode_to_slice(hex64, &mut self.expected[shift..shift + hex64.len() / 2])
    }

    /// The meaningful bytes of the expected digest.
    pub fn expected(&self) -> &[u8] {
        &self.expected[..self.digest_size]
    }

    pub fn filename(&self) -> &[u8] {
        &self.filename
    }

    pub fn filename_mut(&mut self) -> &mut Vec<u8> {
        &mut self.filename
    }

    #[cfg(unix)]
    fn path(&self) -> io::Result<&Path> {
        use std::ffi::OsStr;
        use std::os::unix::ffi::OsStrExt;
        Ok(Path::new(OsStr::from_bytes(&self.filename)))
    }

    #[cfg(not(unix))]
    fn path(&self) -> io::Result<&Path> {
        std::str::from_utf8(&self.filename)
            .map(Path::new)
            .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "filename is not valid UTF-8"))
    }

    fn compute(&mut self, buf: &mut [u8]) -> io::Result<Digest> {
        let file = File::open(self.path()?)?;
        self.ctx = if self.digest_size == OUTBYTES_512 {
            State::new512()
        } else {
            State::new256()
        };
        hash_reader(&mut self.ctx, file, buf)
    }

    /// Hash the named file and compare against the expected digest. I/O
    /// failures of any kind become `READ_ERROR`.
    pub fn validate(&mut self, buf: &mut [u8]) -> u32 {
        match self.compute(buf) {
            Ok(digest) => {
                if digest.bytes() == self.expected() {
                    result::MATCH
                } else {
                    result::MISMATCH
                }
            }
            Err(_) => result::READ_ERROR,
        }
    }
}

impl Default for Task {
    fn default() -> Task {
        Task::new()
    }
}

/// Drive the hash with fixed-size reads until EOF, then finalize.
pub fn hash_reader<R: Read>(state: &mut State, mut reader: R, buf: &mut [u8]) -> io::Result<Digest> {
    loop {
        match reader.read(buf) {
            Ok(0) => return Ok(state.finalize()),
            Ok(n) => state.update(&buf[..n]),
            Err(ref err) if err.kind() == io::ErrorKind::Interrupted => {}
            Err(err) => return Err(err),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gosthash2012::{streebog256, streebog512};
    use std::fs;
    use std::io::Cursor;

    fn task_for(path: &Path, expected_hex: &str, size: usize) -> Task {
        let mut task = Task::new();
        task.set_digest_size(size);
        task.set_expected(0, &expected_hex.as_bytes()[..64]).unwrap();
        if size == OUTBYTES_512 {
            task.set_expected(32, &expected_hex.as_bytes()[64..]).unwrap();
        }
        task.filename_mut()
            .extend_from_slice(path.to_string_lossy().as_bytes());
        task
    }

    #[test]
    fn test_hex_decoding() {
        let mut task = Task::new();
        task.set_expected(0, &b"00ff10ab"[..].repeat(8)).unwrap();
        let upper: Vec<u8> = b"00FF10AB"[..].repeat(8);
        let mut other = Task::new();
        other.set_expected(0, &upper).unwrap();
        assert_eq!(task.expected(), other.expected());
        assert!(task.set_expected(0, &[b'z'; 64][..]).is_err());
    }

    #[test]
    fn test_validate_match_and_mismatch() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("payload");
        let content: Vec<u8> = (0..1000u32).map(|i| i as u8).collect();
        fs::write(&path, &content).unwrap();
        let mut buf = [0; READ_BUF_SIZE];

        let good = hex::encode(streebog256(&content).bytes());
        assert_eq!(
            result::MATCH,
            task_for(&path, &good, OUTBYTES_256).validate(&mut buf)
        );

        let long = hex::encode(streebog512(&content).bytes());
        assert_eq!(
            result::MATCH,
            task_for(&path, &long, OUTBYTES_512).validate(&mut buf)
        );

        let mut bad = good.clone().into_bytes();
        bad[0] = if bad[0] == b'0' { b'1' } else { b'0' };
        let bad = String::from_utf8(bad).unwrap();
        assert_eq!(
            result::MISMATCH,
            task_for(&path, &bad, OUTBYTES_256).validate(&mut buf)
        );
    }

    #[test]
    fn test_validate_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("not-there");
        let digest = hex::encode(streebog256(b"").bytes());
        let mut buf = [0; READ_BUF_SIZE];
        assert_eq!(
            result::READ_ERROR,
            task_for(&path, &digest, OUTBYTES_256).validate(&mut buf)
        );
    }

    #[test]
    fn test_hash_reader_equals_oneshot() {
        let content: Vec<u8> = (0..100_000u32).map(|i| (i * 7) as u8).collect();
        let mut state = State::new512();
        let mut buf = [0; READ_BUF_SIZE];
        let digest = hash_reader(&mut state, Cursor::new(&content), &mut buf).unwrap();
        assert!(digest == streebog512(&content));
    }
}
