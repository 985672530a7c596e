//! An implementation of the GOST R 34.11-2012 "Streebog" hash function, in
//! both the 256-bit and 512-bit output variants. The two variants share the
//! same compression function and differ only in their initial chaining value
//! and in how much of the final state is emitted.

use arrayref::array_ref;
use arrayvec::ArrayString;
use byteorder::{ByteOrder, LittleEndian};
use std::cmp;
use std::fmt;

mod portable;

#[cfg(test)]
mod test;

/// The message block size, in bytes.
pub const BLOCKBYTES: usize = 64;
/// The length of a 512-bit digest, in bytes.
pub const OUTBYTES_512: usize = 64;
/// The length of a 256-bit digest, in bytes.
pub const OUTBYTES_256: usize = 32;

pub(crate) type Words = [u64; 8];
pub(crate) type Block = [u8; BLOCKBYTES];

/// Compute the 256-bit Streebog digest of `input` in one shot.
pub fn streebog256(input: &[u8]) -> Digest {
    let mut state = State::new256();
    state.update(input);
    state.finalize()
}

/// Compute the 512-bit Streebog digest of `input` in one shot.
pub fn streebog512(input: &[u8]) -> Digest {
    let mut state = State::new512();
    state.update(input);
    state.finalize()
}

/// An incremental hasher. Obtain one with [`State::new256`] or
/// [`State::new512`], feed it any number of `update` calls, and read the
/// result with `finalize`.
#[derive(Clone)]
pub struct State {
    h: Words,
    n: Words,
    sigma: Words,
    buf: Block,
    buflen: usize,
    digest_length: u8,
}

impl State {
    /// Construct a state for the 256-bit variant.
    pub fn new256() -> Self {
        Self::with_digest_length(OUTBYTES_256 as u8)
    }

    /// Construct a state for the 512-bit variant.
    pub fn new512() -> Self {
        Self::with_digest_length(OUTBYTES_512 as u8)
    }

    fn with_digest_length(digest_length: u8) -> Self {
        let mut state = Self {
            h: [0; 8],
            n: [0; 8],
            sigma: [0; 8],
            buf: [0; BLOCKBYTES],
            buflen: 0,
            digest_length,
        };
        state.reset();
        state
    }

    /// Re-initialize in place, keeping the variant. Equivalent to replacing
    /// the state with a freshly constructed one.
    pub fn reset(&mut self) {
        // The 256-bit variant seeds the chaining value with 0x01 in every
        // byte; the 512-bit variant starts from zero.
        let iv = if self.digest_length == OUTBYTES_256 as u8 {
            0x0101_0101_0101_0101
        } else {
            0
        };
        self.h = [iv; 8];
        self.n = [0; 8];
        self.sigma = [0; 8];
        self.buflen = 0;
    }

    /// The digest length this state produces, in bytes (32 or 64).
    pub fn digest_length(&self) -> usize {
        self.digest_length as usize
    }

    fn fill_buf(&mut self, input: &mut &[u8]) {
        let take = cmp::min(BLOCKBYTES - self.buflen, input.len());
        self.buf[self.buflen..self.buflen + take].copy_from_slice(&input[..take]);
        self.buflen += take;
        *input = &input[take..];
    }

    fn compress(&mut self, block: &Block) {
        let m = portable::words_from_block(block);
        portable::g(&mut self.h, &self.n, &m);
        portable::add512(&mut self.n, &portable::counter(8 * BLOCKBYTES as u64));
        portable::add512(&mut self.sigma, &m);
    }

    /// Add input to the hash. This can be called any number of times.
    pub fn update(&mut self, mut input: &[u8]) {
        // If we have a partial buffer, try to complete it. Unlike hashes
        // whose final block is special, Streebog always finalizes with a
        // padded partial block, so a filled buffer can be compressed at once.
        if self.buflen > 0 {
            self.fill_buf(&mut input);
            if self.buflen == BLOCKBYTES {
                let block = self.buf;
                self.compress(&block);
                self.buflen = 0;
            }
        }
        // Compress whole blocks of input directly instead of buffering them.
        while input.len() >= BLOCKBYTES {
            let block = array_ref!(input, 0, BLOCKBYTES);
            self.compress(block);
            input = &input[BLOCKBYTES..];
        }
        // Buffer any remaining tail of fewer than BLOCKBYTES bytes.
        self.fill_buf(&mut input);
    }

    /// Finish the final hashing step and return a `Digest`. The state is not
    /// consumed: calling `finalize` again gives the same answer, and further
    /// `update` calls continue the stream as if `finalize` never happened.
    pub fn finalize(&self) -> Digest {
        let mut h = self.h;
        let mut n = self.n;
        let mut sigma = self.sigma;

        // Pad the partial block with 0x01 followed by zeros.
        let mut block = [0; BLOCKBYTES];
        block[..self.buflen].copy_from_slice(&self.buf[..self.buflen]);
        block[self.buflen] = 0x01;

        let m = portable::words_from_block(&block);
        portable::g(&mut h, &n, &m);
        portable::add512(&mut n, &portable::counter(8 * self.buflen as u64));
        portable::add512(&mut sigma, &m);

        // Two keyless rounds over the bit counter and the checksum.
        let zero = [0; 8];
        portable::g(&mut h, &zero, &n);
        portable::g(&mut h, &zero, &sigma);

        let mut digest = Digest {
            bytes: [0; OUTBYTES_512],
            len: self.digest_length,
        };
        if self.digest_length == OUTBYTES_256 as u8 {
            // The 256-bit digest is the high half of the chaining value.
            LittleEndian::write_u64_into(&h[4..], &mut digest.bytes[..OUTBYTES_256]);
        } else {
            LittleEndian::write_u64_into(&h, &mut digest.bytes);
        }
        digest
    }
}

impl std::io::Write for State {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.update(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

impl fmt::Debug for State {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "State {{ digest_length: {}, buflen: {} }}",
            self.digest_length, self.buflen
        )
    }
}

/// A finalized Streebog digest.
///
/// `Digest` supports constant-time equality checks, for cases where the hash
/// is being used as part of an authenticator.
#[derive(Clone)]
pub struct Digest {
    bytes: [u8; OUTBYTES_512],
    len: u8,
}

impl Digest {
    /// The meaningful digest bytes: 32 for the 256-bit variant, 64 for the
    /// 512-bit variant.
    pub fn bytes(&self) -> &[u8] {
        &self.bytes[..self.len as usize]
    }

    /// Convert the digest to a lowercase hexadecimal `String`.
    pub fn hex(&self) -> ArrayString<[u8; 2 * OUTBYTES_512]> {
        let mut s = ArrayString::new();
        let table = b"0123456789abcdef";
        for &b in self.bytes() {
            s.push(table[(b >> 4) as usize] as char);
            s.push(table[(b & 0xf) as usize] as char);
        }
        s
    }
}

/// This implementation is constant time, if the two digests are the same
/// length.
impl PartialEq for Digest {
    fn eq(&self, other: &Digest) -> bool {
        constant_time_eq::constant_time_eq(&self.bytes(), &other.bytes())
    }
}

impl Eq for Digest {}

impl AsRef<[u8]> for Digest {
    fn as_ref(&self) -> &[u8] {
        self.bytes()
    }
}

impl fmt::Debug for Digest {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "Digest({})", self.hex())
    }
}
