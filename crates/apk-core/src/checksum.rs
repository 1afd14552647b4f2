//! Content digests.
//!
//! Package identity and per-file verification both use the 16-byte digest
//! the wire formats were defined around. The digest of a package is taken
//! over the archive byte stream exactly as fetched.

use std::{
    fmt,
    fs::File,
    io::{self, Read},
    path::Path,
};

use anyhow::{anyhow, Result};
use md5::{Digest, Md5};

pub const CSUM_LEN: usize = 16;

/// A fixed-width content digest.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Checksum([u8; CSUM_LEN]);

impl Checksum {
    #[must_use]
    pub fn from_bytes(bytes: [u8; CSUM_LEN]) -> Self {
        Self(bytes)
    }

    #[must_use]
    pub fn as_bytes(&self) -> &[u8; CSUM_LEN] {
        &self.0
    }

    /// Parse the hex form used by `C:`/`Z:` index fields.
    pub fn parse_hex(text: &str) -> Result<Self> {
        let raw = hex::decode(text.trim()).map_err(|_| anyhow!("Not a valid checksum"))?;
        let bytes: [u8; CSUM_LEN] = raw
            .try_into()
            .map_err(|_| anyhow!("Not a valid checksum"))?;
        Ok(Self(bytes))
    }

    #[must_use]
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl fmt::Debug for Checksum {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl fmt::Display for Checksum {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

/// Digest a byte slice.
#[must_use]
pub fn digest(bytes: &[u8]) -> Checksum {
    Checksum(Md5::digest(bytes).into())
}

/// Digest a file's current on-disk content.
pub fn digest_file(path: &Path) -> io::Result<Checksum> {
    let mut file = File::open(path)?;
    let mut hasher = Md5::new();
    let mut buf = vec![0_u8; 32 * 1024];
    loop {
        let read = file.read(&mut buf)?;
        if read == 0 {
            break;
        }
        hasher.update(&buf[..read]);
    }
    Ok(Checksum(hasher.finalize().into()))
}

/// A reader that digests every byte passing through it.
pub struct ChecksumReader<R> {
    inner: R,
    hasher: Md5,
}

impl<R: Read> ChecksumReader<R> {
    pub fn new(inner: R) -> Self {
        Self {
            inner,
            hasher: Md5::new(),
        }
    }

    /// Drain whatever the consumer left unread and return the digest of the
    /// complete stream.
    pub fn finalize(mut self) -> io::Result<Checksum> {
        io::copy(&mut self, &mut io::sink())?;
        Ok(Checksum(self.hasher.finalize().into()))
    }
}

impl<R: Read> Read for ChecksumReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let read = self.inner.read(buf)?;
        self.hasher.update(&buf[..read]);
        Ok(read)
    }
}
