//! Byte streams for package archives and repository indexes.
//!
//! A stream is opened from an HTTP(S) URL or a local path and digests every
//! byte read through it; [`ByteStream::finalize`] drains the remainder and
//! yields the digest of the complete stream, which is what package content
//! checksums are defined over.

use std::{fs::File, io::Read, time::Duration};

use anyhow::{Context, Result};
use reqwest::blocking::Client;

use crate::checksum::{Checksum, ChecksumReader};

const USER_AGENT: &str = concat!("apk/", env!("CARGO_PKG_VERSION"));
const HTTP_TIMEOUT: Duration = Duration::from_secs(120);

pub struct ByteStream {
    inner: ChecksumReader<Box<dyn Read>>,
}

impl ByteStream {
    /// Digest of the complete stream, draining any unread tail first.
    pub fn finalize(self) -> Result<Checksum> {
        self.inner
            .finalize()
            .context("failed to drain package stream")
    }
}

impl Read for ByteStream {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        self.inner.read(buf)
    }
}

fn http_client() -> Result<Client> {
    Client::builder()
        .user_agent(USER_AGENT)
        .timeout(HTTP_TIMEOUT)
        .build()
        .context("failed to build http client")
}

/// Open a checksumming stream over `url`, which is either an `http(s)://`
/// location or a filesystem path.
pub fn open_stream(url: &str) -> Result<ByteStream> {
    let inner: Box<dyn Read> = if url.starts_with("http://") || url.starts_with("https://") {
        let response = http_client()?
            .get(url)
            .send()
            .and_then(reqwest::blocking::Response::error_for_status)
            .with_context(|| format!("failed to fetch {url}"))?;
        Box::new(response)
    } else {
        Box::new(File::open(url).with_context(|| format!("failed to open {url}"))?)
    };
    Ok(ByteStream {
        inner: ChecksumReader::new(inner),
    })
}
