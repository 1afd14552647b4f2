//! Package archive iteration.
//!
//! A package is a gzip-compressed tar stream. [`for_each_entry`] decodes it
//! and hands every entry's metadata plus payload reader to a callback; the
//! underlying reader is returned once the whole archive has been walked so
//! the caller can finish its stream-level checksum.

use std::{
    fs::{self, File},
    io::{self, Read, Write},
    path::Path,
};

use anyhow::{Context, Result};
use flate2::read::GzDecoder;
use md5::{Digest, Md5};
use tar::{Archive, EntryType};

use crate::checksum::Checksum;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EntryKind {
    Directory,
    Regular,
    Other,
}

/// Metadata of a single archive entry.
#[derive(Clone, Debug)]
pub struct EntryInfo {
    pub path: String,
    pub kind: EntryKind,
    pub mode: u32,
    pub uid: u32,
    pub gid: u32,
    pub size: u64,
}

/// Walk a gzip tar stream, invoking `f` per entry. The callback must either
/// consume the payload it cares about or leave it; unread payload bytes are
/// skipped before the next entry. Returns the raw reader after the final
/// entry.
pub fn for_each_entry<R, F>(reader: R, mut f: F) -> Result<R>
where
    R: Read,
    F: FnMut(&EntryInfo, &mut dyn Read) -> Result<()>,
{
    let mut archive = Archive::new(GzDecoder::new(reader));
    for entry in archive.entries().context("failed to read archive")? {
        let mut entry = entry.context("failed to read archive entry")?;
        let header = entry.header();
        let kind = match header.entry_type() {
            EntryType::Directory => EntryKind::Directory,
            EntryType::Regular | EntryType::Continuous => EntryKind::Regular,
            _ => EntryKind::Other,
        };
        let info = EntryInfo {
            path: entry
                .path()
                .context("archive entry has an unreadable path")?
                .to_string_lossy()
                .into_owned(),
            kind,
            mode: header.mode().context("archive entry has no mode")? & 0o7777,
            uid: header.uid().context("archive entry has no uid")? as u32,
            gid: header.gid().context("archive entry has no gid")? as u32,
            size: entry.size(),
        };
        f(&info, &mut entry)?;
    }
    Ok(archive.into_inner().into_inner())
}

/// Extract a regular-file payload to `dest`, returning the payload digest.
/// Ownership changes are best-effort; mode is applied verbatim.
pub fn extract_regular(
    payload: &mut dyn Read,
    dest: &Path,
    mode: u32,
    uid: u32,
    gid: u32,
) -> Result<Checksum> {
    let mut out = File::create(dest)
        .with_context(|| format!("failed to extract to {}", dest.display()))?;
    let mut hasher = Md5::new();
    let mut buf = vec![0_u8; 32 * 1024];
    loop {
        let read = payload
            .read(&mut buf)
            .with_context(|| format!("failed to read payload for {}", dest.display()))?;
        if read == 0 {
            break;
        }
        hasher.update(&buf[..read]);
        out.write_all(&buf[..read])
            .with_context(|| format!("failed to write {}", dest.display()))?;
    }
    drop(out);

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(dest, fs::Permissions::from_mode(mode))
            .with_context(|| format!("failed to set mode on {}", dest.display()))?;
        let _ = std::os::unix::fs::chown(dest, Some(uid), Some(gid));
    }
    #[cfg(not(unix))]
    let _ = (mode, uid, gid);

    Ok(Checksum::from_bytes(hasher.finalize().into()))
}

/// Read an entry payload fully into memory (scripts, package info).
pub fn read_payload(payload: &mut dyn Read, size_hint: u64) -> io::Result<Vec<u8>> {
    let mut data = Vec::with_capacity(size_hint as usize);
    payload.read_to_end(&mut data)?;
    Ok(data)
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::{Compression, GzBuilder};
    use tar::Header;

    fn sample_archive() -> Vec<u8> {
        let encoder = GzBuilder::new().write(Vec::new(), Compression::default());
        let mut builder = tar::Builder::new(encoder);

        let mut header = Header::new_gnu();
        header.set_entry_type(EntryType::Directory);
        header.set_mode(0o755);
        header.set_uid(0);
        header.set_gid(0);
        header.set_size(0);
        builder
            .append_data(&mut header, "usr/", io::empty())
            .unwrap();

        let mut header = Header::new_gnu();
        header.set_entry_type(EntryType::Regular);
        header.set_mode(0o644);
        header.set_uid(0);
        header.set_gid(0);
        header.set_size(5);
        builder
            .append_data(&mut header, "usr/greeting", &b"hello"[..])
            .unwrap();

        builder.finish().unwrap();
        builder.into_inner().unwrap().finish().unwrap()
    }

    #[test]
    fn walks_entries_in_order() -> Result<()> {
        let bytes = sample_archive();
        let mut seen = Vec::new();
        for_each_entry(&bytes[..], |info, payload| {
            let mut content = String::new();
            payload.read_to_string(&mut content)?;
            seen.push((info.path.clone(), info.kind, content));
            Ok(())
        })?;
        assert_eq!(seen.len(), 2);
        assert_eq!(seen[0].0, "usr/");
        assert_eq!(seen[0].1, EntryKind::Directory);
        assert_eq!(seen[1].0, "usr/greeting");
        assert_eq!(seen[1].2, "hello");
        Ok(())
    }

    #[test]
    fn extraction_digests_the_payload() -> Result<()> {
        let temp = tempfile::tempdir()?;
        let dest = temp.path().join("greeting");
        let sum = extract_regular(&mut &b"hello"[..], &dest, 0o644, 0, 0)?;
        assert_eq!(fs::read(&dest)?, b"hello");
        assert_eq!(sum, crate::checksum::digest(b"hello"));
        Ok(())
    }
}
