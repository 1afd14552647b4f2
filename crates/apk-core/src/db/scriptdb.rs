//! The on-disk script store.
//!
//! A flat concatenation of `{checksum, u32 kind, u32 size}` headers, each
//! followed by `size` payload bytes. The checksum keys the owning package;
//! records for unknown packages are skipped over.

use std::io::{self, Read, Write};

use anyhow::{Context, Result};
use tracing::warn;

use super::{Database, Script, ScriptKind};
use crate::checksum::{Checksum, CSUM_LEN};
use crate::error::DbError;

pub(crate) fn read_scripts(db: &mut Database, mut reader: impl Read) -> Result<()> {
    loop {
        let mut csum = [0_u8; CSUM_LEN];
        match reader.read_exact(&mut csum) {
            Ok(()) => {}
            Err(err) if err.kind() == io::ErrorKind::UnexpectedEof => break,
            Err(err) => return Err(err).context("failed to read script store"),
        }
        let mut word = [0_u8; 4];
        reader
            .read_exact(&mut word)
            .context("truncated script store header")?;
        let kind = u32::from_le_bytes(word);
        reader
            .read_exact(&mut word)
            .context("truncated script store header")?;
        let size = u32::from_le_bytes(word) as u64;

        let csum = Checksum::from_bytes(csum);
        let Some(pid) = db.get_pkg(&csum) else {
            let skipped = io::copy(&mut (&mut reader).take(size), &mut io::sink())
                .context("failed to skip script payload")?;
            if skipped != size {
                return Err(DbError::Parse("Truncated script store payload".into()).into());
            }
            continue;
        };

        let mut data = vec![0_u8; size as usize];
        reader
            .read_exact(&mut data)
            .context("truncated script store payload")?;
        match ScriptKind::from_u32(kind) {
            Some(kind) => db.packages[pid.index()].scripts.push(Script { kind, data }),
            None => warn!(kind, "ignoring script of unknown kind"),
        }
    }
    Ok(())
}

pub(crate) fn write_scripts(db: &Database, out: &mut dyn Write) -> Result<()> {
    for &pid in &db.installed {
        let pkg = &db.packages[pid.index()];
        for script in &pkg.scripts {
            out.write_all(pkg.csum.as_bytes())?;
            out.write_all(&script.kind.as_u32().to_le_bytes())?;
            out.write_all(&(script.data.len() as u32).to_le_bytes())?;
            out.write_all(&script.data)?;
        }
    }
    Ok(())
}
