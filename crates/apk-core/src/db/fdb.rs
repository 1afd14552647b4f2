//! The front database and repository index format.
//!
//! Both are the same UTF-8 line format, `<letter>:<value>`, with records
//! separated by blank lines. Repository indexes carry only the package-info
//! fields; the installed database additionally serializes the ownership
//! graph with `F` (directory), `M` (directory metadata), `R` (file) and `Z`
//! (file checksum) lines, which attach to the most recent opening line in
//! strict order.

use std::io::{BufRead, Write};

use anyhow::{Context, Result};
use tracing::debug;

use super::{Database, DirId, FileId, Package, PackageState};
use crate::checksum::Checksum;
use crate::error::DbError;

#[derive(Default)]
pub(crate) struct PkgBuilder {
    pub(crate) name: Option<String>,
    pub(crate) version: String,
    pub(crate) arch: Option<String>,
    pub(crate) description: Option<String>,
    pub(crate) url: Option<String>,
    pub(crate) license: Option<String>,
    pub(crate) size: u64,
    pub(crate) installed_size: u64,
    pub(crate) depends: Vec<super::Dependency>,
    pub(crate) csum: Option<Checksum>,
    files: Vec<FileId>,
}

fn parse_err(message: impl Into<String>) -> anyhow::Error {
    DbError::Parse(message.into()).into()
}

/// Handle one package-info field shared between the installed database and
/// repository indexes. Returns false when the letter is not an info field.
pub(crate) fn parse_info_field(
    db: &mut Database,
    builder: &mut PkgBuilder,
    field: char,
    value: &str,
) -> Result<bool> {
    match field {
        'P' => builder.name = Some(value.to_string()),
        'V' => builder.version = value.to_string(),
        'A' => builder.arch = Some(value.to_string()),
        'S' => {
            builder.size = value
                .parse()
                .map_err(|_| parse_err(format!("Invalid size field '{value}'")))?;
        }
        'I' => {
            builder.installed_size = value
                .parse()
                .map_err(|_| parse_err(format!("Invalid size field '{value}'")))?;
        }
        'T' => builder.description = Some(value.to_string()),
        'U' => builder.url = Some(value.to_string()),
        'L' => builder.license = Some(value.to_string()),
        'C' => {
            builder.csum =
                Some(Checksum::parse_hex(value).map_err(|_| parse_err("Not a valid checksum"))?);
        }
        'D' => builder.depends = db.deps_parse(value),
        _ => return Ok(false),
    }
    Ok(true)
}

/// Read one index stream into the database. `repo` is the repository slot
/// the stream describes, or `None` when loading the installed database.
pub(crate) fn read_index(
    db: &mut Database,
    reader: impl BufRead,
    repo: Option<usize>,
) -> Result<()> {
    let mut builder: Option<PkgBuilder> = None;
    let mut dir: Option<DirId> = None;
    let mut file: Option<FileId> = None;

    for line in reader.lines() {
        let line = line.context("failed to read index stream")?;

        if line.len() < 2 || line.as_bytes()[1] != b':' {
            if let Some(done) = builder.take() {
                finish_record(db, done, repo)?;
            }
            continue;
        }

        let field = line.as_bytes()[0] as char;
        let value = &line[2..];

        if builder.is_none() {
            dir = None;
            file = None;
        }
        let record = builder.get_or_insert_with(PkgBuilder::default);

        if parse_info_field(db, record, field, value)? {
            continue;
        }

        if repo.is_some() {
            return Err(parse_err(format!("Invalid index entry '{field}'")));
        }

        match field {
            'F' => {
                if record.name.is_none() {
                    return Err(parse_err("FDB directory entry before package entry"));
                }
                dir = Some(db.dir_get(value));
                file = None;
            }
            'M' => {
                let Some(dir) = dir else {
                    return Err(parse_err(
                        "FDB directory metadata entry before directory entry",
                    ));
                };
                let mut fields = value.splitn(3, ':');
                let uid = fields.next().and_then(|v| v.parse().ok());
                let gid = fields.next().and_then(|v| v.parse().ok());
                let mode = fields
                    .next()
                    .and_then(|v| u32::from_str_radix(v, 8).ok());
                let (Some(uid), Some(gid), Some(mode)) = (uid, gid, mode) else {
                    return Err(parse_err(format!("Invalid directory metadata '{value}'")));
                };
                let entry = &mut db.dirs[dir.index()];
                entry.uid = uid;
                entry.gid = gid;
                entry.mode = mode;
            }
            'R' => {
                let Some(dir) = dir else {
                    return Err(parse_err("FDB file entry before directory entry"));
                };
                let fid = db.dir_file_get(dir, value);
                record.files.push(fid);
                file = Some(fid);
            }
            'Z' => {
                let Some(file) = file else {
                    return Err(parse_err("FDB checksum entry before file entry"));
                };
                let sum = Checksum::parse_hex(value)
                    .map_err(|_| parse_err("Not a valid checksum"))?;
                db.files[file.index()].csum = Some(sum);
            }
            other => {
                return Err(parse_err(format!("FDB entry '{other}' unsupported")));
            }
        }
    }

    if let Some(done) = builder.take() {
        finish_record(db, done, repo)?;
    }
    Ok(())
}

/// Register one completed record. Repository records fold into an existing
/// package by checksum; a duplicate record in the installed database is a
/// corrupt state and fatal.
fn finish_record(db: &mut Database, builder: PkgBuilder, repo: Option<usize>) -> Result<()> {
    let Some(name) = builder.name.clone() else {
        return Err(parse_err("Package record without a name"));
    };
    let Some(csum) = builder.csum else {
        return Err(parse_err(format!("Package record for {name} without a checksum")));
    };

    let repos = repo.map(|slot| 1_u32 << slot).unwrap_or(0);
    if let Some(existing) = db.get_pkg(&csum) {
        if repo.is_none() {
            return Err(parse_err("Installed database load failed"));
        }
        db.packages[existing.index()].repos |= repos;
        debug!(name = %name, "merged duplicate index record");
        return Ok(());
    }

    let name_id = db.get_name(&name);
    let files = builder.files;
    let pkg = Package {
        name: name_id,
        version: builder.version,
        arch: builder.arch,
        description: builder.description,
        url: builder.url,
        license: builder.license,
        size: builder.size,
        installed_size: builder.installed_size,
        depends: builder.depends,
        csum,
        repos,
        id: 0,
        state: PackageState::Available,
        filename: None,
        scripts: Vec::new(),
        files_head: None,
        files_tail: None,
    };
    let pid = db.register_pkg(pkg);

    if repo.is_none() {
        db.set_pkg_state(pid, PackageState::Installed);
        for fid in files {
            db.file_set_owner(fid, pid, false);
        }
    }
    Ok(())
}

/// Emit the shared package-info block.
pub(crate) fn write_info(db: &Database, pkg: &Package, out: &mut dyn Write) -> Result<()> {
    writeln!(out, "P:{}", db.names[pkg.name.index()].name)?;
    writeln!(out, "V:{}", pkg.version)?;
    if let Some(arch) = &pkg.arch {
        writeln!(out, "A:{arch}")?;
    }
    writeln!(out, "S:{}", pkg.size)?;
    writeln!(out, "I:{}", pkg.installed_size)?;
    if let Some(description) = &pkg.description {
        writeln!(out, "T:{description}")?;
    }
    if let Some(url) = &pkg.url {
        writeln!(out, "U:{url}")?;
    }
    if let Some(license) = &pkg.license {
        writeln!(out, "L:{license}")?;
    }
    writeln!(out, "C:{}", pkg.csum)?;
    if !pkg.depends.is_empty() {
        writeln!(out, "D:{}", db.deps_format(&pkg.depends))?;
    }
    Ok(())
}

/// Serialize the installed database in installation order. Files are
/// grouped under `F`/`M` headers as runs of a shared directory, which is
/// the order installation produced them in.
pub(crate) fn write_fdb(db: &Database, out: &mut dyn Write) -> Result<()> {
    for &pid in &db.installed {
        let pkg = &db.packages[pid.index()];
        write_info(db, pkg, out)?;

        let mut current: Option<DirId> = None;
        let mut cursor = pkg.files_head;
        while let Some(fid) = cursor {
            let file = &db.files[fid.index()];
            cursor = file.next_in_pkg;
            if file.owner != Some(pid) {
                continue;
            }
            if current != Some(file.dir) {
                current = Some(file.dir);
                let dir = &db.dirs[file.dir.index()];
                writeln!(out, "F:{}", dir.dirname)?;
                writeln!(out, "M:{}:{}:{:o}", dir.uid, dir.gid, dir.mode)?;
            }
            writeln!(out, "R:{}", file.name)?;
            if let Some(csum) = file.csum {
                writeln!(out, "Z:{csum}")?;
            }
        }
        out.write_all(b"\n")?;
    }
    Ok(())
}
