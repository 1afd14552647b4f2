//! The install engine.
//!
//! One call of [`Database::install_pkg`] performs a single transition:
//! remove (`old` only), fresh install (`new` only) or upgrade (both). The
//! archive stream drives everything: metadata entries become scripts (and
//! the pre-phase script runs the moment it is seen), directory entries
//! record metadata, regular entries are claimed and extracted. Filesystem
//! mutation is not rolled back on failure; the in-memory state stays
//! consistent with whatever was done.

use std::{
    io::{Read, Write},
    process::Command,
};

use anyhow::{Context, Result};
use tracing::{debug, warn};

use super::{Database, DirId, PackageState, PkgId, Script, ScriptKind};
use crate::archive::{self, EntryInfo, EntryKind};
use crate::checksum;
use crate::error::DbError;
use crate::fetch;

struct InstallCtx {
    pkg: PkgId,
    /// The pre-phase of the current transition.
    script: ScriptKind,
    dircache: Option<DirId>,
}

impl Database {
    /// Drive one package transition.
    pub fn install_pkg(&mut self, oldpkg: Option<PkgId>, newpkg: Option<PkgId>) -> Result<()> {
        if let Some(old) = oldpkg {
            if newpkg.is_none() {
                self.run_script(old, ScriptKind::PreDeinstall)?;
            }
            self.purge_pkg(old);
            if newpkg.is_none() {
                if let Err(err) = self.run_script(old, ScriptKind::PostDeinstall) {
                    warn!("{:#}", err);
                }
                return Ok(());
            }
        }
        let Some(new) = newpkg else {
            return Ok(());
        };

        let source = match &self.packages[new.index()].filename {
            Some(path) => path.display().to_string(),
            None => {
                let pkg = &self.packages[new.index()];
                let repo = self
                    .repos
                    .first()
                    .context("no repository configured to fetch from")?;
                format!(
                    "{}/{}-{}.apk",
                    repo.url,
                    self.names[pkg.name.index()].name,
                    pkg.version
                )
            }
        };

        let stream = fetch::open_stream(&source)?;
        let mut ctx = InstallCtx {
            pkg: new,
            script: if oldpkg.is_some() {
                ScriptKind::PreUpgrade
            } else {
                ScriptKind::PreInstall
            },
            dircache: None,
        };
        let stream = archive::for_each_entry(stream, |info, payload| {
            self.install_entry(&mut ctx, info, payload)
        })
        .with_context(|| format!("{source}: install failed"))?;
        let actual = stream.finalize()?;

        self.set_pkg_state(new, PackageState::Installed);

        if actual != self.packages[new.index()].csum {
            warn!("{}: checksum does not match", self.pkg_ident(new));
        }

        let post = if oldpkg.is_some() {
            ScriptKind::PostUpgrade
        } else {
            ScriptKind::PostInstall
        };
        self.run_script(new, post)?;

        if self.quiet {
            print!(".");
            let _ = std::io::stdout().flush();
        }
        Ok(())
    }

    /// Disown and delete every file of `pkg`, releasing directory
    /// references. Locally modified files under protected directories stay
    /// on disk so user configuration survives the package.
    pub(crate) fn purge_pkg(&mut self, pkg: PkgId) {
        let mut files = Vec::new();
        let mut cursor = self.packages[pkg.index()].files_head;
        while let Some(fid) = cursor {
            files.push(fid);
            cursor = self.files[fid.index()].next_in_pkg;
        }

        for fid in files {
            let dir = self.files[fid.index()].dir;
            if let Ok(path) = self.fs_path(dir, &self.files[fid.index()].name) {
                let keep = self.dirs[dir.index()].protected
                    && match self.files[fid.index()].csum {
                        Some(stored) => checksum::digest_file(&path)
                            .map(|disk| disk != stored)
                            .unwrap_or(false),
                        None => false,
                    };
                if keep {
                    debug!(path = %path.display(), "keeping locally modified file");
                } else {
                    let _ = std::fs::remove_file(&path);
                }
            }

            let file = &mut self.files[fid.index()];
            file.owner = None;
            file.next_in_pkg = None;
            self.dir_unref(dir);
            self.stats.files -= 1;
        }

        let entry = &mut self.packages[pkg.index()];
        entry.files_head = None;
        entry.files_tail = None;
        self.set_pkg_state(pkg, PackageState::Available);
    }

    fn install_entry(
        &mut self,
        ctx: &mut InstallCtx,
        info: &EntryInfo,
        payload: &mut dyn Read,
    ) -> Result<()> {
        let name = info.path.trim_start_matches("./");
        if name.is_empty() {
            return Ok(());
        }

        if let Some(kind) = self.classify_script(ctx.pkg, name) {
            let data = archive::read_payload(payload, info.size)
                .with_context(|| format!("failed to read script {name}"))?;
            self.packages[ctx.pkg.index()]
                .scripts
                .push(Script { kind, data });
            if kind == ScriptKind::Generic || kind == ctx.script {
                self.run_script(ctx.pkg, ctx.script)?;
            }
            return Ok(());
        }
        if name.starts_with('.') || name.starts_with("var/db/apk/") {
            // Unrecognized metadata entries are not installable content.
            return Ok(());
        }

        match info.kind {
            EntryKind::Directory => {
                let dir = self.dir_get(name);
                let entry = &mut self.dirs[dir.index()];
                entry.mode = info.mode & 0o7777;
                entry.uid = info.uid;
                entry.gid = info.gid;
            }
            EntryKind::Regular => {
                let fid = self.file_get(name, &mut ctx.dircache);
                let file = &self.files[fid.index()];
                if let Some(owner) = file.owner {
                    let owner_name = self.packages[owner.index()].name;
                    let pkg_name = self.packages[ctx.pkg.index()].name;
                    if owner_name != pkg_name
                        && self.names[owner_name.index()].name != "busybox"
                    {
                        return Err(DbError::Conflict {
                            pkg: self.names[pkg_name.index()].name.clone(),
                            path: name.to_string(),
                            owner: self.names[owner_name.index()].name.clone(),
                        }
                        .into());
                    }
                }

                self.file_set_owner(fid, ctx.pkg, true);

                let file = &self.files[fid.index()];
                if file.name.starts_with(".keep_") {
                    return Ok(());
                }

                let dest = self.fs_path(file.dir, &file.name)?;
                let diverted = self.dirs[file.dir.index()].protected
                    && match file.csum {
                        Some(stored) => checksum::digest_file(&dest)
                            .map(|disk| disk != stored)
                            .unwrap_or(false),
                        None => false,
                    };
                let target = if diverted {
                    let mut diverted_path = dest.into_os_string();
                    diverted_path.push(".apk-new");
                    debug!(path = name, "diverting modified protected file");
                    diverted_path.into()
                } else {
                    dest
                };
                let sum =
                    archive::extract_regular(payload, &target, info.mode, info.uid, info.gid)?;
                self.files[fid.index()].csum = Some(sum);
            }
            EntryKind::Other => {
                debug!(entry = name, "skipping unsupported archive entry type");
            }
        }
        Ok(())
    }

    /// Classify a metadata entry name as a script. The combined-format
    /// `.INSTALL` is generic; the per-phase form lives at
    /// `var/db/apk/<name>/<version>/<phase>` and must match the package
    /// being installed.
    fn classify_script(&self, pkg: PkgId, name: &str) -> Option<ScriptKind> {
        if name == ".INSTALL" {
            return Some(ScriptKind::Generic);
        }
        let rest = name.strip_prefix("var/db/apk/")?;
        let mut parts = rest.splitn(3, '/');
        let (pkg_name, version, phase) = (parts.next()?, parts.next()?, parts.next()?);
        let entry = &self.packages[pkg.index()];
        if pkg_name != self.names[entry.name.index()].name || version != entry.version {
            return None;
        }
        ScriptKind::from_phase_name(phase)
    }

    /// Execute the script for `phase` on this package, if there is one. A
    /// phase-specific script wins over a generic one; the phase name is
    /// passed as the single argument and the database root is the working
    /// directory.
    pub(crate) fn run_script(&self, pkg: PkgId, phase: ScriptKind) -> Result<()> {
        let entry = &self.packages[pkg.index()];
        let script = entry
            .scripts
            .iter()
            .find(|s| s.kind == phase)
            .or_else(|| entry.scripts.iter().find(|s| s.kind == ScriptKind::Generic));
        let Some(script) = script else {
            return Ok(());
        };
        let root = self.root.as_ref().ok_or(DbError::NoRoot)?;

        let mut tmp = tempfile::Builder::new()
            .prefix(".apk-script-")
            .tempfile()
            .context("failed to create script scratch file")?;
        tmp.write_all(&script.data)
            .context("failed to write script scratch file")?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(tmp.path(), std::fs::Permissions::from_mode(0o755))
                .context("failed to mark script executable")?;
        }
        // Close our handle before exec; a script held open is not runnable.
        let tmp = tmp.into_temp_path();

        debug!(pkg = %self.pkg_ident(pkg), phase = phase.phase_name(), "running script");
        let status = Command::new(tmp.as_os_str())
            .arg(phase.phase_name())
            .current_dir(root)
            .status()
            .with_context(|| format!("{}: failed to spawn {} script", self.pkg_ident(pkg), phase.phase_name()))?;
        if !status.success() {
            return Err(DbError::Script {
                pkg: self.pkg_ident(pkg),
                phase: phase.phase_name(),
                status: status.code().unwrap_or(-1),
            }
            .into());
        }
        Ok(())
    }
}
