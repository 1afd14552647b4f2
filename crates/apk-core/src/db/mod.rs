//! The installed-state database.
//!
//! A [`Database`] joins four entity arenas (names, packages, directories,
//! files) behind hash indexes, tracks the ordered set of installed packages
//! and the user's world of top-level dependencies, and owns the root
//! filesystem everything is materialized into. Opening a root loads the
//! world, the installed front database and the script store; closing is
//! dropping; [`Database::write_config`] persists the current state.

use std::{
    collections::HashMap,
    fs::{self, File},
    io::{BufRead, BufReader, BufWriter, Write},
    path::{Path, PathBuf},
};

use anyhow::{Context, Result};
use flate2::read::GzDecoder;
use tracing::debug;

mod dirs;
mod fdb;
mod install;
mod model;
mod scriptdb;

#[cfg(test)]
mod tests;

pub use model::{
    Dependency, Directory, DirId, FileId, FileSlot, Name, NameId, Package, PackageState, PkgId,
    Repository, Script, ScriptKind, Stats,
};

use crate::checksum::Checksum;
use crate::error::DbError;
use crate::fetch;

const WORLD_PATH: &str = "var/lib/apk/world";
const INSTALLED_PATH: &str = "var/lib/apk/installed";
const SCRIPTS_PATH: &str = "var/lib/apk/scripts";
const REPOS_CONFIG_PATH: &str = "etc/apk/repositories";
const INDEX_FILENAME: &str = "APK_INDEX.gz";

/// Colon-separated protected-path rules applied in order; a leading `-`
/// clears protection for an exact path.
const PROTECTED_PATHS: &str = "etc:-etc/init.d";

/// Dependencies seeded into the world of a freshly created root.
const BASE_WORLD: &str = "busybox, alpine-baselayout, apk-tools, alpine-conf";

pub const MAX_REPOS: usize = 32;

/// How to open a database.
#[derive(Clone, Default, Debug)]
pub struct DbOptions {
    /// Root filesystem; `None` opens a detached database for index work.
    pub root: Option<PathBuf>,
    /// Extra repository registered after the configured ones.
    pub repository: Option<String>,
    /// Suppress chatter; successful installs print a progress dot.
    pub quiet: bool,
}

#[derive(Debug)]
pub struct Database {
    pub(crate) names: Vec<Name>,
    pub(crate) name_index: HashMap<String, NameId>,
    pub(crate) packages: Vec<Package>,
    pub(crate) pkg_index: HashMap<Checksum, PkgId>,
    pub(crate) dirs: Vec<Directory>,
    pub(crate) dir_index: HashMap<String, DirId>,
    pub(crate) files: Vec<FileSlot>,
    /// Installed packages in installation order.
    pub(crate) installed: Vec<PkgId>,
    pub(crate) protected_paths: Vec<String>,
    pub(crate) repos: Vec<Repository>,
    pub(crate) world: Vec<Dependency>,
    pub(crate) stats: Stats,
    pub(crate) root: Option<PathBuf>,
    pub(crate) quiet: bool,
    pkg_id_seq: u32,
}

impl Database {
    /// Initialize a root filesystem: the baseline directory skeleton, a
    /// `dev/null` node (best-effort; requires privileges) and the seed
    /// world.
    pub fn create(root: &Path) -> Result<()> {
        fs::create_dir_all(root)
            .with_context(|| format!("failed to create root {}", root.display()))?;
        mkdir_mode(&root.join("tmp"), 0o1777)?;
        mkdir_mode(&root.join("dev"), 0o755)?;
        make_dev_null(&root.join("dev/null"));
        mkdir_mode(&root.join("var"), 0o755)?;
        mkdir_mode(&root.join("var/lib"), 0o755)?;
        mkdir_mode(&root.join("var/lib/apk"), 0o755)?;

        write_atomic(&root.join(WORLD_PATH), |out| {
            writeln!(out, "{BASE_WORLD}")?;
            Ok(())
        })
        .context("failed to seed world")?;
        Ok(())
    }

    /// Open a database, loading state from the root (when given) and every
    /// configured repository index.
    pub fn open(options: DbOptions) -> Result<Self> {
        let mut db = Self {
            names: Vec::with_capacity(1000),
            name_index: HashMap::with_capacity(1000),
            packages: Vec::with_capacity(4000),
            pkg_index: HashMap::with_capacity(4000),
            dirs: Vec::with_capacity(1000),
            dir_index: HashMap::with_capacity(1000),
            files: Vec::new(),
            installed: Vec::new(),
            protected_paths: PROTECTED_PATHS.split(':').map(str::to_string).collect(),
            repos: Vec::new(),
            world: Vec::new(),
            stats: Stats::default(),
            root: options.root,
            quiet: options.quiet,
            pkg_id_seq: 0,
        };

        if db.root.is_some() {
            db.read_state()?;

            let repos_path = db.root.as_ref().map(|root| root.join(REPOS_CONFIG_PATH));
            if let Some(repos_path) = repos_path.filter(|path| path.exists()) {
                let file = File::open(&repos_path)
                    .with_context(|| format!("failed to read {}", repos_path.display()))?;
                let urls: Vec<String> = BufReader::new(file)
                    .lines()
                    .collect::<Result<_, _>>()
                    .with_context(|| format!("failed to read {}", repos_path.display()))?;
                for url in urls {
                    let url = url.trim();
                    if !url.is_empty() {
                        db.add_repository(url)?;
                    }
                }
            }
        }

        if let Some(url) = options.repository {
            db.add_repository(&url)?;
        }
        Ok(db)
    }

    fn read_state(&mut self) -> Result<()> {
        let root = self.root.clone().ok_or(DbError::NoRoot)?;

        let world = fs::read_to_string(root.join(WORLD_PATH))
            .map_err(|_| DbError::UninitializedRoot(root.clone()))?;
        self.world = self.deps_parse(&world);

        let installed = root.join(INSTALLED_PATH);
        if installed.exists() {
            let file = File::open(&installed)
                .with_context(|| format!("failed to open {}", installed.display()))?;
            fdb::read_index(self, BufReader::new(file), None)
                .context("failed to load installed database")?;
        }

        let scripts = root.join(SCRIPTS_PATH);
        if scripts.exists() {
            let file = File::open(&scripts)
                .with_context(|| format!("failed to open {}", scripts.display()))?;
            scriptdb::read_scripts(self, BufReader::new(file))
                .context("failed to load script store")?;
        }
        Ok(())
    }

    /// Register a repository in the next free slot and load its index.
    pub fn add_repository(&mut self, url: &str) -> Result<()> {
        if self.repos.len() >= MAX_REPOS {
            return Err(DbError::RepositoryLimit { max: MAX_REPOS }.into());
        }
        let slot = self.repos.len();
        self.repos.push(Repository {
            url: url.to_string(),
        });

        let index_url = format!("{url}/{INDEX_FILENAME}");
        let stream = fetch::open_stream(&index_url)
            .with_context(|| format!("Failed to open index file {index_url}"))?;
        fdb::read_index(self, BufReader::new(GzDecoder::new(stream)), Some(slot))
            .with_context(|| format!("failed to load index {index_url}"))?;
        debug!(url, slot, "repository registered");
        Ok(())
    }

    /// Register a package archive from the local filesystem. Its content
    /// checksum is computed from the file and its identity parsed from the
    /// `.PKGINFO` entry.
    pub fn pkg_add_file(&mut self, path: &Path) -> Result<PkgId> {
        let location = path
            .to_str()
            .with_context(|| format!("package path {} is not UTF-8", path.display()))?;
        let stream = fetch::open_stream(location)?;

        let mut info_text: Option<String> = None;
        let stream = crate::archive::for_each_entry(stream, |info, payload| {
            if info.path.trim_start_matches("./") == ".PKGINFO" && info_text.is_none() {
                let data = crate::archive::read_payload(payload, info.size)?;
                info_text = Some(
                    String::from_utf8(data)
                        .map_err(|_| DbError::Parse("Package info is not UTF-8".into()))?,
                );
            }
            Ok(())
        })
        .with_context(|| format!("{location}: failed to read package"))?;
        let csum = stream.finalize()?;

        let text = info_text
            .ok_or_else(|| DbError::Parse(format!("{location}: package info entry missing")))?;
        let mut builder = fdb::PkgBuilder::default();
        for line in text.lines() {
            if line.len() < 2 || line.as_bytes()[1] != b':' {
                continue;
            }
            let field = line.as_bytes()[0] as char;
            if !fdb::parse_info_field(self, &mut builder, field, &line[2..])? {
                return Err(
                    DbError::Parse(format!("Invalid package info entry '{field}'")).into(),
                );
            }
        }
        let name = builder
            .name
            .clone()
            .ok_or_else(|| DbError::Parse(format!("{location}: package info has no name")))?;

        if let Some(existing) = self.get_pkg(&csum) {
            self.packages[existing.index()].filename = Some(path.to_path_buf());
            return Ok(existing);
        }
        let name_id = self.get_name(&name);
        let id = self.register_pkg(Package {
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
            repos: 0,
            id: 0,
            state: PackageState::Available,
            filename: Some(path.to_path_buf()),
            scripts: Vec::new(),
            files_head: None,
            files_tail: None,
        });
        Ok(id)
    }

    /// Re-solve the world, apply the resulting changes and persist.
    pub fn recalculate_and_commit(&mut self) -> Result<Stats> {
        let world = self.world.clone();
        let changes =
            crate::solver::solve(self, &world).context("Failed to build installation graph")?;
        for change in changes {
            self.install_pkg(change.old, change.new)
                .context("Failed to commit changes")?;
        }
        self.write_config()?;
        debug!(
            "OK: {} packages, {} dirs, {} files",
            self.stats.packages, self.stats.dirs, self.stats.files
        );
        Ok(self.stats)
    }

    /// Persist world, installed database and script store, each rewritten
    /// whole and swapped into place.
    pub fn write_config(&self) -> Result<()> {
        let Some(root) = &self.root else {
            return Ok(());
        };
        write_atomic(&root.join(WORLD_PATH), |out| {
            writeln!(out, "{}", self.deps_format(&self.world))?;
            Ok(())
        })?;
        write_atomic(&root.join(INSTALLED_PATH), |out| fdb::write_fdb(self, out))?;
        write_atomic(&root.join(SCRIPTS_PATH), |out| {
            scriptdb::write_scripts(self, out)
        })?;
        Ok(())
    }

    /// Emit an index record for every registered package.
    pub fn index_write(&self, out: &mut dyn Write) -> Result<()> {
        for (idx, pkg) in self.packages.iter().enumerate() {
            if self.pkg_index.get(&pkg.csum) != Some(&PkgId(idx as u32)) {
                continue;
            }
            fdb::write_info(self, pkg, out)?;
            out.write_all(b"\n")?;
        }
        Ok(())
    }

    // ---- entity registration and lookup ----

    pub(crate) fn get_name(&mut self, name: &str) -> NameId {
        if let Some(&id) = self.name_index.get(name) {
            return id;
        }
        let id = NameId(self.names.len() as u32);
        self.names.push(Name {
            name: name.to_string(),
            pkgs: Vec::new(),
        });
        self.name_index.insert(name.to_string(), id);
        id
    }

    #[must_use]
    pub fn query_name(&self, name: &str) -> Option<NameId> {
        self.name_index.get(name).copied()
    }

    #[must_use]
    pub fn get_pkg(&self, csum: &Checksum) -> Option<PkgId> {
        self.pkg_index.get(csum).copied()
    }

    pub(crate) fn register_pkg(&mut self, mut pkg: Package) -> PkgId {
        pkg.id = self.pkg_id_seq;
        self.pkg_id_seq += 1;
        let id = PkgId(self.packages.len() as u32);
        self.names[pkg.name.index()].pkgs.push(id);
        self.pkg_index.insert(pkg.csum, id);
        self.packages.push(pkg);
        id
    }

    /// The installed package of a name, if any.
    #[must_use]
    pub fn installed_pkg(&self, name: NameId) -> Option<PkgId> {
        self.names[name.index()]
            .pkgs
            .iter()
            .copied()
            .find(|&id| self.packages[id.index()].state == PackageState::Installed)
    }

    pub(crate) fn set_pkg_state(&mut self, id: PkgId, state: PackageState) {
        let current = self.packages[id.index()].state;
        match state {
            PackageState::Installed if current != PackageState::Installed => {
                self.packages[id.index()].state = PackageState::Installed;
                self.installed.push(id);
                self.stats.packages += 1;
            }
            PackageState::Available if current == PackageState::Installed => {
                self.packages[id.index()].state = PackageState::Available;
                self.installed.retain(|&p| p != id);
                self.stats.packages -= 1;
            }
            _ => {}
        }
        debug!(pkg = %self.pkg_ident(id), ?state, "package state");
    }

    // ---- file ownership ----

    /// Transfer a file to `owner`. A first owner counts the file and
    /// references its directory; a takeover carries the existing directory
    /// reference along with the file.
    pub(crate) fn file_set_owner(&mut self, fid: FileId, owner: PkgId, create_on_disk: bool) {
        match self.files[fid.index()].owner {
            Some(previous) => self.pkg_files_remove(previous, fid),
            None => {
                self.stats.files += 1;
                let dir = self.files[fid.index()].dir;
                self.dir_ref(dir, create_on_disk);
            }
        }
        self.files[fid.index()].owner = Some(owner);
        self.pkg_files_append(owner, fid);
    }

    fn pkg_files_append(&mut self, pkg: PkgId, fid: FileId) {
        self.files[fid.index()].next_in_pkg = None;
        match self.packages[pkg.index()].files_tail {
            Some(tail) => {
                self.files[tail.index()].next_in_pkg = Some(fid);
                self.packages[pkg.index()].files_tail = Some(fid);
            }
            None => {
                let entry = &mut self.packages[pkg.index()];
                entry.files_head = Some(fid);
                entry.files_tail = Some(fid);
            }
        }
    }

    fn pkg_files_remove(&mut self, pkg: PkgId, fid: FileId) {
        let mut prev: Option<FileId> = None;
        let mut cursor = self.packages[pkg.index()].files_head;
        while let Some(current) = cursor {
            if current == fid {
                break;
            }
            prev = Some(current);
            cursor = self.files[current.index()].next_in_pkg;
        }
        if cursor != Some(fid) {
            return;
        }
        let next = self.files[fid.index()].next_in_pkg;
        match prev {
            Some(prev) => self.files[prev.index()].next_in_pkg = next,
            None => self.packages[pkg.index()].files_head = next,
        }
        if self.packages[pkg.index()].files_tail == Some(fid) {
            self.packages[pkg.index()].files_tail = prev;
        }
        self.files[fid.index()].next_in_pkg = None;
    }

    // ---- dependencies and the world ----

    /// Parse a `", "`-separated dependency list; each entry is a name with
    /// an optional `=version` pin.
    pub(crate) fn deps_parse(&mut self, text: &str) -> Vec<Dependency> {
        text.split(',')
            .map(str::trim)
            .filter(|token| !token.is_empty())
            .map(|token| match token.split_once('=') {
                Some((name, version)) => Dependency {
                    name: self.get_name(name),
                    version: Some(version.to_string()),
                },
                None => Dependency {
                    name: self.get_name(token),
                    version: None,
                },
            })
            .collect()
    }

    #[must_use]
    pub(crate) fn deps_format(&self, deps: &[Dependency]) -> String {
        deps.iter()
            .map(|dep| {
                let name = &self.names[dep.name.index()].name;
                match &dep.version {
                    Some(version) => format!("{name}={version}"),
                    None => name.clone(),
                }
            })
            .collect::<Vec<_>>()
            .join(", ")
    }

    /// Add or re-pin a world dependency.
    pub fn world_add(&mut self, name: &str, version: Option<String>) {
        let id = self.get_name(name);
        match self.world.iter_mut().find(|dep| dep.name == id) {
            Some(dep) => dep.version = version,
            None => self.world.push(Dependency { name: id, version }),
        }
    }

    /// Drop a world dependency; returns whether it was present.
    pub fn world_del(&mut self, name: &str) -> bool {
        let Some(id) = self.query_name(name) else {
            return false;
        };
        let before = self.world.len();
        self.world.retain(|dep| dep.name != id);
        self.world.len() != before
    }

    // ---- small accessors ----

    #[must_use]
    pub fn stats(&self) -> Stats {
        self.stats
    }

    #[must_use]
    pub fn installed(&self) -> &[PkgId] {
        &self.installed
    }

    #[must_use]
    pub fn package(&self, id: PkgId) -> &Package {
        &self.packages[id.index()]
    }

    #[must_use]
    pub fn name(&self, id: NameId) -> &Name {
        &self.names[id.index()]
    }

    #[must_use]
    pub fn repositories(&self) -> &[Repository] {
        &self.repos
    }

    pub(crate) fn pkg_ident(&self, id: PkgId) -> String {
        let pkg = &self.packages[id.index()];
        format!("{}-{}", self.names[pkg.name.index()].name, pkg.version)
    }

    pub(crate) fn fs_path(&self, dir: DirId, name: &str) -> Result<PathBuf> {
        let root = self.root.as_ref().ok_or(DbError::NoRoot)?;
        let dirname = &self.dirs[dir.index()].dirname;
        Ok(if dirname.is_empty() {
            root.join(name)
        } else {
            root.join(dirname).join(name)
        })
    }
}

fn mkdir_mode(path: &Path, mode: u32) -> Result<()> {
    match fs::create_dir(path) {
        Ok(()) => {}
        Err(err) if err.kind() == std::io::ErrorKind::AlreadyExists => {}
        Err(err) => {
            return Err(err).with_context(|| format!("failed to create {}", path.display()))
        }
    }
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(path, fs::Permissions::from_mode(mode))
            .with_context(|| format!("failed to set mode on {}", path.display()))?;
    }
    #[cfg(not(unix))]
    let _ = mode;
    Ok(())
}

/// Best-effort `dev/null` character node; creating one needs privileges
/// and an unprivileged root is still usable for everything but devices.
fn make_dev_null(path: &Path) {
    #[cfg(unix)]
    {
        use std::os::unix::ffi::OsStrExt;
        if let Ok(cpath) = std::ffi::CString::new(path.as_os_str().as_bytes()) {
            unsafe {
                libc::mknod(cpath.as_ptr(), libc::S_IFCHR | 0o666, libc::makedev(1, 3));
            }
        }
    }
    #[cfg(not(unix))]
    let _ = path;
}

/// Rewrite a state file whole: write a sibling, fsync, swap into place.
fn write_atomic(path: &Path, write: impl FnOnce(&mut dyn Write) -> Result<()>) -> Result<()> {
    let mut tmp = path.as_os_str().to_os_string();
    tmp.push(".tmp");
    let tmp = PathBuf::from(tmp);

    let mut out = BufWriter::new(
        File::create(&tmp).with_context(|| format!("failed to create {}", tmp.display()))?,
    );
    write(&mut out)?;
    out.flush()
        .with_context(|| format!("failed to write {}", tmp.display()))?;
    let file = out
        .into_inner()
        .with_context(|| format!("failed to write {}", tmp.display()))?;
    file.sync_all()
        .with_context(|| format!("failed to sync {}", tmp.display()))?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(&tmp, fs::Permissions::from_mode(0o600))
            .with_context(|| format!("failed to set mode on {}", tmp.display()))?;
    }
    fs::rename(&tmp, path)
        .with_context(|| format!("failed to replace {}", path.display()))?;
    Ok(())
}
