//! The in-memory data model.
//!
//! Entities live in arenas owned by the [`Database`](super::Database) and
//! refer to each other through typed indices. Files participate in two
//! ordered lists at once (the files of their directory and the files of
//! their owning package); both are index-linked chains with head and tail
//! kept on the owning entity so appends preserve insertion order in O(1).

use std::path::PathBuf;

use crate::checksum::Checksum;

#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub struct NameId(pub(crate) u32);

#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub struct PkgId(pub(crate) u32);

#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub struct DirId(pub(crate) u32);

#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub struct FileId(pub(crate) u32);

impl NameId {
    #[inline]
    pub(crate) fn index(self) -> usize {
        self.0 as usize
    }
}

impl PkgId {
    #[inline]
    pub(crate) fn index(self) -> usize {
        self.0 as usize
    }
}

impl DirId {
    #[inline]
    pub(crate) fn index(self) -> usize {
        self.0 as usize
    }
}

impl FileId {
    #[inline]
    pub(crate) fn index(self) -> usize {
        self.0 as usize
    }
}

/// A package name, holding every known version of it.
#[derive(Debug)]
pub struct Name {
    pub name: String,
    pub pkgs: Vec<PkgId>,
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum PackageState {
    Available,
    Installed,
}

/// A dependency on a name, optionally pinned to an exact version.
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct Dependency {
    pub name: NameId,
    pub version: Option<String>,
}

/// One concrete version of a name, content-addressed by its checksum.
#[derive(Debug)]
pub struct Package {
    pub name: NameId,
    pub version: String,
    pub arch: Option<String>,
    pub description: Option<String>,
    pub url: Option<String>,
    pub license: Option<String>,
    /// Compressed archive size in bytes.
    pub size: u64,
    pub installed_size: u64,
    pub depends: Vec<Dependency>,
    pub csum: Checksum,
    /// Bitmask of repository slots that carry this package.
    pub repos: u32,
    /// Registration sequence number.
    pub id: u32,
    pub state: PackageState,
    /// Local archive path, when the package was added from a file.
    pub filename: Option<PathBuf>,
    pub scripts: Vec<Script>,
    pub(crate) files_head: Option<FileId>,
    pub(crate) files_tail: Option<FileId>,
}

/// An interned directory path (no trailing slash; the root is "").
#[derive(Debug)]
pub struct Directory {
    pub dirname: String,
    pub mode: u32,
    pub uid: u32,
    pub gid: u32,
    pub protected: bool,
    pub parent: Option<DirId>,
    /// Live references: one per owned file, plus one per child directory
    /// holding references, plus the permanent root pin.
    pub refs: u32,
    pub(crate) files_head: Option<FileId>,
    pub(crate) files_tail: Option<FileId>,
}

/// A filesystem entry owned by at most one package at a time.
#[derive(Debug)]
pub struct FileSlot {
    pub name: String,
    pub dir: DirId,
    pub owner: Option<PkgId>,
    pub csum: Option<Checksum>,
    pub(crate) next_in_dir: Option<FileId>,
    pub(crate) next_in_pkg: Option<FileId>,
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum ScriptKind {
    PreInstall,
    PostInstall,
    PreDeinstall,
    PostDeinstall,
    PreUpgrade,
    PostUpgrade,
    /// A combined script dispatching on the phase argument.
    Generic,
}

impl ScriptKind {
    #[must_use]
    pub fn as_u32(self) -> u32 {
        match self {
            Self::PreInstall => 0,
            Self::PostInstall => 1,
            Self::PreDeinstall => 2,
            Self::PostDeinstall => 3,
            Self::PreUpgrade => 4,
            Self::PostUpgrade => 5,
            Self::Generic => 6,
        }
    }

    #[must_use]
    pub fn from_u32(value: u32) -> Option<Self> {
        match value {
            0 => Some(Self::PreInstall),
            1 => Some(Self::PostInstall),
            2 => Some(Self::PreDeinstall),
            3 => Some(Self::PostDeinstall),
            4 => Some(Self::PreUpgrade),
            5 => Some(Self::PostUpgrade),
            6 => Some(Self::Generic),
            _ => None,
        }
    }

    /// Phase name as passed to scripts and used in archive metadata paths.
    #[must_use]
    pub fn phase_name(self) -> &'static str {
        match self {
            Self::PreInstall => "pre-install",
            Self::PostInstall => "post-install",
            Self::PreDeinstall => "pre-deinstall",
            Self::PostDeinstall => "post-deinstall",
            Self::PreUpgrade => "pre-upgrade",
            Self::PostUpgrade => "post-upgrade",
            Self::Generic => "generic",
        }
    }

    #[must_use]
    pub fn from_phase_name(name: &str) -> Option<Self> {
        match name {
            "pre-install" => Some(Self::PreInstall),
            "post-install" => Some(Self::PostInstall),
            "pre-deinstall" => Some(Self::PreDeinstall),
            "post-deinstall" => Some(Self::PostDeinstall),
            "pre-upgrade" => Some(Self::PreUpgrade),
            "post-upgrade" => Some(Self::PostUpgrade),
            _ => None,
        }
    }
}

/// Executable payload attached to a package.
#[derive(Clone, Debug)]
pub struct Script {
    pub kind: ScriptKind,
    pub data: Vec<u8>,
}

/// A configured repository; the slot index doubles as a bit position in
/// each package's `repos` mask.
#[derive(Clone, Debug)]
pub struct Repository {
    pub url: String,
}

/// Counters over the installed state.
#[derive(Clone, Copy, Default, Debug, PartialEq, Eq)]
pub struct Stats {
    pub packages: usize,
    pub dirs: usize,
    pub files: usize,
}
