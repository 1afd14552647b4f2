//! The directory table.
//!
//! Directories are interned by full path without a trailing slash; the root
//! is the empty path and is pinned alive for as long as the database knows
//! it. Reference counts track live usage (one per owned file, one per
//! referencing child directory) and drive on-disk creation and removal at
//! the 0→1 and 1→0 edges.

use std::fs;

use tracing::debug;

use super::{Database, DirId, Directory, FileId, FileSlot};

impl Database {
    /// Intern `path`, resolving the parent chain lazily. Flags inherit from
    /// the parent and are then adjusted by the ordered protected-path
    /// rules: a `-` prefixed rule clears protection on exact match, a plain
    /// rule sets it.
    pub(crate) fn dir_get(&mut self, path: &str) -> DirId {
        let path = path.strip_suffix('/').unwrap_or(path);
        if let Some(&id) = self.dir_index.get(path) {
            return id;
        }

        let parent = if path.is_empty() {
            None
        } else {
            Some(match path.rsplit_once('/') {
                Some((parent, _)) => self.dir_get(parent),
                None => self.dir_get(""),
            })
        };

        let mut protected = parent.map(|p| self.dirs[p.index()].protected).unwrap_or(false);
        for rule in &self.protected_paths {
            if let Some(cleared) = rule.strip_prefix('-') {
                if cleared == path {
                    protected = false;
                }
            } else if rule == path {
                protected = true;
            }
        }

        let id = DirId(self.dirs.len() as u32);
        // The root is pinned: it always exists on disk and never hits the
        // 1→0 edge, so it is counted from the moment it is interned.
        let refs = if path.is_empty() { 1 } else { 0 };
        if refs > 0 {
            self.stats.dirs += 1;
        }
        self.dirs.push(Directory {
            dirname: path.to_string(),
            mode: 0,
            uid: 0,
            gid: 0,
            protected,
            parent,
            refs,
            files_head: None,
            files_tail: None,
        });
        self.dir_index.insert(path.to_string(), id);
        id
    }

    /// Take a reference. The 0→1 edge references the parent chain first,
    /// counts the directory, and materializes it on disk when requested and
    /// a mode is known.
    pub(crate) fn dir_ref(&mut self, id: DirId, create_on_disk: bool) {
        if self.dirs[id.index()].refs == 0 {
            if let Some(parent) = self.dirs[id.index()].parent {
                self.dir_ref(parent, create_on_disk);
            }
            self.stats.dirs += 1;
            let dir = &self.dirs[id.index()];
            if create_on_disk && dir.mode != 0 {
                if let Some(root) = &self.root {
                    let path = root.join(&dir.dirname);
                    let _ = fs::create_dir(&path);
                    #[cfg(unix)]
                    {
                        use std::os::unix::fs::PermissionsExt;
                        let _ = fs::set_permissions(&path, fs::Permissions::from_mode(dir.mode));
                        let _ = std::os::unix::fs::chown(&path, Some(dir.uid), Some(dir.gid));
                    }
                }
            }
        }
        self.dirs[id.index()].refs += 1;
    }

    /// Drop a reference. The 1→0 edge uncounts the directory, removes it on
    /// disk best-effort (a populated directory simply stays), and releases
    /// the parent.
    pub(crate) fn dir_unref(&mut self, id: DirId) {
        let dir = &mut self.dirs[id.index()];
        dir.refs -= 1;
        if dir.refs > 0 {
            return;
        }

        self.stats.dirs -= 1;
        if let Some(root) = &self.root {
            let _ = fs::remove_dir(root.join(&self.dirs[id.index()].dirname));
        }
        debug!(dir = %self.dirs[id.index()].dirname, "directory released");

        if let Some(parent) = self.dirs[id.index()].parent {
            self.dir_unref(parent);
        }
    }

    /// Find or create the file `basename` inside `dir`. New files are
    /// appended to the directory chain; ownership is attached separately.
    pub(crate) fn dir_file_get(&mut self, dir: DirId, basename: &str) -> FileId {
        let mut cursor = self.dirs[dir.index()].files_head;
        while let Some(fid) = cursor {
            let file = &self.files[fid.index()];
            if file.name == basename {
                return fid;
            }
            cursor = file.next_in_dir;
        }

        let fid = FileId(self.files.len() as u32);
        self.files.push(FileSlot {
            name: basename.to_string(),
            dir,
            owner: None,
            csum: None,
            next_in_dir: None,
            next_in_pkg: None,
        });
        match self.dirs[dir.index()].files_tail {
            Some(tail) => {
                self.files[tail.index()].next_in_dir = Some(fid);
                self.dirs[dir.index()].files_tail = Some(fid);
            }
            None => {
                let dir = &mut self.dirs[dir.index()];
                dir.files_head = Some(fid);
                dir.files_tail = Some(fid);
            }
        }
        fid
    }

    /// Split a full path into its directory and basename, interning the
    /// directory. `dircache` is a one-slot memo for the run-of-files-per-
    /// directory pattern archives produce.
    pub(crate) fn file_get(&mut self, path: &str, dircache: &mut Option<DirId>) -> FileId {
        let (dirname, basename) = match path.rsplit_once('/') {
            Some((dirname, basename)) => (dirname, basename),
            None => ("", path),
        };

        let dir = match *dircache {
            Some(cached) if self.dirs[cached.index()].dirname == dirname => cached,
            _ => {
                let dir = self.dir_get(dirname);
                *dircache = Some(dir);
                dir
            }
        };
        self.dir_file_get(dir, basename)
    }
}
