use std::{fs, io::Write as _, path::Path};

use anyhow::Result;
use flate2::{Compression, GzBuilder};
use tar::{EntryType, Header};
use tempfile::tempdir;

use super::*;
use crate::checksum;
use crate::error::DbError;

enum Fixture<'a> {
    Dir(&'a str, u32),
    File(&'a str, u32, &'a [u8]),
}

fn build_archive(entries: &[Fixture<'_>]) -> Vec<u8> {
    let encoder = GzBuilder::new().write(Vec::new(), Compression::default());
    let mut builder = tar::Builder::new(encoder);
    for entry in entries {
        let mut header = Header::new_gnu();
        header.set_uid(0);
        header.set_gid(0);
        header.set_mtime(0);
        match entry {
            Fixture::Dir(path, mode) => {
                header.set_entry_type(EntryType::Directory);
                header.set_mode(*mode);
                header.set_size(0);
                builder
                    .append_data(&mut header, path, std::io::empty())
                    .expect("append dir");
            }
            Fixture::File(path, mode, content) => {
                header.set_entry_type(EntryType::Regular);
                header.set_mode(*mode);
                header.set_size(content.len() as u64);
                builder
                    .append_data(&mut header, path, *content)
                    .expect("append file");
            }
        }
    }
    builder.finish().expect("finish tar");
    builder
        .into_inner()
        .expect("finish tar")
        .finish()
        .expect("finish gzip")
}

fn index_record(name: &str, version: &str, csum: &crate::Checksum, deps: &str) -> String {
    let mut record = format!("P:{name}\nV:{version}\nS:0\nI:0\nC:{csum}\n");
    if !deps.is_empty() {
        record.push_str(&format!("D:{deps}\n"));
    }
    record.push('\n');
    record
}

struct RepoPkg<'a> {
    name: &'a str,
    version: &'a str,
    archive: Vec<u8>,
    deps: &'a str,
    /// Overrides the declared checksum; the real digest otherwise.
    declared: Option<crate::Checksum>,
}

fn write_repo(repo: &Path, packages: &[RepoPkg<'_>]) -> Result<()> {
    fs::create_dir_all(repo)?;
    let mut index = String::new();
    for pkg in packages {
        let csum = pkg.declared.unwrap_or_else(|| checksum::digest(&pkg.archive));
        fs::write(
            repo.join(format!("{}-{}.apk", pkg.name, pkg.version)),
            &pkg.archive,
        )?;
        index.push_str(&index_record(pkg.name, pkg.version, &csum, pkg.deps));
    }
    let mut gz = GzBuilder::new().write(Vec::new(), Compression::default());
    gz.write_all(index.as_bytes())?;
    fs::write(repo.join("APK_INDEX.gz"), gz.finish()?)?;
    Ok(())
}

fn repo_pkg<'a>(name: &'a str, version: &'a str, archive: Vec<u8>) -> RepoPkg<'a> {
    RepoPkg {
        name,
        version,
        archive,
        deps: "",
        declared: None,
    }
}

fn seed_root(root: &Path, world: &str) -> Result<()> {
    fs::create_dir_all(root.join("var/lib/apk"))?;
    fs::write(root.join("var/lib/apk/world"), world)?;
    Ok(())
}

fn open_with_repo(root: &Path, repo: &Path) -> Result<Database> {
    Database::open(DbOptions {
        root: Some(root.to_path_buf()),
        repository: Some(repo.to_str().expect("utf-8 path").to_string()),
        quiet: false,
    })
}

fn foo_archive(conf: &[u8]) -> Vec<u8> {
    build_archive(&[
        Fixture::Dir("usr/", 0o755),
        Fixture::Dir("usr/bin/", 0o755),
        Fixture::File("usr/bin/foo", 0o755, b"#!/bin/sh\ntrue\n"),
        Fixture::Dir("etc/", 0o755),
        Fixture::File("etc/foo.conf", 0o644, conf),
    ])
}

fn file_by_path(db: &Database, path: &str) -> Option<FileId> {
    let (dirname, basename) = path.rsplit_once('/').unwrap_or(("", path));
    let dir = *db.dir_index.get(dirname)?;
    let mut cursor = db.dirs[dir.index()].files_head;
    while let Some(fid) = cursor {
        let file = &db.files[fid.index()];
        if file.name == basename {
            return Some(fid);
        }
        cursor = file.next_in_dir;
    }
    None
}

fn pkg_file_count(db: &Database, pkg: PkgId) -> usize {
    let mut count = 0;
    let mut cursor = db.packages[pkg.index()].files_head;
    while let Some(fid) = cursor {
        count += 1;
        cursor = db.files[fid.index()].next_in_pkg;
    }
    count
}

/// Structural invariants that must hold after every public operation.
fn check_invariants(db: &Database) {
    for (idx, dir) in db.dirs.iter().enumerate() {
        let id = DirId(idx as u32);
        let mut expected = 0_u32;
        let mut cursor = dir.files_head;
        while let Some(fid) = cursor {
            let file = &db.files[fid.index()];
            if file.owner.is_some() {
                expected += 1;
            }
            cursor = file.next_in_dir;
        }
        for child in &db.dirs {
            if child.parent == Some(id) && child.refs > 0 {
                expected += 1;
            }
        }
        if dir.dirname.is_empty() {
            expected += 1;
        }
        assert_eq!(dir.refs, expected, "refs of directory '{}'", dir.dirname);
    }

    for (idx, file) in db.files.iter().enumerate() {
        let fid = FileId(idx as u32);
        if let Some(owner) = file.owner {
            let mut cursor = db.packages[owner.index()].files_head;
            let mut found = false;
            while let Some(current) = cursor {
                if current == fid {
                    found = true;
                    break;
                }
                cursor = db.files[current.index()].next_in_pkg;
            }
            assert!(found, "file {} missing from owner chain", file.name);

            let mut cursor = db.dirs[file.dir.index()].files_head;
            let mut found = false;
            while let Some(current) = cursor {
                if current == fid {
                    found = true;
                    break;
                }
                cursor = db.files[current.index()].next_in_dir;
            }
            assert!(found, "file {} missing from directory chain", file.name);
        }
    }

    assert_eq!(
        db.stats.files,
        db.files.iter().filter(|f| f.owner.is_some()).count()
    );
    assert_eq!(db.stats.dirs, db.dirs.iter().filter(|d| d.refs > 0).count());
    assert_eq!(db.stats.packages, db.installed.len());
}

#[test]
fn fresh_install_populates_root() -> Result<()> {
    let temp = tempdir()?;
    let root = temp.path().join("root");
    let repo = temp.path().join("repo");
    seed_root(&root, "foo\n")?;
    write_repo(&repo, &[repo_pkg("foo", "1.0", foo_archive(b"conf=1\n"))])?;

    let mut db = open_with_repo(&root, &repo)?;
    let stats = db.recalculate_and_commit()?;

    assert_eq!(
        stats,
        Stats {
            packages: 1,
            dirs: 4,
            files: 2
        }
    );
    assert!(root.join("usr/bin/foo").exists());
    assert_eq!(fs::read(root.join("etc/foo.conf"))?, b"conf=1\n");

    let etc = db.dir_index["etc"];
    assert!(db.dirs[etc.index()].protected);
    let usr = db.dir_index["usr"];
    assert!(!db.dirs[usr.index()].protected);

    check_invariants(&db);
    Ok(())
}

#[test]
fn upgrade_diverts_locally_modified_protected_file() -> Result<()> {
    let temp = tempdir()?;
    let root = temp.path().join("root");
    let repo = temp.path().join("repo");
    seed_root(&root, "foo\n")?;
    write_repo(&repo, &[repo_pkg("foo", "1.0", foo_archive(b"conf=1\n"))])?;

    let mut db = open_with_repo(&root, &repo)?;
    db.recalculate_and_commit()?;

    fs::write(root.join("etc/foo.conf"), b"local edit\n")?;

    let newer = temp.path().join("repo2");
    write_repo(&newer, &[repo_pkg("foo", "1.1", foo_archive(b"conf=2\n"))])?;
    db.add_repository(newer.to_str().unwrap())?;
    let stats = db.recalculate_and_commit()?;

    assert_eq!(stats.packages, 1);
    assert_eq!(
        db.package(db.installed()[0]).version,
        "1.1",
        "world resolves to the newest version"
    );
    assert_eq!(fs::read(root.join("etc/foo.conf"))?, b"local edit\n");
    assert_eq!(fs::read(root.join("etc/foo.conf.apk-new"))?, b"conf=2\n");

    let conf = file_by_path(&db, "etc/foo.conf").expect("conf entry");
    assert_eq!(db.files[conf.index()].csum, Some(checksum::digest(b"conf=2\n")));

    check_invariants(&db);
    Ok(())
}

#[test]
fn conflicting_owner_aborts_install() -> Result<()> {
    let temp = tempdir()?;
    let root = temp.path().join("root");
    let repo = temp.path().join("repo");
    seed_root(&root, "foo\n")?;
    write_repo(&repo, &[repo_pkg("foo", "1.0", foo_archive(b"conf=1\n"))])?;

    let mut db = open_with_repo(&root, &repo)?;
    db.recalculate_and_commit()?;
    let foo = db.installed()[0];

    let bar_archive = build_archive(&[
        Fixture::File(".PKGINFO", 0o644, b"P:bar\nV:1.0\n"),
        Fixture::Dir("usr/", 0o755),
        Fixture::Dir("usr/bin/", 0o755),
        Fixture::File("usr/bin/foo", 0o755, b"stolen\n"),
    ]);
    let bar_path = temp.path().join("bar-1.0.apk");
    fs::write(&bar_path, &bar_archive)?;
    let bar = db.pkg_add_file(&bar_path)?;

    let err = db.install_pkg(None, Some(bar)).unwrap_err();
    assert!(
        matches!(DbError::find(&err), Some(DbError::Conflict { .. })),
        "unexpected error: {err:#}"
    );
    assert_eq!(db.package(bar).state, PackageState::Available);
    assert_eq!(db.stats().packages, 1);

    let owned = file_by_path(&db, "usr/bin/foo").expect("binary entry");
    assert_eq!(db.files[owned.index()].owner, Some(foo));
    assert_eq!(fs::read(root.join("usr/bin/foo"))?, b"#!/bin/sh\ntrue\n");

    check_invariants(&db);
    Ok(())
}

#[test]
fn removal_unwinds_files_and_directories() -> Result<()> {
    let temp = tempdir()?;
    let root = temp.path().join("root");
    let repo = temp.path().join("repo");
    seed_root(&root, "foo\n")?;
    write_repo(&repo, &[repo_pkg("foo", "1.0", foo_archive(b"conf=1\n"))])?;

    let mut db = open_with_repo(&root, &repo)?;
    db.recalculate_and_commit()?;
    let foo = db.installed()[0];

    db.install_pkg(Some(foo), None)?;

    assert_eq!(
        db.stats(),
        Stats {
            packages: 0,
            dirs: 1,
            files: 0
        }
    );
    assert!(!root.join("usr").exists());
    assert!(!root.join("etc").exists());

    check_invariants(&db);
    Ok(())
}

#[test]
fn duplicate_installed_record_is_fatal() -> Result<()> {
    let temp = tempdir()?;
    let root = temp.path().join("root");
    seed_root(&root, "foo\n")?;

    let csum = checksum::digest(b"whatever");
    let mut installed = String::new();
    installed.push_str(&index_record("foo", "1.0", &csum, ""));
    installed.push_str(&index_record("foo", "1.1", &csum, ""));
    fs::write(root.join("var/lib/apk/installed"), installed)?;

    let err = Database::open(DbOptions {
        root: Some(root),
        ..DbOptions::default()
    })
    .unwrap_err();
    assert!(
        format!("{err:#}").contains("Installed database load failed"),
        "unexpected error: {err:#}"
    );
    Ok(())
}

#[test]
fn checksum_mismatch_is_a_warning_only() -> Result<()> {
    let temp = tempdir()?;
    let root = temp.path().join("root");
    let repo = temp.path().join("repo");
    seed_root(&root, "foo\n")?;
    write_repo(
        &repo,
        &[RepoPkg {
            name: "foo",
            version: "1.0",
            archive: foo_archive(b"conf=1\n"),
            deps: "",
            declared: Some(checksum::digest(b"not the archive")),
        }],
    )?;

    let mut db = open_with_repo(&root, &repo)?;
    let stats = db.recalculate_and_commit()?;

    assert_eq!(stats.packages, 1);
    assert_eq!(db.package(db.installed()[0]).state, PackageState::Installed);
    check_invariants(&db);
    Ok(())
}

#[test]
fn fdb_round_trips_through_disk() -> Result<()> {
    let temp = tempdir()?;
    let root = temp.path().join("root");
    let repo = temp.path().join("repo");
    seed_root(&root, "foo\n")?;

    let archive = build_archive(&[
        Fixture::File(".INSTALL", 0o755, b"#!/bin/sh\nexit 0\n"),
        Fixture::Dir("usr/", 0o755),
        Fixture::Dir("usr/bin/", 0o755),
        Fixture::File("usr/bin/foo", 0o755, b"#!/bin/sh\ntrue\n"),
        Fixture::Dir("etc/", 0o755),
        Fixture::File("etc/foo.conf", 0o644, b"conf=1\n"),
    ]);
    write_repo(&repo, &[repo_pkg("foo", "1.0", archive)])?;

    let mut db = open_with_repo(&root, &repo)?;
    db.recalculate_and_commit()?;
    let before = db.stats();
    let foo = db.installed()[0];
    let foo_csum = db.package(foo).csum;

    let reopened = Database::open(DbOptions {
        root: Some(root.clone()),
        ..DbOptions::default()
    })?;
    assert_eq!(reopened.stats(), before);
    assert_eq!(reopened.installed().len(), 1);

    let loaded = reopened.package(reopened.installed()[0]);
    assert_eq!(reopened.name(loaded.name).name, "foo");
    assert_eq!(loaded.version, "1.0");
    assert_eq!(loaded.csum, foo_csum);
    assert_eq!(loaded.state, PackageState::Installed);
    assert_eq!(pkg_file_count(&reopened, reopened.installed()[0]), 2);

    for path in ["usr/bin/foo", "etc/foo.conf"] {
        let original = file_by_path(&db, path).expect("entry before");
        let restored = file_by_path(&reopened, path).expect("entry after");
        assert_eq!(
            db.files[original.index()].csum,
            reopened.files[restored.index()].csum,
            "checksum of {path}"
        );
    }

    assert_eq!(loaded.scripts.len(), 1);
    assert_eq!(loaded.scripts[0].kind, ScriptKind::Generic);
    assert_eq!(loaded.scripts[0].data, b"#!/bin/sh\nexit 0\n");

    check_invariants(&reopened);
    Ok(())
}

#[test]
fn protected_rules_resolve_in_order() -> Result<()> {
    let temp = tempdir()?;
    let root = temp.path().join("root");
    seed_root(&root, "")?;
    let mut db = Database::open(DbOptions {
        root: Some(root),
        ..DbOptions::default()
    })?;

    let etc = db.dir_get("etc");
    assert!(db.dirs[etc.index()].protected);
    let init_d = db.dir_get("etc/init.d");
    assert!(!db.dirs[init_d.index()].protected);
    let inherited = db.dir_get("etc/apk");
    assert!(db.dirs[inherited.index()].protected);
    let usr = db.dir_get("usr/bin");
    assert!(!db.dirs[usr.index()].protected);
    let root_dir = db.dir_get("");
    assert!(!db.dirs[root_dir.index()].protected);
    Ok(())
}

#[test]
fn reinstall_keeps_counters_stable() -> Result<()> {
    let temp = tempdir()?;
    let root = temp.path().join("root");
    let repo = temp.path().join("repo");
    seed_root(&root, "foo\n")?;
    write_repo(&repo, &[repo_pkg("foo", "1.0", foo_archive(b"conf=1\n"))])?;

    let mut db = open_with_repo(&root, &repo)?;
    db.recalculate_and_commit()?;
    let first = db.stats();
    let foo = db.installed()[0];

    db.install_pkg(Some(foo), Some(foo))?;

    assert_eq!(db.stats(), first);
    let conf = file_by_path(&db, "etc/foo.conf").expect("conf entry");
    assert_eq!(db.files[conf.index()].owner, Some(foo));
    check_invariants(&db);
    Ok(())
}

#[test]
fn install_scripts_run_with_the_phase_argument() -> Result<()> {
    let temp = tempdir()?;
    let root = temp.path().join("root");
    let repo = temp.path().join("repo");
    seed_root(&root, "foo\n")?;

    let archive = build_archive(&[
        Fixture::File(
            ".INSTALL",
            0o755,
            b"#!/bin/sh\necho \"$1\" >> apk-script.log\n",
        ),
        Fixture::Dir("usr/", 0o755),
        Fixture::File("usr/.keep_foo", 0o644, b""),
    ]);
    write_repo(&repo, &[repo_pkg("foo", "1.0", archive)])?;

    let mut db = open_with_repo(&root, &repo)?;
    db.recalculate_and_commit()?;

    let log = fs::read_to_string(root.join("apk-script.log"))?;
    assert_eq!(log, "pre-install\npost-install\n");
    // Keep markers hold the directory without touching the filesystem.
    assert!(!root.join("usr/.keep_foo").exists());
    assert_eq!(db.stats().files, 1);
    check_invariants(&db);
    Ok(())
}

#[test]
fn failing_pre_script_aborts_the_install() -> Result<()> {
    let temp = tempdir()?;
    let root = temp.path().join("root");
    let repo = temp.path().join("repo");
    seed_root(&root, "foo\n")?;

    let archive = build_archive(&[
        Fixture::File(
            ".INSTALL",
            0o755,
            b"#!/bin/sh\n[ \"$1\" = pre-install ] && exit 7\nexit 0\n",
        ),
        Fixture::Dir("usr/", 0o755),
        Fixture::File("usr/file", 0o644, b"payload\n"),
    ]);
    write_repo(&repo, &[repo_pkg("foo", "1.0", archive)])?;

    let mut db = open_with_repo(&root, &repo)?;
    let err = db.recalculate_and_commit().unwrap_err();
    assert!(
        matches!(DbError::find(&err), Some(DbError::Script { status: 7, .. })),
        "unexpected error: {err:#}"
    );
    assert_eq!(db.stats().packages, 0);
    assert!(!root.join("usr/file").exists());
    Ok(())
}

#[test]
fn fdb_ordering_violations_are_fatal() -> Result<()> {
    let csum = checksum::digest(b"x").to_hex();
    let cases = vec![
        (
            "F:etc\n\n".to_string(),
            "FDB directory entry before package entry",
        ),
        (
            "P:foo\nV:1.0\nM:0:0:755\n\n".to_string(),
            "FDB directory metadata entry before directory entry",
        ),
        (
            "P:foo\nV:1.0\nR:foo.conf\n\n".to_string(),
            "FDB file entry before directory entry",
        ),
        (
            "P:foo\nV:1.0\nF:etc\nZ:00\n\n".to_string(),
            "FDB checksum entry before file entry",
        ),
        ("P:foo\nV:1.0\nQ:x\n\n".to_string(), "FDB entry 'Q' unsupported"),
        (
            format!("P:foo\nV:1.0\nC:{csum}\nF:etc\nR:foo.conf\nZ:nothex\n\n"),
            "Not a valid checksum",
        ),
    ];

    for (content, expected) in cases {
        let temp = tempdir()?;
        let root = temp.path().join("root");
        seed_root(&root, "")?;
        fs::write(root.join("var/lib/apk/installed"), content)?;
        let err = Database::open(DbOptions {
            root: Some(root),
            ..DbOptions::default()
        })
        .unwrap_err();
        assert!(
            format!("{err:#}").contains(expected),
            "expected '{expected}' in: {err:#}"
        );
    }
    Ok(())
}

#[test]
fn repository_index_rejects_ownership_entries() -> Result<()> {
    let temp = tempdir()?;
    let root = temp.path().join("root");
    let repo = temp.path().join("repo");
    seed_root(&root, "")?;
    fs::create_dir_all(&repo)?;

    let csum = checksum::digest(b"x").to_hex();
    let mut gz = GzBuilder::new().write(Vec::new(), Compression::default());
    gz.write_all(format!("P:foo\nV:1.0\nC:{csum}\nF:etc\n\n").as_bytes())?;
    fs::write(repo.join("APK_INDEX.gz"), gz.finish()?)?;

    let err = open_with_repo(&root, &repo).unwrap_err();
    assert!(
        format!("{err:#}").contains("Invalid index entry 'F'"),
        "unexpected error: {err:#}"
    );
    Ok(())
}

#[test]
fn script_store_skips_unknown_packages() -> Result<()> {
    let temp = tempdir()?;
    let root = temp.path().join("root");
    seed_root(&root, "")?;

    let csum = checksum::digest(b"the package");
    fs::write(
        root.join("var/lib/apk/installed"),
        index_record("foo", "1.0", &csum, ""),
    )?;

    let mut blob = Vec::new();
    blob.extend_from_slice(checksum::digest(b"unknown").as_bytes());
    blob.extend_from_slice(&0_u32.to_le_bytes());
    blob.extend_from_slice(&3_u32.to_le_bytes());
    blob.extend_from_slice(b"abc");
    blob.extend_from_slice(csum.as_bytes());
    blob.extend_from_slice(&ScriptKind::Generic.as_u32().to_le_bytes());
    blob.extend_from_slice(&2_u32.to_le_bytes());
    blob.extend_from_slice(b"hi");
    fs::write(root.join("var/lib/apk/scripts"), blob)?;

    let db = Database::open(DbOptions {
        root: Some(root),
        ..DbOptions::default()
    })?;
    let foo = db.installed()[0];
    assert_eq!(db.package(foo).scripts.len(), 1);
    assert_eq!(db.package(foo).scripts[0].data, b"hi");
    Ok(())
}

#[test]
fn solver_follows_dependencies_and_prunes_orphans() -> Result<()> {
    let temp = tempdir()?;
    let root = temp.path().join("root");
    let repo = temp.path().join("repo");
    seed_root(&root, "foo\n")?;

    let foo = build_archive(&[
        Fixture::Dir("usr/", 0o755),
        Fixture::Dir("usr/bin/", 0o755),
        Fixture::File("usr/bin/foo", 0o755, b"foo\n"),
    ]);
    let bar = build_archive(&[
        Fixture::Dir("usr/", 0o755),
        Fixture::Dir("usr/bin/", 0o755),
        Fixture::File("usr/bin/bar", 0o755, b"bar\n"),
    ]);
    write_repo(
        &repo,
        &[
            RepoPkg {
                name: "foo",
                version: "1.0",
                archive: foo,
                deps: "bar",
                declared: None,
            },
            repo_pkg("bar", "2.0", bar),
        ],
    )?;

    let mut db = open_with_repo(&root, &repo)?;
    let stats = db.recalculate_and_commit()?;
    assert_eq!(stats.packages, 2);
    assert!(root.join("usr/bin/bar").exists());
    check_invariants(&db);

    db.world_del("foo");
    let stats = db.recalculate_and_commit()?;
    assert_eq!(stats.packages, 0);
    assert!(!root.join("usr/bin/foo").exists());
    assert!(!root.join("usr/bin/bar").exists());
    check_invariants(&db);
    Ok(())
}

#[test]
fn world_round_trips_and_is_editable() -> Result<()> {
    let temp = tempdir()?;
    let root = temp.path().join("root");
    seed_root(&root, "foo, bar=1.2\n")?;
    let mut db = Database::open(DbOptions {
        root: Some(root.clone()),
        ..DbOptions::default()
    })?;

    assert_eq!(db.world.len(), 2);
    assert_eq!(db.deps_format(&db.world), "foo, bar=1.2");

    db.world_add("baz", None);
    assert!(db.world_del("foo"));
    assert!(!db.world_del("missing"));
    db.write_config()?;

    let written = fs::read_to_string(root.join("var/lib/apk/world"))?;
    assert_eq!(written, "bar=1.2, baz\n");
    Ok(())
}

#[test]
fn create_seeds_a_usable_root() -> Result<()> {
    let temp = tempdir()?;
    let root = temp.path().join("root");
    Database::create(&root)?;

    assert!(root.join("tmp").is_dir());
    assert!(root.join("var/lib/apk").is_dir());
    let world = fs::read_to_string(root.join("var/lib/apk/world"))?;
    assert_eq!(world, "busybox, alpine-baselayout, apk-tools, alpine-conf\n");

    // A created root opens cleanly even though nothing is installed yet.
    let db = Database::open(DbOptions {
        root: Some(root),
        ..DbOptions::default()
    })?;
    assert_eq!(db.world.len(), 4);
    assert_eq!(db.stats(), Stats::default());
    Ok(())
}

#[test]
fn local_package_files_register_and_install() -> Result<()> {
    let temp = tempdir()?;
    let root = temp.path().join("root");
    seed_root(&root, "")?;

    let archive = build_archive(&[
        Fixture::File(".PKGINFO", 0o644, b"P:local\nV:0.9\nT:local package\n"),
        Fixture::Dir("opt/", 0o755),
        Fixture::File("opt/tool", 0o755, b"tool\n"),
    ]);
    let path = temp.path().join("local-0.9.apk");
    fs::write(&path, &archive)?;

    let mut db = Database::open(DbOptions {
        root: Some(root.clone()),
        ..DbOptions::default()
    })?;
    let pkg = db.pkg_add_file(&path)?;
    assert_eq!(db.package(pkg).csum, checksum::digest(&archive));
    assert_eq!(db.package(pkg).description.as_deref(), Some("local package"));

    db.world_add("local", Some("0.9".to_string()));
    let stats = db.recalculate_and_commit()?;
    assert_eq!(stats.packages, 1);
    assert!(root.join("opt/tool").exists());
    check_invariants(&db);
    Ok(())
}
