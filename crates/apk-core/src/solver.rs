//! World resolution.
//!
//! [`solve`] computes the set of packages the world requires — breadth-first
//! over dependencies, preferring whatever is already installed and
//! otherwise the newest fetchable version of a name — and turns the
//! difference against the installed set into an ordered list of
//! transitions for the install engine.

use std::collections::{HashMap, HashSet, VecDeque};

use anyhow::{anyhow, Result};
use tracing::debug;

use crate::db::{Database, Dependency, NameId, PackageState, PkgId};
use crate::version;

/// One package transition: remove (`new` empty), install (`old` empty) or
/// upgrade (both set).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Change {
    pub old: Option<PkgId>,
    pub new: Option<PkgId>,
}

fn satisfies(db: &Database, dep: &Dependency, pkg: PkgId) -> bool {
    let entry = db.package(pkg);
    entry.name == dep.name
        && match &dep.version {
            Some(version) => entry.version == *version,
            None => true,
        }
}

/// Whether the package can actually be brought onto the system.
fn fetchable(db: &Database, pkg: PkgId) -> bool {
    let entry = db.package(pkg);
    entry.repos != 0 || entry.filename.is_some() || entry.state == PackageState::Installed
}

/// Pick the newest satisfying candidate; the installed instance wins a
/// version tie so repository rebuilds do not churn the system.
fn choose(db: &Database, dep: &Dependency) -> Result<PkgId> {
    let name = db.name(dep.name);
    name.pkgs
        .iter()
        .copied()
        .filter(|&pkg| satisfies(db, dep, pkg) && fetchable(db, pkg))
        .max_by(|&a, &b| {
            version::compare(&db.package(a).version, &db.package(b).version).then_with(|| {
                let installed = |pkg: PkgId| db.package(pkg).state == PackageState::Installed;
                installed(a).cmp(&installed(b))
            })
        })
        .ok_or_else(|| anyhow!("Unable to satisfy dependency: {}", name.name))
}

/// Solve the world into an ordered transaction.
pub fn solve(db: &Database, world: &[Dependency]) -> Result<Vec<Change>> {
    let mut selected: HashMap<NameId, PkgId> = HashMap::new();
    let mut order: Vec<NameId> = Vec::new();
    let mut queue: VecDeque<Dependency> = world.iter().cloned().collect();

    while let Some(dep) = queue.pop_front() {
        if let Some(&chosen) = selected.get(&dep.name) {
            if !satisfies(db, &dep, chosen) {
                return Err(anyhow!(
                    "Conflicting requirements for {}",
                    db.name(dep.name).name
                ));
            }
            continue;
        }
        let chosen = choose(db, &dep)?;
        debug!(pkg = %db.name(dep.name).name, version = %db.package(chosen).version, "selected");
        selected.insert(dep.name, chosen);
        order.push(dep.name);
        queue.extend(db.package(chosen).depends.iter().cloned());
    }

    let mut changes = Vec::new();
    for name in &order {
        let new = selected[name];
        let old = db.installed_pkg(*name);
        if old == Some(new) {
            continue;
        }
        changes.push(Change {
            old,
            new: Some(new),
        });
    }

    // Installed packages the world no longer reaches are removed, in
    // installation order, after everything required is in place.
    let wanted: HashSet<NameId> = selected.keys().copied().collect();
    for &pkg in db.installed() {
        if !wanted.contains(&db.package(pkg).name) {
            changes.push(Change {
                old: Some(pkg),
                new: None,
            });
        }
    }
    Ok(changes)
}
