//! Installed-state database and package installation engine for an
//! apk-style system package manager.
//!
//! The [`db::Database`] is the center: it joins package identities,
//! content-addressed package instances, interned directories and owned
//! files, loads and persists the text front database and the binary script
//! store, and reconciles the user's declared world against repositories by
//! installing, upgrading and removing package archives inside a root
//! filesystem.

#![deny(clippy::all)]

pub mod archive;
pub mod checksum;
pub mod db;
pub mod error;
pub mod fetch;
pub mod solver;
pub mod version;

pub use checksum::Checksum;
pub use db::{Database, DbOptions, Stats};
pub use error::DbError;
