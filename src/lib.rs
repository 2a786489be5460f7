//! Composer-style package registry core
//!
//! Mirrors VCS tags of registered packages into a SQLite store, follows their
//! dependencies, ranks plugin releases and maintains which plugin releases
//! are compatible with which releases of the host package.

pub mod changelog;
pub mod config;
pub mod store;
pub mod sync;
pub mod vcs;
pub mod version;
