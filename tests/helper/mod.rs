//! Shared helpers for end-to-end tests
#![allow(dead_code)]

mod store;
mod vcs;

pub use store::{
    create_coordinator, create_test_store, insert_package, package_id, stored_versions,
    test_config,
};
pub use vcs::{Failure, ScriptedVcs};
