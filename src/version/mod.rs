//! Version normalization and constraint matching
//!
//! # Modules
//!
//! - [`semver`]: raw tag -> [`semver::NormalizedVersion`], stability classification
//! - [`constraint`]: Composer constraint parsing, `satisfies` and the `>=` tightening rule
//! - [`error`]: Error types for version and constraint parsing

pub mod constraint;
pub mod error;
pub mod semver;

pub use constraint::{Constraint, is_dev_branch, satisfies, tighten};
pub use error::VersionError;
pub use self::semver::{NormalizedVersion, Stability, compare, normalize, stability_of};
