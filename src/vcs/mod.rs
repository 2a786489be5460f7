//! Version-control collaborators
//!
//! A [`Vcs`] lists a package's tags and fills in release shells with the
//! manifest and changelog found at the tagged commit.
//!
//! # Modules
//!
//! - [`github`]: GitHub REST adapter for first-party repositories
//! - [`packagist`]: Packagist metadata adapter for third-party dependencies
//! - [`router`]: picks an adapter per package repository

#[cfg(test)]
use mockall::automock;

use indexmap::IndexMap;
use serde_json::Value;

use crate::store::{Package, Release, ReleaseMetadata};

pub mod error;
pub mod github;
pub mod packagist;
pub mod router;

pub use error::VcsError;
pub use github::GitHubVcs;
pub use packagist::PackagistVcs;
pub use router::VcsRouter;

/// Push hook registered on a repository
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Webhook {
    pub id: String,
    pub secret: Option<String>,
}

/// Trait for talking to the version-control host of a package
#[cfg_attr(test, automock)]
#[async_trait::async_trait]
pub trait Vcs: Send + Sync {
    /// Raw tag name -> commit sha, in the order the host reports them
    async fn list_tags(&self, package: &Package) -> Result<IndexMap<String, String>, VcsError>;

    /// Fill in metadata and changelog for the release at its sha.
    ///
    /// A tag that exists but does not describe a usable release is reported by
    /// invalidating `release`, not through the error channel.
    async fn populate_release(
        &self,
        package: &Package,
        release: &mut Release,
    ) -> Result<(), VcsError>;

    /// Whether authenticated access is configured for the package's host
    fn has_token(&self, package: &Package) -> bool;

    async fn create_webhook(&self, package: &Package) -> Result<Option<Webhook>, VcsError>;

    async fn delete_webhook(&self, package: &Package) -> Result<(), VcsError>;
}

/// Parse a `composer.json` document
pub fn parse_manifest(raw: &str) -> Result<ReleaseMetadata, String> {
    serde_json::from_str(raw).map_err(|e| format!("Invalid composer.json: {}", e))
}

/// Check a manifest against the package it was fetched for
pub fn validate_manifest(
    package: &Package,
    plugin_type: &str,
    metadata: &ReleaseMetadata,
) -> Result<(), String> {
    if let Some(name) = &metadata.name {
        if !name.eq_ignore_ascii_case(&package.name) {
            return Err(format!(
                "composer.json name {} does not match package {}",
                name, package.name
            ));
        }
    }

    if package.package_type != plugin_type {
        return Ok(());
    }

    if metadata.package_type.as_deref() != Some(plugin_type) {
        return Err(format!(
            "Invalid package type {:?}, expected {}",
            metadata.package_type.as_deref().unwrap_or(""),
            plugin_type
        ));
    }

    let handle = metadata
        .extra
        .as_ref()
        .and_then(|extra| extra.get("handle"))
        .and_then(Value::as_str)
        .unwrap_or("");
    if handle.is_empty() {
        return Err("Missing extra.handle in composer.json".to_string());
    }

    Ok(())
}
