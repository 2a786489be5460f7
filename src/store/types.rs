//! Registry records
//!
//! Plain data carried between the sync pipeline and a [`ReleaseStore`](super::ReleaseStore).

use std::collections::BTreeMap;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::version::Stability;

/// A named, versionable unit (`vendor/name`)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Package {
    pub id: Option<i64>,
    pub name: String,
    /// Composer package type (`library`, `craft-plugin`, ...)
    pub package_type: String,
    /// First-party packages are always synced; others only as far as something requires them
    pub managed: bool,
    pub repository: Option<String>,
    pub enabled: bool,
    pub published: bool,
    pub webhook_id: Option<String>,
    pub webhook_secret: Option<String>,
}

impl Package {
    pub fn new(name: &str, package_type: &str) -> Self {
        Self {
            id: None,
            name: name.to_string(),
            package_type: package_type.to_string(),
            managed: false,
            repository: None,
            enabled: true,
            published: false,
            webhook_id: None,
            webhook_secret: None,
        }
    }

    /// Placeholder for a package first seen as somebody's dependency
    pub fn discovered(name: &str) -> Self {
        Self::new(name, "library")
    }
}

/// `license` is either a single SPDX id or a list of them
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum License {
    One(String),
    Many(Vec<String>),
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Author {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub homepage: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
}

/// `source` / `dist` pointer
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Reference {
    #[serde(rename = "type")]
    pub kind: String,
    pub url: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reference: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub shasum: Option<String>,
}

/// The subset of `composer.json` the registry consumes.
///
/// Unknown keys survive in `other` so the stored document round-trips.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReleaseMetadata {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(rename = "type", skip_serializing_if = "Option::is_none")]
    pub package_type: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub keywords: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub homepage: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub license: Option<License>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub authors: Vec<Author>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub support: BTreeMap<String, String>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub require: BTreeMap<String, String>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub conflict: BTreeMap<String, String>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub replace: BTreeMap<String, String>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub provide: BTreeMap<String, String>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub suggest: BTreeMap<String, String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub autoload: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source: Option<Reference>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dist: Option<Reference>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub extra: Option<serde_json::Value>,
    #[serde(flatten)]
    pub other: serde_json::Map<String, serde_json::Value>,
}

/// Changelog-derived fields of a release
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReleaseNotes {
    pub date: Option<NaiveDate>,
    pub critical: bool,
    /// Sanitized HTML; `None` when the changelog section was empty
    pub notes: Option<String>,
}

/// One tagged version of a package
#[derive(Debug, Clone, PartialEq)]
pub struct Release {
    pub id: Option<i64>,
    pub package_id: i64,
    pub version: String,
    pub normalized_version: String,
    pub stability: Stability,
    pub sha: String,
    pub metadata: Option<ReleaseMetadata>,
    /// Raw changelog document as of this release
    pub changelog: Option<String>,
    pub notes: ReleaseNotes,
    pub valid: bool,
    pub invalid_reason: Option<String>,
}

impl Release {
    /// A release with only its identity filled in, ready for population
    pub fn shell(
        package_id: i64,
        version: &str,
        normalized_version: &str,
        stability: Stability,
        sha: &str,
    ) -> Self {
        Self {
            id: None,
            package_id,
            version: version.to_string(),
            normalized_version: normalized_version.to_string(),
            stability,
            sha: sha.to_string(),
            metadata: None,
            changelog: None,
            notes: ReleaseNotes::default(),
            valid: true,
            invalid_reason: None,
        }
    }

    /// Keep the row but drop everything the VCS reported for it
    pub fn invalidate(&mut self, reason: impl Into<String>) {
        self.valid = false;
        self.invalid_reason = Some(reason.into());
        self.metadata = None;
        self.changelog = None;
        self.notes = ReleaseNotes::default();
    }

    pub fn require(&self) -> Option<&BTreeMap<String, String>> {
        self.metadata.as_ref().map(|m| &m.require)
    }

    /// Identity of the release once stored under `id`
    pub fn to_ref(&self, id: i64) -> ReleaseRef {
        ReleaseRef {
            id,
            version: self.version.clone(),
            normalized_version: self.normalized_version.clone(),
            stability: self.stability,
            sha: self.sha.clone(),
            valid: self.valid,
        }
    }

    /// Constraint this release declares against `package_name`
    pub fn constraint_on(&self, package_name: &str) -> Option<&str> {
        self.require()
            .and_then(|require| require.get(package_name))
            .map(String::as_str)
    }
}

/// Identity of a stored release, enough to diff against the VCS
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReleaseRef {
    pub id: i64,
    pub version: String,
    pub normalized_version: String,
    pub stability: Stability,
    pub sha: String,
    pub valid: bool,
}

/// Edge from a release to a package it requires
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Dependency {
    pub package_id: i64,
    pub release_id: i64,
    pub name: String,
    pub constraints: String,
}

/// Ranking keys for a plugin release
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReleaseOrder {
    pub release_id: i64,
    pub plugin_id: i64,
    /// Position in ascending version order, 0 = oldest
    pub order: i64,
    /// Position after grouping by stability rank, then by `order`
    pub stable_order: i64,
}

/// Plugin release joined with its declared host constraint, walked by `order`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrderedRelease {
    pub release_id: i64,
    pub normalized_version: String,
    pub order: i64,
    pub valid: bool,
    pub host_constraint: Option<String>,
}

/// "This plugin release works with this host release"
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CompatEntry {
    pub plugin_release_id: i64,
    pub host_release_id: i64,
}
