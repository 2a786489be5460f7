//! Packagist metadata (`/p2`) adapter

use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use indexmap::IndexMap;
use serde::Deserialize;
use serde_json::{Map, Value};
use tracing::{debug, warn};

use crate::config::{DEFAULT_PACKAGIST_URL, FETCH_TIMEOUT_MS, PLUGIN_PACKAGE_TYPE};
use crate::store::{Package, Release, ReleaseMetadata};
use crate::vcs::error::VcsError;
use crate::vcs::{Vcs, Webhook, validate_manifest};

/// Marker for a key removed relative to the previous entry
const UNSET: &str = "__unset";

/// Only the minifier Packagist actually serves
const MINIFIED_FORMAT: &str = "composer/2.0";

type VersionEntry = Map<String, Value>;

/// Response from the Packagist `/p2/{name}.json` endpoint
#[derive(Debug, Deserialize)]
struct P2Response {
    packages: HashMap<String, Vec<VersionEntry>>,
    #[serde(default)]
    minified: Option<String>,
}

/// Undo Packagist's delta encoding: each entry only carries keys that
/// changed since the entry before it
fn expand_minified(entries: Vec<VersionEntry>) -> Vec<VersionEntry> {
    let mut expanded = Vec::with_capacity(entries.len());
    let mut previous = VersionEntry::new();

    for entry in entries {
        let mut current = previous.clone();
        for (key, value) in entry {
            if value.as_str() == Some(UNSET) {
                current.remove(&key);
            } else {
                current.insert(key, value);
            }
        }
        expanded.push(current.clone());
        previous = current;
    }

    expanded
}

fn entry_reference(entry: &VersionEntry) -> Option<&str> {
    ["source", "dist"]
        .iter()
        .find_map(|key| entry.get(*key)?.get("reference")?.as_str())
}

pub struct PackagistVcs {
    client: reqwest::Client,
    base_url: String,
    plugin_type: String,
    /// Expanded entries from the last `list_tags` call per package.
    /// Every sync lists tags before populating, so populating reads the
    /// listing of the sync it belongs to.
    listings: Mutex<HashMap<String, Vec<VersionEntry>>>,
}

impl PackagistVcs {
    /// Creates a new PackagistVcs with a custom base URL
    pub fn new(base_url: &str, plugin_type: &str) -> Self {
        Self {
            client: reqwest::Client::builder()
                .user_agent("plugin-registry")
                .timeout(Duration::from_millis(FETCH_TIMEOUT_MS))
                .build()
                .expect("Failed to create HTTP client"),
            base_url: base_url.trim_end_matches('/').to_string(),
            plugin_type: plugin_type.to_string(),
            listings: Mutex::new(HashMap::new()),
        }
    }

    /// Entries of the current listing, fetched if `list_tags` has not run yet
    async fn listing(&self, package_name: &str) -> Result<Vec<VersionEntry>, VcsError> {
        let cached = self
            .listings
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(package_name)
            .cloned();
        if let Some(entries) = cached {
            return Ok(entries);
        }

        let entries = self.fetch_versions(package_name).await?;
        self.remember(package_name, &entries);
        Ok(entries)
    }

    fn remember(&self, package_name: &str, entries: &[VersionEntry]) {
        self.listings
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(package_name.to_string(), entries.to_vec());
    }

    async fn fetch_versions(&self, package_name: &str) -> Result<Vec<VersionEntry>, VcsError> {
        let url = format!("{}/p2/{}.json", self.base_url, package_name);

        let response = self.client.get(&url).send().await?;
        let status = response.status();

        if status == reqwest::StatusCode::NOT_FOUND {
            return Err(VcsError::NotFound(package_name.to_string()));
        }

        if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            let retry_after = response
                .headers()
                .get("retry-after")
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.parse().ok());
            return Err(VcsError::RateLimited {
                retry_after_secs: retry_after,
            });
        }

        if status.is_server_error() {
            warn!("Packagist unavailable ({}): {}", status, url);
            return Err(VcsError::Unavailable(status.to_string()));
        }

        if !status.is_success() {
            warn!("Packagist returned status {}: {}", status, url);
            return Err(VcsError::InvalidResponse(format!(
                "Unexpected status: {}",
                status
            )));
        }

        let mut body: P2Response = response.json().await.map_err(|e| {
            warn!("Failed to parse Packagist response: {}", e);
            VcsError::InvalidResponse(e.to_string())
        })?;

        let entries = body.packages.remove(package_name).unwrap_or_default();
        let entries = match body.minified.as_deref() {
            Some(MINIFIED_FORMAT) => expand_minified(entries),
            _ => entries,
        };

        debug!("Fetched {} versions for {}", entries.len(), package_name);
        Ok(entries)
    }
}

impl Default for PackagistVcs {
    fn default() -> Self {
        Self::new(DEFAULT_PACKAGIST_URL, PLUGIN_PACKAGE_TYPE)
    }
}

#[async_trait::async_trait]
impl Vcs for PackagistVcs {
    async fn list_tags(&self, package: &Package) -> Result<IndexMap<String, String>, VcsError> {
        let entries = self.fetch_versions(&package.name).await?;
        self.remember(&package.name, &entries);

        let mut tags = IndexMap::new();
        for entry in &entries {
            let (Some(version), Some(reference)) = (
                entry.get("version").and_then(Value::as_str),
                entry_reference(entry),
            ) else {
                continue;
            };
            tags.entry(version.to_string())
                .or_insert_with(|| reference.to_string());
        }

        Ok(tags)
    }

    async fn populate_release(
        &self,
        package: &Package,
        release: &mut Release,
    ) -> Result<(), VcsError> {
        let entries = self.listing(&package.name).await?;

        let Some(mut entry) = entries
            .into_iter()
            .find(|e| e.get("version").and_then(Value::as_str) == Some(release.version.as_str()))
        else {
            release.invalidate(format!(
                "Version {} is no longer listed on Packagist",
                release.version
            ));
            return Ok(());
        };

        entry.remove("version");
        entry.remove("version_normalized");

        let mut metadata: ReleaseMetadata = match serde_json::from_value(Value::Object(entry)) {
            Ok(metadata) => metadata,
            Err(e) => {
                release.invalidate(format!("Invalid Packagist metadata: {}", e));
                return Ok(());
            }
        };
        metadata.name.get_or_insert_with(|| package.name.clone());

        if let Err(reason) = validate_manifest(package, &self.plugin_type, &metadata) {
            release.invalidate(reason);
            return Ok(());
        }

        release.metadata = Some(metadata);
        Ok(())
    }

    fn has_token(&self, _package: &Package) -> bool {
        // Packagist metadata is public
        true
    }

    async fn create_webhook(&self, _package: &Package) -> Result<Option<Webhook>, VcsError> {
        Ok(None)
    }

    async fn delete_webhook(&self, _package: &Package) -> Result<(), VcsError> {
        Ok(())
    }
}
