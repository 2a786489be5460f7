//! Scripted VCS for end-to-end sync tests

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use indexmap::IndexMap;

use plugin_registry::store::{Package, Release, ReleaseMetadata};
use plugin_registry::vcs::{Vcs, VcsError, Webhook};

/// Error a scripted tag raises when populated
#[derive(Debug, Clone, Copy)]
pub enum Failure {
    NotFound,
    RateLimited,
    Unavailable,
}

#[derive(Debug, Clone, Default)]
struct Tag {
    sha: String,
    metadata: ReleaseMetadata,
    changelog: Option<String>,
    failure: Option<Failure>,
}

/// In-memory tags per package. Every method takes `&self` so a test can
/// move tags between syncs while the coordinator holds the VCS.
pub struct ScriptedVcs {
    packages: Mutex<HashMap<String, IndexMap<String, Tag>>>,
    populated: Mutex<Vec<String>>,
    has_token: bool,
}

impl ScriptedVcs {
    pub fn new() -> Self {
        Self {
            packages: Mutex::new(HashMap::new()),
            populated: Mutex::new(Vec::new()),
            has_token: true,
        }
    }

    pub fn without_token() -> Self {
        Self {
            has_token: false,
            ..Self::new()
        }
    }

    fn with_tag<F: FnOnce(&mut Tag)>(&self, package: &str, tag: &str, update: F) {
        let mut packages = self.packages.lock().unwrap();
        let entry = packages
            .entry(package.to_string())
            .or_default()
            .entry(tag.to_string())
            .or_default();
        update(entry);
    }

    /// Add (or move) a tag
    pub fn tag(&self, package: &str, tag: &str, sha: &str) {
        self.with_tag(package, tag, |t| t.sha = sha.to_string());
    }

    pub fn untag(&self, package: &str, tag: &str) {
        if let Some(tags) = self.packages.lock().unwrap().get_mut(package) {
            tags.shift_remove(tag);
        }
    }

    pub fn require(&self, package: &str, tag: &str, dependency: &str, constraint: &str) {
        self.with_tag(package, tag, |t| {
            t.metadata
                .require
                .insert(dependency.to_string(), constraint.to_string());
        });
    }

    pub fn changelog(&self, package: &str, tag: &str, text: &str) {
        self.with_tag(package, tag, |t| t.changelog = Some(text.to_string()));
    }

    pub fn fail(&self, package: &str, tag: &str, failure: Failure) {
        self.with_tag(package, tag, |t| t.failure = Some(failure));
    }

    pub fn recover(&self, package: &str, tag: &str) {
        self.with_tag(package, tag, |t| t.failure = None);
    }

    /// `package@tag` for every populate call so far
    pub fn populated(&self) -> Vec<String> {
        self.populated.lock().unwrap().clone()
    }
}

#[async_trait]
impl Vcs for ScriptedVcs {
    async fn list_tags(&self, package: &Package) -> Result<IndexMap<String, String>, VcsError> {
        let packages = self.packages.lock().unwrap();
        let tags = packages
            .get(&package.name)
            .ok_or_else(|| VcsError::NotFound(package.name.clone()))?;

        Ok(tags
            .iter()
            .map(|(name, tag)| (name.clone(), tag.sha.clone()))
            .collect())
    }

    async fn populate_release(
        &self,
        package: &Package,
        release: &mut Release,
    ) -> Result<(), VcsError> {
        self.populated
            .lock()
            .unwrap()
            .push(format!("{}@{}", package.name, release.version));

        let tag = self
            .packages
            .lock()
            .unwrap()
            .get(&package.name)
            .and_then(|tags| tags.get(&release.version))
            .cloned();
        let Some(tag) = tag else {
            release.invalidate("Tag disappeared");
            return Ok(());
        };

        match tag.failure {
            Some(Failure::NotFound) => {
                return Err(VcsError::NotFound(format!(
                    "{}/composer.json",
                    package.name
                )));
            }
            Some(Failure::RateLimited) => {
                return Err(VcsError::RateLimited {
                    retry_after_secs: Some(60),
                });
            }
            Some(Failure::Unavailable) => {
                return Err(VcsError::Unavailable("503 Service Unavailable".to_string()));
            }
            None => {}
        }

        let mut metadata = tag.metadata;
        metadata.name = Some(package.name.clone());
        release.metadata = Some(metadata);
        release.changelog = tag.changelog;
        Ok(())
    }

    fn has_token(&self, _package: &Package) -> bool {
        self.has_token
    }

    async fn create_webhook(&self, _package: &Package) -> Result<Option<Webhook>, VcsError> {
        Ok(None)
    }

    async fn delete_webhook(&self, _package: &Package) -> Result<(), VcsError> {
        Ok(())
    }
}
