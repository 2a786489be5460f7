//! Per-package adapter selection

use indexmap::IndexMap;

use crate::config::RegistryConfig;
use crate::store::{Package, Release};
use crate::vcs::error::VcsError;
use crate::vcs::github::{GitHubVcs, repository_slug};
use crate::vcs::packagist::PackagistVcs;
use crate::vcs::{Vcs, Webhook};

/// Sends GitHub-hosted packages to the GitHub API and everything else to Packagist
pub struct VcsRouter {
    github: GitHubVcs,
    packagist: PackagistVcs,
}

impl VcsRouter {
    pub fn new(github: GitHubVcs, packagist: PackagistVcs) -> Self {
        Self { github, packagist }
    }

    pub fn from_config(config: &RegistryConfig) -> Self {
        let github = GitHubVcs::new(
            &config.vcs.github_api_url,
            config.vcs.github_token.clone(),
            &config.plugin_type,
        )
        .with_webhook(
            config.vcs.webhook_url.clone(),
            config.vcs.webhook_secret.clone(),
        );
        let packagist = PackagistVcs::new(&config.vcs.packagist_url, &config.plugin_type);
        Self::new(github, packagist)
    }

    fn route(&self, package: &Package) -> &dyn Vcs {
        let on_github = package
            .repository
            .as_deref()
            .and_then(repository_slug)
            .is_some();
        if on_github {
            &self.github
        } else {
            &self.packagist
        }
    }
}

#[async_trait::async_trait]
impl Vcs for VcsRouter {
    async fn list_tags(&self, package: &Package) -> Result<IndexMap<String, String>, VcsError> {
        self.route(package).list_tags(package).await
    }

    async fn populate_release(
        &self,
        package: &Package,
        release: &mut Release,
    ) -> Result<(), VcsError> {
        self.route(package).populate_release(package, release).await
    }

    fn has_token(&self, package: &Package) -> bool {
        self.route(package).has_token(package)
    }

    async fn create_webhook(&self, package: &Package) -> Result<Option<Webhook>, VcsError> {
        self.route(package).create_webhook(package).await
    }

    async fn delete_webhook(&self, package: &Package) -> Result<(), VcsError> {
        self.route(package).delete_webhook(package).await
    }
}
