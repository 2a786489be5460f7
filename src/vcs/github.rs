//! GitHub REST API adapter

use std::sync::LazyLock;
use std::time::Duration;

use indexmap::IndexMap;
use regex::Regex;
use serde::Deserialize;
use serde_json::json;
use tracing::{debug, warn};

use crate::config::{DEFAULT_GITHUB_API_URL, FETCH_TIMEOUT_MS, PLUGIN_PACKAGE_TYPE};
use crate::store::{Package, Reference, Release};
use crate::vcs::error::VcsError;
use crate::vcs::{Vcs, Webhook, parse_manifest, validate_manifest};

/// Tags requested per page
const PER_PAGE: usize = 100;

const CHANGELOG_FILE: &str = "CHANGELOG.md";

static REPOSITORY_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(?:https?://|ssh://git@|git@)(?:www\.)?github\.com[/:]([\w.-]+)/([\w.-]+?)(?:\.git)?/?$")
        .expect("Invalid repository regex")
});

/// `owner/repo` for a GitHub repository URL
pub fn repository_slug(repository: &str) -> Option<String> {
    REPOSITORY_RE
        .captures(repository.trim())
        .map(|caps| format!("{}/{}", &caps[1], &caps[2]))
}

/// Response item from the tags API
#[derive(Debug, Deserialize)]
struct Tag {
    name: String,
    commit: TagCommit,
}

#[derive(Debug, Deserialize)]
struct TagCommit {
    sha: String,
}

#[derive(Debug, Deserialize)]
struct Hook {
    id: u64,
}

pub struct GitHubVcs {
    client: reqwest::Client,
    base_url: String,
    token: Option<String>,
    plugin_type: String,
    webhook_url: Option<String>,
    webhook_secret: Option<String>,
}

impl GitHubVcs {
    /// Creates a new GitHubVcs with a custom base URL
    pub fn new(base_url: &str, token: Option<String>, plugin_type: &str) -> Self {
        Self {
            client: reqwest::Client::builder()
                .user_agent("plugin-registry")
                .timeout(Duration::from_millis(FETCH_TIMEOUT_MS))
                .build()
                .expect("Failed to create HTTP client"),
            base_url: base_url.trim_end_matches('/').to_string(),
            token,
            plugin_type: plugin_type.to_string(),
            webhook_url: None,
            webhook_secret: None,
        }
    }

    pub fn with_webhook(mut self, url: Option<String>, secret: Option<String>) -> Self {
        self.webhook_url = url;
        self.webhook_secret = secret;
        self
    }

    fn slug(package: &Package) -> Result<String, VcsError> {
        let repository = package.repository.as_deref().unwrap_or_default();
        repository_slug(repository)
            .ok_or_else(|| VcsError::UnsupportedRepository(repository.to_string()))
    }

    fn request(&self, method: reqwest::Method, url: &str) -> reqwest::RequestBuilder {
        let builder = self
            .client
            .request(method, url)
            .header("Accept", "application/vnd.github+json")
            .header("X-GitHub-Api-Version", "2022-11-28");
        match &self.token {
            Some(token) => builder.bearer_auth(token),
            None => builder,
        }
    }

    /// Raw contents of `path` at `sha`
    async fn fetch_file(&self, slug: &str, path: &str, sha: &str) -> Result<String, VcsError> {
        let url = format!(
            "{}/repos/{}/contents/{}?ref={}",
            self.base_url, slug, path, sha
        );

        let response = self
            .request(reqwest::Method::GET, &url)
            .header("Accept", "application/vnd.github.raw+json")
            .send()
            .await?;
        let response = check_status(response, &format!("{}@{}:{}", slug, sha, path))?;

        Ok(response.text().await?)
    }
}

impl Default for GitHubVcs {
    fn default() -> Self {
        Self::new(DEFAULT_GITHUB_API_URL, None, PLUGIN_PACKAGE_TYPE)
    }
}

/// Map GitHub status codes onto [`VcsError`]
fn check_status(
    response: reqwest::Response,
    resource: &str,
) -> Result<reqwest::Response, VcsError> {
    let status = response.status();

    if status == reqwest::StatusCode::NOT_FOUND {
        return Err(VcsError::NotFound(resource.to_string()));
    }

    let exhausted = status == reqwest::StatusCode::FORBIDDEN
        && response
            .headers()
            .get("x-ratelimit-remaining")
            .and_then(|v| v.to_str().ok())
            == Some("0");

    if status == reqwest::StatusCode::TOO_MANY_REQUESTS || exhausted {
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
        warn!("GitHub API unavailable ({}): {}", status, resource);
        return Err(VcsError::Unavailable(status.to_string()));
    }

    if !status.is_success() {
        warn!("GitHub API returned status {}: {}", status, resource);
        return Err(VcsError::InvalidResponse(format!(
            "Unexpected status: {}",
            status
        )));
    }

    Ok(response)
}

#[async_trait::async_trait]
impl Vcs for GitHubVcs {
    async fn list_tags(&self, package: &Package) -> Result<IndexMap<String, String>, VcsError> {
        let slug = Self::slug(package)?;
        let mut tags = IndexMap::new();

        for page in 1.. {
            let url = format!(
                "{}/repos/{}/tags?per_page={}&page={}",
                self.base_url, slug, PER_PAGE, page
            );
            let response = self.request(reqwest::Method::GET, &url).send().await?;
            let response = check_status(response, &slug)?;

            let batch: Vec<Tag> = response.json().await.map_err(|e| {
                warn!("Failed to parse GitHub tags response: {}", e);
                VcsError::InvalidResponse(e.to_string())
            })?;

            let count = batch.len();
            for tag in batch {
                tags.entry(tag.name).or_insert(tag.commit.sha);
            }

            if count < PER_PAGE {
                break;
            }
        }

        debug!("Fetched {} tags for {}", tags.len(), slug);
        Ok(tags)
    }

    async fn populate_release(
        &self,
        package: &Package,
        release: &mut Release,
    ) -> Result<(), VcsError> {
        let slug = Self::slug(package)?;

        let manifest = match self.fetch_file(&slug, "composer.json", &release.sha).await {
            Ok(raw) => raw,
            Err(VcsError::NotFound(_)) => {
                release.invalidate(format!("No composer.json found for {}", release.version));
                return Ok(());
            }
            Err(e) => return Err(e),
        };

        let mut metadata = match parse_manifest(&manifest) {
            Ok(metadata) => metadata,
            Err(reason) => {
                release.invalidate(reason);
                return Ok(());
            }
        };

        if let Err(reason) = validate_manifest(package, &self.plugin_type, &metadata) {
            release.invalidate(reason);
            return Ok(());
        }

        let changelog = match self.fetch_file(&slug, CHANGELOG_FILE, &release.sha).await {
            Ok(text) => Some(text),
            Err(VcsError::NotFound(_)) => None,
            Err(e) => return Err(e),
        };

        metadata.source = Some(Reference {
            kind: "git".to_string(),
            url: format!("https://github.com/{}.git", slug),
            reference: Some(release.sha.clone()),
            shasum: None,
        });
        metadata.dist = Some(Reference {
            kind: "zip".to_string(),
            url: format!("{}/repos/{}/zipball/{}", self.base_url, slug, release.sha),
            reference: Some(release.sha.clone()),
            shasum: None,
        });

        release.metadata = Some(metadata);
        release.changelog = changelog;
        Ok(())
    }

    fn has_token(&self, _package: &Package) -> bool {
        self.token.is_some()
    }

    async fn create_webhook(&self, package: &Package) -> Result<Option<Webhook>, VcsError> {
        let Some(callback) = &self.webhook_url else {
            return Ok(None);
        };
        let slug = Self::slug(package)?;
        let url = format!("{}/repos/{}/hooks", self.base_url, slug);

        let body = json!({
            "name": "web",
            "active": true,
            "events": ["push"],
            "config": {
                "url": callback,
                "content_type": "json",
                "secret": self.webhook_secret.as_deref().unwrap_or_default(),
            }
        });

        let response = self
            .request(reqwest::Method::POST, &url)
            .json(&body)
            .send()
            .await?;
        let response = check_status(response, &slug)?;

        let hook: Hook = response.json().await.map_err(|e| {
            warn!("Failed to parse GitHub hook response: {}", e);
            VcsError::InvalidResponse(e.to_string())
        })?;

        Ok(Some(Webhook {
            id: hook.id.to_string(),
            secret: self.webhook_secret.clone(),
        }))
    }

    async fn delete_webhook(&self, package: &Package) -> Result<(), VcsError> {
        let Some(hook_id) = &package.webhook_id else {
            return Ok(());
        };
        let slug = Self::slug(package)?;
        let url = format!("{}/repos/{}/hooks/{}", self.base_url, slug, hook_id);

        let response = self.request(reqwest::Method::DELETE, &url).send().await?;
        match check_status(response, &slug) {
            Ok(_) | Err(VcsError::NotFound(_)) => Ok(()),
            Err(e) => Err(e),
        }
    }
}
