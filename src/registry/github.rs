//! Version discovery against the GitHub REST API

use crate::config::TmmtConfig;
use crate::registry::version::{archive_url, ModuleVersion, OriginKind};
use crate::registry::RegistryError;
use chrono::{DateTime, Utc};
use reqwest::blocking::Client;
use serde::de::DeserializeOwned;
use serde::Deserialize;

const USER_AGENT: &str = concat!("tmmt/", env!("CARGO_PKG_VERSION"));
const PAGE_SIZE: u32 = 100;

/// Where module versions come from
pub trait VersionSource {
    /// Published releases, including prereleases
    fn releases(&self, organisation: &str, repository: &str) -> Result<Vec<ModuleVersion>, RegistryError>;

    fn branches(&self, organisation: &str, repository: &str) -> Result<Vec<ModuleVersion>, RegistryError>;

    /// Open pull requests
    fn pull_requests(&self, organisation: &str, repository: &str) -> Result<Vec<ModuleVersion>, RegistryError>;
}

#[derive(Debug, Deserialize)]
pub(crate) struct ReleasePayload {
    #[serde(default)]
    pub name: Option<String>,
    pub tag_name: String,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub prerelease: bool,
    pub html_url: String,
}

#[derive(Debug, Deserialize)]
pub(crate) struct BranchPayload {
    pub name: String,
}

#[derive(Debug, Deserialize)]
pub(crate) struct PullRequestHead {
    pub sha: String,
}

#[derive(Debug, Deserialize)]
pub(crate) struct PullRequestPayload {
    pub number: u64,
    pub title: String,
    pub html_url: String,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
    pub head: PullRequestHead,
}

impl ReleasePayload {
    fn into_version(self, api: &str, organisation: &str, repository: &str) -> ModuleVersion {
        // Unnamed releases show their tag
        let name = self
            .name
            .filter(|name| !name.trim().is_empty())
            .unwrap_or_else(|| self.tag_name.clone());
        ModuleVersion::new(
            name,
            OriginKind::Release,
            self.created_at,
            self.prerelease,
            self.html_url,
            archive_url(api, organisation, repository, &self.tag_name),
        )
    }
}

impl PullRequestPayload {
    fn into_version(self, api: &str, organisation: &str, repository: &str) -> ModuleVersion {
        ModuleVersion::new(
            format!("#{} {}", self.number, self.title),
            OriginKind::PullRequest,
            self.created_at,
            false,
            self.html_url,
            archive_url(api, organisation, repository, &self.head.sha),
        )
    }
}

/// Blocking GitHub client
#[derive(Debug, Clone)]
pub struct GithubClient {
    http: Client,
    api_base_url: String,
}

impl GithubClient {
    /// Client with the API root and timeout of `settings`
    pub fn new(settings: &TmmtConfig) -> Result<Self, RegistryError> {
        let http = Client::builder()
            .user_agent(USER_AGENT)
            .timeout(settings.http_timeout())
            .build()
            .map_err(|source| RegistryError::Http {
                url: settings.api_base_url.clone(),
                source,
            })?;
        Ok(Self::with_client(http, &settings.api_base_url))
    }

    pub fn with_client(http: Client, api_base_url: &str) -> Self {
        Self {
            http,
            api_base_url: api_base_url.trim_end_matches('/').to_string(),
        }
    }

    /// Underlying HTTP client, reused for archive downloads
    pub fn http(&self) -> &Client {
        &self.http
    }

    pub fn api_base_url(&self) -> &str {
        &self.api_base_url
    }

    fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T, RegistryError> {
        let url = format!("{}{path}", self.api_base_url);
        log::debug!("GET {url}");
        let http_err = |source| RegistryError::Http {
            url: url.clone(),
            source,
        };

        let response = self
            .http
            .get(&url)
            .header(reqwest::header::ACCEPT, "application/vnd.github+json")
            .send()
            .map_err(http_err)?;
        let status = response.status();
        if !status.is_success() {
            return Err(RegistryError::HttpStatus {
                url: url.clone(),
                status: status.as_u16(),
            });
        }
        response.json::<T>().map_err(http_err)
    }
}

impl VersionSource for GithubClient {
    fn releases(&self, organisation: &str, repository: &str) -> Result<Vec<ModuleVersion>, RegistryError> {
        let payload: Vec<ReleasePayload> =
            self.get(&format!("/repos/{organisation}/{repository}/releases?per_page={PAGE_SIZE}"))?;
        Ok(payload
            .into_iter()
            .map(|release| release.into_version(&self.api_base_url, organisation, repository))
            .collect())
    }

    fn branches(&self, organisation: &str, repository: &str) -> Result<Vec<ModuleVersion>, RegistryError> {
        let payload: Vec<BranchPayload> =
            self.get(&format!("/repos/{organisation}/{repository}/branches?per_page={PAGE_SIZE}"))?;
        Ok(payload
            .into_iter()
            .map(|branch| ModuleVersion::branch(&self.api_base_url, organisation, repository, &branch.name))
            .collect())
    }

    fn pull_requests(&self, organisation: &str, repository: &str) -> Result<Vec<ModuleVersion>, RegistryError> {
        let payload: Vec<PullRequestPayload> = self.get(&format!(
            "/repos/{organisation}/{repository}/pulls?state=open&per_page={PAGE_SIZE}"
        ))?;
        Ok(payload
            .into_iter()
            .map(|pr| pr.into_version(&self.api_base_url, organisation, repository))
            .collect())
    }
}
