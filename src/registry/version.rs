//! `ModuleVersion` - one installable version of a module

use crate::package::{fetch_to_file, CancellationToken, DownloadError};
use chrono::{DateTime, Utc};
use reqwest::blocking::Client;
use std::fmt;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OriginKind {
    Release,
    Branch,
    PullRequest,
}

impl fmt::Display for OriginKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            OriginKind::Release => "release",
            OriginKind::Branch => "branch",
            OriginKind::PullRequest => "pull request",
        })
    }
}

/// Tarball endpoint every version is fetched from
pub fn archive_url(api_base_url: &str, organisation: &str, repository: &str, git_ref: &str) -> String {
    format!(
        "{}/repos/{organisation}/{repository}/tarball/{git_ref}",
        api_base_url.trim_end_matches('/')
    )
}

/// Immutable once built
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModuleVersion {
    name: String,
    created_at: Option<DateTime<Utc>>,
    prerelease: bool,
    html_url: String,
    archive_url: String,
    origin: OriginKind,
}

impl ModuleVersion {
    pub fn new(
        name: impl Into<String>,
        origin: OriginKind,
        created_at: Option<DateTime<Utc>>,
        prerelease: bool,
        html_url: impl Into<String>,
        archive_url: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            created_at,
            prerelease,
            html_url: html_url.into(),
            archive_url: archive_url.into(),
            origin,
        }
    }

    /// Version tracking the head of a branch
    pub fn branch(api_base_url: &str, organisation: &str, repository: &str, branch: &str) -> Self {
        Self::new(
            branch,
            OriginKind::Branch,
            None,
            false,
            format!("https://github.com/{organisation}/{repository}/tree/{branch}"),
            archive_url(api_base_url, organisation, repository, branch),
        )
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn created_at(&self) -> Option<DateTime<Utc>> {
        self.created_at
    }

    pub fn is_prerelease(&self) -> bool {
        self.prerelease
    }

    /// Human-facing page of the version
    pub fn html_url(&self) -> &str {
        &self.html_url
    }

    pub fn archive_url(&self) -> &str {
        &self.archive_url
    }

    pub fn origin(&self) -> OriginKind {
        self.origin
    }

    pub fn display_name(&self) -> String {
        if self.prerelease {
            format!("{} (prerelease)", self.name)
        } else {
            self.name.clone()
        }
    }

    /// File name the archive is stored under
    pub fn archive_file_name(&self) -> String {
        let safe: String = self
            .name
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_') { c } else { '_' })
            .collect();
        format!("{safe}.tar.gz")
    }

    /// Download the archive into `destination_dir`
    ///
    /// Nothing is left at the final path unless the whole body arrived.
    pub fn download_archive(
        &self,
        http: &Client,
        destination_dir: &Path,
        cancel: &CancellationToken,
        progress: impl FnMut(f32),
    ) -> Result<PathBuf, DownloadError> {
        let destination = destination_dir.join(self.archive_file_name());
        fetch_to_file(http, &self.archive_url, &destination, cancel, progress)
    }
}

impl fmt::Display for ModuleVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.display_name())
    }
}
