//! Changeset discovery
//!
//! A module's changelogs directory holds one entry per version, either a
//! directory (`1.1.0/`, every `*.sql` file inside applied in file-name order)
//! or a single file (`1.1.0.sql`, `1.1.0_add_srid.sql`).

use crate::migration::checksum::changeset_checksum;
use crate::migration::version::Version;
use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

static DIR_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(v?\d+\.\d+(?:\.\d+)?)$").expect("directory pattern is valid"));
static FILE_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(v?\d+\.\d+(?:\.\d+)?)(?:[_-][^/]*)?\.sql$").expect("file pattern is valid")
});

#[derive(Debug, thiserror::Error)]
pub enum ChangesetError {
    #[error("changelogs directory not found: {0}")]
    DirectoryNotFound(PathBuf),
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("{path} is named like a changeset but its version is out of range")]
    VersionOutOfRange { path: PathBuf },
    #[error("version {version} is provided by both {first} and {second}")]
    DuplicateVersion {
        version: Version,
        first: PathBuf,
        second: PathBuf,
    },
}

/// One SQL script of a changeset, read once at discovery
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangesetFile {
    /// Name relative to the changeset (file name for single-file changesets)
    pub name: String,
    pub path: PathBuf,
    pub sql: String,
}

/// A versioned unit of schema change
///
/// The checksum covers exactly the SQL held here, which is also what gets
/// executed; later edits on disk cannot slip in between check and apply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Changeset {
    pub version: Version,
    pub files: Vec<ChangesetFile>,
    pub checksum: String,
}

impl Changeset {
    pub fn new(version: Version, files: Vec<ChangesetFile>) -> Self {
        let checksum =
            changeset_checksum(files.iter().map(|f| (f.name.as_str(), f.sql.as_str())));
        Self {
            version,
            files,
            checksum,
        }
    }

    /// Changeset built from inline SQL rather than files
    pub fn from_sql(version: Version, name: impl Into<String>, sql: impl Into<String>) -> Self {
        let name = name.into();
        Self::new(
            version,
            vec![ChangesetFile {
                path: PathBuf::from(&name),
                name,
                sql: sql.into(),
            }],
        )
    }
}

fn read_file(path: &Path, name: String) -> Result<ChangesetFile, ChangesetError> {
    let sql = fs::read_to_string(path).map_err(|source| ChangesetError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(ChangesetFile {
        name,
        path: path.to_path_buf(),
        sql,
    })
}

fn sorted_entries(dir: &Path) -> Result<Vec<(String, PathBuf)>, ChangesetError> {
    let io_err = |source| ChangesetError::Io {
        path: dir.to_path_buf(),
        source,
    };
    let mut entries = Vec::new();
    for entry in fs::read_dir(dir).map_err(io_err)? {
        let entry = entry.map_err(io_err)?;
        let name = entry.file_name().to_string_lossy().into_owned();
        entries.push((name, entry.path()));
    }
    entries.sort();
    Ok(entries)
}

fn read_version_dir(path: &Path) -> Result<Vec<ChangesetFile>, ChangesetError> {
    let mut files = Vec::new();
    for (name, file_path) in sorted_entries(path)? {
        if !file_path.is_file() || !name.ends_with(".sql") {
            log::debug!("ignoring non-SQL entry {}", file_path.display());
            continue;
        }
        files.push(read_file(&file_path, name)?);
    }
    if files.is_empty() {
        log::warn!("changeset directory {} contains no SQL files", path.display());
    }
    Ok(files)
}

/// Discover all changesets in a changelogs directory
///
/// Returns the changesets sorted by version (ascending). Entries whose names are
/// not versions are skipped.
///
/// # Errors
///
/// Returns errors if:
/// - The directory doesn't exist or can't be read
/// - A version-named entry does not fit `u64` components
/// - Two entries resolve to the same version
pub fn discover_changesets(changelogs_dir: &Path) -> Result<Vec<Changeset>, ChangesetError> {
    if !changelogs_dir.is_dir() {
        return Err(ChangesetError::DirectoryNotFound(changelogs_dir.to_path_buf()));
    }

    let mut found: BTreeMap<Version, (PathBuf, Vec<ChangesetFile>)> = BTreeMap::new();

    for (name, path) in sorted_entries(changelogs_dir)? {
        let (version, files) = if path.is_dir() {
            let Some(caps) = DIR_RE.captures(&name) else {
                log::debug!("ignoring directory {}", path.display());
                continue;
            };
            (caps[1].parse::<Version>(), read_version_dir(&path)?)
        } else {
            let Some(caps) = FILE_RE.captures(&name) else {
                log::debug!("ignoring file {}", path.display());
                continue;
            };
            let version = caps[1].parse::<Version>();
            (version, vec![read_file(&path, name.clone())?])
        };

        // Only fails on numeric overflow
        let Ok(version) = version else {
            return Err(ChangesetError::VersionOutOfRange { path });
        };

        if let Some((first, _)) = found.get(&version) {
            return Err(ChangesetError::DuplicateVersion {
                version,
                first: first.clone(),
                second: path,
            });
        }
        found.insert(version, (path, files));
    }

    Ok(found
        .into_iter()
        .map(|(version, (_, files))| Changeset::new(version, files))
        .collect())
}
