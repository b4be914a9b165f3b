//! Upgrade status reporting

use crate::migration::record::BaselineRecord;
use crate::migration::version::Version;
use std::path::PathBuf;

/// Where a module stands against its package
#[derive(Debug, Clone)]
pub struct UpgradeStatus {
    pub module: String,

    /// Recorded baseline (`None` if the module is not installed)
    pub baseline: Option<BaselineRecord>,

    /// Changesets an upgrade would apply, ascending
    pub pending: Vec<PendingChangeset>,

    /// Latest version the package provides
    pub latest: Option<Version>,
}

/// A changeset not yet applied
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingChangeset {
    pub version: Version,
    pub files: Vec<PathBuf>,
    pub checksum: String,
}

impl UpgradeStatus {
    #[must_use]
    pub fn is_installed(&self) -> bool {
        self.baseline.is_some()
    }

    /// Installed and nothing pending
    #[must_use]
    pub fn is_up_to_date(&self) -> bool {
        self.is_installed() && self.pending.is_empty()
    }

    #[must_use]
    pub fn installed_version(&self) -> Option<Version> {
        self.baseline.as_ref().map(|b| b.version)
    }

    #[must_use]
    pub fn next_pending_version(&self) -> Option<Version> {
        self.pending.first().map(|p| p.version)
    }
}

/// Outcome of an install or upgrade
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpgradeReport {
    pub module: String,
    /// Baseline before the run (`None` for an install)
    pub from: Option<Version>,
    /// Versions applied, in order; empty when there was nothing to do
    pub applied: Vec<Version>,
}

impl UpgradeReport {
    /// Version the module is at after the run
    pub fn version(&self) -> Option<Version> {
        self.applied.last().copied().or(self.from)
    }

    pub fn is_noop(&self) -> bool {
        self.applied.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_report_version() {
        let report = UpgradeReport {
            module: "tww".into(),
            from: Some(Version::new(1, 0, 0)),
            applied: vec![],
        };
        assert!(report.is_noop());
        assert_eq!(report.version(), Some(Version::new(1, 0, 0)));

        let report = UpgradeReport {
            applied: vec![Version::new(1, 1, 0), Version::new(2, 0, 0)],
            ..report
        };
        assert_eq!(report.version(), Some(Version::new(2, 0, 0)));
    }

    #[test]
    fn test_not_installed_is_not_up_to_date() {
        let status = UpgradeStatus {
            module: "tww".into(),
            baseline: None,
            pending: vec![],
            latest: None,
        };
        assert!(!status.is_up_to_date());
        assert_eq!(status.installed_version(), None);
    }

    #[test]
    fn test_next_pending_version_is_the_lowest() {
        let pending = |major| PendingChangeset {
            version: Version::new(major, 0, 0),
            files: vec![],
            checksum: String::new(),
        };
        let status = UpgradeStatus {
            module: "tww".into(),
            baseline: None,
            pending: vec![pending(1), pending(2)],
            latest: Some(Version::new(2, 0, 0)),
        };
        assert_eq!(status.next_pending_version(), Some(Version::new(1, 0, 0)));
        assert_eq!(
            UpgradeStatus { pending: vec![], ..status }.next_pending_version(),
            None
        );
    }
}
