//! `ChangesetResolver` - which changesets an upgrade has to apply

use crate::migration::changeset::Changeset;
use crate::migration::checksum::checksums_match;
use crate::migration::record::BaselineRecord;
use crate::migration::version::Version;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ResolveError {
    #[error(
        "changeset {version} was modified after being applied \
         (recorded checksum {recorded}, current {current})"
    )]
    ChecksumDrift {
        version: Version,
        recorded: String,
        current: String,
    },
    #[error("installed version {version} has no changeset in the package")]
    MissingChangeset { version: Version },
}

/// Pure function of the package's changesets and the recorded baseline
pub struct ChangesetResolver;

impl ChangesetResolver {
    /// Changesets above the baseline, up to and including `target`
    ///
    /// `changesets` must be sorted by version without duplicates, as
    /// [`ModuleConfiguration`](crate::migration::ModuleConfiguration) keeps them.
    /// Every already-applied changeset with a recorded checksum is verified
    /// first; any drift aborts the resolution.
    pub fn pending<'a>(
        changesets: &'a [Changeset],
        baseline: Option<&BaselineRecord>,
        target: Option<Version>,
    ) -> Result<Vec<&'a Changeset>, ResolveError> {
        let from = match baseline {
            Some(record) => {
                Self::verify_applied(changesets, record)?;
                record.version
            }
            None => Version::ZERO,
        };

        Ok(changesets
            .iter()
            .filter(|c| c.version > from)
            .filter(|c| target.map_or(true, |target| c.version <= target))
            .collect())
    }

    fn verify_applied(changesets: &[Changeset], record: &BaselineRecord) -> Result<(), ResolveError> {
        let current = changesets
            .iter()
            .find(|c| c.version == record.version)
            .ok_or(ResolveError::MissingChangeset {
                version: record.version,
            })?;
        check(current, &record.checksum)?;

        for changeset in changesets.iter().take_while(|c| c.version <= record.version) {
            if let Some(recorded) = record.changeset_checksums.get(&changeset.version) {
                check(changeset, recorded)?;
            }
        }
        Ok(())
    }
}

fn check(changeset: &Changeset, recorded: &str) -> Result<(), ResolveError> {
    if checksums_match(recorded, &changeset.checksum) {
        Ok(())
    } else {
        Err(ResolveError::ChecksumDrift {
            version: changeset.version,
            recorded: recorded.to_string(),
            current: changeset.checksum.clone(),
        })
    }
}
