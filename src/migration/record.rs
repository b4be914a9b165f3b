//! `BaselineRecord` - one row of the bookkeeping table

use crate::executor::DbError;
use crate::migration::version::Version;
use chrono::{DateTime, NaiveDateTime, Utc};
use std::collections::BTreeMap;

/// What the bookkeeping table says about an installed module
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BaselineRecord {
    pub module: String,

    /// Version the module is at
    pub version: Version,

    /// Checksum of the changeset that produced `version`
    pub checksum: String,

    /// When the last install or upgrade committed
    pub applied_at: DateTime<Utc>,

    /// Checksum of every changeset applied so far
    pub changeset_checksums: BTreeMap<Version, String>,

    /// Parameter values the module was installed with (JSON object)
    pub parameters: serde_json::Value,
}

/// Columns read by [`BaselineRecord::from_row`], in order
pub(crate) const SELECT_COLUMNS: &str =
    "module, version, checksum, applied_at, changeset_checksums::text, parameters::text";

impl BaselineRecord {
    /// Build a record from a row selected with [`SELECT_COLUMNS`]
    ///
    /// # Errors
    ///
    /// Returns `DbError::Parse` if a stored version or JSON document is invalid.
    pub fn from_row(row: &may_postgres::Row) -> Result<Self, DbError> {
        let module: String = row.try_get(0)?;
        let version: String = row.try_get(1)?;
        let checksum: String = row.try_get(2)?;
        let applied_at: NaiveDateTime = row.try_get(3)?;
        let changeset_checksums: String = row.try_get(4)?;
        let parameters: String = row.try_get(5)?;

        Ok(Self {
            version: parse_version(&version)?,
            changeset_checksums: parse_checksums(&changeset_checksums)?,
            parameters: serde_json::from_str(&parameters)
                .map_err(|e| DbError::Parse(format!("parameters of module {module}: {e}")))?,
            module,
            checksum,
            applied_at: applied_at.and_utc(),
        })
    }
}

fn parse_version(raw: &str) -> Result<Version, DbError> {
    raw.parse()
        .map_err(|e| DbError::Parse(format!("recorded version: {e}")))
}

/// Decode the `{"1.0.0": "<sha256>", ...}` document
pub(crate) fn parse_checksums(raw: &str) -> Result<BTreeMap<Version, String>, DbError> {
    let map: BTreeMap<String, String> = serde_json::from_str(raw)
        .map_err(|e| DbError::Parse(format!("changeset checksums: {e}")))?;
    map.into_iter()
        .map(|(version, checksum)| Ok((parse_version(&version)?, checksum)))
        .collect()
}

/// Encode checksums for the `changeset_checksums` column
pub(crate) fn encode_checksums(checksums: &BTreeMap<Version, String>) -> String {
    let map: serde_json::Map<String, serde_json::Value> = checksums
        .iter()
        .map(|(version, checksum)| (version.to_string(), checksum.clone().into()))
        .collect();
    serde_json::Value::Object(map).to_string()
}
