//! Semantic version of a changeset (`major.minor.patch`)

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

static VERSION_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^v?(\d+)\.(\d+)(?:\.(\d+))?$").expect("version pattern is valid"));

/// Changeset version, totally ordered by (major, minor, patch)
///
/// A missing patch component parses as `0`, so `1.2` and `1.2.0` are the same version.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Version {
    pub major: u64,
    pub minor: u64,
    pub patch: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid version '{0}': expected MAJOR.MINOR[.PATCH]")]
pub struct VersionParseError(pub String);

impl Version {
    /// Stand-in baseline for a module that is not installed
    pub const ZERO: Version = Version::new(0, 0, 0);

    pub const fn new(major: u64, minor: u64, patch: u64) -> Self {
        Self {
            major,
            minor,
            patch,
        }
    }
}

impl FromStr for Version {
    type Err = VersionParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let caps = VERSION_RE
            .captures(s.trim())
            .ok_or_else(|| VersionParseError(s.to_string()))?;

        let component = |i: usize| -> Result<u64, VersionParseError> {
            caps.get(i)
                .map_or(Ok(0), |m| m.as_str().parse::<u64>())
                .map_err(|_| VersionParseError(s.to_string()))
        };

        Ok(Version::new(component(1)?, component(2)?, component(3)?))
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)
    }
}

impl Serialize for Version {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Version {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_versions() {
        assert_eq!("1.2.3".parse::<Version>().unwrap(), Version::new(1, 2, 3));
        assert_eq!("v2.0.0".parse::<Version>().unwrap(), Version::new(2, 0, 0));
        assert_eq!("1.2".parse::<Version>().unwrap(), Version::new(1, 2, 0));
    }

    #[test]
    fn test_parse_rejects_garbage() {
        for bad in ["", "1", "1.2.3.4", "1.x.0", "release-1.0.0", "1.0.0-rc1"] {
            assert!(bad.parse::<Version>().is_err(), "should reject {bad}");
        }
    }

    #[test]
    fn test_ordering_is_numeric() {
        let mut versions: Vec<Version> = ["1.10.0", "1.2.0", "0.9.9", "1.2.1"]
            .iter()
            .map(|v| v.parse().unwrap())
            .collect();
        versions.sort();
        let rendered: Vec<String> = versions.iter().map(ToString::to_string).collect();
        assert_eq!(rendered, ["0.9.9", "1.2.0", "1.2.1", "1.10.0"]);
        assert!(Version::ZERO < Version::new(0, 0, 1));
    }

    #[test]
    fn test_serde_as_string() {
        let json = serde_json::to_string(&Version::new(1, 1, 0)).unwrap();
        assert_eq!(json, "\"1.1.0\"");
        let back: Version = serde_json::from_str(&json).unwrap();
        assert_eq!(back, Version::new(1, 1, 0));
    }
}
