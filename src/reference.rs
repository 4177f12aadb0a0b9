//! # Path References
//!
//! A [`DataPath`] names a dataset stored inside a container, e.g.
//! `data/scan01/HeightTrace` or `process/001-plane_level/leveled`. It is a pure
//! lookup key with no ownership of the data it names.
//!
//! The type exists to disambiguate apply-engine arguments: a `DataPath` input is
//! resolved to the stored array before the function is invoked, while a bare
//! string is passed through to the function unchanged.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Typed reference to a dataset inside a container
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DataPath(String);

impl DataPath {
    /// Create a path reference from a `/`-separated container path
    pub fn new(path: impl Into<String>) -> Self {
        Self(path.into())
    }

    /// The raw path string
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Path segments between separators
    pub fn segments(&self) -> impl Iterator<Item = &str> {
        self.0.split('/').filter(|s| !s.is_empty())
    }

    /// Final path segment (the dataset name), empty string for an empty path
    pub fn name(&self) -> &str {
        self.segments().last().unwrap_or("")
    }

    /// New reference with `segment` appended
    pub fn join(&self, segment: &str) -> DataPath {
        if self.0.is_empty() {
            DataPath(segment.to_string())
        } else {
            DataPath(format!("{}/{}", self.0.trim_end_matches('/'), segment))
        }
    }
}

impl fmt::Display for DataPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for DataPath {
    fn from(path: &str) -> Self {
        Self::new(path)
    }
}

impl From<String> for DataPath {
    fn from(path: String) -> Self {
        Self::new(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_name_is_last_segment() {
        let path = DataPath::new("data/scan01/HeightTrace");
        assert_eq!(path.name(), "HeightTrace");
        assert_eq!(path.segments().count(), 3);
    }

    #[test]
    fn test_join() {
        let path = DataPath::new("process/001-plane_level");
        assert_eq!(path.join("leveled").as_str(), "process/001-plane_level/leveled");
        assert_eq!(DataPath::new("").join("data").as_str(), "data");
    }

    #[test]
    fn test_serde_transparent() {
        let path = DataPath::new("data/scan01/Phase");
        let json = serde_json::to_string(&path).unwrap();
        assert_eq!(json, "\"data/scan01/Phase\"");
        let back: DataPath = serde_json::from_str(&json).unwrap();
        assert_eq!(back, path);
    }
}
