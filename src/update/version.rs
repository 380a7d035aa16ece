//! Update results and version comparison

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;

/// Outcome category of one update check
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum UpdateResultType {
    NotInstalled,
    UpToDate,
    OutOfDate,
    InvalidPlugin,
    CheckFailed,
}

impl UpdateResultType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NotInstalled => "NOT_INSTALLED",
            Self::UpToDate => "UP_TO_DATE",
            Self::OutOfDate => "OUT_OF_DATE",
            Self::InvalidPlugin => "INVALID_PLUGIN",
            Self::CheckFailed => "CHECK_FAILED",
        }
    }
}

impl fmt::Display for UpdateResultType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of checking one module against its upstream
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdateResult {
    pub kind: UpdateResultType,
    pub current: Option<String>,
    pub latest: Option<String>,
}

impl UpdateResult {
    pub fn new(kind: UpdateResultType) -> Self {
        Self {
            kind,
            current: None,
            latest: None,
        }
    }

    pub fn with_versions(
        kind: UpdateResultType,
        current: Option<String>,
        latest: Option<String>,
    ) -> Self {
        Self {
            kind,
            current,
            latest,
        }
    }

    pub fn is_out_of_date(&self) -> bool {
        self.kind == UpdateResultType::OutOfDate
    }
}

/// Compare an installed version against the latest upstream version
pub fn compare(current: &str, latest: &str) -> UpdateResultType {
    match compare_versions(current, latest) {
        Ordering::Less => UpdateResultType::OutOfDate,
        Ordering::Equal | Ordering::Greater => UpdateResultType::UpToDate,
    }
}

/// Order two version strings by their numeric release segments.
///
/// Qualifiers are ignored: anything in parentheses, a leading `v`, and
/// everything after the dotted numeric prefix (`-SNAPSHOT`, `-dev`,
/// `+build`). Missing segments count as zero.
pub fn compare_versions(a: &str, b: &str) -> Ordering {
    let a = segments(a);
    let b = segments(b);
    let len = a.len().max(b.len());
    for i in 0..len {
        let left = a.get(i).copied().unwrap_or(0);
        let right = b.get(i).copied().unwrap_or(0);
        match left.cmp(&right) {
            Ordering::Equal => continue,
            other => return other,
        }
    }
    Ordering::Equal
}

/// Numeric release segments of a version string
pub fn segments(version: &str) -> Vec<u64> {
    let without_paren = version.split('(').next().unwrap_or_default().trim();
    let trimmed = without_paren
        .strip_prefix(['v', 'V'])
        .unwrap_or(without_paren);

    let prefix_len = trimmed
        .find(|c: char| !(c.is_ascii_digit() || c == '.'))
        .unwrap_or(trimmed.len());

    trimmed[..prefix_len]
        .split('.')
        .filter(|s| !s.is_empty())
        .map(|s| s.parse::<u64>().unwrap_or(u64::MAX))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_suffix_is_ignored() {
        assert_eq!(compare("1.2.3 (build 45)", "1.2.3"), UpdateResultType::UpToDate);
        assert_eq!(compare("2.4.0-SNAPSHOT (b612)", "2.4.0"), UpdateResultType::UpToDate);
    }

    #[test]
    fn test_snapshot_older_than_next_patch() {
        assert_eq!(compare("1.2.3-SNAPSHOT", "1.2.4"), UpdateResultType::OutOfDate);
        assert_eq!(compare("1.2.3-dev", "1.2.3"), UpdateResultType::UpToDate);
    }

    #[test]
    fn test_newer_local_is_up_to_date() {
        assert_eq!(compare("2.0.0", "1.9.9"), UpdateResultType::UpToDate);
    }

    #[test]
    fn test_missing_segments_are_zero() {
        assert_eq!(compare_versions("1.2", "1.2.0"), Ordering::Equal);
        assert_eq!(compare_versions("1.2", "1.2.1"), Ordering::Less);
        assert_eq!(compare_versions("v1.10", "1.9"), Ordering::Greater);
        assert_eq!(compare_versions("1.0.0+build.7", "1.0.0"), Ordering::Equal);
    }

    #[test]
    fn test_segments() {
        assert_eq!(segments("v2.4.1-SNAPSHOT"), vec![2, 4, 1]);
        assert_eq!(segments("nightly"), Vec::<u64>::new());
        assert_eq!(segments("3.0.0 (git-abc)"), vec![3, 0, 0]);
    }

    #[test]
    fn test_result_type_names() {
        assert_eq!(UpdateResultType::CheckFailed.to_string(), "CHECK_FAILED");
        assert_eq!(
            serde_json::to_string(&UpdateResultType::OutOfDate).unwrap(),
            "\"OUT_OF_DATE\""
        );
    }
}
