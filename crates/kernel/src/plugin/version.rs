//! Version strings and the simplified compatibility check.
//!
//! Plugin versions look like `MAJOR.MINOR.PATCH` with an optional suffix
//! (`1.4.0-beta.2`). Dependency ranges are versions with an optional operator
//! prefix (`^1.2.0`, `~1.2.0`, `>=1.0.0`). Only major and minor take part in
//! compatibility: the major must match and the installed minor must be at
//! least the required one.

use std::cmp::Ordering;
use std::fmt;
use std::sync::LazyLock;

use regex::Regex;

#[allow(clippy::expect_used)]
static VERSION_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\d+\.\d+\.\d+").expect("version pattern is valid"));

/// Returns true if `version` starts with `MAJOR.MINOR.PATCH`.
pub fn is_valid_version(version: &str) -> bool {
    VERSION_RE.is_match(version)
}

/// Numeric `MAJOR.MINOR.PATCH` triple. Suffixes are ignored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Version {
    pub major: u64,
    pub minor: u64,
    pub patch: u64,
}

impl Version {
    /// Parse a version or range, skipping any operator prefix.
    ///
    /// Missing segments default to zero; a string without any leading digits
    /// yields `None`.
    pub fn parse(raw: &str) -> Option<Self> {
        let trimmed = strip_prefix(raw);
        let mut segments = trimmed.split('.').map(leading_number);

        let major = segments.next().flatten()?;
        let minor = segments.next().flatten().unwrap_or(0);
        let patch = segments.next().flatten().unwrap_or(0);

        Some(Self {
            major,
            minor,
            patch,
        })
    }
}

impl Ord for Version {
    fn cmp(&self, other: &Self) -> Ordering {
        (self.major, self.minor, self.patch).cmp(&(other.major, other.minor, other.patch))
    }
}

impl PartialOrd for Version {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)
    }
}

/// Check whether `installed` satisfies the `required` range.
///
/// Compatible iff the majors are equal and the installed minor is greater
/// than or equal to the required minor. Patch versions are not compared.
pub fn is_compatible(installed: &str, required: &str) -> bool {
    match (Version::parse(installed), Version::parse(required)) {
        (Some(have), Some(want)) => have.major == want.major && have.minor >= want.minor,
        _ => false,
    }
}

/// Check `system` against an optional inclusive `[min, max]` window.
pub fn within_window(system: &str, min: Option<&str>, max: Option<&str>) -> bool {
    let Some(system) = Version::parse(system) else {
        return false;
    };

    let above_min = min
        .and_then(Version::parse)
        .is_none_or(|min| system >= min);
    let below_max = max
        .and_then(Version::parse)
        .is_none_or(|max| system <= max);

    above_min && below_max
}

fn strip_prefix(raw: &str) -> &str {
    raw.trim().trim_start_matches(|c: char| !c.is_ascii_digit())
}

fn leading_number(segment: &str) -> Option<u64> {
    let end = segment
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(segment.len());
    segment.get(..end).and_then(|digits| digits.parse().ok())
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn validates_version_strings() {
        assert!(is_valid_version("1.0.0"));
        assert!(is_valid_version("10.20.30-beta.1"));
        assert!(!is_valid_version("1.0"));
        assert!(!is_valid_version("v1.0.0"));
        assert!(!is_valid_version(""));
    }

    #[test]
    fn caret_range_accepts_newer_minor() {
        assert!(is_compatible("1.3.0", "^1.2.0"));
        assert!(is_compatible("1.2.9", "^1.2.5"));
    }

    #[test]
    fn caret_range_rejects_older_minor() {
        assert!(!is_compatible("1.1.0", "^1.2.0"));
    }

    #[test]
    fn major_mismatch_is_incompatible() {
        assert!(!is_compatible("2.0.0", "^1.0.0"));
        assert!(!is_compatible("0.9.0", "~1.0.0"));
    }

    #[test]
    fn operator_prefixes_are_stripped() {
        assert!(is_compatible("1.4.0", ">=1.4.0"));
        assert!(is_compatible("v1.4.0", "~1.0.0"));
    }

    #[test]
    fn garbage_is_incompatible() {
        assert!(!is_compatible("latest", "^1.0.0"));
        assert!(!is_compatible("1.0.0", "*"));
    }

    #[test]
    fn parse_ignores_suffixes() {
        let v = Version::parse("2.5.1-rc.1").unwrap();
        assert_eq!(v, Version { major: 2, minor: 5, patch: 1 });
        assert_eq!(v.to_string(), "2.5.1");
    }

    #[test]
    fn system_window_is_inclusive() {
        assert!(within_window("2.0.0", Some("1.0.0"), Some("2.0.0")));
        assert!(within_window("2.0.0", None, None));
        assert!(!within_window("0.9.0", Some("1.0.0"), None));
        assert!(!within_window("3.0.0", None, Some("2.9.9")));
    }
}
