//! Version Compatibility Checking
//!
//! Parses plugin versions and version ranges and decides range satisfaction.
//! Versions are `semver::Version` triples with an optional pre-release tag;
//! ordering follows semver precedence (numeric per field, pre-release below
//! the corresponding release). Ranges come in two forms: bound pairs
//! (`"1.0.0..2.0.0"`, inclusive low / exclusive high; `..=` for an inclusive
//! high) and comparators (`">=1.2.0"`, `"<=2.0.0"`, `"==1.4.2"`). A bare
//! version string is shorthand for an exact match.

use crate::error::{PluginError, PluginResult};
use semver::{BuildMetadata, Prerelease, Version};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

/// Parse a version string of the shape `MAJOR.MINOR.PATCH[-PRERELEASE]`.
///
/// Any other shape is rejected with an error naming the offending token.
/// Build metadata (`+...`) is not part of the manifest contract.
pub fn parse_version(input: &str) -> PluginResult<Version> {
    let trimmed = input.trim();
    if trimmed.is_empty() {
        return Err(PluginError::VersionParse {
            input: input.to_string(),
            token: "<empty>".to_string(),
        });
    }
    if let Some(idx) = trimmed.find('+') {
        return Err(PluginError::VersionParse {
            input: input.to_string(),
            token: trimmed[idx..].to_string(),
        });
    }

    let (core, pre) = match trimmed.split_once('-') {
        Some((core, pre)) => (core, Some(pre)),
        None => (trimmed, None),
    };

    let parts: Vec<&str> = core.split('.').collect();
    if parts.len() != 3 {
        return Err(PluginError::VersionParse {
            input: input.to_string(),
            token: core.to_string(),
        });
    }

    let mut numbers = [0u64; 3];
    for (slot, part) in numbers.iter_mut().zip(&parts) {
        // Leading zeros are rejected, matching strict semver.
        if part.len() > 1 && part.starts_with('0') {
            return Err(PluginError::VersionParse {
                input: input.to_string(),
                token: (*part).to_string(),
            });
        }
        *slot = part.parse::<u64>().map_err(|_| PluginError::VersionParse {
            input: input.to_string(),
            token: (*part).to_string(),
        })?;
    }

    let pre = match pre {
        Some("") => {
            return Err(PluginError::VersionParse {
                input: input.to_string(),
                token: "-".to_string(),
            });
        }
        Some(tag) => Prerelease::new(tag).map_err(|_| PluginError::VersionParse {
            input: input.to_string(),
            token: tag.to_string(),
        })?,
        None => Prerelease::EMPTY,
    };

    Ok(Version {
        major: numbers[0],
        minor: numbers[1],
        patch: numbers[2],
        pre,
        build: BuildMetadata::EMPTY,
    })
}

/// Compare two versions by semver precedence.
pub fn compare(a: &Version, b: &Version) -> Ordering {
    a.cmp_precedence(b)
}

/// A constraint over versions, satisfied by range containment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum VersionRange {
    /// Exactly this version (`"==1.4.2"` or a bare `"1.4.2"`).
    Exact(Version),
    /// This version or anything above it (`">=1.2.0"`).
    AtLeast(Version),
    /// This version or anything below it (`"<=2.0.0"`).
    AtMost(Version),
    /// A bound pair. The lower bound is always inclusive; the upper bound
    /// is exclusive for `"a..b"` and inclusive for `"a..=b"`.
    Bounds {
        min: Version,
        max: Version,
        max_inclusive: bool,
    },
}

impl VersionRange {
    /// Whether `version` falls inside this range.
    pub fn satisfies(&self, version: &Version) -> bool {
        match self {
            VersionRange::Exact(v) => compare(version, v) == Ordering::Equal,
            VersionRange::AtLeast(v) => compare(version, v) != Ordering::Less,
            VersionRange::AtMost(v) => compare(version, v) != Ordering::Greater,
            VersionRange::Bounds {
                min,
                max,
                max_inclusive,
            } => {
                if compare(version, min) == Ordering::Less {
                    return false;
                }
                match compare(version, max) {
                    Ordering::Less => true,
                    Ordering::Equal => *max_inclusive,
                    Ordering::Greater => false,
                }
            }
        }
    }

    /// Inclusive-low/exclusive-high bound pair.
    pub fn bounds(min: Version, max: Version) -> Self {
        VersionRange::Bounds {
            min,
            max,
            max_inclusive: false,
        }
    }

    /// Bound pair with an inclusive upper bound.
    pub fn bounds_inclusive(min: Version, max: Version) -> Self {
        VersionRange::Bounds {
            min,
            max,
            max_inclusive: true,
        }
    }
}

impl FromStr for VersionRange {
    type Err = PluginError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        if trimmed.is_empty() {
            return Err(PluginError::RangeParse {
                input: s.to_string(),
                reason: "empty range".to_string(),
            });
        }

        if let Some((lo, hi)) = trimmed.split_once("..") {
            let (hi, max_inclusive) = match hi.strip_prefix('=') {
                Some(rest) => (rest, true),
                None => (hi, false),
            };
            let min = parse_version(lo)?;
            let max = parse_version(hi)?;
            if compare(&min, &max) == Ordering::Greater {
                return Err(PluginError::RangeParse {
                    input: s.to_string(),
                    reason: format!("lower bound {} is above upper bound {}", min, max),
                });
            }
            return Ok(VersionRange::Bounds {
                min,
                max,
                max_inclusive,
            });
        }

        if let Some(rest) = trimmed.strip_prefix(">=") {
            return Ok(VersionRange::AtLeast(parse_version(rest)?));
        }
        if let Some(rest) = trimmed.strip_prefix("<=") {
            return Ok(VersionRange::AtMost(parse_version(rest)?));
        }
        if let Some(rest) = trimmed.strip_prefix("==") {
            return Ok(VersionRange::Exact(parse_version(rest)?));
        }
        if trimmed.starts_with(&['>', '<', '=', '^', '~'][..]) {
            return Err(PluginError::RangeParse {
                input: s.to_string(),
                reason: "unsupported comparator (only >=, <= and == are accepted)".to_string(),
            });
        }

        Ok(VersionRange::Exact(parse_version(trimmed)?))
    }
}

impl fmt::Display for VersionRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VersionRange::Exact(v) => write!(f, "=={}", v),
            VersionRange::AtLeast(v) => write!(f, ">={}", v),
            VersionRange::AtMost(v) => write!(f, "<={}", v),
            VersionRange::Bounds {
                min,
                max,
                max_inclusive: false,
            } => write!(f, "{}..{}", min, max),
            VersionRange::Bounds {
                min,
                max,
                max_inclusive: true,
            } => write!(f, "{}..={}", min, max),
        }
    }
}

impl TryFrom<String> for VersionRange {
    type Error = PluginError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<VersionRange> for String {
    fn from(range: VersionRange) -> Self {
        range.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_parse_release_version() {
        let v = parse_version("1.2.3").unwrap();
        assert_eq!((v.major, v.minor, v.patch), (1, 2, 3));
        assert!(v.pre.is_empty());
    }

    #[test]
    fn test_parse_prerelease_version() {
        let v = parse_version("2.0.0-beta.1").unwrap();
        assert_eq!(v.pre.as_str(), "beta.1");
    }

    #[test]
    fn test_parse_rejects_bad_shapes() {
        for (input, token) in [
            ("1.2", "1.2"),
            ("1.2.3.4", "1.2.3.4"),
            ("1.x.0", "x"),
            ("01.0.0", "01"),
            ("1.0.0-", "-"),
            ("1.0.0+build5", "+build5"),
            ("", "<empty>"),
        ] {
            match parse_version(input) {
                Err(PluginError::VersionParse { token: t, .. }) => assert_eq!(t, token),
                other => panic!("expected parse error for {:?}, got {:?}", input, other),
            }
        }
    }

    #[test]
    fn test_compare_is_numeric_not_lexical() {
        let a = parse_version("1.9.0").unwrap();
        let b = parse_version("1.10.0").unwrap();
        assert_eq!(compare(&a, &b), Ordering::Less);
    }

    #[test]
    fn test_prerelease_sorts_below_release() {
        let pre = parse_version("1.0.0-alpha").unwrap();
        let release = parse_version("1.0.0").unwrap();
        assert_eq!(compare(&pre, &release), Ordering::Less);
        assert!(!VersionRange::AtLeast(release).satisfies(&pre));
    }

    #[test]
    fn test_bound_pair_is_inclusive_low_exclusive_high() {
        // The "a..b" convention: equal to the low bound satisfies, equal to
        // the high bound does not.
        let range: VersionRange = "1.0.0..2.0.0".parse().unwrap();
        assert!(range.satisfies(&parse_version("1.0.0").unwrap()));
        assert!(range.satisfies(&parse_version("1.9.9").unwrap()));
        assert!(!range.satisfies(&parse_version("2.0.0").unwrap()));
        assert!(!range.satisfies(&parse_version("0.9.9").unwrap()));
    }

    #[test]
    fn test_inclusive_upper_bound() {
        let range: VersionRange = "1.0.0..=2.0.0".parse().unwrap();
        assert!(range.satisfies(&parse_version("2.0.0").unwrap()));
        assert!(!range.satisfies(&parse_version("2.0.1").unwrap()));
    }

    #[test]
    fn test_comparator_ranges() {
        let at_least: VersionRange = ">=1.2.0".parse().unwrap();
        assert!(at_least.satisfies(&parse_version("1.2.0").unwrap()));
        assert!(at_least.satisfies(&parse_version("2.0.0").unwrap()));
        assert!(!at_least.satisfies(&parse_version("1.1.9").unwrap()));

        let at_most: VersionRange = "<=1.2.0".parse().unwrap();
        assert!(at_most.satisfies(&parse_version("1.2.0").unwrap()));
        assert!(!at_most.satisfies(&parse_version("1.2.1").unwrap()));

        let exact: VersionRange = "==1.4.2".parse().unwrap();
        assert!(exact.satisfies(&parse_version("1.4.2").unwrap()));
        assert!(!exact.satisfies(&parse_version("1.4.3").unwrap()));
    }

    #[test]
    fn test_bare_version_is_exact() {
        let range: VersionRange = "1.2.3".parse().unwrap();
        assert_eq!(range, VersionRange::Exact(parse_version("1.2.3").unwrap()));
    }

    #[test]
    fn test_inverted_bounds_rejected() {
        assert!(matches!(
            "2.0.0..1.0.0".parse::<VersionRange>(),
            Err(PluginError::RangeParse { .. })
        ));
    }

    #[test]
    fn test_unsupported_comparators_rejected() {
        for input in ["^1.0.0", "~1.2.0", ">1.0.0", "<2.0.0", "=1.0.0"] {
            assert!(matches!(
                input.parse::<VersionRange>(),
                Err(PluginError::RangeParse { .. })
            ));
        }
    }

    #[test]
    fn test_display_round_trips() {
        for input in ["==1.2.3", ">=1.0.0", "<=2.1.0", "1.0.0..2.0.0", "1.0.0..=2.0.0"] {
            let range: VersionRange = input.parse().unwrap();
            assert_eq!(range.to_string(), input);
            let reparsed: VersionRange = range.to_string().parse().unwrap();
            assert_eq!(reparsed, range);
        }
    }
}
