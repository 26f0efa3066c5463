// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Ordering over distribution release strings.
//!
//! Releases look like `2016.2.0` or `3.8`. Development builds carry a suffix:
//! `3.3.0-rc1-559-g97f0833` is the 559th commit after the first release
//! candidate of 3.3.0, and `2016.2.0-45-g1234abc` is a build made after the
//! 2016.2.0 release. Release candidates sort below their release and
//! post-release builds sort above it. The trailing commit hash is kept for
//! display but never participates in comparisons.

use serde::{Deserialize, Serialize};
use std::borrow::Cow;
use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// The maximum number of dot-separated numeric components in a version.
pub const MAX_COMPONENTS: usize = 4;

/// A parsed distribution version.
///
/// Equality and ordering consider only the numeric components (missing
/// trailing components count as zero) and the release qualifier, so `3.8`
/// and `3.8.0` are equal even though they display differently.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Version {
    core: [u64; MAX_COMPONENTS],
    qualifier: Qualifier,
    raw: Cow<'static, str>,
}

// Variant order matters: the derived `Ord` is the release ordering.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
enum Qualifier {
    /// `-rcN`, optionally followed by a build count. A tagged RC (no build
    /// count) sorts below any later build of that RC.
    Rc { number: u64, build: Option<u64> },
    Release,
    /// `-N`: a development build made after the release.
    Build { commits: u64 },
}

impl Version {
    /// Parses a version string, rejecting anything that isn't a recognized
    /// release or development build.
    pub fn parse(input: &str) -> Result<Self, VersionParseError> {
        let trimmed = input.trim();
        if trimmed.is_empty() {
            return Err(VersionParseError::Empty);
        }

        let mut parts = trimmed.split('-');
        let core_str = parts.next().unwrap_or_default();
        let mut core = [0; MAX_COMPONENTS];
        for (index, component) in core_str.split('.').enumerate() {
            if index == MAX_COMPONENTS {
                return Err(VersionParseError::TooManyComponents {
                    input: trimmed.to_owned(),
                });
            }
            core[index] = parse_number(component).ok_or_else(|| {
                VersionParseError::InvalidComponent {
                    input: trimmed.to_owned(),
                    component: component.to_owned(),
                }
            })?;
        }

        let suffix: Vec<&str> = parts.collect();
        let qualifier = parse_qualifier(&suffix).ok_or_else(|| {
            VersionParseError::UnrecognizedSuffix {
                input: trimmed.to_owned(),
                suffix: suffix.join("-"),
            }
        })?;

        Ok(Self { core, qualifier, raw: Cow::Owned(trimmed.to_owned()) })
    }

    /// Builds a plain release version at compile time.
    ///
    /// Only dotted numeric releases are accepted; anything else fails
    /// constant evaluation.
    pub const fn from_static(raw: &'static str) -> Self {
        let bytes = raw.as_bytes();
        let mut core = [0u64; MAX_COMPONENTS];
        let mut index = 0;
        let mut seen_digit = false;
        let mut i = 0;
        while i < bytes.len() {
            let b = bytes[i];
            if b == b'.' {
                assert!(seen_digit, "empty version component");
                index += 1;
                assert!(index < MAX_COMPONENTS, "too many version components");
                seen_digit = false;
            } else {
                assert!(b.is_ascii_digit(), "not a plain release version");
                core[index] = core[index] * 10 + (b - b'0') as u64;
                seen_digit = true;
            }
            i += 1;
        }
        assert!(seen_digit, "empty version component");

        Self { core, qualifier: Qualifier::Release, raw: Cow::Borrowed(raw) }
    }

    /// The version as originally written.
    pub fn as_str(&self) -> &str {
        &self.raw
    }

    /// The numeric components, zero-padded to [`MAX_COMPONENTS`].
    pub fn components(&self) -> [u64; MAX_COMPONENTS] {
        self.core
    }

    pub fn major(&self) -> u64 {
        self.core[0]
    }

    /// True for tagged releases (no rc or build suffix).
    pub fn is_release(&self) -> bool {
        self.qualifier == Qualifier::Release
    }

    pub fn is_less(&self, other: &Version) -> bool {
        self < other
    }

    /// Returns the greatest of `versions` and `floor`.
    pub fn max_with_floor<'a, I>(versions: I, floor: &'a Version) -> &'a Version
    where
        I: IntoIterator<Item = &'a Version>,
    {
        versions.into_iter().fold(floor, |max, v| if v > max { v } else { max })
    }
}

/// Era-gating comparison: an absent version is less than any real one.
pub fn version_is_less(a: Option<&Version>, b: &Version) -> bool {
    match a {
        Some(a) => a < b,
        None => true,
    }
}

fn parse_number(s: &str) -> Option<u64> {
    if s.is_empty() || !s.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    s.parse().ok()
}

fn parse_qualifier(suffix: &[&str]) -> Option<Qualifier> {
    let Some((head, tail)) = suffix.split_first() else {
        return Some(Qualifier::Release);
    };

    if let Some(rc) = head.strip_prefix("rc") {
        let number = parse_number(rc)?;
        let (build, tail) = match tail.split_first() {
            Some((build, rest)) => (Some(parse_number(build)?), rest),
            None => (None, tail),
        };
        is_commit_suffix(tail).then_some(Qualifier::Rc { number, build })
    } else {
        let commits = parse_number(head)?;
        is_commit_suffix(tail).then_some(Qualifier::Build { commits })
    }
}

fn is_commit_suffix(rest: &[&str]) -> bool {
    match rest {
        [] => true,
        [sha] => {
            !sha.is_empty() && sha.bytes().all(|b| b.is_ascii_alphanumeric())
        }
        _ => false,
    }
}

impl Ord for Version {
    fn cmp(&self, other: &Self) -> Ordering {
        self.core
            .cmp(&other.core)
            .then_with(|| self.qualifier.cmp(&other.qualifier))
    }
}

impl PartialOrd for Version {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for Version {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Version {}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

impl FromStr for Version {
    type Err = VersionParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for Version {
    type Error = VersionParseError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        Self::parse(&s)
    }
}

impl From<Version> for String {
    fn from(v: Version) -> Self {
        v.raw.into_owned()
    }
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum VersionParseError {
    #[error("version string is empty")]
    Empty,
    #[error("invalid component {component:?} in version {input:?}")]
    InvalidComponent { input: String, component: String },
    #[error(
        "version {input:?} has more than {MAX_COMPONENTS} numeric components"
    )]
    TooManyComponents { input: String },
    #[error("unrecognized suffix {suffix:?} in version {input:?}")]
    UnrecognizedSuffix { input: String, suffix: String },
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use proptest::prelude::*;

    fn v(s: &str) -> Version {
        Version::parse(s).unwrap()
    }

    #[test]
    fn test_parse_releases_and_builds() {
        assert_eq!(v("2016.2.0").components(), [2016, 2, 0, 0]);
        assert_eq!(v("3.8").components(), [3, 8, 0, 0]);
        assert!(v("3.8").is_release());
        assert!(!v("3.3.0-rc1-559-g97f0833").is_release());
        assert_eq!(v(" 2017.3.1 ").as_str(), "2017.3.1");
        assert_eq!(
            v("2016.2.0-45-g1234abc").to_string(),
            "2016.2.0-45-g1234abc"
        );
    }

    #[test]
    fn test_parse_rejects_malformed() {
        assert_matches!(Version::parse(""), Err(VersionParseError::Empty));
        assert_matches!(
            Version::parse("3..1"),
            Err(VersionParseError::InvalidComponent { component, .. })
                if component.is_empty()
        );
        assert_matches!(
            Version::parse("v3.1"),
            Err(VersionParseError::InvalidComponent { .. })
        );
        assert_matches!(
            Version::parse("1.2.3.4.5"),
            Err(VersionParseError::TooManyComponents { .. })
        );
        assert_matches!(
            Version::parse("3.1.0-beta"),
            Err(VersionParseError::UnrecognizedSuffix { suffix, .. })
                if suffix == "beta"
        );
        assert_matches!(
            Version::parse("3.1.0-rc1-2-gabc-extra"),
            Err(VersionParseError::UnrecognizedSuffix { .. })
        );
    }

    #[test]
    fn test_ordering() {
        let ordered = [
            "3.0",
            "3.2.0",
            "3.3.0-rc1",
            "3.3.0-rc1-559-g97f0833",
            "3.3.0-rc2",
            "3.3.0",
            "3.3.0-12-gdeadbee",
            "3.8.5",
            "3.99",
            "2015.2.0",
            "2016.2.0",
            "2016.2.1",
        ];
        for pair in ordered.windows(2) {
            assert!(
                v(pair[0]).is_less(&v(pair[1])),
                "{} should be less than {}",
                pair[0],
                pair[1]
            );
            assert!(!v(pair[1]).is_less(&v(pair[0])));
        }
        assert_eq!(v("3.8"), v("3.8.0"));
        assert!(!v("3.8").is_less(&v("3.8.0")));
        assert_eq!(v("3.3.0-rc1-1-gaaaaaaa"), v("3.3.0-rc1-1-gbbbbbbb"));
    }

    #[test]
    fn test_absent_version_is_least() {
        assert!(version_is_less(None, &v("0.0.1")));
        assert!(version_is_less(Some(&v("3.7")), &v("3.8")));
        assert!(!version_is_less(Some(&v("3.8")), &v("3.8")));
    }

    #[test]
    fn test_max_with_floor() {
        let floor = v("3.8");
        let versions = [v("3.2.0"), v("2016.4.0"), v("3.99")];
        assert_eq!(
            Version::max_with_floor(&versions, &floor).as_str(),
            "2016.4.0"
        );
        let low = [v("3.0"), v("3.2")];
        assert_eq!(Version::max_with_floor(&low, &floor).as_str(), "3.8");
        assert_eq!(
            Version::max_with_floor(std::iter::empty(), &floor).as_str(),
            "3.8"
        );
    }

    #[test]
    fn test_from_static_matches_parse() {
        const CUTOVER: Version = Version::from_static("2016.2.0");
        assert_eq!(CUTOVER, v("2016.2.0"));
        assert_eq!(CUTOVER.as_str(), "2016.2.0");
    }

    #[test]
    fn test_serde_roundtrip_through_string() {
        #[derive(Deserialize)]
        struct Doc {
            version: Version,
        }
        let doc: Doc = toml::from_str(r#"version = "2019.8.1""#).unwrap();
        assert_eq!(doc.version, v("2019.8.1"));
        assert!(toml::from_str::<Doc>(r#"version = "2019.x""#).is_err());
    }

    fn core_strategy() -> impl Strategy<Value = Vec<u64>> {
        prop::collection::vec(0u64..50, 1..=3)
    }

    fn render(parts: &[u64]) -> String {
        parts.iter().map(|p| p.to_string()).collect::<Vec<_>>().join(".")
    }

    fn padded(parts: &[u64]) -> [u64; MAX_COMPONENTS] {
        let mut out = [0; MAX_COMPONENTS];
        out[..parts.len()].copy_from_slice(parts);
        out
    }

    proptest! {
        #[test]
        fn proptest_is_less_matches_numeric_order(
            a in core_strategy(),
            b in core_strategy(),
        ) {
            let va = v(&render(&a));
            let vb = v(&render(&b));
            prop_assert_eq!(va.is_less(&vb), padded(&a) < padded(&b));
            prop_assert!(!va.is_less(&va));
            // Exactly one of <, >, == holds.
            let relations = [va.is_less(&vb), vb.is_less(&va), va == vb];
            prop_assert_eq!(relations.iter().filter(|r| **r).count(), 1);
        }

        #[test]
        fn proptest_qualifiers_bracket_release(
            core in core_strategy(),
            rc in 1u64..10,
            commits in 1u64..1000,
        ) {
            let release = render(&core);
            let candidate = v(&format!("{release}-rc{rc}"));
            let build = v(&format!("{release}-{commits}-gabc1234"));
            let release = v(&release);
            prop_assert!(candidate.is_less(&release));
            prop_assert!(release.is_less(&build));
            prop_assert!(candidate.is_less(&build));
        }
    }
}
