//! Checkmk server versions and the compatibility ranges built on them.
//!
//! A version string such as `2.1.0p31.cre` is parsed into a [`ServerVersion`]. Versions are
//! ordered through an integer score:
//!
//! `10000 * major + 1000 * minor + 100 * patch`, plus `10 * rank + patch_level` when a patch
//! type is present (alpha = 1, beta = 2, patch = 3).
//!
//! A release without a patch type therefore scores below every alpha, beta or patch build of the
//! same `major.minor.patch` triple: `2.1.0 < 2.1.0a1`.

use std::cmp::Ordering;
use std::fmt::{Display, Formatter};
use std::sync::LazyLock;

use regex::Regex;
use thiserror::Error;

static VERSION_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(\d+)\.(\d+)\.(\d+)(?:([abp])(\d*))?(?:\.?([A-Za-z]{1,3}))?$")
        .expect("server version regex")
});

/// Edition tag of the raw (open source) edition, which lacks commercial features.
const RAW_EDITION: &str = "cre";

/// Raised when an unparsable version takes part in a comparison.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("invalid server version: `{0}`")]
pub struct InvalidVersionError(pub String);

/// Kind of pre-release or patch build.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PatchType {
    /// `a` builds.
    Alpha,
    /// `b` builds.
    Beta,
    /// `p` builds.
    Patch,
}

impl PatchType {
    fn rank(self) -> u64 {
        match self {
            PatchType::Alpha => 1,
            PatchType::Beta => 2,
            PatchType::Patch => 3,
        }
    }

    fn from_tag(tag: &str) -> Option<Self> {
        match tag {
            "a" => Some(PatchType::Alpha),
            "b" => Some(PatchType::Beta),
            "p" => Some(PatchType::Patch),
            _ => None,
        }
    }
}

/// A parsed Checkmk server version.
///
/// Parsing never fails: an unmatched string produces a value whose [`ServerVersion::is_valid`]
/// is `false`. Comparing such a value is a programming error and yields an
/// [`InvalidVersionError`] from [`ServerVersion::compare`]; through `PartialOrd` an invalid
/// version is unordered against everything, itself included.
///
/// ```
/// use cmk_client::version::{PatchType, ServerVersion};
///
/// let version = ServerVersion::parse("2.1.0p31.cre");
/// assert!(version.is_valid());
/// assert_eq!(version.patch_type(), Some(PatchType::Patch));
/// assert_eq!(version.patch_level(), Some(31));
/// assert_eq!(version.edition(), Some("cre"));
/// assert!(version < ServerVersion::parse("2.2.0"));
/// ```
#[derive(Debug, Clone)]
pub struct ServerVersion {
    raw: String,
    major: u32,
    minor: u32,
    patch: u32,
    patch_type: Option<PatchType>,
    patch_level: Option<u32>,
    edition: Option<String>,
    valid: bool,
}

impl ServerVersion {
    /// Parses a raw version string as reported by the server.
    pub fn parse(raw: &str) -> Self {
        Self::from_captures(raw.trim()).unwrap_or_else(|| Self {
            raw: raw.to_string(),
            major: 0,
            minor: 0,
            patch: 0,
            patch_type: None,
            patch_level: None,
            edition: None,
            valid: false,
        })
    }

    fn from_captures(raw: &str) -> Option<Self> {
        let caps = VERSION_PATTERN.captures(raw)?;
        let patch_type = caps.get(4).and_then(|m| PatchType::from_tag(m.as_str()));
        let patch_level = match caps.get(5).map(|m| m.as_str()) {
            Some(level) if !level.is_empty() => Some(level.parse().ok()?),
            _ => None,
        };

        Some(Self {
            raw: raw.to_string(),
            major: caps[1].parse().ok()?,
            minor: caps[2].parse().ok()?,
            patch: caps[3].parse().ok()?,
            patch_type,
            patch_level,
            edition: caps.get(6).map(|m| m.as_str().to_string()),
            valid: true,
        })
    }

    /// Whether the raw string matched the version pattern.
    pub fn is_valid(&self) -> bool {
        self.valid
    }

    /// Major version number.
    pub fn major(&self) -> u32 {
        self.major
    }

    /// Minor version number.
    pub fn minor(&self) -> u32 {
        self.minor
    }

    /// Patch number of the `major.minor.patch` triple.
    pub fn patch(&self) -> u32 {
        self.patch
    }

    /// Build kind, absent for plain releases.
    pub fn patch_type(&self) -> Option<PatchType> {
        self.patch_type
    }

    /// Number following the patch type, if any.
    pub fn patch_level(&self) -> Option<u32> {
        self.patch_level
    }

    /// Edition suffix such as `cre` or `cee`.
    pub fn edition(&self) -> Option<&str> {
        self.edition.as_deref()
    }

    /// True for the raw edition.
    pub fn is_raw_edition(&self) -> bool {
        self.edition() == Some(RAW_EDITION)
    }

    fn score(&self) -> u64 {
        let base = 10_000 * u64::from(self.major)
            + 1_000 * u64::from(self.minor)
            + 100 * u64::from(self.patch);
        match self.patch_type {
            Some(patch_type) => {
                base + 10 * patch_type.rank() + u64::from(self.patch_level.unwrap_or(0))
            }
            None => base,
        }
    }

    /// Orders two versions.
    ///
    /// # Errors
    ///
    /// Returns [`InvalidVersionError`] naming the offending string when either side is invalid.
    pub fn compare(&self, other: &ServerVersion) -> Result<Ordering, InvalidVersionError> {
        if !self.valid {
            return Err(InvalidVersionError(self.raw.clone()));
        }
        if !other.valid {
            return Err(InvalidVersionError(other.raw.clone()));
        }
        Ok(self.score().cmp(&other.score()))
    }
}

impl PartialEq for ServerVersion {
    fn eq(&self, other: &Self) -> bool {
        matches!(self.compare(other), Ok(Ordering::Equal))
    }
}

impl PartialOrd for ServerVersion {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        self.compare(other).ok()
    }
}

impl Display for ServerVersion {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.raw)
    }
}

impl From<&str> for ServerVersion {
    fn from(raw: &str) -> Self {
        Self::parse(raw)
    }
}

/// Inclusive band of server versions supported by one API strategy.
#[derive(Debug, Clone)]
pub struct CompatibilityRange {
    min: ServerVersion,
    max: Option<ServerVersion>,
}

impl CompatibilityRange {
    /// A closed range `min..=max`.
    pub fn new(min: impl Into<ServerVersion>, max: impl Into<ServerVersion>) -> Self {
        Self {
            min: min.into(),
            max: Some(max.into()),
        }
    }

    /// A range with no upper bound.
    pub fn at_least(min: impl Into<ServerVersion>) -> Self {
        Self {
            min: min.into(),
            max: None,
        }
    }

    /// Lower bound.
    pub fn min(&self) -> &ServerVersion {
        &self.min
    }

    /// Upper bound, `None` when open-ended.
    pub fn max(&self) -> Option<&ServerVersion> {
        self.max.as_ref()
    }

    /// Whether `version` lies within the range, both ends included.
    ///
    /// # Errors
    ///
    /// Fails when `version` or a bound is invalid.
    pub fn contains(&self, version: &ServerVersion) -> Result<bool, InvalidVersionError> {
        if self.min.compare(version)? == Ordering::Greater {
            return Ok(false);
        }
        match &self.max {
            Some(max) => Ok(version.compare(max)? != Ordering::Greater),
            None => Ok(true),
        }
    }
}

impl Display for CompatibilityRange {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match &self.max {
            Some(max) => write!(f, "{} ..= {}", self.min, max),
            None => write!(f, "{} ..", self.min),
        }
    }
}
