//! Composer-style version normalization
//!
//! Raw VCS tags (`v1.2`, `2.0.0-beta.3`, `3.1.0-RC1`) are parsed into a
//! [`NormalizedVersion`] with four numeric segments and an optional
//! stability modifier. The canonical string form is the one Composer uses:
//!
//! - `1.2` -> `1.2.0.0`
//! - `v2.0.0-beta.3` -> `2.0.0.0-beta3`
//! - `3.1.0-rc1` -> `3.1.0.0-RC1`
//! - `4.0.0-dev` -> `4.0.0.0-dev`

use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;
use std::sync::LazyLock;

use regex::Regex;
use semver::Version;

use crate::version::error::VersionError;

static VERSION_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)^v?(\d{1,5})(?:\.(\d+))?(?:\.(\d+))?(?:\.(\d+))?(?:[._-]?(?:(stable|beta|b|rc|alpha|a|patch|pl|p)((?:[.-]?\d+)*))?([.-]?dev)?)?$",
    )
    .expect("version regex is valid")
});

static STABILITY_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)[._-]?(?:(stable|beta|b|rc|alpha|a|patch|pl|p)((?:[.-]?\d+)*)?)?([.-]?dev)?$")
        .expect("stability regex is valid")
});

/// Stability tier of a release
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Stability {
    Dev,
    Alpha,
    Beta,
    RC,
    Stable,
}

impl Stability {
    pub fn as_str(&self) -> &'static str {
        match self {
            Stability::Dev => "dev",
            Stability::Alpha => "alpha",
            Stability::Beta => "beta",
            Stability::RC => "RC",
            Stability::Stable => "stable",
        }
    }

    /// Fixed rank used for `stableOrder` grouping (`alpha=1 .. stable=4`)
    pub fn rank(&self) -> u8 {
        match self {
            Stability::Dev => 0,
            Stability::Alpha => 1,
            Stability::Beta => 2,
            Stability::RC => 3,
            Stability::Stable => 4,
        }
    }
}

impl fmt::Display for Stability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Stability {
    type Err = VersionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "dev" => Ok(Stability::Dev),
            "alpha" => Ok(Stability::Alpha),
            "beta" => Ok(Stability::Beta),
            "rc" => Ok(Stability::RC),
            "stable" => Ok(Stability::Stable),
            _ => Err(VersionError::InvalidVersion(format!("unknown stability: {s}"))),
        }
    }
}

/// Pre/post-release modifier, in ascending precedence
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Modifier {
    Dev,
    Alpha,
    Beta,
    RC,
    Stable,
    Patch,
}

impl Modifier {
    fn parse(tag: &str) -> Self {
        match tag.to_ascii_lowercase().as_str() {
            "alpha" | "a" => Modifier::Alpha,
            "beta" | "b" => Modifier::Beta,
            "rc" => Modifier::RC,
            "patch" | "pl" | "p" => Modifier::Patch,
            _ => Modifier::Stable,
        }
    }

    fn stability(&self) -> Stability {
        match self {
            Modifier::Dev => Stability::Dev,
            Modifier::Alpha => Stability::Alpha,
            Modifier::Beta => Stability::Beta,
            Modifier::RC => Stability::RC,
            Modifier::Stable | Modifier::Patch => Stability::Stable,
        }
    }

    fn suffix(&self) -> Option<&'static str> {
        match self {
            Modifier::Dev => Some("dev"),
            Modifier::Alpha => Some("alpha"),
            Modifier::Beta => Some("beta"),
            Modifier::RC => Some("RC"),
            Modifier::Stable => None,
            Modifier::Patch => Some("patch"),
        }
    }
}

/// A version as written, before padding (`1.2` keeps its two segments).
///
/// Constraint expansion (`~1.2`, `1.2.*`) needs to know how many segments
/// were given, so the partial form is kept separate from [`NormalizedVersion`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartialVersion {
    pub segments: Vec<u64>,
    /// `None` when no modifier was written at all
    pub modifier: Option<Modifier>,
    pub modifier_numbers: Vec<u64>,
}

impl PartialVersion {
    pub fn parse(raw: &str) -> Result<Self, VersionError> {
        let trimmed = raw.trim();
        let caps = VERSION_RE
            .captures(trimmed)
            .ok_or_else(|| VersionError::InvalidVersion(raw.to_string()))?;

        let mut segments = Vec::with_capacity(4);
        for i in 1..=4 {
            if let Some(m) = caps.get(i) {
                let n = m
                    .as_str()
                    .parse::<u64>()
                    .map_err(|_| VersionError::InvalidVersion(raw.to_string()))?;
                segments.push(n);
            }
        }

        let modifier_numbers = caps
            .get(6)
            .map(|m| {
                m.as_str()
                    .split(['.', '-'])
                    .filter(|s| !s.is_empty())
                    .filter_map(|s| s.parse::<u64>().ok())
                    .collect()
            })
            .unwrap_or_default();

        let modifier = if caps.get(7).is_some() {
            Some(Modifier::Dev)
        } else {
            caps.get(5).map(|m| Modifier::parse(m.as_str()))
        };

        Ok(Self {
            segments,
            modifier,
            modifier_numbers,
        })
    }

    /// Pad to four segments
    pub fn to_normalized(&self) -> NormalizedVersion {
        let segment = |i: usize| self.segments.get(i).copied().unwrap_or(0);
        let modifier = self.modifier.unwrap_or(Modifier::Stable);
        NormalizedVersion {
            core: Version::new(segment(0), segment(1), segment(2)),
            revision: segment(3),
            modifier,
            modifier_numbers: match modifier {
                Modifier::Dev | Modifier::Stable => Vec::new(),
                _ => self.modifier_numbers.clone(),
            },
        }
    }
}

/// Canonical, totally ordered version
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct NormalizedVersion {
    core: Version,
    revision: u64,
    modifier: Modifier,
    modifier_numbers: Vec<u64>,
}

impl NormalizedVersion {
    pub fn new(major: u64, minor: u64, patch: u64, revision: u64) -> Self {
        Self {
            core: Version::new(major, minor, patch),
            revision,
            modifier: Modifier::Stable,
            modifier_numbers: Vec::new(),
        }
    }

    pub fn parse(raw: &str) -> Result<Self, VersionError> {
        PartialVersion::parse(raw).map(|p| p.to_normalized())
    }

    pub fn segments(&self) -> [u64; 4] {
        [
            self.core.major,
            self.core.minor,
            self.core.patch,
            self.revision,
        ]
    }

    pub fn stability(&self) -> Stability {
        self.modifier.stability()
    }

    pub fn modifier(&self) -> Modifier {
        self.modifier
    }

    /// Same numeric segments with a `-dev` modifier, the lowest point of the segment
    pub fn as_dev(&self) -> Self {
        Self {
            modifier: Modifier::Dev,
            modifier_numbers: Vec::new(),
            ..self.clone()
        }
    }

    /// Increment the segment at `position` (1-based) and zero all segments after it.
    /// `None` when the segment is already at `u64::MAX`.
    pub fn bump(&self, position: usize) -> Option<Self> {
        let mut segments = self.segments();
        let index = position.clamp(1, 4) - 1;
        segments[index] = segments[index].checked_add(1)?;
        for s in segments.iter_mut().skip(index + 1) {
            *s = 0;
        }
        Some(Self::new(segments[0], segments[1], segments[2], segments[3]))
    }
}

impl Ord for NormalizedVersion {
    fn cmp(&self, other: &Self) -> Ordering {
        self.core
            .cmp(&other.core)
            .then(self.revision.cmp(&other.revision))
            .then(self.modifier.cmp(&other.modifier))
            .then_with(|| self.modifier_numbers.cmp(&other.modifier_numbers))
    }
}

impl PartialOrd for NormalizedVersion {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for NormalizedVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}.{}.{}.{}",
            self.core.major, self.core.minor, self.core.patch, self.revision
        )?;
        if let Some(suffix) = self.modifier.suffix() {
            write!(f, "-{suffix}")?;
            let numbers: Vec<String> = self.modifier_numbers.iter().map(u64::to_string).collect();
            f.write_str(&numbers.join("."))?;
        }
        Ok(())
    }
}

impl FromStr for NormalizedVersion {
    type Err = VersionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

/// Canonicalize a raw tag into its normalized string form.
///
/// Fails for anything that is not a (partial) semantic version, including
/// branch names such as `dev-main`.
pub fn normalize(raw: &str) -> Result<String, VersionError> {
    NormalizedVersion::parse(raw).map(|v| v.to_string())
}

/// Classify a raw version string by its suffix markers
pub fn stability_of(raw: &str) -> Stability {
    let version = raw.split('#').next().unwrap_or_default().trim();
    let lower = version.to_ascii_lowercase();

    if lower.starts_with("dev-") || lower.ends_with("-dev") {
        return Stability::Dev;
    }

    let Some(caps) = STABILITY_RE.captures(&lower) else {
        return Stability::Stable;
    };

    if caps.get(3).is_some() {
        return Stability::Dev;
    }

    match caps.get(1).map(|m| m.as_str()) {
        Some("beta" | "b") => Stability::Beta,
        Some("alpha" | "a") => Stability::Alpha,
        Some("rc") => Stability::RC,
        _ => Stability::Stable,
    }
}

/// Compare two version strings after normalization
pub fn compare(a: &str, b: &str) -> Result<Ordering, VersionError> {
    Ok(NormalizedVersion::parse(a)?.cmp(&NormalizedVersion::parse(b)?))
}
