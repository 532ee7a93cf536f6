//! Semantic version parsing and ordering.
//!
//! Everything in the matrix speaks `MAJOR.MINOR.PATCH[-suffix]`: PHP
//! versions discovered from apk, extension release tags, and the
//! minimum-version bounds in the compatibility tables. This module owns
//! the one pattern and the ordering rules so the resolvers never touch
//! raw strings.

use anyhow::{anyhow, Result};
use regex::Regex;
use std::cmp::Ordering;
use std::fmt;
use std::sync::OnceLock;

fn version_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"^(\d+)\.(\d+)\.(\d+)(?:-(.+))?$").expect("version pattern is valid")
    })
}

fn release_tag_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"^v(\d+)\.(\d+)\.(\d+)(?:-(.+))?$").expect("release tag pattern is valid")
    })
}

/// A parsed `MAJOR.MINOR.PATCH[-suffix]` version.
///
/// Ordering follows the usual release rules: the numeric triple decides
/// first, and a suffixed version (pre-release) sorts below the plain
/// release with the same triple.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Version {
    pub major: u64,
    pub minor: u64,
    pub patch: u64,
    pub suffix: Option<String>,
}

impl Version {
    /// Parse a full version string.
    ///
    /// # Errors
    ///
    /// Returns an error if the string does not match
    /// `MAJOR.MINOR.PATCH[-suffix]`.
    pub fn parse(raw: &str) -> Result<Self> {
        let caps = version_pattern()
            .captures(raw)
            .ok_or_else(|| anyhow!("bad version format: '{raw}'"))?;
        Ok(Self {
            major: caps[1].parse()?,
            minor: caps[2].parse()?,
            patch: caps[3].parse()?,
            suffix: caps.get(4).map(|m| m.as_str().to_string()),
        })
    }

    /// Parse a release tag of the form `vMAJOR.MINOR.PATCH[-suffix]`.
    ///
    /// Returns `None` for anything else (branch refs, annotated tag
    /// names, release candidates without the leading `v`). Unmatched
    /// tags are skipped by the caller, never treated as errors.
    pub fn from_release_tag(tag: &str) -> Option<Self> {
        let caps = release_tag_pattern().captures(tag)?;
        Some(Self {
            major: caps[1].parse().ok()?,
            minor: caps[2].parse().ok()?,
            patch: caps[3].parse().ok()?,
            suffix: caps.get(4).map(|m| m.as_str().to_string()),
        })
    }

    /// The `MAJOR.MINOR` line this version belongs to.
    pub fn line(&self) -> VersionLine {
        VersionLine {
            major: self.major,
            minor: self.minor,
        }
    }

    /// `MAJOR.MINOR` rendering, used for the short alias productions.
    pub fn major_minor(&self) -> String {
        format!("{}.{}", self.major, self.minor)
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)?;
        if let Some(suffix) = &self.suffix {
            write!(f, "-{suffix}")?;
        }
        Ok(())
    }
}

impl Ord for Version {
    fn cmp(&self, other: &Self) -> Ordering {
        (self.major, self.minor, self.patch)
            .cmp(&(other.major, other.minor, other.patch))
            .then_with(|| match (&self.suffix, &other.suffix) {
                (None, None) => Ordering::Equal,
                (None, Some(_)) => Ordering::Greater,
                (Some(_), None) => Ordering::Less,
                (Some(a), Some(b)) => a.cmp(b),
            })
    }
}

impl PartialOrd for Version {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// A `MAJOR.MINOR` version line, used both as a tracked release line
/// and as a lower bound in the compatibility tables.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct VersionLine {
    pub major: u64,
    pub minor: u64,
}

impl VersionLine {
    /// Parse a `MAJOR.MINOR` string.
    ///
    /// # Errors
    ///
    /// Returns an error unless the string is exactly two dot-separated
    /// numbers.
    pub fn parse(raw: &str) -> Result<Self> {
        let (major, minor) = raw
            .split_once('.')
            .ok_or_else(|| anyhow!("bad version line format: '{raw}'"))?;
        if minor.contains('.') {
            return Err(anyhow!("bad version line format: '{raw}'"));
        }
        Ok(Self {
            major: major
                .parse()
                .map_err(|_| anyhow!("bad version line format: '{raw}'"))?,
            minor: minor
                .parse()
                .map_err(|_| anyhow!("bad version line format: '{raw}'"))?,
        })
    }

    /// Whether `version` sits at or above this line.
    ///
    /// Bounds are inclusive: `8.0.0` satisfies the `8.0` line.
    pub fn admits(&self, version: &Version) -> bool {
        (version.major, version.minor) >= (self.major, self.minor)
    }
}

impl fmt::Display for VersionLine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.major, self.minor)
    }
}
