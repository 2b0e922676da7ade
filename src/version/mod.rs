// src/version/mod.rs

//! Version handling for features and modules.
//!
//! Versions follow the `major.minor.patch[.qualifier]` scheme used by
//! modular runtimes: three numeric components compared numerically, plus
//! an optional free-form qualifier compared lexicographically. A missing
//! component defaults to zero, so `"1"`, `"1.0"` and `"1.0.0"` compare
//! equal.

mod range;

pub use range::{transform, VersionRange};

use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

use crate::error::{Error, Result};

const SNAPSHOT: &str = "SNAPSHOT";

/// A parsed version with three numeric components and an optional qualifier.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct Version {
    pub major: u32,
    pub minor: u32,
    pub patch: u32,
    pub qualifier: String,
}

impl Version {
    pub const fn new(major: u32, minor: u32, patch: u32) -> Self {
        Self {
            major,
            minor,
            patch,
            qualifier: String::new(),
        }
    }

    pub fn with_qualifier(major: u32, minor: u32, patch: u32, qualifier: impl Into<String>) -> Self {
        Self {
            major,
            minor,
            patch,
            qualifier: qualifier.into(),
        }
    }

    /// The `0.0.0` wildcard sentinel.
    pub fn zero() -> Self {
        Self::new(0, 0, 0)
    }

    pub fn is_zero(&self) -> bool {
        self.major == 0 && self.minor == 0 && self.patch == 0 && self.qualifier.is_empty()
    }

    /// Parse a version string.
    ///
    /// Format: `major[.minor[.patch[.qualifier]]]`
    /// Examples:
    /// - "1" → 1.0.0
    /// - "1.2" → 1.2.0
    /// - "1.2.3" → 1.2.3
    /// - "1.2.3.SNAPSHOT" → 1.2.3 with qualifier "SNAPSHOT"
    pub fn parse(s: &str) -> Result<Self> {
        let s = s.trim();
        if s.is_empty() {
            return Err(Error::Parse("empty version string".to_string()));
        }
        let mut parts = s.splitn(4, '.');
        let major = parse_component(parts.next().unwrap_or("0"), s)?;
        let minor = match parts.next() {
            Some(p) => parse_component(p, s)?,
            None => 0,
        };
        let patch = match parts.next() {
            Some(p) => parse_component(p, s)?,
            None => 0,
        };
        let qualifier = parts.next().unwrap_or("").to_string();
        Ok(Self {
            major,
            minor,
            patch,
            qualifier,
        })
    }

    /// True for versions whose qualifier marks mutable content.
    pub fn is_snapshot(&self) -> bool {
        self.qualifier.ends_with(SNAPSHOT)
    }
}

fn parse_component(part: &str, full: &str) -> Result<u32> {
    part.parse::<u32>()
        .map_err(|e| Error::Parse(format!("invalid version '{}': {}", full, e)))
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)?;
        if !self.qualifier.is_empty() {
            write!(f, ".{}", self.qualifier)?;
        }
        Ok(())
    }
}

impl Ord for Version {
    fn cmp(&self, other: &Self) -> Ordering {
        (self.major, self.minor, self.patch)
            .cmp(&(other.major, other.minor, other.patch))
            .then_with(|| self.qualifier.cmp(&other.qualifier))
    }
}

impl PartialOrd for Version {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl FromStr for Version {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Version::parse(s)
    }
}
