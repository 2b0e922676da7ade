// src/version/range.rs

//! Version ranges and mask-macro range transforms.
//!
//! Ranges use interval notation: `[1.0,2.0)` is lower-inclusive and
//! upper-exclusive, an omitted upper bound (`[1.0,)`) is unbounded. A bare
//! version parses as the exact range `[v,v]`.
//!
//! Range macros derive a range from a concrete version with a mask per
//! bound: `=` keeps the corresponding component, `+` increments it, `-`
//! decrements it, `0` zeroes it. Components past the mask are zeroed, and
//! the fourth mask position addresses the qualifier (kept only by `=`).
//! `transform("[==,=+)", 1.2.3)` therefore yields `[1.2.0,1.3.0)`.

use std::fmt;

use crate::error::{Error, Result};
use crate::version::Version;

/// A contiguous range of versions with inclusive or exclusive bounds.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VersionRange {
    pub lower: Version,
    pub upper: Option<Version>,
    pub lower_inclusive: bool,
    pub upper_inclusive: bool,
}

impl VersionRange {
    /// The exact range `[v,v]`.
    pub fn exact(version: Version) -> Self {
        Self {
            lower: version.clone(),
            upper: Some(version),
            lower_inclusive: true,
            upper_inclusive: true,
        }
    }

    /// The unbounded range `[0.0.0,)` matching every version.
    pub fn any() -> Self {
        Self {
            lower: Version::zero(),
            upper: None,
            lower_inclusive: true,
            upper_inclusive: false,
        }
    }

    /// The lower-exclusive, unbounded range `(v,)`.
    pub fn above(version: Version) -> Self {
        Self {
            lower: version,
            upper: None,
            lower_inclusive: false,
            upper_inclusive: true,
        }
    }

    /// Parse a range spec.
    ///
    /// Interval notation is honored (`[1.0,2.0)`, `(1.0,)`); anything else
    /// is parsed as a single version and treated as the exact range.
    pub fn parse(s: &str) -> Result<Self> {
        let s = s.trim();
        if !s.starts_with('[') && !s.starts_with('(') {
            return Ok(Self::exact(Version::parse(s)?));
        }
        let lower_inclusive = s.starts_with('[');
        let upper_inclusive = match s.chars().last() {
            Some(']') => true,
            Some(')') => false,
            _ => return Err(Error::Parse(format!("unterminated version range '{}'", s))),
        };
        let body = &s[1..s.len() - 1];
        let (low, high) = body
            .split_once(',')
            .ok_or_else(|| Error::Parse(format!("version range '{}' has no separator", s)))?;
        let lower = Version::parse(low)?;
        let high = high.trim();
        let upper = if high.is_empty() {
            None
        } else {
            Some(Version::parse(high)?)
        };
        Ok(Self {
            lower,
            upper,
            lower_inclusive,
            upper_inclusive,
        })
    }

    /// Range semantics for a conditional trigger: an interval spec is taken
    /// as written, a bare version `v` means `(v,)`.
    pub fn for_trigger(spec: &str) -> Result<Self> {
        let spec = spec.trim();
        if spec.starts_with('[') || spec.starts_with('(') {
            Self::parse(spec)
        } else if spec.is_empty() {
            Ok(Self::above(Version::zero()))
        } else {
            Ok(Self::above(Version::parse(spec)?))
        }
    }

    pub fn contains(&self, version: &Version) -> bool {
        let low_ok = if self.lower_inclusive {
            *version >= self.lower
        } else {
            *version > self.lower
        };
        if !low_ok {
            return false;
        }
        match &self.upper {
            None => true,
            Some(upper) => {
                if self.upper_inclusive {
                    version <= upper
                } else {
                    version < upper
                }
            }
        }
    }
}

impl fmt::Display for VersionRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}{},",
            if self.lower_inclusive { '[' } else { '(' },
            self.lower
        )?;
        if let Some(ref upper) = self.upper {
            write!(f, "{}", upper)?;
        }
        write!(f, "{}", if self.upper_inclusive { ']' } else { ')' })
    }
}

/// Apply a range macro like `[==,=+)` to a concrete version.
pub fn transform(pattern: &str, version: &Version) -> Result<VersionRange> {
    let pattern = pattern.trim();
    let lower_inclusive = match pattern.chars().next() {
        Some('[') => true,
        Some('(') => false,
        _ => {
            return Err(Error::Parse(format!(
                "range macro '{}' must start with '[' or '('",
                pattern
            )))
        }
    };
    let upper_inclusive = match pattern.chars().last() {
        Some(']') => true,
        Some(')') => false,
        _ => {
            return Err(Error::Parse(format!(
                "range macro '{}' must end with ']' or ')'",
                pattern
            )))
        }
    };
    let body = &pattern[1..pattern.len() - 1];
    let (low_mask, high_mask) = body
        .split_once(',')
        .ok_or_else(|| Error::Parse(format!("range macro '{}' has no separator", pattern)))?;
    Ok(VersionRange {
        lower: apply_mask(low_mask, version, pattern)?,
        upper: Some(apply_mask(high_mask, version, pattern)?),
        lower_inclusive,
        upper_inclusive,
    })
}

fn apply_mask(mask: &str, version: &Version, pattern: &str) -> Result<Version> {
    if mask.is_empty() || mask.len() > 4 {
        return Err(Error::Parse(format!(
            "range macro '{}' has invalid mask '{}'",
            pattern, mask
        )));
    }
    let mut out = Version::zero();
    for (i, op) in mask.chars().enumerate() {
        if i == 3 {
            if op == '=' {
                out.qualifier = version.qualifier.clone();
            }
            continue;
        }
        let current = match i {
            0 => version.major,
            1 => version.minor,
            _ => version.patch,
        };
        let value = match op {
            '=' => current,
            '+' => current.saturating_add(1),
            '-' => current.saturating_sub(1),
            '0' => 0,
            other => {
                return Err(Error::Parse(format!(
                    "range macro '{}' has invalid mask character '{}'",
                    pattern, other
                )))
            }
        };
        match i {
            0 => out.major = value,
            1 => out.minor = value,
            _ => out.patch = value,
        }
    }
    Ok(out)
}
