// src/model.rs

//! Core data model: features, module references, conditionals and
//! repositories.
//!
//! A *feature* is a named, versioned bundle of installable modules with
//! declared dependencies on other features, configuration payloads, and
//! conditional extensions that only contribute when their trigger features
//! are resolved. Feature identity is the `(name, version)` pair, written
//! `"name/version"`; a missing version normalizes to the `0.0.0` wildcard.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use crate::error::{Error, Result};
use crate::version::Version;

/// Marker separating a parent feature name from a conditional index in
/// synthetic feature names (`parent-condition-0`).
const CONDITION_MARKER: &str = "-condition-";

/// Feature identity: name plus version, serialized as `"name/version"`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FeatureId {
    pub name: String,
    pub version: Version,
}

impl FeatureId {
    pub fn new(name: impl Into<String>, version: Version) -> Self {
        Self {
            name: name.into(),
            version,
        }
    }

    /// Parse a feature spec `name[/version]`. A missing version becomes
    /// the `0.0.0` wildcard sentinel.
    pub fn parse(s: &str) -> Result<Self> {
        let s = s.trim();
        let (name, version) = match s.split_once('/') {
            Some((name, version)) => (name, Version::parse(version)?),
            None => (s, Version::zero()),
        };
        if name.is_empty() {
            return Err(Error::Parse(format!("feature spec '{}' has no name", s)));
        }
        Ok(Self {
            name: name.to_string(),
            version,
        })
    }

    /// True when the version is the `0.0.0` wildcard.
    pub fn is_wildcard(&self) -> bool {
        self.version.is_zero()
    }
}

impl fmt::Display for FeatureId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.name, self.version)
    }
}

impl FromStr for FeatureId {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        FeatureId::parse(s)
    }
}

/// Reference from a feature to another feature, with a version spec that
/// may be a bare version, the wildcard, or an interval range.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeatureRef {
    pub name: String,
    pub version: String,
}

impl FeatureRef {
    pub fn new(name: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            version: version.into(),
        }
    }
}

/// Reference to an installable module. Identity across feature merges is
/// the `location` URI.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModuleRef {
    pub location: String,
    pub start_level: Option<u32>,
    pub dependency: bool,
}

impl ModuleRef {
    pub fn new(location: impl Into<String>) -> Self {
        Self {
            location: location.into(),
            start_level: None,
            dependency: false,
        }
    }
}

/// Configuration payload handed to the external config installer.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConfigRef {
    pub name: String,
    pub properties: BTreeMap<String, String>,
}

/// A feature fragment contributed only when every trigger feature is
/// resolved.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Conditional {
    pub triggers: Vec<FeatureRef>,
    pub modules: Vec<ModuleRef>,
    pub configurations: Vec<ConfigRef>,
}

impl Conditional {
    /// Materialize this conditional as the synthetic feature
    /// `"{parent}-condition-{index}/{parent_version}"`.
    pub fn as_feature(&self, index: usize, parent: &str, version: &Version) -> Feature {
        Feature {
            name: format!("{}{}{}", parent, CONDITION_MARKER, index),
            version: version.clone(),
            modules: self.modules.clone(),
            dependencies: Vec::new(),
            conditionals: Vec::new(),
            configurations: self.configurations.clone(),
        }
    }
}

/// Split a synthetic conditional name back into its parent name and
/// conditional index. Returns `None` for ordinary feature names.
pub fn parse_condition_name(name: &str) -> Option<(&str, usize)> {
    let pos = name.rfind(CONDITION_MARKER)?;
    let index: usize = name[pos + CONDITION_MARKER.len()..].parse().ok()?;
    let parent = &name[..pos];
    if parent.is_empty() {
        return None;
    }
    Some((parent, index))
}

/// A named, versioned bundle of modules, dependencies, conditionals and
/// configurations.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Feature {
    pub name: String,
    pub version: Version,
    pub modules: Vec<ModuleRef>,
    pub dependencies: Vec<FeatureRef>,
    pub conditionals: Vec<Conditional>,
    pub configurations: Vec<ConfigRef>,
}

impl Feature {
    pub fn new(name: impl Into<String>, version: Version) -> Self {
        Self {
            name: name.into(),
            version,
            ..Self::default()
        }
    }

    pub fn id(&self) -> FeatureId {
        FeatureId::new(self.name.clone(), self.version.clone())
    }
}

/// A loaded feature repository. Repositories form a directed graph through
/// `references`; the catalog follows references transitively.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Repository {
    pub uri: String,
    pub name: Option<String>,
    pub references: Vec<String>,
    pub features: Vec<Feature>,
}

impl Repository {
    pub fn new(uri: impl Into<String>) -> Self {
        Self {
            uri: uri.into(),
            ..Self::default()
        }
    }
}
