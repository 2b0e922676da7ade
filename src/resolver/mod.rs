// src/resolver/mod.rs

//! Resolution of feature sets into concrete resource sets.
//!
//! The [`Resolver`] trait is the seam to the constraint-solving backend:
//! given a set of feature ids it produces the resources to deploy and a
//! stream provider per downloadable resource. [`WalkerResolver`] is the
//! built-in implementation that walks feature dependencies transitively;
//! capability/requirement solving is left to external implementations.

mod conditional;
mod walker;

pub use conditional::expand_conditionals;
pub use walker::WalkerResolver;

use std::collections::{BTreeSet, HashMap};
use std::io::Read;
use std::sync::Arc;

use crate::catalog::FeatureIndex;
use crate::error::Result;
use crate::model::FeatureId;
use crate::version::Version;

/// Resolver-level representation of a candidate module or feature.
///
/// A resource with a `uri` is deployable module content; a resource with a
/// `feature` id records that the feature itself is part of the resolution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resource {
    pub name: String,
    pub version: Version,
    pub uri: Option<String>,
    pub feature: Option<FeatureId>,
}

impl Resource {
    /// A deployable module resource.
    pub fn module(name: impl Into<String>, version: Version, uri: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            version,
            uri: Some(uri.into()),
            feature: None,
        }
    }

    /// A feature-namespace resource marking the feature as resolved.
    pub fn feature(id: FeatureId) -> Self {
        Self {
            name: id.name.clone(),
            version: id.version.clone(),
            uri: None,
            feature: Some(id),
        }
    }

    pub fn is_deployable(&self) -> bool {
        self.uri.is_some()
    }
}

/// Opens the content stream behind a resolved resource URI. Every `open`
/// returns a fresh stream; callers own closing it (dropping suffices).
pub trait StreamProvider: Send + Sync {
    fn open(&self) -> Result<Box<dyn Read + Send>>;
}

/// Access to module content and metadata by URI; the download/stream
/// backend behind the built-in resolver.
pub trait ContentSource: Send + Sync {
    fn metadata(&self, uri: &str) -> Result<ModuleMetadata>;
    fn open(&self, uri: &str) -> Result<Box<dyn Read + Send>>;
}

/// Identity of a module as read from its content.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModuleMetadata {
    pub symbolic_name: String,
    pub version: Version,
}

/// Everything a resolver needs for one pass.
pub struct ResolveRequest<'a> {
    /// Feature ids to resolve (possibly including synthetic conditional
    /// ids).
    pub features: &'a BTreeSet<String>,
    /// Override URIs, interpreted by the resolver backend.
    pub overrides: &'a BTreeSet<String>,
    /// Resources describing resolved unmanaged modules already on the
    /// runtime, usable as capabilities.
    pub system_resources: &'a [Resource],
    /// Range macro applied to plain dependency versions.
    pub feature_resolution_range: &'a str,
    /// Feature index snapshot to resolve against.
    pub catalog: &'a FeatureIndex,
}

/// Outcome of a resolver pass.
pub struct Resolution {
    pub resources: Vec<Resource>,
    /// Stream providers keyed by resource URI.
    pub providers: HashMap<String, Arc<dyn StreamProvider>>,
}

impl Resolution {
    /// Ids of the features contained in this resolution.
    pub fn feature_ids(&self) -> Vec<FeatureId> {
        self.resources
            .iter()
            .filter_map(|r| r.feature.clone())
            .collect()
    }
}

/// Produces the concrete resource set satisfying a feature set.
///
/// A deployment invokes the resolver twice when conditional features fire
/// (once to discover installed features, once with the expanded set), so
/// implementations may memoize keyed on the sorted feature-id set.
pub trait Resolver: Send + Sync {
    /// Fails with [`crate::Error::Unresolvable`] when the constraints
    /// cannot be satisfied.
    fn resolve(&self, request: &ResolveRequest<'_>) -> Result<Resolution>;
}
