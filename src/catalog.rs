// src/catalog.rs

//! Repository catalog and feature index.
//!
//! The catalog caches loaded repositories and derives a feature index from
//! them on demand: a `name → version → feature` map. Any repository
//! mutation invalidates the index; the engine rebuilds it lazily, following
//! repository references transitively (each URI loaded at most once per
//! build).

use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::sync::Arc;

use tracing::debug;

use crate::error::Result;
use crate::model::{parse_condition_name, Feature, Repository};
use crate::version::{Version, VersionRange};

/// Parses and validates a repository behind a URI. The concrete format
/// (XML catalog, registry API, ...) is the loader's business.
pub trait RepositoryLoader: Send + Sync {
    fn load(&self, uri: &str) -> Result<Repository>;
}

type FeatureMap = BTreeMap<String, BTreeMap<Version, Feature>>;

/// Immutable snapshot of all features known to the catalog, indexed by
/// name then version. Cheap to clone and safe to use outside the engine
/// lock.
#[derive(Debug, Clone, Default)]
pub struct FeatureIndex {
    features: Arc<FeatureMap>,
}

impl FeatureIndex {
    /// Flatten repositories into the nested name/version map. When several
    /// repositories contribute the same `(name, version)`, the last writer
    /// wins in iteration order.
    pub fn from_repositories<'a>(repos: impl IntoIterator<Item = &'a Repository>) -> Self {
        let mut map: FeatureMap = BTreeMap::new();
        for repo in repos {
            for feature in &repo.features {
                map.entry(feature.name.clone())
                    .or_default()
                    .insert(feature.version.clone(), feature.clone());
            }
        }
        Self {
            features: Arc::new(map),
        }
    }

    /// All features, every version.
    pub fn all(&self) -> Vec<Feature> {
        self.features
            .values()
            .flat_map(|versions| versions.values().cloned())
            .collect()
    }

    /// Resolve a `name` plus version spec to a concrete feature.
    ///
    /// An empty or `0.0.0` spec means "any version" and yields the highest.
    /// A spec matching an existing version literally yields that feature.
    /// Anything else is parsed as an inclusive range (a bare version is the
    /// exact range) and the highest version inside wins.
    ///
    /// Synthetic conditional names (`parent-condition-N`) resolve by
    /// materializing the conditional from the parent feature.
    pub fn matching(&self, name: &str, spec: &str) -> Option<Feature> {
        if let Some(feature) = self.match_real(name, spec) {
            return Some(feature);
        }
        let (parent, index) = parse_condition_name(name)?;
        let parent = self.match_real(parent, spec)?;
        let conditional = parent.conditionals.get(index)?;
        Some(conditional.as_feature(index, &parent.name, &parent.version))
    }

    fn match_real(&self, name: &str, spec: &str) -> Option<Feature> {
        let versions = self.features.get(name)?;
        let spec = spec.trim();
        if spec.is_empty() || spec == "0.0.0" {
            return versions.values().next_back().cloned();
        }
        if let Ok(version) = Version::parse(spec) {
            if let Some(feature) = versions.get(&version) {
                return Some(feature.clone());
            }
        }
        let range = VersionRange::parse(spec).ok()?;
        versions
            .iter()
            .filter(|(v, _)| range.contains(v))
            .next_back()
            .map(|(_, f)| f.clone())
    }
}

/// Cache of loaded repositories plus the derived feature index.
#[derive(Default)]
pub struct Catalog {
    cache: BTreeMap<String, Repository>,
    index: Option<FeatureIndex>,
}

impl Catalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cached(&self, uri: &str) -> Option<&Repository> {
        self.cache.get(uri)
    }

    /// Cache a loaded repository and invalidate the feature index.
    pub fn insert(&mut self, repo: Repository) {
        self.cache.insert(repo.uri.clone(), repo);
        self.index = None;
    }

    pub fn invalidate(&mut self) {
        self.index = None;
    }

    pub fn index(&self) -> Option<FeatureIndex> {
        self.index.clone()
    }

    pub fn set_index(&mut self, index: FeatureIndex) {
        self.index = Some(index);
    }

    pub fn repositories(&self) -> impl Iterator<Item = &Repository> {
        self.cache.values()
    }

    /// Find a cached repository by its declared name.
    pub fn by_name(&self, name: &str) -> Option<&Repository> {
        self.cache
            .values()
            .find(|r| r.name.as_deref() == Some(name))
    }

    /// Build a fresh index from the cached repositories.
    pub fn build_index(&self) -> FeatureIndex {
        FeatureIndex::from_repositories(self.cache.values())
    }

    /// Drop every cached repository that is no longer reachable from the
    /// given roots, following references through the cache.
    pub fn evict_unreachable(&mut self, roots: &BTreeSet<String>) {
        let mut reachable: BTreeSet<String> = BTreeSet::new();
        let mut queue: VecDeque<String> = roots.iter().cloned().collect();
        while let Some(uri) = queue.pop_front() {
            if !reachable.insert(uri.clone()) {
                continue;
            }
            if let Some(repo) = self.cache.get(&uri) {
                for reference in &repo.references {
                    queue.push_back(reference.clone());
                }
            }
        }
        let before = self.cache.len();
        self.cache.retain(|uri, _| reachable.contains(uri));
        if self.cache.len() != before {
            debug!("Evicted {} unreachable repositories", before - self.cache.len());
        }
        self.index = None;
    }
}
