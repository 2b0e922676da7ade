// src/resolver/walker.rs

//! Built-in resolver: transitive dependency walk over the catalog.
//!
//! The walker loads each requested feature from the index, follows feature
//! dependencies breadth-first (matching plain dependency versions through
//! the feature-resolution-range macro), and flattens the result into
//! feature-namespace resources plus one module resource per distinct
//! location. When several features contribute the same location, the last
//! feature discovered wins.
//!
//! Overrides and system capabilities are accepted but unused here; acting
//! on them is the job of capability-solving resolver backends.

use std::collections::{BTreeSet, HashMap, VecDeque};
use std::io::Read;
use std::sync::Arc;

use tracing::debug;

use crate::error::{Error, Result};
use crate::model::{Feature, FeatureId, FeatureRef};
use crate::resolver::{
    ContentSource, Resolution, ResolveRequest, Resolver, Resource, StreamProvider,
};
use crate::version::{self, Version};

pub struct WalkerResolver {
    content: Arc<dyn ContentSource>,
}

impl WalkerResolver {
    pub fn new(content: Arc<dyn ContentSource>) -> Self {
        Self { content }
    }

    /// Collect the requested features plus their transitive dependencies,
    /// in discovery order.
    fn collect_features(&self, request: &ResolveRequest<'_>) -> Result<Vec<Feature>> {
        let mut features: Vec<Feature> = Vec::new();
        let mut seen: BTreeSet<String> = BTreeSet::new();
        let mut queue: VecDeque<(String, String)> = VecDeque::new();

        for spec in request.features {
            let id = FeatureId::parse(spec)?;
            queue.push_back((id.name, id.version.to_string()));
        }

        while let Some((name, spec)) = queue.pop_front() {
            let feature = request.catalog.matching(&name, &spec).ok_or_else(|| {
                Error::Unresolvable(format!("no feature matching '{}/{}'", name, spec))
            })?;
            if !seen.insert(feature.id().to_string()) {
                continue;
            }
            for dep in &feature.dependencies {
                queue.push_back((dep.name.clone(), dependency_spec(dep, request)?));
            }
            features.push(feature);
        }
        Ok(features)
    }
}

/// Version spec used to match a dependency: the wildcard stays a wildcard,
/// explicit intervals pass through, and a plain version is widened by the
/// feature-resolution-range macro.
fn dependency_spec(dep: &FeatureRef, request: &ResolveRequest<'_>) -> Result<String> {
    let spec = dep.version.trim();
    if spec.is_empty() || spec == "0.0.0" {
        return Ok("0.0.0".to_string());
    }
    if spec.starts_with('[') || spec.starts_with('(') {
        return Ok(spec.to_string());
    }
    let version = Version::parse(spec)?;
    let range = version::transform(request.feature_resolution_range, &version)?;
    Ok(range.to_string())
}

impl Resolver for WalkerResolver {
    fn resolve(&self, request: &ResolveRequest<'_>) -> Result<Resolution> {
        let features = self.collect_features(request)?;

        // One resource per distinct location, in discovery order.
        let mut locations: BTreeSet<String> = BTreeSet::new();
        let mut order: Vec<String> = Vec::new();
        for feature in &features {
            for module in &feature.modules {
                if locations.insert(module.location.clone()) {
                    order.push(module.location.clone());
                }
            }
        }

        let mut resources: Vec<Resource> = features
            .iter()
            .map(|f| Resource::feature(f.id()))
            .collect();
        let mut providers: HashMap<String, Arc<dyn StreamProvider>> = HashMap::new();
        for uri in order {
            let meta = self.content.metadata(&uri)?;
            resources.push(Resource::module(meta.symbolic_name, meta.version, uri.clone()));
            providers.insert(
                uri.clone(),
                Arc::new(SourceStream {
                    content: Arc::clone(&self.content),
                    uri,
                }),
            );
        }

        debug!(
            "Resolved {} features into {} resources",
            features.len(),
            resources.len()
        );
        Ok(Resolution {
            resources,
            providers,
        })
    }
}

struct SourceStream {
    content: Arc<dyn ContentSource>,
    uri: String,
}

impl StreamProvider for SourceStream {
    fn open(&self) -> Result<Box<dyn Read + Send>> {
        self.content.open(&self.uri)
    }
}
