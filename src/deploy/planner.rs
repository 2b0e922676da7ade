// src/deploy/planner.rs

//! Deployment diff computation.
//!
//! Two passes over the live module set. Pass 1 matches modules and
//! resources by `(symbolic name, version)` identity: matched modules are
//! kept (flagged for update when their snapshot content changed), matched
//! resources leave the deploy set, and unmatched managed modules are
//! marked for deletion. Pass 2 tries to rehome each remaining resource
//! onto a deletable module of the same name whose version falls in the
//! module-update range; the highest such version is updated in place,
//! everything else becomes a fresh install.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;

use tracing::debug;

use crate::checksum::stream_checksum;
use crate::deploy::{resource_stream, DeploymentPlan};
use crate::error::Result;
use crate::host::{ModuleId, ModuleInfo, SYSTEM_MODULE};
use crate::resolver::{Resource, StreamProvider};
use crate::version::{self, Version};

const SNAPSHOT: &str = "SNAPSHOT";
const MAVEN: &str = "mvn:";

/// Inputs for one diff computation, snapshotted outside the engine lock.
pub struct PlannerInput<'a> {
    /// Full resolver output; only deployable resources are considered.
    pub resources: &'a [Resource],
    /// Live modules on the runtime.
    pub modules: &'a [ModuleInfo],
    /// Modules whose lifecycle the engine owns.
    pub managed: &'a BTreeSet<ModuleId>,
    pub providers: &'a HashMap<String, Arc<dyn StreamProvider>>,
    /// Checksums recorded by previous deployments, by module location.
    pub old_checksums: &'a BTreeMap<String, u64>,
    pub update_snapshots: bool,
    pub bundle_update_range: &'a str,
}

/// A resource whose content may change between deploys: snapshot-qualified
/// versions, snapshot URIs, or any URI not pinned to a repository scheme.
pub fn is_updateable(resource: &Resource) -> bool {
    let uri = match resource.uri.as_deref() {
        Some(uri) => uri,
        None => return false,
    };
    resource.version.qualifier.ends_with(SNAPSHOT)
        || uri.contains(SNAPSHOT)
        || !uri.contains(MAVEN)
}

/// Classify every live module and resolved resource into the deployment
/// plan.
pub fn compute_deployment(input: &PlannerInput<'_>) -> Result<DeploymentPlan> {
    let mut plan = DeploymentPlan::default();

    // Deployable resources, one per location.
    let mut to_deploy: Vec<&Resource> = Vec::new();
    let mut seen: BTreeSet<&str> = BTreeSet::new();
    for resource in input.resources {
        if let Some(uri) = resource.uri.as_deref() {
            if seen.insert(uri) {
                to_deploy.push(resource);
            }
        }
    }

    // First pass: match live modules by identity; mark the rest of the
    // managed ones for deletion.
    for module in input.modules {
        let name = match module.symbolic_name.as_deref() {
            Some(name) if module.id != SYSTEM_MODULE => name,
            _ => continue,
        };
        let position = to_deploy
            .iter()
            .position(|r| r.name == name && r.version == module.version);
        match position {
            Some(position) => {
                let resource = to_deploy.remove(position);
                if input.update_snapshots
                    && input.managed.contains(&module.id)
                    && is_updateable(resource)
                {
                    let uri = resource.uri.as_deref().unwrap_or_default();
                    let mut stream = resource_stream(input.providers, uri)?;
                    let new_crc = stream_checksum(&mut stream)?;
                    let old_crc = input
                        .old_checksums
                        .get(&module.location)
                        .copied()
                        .unwrap_or(0);
                    if new_crc != old_crc {
                        debug!("New snapshot available for {}", module.location);
                        plan.new_checksums.insert(module.location.clone(), new_crc);
                        plan.to_update.push((module.clone(), resource.clone()));
                    }
                }
                if let Some(uri) = resource.uri.clone() {
                    plan.resource_to_module.insert(uri, module.id);
                }
            }
            None => {
                if input.managed.contains(&module.id) {
                    plan.to_delete.push(module.clone());
                }
            }
        }
    }

    // Second pass: rehome remaining resources onto deletable modules
    // within the module-update range.
    for resource in to_deploy {
        let range = version::transform(input.bundle_update_range, &resource.version)?;
        let mut matching: BTreeMap<Version, usize> = BTreeMap::new();
        for (i, module) in plan.to_delete.iter().enumerate() {
            if module.symbolic_name.as_deref() == Some(resource.name.as_str())
                && range.contains(&module.version)
            {
                matching.insert(module.version.clone(), i);
            }
        }
        match matching.into_iter().next_back() {
            Some((_, i)) => {
                let module = plan.to_delete.remove(i);
                if let Some(uri) = resource.uri.clone() {
                    plan.resource_to_module.insert(uri, module.id);
                }
                plan.to_update.push((module, resource.clone()));
            }
            None => plan.to_install.push(resource.clone()),
        }
    }

    Ok(plan)
}
