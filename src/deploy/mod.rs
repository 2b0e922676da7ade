// src/deploy/mod.rs

//! Deployment planning and execution.
//!
//! A deployment takes the resolver's resource set and the live module set
//! and computes a [`DeploymentPlan`] classifying every module as
//! install/update/delete/ignore ([`planner`]), then enacts the plan on the
//! runtime with the mandatory stop/uninstall/update/install/refresh/start
//! ordering ([`executor`]).

mod executor;
mod planner;

pub use executor::{ApplyOutcome, DeploymentExecutor};
pub use planner::{compute_deployment, is_updateable, PlannerInput};

use std::collections::{BTreeMap, HashMap};
use std::io::Read;
use std::sync::Arc;

use tracing::info;

use crate::error::{Error, Result};
use crate::host::{ModuleId, ModuleInfo};
use crate::resolver::{Resource, StreamProvider};

/// Per-call deployment options.
///
/// Only `verbose` is wired; the remaining flags are reserved and accepted
/// without effect.
#[derive(Debug, Clone, Default)]
pub struct DeployOptions {
    /// Mirror deployment log lines to stdout.
    pub verbose: bool,
    pub no_auto_refresh: bool,
    pub no_auto_start: bool,
    pub continue_on_failure: bool,
}

/// Engine-wide deployment tunables.
#[derive(Debug, Clone)]
pub struct DeployConfig {
    /// Recompute checksums of updateable managed modules and update them
    /// in place when content changed.
    pub update_snapshots: bool,
    /// Restrict the refresh set to managed modules.
    pub no_refresh_unmanaged: bool,
    /// Skip widening the refresh set by optional-import and fragment-host
    /// matches.
    pub no_refresh_managed: bool,
    /// Skip the refresh phase entirely.
    pub no_refresh: bool,
    /// Range macro applied to plain feature dependency versions.
    pub feature_resolution_range: String,
    /// Range macro used to rehome resources onto deletable modules.
    pub bundle_update_range: String,
}

impl Default for DeployConfig {
    fn default() -> Self {
        Self {
            update_snapshots: true,
            no_refresh_unmanaged: true,
            no_refresh_managed: true,
            no_refresh: false,
            feature_resolution_range: "[====,====]".to_string(),
            bundle_update_range: "[==,=+)".to_string(),
        }
    }
}

/// The classified diff between resolved resources and live modules.
#[derive(Debug, Default)]
pub struct DeploymentPlan {
    pub to_install: Vec<Resource>,
    /// Modules to update in place, paired with their replacement resource.
    pub to_update: Vec<(ModuleInfo, Resource)>,
    pub to_delete: Vec<ModuleInfo>,
    /// Bridge from resource URI to the live module satisfying it.
    pub resource_to_module: BTreeMap<String, ModuleId>,
    /// Fresh checksums by module location, to merge into engine state.
    pub new_checksums: BTreeMap<String, u64>,
}

impl DeploymentPlan {
    /// True when the deployment would not touch any module.
    pub fn is_empty(&self) -> bool {
        self.to_install.is_empty() && self.to_update.is_empty() && self.to_delete.is_empty()
    }

    /// Log the changes to perform.
    pub fn log(&self) {
        info!("Changes to perform:");
        if !self.to_delete.is_empty() {
            info!("  Modules to uninstall:");
            for module in &self.to_delete {
                info!(
                    "    {} / {}",
                    module.symbolic_name.as_deref().unwrap_or("?"),
                    module.version
                );
            }
        }
        if !self.to_update.is_empty() {
            info!("  Modules to update:");
            for (module, resource) in &self.to_update {
                info!(
                    "    {} / {} with {}",
                    module.symbolic_name.as_deref().unwrap_or("?"),
                    module.version,
                    resource.uri.as_deref().unwrap_or("?")
                );
            }
        }
        if !self.to_install.is_empty() {
            info!("  Modules to install:");
            for resource in &self.to_install {
                info!("    {}", resource.uri.as_deref().unwrap_or("?"));
            }
        }
    }
}

/// Open the content stream behind a deployable resource.
pub(crate) fn resource_stream(
    providers: &HashMap<String, Arc<dyn StreamProvider>>,
    uri: &str,
) -> Result<Box<dyn Read + Send>> {
    providers
        .get(uri)
        .ok_or_else(|| {
            Error::InvariantViolation(format!("resource '{}' has no stream provider", uri))
        })?
        .open()
}
