// src/deploy/executor.rs

//! Deployment execution against the module host.
//!
//! Phase order is mandatory: stop, uninstall, update, install — then the
//! engine commits state and installs configurations — then refresh
//! expansion, refresh, start. Stops run in service-usage order so
//! consumers always stop before the providers they use; starts run in
//! requirement order so providers start first. Start failures are
//! accumulated and reported as one aggregate error after the batch.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::mem;
use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::checksum::stream_checksum;
use crate::deploy::planner::is_updateable;
use crate::deploy::{resource_stream, DeployConfig, DeploymentPlan};
use crate::error::{Error, Result, StartErrors};
use crate::host::{ModuleHost, ModuleId, ModuleState};
use crate::resolver::StreamProvider;

/// Results of the module-operation phases that the engine folds into its
/// state commit.
#[derive(Debug, Default)]
pub struct ApplyOutcome {
    /// URIs of freshly installed resources mapped to their new module ids.
    pub resource_to_module: BTreeMap<String, ModuleId>,
    /// Checksums recorded for freshly installed updateable resources.
    pub new_checksums: BTreeMap<String, u64>,
}

/// Executes a snapshot plan. Holds no engine locks; all module operations
/// happen through the host interface.
pub struct DeploymentExecutor<'a> {
    host: &'a dyn ModuleHost,
    providers: &'a HashMap<String, Arc<dyn StreamProvider>>,
    verbose: bool,
    to_refresh: BTreeSet<ModuleId>,
    to_start: BTreeSet<ModuleId>,
}

impl<'a> DeploymentExecutor<'a> {
    pub fn new(
        host: &'a dyn ModuleHost,
        providers: &'a HashMap<String, Arc<dyn StreamProvider>>,
        verbose: bool,
    ) -> Self {
        Self {
            host,
            providers,
            verbose,
            to_refresh: BTreeSet::new(),
            to_start: BTreeSet::new(),
        }
    }

    /// Phases 1-4: stop, uninstall, update, install.
    ///
    /// `managed` is the worker's snapshot of the managed set and is kept
    /// in sync as modules are uninstalled and installed. `start_levels`
    /// maps resource URIs to requested start levels.
    pub fn apply(
        &mut self,
        plan: &DeploymentPlan,
        managed: &mut BTreeSet<ModuleId>,
        start_levels: &BTreeMap<String, u32>,
    ) -> Result<ApplyOutcome> {
        let mut outcome = ApplyOutcome::default();

        // Stop phase: everything about to be updated or deleted, except
        // fragments and modules already inert.
        let mut to_stop: BTreeSet<ModuleId> = plan
            .to_update
            .iter()
            .map(|(m, _)| m.id)
            .chain(plan.to_delete.iter().map(|m| m.id))
            .collect();
        self.remove_fragments_and_in_state(
            &mut to_stop,
            &[
                ModuleState::Uninstalled,
                ModuleState::Resolved,
                ModuleState::Stopping,
            ],
        );
        if !to_stop.is_empty() {
            self.print("Stopping modules:");
            self.stop_in_usage_order(&mut to_stop, None)?;
        }

        // Uninstall phase.
        if !plan.to_delete.is_empty() {
            self.print("Uninstalling modules:");
            for module in &plan.to_delete {
                self.print(&format!(
                    "  {} / {}",
                    module.symbolic_name.as_deref().unwrap_or("?"),
                    module.version
                ));
                self.host.uninstall(module.id)?;
                managed.remove(&module.id);
                self.to_refresh.insert(module.id);
            }
        }

        // Update phase.
        if !plan.to_update.is_empty() {
            self.print("Updating modules:");
            for (module, resource) in &plan.to_update {
                let uri = resource.uri.as_deref().ok_or_else(|| {
                    Error::InvariantViolation(format!(
                        "update resource for module {} has no uri",
                        module.id
                    ))
                })?;
                self.print(&format!("  {}", uri));
                let mut stream = resource_stream(self.providers, uri)?;
                self.host.update(module.id, stream.as_mut())?;
                self.to_refresh.insert(module.id);
                self.to_start.insert(module.id);
                if let Some(level) = start_levels.get(uri) {
                    self.host.set_start_level(module.id, *level)?;
                }
            }
        }

        // Install phase.
        if !plan.to_install.is_empty() {
            self.print("Installing modules:");
            for resource in &plan.to_install {
                let uri = resource.uri.as_deref().ok_or_else(|| {
                    Error::InvariantViolation("resource in install set has no uri".to_string())
                })?;
                self.print(&format!("  {}", uri));
                let mut stream = resource_stream(self.providers, uri)?;
                let id = self.host.install(uri, stream.as_mut())?;
                managed.insert(id);
                self.to_start.insert(id);
                outcome.resource_to_module.insert(uri.to_string(), id);
                if is_updateable(resource) {
                    let location = self
                        .host
                        .module(id)
                        .map(|m| m.location)
                        .unwrap_or_else(|| uri.to_string());
                    if !plan.new_checksums.contains_key(&location)
                        && !outcome.new_checksums.contains_key(&location)
                    {
                        let mut stream = resource_stream(self.providers, uri)?;
                        let crc = stream_checksum(stream.as_mut())?;
                        outcome.new_checksums.insert(location, crc);
                    }
                }
                if let Some(level) = start_levels.get(uri) {
                    self.host.set_start_level(id, *level)?;
                }
            }
        }

        Ok(outcome)
    }

    /// Phases 7-9: refresh expansion, refresh, start.
    pub fn refresh_and_start(
        &mut self,
        config: &DeployConfig,
        managed: &BTreeSet<ModuleId>,
        own_module: Option<ModuleId>,
    ) -> Result<()> {
        if !config.no_refresh_managed {
            self.widen_refresh_set();
        }
        if config.no_refresh_unmanaged {
            self.to_refresh.retain(|id| managed.contains(id));
        }

        if !config.no_refresh {
            let mut to_stop = self.to_refresh.clone();
            self.remove_fragments_and_in_state(
                &mut to_stop,
                &[
                    ModuleState::Uninstalled,
                    ModuleState::Resolved,
                    ModuleState::Stopping,
                ],
            );
            if !to_stop.is_empty() {
                self.print("Stopping modules:");
                let mut stopped = BTreeSet::new();
                self.stop_in_usage_order(&mut to_stop, Some(&mut stopped))?;
                self.to_start.extend(stopped);
            }

            if !self.to_refresh.is_empty() {
                self.print("Refreshing modules:");
                for &id in &self.to_refresh {
                    if let Some(module) = self.host.module(id) {
                        self.print(&format!(
                            "  {} / {}",
                            module.symbolic_name.as_deref().unwrap_or("?"),
                            module.version
                        ));
                    }
                }
                let ids: Vec<ModuleId> = self.to_refresh.iter().copied().collect();
                self.host.refresh(&ids)?;
            }
        }

        // Start phase.
        let mut to_start = mem::take(&mut self.to_start);
        self.remove_fragments_and_in_state(
            &mut to_start,
            &[
                ModuleState::Uninstalled,
                ModuleState::Active,
                ModuleState::Starting,
            ],
        );
        if !to_start.is_empty() {
            let mut errors = StartErrors::default();
            self.print("Starting modules:");
            for id in self.start_order(&to_start, own_module) {
                if let Some(module) = self.host.module(id) {
                    info!(
                        "  {} / {}",
                        module.symbolic_name.as_deref().unwrap_or("?"),
                        module.version
                    );
                }
                if let Err(e) = self.host.start(id) {
                    errors.push(e);
                }
            }
            if !errors.is_empty() {
                return Err(Error::StartFailures(errors));
            }
        }
        Ok(())
    }

    /// Drop fragments and modules currently in one of the given states.
    /// Ids no longer known to the host are dropped too.
    fn remove_fragments_and_in_state(&self, set: &mut BTreeSet<ModuleId>, states: &[ModuleState]) {
        set.retain(|id| match self.host.module(*id) {
            Some(module) => !states.contains(&module.state) && !module.is_fragment(),
            None => false,
        });
    }

    /// Stop every module in the set, consumers before the providers they
    /// use. Stopped ids are fed to `stopped` when given.
    fn stop_in_usage_order(
        &self,
        to_stop: &mut BTreeSet<ModuleId>,
        mut stopped: Option<&mut BTreeSet<ModuleId>>,
    ) -> Result<()> {
        while !to_stop.is_empty() {
            let batch = self.stop_batch(to_stop);
            if batch.is_empty() {
                return Err(Error::InvariantViolation(
                    "no stoppable module in stop set".to_string(),
                ));
            }
            for id in batch {
                if let Some(module) = self.host.module(id) {
                    self.print(&format!(
                        "  {} / {}",
                        module.symbolic_name.as_deref().unwrap_or("?"),
                        module.version
                    ));
                }
                self.host.stop(id, true)?;
                to_stop.remove(&id);
                if let Some(sink) = stopped.as_deref_mut() {
                    sink.insert(id);
                }
            }
        }
        Ok(())
    }

    /// Modules in the set whose registered services are not used by any
    /// other member; when every module is in use, fall back to the
    /// provider of the lowest-ranked in-use service so the loop cannot
    /// deadlock.
    fn stop_batch(&self, to_stop: &BTreeSet<ModuleId>) -> Vec<ModuleId> {
        let mut batch: Vec<ModuleId> = Vec::new();
        for &id in to_stop {
            let usage: usize = self
                .host
                .registered_services(id)
                .iter()
                .map(|s| s.users.iter().filter(|u| to_stop.contains(u)).count())
                .sum();
            debug!("Usage for module {} is {}", id, usage);
            if usage == 0 {
                batch.push(id);
            }
        }
        if !batch.is_empty() {
            batch.sort_by(|a, b| b.cmp(a));
            return batch;
        }
        let mut best: Option<(i32, u64, ModuleId)> = None;
        for &id in to_stop {
            for service in self.host.registered_services(id) {
                if !service.users.iter().any(|u| to_stop.contains(u)) {
                    continue;
                }
                let better = match best {
                    None => true,
                    Some((ranking, sid, _)) => (service.ranking, service.id) < (ranking, sid),
                };
                if better {
                    best = Some((service.ranking, service.id, id));
                }
            }
        }
        match best {
            Some((_, _, id)) => {
                debug!("Selected module {} for stop (lowest ranked service)", id);
                vec![id]
            }
            None => Vec::new(),
        }
    }

    /// Widen the refresh set by modules whose unresolved optional imports
    /// become satisfiable by a refreshed provider, and by fragments whose
    /// host is being refreshed.
    fn widen_refresh_set(&mut self) {
        if self.to_refresh.is_empty() {
            return;
        }
        let refreshed: Vec<_> = self
            .to_refresh
            .iter()
            .filter_map(|id| self.host.module(*id))
            .collect();
        let capabilities: BTreeSet<&str> = refreshed
            .iter()
            .flat_map(|m| m.capabilities.iter().map(String::as_str))
            .collect();
        let names: BTreeSet<&str> = refreshed
            .iter()
            .filter_map(|m| m.symbolic_name.as_deref())
            .collect();

        let mut added: Vec<ModuleId> = Vec::new();
        for module in self.host.modules() {
            if self.to_refresh.contains(&module.id) {
                continue;
            }
            let optional_hit = module
                .optional_imports
                .iter()
                .any(|i| capabilities.contains(i.as_str()));
            let fragment_hit = module
                .fragment_host
                .as_deref()
                .is_some_and(|h| names.contains(h));
            if optional_hit || fragment_hit {
                debug!("Widening refresh set with module {}", module.id);
                added.push(module.id);
            }
        }
        self.to_refresh.extend(added);
    }

    /// Requirement-topological start order: providers before requirers,
    /// independent modules first in id order, the engine's own module
    /// always last.
    fn start_order(&self, to_start: &BTreeSet<ModuleId>, own_module: Option<ModuleId>) -> Vec<ModuleId> {
        let own = own_module.filter(|id| to_start.contains(id));
        let infos: BTreeMap<ModuleId, _> = to_start
            .iter()
            .filter(|id| Some(**id) != own)
            .filter_map(|id| self.host.module(*id).map(|m| (*id, m)))
            .collect();

        let mut providers_by_cap: BTreeMap<&str, Vec<ModuleId>> = BTreeMap::new();
        for (id, module) in &infos {
            for cap in &module.capabilities {
                providers_by_cap.entry(cap.as_str()).or_default().push(*id);
            }
        }
        let mut edges: BTreeSet<(ModuleId, ModuleId)> = BTreeSet::new();
        for (id, module) in &infos {
            for req in &module.requirements {
                for provider in providers_by_cap.get(req.as_str()).into_iter().flatten() {
                    if provider != id {
                        edges.insert((*provider, *id));
                    }
                }
            }
        }

        let mut indegree: BTreeMap<ModuleId, usize> =
            infos.keys().map(|id| (*id, 0)).collect();
        for (_, requirer) in &edges {
            if let Some(d) = indegree.get_mut(requirer) {
                *d += 1;
            }
        }

        let mut ready: BTreeSet<ModuleId> = indegree
            .iter()
            .filter(|(_, d)| **d == 0)
            .map(|(id, _)| *id)
            .collect();
        let mut ordered: Vec<ModuleId> = Vec::new();
        while let Some(&id) = ready.iter().next() {
            ready.remove(&id);
            ordered.push(id);
            for (provider, requirer) in &edges {
                if *provider != id {
                    continue;
                }
                if let Some(d) = indegree.get_mut(requirer) {
                    *d -= 1;
                    if *d == 0 {
                        ready.insert(*requirer);
                    }
                }
            }
        }
        if ordered.len() < infos.len() {
            warn!("Requirement cycle among modules to start; appending remainder");
            for id in infos.keys() {
                if !ordered.contains(id) {
                    ordered.push(*id);
                }
            }
        }
        if let Some(own) = own {
            ordered.push(own);
        }
        ordered
    }

    fn print(&self, message: &str) {
        info!("{}", message);
        if self.verbose {
            println!("{}", message);
        }
    }
}
