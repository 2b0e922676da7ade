// src/engine.rs

//! The feature engine facade.
//!
//! Serializes all state access behind one mutex (engine state, repository
//! cache, feature index), releases it around I/O (repository loading,
//! resolution, checksums, module operations), and runs every deployment on
//! a dedicated worker thread while the caller blocks on the result. A
//! refresh executed on the caller's own thread could interrupt it and
//! strand modules unstarted; the worker thread avoids that.

use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::sync::{Arc, Mutex};
use std::thread;

use tracing::{info, warn};

use crate::catalog::{Catalog, FeatureIndex, RepositoryLoader};
use crate::deploy::{
    compute_deployment, DeployConfig, DeployOptions, DeploymentExecutor, PlannerInput,
};
use crate::error::{Error, Result};
use crate::event::{Event, FeatureEventKind, Listener, RepositoryEventKind};
use crate::host::{ModuleHost, ModuleId};
use crate::model::{Feature, FeatureId, Repository};
use crate::resolver::{expand_conditionals, Resolution, ResolveRequest, Resolver, Resource};
use crate::state::{EngineState, StateStore};

/// Installs a feature's configuration payloads. Runs after the state
/// commit so configurations never precede the modules that consume them.
pub trait ConfigInstaller: Send + Sync {
    fn install_feature_configs(&self, feature: &Feature) -> Result<()>;
}

/// External collaborators the engine drives.
pub struct EngineServices {
    pub loader: Arc<dyn RepositoryLoader>,
    pub resolver: Arc<dyn Resolver>,
    pub host: Arc<dyn ModuleHost>,
    pub config_installer: Option<Arc<dyn ConfigInstaller>>,
    /// Override URIs handed through to the resolver.
    pub overrides: BTreeSet<String>,
    /// The engine's own module on the runtime, shielded from
    /// update/delete and always started last.
    pub own_module: Option<ModuleId>,
}

struct Shared {
    state: EngineState,
    catalog: Catalog,
    store: StateStore,
}

struct EngineInner {
    shared: Mutex<Shared>,
    listeners: Mutex<Vec<Arc<dyn Listener>>>,
    services: EngineServices,
    config: DeployConfig,
}

/// Public entry point for feature lifecycle management.
#[derive(Clone)]
pub struct Engine {
    inner: Arc<EngineInner>,
}

impl Engine {
    /// Create an engine around a state store and its collaborators. A
    /// failed state load is logged and treated as empty state.
    pub fn new(store: StateStore, services: EngineServices, config: DeployConfig) -> Self {
        let state = match store.load() {
            Ok(state) => state,
            Err(e) => {
                warn!("Error loading engine state: {}", e);
                EngineState::default()
            }
        };
        Self {
            inner: Arc::new(EngineInner {
                shared: Mutex::new(Shared {
                    state,
                    catalog: Catalog::new(),
                    store,
                }),
                listeners: Mutex::new(Vec::new()),
                services,
                config,
            }),
        }
    }

    //
    // Repository support
    //

    /// Load and register a repository. A no-op when already registered.
    pub fn add_repository(&self, uri: &str) -> Result<()> {
        {
            let shared = self.inner.shared.lock().unwrap();
            if shared.state.repositories.contains(uri) {
                return Ok(());
            }
        }
        let repo = self.inner.services.loader.load(uri)?;
        {
            let mut shared = self.inner.shared.lock().unwrap();
            shared.catalog.insert(repo);
            if !shared.state.repositories.insert(uri.to_string()) {
                return Ok(());
            }
            save_state(&mut shared);
        }
        info!("Added feature repository {}", uri);
        self.inner
            .emit(Event::repository(uri, RepositoryEventKind::Added, false));
        Ok(())
    }

    /// Unregister a repository and evict every cached repository no longer
    /// reachable from the remaining roots. A no-op when not registered.
    pub fn remove_repository(&self, uri: &str) -> Result<()> {
        {
            let mut shared = self.inner.shared.lock().unwrap();
            if !shared.state.repositories.remove(uri) {
                return Ok(());
            }
            let roots = shared.state.repositories.clone();
            shared.catalog.evict_unreachable(&roots);
            save_state(&mut shared);
        }
        info!("Removed feature repository {}", uri);
        self.inner
            .emit(Event::repository(uri, RepositoryEventKind::Removed, false));
        Ok(())
    }

    /// URIs of all loaded repositories, referenced ones included.
    pub fn list_repositories(&self) -> Result<Vec<String>> {
        self.inner.feature_index()?;
        let shared = self.inner.shared.lock().unwrap();
        Ok(shared.catalog.repositories().map(|r| r.uri.clone()).collect())
    }

    /// Find a loaded repository by its declared name.
    pub fn repository(&self, name: &str) -> Result<Option<Repository>> {
        self.inner.feature_index()?;
        let shared = self.inner.shared.lock().unwrap();
        Ok(shared.catalog.by_name(name).cloned())
    }

    //
    // Feature queries
    //

    /// Every feature in the catalog, every version.
    pub fn list_features(&self) -> Result<Vec<Feature>> {
        Ok(self.inner.feature_index()?.all())
    }

    /// Resolve a feature by name and optional version spec. `None` or the
    /// wildcard yields the highest version.
    pub fn feature(&self, name: &str, version: Option<&str>) -> Result<Option<Feature>> {
        Ok(self.inner.feature_index()?.matching(name, version.unwrap_or("")))
    }

    /// Ids of all installed features, sorted.
    pub fn installed_features(&self) -> Vec<String> {
        let shared = self.inner.shared.lock().unwrap();
        shared.state.installed_features.iter().cloned().collect()
    }

    /// Ids of the features explicitly required by the user, sorted.
    pub fn required_features(&self) -> Vec<String> {
        let shared = self.inner.shared.lock().unwrap();
        shared.state.required_features.iter().cloned().collect()
    }

    /// Modules whose lifecycle the engine owns.
    pub fn managed_modules(&self) -> BTreeSet<ModuleId> {
        let shared = self.inner.shared.lock().unwrap();
        shared.state.managed_modules.clone()
    }

    /// Recorded content fingerprints by module location.
    pub fn module_checksums(&self) -> BTreeMap<String, u64> {
        let shared = self.inner.shared.lock().unwrap();
        shared.state.module_checksums.clone()
    }

    pub fn is_installed(&self, spec: &str) -> Result<bool> {
        let id = FeatureId::parse(spec)?;
        let shared = self.inner.shared.lock().unwrap();
        Ok(shared.state.installed_features.contains(&id.to_string()))
    }

    pub fn is_boot_done(&self) -> bool {
        self.inner.shared.lock().unwrap().state.boot_done
    }

    pub fn boot_done(&self) {
        let mut shared = self.inner.shared.lock().unwrap();
        shared.state.boot_done = true;
        save_state(&mut shared);
    }

    //
    // Listener support
    //

    /// Register a listener and replay the current state to it (replayed
    /// repository-added and feature-installed events).
    pub fn register_listener(&self, listener: Arc<dyn Listener>) {
        self.inner.listeners.lock().unwrap().push(Arc::clone(&listener));
        let (repositories, installed) = {
            let shared = self.inner.shared.lock().unwrap();
            (
                shared.state.repositories.clone(),
                shared.state.installed_features.clone(),
            )
        };
        for uri in repositories {
            listener.on_event(&Event::repository(uri, RepositoryEventKind::Added, true));
        }
        for id in installed {
            if let Ok(feature) = FeatureId::parse(&id) {
                listener.on_event(&Event::feature(feature, FeatureEventKind::Installed, true));
            }
        }
    }

    pub fn unregister_listener(&self, listener: &Arc<dyn Listener>) {
        self.inner
            .listeners
            .lock()
            .unwrap()
            .retain(|l| !Arc::ptr_eq(l, listener));
    }

    //
    // Installation and uninstallation
    //

    pub fn install_feature(&self, spec: &str, options: &DeployOptions) -> Result<()> {
        self.install_features(&[spec], options)
    }

    /// Add the given features to the required set and deploy.
    pub fn install_features(&self, specs: &[&str], options: &DeployOptions) -> Result<()> {
        let (mut required, managed) = self.inner.copy_state();
        let index = self.inner.feature_index()?;
        let mut to_add: Vec<String> = Vec::new();
        for spec in specs {
            let id = FeatureId::parse(spec)?;
            let feature = index
                .matching(&id.name, &id.version.to_string())
                .ok_or_else(|| Error::NotFound(id.to_string()))?;
            let fid = feature.id().to_string();
            if !to_add.contains(&fid) {
                to_add.push(fid);
            }
        }
        self.inner
            .print(&format!("Adding features: {}", to_add.join(", ")), options.verbose);
        required.extend(to_add);
        self.deploy(required, managed, options)
    }

    pub fn uninstall_feature(&self, spec: &str, options: &DeployOptions) -> Result<()> {
        self.uninstall_features(&[spec], options)
    }

    /// Remove the given features from the required set and deploy. A
    /// wildcard version uninstalls the single installed version of that
    /// name; multiple installed versions make the request ambiguous.
    pub fn uninstall_features(&self, specs: &[&str], options: &DeployOptions) -> Result<()> {
        let (mut required, managed) = self.inner.copy_state();
        let mut to_remove: Vec<String> = Vec::new();
        for spec in specs {
            let id = FeatureId::parse(spec)?;
            let matches: Vec<String> = if id.is_wildcard() {
                required
                    .iter()
                    .filter(|f| {
                        FeatureId::parse(f.as_str())
                            .map(|p| p.name == id.name)
                            .unwrap_or(false)
                    })
                    .cloned()
                    .collect()
            } else {
                let normalized = id.to_string();
                required.iter().filter(|f| **f == normalized).cloned().collect()
            };
            if matches.is_empty() {
                return Err(Error::NotInstalled(id.to_string()));
            }
            if matches.len() > 1 {
                return Err(Error::MultipleVersions {
                    name: id.name,
                    versions: matches.join(", "),
                });
            }
            for m in matches {
                if !to_remove.contains(&m) {
                    to_remove.push(m);
                }
            }
        }
        self.inner.print(
            &format!("Removing features: {}", to_remove.join(", ")),
            options.verbose,
        );
        for feature in &to_remove {
            required.remove(feature);
        }
        self.deploy(required, managed, options)
    }

    /// Run the deployment on a dedicated worker thread and propagate its
    /// result to the caller.
    fn deploy(
        &self,
        required: BTreeSet<String>,
        managed: BTreeSet<ModuleId>,
        options: &DeployOptions,
    ) -> Result<()> {
        let inner = Arc::clone(&self.inner);
        let options = options.clone();
        let handle = thread::Builder::new()
            .name("deploy-worker".to_string())
            .spawn(move || inner.do_deploy(required, managed, &options))?;
        match handle.join() {
            Ok(result) => result,
            Err(_) => Err(Error::InvariantViolation(
                "deployment worker panicked".to_string(),
            )),
        }
    }
}

impl EngineInner {
    /// Snapshot the required/managed sets under the lock.
    fn copy_state(&self) -> (BTreeSet<String>, BTreeSet<ModuleId>) {
        let shared = self.shared.lock().unwrap();
        (
            shared.state.required_features.clone(),
            shared.state.managed_modules.clone(),
        )
    }

    /// The feature index, rebuilt when invalidated: a worklist traversal
    /// over repository references, loading each URI at most once and
    /// seeding from the cache. The rebuilt index is only cached when the
    /// root set did not change during the unlocked I/O.
    fn feature_index(&self) -> Result<FeatureIndex> {
        let roots: BTreeSet<String> = {
            let shared = self.shared.lock().unwrap();
            if let Some(index) = shared.catalog.index() {
                return Ok(index);
            }
            shared.state.repositories.clone()
        };
        let mut visited: BTreeSet<String> = BTreeSet::new();
        let mut queue: VecDeque<String> = roots.iter().cloned().collect();
        while let Some(uri) = queue.pop_front() {
            if !visited.insert(uri.clone()) {
                continue;
            }
            let cached = {
                let shared = self.shared.lock().unwrap();
                shared.catalog.cached(&uri).cloned()
            };
            let repo = match cached {
                Some(repo) => repo,
                None => {
                    let repo = self.services.loader.load(&uri)?;
                    let mut shared = self.shared.lock().unwrap();
                    shared.catalog.insert(repo.clone());
                    repo
                }
            };
            for reference in &repo.references {
                queue.push_back(reference.clone());
            }
        }
        let mut shared = self.shared.lock().unwrap();
        let index = shared.catalog.build_index();
        if shared.state.repositories == roots {
            shared.catalog.set_index(index.clone());
        }
        Ok(index)
    }

    fn emit(&self, event: Event) {
        let listeners = self.listeners.lock().unwrap().clone();
        for listener in listeners {
            listener.on_event(&event);
        }
    }

    fn print(&self, message: &str, verbose: bool) {
        info!("{}", message);
        if verbose {
            println!("{}", message);
        }
    }

    /// The deployment itself: resolve, expand conditionals, diff, execute,
    /// commit, install configs, notify, refresh and start.
    fn do_deploy(
        &self,
        required: BTreeSet<String>,
        mut managed: BTreeSet<ModuleId>,
        options: &DeployOptions,
    ) -> Result<()> {
        let verbose = options.verbose;
        let index = self.feature_index()?;

        // Resolved unmanaged modules act as capabilities during
        // resolution.
        let modules = self.services.host.modules();
        let system_resources: Vec<Resource> = modules
            .iter()
            .filter(|m| m.state.is_resolved() && !managed.contains(&m.id))
            .filter_map(|m| {
                m.symbolic_name.as_ref().map(|name| Resource {
                    name: name.clone(),
                    version: m.version.clone(),
                    uri: None,
                    feature: None,
                })
            })
            .collect();

        let mut resolution: Resolution = self.services.resolver.resolve(&ResolveRequest {
            features: &required,
            overrides: &self.services.overrides,
            system_resources: &system_resources,
            feature_resolution_range: &self.config.feature_resolution_range,
            catalog: &index,
        })?;

        // Conditionals: one expansion pass, then re-resolve.
        if let Some(expanded) = expand_conditionals(&index, &required, &resolution.resources)? {
            resolution = self.services.resolver.resolve(&ResolveRequest {
                features: &expanded,
                overrides: &self.services.overrides,
                system_resources: &system_resources,
                feature_resolution_range: &self.config.feature_resolution_range,
                catalog: &index,
            })?;
        }

        // Requested start levels per location; the last contributing
        // feature wins.
        let mut start_levels: BTreeMap<String, u32> = BTreeMap::new();
        for id in resolution.feature_ids() {
            if let Some(feature) = index.matching(&id.name, &id.version.to_string()) {
                for module in &feature.modules {
                    if let Some(level) = module.start_level.filter(|l| *l > 0) {
                        start_levels.insert(module.location.clone(), level);
                    }
                }
            }
        }

        let old_checksums = {
            let shared = self.shared.lock().unwrap();
            shared.state.module_checksums.clone()
        };
        let mut plan = compute_deployment(&PlannerInput {
            resources: &resolution.resources,
            modules: &modules,
            managed: &managed,
            providers: &resolution.providers,
            old_checksums: &old_checksums,
            update_snapshots: self.config.update_snapshots,
            bundle_update_range: &self.config.bundle_update_range,
        })?;

        if plan.is_empty() {
            self.print("No deployment change.", verbose);
            return Ok(());
        }
        plan.log();

        // The engine's own module is never updated or deleted.
        if let Some(own) = self.services.own_module {
            let before = plan.to_update.len() + plan.to_delete.len();
            plan.to_update.retain(|(m, _)| m.id != own);
            plan.to_delete.retain(|m| m.id != own);
            if plan.to_update.len() + plan.to_delete.len() != before {
                warn!("Updating or uninstalling the engine's own module is not supported");
            }
        }

        let mut executor =
            DeploymentExecutor::new(self.services.host.as_ref(), &resolution.providers, verbose);
        let outcome = executor.apply(&plan, &mut managed, &start_levels)?;

        // Commit the new state.
        let (new_features, removed_features) = {
            let mut shared = self.shared.lock().unwrap();
            let all: BTreeSet<String> = resolution
                .feature_ids()
                .iter()
                .map(|id| id.to_string())
                .collect();
            let new: Vec<String> = all
                .iter()
                .filter(|id| !shared.state.installed_features.contains(*id))
                .cloned()
                .collect();
            let removed: Vec<String> = shared
                .state
                .installed_features
                .iter()
                .filter(|id| !all.contains(*id))
                .cloned()
                .collect();
            shared.state.module_checksums.extend(plan.new_checksums.clone());
            shared
                .state
                .module_checksums
                .extend(outcome.new_checksums.clone());
            shared.state.required_features = required.clone();
            shared.state.installed_features = all;
            shared.state.managed_modules = managed.clone();
            save_state(&mut shared);
            (new, removed)
        };

        // Configurations for newly installed features follow the commit.
        if let Some(installer) = &self.services.config_installer {
            for id in &new_features {
                let fid = FeatureId::parse(id)?;
                if let Some(feature) = index.matching(&fid.name, &fid.version.to_string()) {
                    installer.install_feature_configs(&feature)?;
                }
            }
        }

        for id in &new_features {
            if let Ok(feature) = FeatureId::parse(id) {
                self.emit(Event::feature(feature, FeatureEventKind::Installed, false));
            }
        }
        for id in &removed_features {
            if let Ok(feature) = FeatureId::parse(id) {
                self.emit(Event::feature(feature, FeatureEventKind::Uninstalled, false));
            }
        }

        executor.refresh_and_start(&self.config, &managed, self.services.own_module)?;
        self.print("Done.", verbose);
        Ok(())
    }
}

/// Persist the state, logging instead of propagating failures; the next
/// successful save repairs the store.
fn save_state(shared: &mut Shared) {
    let state = shared.state.clone();
    if let Err(e) = shared.store.save(&state) {
        warn!("Error saving engine state: {}", e);
    }
}
