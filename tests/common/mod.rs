// tests/common/mod.rs

//! Shared fixtures for integration tests: an in-memory module host with an
//! operation log, a map-backed repository loader, and a mutable in-memory
//! content source.
//!
//! Module content is a tiny manifest text the host parses on install:
//!
//! ```text
//! name: web-core
//! version: 1.0.0
//! fragment-host: web-core
//! capability: pkg.http
//! requirement: pkg.log
//! optional-import: pkg.metrics
//! ```

use std::collections::{BTreeSet, HashMap};
use std::io::Read;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use gantry::{
    Conditional, ConfigInstaller, ContentSource, DeployConfig, Engine, EngineServices, Error,
    Event, Feature, FeatureRef, Listener, ModuleHost, ModuleId, ModuleInfo, ModuleRef,
    ModuleState, Repository, RepositoryLoader, Result, ServiceRef, StateStore, Version,
    WalkerResolver,
};
use gantry::resolver::ModuleMetadata;

// =============================================================================
// MODULE CONTENT MANIFESTS
// =============================================================================

/// Render a manifest for a plain module.
pub fn manifest(name: &str, version: &str) -> String {
    format!("name: {}\nversion: {}\n", name, version)
}

/// Render a manifest with extra header lines (`capability: x`, ...).
pub fn manifest_with(name: &str, version: &str, extras: &[&str]) -> String {
    let mut text = manifest(name, version);
    for extra in extras {
        text.push_str(extra);
        text.push('\n');
    }
    text
}

fn parse_manifest(content: &str) -> Option<(String, Version, ModuleHeaders)> {
    let mut name = None;
    let mut version = None;
    let mut headers = ModuleHeaders::default();
    for line in content.lines() {
        let (key, value) = match line.split_once(':') {
            Some((key, value)) => (key.trim(), value.trim()),
            None => continue,
        };
        match key {
            "name" => name = Some(value.to_string()),
            "version" => version = Version::parse(value).ok(),
            "fragment-host" => headers.fragment_host = Some(value.to_string()),
            "capability" => headers.capabilities.push(value.to_string()),
            "requirement" => headers.requirements.push(value.to_string()),
            "optional-import" => headers.optional_imports.push(value.to_string()),
            _ => {}
        }
    }
    Some((name?, version?, headers))
}

#[derive(Debug, Clone, Default)]
struct ModuleHeaders {
    fragment_host: Option<String>,
    capabilities: Vec<String>,
    requirements: Vec<String>,
    optional_imports: Vec<String>,
}

// =============================================================================
// IN-MEMORY MODULE HOST
// =============================================================================

/// Every module operation the host performed, in order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HostOp {
    Install(String),
    Update(ModuleId),
    Uninstall(ModuleId),
    Stop(ModuleId),
    Start(ModuleId),
    SetStartLevel(ModuleId, u32),
    Refresh(Vec<ModuleId>),
}

#[derive(Debug, Clone)]
struct MemModule {
    info: ModuleInfo,
}

#[derive(Default)]
struct HostState {
    next_id: ModuleId,
    modules: Vec<MemModule>,
    services: Vec<ServiceRef>,
    fail_start: BTreeSet<String>,
}

/// In-memory module host recording every operation.
pub struct MemoryHost {
    state: Mutex<HostState>,
    ops: Mutex<Vec<HostOp>>,
}

impl MemoryHost {
    /// A fresh host with the immutable system module as id 0.
    pub fn new() -> Self {
        let system = MemModule {
            info: ModuleInfo {
                id: 0,
                symbolic_name: Some("system.module".to_string()),
                version: Version::new(1, 0, 0),
                location: "system:module".to_string(),
                state: ModuleState::Active,
                fragment_host: None,
                requirements: Vec::new(),
                capabilities: Vec::new(),
                optional_imports: Vec::new(),
            },
        };
        Self {
            state: Mutex::new(HostState {
                next_id: 1,
                modules: vec![system],
                services: Vec::new(),
                fail_start: BTreeSet::new(),
            }),
            ops: Mutex::new(Vec::new()),
        }
    }

    pub fn ops(&self) -> Vec<HostOp> {
        self.ops.lock().unwrap().clone()
    }

    pub fn clear_ops(&self) {
        self.ops.lock().unwrap().clear();
    }

    /// Id of the live module with the given symbolic name.
    pub fn id_of(&self, name: &str) -> Option<ModuleId> {
        self.state
            .lock()
            .unwrap()
            .modules
            .iter()
            .find(|m| m.info.symbolic_name.as_deref() == Some(name))
            .map(|m| m.info.id)
    }

    pub fn state_of(&self, name: &str) -> Option<ModuleState> {
        self.state
            .lock()
            .unwrap()
            .modules
            .iter()
            .find(|m| m.info.symbolic_name.as_deref() == Some(name))
            .map(|m| m.info.state)
    }

    /// Register a service for the ordering phases.
    pub fn add_service(&self, id: u64, ranking: i32, provider: ModuleId, users: Vec<ModuleId>) {
        self.state.lock().unwrap().services.push(ServiceRef {
            id,
            ranking,
            provider,
            users,
        });
    }

    /// Make `start` fail for the module with the given symbolic name.
    pub fn fail_start_of(&self, name: &str) {
        self.state.lock().unwrap().fail_start.insert(name.to_string());
    }

    fn record(&self, op: HostOp) {
        self.ops.lock().unwrap().push(op);
    }
}

impl ModuleHost for MemoryHost {
    fn modules(&self) -> Vec<ModuleInfo> {
        self.state
            .lock()
            .unwrap()
            .modules
            .iter()
            .map(|m| m.info.clone())
            .collect()
    }

    fn module(&self, id: ModuleId) -> Option<ModuleInfo> {
        self.state
            .lock()
            .unwrap()
            .modules
            .iter()
            .find(|m| m.info.id == id)
            .map(|m| m.info.clone())
    }

    fn install(&self, location: &str, stream: &mut dyn Read) -> Result<ModuleId> {
        let mut content = String::new();
        stream.read_to_string(&mut content)?;
        let (name, version, headers) = parse_manifest(&content).ok_or_else(|| {
            Error::ModuleOperation(format!("invalid module content at {}", location))
        })?;
        self.record(HostOp::Install(location.to_string()));
        let mut state = self.state.lock().unwrap();
        let id = state.next_id;
        state.next_id += 1;
        state.modules.push(MemModule {
            info: ModuleInfo {
                id,
                symbolic_name: Some(name),
                version,
                location: location.to_string(),
                state: ModuleState::Installed,
                fragment_host: headers.fragment_host,
                requirements: headers.requirements,
                capabilities: headers.capabilities,
                optional_imports: headers.optional_imports,
            },
        });
        Ok(id)
    }

    fn update(&self, id: ModuleId, stream: &mut dyn Read) -> Result<()> {
        let mut content = String::new();
        stream.read_to_string(&mut content)?;
        let (name, version, headers) = parse_manifest(&content)
            .ok_or_else(|| Error::ModuleOperation(format!("invalid update content for {}", id)))?;
        self.record(HostOp::Update(id));
        let mut state = self.state.lock().unwrap();
        let module = state
            .modules
            .iter_mut()
            .find(|m| m.info.id == id)
            .ok_or_else(|| Error::ModuleOperation(format!("no module {}", id)))?;
        module.info.symbolic_name = Some(name);
        module.info.version = version;
        module.info.fragment_host = headers.fragment_host;
        module.info.requirements = headers.requirements;
        module.info.capabilities = headers.capabilities;
        module.info.optional_imports = headers.optional_imports;
        Ok(())
    }

    fn uninstall(&self, id: ModuleId) -> Result<()> {
        self.record(HostOp::Uninstall(id));
        let mut state = self.state.lock().unwrap();
        state.modules.retain(|m| m.info.id != id);
        state.services.retain(|s| s.provider != id);
        Ok(())
    }

    fn stop(&self, id: ModuleId, _transient: bool) -> Result<()> {
        self.record(HostOp::Stop(id));
        let mut state = self.state.lock().unwrap();
        if let Some(module) = state.modules.iter_mut().find(|m| m.info.id == id) {
            module.info.state = ModuleState::Resolved;
        }
        Ok(())
    }

    fn start(&self, id: ModuleId) -> Result<()> {
        let name = {
            let state = self.state.lock().unwrap();
            let module = state.modules.iter().find(|m| m.info.id == id);
            module.and_then(|m| m.info.symbolic_name.clone()).unwrap_or_default()
        };
        if self.state.lock().unwrap().fail_start.contains(&name) {
            return Err(Error::ModuleOperation(format!("cannot start '{}'", name)));
        }
        self.record(HostOp::Start(id));
        let mut state = self.state.lock().unwrap();
        if let Some(module) = state.modules.iter_mut().find(|m| m.info.id == id) {
            module.info.state = ModuleState::Active;
        }
        Ok(())
    }

    fn set_start_level(&self, id: ModuleId, level: u32) -> Result<()> {
        self.record(HostOp::SetStartLevel(id, level));
        Ok(())
    }

    fn registered_services(&self, id: ModuleId) -> Vec<ServiceRef> {
        self.state
            .lock()
            .unwrap()
            .services
            .iter()
            .filter(|s| s.provider == id)
            .cloned()
            .collect()
    }

    fn refresh(&self, ids: &[ModuleId]) -> Result<()> {
        self.record(HostOp::Refresh(ids.to_vec()));
        Ok(())
    }
}

// =============================================================================
// MAP-BACKED REPOSITORY LOADER AND CONTENT SOURCE
// =============================================================================

/// Repository loader backed by a map of pre-built repositories, counting
/// loads per URI.
pub struct MapLoader {
    repos: Mutex<HashMap<String, Repository>>,
    loads: AtomicUsize,
}

impl MapLoader {
    pub fn new(repos: Vec<Repository>) -> Self {
        Self {
            repos: Mutex::new(repos.into_iter().map(|r| (r.uri.clone(), r)).collect()),
            loads: AtomicUsize::new(0),
        }
    }

    pub fn load_count(&self) -> usize {
        self.loads.load(Ordering::SeqCst)
    }

    /// Replace a repository definition, as a repository refresh would.
    pub fn set(&self, repo: Repository) {
        self.repos.lock().unwrap().insert(repo.uri.clone(), repo);
    }
}

impl RepositoryLoader for MapLoader {
    fn load(&self, uri: &str) -> Result<Repository> {
        self.loads.fetch_add(1, Ordering::SeqCst);
        self.repos
            .lock()
            .unwrap()
            .get(uri)
            .cloned()
            .ok_or_else(|| Error::Parse(format!("unknown repository '{}'", uri)))
    }
}

/// Mutable in-memory content keyed by URI; `set` changes module content
/// between deployments.
pub struct MemoryContent {
    entries: Mutex<HashMap<String, String>>,
}

impl MemoryContent {
    pub fn new(entries: Vec<(&str, String)>) -> Self {
        Self {
            entries: Mutex::new(
                entries
                    .into_iter()
                    .map(|(uri, content)| (uri.to_string(), content))
                    .collect(),
            ),
        }
    }

    pub fn set(&self, uri: &str, content: String) {
        self.entries.lock().unwrap().insert(uri.to_string(), content);
    }

    fn content(&self, uri: &str) -> Result<String> {
        self.entries
            .lock()
            .unwrap()
            .get(uri)
            .cloned()
            .ok_or_else(|| Error::Unresolvable(format!("no content for '{}'", uri)))
    }
}

impl ContentSource for MemoryContent {
    fn metadata(&self, uri: &str) -> Result<ModuleMetadata> {
        let content = self.content(uri)?;
        let (name, version, _) = parse_manifest(&content)
            .ok_or_else(|| Error::Unresolvable(format!("invalid content for '{}'", uri)))?;
        Ok(ModuleMetadata {
            symbolic_name: name,
            version,
        })
    }

    fn open(&self, uri: &str) -> Result<Box<dyn Read + Send>> {
        let content = self.content(uri)?;
        Ok(Box::new(std::io::Cursor::new(content.into_bytes())))
    }
}

// =============================================================================
// EVENT RECORDER AND CONFIG RECORDER
// =============================================================================

/// Listener recording a readable trace of every event.
#[derive(Default)]
pub struct EventRecorder {
    events: Mutex<Vec<String>>,
}

impl EventRecorder {
    pub fn events(&self) -> Vec<String> {
        self.events.lock().unwrap().clone()
    }
}

impl Listener for EventRecorder {
    fn on_event(&self, event: &Event) {
        let line = match event {
            Event::Repository(e) => {
                format!("repository {:?} {} replayed={}", e.kind, e.uri, e.replayed)
            }
            Event::Feature(e) => {
                format!("feature {:?} {} replayed={}", e.kind, e.feature, e.replayed)
            }
        };
        self.events.lock().unwrap().push(line);
    }
}

/// Config installer recording which features it was invoked for.
#[derive(Default)]
pub struct ConfigRecorder {
    installed: Mutex<Vec<String>>,
}

impl ConfigRecorder {
    pub fn installed(&self) -> Vec<String> {
        self.installed.lock().unwrap().clone()
    }
}

impl ConfigInstaller for ConfigRecorder {
    fn install_feature_configs(&self, feature: &Feature) -> Result<()> {
        self.installed.lock().unwrap().push(feature.id().to_string());
        Ok(())
    }
}

// =============================================================================
// FEATURE AND REPOSITORY BUILDERS
// =============================================================================

pub fn feature(name: &str, version: &str) -> Feature {
    Feature::new(name, Version::parse(version).unwrap())
}

pub fn feature_with_modules(name: &str, version: &str, locations: &[&str]) -> Feature {
    let mut f = feature(name, version);
    for location in locations {
        f.modules.push(ModuleRef::new(*location));
    }
    f
}

pub fn conditional(triggers: &[(&str, &str)], locations: &[&str]) -> Conditional {
    Conditional {
        triggers: triggers
            .iter()
            .map(|(name, version)| FeatureRef::new(*name, *version))
            .collect(),
        modules: locations.iter().map(|l| ModuleRef::new(*l)).collect(),
        configurations: Vec::new(),
    }
}

pub fn repository(uri: &str, features: Vec<Feature>) -> Repository {
    Repository {
        uri: uri.to_string(),
        name: None,
        references: Vec::new(),
        features,
    }
}

// =============================================================================
// ENGINE RIG
// =============================================================================

/// A fully wired engine over in-memory collaborators.
pub struct TestRig {
    pub engine: Engine,
    pub host: Arc<MemoryHost>,
    pub content: Arc<MemoryContent>,
    pub loader: Arc<MapLoader>,
    pub configs: Arc<ConfigRecorder>,
}

/// Build an engine from repositories and `(uri, manifest)` content
/// entries, with the first repository pre-registered.
pub fn rig(repos: Vec<Repository>, content: Vec<(&str, String)>) -> TestRig {
    let roots: Vec<String> = repos.first().map(|r| r.uri.clone()).into_iter().collect();
    rig_with_roots(repos, content, &roots)
}

/// Like [`rig`] but with non-default deployment tunables.
pub fn rig_with_config(
    repos: Vec<Repository>,
    content: Vec<(&str, String)>,
    config: DeployConfig,
) -> TestRig {
    let roots: Vec<String> = repos.first().map(|r| r.uri.clone()).into_iter().collect();
    build_rig(repos, content, &roots, config)
}

pub fn rig_with_roots(
    repos: Vec<Repository>,
    content: Vec<(&str, String)>,
    roots: &[String],
) -> TestRig {
    build_rig(repos, content, roots, DeployConfig::default())
}

fn build_rig(
    repos: Vec<Repository>,
    content: Vec<(&str, String)>,
    roots: &[String],
    config: DeployConfig,
) -> TestRig {
    let host = Arc::new(MemoryHost::new());
    let content = Arc::new(MemoryContent::new(content));
    let loader = Arc::new(MapLoader::new(repos));
    let configs = Arc::new(ConfigRecorder::default());
    let engine = Engine::new(
        StateStore::in_memory().unwrap(),
        EngineServices {
            loader: Arc::clone(&loader) as Arc<dyn RepositoryLoader>,
            resolver: Arc::new(WalkerResolver::new(
                Arc::clone(&content) as Arc<dyn ContentSource>
            )),
            host: Arc::clone(&host) as Arc<dyn ModuleHost>,
            config_installer: Some(Arc::clone(&configs) as Arc<dyn ConfigInstaller>),
            overrides: Default::default(),
            own_module: None,
        },
        config,
    );
    for root in roots {
        engine.add_repository(root).unwrap();
    }
    TestRig {
        engine,
        host,
        content,
        loader,
        configs,
    }
}
