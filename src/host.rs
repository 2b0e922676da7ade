// src/host.rs

//! Contract with the underlying modular runtime.
//!
//! The runtime owns module lifecycles; the engine only drives them through
//! this narrow interface. Implementations are expected to be thread-safe:
//! the engine calls in from a dedicated deployment worker thread.

use std::io::Read;

use crate::error::Result;
use crate::version::Version;

/// Runtime-assigned module identifier. Id `0` is the system module and is
/// never touched by the engine.
pub type ModuleId = u64;

pub const SYSTEM_MODULE: ModuleId = 0;

/// Lifecycle state of a live module.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModuleState {
    Installed,
    Resolved,
    Starting,
    Active,
    Stopping,
    Uninstalled,
}

impl ModuleState {
    /// True when the module participates in resolution (resolved or
    /// beyond).
    pub fn is_resolved(&self) -> bool {
        !matches!(self, ModuleState::Installed | ModuleState::Uninstalled)
    }
}

/// Snapshot of a live module's identity and wiring metadata.
#[derive(Debug, Clone)]
pub struct ModuleInfo {
    pub id: ModuleId,
    pub symbolic_name: Option<String>,
    pub version: Version,
    pub location: String,
    pub state: ModuleState,
    /// Symbolic name of the host module, for fragment modules.
    pub fragment_host: Option<String>,
    /// Declared requirements (capability identifiers this module consumes).
    pub requirements: Vec<String>,
    /// Declared capabilities (identifiers this module provides).
    pub capabilities: Vec<String>,
    /// Optional imports that are currently unresolved.
    pub optional_imports: Vec<String>,
}

impl ModuleInfo {
    /// Fragments never start on their own; they follow their host.
    pub fn is_fragment(&self) -> bool {
        self.fragment_host.is_some()
    }
}

/// A service registered by a module, with the modules currently using it.
#[derive(Debug, Clone)]
pub struct ServiceRef {
    pub id: u64,
    pub ranking: i32,
    pub provider: ModuleId,
    pub users: Vec<ModuleId>,
}

/// Install/update/stop/start/refresh primitives of the live runtime.
pub trait ModuleHost: Send + Sync {
    /// Snapshot of all live modules.
    fn modules(&self) -> Vec<ModuleInfo>;

    /// Snapshot of a single module, if it exists.
    fn module(&self, id: ModuleId) -> Option<ModuleInfo>;

    /// Install a module from a content stream, returning its new id.
    fn install(&self, location: &str, stream: &mut dyn Read) -> Result<ModuleId>;

    /// Replace a module's content in place.
    fn update(&self, id: ModuleId, stream: &mut dyn Read) -> Result<()>;

    fn uninstall(&self, id: ModuleId) -> Result<()>;

    /// Stop a module. A transient stop does not change the persisted
    /// start state.
    fn stop(&self, id: ModuleId, transient: bool) -> Result<()>;

    fn start(&self, id: ModuleId) -> Result<()>;

    fn set_start_level(&self, id: ModuleId, level: u32) -> Result<()>;

    /// Services registered by the given module.
    fn registered_services(&self, id: ModuleId) -> Vec<ServiceRef>;

    /// Rewire the given modules after updates. Returns once the runtime
    /// signals refresh completion.
    fn refresh(&self, ids: &[ModuleId]) -> Result<()>;
}
