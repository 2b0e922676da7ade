// src/lib.rs

//! Gantry Feature Engine
//!
//! Feature lifecycle management for modular runtimes: resolve named,
//! versioned feature bundles against a repository catalog, diff the
//! resolved module set against the live runtime, and enact the transition
//! with correct stop/refresh/start ordering and crash-safe persisted
//! state.
//!
//! # Architecture
//!
//! - Database-first: engine state in SQLite, rewritten atomically after
//!   every successful deployment
//! - Catalog: repositories loaded transitively, features indexed by
//!   name and version with lazy invalidation
//! - Deployment diff: live modules classified as install/update/delete
//!   with snapshot-checksum awareness
//! - Ordered execution: consumers stop before providers, providers start
//!   before requirers, start failures aggregate
//! - Narrow seams: the runtime (`ModuleHost`), repository parser
//!   (`RepositoryLoader`), resolver backend (`Resolver`) and config
//!   installer are trait-shaped collaborators

pub mod catalog;
pub mod checksum;
pub mod deploy;
pub mod engine;
mod error;
pub mod event;
pub mod host;
pub mod model;
pub mod resolver;
pub mod state;
pub mod version;

pub use catalog::{Catalog, FeatureIndex, RepositoryLoader};
pub use deploy::{DeployConfig, DeployOptions, DeploymentExecutor, DeploymentPlan};
pub use engine::{ConfigInstaller, Engine, EngineServices};
pub use error::{Error, Result, StartErrors};
pub use event::{Event, FeatureEvent, Listener, RepositoryEvent};
pub use host::{ModuleHost, ModuleId, ModuleInfo, ModuleState, ServiceRef};
pub use model::{Conditional, ConfigRef, Feature, FeatureId, FeatureRef, ModuleRef, Repository};
pub use resolver::{
    ContentSource, Resolution, ResolveRequest, Resolver, Resource, StreamProvider, WalkerResolver,
};
pub use state::{EngineState, StateStore};
pub use version::{Version, VersionRange};
