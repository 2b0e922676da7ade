// tests/catalog_repos.rs

//! Repository catalog behavior: transitive loading, caching, eviction,
//! listener replay, and merge-order pinning.

mod common;

use std::sync::Arc;

use common::*;
use gantry::{DeployOptions, Listener, ModuleRef};

fn opts() -> DeployOptions {
    DeployOptions::default()
}

// =============================================================================
// TRANSITIVE LOADING
// =============================================================================

#[test]
fn test_cross_repository_dependency_resolves() {
    let mut root = repository("repo:root", vec![]);
    root.references.push("repo:child".to_string());
    let child = repository(
        "repo:child",
        vec![feature_with_modules("web", "1.0.0", &["mvn:x/web-core/1.0.0"])],
    );

    let rig = rig_with_roots(
        vec![root, child],
        vec![("mvn:x/web-core/1.0.0", manifest("web-core", "1.0.0"))],
        &["repo:root".to_string()],
    );

    // Only the root was registered; the child is found through references.
    rig.engine.install_feature("web", &opts()).unwrap();
    assert_eq!(rig.engine.installed_features(), vec!["web/1.0.0".to_string()]);

    let repos = rig.engine.list_repositories().unwrap();
    assert!(repos.contains(&"repo:root".to_string()));
    assert!(repos.contains(&"repo:child".to_string()));
}

#[test]
fn test_repository_reference_cycle_terminates() {
    let mut a = repository("repo:a", vec![feature("web", "1.0.0")]);
    a.references.push("repo:b".to_string());
    let mut b = repository("repo:b", vec![]);
    b.references.push("repo:a".to_string());

    let rig = rig_with_roots(vec![a, b], vec![], &["repo:a".to_string()]);
    let features = rig.engine.list_features().unwrap();
    assert_eq!(features.len(), 1);
}

// =============================================================================
// INDEX CACHING AND INVALIDATION
// =============================================================================

#[test]
fn test_feature_index_is_cached_until_mutation() {
    let mut root = repository("repo:root", vec![]);
    root.references.push("repo:child".to_string());
    let child = repository("repo:child", vec![feature("web", "1.0.0")]);
    let other = repository("repo:other", vec![feature("db", "1.0.0")]);

    let rig = rig_with_roots(
        vec![root, child, other],
        vec![],
        &["repo:root".to_string()],
    );
    assert_eq!(rig.loader.load_count(), 1); // add_repository loaded the root

    rig.engine.list_features().unwrap();
    assert_eq!(rig.loader.load_count(), 2); // + child via reference

    // Cached: no further loads.
    rig.engine.list_features().unwrap();
    rig.engine.feature("web", None).unwrap();
    assert_eq!(rig.loader.load_count(), 2);

    // A mutation invalidates; cached repositories are not reloaded.
    rig.engine.add_repository("repo:other").unwrap();
    let features = rig.engine.list_features().unwrap();
    assert_eq!(features.len(), 2);
    assert_eq!(rig.loader.load_count(), 3);
}

#[test]
fn test_add_repository_twice_is_noop() {
    let rig = rig_with_roots(
        vec![repository("repo:base", vec![feature("web", "1.0.0")])],
        vec![],
        &[],
    );
    let recorder = Arc::new(EventRecorder::default());
    rig.engine
        .register_listener(Arc::clone(&recorder) as Arc<dyn Listener>);

    rig.engine.add_repository("repo:base").unwrap();
    rig.engine.add_repository("repo:base").unwrap();

    let added: Vec<_> = recorder
        .events()
        .into_iter()
        .filter(|e| e.contains("Added"))
        .collect();
    assert_eq!(added, vec!["repository Added repo:base replayed=false"]);
}

#[test]
fn test_remove_repository_evicts_unreachable_references() {
    let mut root = repository("repo:root", vec![]);
    root.references.push("repo:shared".to_string());
    let mut other = repository("repo:other", vec![]);
    other.references.push("repo:shared".to_string());
    let shared = repository("repo:shared", vec![feature("web", "1.0.0")]);

    let rig = rig_with_roots(
        vec![root, other, shared],
        vec![],
        &["repo:root".to_string(), "repo:other".to_string()],
    );
    rig.engine.list_features().unwrap();

    // Shared repo stays reachable through repo:other.
    rig.engine.remove_repository("repo:root").unwrap();
    let repos = rig.engine.list_repositories().unwrap();
    assert!(!repos.contains(&"repo:root".to_string()));
    assert!(repos.contains(&"repo:shared".to_string()));

    // Removing the last root referencing it evicts it.
    rig.engine.remove_repository("repo:other").unwrap();
    let repos = rig.engine.list_repositories().unwrap();
    assert!(!repos.contains(&"repo:shared".to_string()));
    assert!(rig.engine.feature("web", None).unwrap().is_none());
}

#[test]
fn test_remove_repository_leaves_installed_features_alone() {
    // Known gap, preserved: removal does not check installed features.
    let rig = rig(
        vec![repository(
            "repo:base",
            vec![feature_with_modules("web", "1.0.0", &["mvn:x/web-core/1.0.0"])],
        )],
        vec![("mvn:x/web-core/1.0.0", manifest("web-core", "1.0.0"))],
    );
    rig.engine.install_feature("web/1.0.0", &opts()).unwrap();

    rig.engine.remove_repository("repo:base").unwrap();
    assert_eq!(rig.engine.installed_features(), vec!["web/1.0.0".to_string()]);
    assert!(rig.host.id_of("web-core").is_some());
}

// =============================================================================
// LISTENER REPLAY
// =============================================================================

#[test]
fn test_new_listener_catches_up_with_replayed_events() {
    let rig = rig(
        vec![repository(
            "repo:base",
            vec![feature_with_modules("web", "1.0.0", &["mvn:x/web-core/1.0.0"])],
        )],
        vec![("mvn:x/web-core/1.0.0", manifest("web-core", "1.0.0"))],
    );
    rig.engine.install_feature("web/1.0.0", &opts()).unwrap();

    let recorder = Arc::new(EventRecorder::default());
    rig.engine
        .register_listener(Arc::clone(&recorder) as Arc<dyn Listener>);

    let events = recorder.events();
    assert!(events.contains(&"repository Added repo:base replayed=true".to_string()));
    assert!(events.contains(&"feature Installed web/1.0.0 replayed=true".to_string()));
}

#[test]
fn test_unregistered_listener_receives_nothing() {
    let rig = rig_with_roots(
        vec![repository("repo:base", vec![])],
        vec![],
        &[],
    );
    let recorder = Arc::new(EventRecorder::default());
    let listener = Arc::clone(&recorder) as Arc<dyn Listener>;
    rig.engine.register_listener(Arc::clone(&listener));
    rig.engine.unregister_listener(&listener);

    rig.engine.add_repository("repo:base").unwrap();
    assert!(recorder.events().is_empty());
}

// =============================================================================
// MERGE ORDER
// =============================================================================

#[test]
fn test_duplicate_module_location_last_feature_wins() {
    // Both features carry the same location with different start levels;
    // the feature discovered last ("b" after "a") wins the merge.
    let mut a = feature("a", "1.0.0");
    let mut ref_a = ModuleRef::new("mvn:x/shared/1.0.0");
    ref_a.start_level = Some(10);
    a.modules.push(ref_a);

    let mut b = feature("b", "1.0.0");
    let mut ref_b = ModuleRef::new("mvn:x/shared/1.0.0");
    ref_b.start_level = Some(20);
    b.modules.push(ref_b);

    let rig = rig(
        vec![repository("repo:base", vec![a, b])],
        vec![("mvn:x/shared/1.0.0", manifest("shared", "1.0.0"))],
    );
    rig.engine.install_features(&["a", "b"], &opts()).unwrap();

    let id = rig.host.id_of("shared").unwrap();
    let ops = rig.host.ops();
    let installs = ops
        .iter()
        .filter(|op| matches!(op, HostOp::Install(_)))
        .count();
    assert_eq!(installs, 1, "shared location must install once");
    assert!(ops.contains(&HostOp::SetStartLevel(id, 20)));
    assert!(!ops.contains(&HostOp::SetStartLevel(id, 10)));
}

// =============================================================================
// VERSION PREFERENCE
// =============================================================================

#[test]
fn test_feature_lookup_prefers_highest_version() {
    let rig = rig(
        vec![repository(
            "repo:base",
            vec![
                feature("web", "1.0.0"),
                feature("web", "2.1.0"),
                feature("web", "0.9.0"),
            ],
        )],
        vec![],
    );
    let f = rig.engine.feature("web", None).unwrap().unwrap();
    assert_eq!(f.version.to_string(), "2.1.0");

    let f = rig.engine.feature("web", Some("[1.0,2.0)")).unwrap().unwrap();
    assert_eq!(f.version.to_string(), "1.0.0");
}
