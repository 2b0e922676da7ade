// src/resolver/conditional.rs

//! Fixpoint inclusion of conditional features.
//!
//! After a first resolver pass, every resolved feature's conditionals are
//! checked: when all trigger features of a conditional are present in the
//! resolution, the conditional's synthetic feature id joins the feature
//! set and the resolver runs once more. A single expansion pass is
//! performed; conditionals whose triggers only appear through the second
//! pass are not expanded further.

use std::collections::BTreeSet;

use tracing::debug;

use crate::catalog::FeatureIndex;
use crate::error::Result;
use crate::model::Feature;
use crate::resolver::Resource;
use crate::version::VersionRange;

/// Compute the conditional expansion of `requested` given the first-pass
/// resolution output. Returns `Some(expanded)` when at least one
/// conditional fired, `None` when no re-resolution is needed.
pub fn expand_conditionals(
    catalog: &FeatureIndex,
    requested: &BTreeSet<String>,
    resolved: &[Resource],
) -> Result<Option<BTreeSet<String>>> {
    let installed: Vec<Feature> = resolved
        .iter()
        .filter_map(|r| r.feature.as_ref())
        .filter_map(|id| catalog.matching(&id.name, &id.version.to_string()))
        .collect();

    let mut expanded = requested.clone();
    let mut fired = false;
    for feature in &installed {
        for (index, conditional) in feature.conditionals.iter().enumerate() {
            let mut satisfied = true;
            for trigger in &conditional.triggers {
                let range = VersionRange::for_trigger(&trigger.version)?;
                let hit = installed
                    .iter()
                    .any(|f| f.name == trigger.name && range.contains(&f.version));
                if !hit {
                    satisfied = false;
                    break;
                }
            }
            if satisfied {
                let synthetic = conditional
                    .as_feature(index, &feature.name, &feature.version)
                    .id()
                    .to_string();
                debug!("Conditional satisfied, adding '{}'", synthetic);
                if expanded.insert(synthetic) {
                    fired = true;
                }
            }
        }
    }
    Ok(if fired { Some(expanded) } else { None })
}
