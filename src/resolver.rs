//! Dependency Resolution
//!
//! Computes a safe load order from a registry snapshot: a topological sort
//! (Kahn's algorithm) over the dependency graph of the requested plugins,
//! with deterministic tie-breaking by ascending plugin id so load order is
//! reproducible across runs. Version constraints are checked on every edge
//! before ordering. The resolver performs no loading; it returns an ordered
//! plan or a typed failure for the lifecycle manager to consume.

use crate::error::{PluginError, PluginResult};
use crate::manifest::PluginManifest;
use indexmap::IndexMap;
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};

/// Resolve a load order for `requested` against a manifest snapshot.
///
/// The returned order contains the requested plugins plus their transitive
/// dependencies, every dependency preceding its dependents. Failure modes:
/// an unknown requested id, a missing or version-incompatible dependency,
/// or a cycle (reported with every id on the detected cycle).
pub fn resolve(
    manifests: &IndexMap<String, PluginManifest>,
    requested: &[String],
) -> PluginResult<Vec<String>> {
    // Transitive closure of the requested set.
    let mut closure: BTreeSet<String> = BTreeSet::new();
    let mut pending: Vec<String> = Vec::new();

    for id in requested {
        if !manifests.contains_key(id) {
            return Err(PluginError::UnknownPlugin(id.clone()));
        }
        if closure.insert(id.clone()) {
            pending.push(id.clone());
        }
    }

    while let Some(id) = pending.pop() {
        let manifest = &manifests[&id];
        for dep in &manifest.dependencies {
            let target = manifests.get(&dep.plugin_id).ok_or_else(|| {
                PluginError::MissingDependency {
                    dependent: id.clone(),
                    dependency: dep.plugin_id.clone(),
                }
            })?;
            if !dep.range.satisfies(&target.version) {
                return Err(PluginError::VersionMismatch {
                    dependent: id.clone(),
                    dependency: dep.plugin_id.clone(),
                    required: dep.range.clone(),
                    found: target.version.clone(),
                });
            }
            if closure.insert(dep.plugin_id.clone()) {
                pending.push(dep.plugin_id.clone());
            }
        }
    }

    // Kahn's algorithm. Dependency edges point dependency -> dependent, so
    // a node's in-degree is its dependency count within the closure.
    let mut in_degree: BTreeMap<&str, usize> = BTreeMap::new();
    let mut dependents: HashMap<&str, Vec<&str>> = HashMap::new();
    for id in &closure {
        let manifest = &manifests[id.as_str()];
        in_degree.insert(id, manifest.dependencies.len());
        for dep in &manifest.dependencies {
            dependents
                .entry(dep.plugin_id.as_str())
                .or_default()
                .push(id);
        }
    }

    let mut ready: BTreeSet<&str> = in_degree
        .iter()
        .filter(|(_, &degree)| degree == 0)
        .map(|(&id, _)| id)
        .collect();

    let mut order: Vec<String> = Vec::with_capacity(closure.len());
    while let Some(&id) = ready.iter().next() {
        ready.remove(id);
        order.push(id.to_string());
        if let Some(deps) = dependents.get(id) {
            for &dependent in deps {
                let degree = in_degree.get_mut(dependent).unwrap();
                *degree -= 1;
                if *degree == 0 {
                    ready.insert(dependent);
                }
            }
        }
    }

    if order.len() < closure.len() {
        let remaining: BTreeSet<&str> = in_degree
            .iter()
            .filter(|(_, &degree)| degree > 0)
            .map(|(&id, _)| id)
            .collect();
        return Err(PluginError::CircularDependency {
            cycle: extract_cycle(manifests, &remaining),
        });
    }

    Ok(order)
}

/// Walk dependency edges inside the stuck set until a node repeats; the
/// repeated segment is the cycle, closed by restating the first id.
fn extract_cycle(
    manifests: &IndexMap<String, PluginManifest>,
    remaining: &BTreeSet<&str>,
) -> Vec<String> {
    let start = match remaining.iter().next() {
        Some(&id) => id,
        None => return Vec::new(),
    };

    let mut path: Vec<&str> = vec![start];
    let mut seen: HashSet<&str> = HashSet::from([start]);
    let mut current = start;

    loop {
        let manifest = &manifests[current];
        // Deterministic walk: smallest stuck dependency first.
        let next = manifest
            .dependencies
            .iter()
            .map(|d| d.plugin_id.as_str())
            .filter(|id| remaining.contains(id))
            .min();
        let next = match next {
            Some(id) => id,
            None => return path.iter().map(|s| s.to_string()).collect(),
        };
        if seen.contains(next) {
            let entry = path.iter().position(|&id| id == next).unwrap();
            let mut cycle: Vec<String> = path[entry..].iter().map(|s| s.to_string()).collect();
            cycle.push(next.to_string());
            return cycle;
        }
        seen.insert(next);
        path.push(next);
        current = next;
    }
}

/// Transitive dependents of `plugin_id`, deepest-first.
///
/// The returned order is safe for cascade-unloading: every dependent
/// appears before anything it depends on.
pub fn transitive_dependents(
    manifests: &IndexMap<String, PluginManifest>,
    plugin_id: &str,
) -> Vec<String> {
    // Reverse adjacency: dependency -> direct dependents.
    let mut reverse: BTreeMap<&str, BTreeSet<&str>> = BTreeMap::new();
    for manifest in manifests.values() {
        for dep in &manifest.dependencies {
            reverse
                .entry(dep.plugin_id.as_str())
                .or_default()
                .insert(manifest.plugin_id.as_str());
        }
    }

    let mut order: Vec<String> = Vec::new();
    let mut visited: HashSet<&str> = HashSet::new();
    visit_dependents(plugin_id, &reverse, &mut visited, &mut order);
    order
}

fn visit_dependents<'a>(
    id: &'a str,
    reverse: &BTreeMap<&'a str, BTreeSet<&'a str>>,
    visited: &mut HashSet<&'a str>,
    order: &mut Vec<String>,
) {
    if let Some(dependents) = reverse.get(id) {
        for &dependent in dependents {
            if visited.insert(dependent) {
                visit_dependents(dependent, reverse, visited, order);
                order.push(dependent.to_string());
            }
        }
    }
}
