//! Plugin Manager
//!
//! Top-level façade composing the registry, resolver, hook system,
//! lifecycle manager, and marketplace into one API surface for the host.
//! This is the explicit runtime context: the host constructs one manager
//! and passes it around; there is no ambient global state.

use crate::error::{PluginError, PluginResult};
use crate::hooks::{names, FilterOutcome, HookContext, HookOutcome, HookSystem};
use crate::lifecycle::{LifecycleManager, PluginEntry, PluginState};
use crate::manifest::PluginManifest;
use crate::marketplace::{Marketplace, MarketplaceSummary};
use crate::registry::{DiscoveryReport, PluginRegistry};
use crate::resolver;
use semver::Version;
use serde::Serialize;
use serde_json::{json, Value};
use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::{Arc, RwLock};
use tracing::{info, warn};

/// Runtime configuration supplied by the host.
#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    /// The host application's own version, checked against each manifest's
    /// declared compatibility range.
    pub host_version: Version,
    /// When set, a plugin only loads if its dependencies are `Enabled`,
    /// not merely `Loaded`.
    pub require_enabled_dependencies: bool,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            host_version: Version::new(0, 1, 0),
            require_enabled_dependencies: false,
        }
    }
}

/// Factory producing a fresh entry point instance for each load.
pub type EntryPointFactory = Box<dyn Fn() -> Box<dyn PluginEntry> + Send + Sync>;

/// Outcome of a load pass: which plugins loaded, which failed and why.
#[derive(Debug, Default)]
pub struct LoadReport {
    /// Ids loaded by this pass, in load order.
    pub loaded: Vec<String>,
    /// Per-plugin failures. The pass continues past each failure.
    pub failed: Vec<(String, PluginError)>,
}

impl LoadReport {
    pub fn is_complete(&self) -> bool {
        self.failed.is_empty()
    }
}

/// Runtime counters for the host's diagnostics surface.
#[derive(Debug, Clone, Serialize)]
pub struct RuntimeStatistics {
    /// Registered manifests.
    pub registered_plugins: usize,
    /// Plugin counts keyed by lifecycle state name.
    pub plugins_by_state: HashMap<String, usize>,
    /// Live hook registrations.
    pub hook_registrations: usize,
    /// Live filter registrations.
    pub filter_registrations: usize,
    /// Marketplace aggregates.
    pub marketplace: MarketplaceSummary,
}

/// One handle over the whole runtime.
pub struct PluginManager {
    config: RuntimeConfig,
    registry: PluginRegistry,
    hooks: Arc<HookSystem>,
    lifecycle: LifecycleManager,
    marketplace: Marketplace,
    factories: RwLock<HashMap<String, EntryPointFactory>>,
}

impl PluginManager {
    pub fn new(config: RuntimeConfig) -> Self {
        let hooks = Arc::new(HookSystem::new());
        Self {
            config,
            registry: PluginRegistry::new(),
            lifecycle: LifecycleManager::new(Arc::clone(&hooks)),
            hooks,
            marketplace: Marketplace::new(),
            factories: RwLock::new(HashMap::new()),
        }
    }

    pub fn registry(&self) -> &PluginRegistry {
        &self.registry
    }

    pub fn hooks(&self) -> &HookSystem {
        &self.hooks
    }

    pub fn marketplace(&self) -> &Marketplace {
        &self.marketplace
    }

    pub fn lifecycle(&self) -> &LifecycleManager {
        &self.lifecycle
    }

    /// Map a manifest `entry_point` name to a factory producing the
    /// plugin's executable surface. Registering the same name again
    /// replaces the factory.
    pub fn register_entry_point<F>(&self, name: &str, factory: F)
    where
        F: Fn() -> Box<dyn PluginEntry> + Send + Sync + 'static,
    {
        let mut factories = self.factories.write().unwrap();
        factories.insert(name.to_string(), Box::new(factory));
    }

    /// Validate and register a batch of manifest sources, gating each on
    /// host compatibility. Incompatible manifests are rejected and
    /// reported; the rest register and enter the lifecycle as
    /// `Discovered`.
    pub fn initialize(&self, sources: &[Value]) -> DiscoveryReport {
        let mut report = self.registry.discover(sources);

        let mut kept = Vec::with_capacity(report.registered.len());
        for id in std::mem::take(&mut report.registered) {
            let manifest = match self.registry.get(&id) {
                Some(m) => m,
                None => continue,
            };
            if let Some(ref range) = manifest.compatibility {
                if !range.satisfies(&self.config.host_version) {
                    let err = PluginError::IncompatibleHost {
                        plugin: id.clone(),
                        required: range.clone(),
                        host: self.config.host_version.clone(),
                    };
                    warn!("{}", err);
                    let _ = self.registry.unregister(&id);
                    report.errors.push(err);
                    continue;
                }
            }
            self.lifecycle.register_discovered(&id);
            kept.push(id);
        }
        report.registered = kept;
        report
    }

    /// Resolve and load every available registered plugin.
    ///
    /// Resolution-phase errors (cycles, missing dependencies, version
    /// mismatches) remove only the affected plugins from the plan and are
    /// reported before any loading begins; load-phase failures are caught
    /// per plugin and never abort the rest of the sequence. Plugins whose
    /// dependency failed are marked failed without being attempted.
    pub fn load_all(&self) -> LoadReport {
        self.load_ids(self.registry.available_ids())
    }

    /// Load one plugin (and its not-yet-loaded dependencies).
    pub fn load(&self, plugin_id: &str) -> PluginResult<()> {
        if !self.registry.contains(plugin_id) {
            return Err(PluginError::UnknownPlugin(plugin_id.to_string()));
        }
        let report = self.load_ids(vec![plugin_id.to_string()]);
        if report.loaded.iter().any(|id| id == plugin_id)
            || self
                .lifecycle
                .state(plugin_id)
                .is_some_and(|s| s.is_loaded())
        {
            return Ok(());
        }
        match report.failed.into_iter().find(|(id, _)| id == plugin_id) {
            Some((_, err)) => Err(err),
            None => Err(PluginError::PluginLoad {
                plugin: plugin_id.to_string(),
                reason: "not part of the resolved plan".to_string(),
            }),
        }
    }

    fn load_ids(&self, requested: Vec<String>) -> LoadReport {
        let mut report = LoadReport::default();
        let mut snapshot = self.registry.snapshot();
        let mut requested: BTreeSet<String> = requested.into_iter().collect();

        // Resolution loop: every failure prunes the named plugins (and
        // their dependents) from the plan, then resolution is retried, so
        // one bad subgraph cannot abort unrelated plugins.
        let plan = loop {
            if requested.is_empty() {
                break Vec::new();
            }
            let ids: Vec<String> = requested.iter().cloned().collect();
            match resolver::resolve(&snapshot, &ids) {
                Ok(plan) => break plan,
                Err(PluginError::CircularDependency { cycle }) => {
                    // Fail every member with the cycle error first, then
                    // sweep their dependents, so a member is never
                    // misreported as a mere dependency casualty.
                    let members: BTreeSet<String> = cycle.iter().cloned().collect();
                    for member in &members {
                        requested.remove(member);
                        if snapshot.shift_remove(member.as_str()).is_some() {
                            let err = PluginError::CircularDependency {
                                cycle: cycle.clone(),
                            };
                            self.lifecycle.fail(member, err.to_string());
                            self.emit_plugin_error(member, &err);
                            report.failed.push((member.clone(), err));
                        }
                    }
                    for member in &members {
                        self.fail_dependents(member, &mut snapshot, &mut requested, &mut report);
                    }
                }
                Err(err) => {
                    let culprit = match &err {
                        PluginError::UnknownPlugin(id) => id.clone(),
                        PluginError::MissingDependency { dependent, .. } => dependent.clone(),
                        PluginError::VersionMismatch { dependent, .. } => dependent.clone(),
                        // Resolution returns no other error kinds.
                        _ => break Vec::new(),
                    };
                    self.prune(&culprit, err, &mut snapshot, &mut requested, &mut report);
                }
            }
        };

        // Load phase: serialized along the resolved order.
        let mut failed: HashSet<String> =
            report.failed.iter().map(|(id, _)| id.clone()).collect();

        for id in plan {
            if let Some(state) = self.lifecycle.state(&id) {
                if state.is_loaded() {
                    continue;
                }
                if matches!(state, PluginState::Failed(_)) {
                    failed.insert(id);
                    continue;
                }
            }

            let manifest = match snapshot.get(&id) {
                Some(m) => m.clone(),
                None => continue,
            };

            if let Some(dep) = manifest
                .dependencies
                .iter()
                .find(|d| failed.contains(&d.plugin_id))
            {
                let err = PluginError::DependencyFailed {
                    plugin: id.clone(),
                    dependency: dep.plugin_id.clone(),
                };
                self.lifecycle.fail(&id, err.to_string());
                self.emit_plugin_error(&id, &err);
                report.failed.push((id.clone(), err));
                failed.insert(id);
                continue;
            }

            self.lifecycle.mark_resolved(&id);

            let entry = {
                let factories = self.factories.read().unwrap();
                factories.get(&manifest.entry_point).map(|f| f())
            };
            let entry = match entry {
                Some(entry) => entry,
                None => {
                    let err = PluginError::PluginLoad {
                        plugin: id.clone(),
                        reason: format!(
                            "no entry point factory registered for '{}'",
                            manifest.entry_point
                        ),
                    };
                    self.lifecycle.fail(&id, err.to_string());
                    self.emit_plugin_error(&id, &err);
                    report.failed.push((id.clone(), err));
                    failed.insert(id);
                    continue;
                }
            };

            match self
                .lifecycle
                .load(&manifest, entry, self.config.require_enabled_dependencies)
            {
                Ok(()) => {
                    self.hooks.trigger(
                        names::PLUGIN_LOADED,
                        &event_ctx(&[
                            ("plugin_id", json!(id)),
                            ("version", json!(manifest.version.to_string())),
                        ]),
                    );
                    report.loaded.push(id);
                }
                Err(err) => {
                    self.emit_plugin_error(&id, &err);
                    report.failed.push((id.clone(), err));
                    failed.insert(id);
                }
            }
        }

        info!(
            "load pass complete: {} loaded, {} failed",
            report.loaded.len(),
            report.failed.len()
        );
        report
    }

    /// Remove `plugin_id` (and its dependents) from a resolution pass,
    /// failing its dependents with `DependencyFailed`.
    fn prune(
        &self,
        plugin_id: &str,
        err: PluginError,
        snapshot: &mut indexmap::IndexMap<String, PluginManifest>,
        requested: &mut BTreeSet<String>,
        report: &mut LoadReport,
    ) {
        requested.remove(plugin_id);
        let was_present = snapshot.shift_remove(plugin_id).is_some();
        self.lifecycle.fail(plugin_id, err.to_string());
        self.emit_plugin_error(plugin_id, &err);
        report.failed.push((plugin_id.to_string(), err));
        if was_present {
            self.fail_dependents(plugin_id, snapshot, requested, report);
        }
    }

    /// Fail everything still in the snapshot that transitively depends on
    /// `plugin_id`, naming the lost dependency.
    fn fail_dependents(
        &self,
        plugin_id: &str,
        snapshot: &mut indexmap::IndexMap<String, PluginManifest>,
        requested: &mut BTreeSet<String>,
        report: &mut LoadReport,
    ) {
        for dependent in resolver::transitive_dependents(snapshot, plugin_id) {
            if snapshot.shift_remove(&dependent).is_some() {
                requested.remove(&dependent);
                let dep_err = PluginError::DependencyFailed {
                    plugin: dependent.clone(),
                    dependency: plugin_id.to_string(),
                };
                self.lifecycle.fail(&dependent, dep_err.to_string());
                self.emit_plugin_error(&dependent, &dep_err);
                report.failed.push((dependent, dep_err));
            }
        }
    }

    /// Make a loaded plugin eligible for dispatch again.
    pub fn enable(&self, plugin_id: &str) -> PluginResult<()> {
        self.lifecycle.enable(plugin_id)?;
        self.hooks.trigger(
            names::PLUGIN_ENABLED,
            &event_ctx(&[("plugin_id", json!(plugin_id))]),
        );
        Ok(())
    }

    /// Exclude a loaded plugin from dispatch without unloading it.
    pub fn disable(&self, plugin_id: &str) -> PluginResult<()> {
        self.lifecycle.disable(plugin_id)?;
        self.hooks.trigger(
            names::PLUGIN_DISABLED,
            &event_ctx(&[("plugin_id", json!(plugin_id))]),
        );
        Ok(())
    }

    /// Loaded plugins that (transitively) depend on `plugin_id`.
    pub fn loaded_dependents(&self, plugin_id: &str) -> Vec<String> {
        let snapshot = self.registry.snapshot();
        resolver::transitive_dependents(&snapshot, plugin_id)
            .into_iter()
            .filter(|id| {
                self.lifecycle
                    .state(id)
                    .is_some_and(|state| state.is_loaded())
            })
            .collect()
    }

    /// Error if unloading `plugin_id` would cascade into dependents.
    pub fn check_unload(&self, plugin_id: &str) -> PluginResult<()> {
        let dependents = self.loaded_dependents(plugin_id);
        if dependents.is_empty() {
            Ok(())
        } else {
            Err(PluginError::HasDependents {
                plugin: plugin_id.to_string(),
                dependents,
            })
        }
    }

    /// Unload a plugin. Loaded dependents are cascade-unloaded first,
    /// deepest-first, each with a warning. Returns every id unloaded, the
    /// requested plugin last.
    pub fn unload(&self, plugin_id: &str) -> PluginResult<Vec<String>> {
        let dependents = self.loaded_dependents(plugin_id);
        let mut unloaded = Vec::with_capacity(dependents.len() + 1);
        for dependent in dependents {
            warn!(
                "cascade-unloading {} (depends on {})",
                dependent, plugin_id
            );
            self.lifecycle.unload(&dependent)?;
            unloaded.push(dependent);
        }
        self.lifecycle.unload(plugin_id)?;
        unloaded.push(plugin_id.to_string());
        Ok(unloaded)
    }

    /// Drop a plugin from the registry entirely. The plugin (and its
    /// dependents) must not be loaded.
    pub fn unregister(&self, plugin_id: &str) -> PluginResult<()> {
        if self
            .lifecycle
            .state(plugin_id)
            .is_some_and(|state| state.is_loaded())
        {
            return Err(PluginError::InvalidState {
                plugin: plugin_id.to_string(),
                from: "loaded".to_string(),
                to: "unregistered".to_string(),
            });
        }
        self.registry.unregister(plugin_id)?;
        self.lifecycle.forget(plugin_id);
        Ok(())
    }

    /// Raise a hook: every active callback runs, one outcome per callback.
    pub fn trigger(&self, hook_name: &str, ctx: &HookContext) -> Vec<HookOutcome> {
        self.hooks.trigger(hook_name, ctx)
    }

    /// Thread a value through a filter chain.
    pub fn apply_filter(&self, filter_name: &str, value: Value, ctx: &HookContext) -> FilterOutcome {
        self.hooks.apply_filter(filter_name, value, ctx)
    }

    /// Counts by state plus hook/filter/marketplace aggregates.
    pub fn get_statistics(&self) -> RuntimeStatistics {
        let plugins_by_state = self
            .lifecycle
            .counts_by_state()
            .into_iter()
            .map(|(name, count)| (name.to_string(), count))
            .collect();
        RuntimeStatistics {
            registered_plugins: self.registry.len(),
            plugins_by_state,
            hook_registrations: self.hooks.hook_registration_count(),
            filter_registrations: self.hooks.filter_registration_count(),
            marketplace: self.marketplace.summary(),
        }
    }
}

impl Default for PluginManager {
    fn default() -> Self {
        Self::new(RuntimeConfig::default())
    }
}

impl std::fmt::Debug for PluginManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PluginManager")
            .field("config", &self.config)
            .field("registry", &self.registry.len())
            .field("hooks", &self.hooks)
            .field("lifecycle", &self.lifecycle)
            .finish()
    }
}

fn event_ctx(pairs: &[(&str, Value)]) -> HookContext {
    let mut ctx = HookContext::new();
    for (key, value) in pairs {
        ctx.insert(key.to_string(), value.clone());
    }
    ctx
}

impl PluginManager {
    fn emit_plugin_error(&self, plugin_id: &str, err: &PluginError) {
        self.hooks.trigger(
            names::PLUGIN_ERROR,
            &event_ctx(&[
                ("plugin_id", json!(plugin_id)),
                ("error", json!(err.to_string())),
                ("kind", json!(err.kind())),
            ]),
        );
    }
}
